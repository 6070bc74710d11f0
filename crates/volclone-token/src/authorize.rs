//! Authorization of a clone request against its token.

use tracing::debug;
use volclone_core::NamespacedName;

use crate::error::{Result, TokenError};
use crate::jwt::TokenValidator;
use crate::payload::{Operation, Payload, PVC_RESOURCE};

/// Check that `token` authorizes cloning `source` into `target`.
///
/// The token must verify, name the clone operation on persistent volume
/// claims, and bind exactly this source and this target. Every mismatch is
/// reported as the same opaque [`TokenError::AuthorizationFailed`]; the
/// specific reason is only logged at debug level.
///
/// # Errors
///
/// Returns [`TokenError::AuthorizationFailed`] if the token is missing,
/// invalid, or does not match the claims.
pub fn authorize(
    validator: &dyn TokenValidator,
    token: Option<&str>,
    source: &NamespacedName,
    target: &NamespacedName,
) -> Result<Payload> {
    let Some(token) = token.filter(|t| !t.is_empty()) else {
        debug!(target_claim = %target, "clone token missing");
        return Err(TokenError::AuthorizationFailed);
    };

    let payload = validator.validate(token).map_err(|e| {
        debug!(target_claim = %target, error = %e, "clone token did not validate");
        TokenError::AuthorizationFailed
    })?;

    if let Some(reason) = mismatch(&payload, source, target) {
        debug!(
            source_claim = %source,
            target_claim = %target,
            reason,
            "clone token does not match claims"
        );
        return Err(TokenError::AuthorizationFailed);
    }

    Ok(payload)
}

fn mismatch(
    payload: &Payload,
    source: &NamespacedName,
    target: &NamespacedName,
) -> Option<&'static str> {
    if payload.operation != Operation::Clone {
        return Some("operation is not clone");
    }
    if payload.resource.resource != PVC_RESOURCE {
        return Some("resource is not a persistent volume claim");
    }
    if payload.name != source.name || payload.namespace != source.namespace {
        return Some("source does not match");
    }
    match payload.target() {
        Some(t) if &t == target => None,
        _ => Some("target does not match"),
    }
}
