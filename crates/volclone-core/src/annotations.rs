//! Annotation keys and readers for clone state.
//!
//! A target volume claim carries its whole clone progress as string
//! annotations. The functions here are pure: they look at an annotation map
//! and report what it means, without touching the cluster.

use std::collections::BTreeMap;

use thiserror::Error;

use crate::ids::NamespacedName;

/// Annotation map as carried by Kubernetes object metadata.
pub type Annotations = BTreeMap<String, String>;

/// Requested clone source, as `"<namespace>/<name>"`.
pub const ANN_CLONE_REQUEST: &str = "volclone.io/clone-request";

/// Set to `"true"` once the clone has completed.
pub const ANN_CLONE_OF: &str = "volclone.io/clone-of";

/// Set by the upload side once the target pod can receive data.
pub const ANN_POD_READY: &str = "volclone.io/pod-ready";

/// Signed clone-authorization token.
pub const ANN_CLONE_TOKEN: &str = "volclone.io/clone-token";

/// Common name used for the clone-source client certificate.
pub const ANN_UPLOAD_CLIENT_NAME: &str = "volclone.io/upload-client-name";

/// Terminal phase of the transfer, mirrored onto the target claim.
pub const ANN_POD_PHASE: &str = "volclone.io/pod-phase";

/// Marks objects created by this controller.
pub const ANN_CREATED_BY: &str = "volclone.io/created-by";

/// `"<namespace>/<name>"` of the target claim a clone-source pod serves.
pub const ANN_OWNED_BY: &str = "volclone.io/owned-by";

/// Finalizer held on a target claim while a clone-source pod may exist.
pub const CLONE_SOURCE_POD_FINALIZER: &str = "volclone.io/clone-source-pod";

/// Pod phase value reported once the transfer finished successfully.
pub const POD_PHASE_SUCCEEDED: &str = "Succeeded";

/// Errors produced while interpreting annotations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AnnotationError {
    /// The annotation is present but its value cannot be parsed.
    #[error("error parsing {key} annotation: invalid value {value:?}")]
    Parse {
        /// Annotation key.
        key: String,
        /// Offending value.
        value: String,
    },
}

/// Parse a boolean the way Kubernetes tooling writes them.
///
/// Accepts `1 t T TRUE true True` and `0 f F FALSE false False`.
#[must_use]
pub fn parse_bool(value: &str) -> Option<bool> {
    match value {
        "1" | "t" | "T" | "TRUE" | "true" | "True" => Some(true),
        "0" | "f" | "F" | "FALSE" | "false" | "False" => Some(false),
        _ => None,
    }
}

/// Read the requested clone source.
///
/// Returns `None` unless the annotation exists and splits on `/` into exactly
/// two non-empty segments. A malformed value is treated as "no clone
/// requested" rather than an error.
#[must_use]
pub fn parse_clone_request(annotations: &Annotations) -> Option<NamespacedName> {
    NamespacedName::parse(annotations.get(ANN_CLONE_REQUEST)?)
}

/// Check whether the target side reported ready.
///
/// Only the exact value `"true"` means ready. A missing or empty annotation,
/// or any other value that parses as a boolean, means not yet ready.
///
/// # Errors
///
/// Returns [`AnnotationError::Parse`] if the value is non-empty and not a
/// boolean at all.
pub fn is_ready(annotations: &Annotations) -> Result<bool, AnnotationError> {
    let Some(value) = annotations.get(ANN_POD_READY) else {
        return Ok(false);
    };
    if value.is_empty() {
        return Ok(false);
    }
    match parse_bool(value) {
        Some(_) => Ok(value == "true"),
        None => Err(AnnotationError::Parse {
            key: ANN_POD_READY.to_string(),
            value: value.clone(),
        }),
    }
}

/// True once the clone has been marked complete.
#[must_use]
pub fn is_complete(annotations: &Annotations) -> bool {
    annotations.get(ANN_CLONE_OF).is_some_and(|v| v == "true")
}

/// The mirrored transfer phase, if any.
#[must_use]
pub fn pod_phase(annotations: &Annotations) -> Option<&str> {
    annotations.get(ANN_POD_PHASE).map(String::as_str)
}

/// Non-empty value of `key`, if present.
#[must_use]
pub fn non_empty<'a>(annotations: &'a Annotations, key: &str) -> Option<&'a str> {
    annotations
        .get(key)
        .map(String::as_str)
        .filter(|v| !v.is_empty())
}

/// Insert or overwrite an annotation.
///
/// Empty keys and values are stored as given; the API server is the
/// authority on which keys it accepts.
pub fn set_annotation(annotations: &mut Annotations, key: &str, value: &str) {
    annotations.insert(key.to_string(), value.to_string());
}
