//! Clone state derivation.
//!
//! Every reconciliation reads the target claim, the source claim and the
//! clone-source pod once into a [`ClaimSnapshot`], then [`derive_state`]
//! maps that snapshot to exactly one [`CloneState`]. Nothing here performs
//! I/O, so the same snapshot always yields the same state.

use k8s_openapi::api::core::v1::{PersistentVolumeClaim, Pod};
use kube::ResourceExt;

use volclone_core::annotations::{
    self, Annotations, ANN_CLONE_TOKEN, ANN_UPLOAD_CLIENT_NAME, CLONE_SOURCE_POD_FINALIZER,
    POD_PHASE_SUCCEEDED,
};
use volclone_core::{AnnotationError, NamespacedName};
use volclone_token::{authorize, TokenValidator};

use crate::types::VolumeMode;
use crate::CloneError;

/// Persisted state observed at the start of a reconciliation.
#[derive(Debug, Clone, Default)]
pub struct ClaimSnapshot {
    /// The target claim, if it exists.
    pub target: Option<PersistentVolumeClaim>,
    /// The claim named by the target's clone request, if it exists.
    pub source: Option<PersistentVolumeClaim>,
    /// The clone-source pod, if it exists.
    pub workload: Option<Pod>,
}

/// The progress of one clone, derived from a [`ClaimSnapshot`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloneState {
    /// The target claim does not exist.
    AwaitingTarget,
    /// No clone was requested, the request is malformed, or the clone is done.
    Ignored,
    /// The target is being deleted and still carries the clone finalizer.
    Finalizing,
    /// The `pod-ready` annotation is not a boolean.
    ReadinessParseError(AnnotationError),
    /// The target's consumer is not ready yet.
    AwaitingReadiness,
    /// The clone-source pod reported success.
    Completing,
    /// The clone-source pod exists and has not finished.
    InProgress,
    /// The source claim named by the clone request does not exist.
    SourceMissing(NamespacedName),
    /// Source and target volume modes differ.
    VolumeModeMismatch {
        /// Mode of the source claim.
        source_mode: VolumeMode,
        /// Mode of the target claim.
        target_mode: VolumeMode,
    },
    /// The `upload-client-name` annotation is absent.
    MissingClientName,
    /// The clone token does not authorize this clone.
    Unauthorized,
    /// Everything checks out and no clone-source pod exists yet.
    Launching {
        /// Source claim to clone from.
        source: NamespacedName,
        /// Client name for the clone-source certificate.
        client_name: String,
    },
}

impl CloneState {
    /// Short name for logging.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::AwaitingTarget => "AwaitingTarget",
            Self::Ignored => "Ignored",
            Self::Finalizing => "Finalizing",
            Self::ReadinessParseError(_) => "ReadinessParseError",
            Self::AwaitingReadiness => "AwaitingReadiness",
            Self::Completing => "Completing",
            Self::InProgress => "InProgress",
            Self::SourceMissing(_) => "SourceMissing",
            Self::VolumeModeMismatch { .. } => "VolumeModeMismatch",
            Self::MissingClientName => "MissingClientName",
            Self::Unauthorized => "Unauthorized",
            Self::Launching { .. } => "Launching",
        }
    }

    /// The error a fatal state reports, or `None` for states that act or wait.
    #[must_use]
    pub fn error(&self) -> Option<CloneError> {
        match self {
            Self::ReadinessParseError(e) => Some(CloneError::Annotation(e.clone())),
            Self::SourceMissing(key) => Some(CloneError::SourceClaimNotFound(key.clone())),
            Self::VolumeModeMismatch {
                source_mode,
                target_mode,
            } => Some(CloneError::VolumeModeMismatch {
                source_mode: *source_mode,
                target_mode: *target_mode,
            }),
            Self::MissingClientName => Some(CloneError::MissingAnnotation(ANN_UPLOAD_CLIENT_NAME)),
            Self::Unauthorized => Some(CloneError::AuthorizationFailed),
            _ => None,
        }
    }
}

/// True if `claim` carries the clone-source finalizer.
#[must_use]
pub fn has_finalizer(claim: &PersistentVolumeClaim) -> bool {
    claim
        .finalizers()
        .iter()
        .any(|f| f == CLONE_SOURCE_POD_FINALIZER)
}

/// Map a snapshot to the clone's current state.
///
/// Checks run top to bottom and the first that matches wins. Token,
/// client-name and volume-mode checks only guard the launch of the
/// clone-source pod; once the pod exists they are not repeated.
#[must_use]
pub fn derive_state(snapshot: &ClaimSnapshot, validator: &dyn TokenValidator) -> CloneState {
    let Some(target) = &snapshot.target else {
        return CloneState::AwaitingTarget;
    };

    if target.metadata.deletion_timestamp.is_some() {
        return if has_finalizer(target) {
            CloneState::Finalizing
        } else {
            CloneState::Ignored
        };
    }

    let empty = Annotations::new();
    let anns = target.metadata.annotations.as_ref().unwrap_or(&empty);

    let Some(source_key) = annotations::parse_clone_request(anns) else {
        return CloneState::Ignored;
    };
    if annotations::is_complete(anns) {
        return CloneState::Ignored;
    }

    match annotations::is_ready(anns) {
        Err(e) => return CloneState::ReadinessParseError(e),
        Ok(false) => return CloneState::AwaitingReadiness,
        Ok(true) => {}
    }

    if annotations::pod_phase(anns) == Some(POD_PHASE_SUCCEEDED) {
        return CloneState::Completing;
    }
    if snapshot.workload.is_some() {
        return CloneState::InProgress;
    }

    let Some(source) = &snapshot.source else {
        return CloneState::SourceMissing(source_key);
    };

    let source_mode = VolumeMode::of_claim(source);
    let target_mode = VolumeMode::of_claim(target);
    if source_mode != target_mode {
        return CloneState::VolumeModeMismatch {
            source_mode,
            target_mode,
        };
    }

    let Some(client_name) = annotations::non_empty(anns, ANN_UPLOAD_CLIENT_NAME) else {
        return CloneState::MissingClientName;
    };

    let target_key = NamespacedName::new(target.namespace().unwrap_or_default(), target.name_any());
    let token = anns.get(ANN_CLONE_TOKEN).map(String::as_str);
    if authorize(validator, token, &source_key, &target_key).is_err() {
        return CloneState::Unauthorized;
    }

    CloneState::Launching {
        source: source_key,
        client_name: client_name.to_string(),
    }
}
