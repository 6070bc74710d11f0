//! Error types for the clone controller.

use thiserror::Error;
use volclone_core::{AnnotationError, NamespacedName};

use crate::types::VolumeMode;

/// Errors that can occur while reconciling a clone.
#[derive(Error, Debug)]
pub enum CloneError {
    /// A boolean annotation on the target claim could not be parsed.
    #[error(transparent)]
    Annotation(#[from] AnnotationError),

    /// Source and target claims use different volume modes.
    #[error("source volumeMode ({source_mode}) and target volumeMode ({target_mode}) do not match")]
    VolumeModeMismatch {
        /// Volume mode of the source claim.
        source_mode: VolumeMode,
        /// Volume mode of the target claim.
        target_mode: VolumeMode,
    },

    /// A required annotation is absent from the target claim.
    #[error("missing required {0} annotation")]
    MissingAnnotation(&'static str),

    /// The clone token does not authorize this clone.
    #[error("clone authorization failed")]
    AuthorizationFailed,

    /// The claim named by the clone request does not exist.
    #[error("source claim not found: {0}")]
    SourceClaimNotFound(NamespacedName),

    /// More than one clone-source pod carries the target's lookup label.
    #[error("multiple clone-source pods match {selector} in {scope}")]
    MultipleSourcePods {
        /// Namespace searched, or all namespaces.
        scope: String,
        /// Label selector of the lookup.
        selector: String,
    },

    /// An update was rejected because the object changed since it was read.
    #[error("conflict updating {0}: object has been modified")]
    Conflict(String),

    /// Kubernetes API error.
    #[error("Kubernetes API error: {0}")]
    KubeApi(#[from] kube::Error),

    /// Client certificate or CA bundle could not be obtained.
    #[error("certificate error: {0}")]
    Certificate(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// An object is missing metadata the controller relies on.
    #[error("invalid object: {0}")]
    InvalidObject(String),
}

impl CloneError {
    /// Check if this error stems from infrastructure rather than user input.
    ///
    /// Retriable errors clear on their own; the others need someone to fix the
    /// claim's annotations or token before re-delivery can succeed.
    #[must_use]
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            Self::KubeApi(_) | Self::Conflict(_) | Self::Certificate(_) | Self::SourceClaimNotFound(_)
        )
    }
}

/// A specialized Result type for clone controller operations.
pub type Result<T> = std::result::Result<T, CloneError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn volume_mode_mismatch_names_both_modes() {
        let err = CloneError::VolumeModeMismatch {
            source_mode: VolumeMode::Filesystem,
            target_mode: VolumeMode::Block,
        };
        assert_eq!(
            err.to_string(),
            "source volumeMode (Filesystem) and target volumeMode (Block) do not match"
        );
    }

    #[test]
    fn missing_annotation_names_key() {
        let err = CloneError::MissingAnnotation(volclone_core::annotations::ANN_UPLOAD_CLIENT_NAME);
        assert_eq!(
            err.to_string(),
            "missing required volclone.io/upload-client-name annotation"
        );
    }

    #[test]
    fn retriable_classes() {
        assert!(CloneError::Conflict("pvc".into()).is_retriable());
        assert!(CloneError::Certificate("x".into()).is_retriable());
        assert!(!CloneError::AuthorizationFailed.is_retriable());
        assert!(!CloneError::MissingAnnotation("k").is_retriable());
    }
}
