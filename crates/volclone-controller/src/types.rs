//! Types for the clone controller crate.

use std::fmt;
use std::time::Duration;

use k8s_openapi::api::core::v1::PersistentVolumeClaim;

/// Volume mode of a persistent volume claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum VolumeMode {
    /// Mounted as a filesystem (the Kubernetes default).
    #[default]
    Filesystem,
    /// Exposed as a raw block device.
    Block,
}

impl VolumeMode {
    /// Volume mode requested by a claim, defaulting to filesystem.
    #[must_use]
    pub fn of_claim(claim: &PersistentVolumeClaim) -> Self {
        match claim.spec.as_ref().and_then(|s| s.volume_mode.as_deref()) {
            Some("Block") => Self::Block,
            _ => Self::Filesystem,
        }
    }

    /// Value passed to the cloner process in `VOLUME_MODE`.
    #[must_use]
    pub const fn env_value(self) -> &'static str {
        match self {
            Self::Filesystem => "filesystem",
            Self::Block => "block",
        }
    }
}

impl fmt::Display for VolumeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Filesystem => write!(f, "Filesystem"),
            Self::Block => write!(f, "Block"),
        }
    }
}

/// Key type of the clone-token verification key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TokenKeyType {
    /// Ed25519 public key (`EdDSA`).
    #[default]
    Ed25519,
    /// RSA public key (`RS256`).
    Rsa,
}

/// Longest accepted client certificate lifetime, one year.
pub const MAX_CLIENT_CERT_HOURS: u64 = 365 * 24;

/// Configuration for the clone controller.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Container image of the clone-source process.
    pub cloner_image: String,
    /// Image pull policy for the clone-source container.
    pub pull_policy: String,
    /// Path to the PEM public key that verifies clone tokens.
    pub token_public_key_path: String,
    /// Type of the token verification key.
    pub token_key_type: TokenKeyType,
    /// Path to the PEM certificate of the CA that signs client certificates.
    pub client_ca_cert_path: String,
    /// Path to the PEM key of the client-signing CA.
    pub client_ca_key_path: String,
    /// Path to the PEM bundle of CAs trusted for the upload server.
    pub ca_bundle_path: String,
    /// Lifetime requested for clone-source client certificates, in hours.
    pub client_cert_hours: u64,
    /// Restrict the controller to one namespace of target claims.
    pub watch_namespace: Option<String>,
    /// CPU request and limit for clone-source pods, e.g. `500m`.
    pub source_cpu: Option<String>,
    /// Memory request and limit for clone-source pods, e.g. `256Mi`.
    pub source_memory: Option<String>,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            cloner_image: "quay.io/volclone/volclone-cloner:latest".to_string(),
            pull_policy: "IfNotPresent".to_string(),
            token_public_key_path: "/var/run/volclone/token/tls.pub".to_string(),
            token_key_type: TokenKeyType::Ed25519,
            client_ca_cert_path: "/var/run/volclone/client-ca/tls.crt".to_string(),
            client_ca_key_path: "/var/run/volclone/client-ca/tls.key".to_string(),
            ca_bundle_path: "/var/run/volclone/upload-ca/ca-bundle.crt".to_string(),
            client_cert_hours: 24,
            watch_namespace: None,
            source_cpu: None,
            source_memory: None,
        }
    }
}

impl ControllerConfig {
    /// Load configuration from environment variables.
    ///
    /// Supported environment variables:
    /// - `VOLCLONE_CLONER_IMAGE`: Container image of the clone-source process
    /// - `VOLCLONE_PULL_POLICY`: Image pull policy (`Always`, `IfNotPresent`, `Never`)
    /// - `VOLCLONE_TOKEN_PUBLIC_KEY`: Path to the token verification key
    /// - `VOLCLONE_TOKEN_KEY_TYPE`: `ed25519` or `rsa`
    /// - `VOLCLONE_CLIENT_CA_CERT`: Path to the client-signing CA certificate
    /// - `VOLCLONE_CLIENT_CA_KEY`: Path to the client-signing CA key
    /// - `VOLCLONE_CA_BUNDLE`: Path to the upload-server CA bundle
    /// - `VOLCLONE_CLIENT_CERT_HOURS`: Client certificate lifetime
    /// - `VOLCLONE_WATCH_NAMESPACE`: Only reconcile claims in this namespace
    /// - `VOLCLONE_SOURCE_CPU`: CPU for clone-source pods
    /// - `VOLCLONE_SOURCE_MEMORY`: Memory for clone-source pods
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("VOLCLONE_CLONER_IMAGE") {
            config.cloner_image = val;
        }
        if let Ok(val) = std::env::var("VOLCLONE_PULL_POLICY") {
            config.pull_policy = val;
        }
        if let Ok(val) = std::env::var("VOLCLONE_TOKEN_PUBLIC_KEY") {
            config.token_public_key_path = val;
        }
        if let Ok(val) = std::env::var("VOLCLONE_TOKEN_KEY_TYPE") {
            config.token_key_type = match val.to_lowercase().as_str() {
                "rsa" | "rs256" => TokenKeyType::Rsa,
                "ed25519" | "eddsa" => TokenKeyType::Ed25519,
                _ => config.token_key_type,
            };
        }
        if let Ok(val) = std::env::var("VOLCLONE_CLIENT_CA_CERT") {
            config.client_ca_cert_path = val;
        }
        if let Ok(val) = std::env::var("VOLCLONE_CLIENT_CA_KEY") {
            config.client_ca_key_path = val;
        }
        if let Ok(val) = std::env::var("VOLCLONE_CA_BUNDLE") {
            config.ca_bundle_path = val;
        }
        if let Ok(val) = std::env::var("VOLCLONE_CLIENT_CERT_HOURS") {
            if let Ok(n) = val.parse() {
                config.client_cert_hours = n;
            }
        }
        if let Ok(val) = std::env::var("VOLCLONE_WATCH_NAMESPACE") {
            if !val.is_empty() {
                config.watch_namespace = Some(val);
            }
        }
        if let Ok(val) = std::env::var("VOLCLONE_SOURCE_CPU") {
            config.source_cpu = Some(val);
        }
        if let Ok(val) = std::env::var("VOLCLONE_SOURCE_MEMORY") {
            config.source_memory = Some(val);
        }

        config
    }

    /// Lifetime requested for clone-source client certificates.
    #[must_use]
    pub fn client_cert_duration(&self) -> Duration {
        Duration::from_secs(self.client_cert_hours.saturating_mul(3600))
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the image is empty, the pull policy is unknown or the
    /// client certificate lifetime is zero or longer than [`MAX_CLIENT_CERT_HOURS`].
    pub fn validate(&self) -> crate::Result<()> {
        if self.cloner_image.is_empty() {
            return Err(crate::CloneError::Config(
                "cloner image must not be empty".to_string(),
            ));
        }
        if !matches!(self.pull_policy.as_str(), "Always" | "IfNotPresent" | "Never") {
            return Err(crate::CloneError::Config(format!(
                "unknown image pull policy {:?}",
                self.pull_policy
            )));
        }
        if self.client_cert_hours == 0 {
            return Err(crate::CloneError::Config(
                "client certificate lifetime must be positive".to_string(),
            ));
        }
        if self.client_cert_hours > MAX_CLIENT_CERT_HOURS {
            return Err(crate::CloneError::Config(format!(
                "client certificate lifetime of {} hours exceeds {MAX_CLIENT_CERT_HOURS}",
                self.client_cert_hours
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::PersistentVolumeClaimSpec;

    fn claim_with_mode(mode: Option<&str>) -> PersistentVolumeClaim {
        PersistentVolumeClaim {
            spec: Some(PersistentVolumeClaimSpec {
                volume_mode: mode.map(str::to_string),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn volume_mode_from_claim() {
        assert_eq!(VolumeMode::of_claim(&claim_with_mode(Some("Block"))), VolumeMode::Block);
        assert_eq!(
            VolumeMode::of_claim(&claim_with_mode(Some("Filesystem"))),
            VolumeMode::Filesystem
        );
        assert_eq!(VolumeMode::of_claim(&claim_with_mode(None)), VolumeMode::Filesystem);
        assert_eq!(
            VolumeMode::of_claim(&PersistentVolumeClaim::default()),
            VolumeMode::Filesystem
        );
    }

    #[test]
    fn volume_mode_display() {
        assert_eq!(VolumeMode::Block.to_string(), "Block");
        assert_eq!(VolumeMode::Filesystem.env_value(), "filesystem");
    }

    #[test]
    fn controller_config_defaults() {
        let config = ControllerConfig::default();
        assert_eq!(config.pull_policy, "IfNotPresent");
        assert_eq!(config.token_key_type, TokenKeyType::Ed25519);
        assert_eq!(config.client_cert_duration(), Duration::from_secs(24 * 3600));
        assert!(config.watch_namespace.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn controller_config_validate() {
        let mut config = ControllerConfig {
            pull_policy: "Sometimes".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());

        config.pull_policy = "Always".to_string();
        config.cloner_image = String::new();
        assert!(config.validate().is_err());

        config.cloner_image = "cloner:v1".to_string();
        config.client_cert_hours = 0;
        assert!(config.validate().is_err());

        config.client_cert_hours = MAX_CLIENT_CERT_HOURS;
        assert!(config.validate().is_ok());
        config.client_cert_hours = MAX_CLIENT_CERT_HOURS + 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn huge_cert_lifetime_saturates() {
        let config = ControllerConfig {
            client_cert_hours: u64::MAX,
            ..Default::default()
        };
        assert_eq!(config.client_cert_duration(), Duration::from_secs(u64::MAX));
        assert!(config.validate().is_err());
    }
}
