//! Client certificate and CA bundle sources for clone-source pods.
//!
//! A clone-source pod authenticates to the target's upload server with a
//! client certificate and verifies the server against a CA bundle. Both are
//! obtained through the traits here so the reconciler never touches key
//! material directly.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use rcgen::{
    CertificateParams, DistinguishedName, DnType, DnValue, ExtendedKeyUsagePurpose, IsCa, Issuer,
    KeyPair, KeyUsagePurpose,
};
use tracing::debug;

use crate::{CloneError, Result};

/// A PEM client certificate and its private key.
#[derive(Clone, PartialEq, Eq)]
pub struct ClientCert {
    /// PEM-encoded certificate chain.
    pub cert: Vec<u8>,
    /// PEM-encoded private key.
    pub key: Vec<u8>,
}

impl std::fmt::Debug for ClientCert {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientCert")
            .field("cert_len", &self.cert.len())
            .field("key", &"<redacted>")
            .finish()
    }
}

/// Issues client certificates for clone-source pods.
#[async_trait]
pub trait ClientCertGenerator: Send + Sync {
    /// Produce a client certificate for `name` in `groups`, valid for `duration`.
    ///
    /// # Errors
    ///
    /// Returns [`CloneError::Certificate`] if no certificate can be produced.
    async fn make_client_cert(
        &self,
        name: &str,
        groups: &[String],
        duration: Duration,
    ) -> Result<ClientCert>;
}

/// Supplies the CA bundle trusted for upload servers.
#[async_trait]
pub trait CaBundleFetcher: Send + Sync {
    /// Current PEM bundle.
    ///
    /// # Errors
    ///
    /// Returns [`CloneError::Certificate`] if the bundle cannot be read.
    async fn bundle(&self) -> Result<Vec<u8>>;
}

async fn read_pem(path: &Path, what: &str) -> Result<Vec<u8>> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| CloneError::Certificate(format!("failed to read {what} {}: {e}", path.display())))?;
    if bytes.is_empty() {
        return Err(CloneError::Certificate(format!(
            "{what} {} is empty",
            path.display()
        )));
    }
    Ok(bytes)
}

/// Issues client certificates signed by a CA mounted from a secret.
///
/// Each certificate gets a fresh key pair, the client name as its common
/// name and the requested lifetime. The CA files are re-read on every call
/// so a rotated secret takes effect without restarting the controller.
#[derive(Debug, Clone)]
pub struct CaCertGenerator {
    ca_cert_path: PathBuf,
    ca_key_path: PathBuf,
}

impl CaCertGenerator {
    /// Create a generator signing with the given PEM CA certificate and key.
    #[must_use]
    pub fn new(ca_cert_path: impl Into<PathBuf>, ca_key_path: impl Into<PathBuf>) -> Self {
        Self {
            ca_cert_path: ca_cert_path.into(),
            ca_key_path: ca_key_path.into(),
        }
    }
}

#[async_trait]
impl ClientCertGenerator for CaCertGenerator {
    async fn make_client_cert(
        &self,
        name: &str,
        groups: &[String],
        duration: Duration,
    ) -> Result<ClientCert> {
        let ca_cert = read_pem(&self.ca_cert_path, "client CA certificate").await?;
        let ca_key = read_pem(&self.ca_key_path, "client CA key").await?;
        let cert = sign_client_cert(&ca_cert, &ca_key, name, groups, duration)?;
        debug!(
            client_name = name,
            ?groups,
            duration_secs = duration.as_secs(),
            "Issued client certificate"
        );
        Ok(cert)
    }
}

fn cert_error(context: &str, e: impl std::fmt::Display) -> CloneError {
    CloneError::Certificate(format!("{context}: {e}"))
}

/// Sign a client-auth certificate for `name` with the given CA.
///
/// `groups` become the organization of the subject. Only one group is
/// supported because a distinguished name holds one value per attribute.
fn sign_client_cert(
    ca_cert_pem: &[u8],
    ca_key_pem: &[u8],
    name: &str,
    groups: &[String],
    duration: Duration,
) -> Result<ClientCert> {
    if groups.len() > 1 {
        return Err(CloneError::Certificate(format!(
            "client certificate for {name} requests {} groups, at most one is supported",
            groups.len()
        )));
    }
    let ca_cert_pem =
        std::str::from_utf8(ca_cert_pem).map_err(|e| cert_error("client CA certificate is not PEM", e))?;
    let ca_key_pem =
        std::str::from_utf8(ca_key_pem).map_err(|e| cert_error("client CA key is not PEM", e))?;
    let ca_key = KeyPair::from_pem(ca_key_pem).map_err(|e| cert_error("failed to parse client CA key", e))?;
    let issuer = Issuer::from_ca_cert_pem(ca_cert_pem, &ca_key)
        .map_err(|e| cert_error("failed to load client CA certificate", e))?;

    let mut params = CertificateParams::default();
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, DnValue::Utf8String(name.to_string()));
    for group in groups {
        dn.push(DnType::OrganizationName, DnValue::Utf8String(group.clone()));
    }
    params.distinguished_name = dn;

    params.is_ca = IsCa::NoCa;
    params.key_usages = vec![
        KeyUsagePurpose::DigitalSignature,
        KeyUsagePurpose::KeyEncipherment,
    ];
    params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ClientAuth];

    let lifetime = time::Duration::try_from(duration)
        .map_err(|e| cert_error("invalid client certificate lifetime", e))?;
    let now = time::OffsetDateTime::now_utc();
    params.not_before = now;
    params.not_after = now
        .checked_add(lifetime)
        .ok_or_else(|| CloneError::Certificate("client certificate lifetime out of range".to_string()))?;

    let key = KeyPair::generate().map_err(|e| cert_error("failed to generate client key", e))?;
    let cert = params
        .signed_by(&key, &issuer)
        .map_err(|e| cert_error("failed to sign client certificate", e))?;

    Ok(ClientCert {
        cert: cert.pem().into_bytes(),
        key: key.serialize_pem().into_bytes(),
    })
}

/// Reads the upload-server CA bundle from a mounted file.
#[derive(Debug, Clone)]
pub struct FileCaBundle {
    path: PathBuf,
}

impl FileCaBundle {
    /// Create a fetcher reading the given PEM file.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl CaBundleFetcher for FileCaBundle {
    async fn bundle(&self) -> Result<Vec<u8>> {
        read_pem(&self.path, "CA bundle").await
    }
}

/// Returns the same certificate for every request.
#[derive(Debug, Clone)]
pub struct StaticCertGenerator {
    cert: ClientCert,
}

impl StaticCertGenerator {
    /// Create a generator returning `cert` and `key`.
    #[must_use]
    pub fn new(cert: impl Into<Vec<u8>>, key: impl Into<Vec<u8>>) -> Self {
        Self {
            cert: ClientCert {
                cert: cert.into(),
                key: key.into(),
            },
        }
    }
}

#[async_trait]
impl ClientCertGenerator for StaticCertGenerator {
    async fn make_client_cert(
        &self,
        _name: &str,
        _groups: &[String],
        _duration: Duration,
    ) -> Result<ClientCert> {
        Ok(self.cert.clone())
    }
}

/// A CA bundle held in memory.
#[derive(Debug, Clone)]
pub struct MemCaBundle(Vec<u8>);

impl MemCaBundle {
    /// Create a fetcher returning `bundle`.
    #[must_use]
    pub fn new(bundle: impl Into<Vec<u8>>) -> Self {
        Self(bundle.into())
    }
}

#[async_trait]
impl CaBundleFetcher for MemCaBundle {
    async fn bundle(&self) -> Result<Vec<u8>> {
        Ok(self.0.clone())
    }
}
