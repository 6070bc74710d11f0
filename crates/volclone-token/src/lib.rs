//! Signed clone-authorization tokens for volclone.
//!
//! A clone token binds one source claim to one target claim for the clone
//! operation. It is issued by the API-facing component that admitted the
//! clone request and checked by the clone controller before any data leaves
//! the source namespace.
//!
//! - [`TokenGenerator`] signs a [`Payload`] with the issuer's private key
//! - [`TokenValidator`] verifies signature, issuer and expiry
//! - [`authorize`] checks a verified payload against the claims being cloned
//!
//! # Example
//!
//! ```no_run
//! use volclone_core::NamespacedName;
//! use volclone_token::{authorize, JwtTokenValidator, Payload, TokenConfig, TokenGenerator};
//!
//! # fn example(private_pem: &[u8], public_pem: &[u8]) -> Result<(), Box<dyn std::error::Error>> {
//! let config = TokenConfig::default();
//! let source = NamespacedName::new("golden", "base-image");
//! let target = NamespacedName::new("tenant-a", "vm-disk");
//!
//! let generator = TokenGenerator::from_ed_pem(&config, private_pem)?;
//! let token = generator.generate(&Payload::clone_request(&source, &target))?;
//!
//! let validator = JwtTokenValidator::from_ed_pem(&config, public_pem)?;
//! authorize(&validator, Some(&token), &source, &target)?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod authorize;
pub mod error;
pub mod jwt;
pub mod payload;

pub use authorize::authorize;
pub use error::{Result, TokenError};
pub use jwt::{JwtTokenValidator, TokenGenerator, TokenValidator};
pub use payload::{GroupVersionResource, Operation, Payload};

#[cfg(any(test, feature = "test-utils"))]
pub use jwt::MockTokenValidator;

/// Issuer used for clone tokens.
pub const CLONE_TOKEN_ISSUER: &str = "volclone:clone";

/// Configuration shared by token generation and validation.
#[derive(Debug, Clone)]
pub struct TokenConfig {
    /// Expected `iss` claim.
    pub issuer: String,
    /// How long a generated token stays valid, in seconds.
    pub validity_seconds: i64,
}

impl TokenConfig {
    /// Token validity as a duration.
    #[must_use]
    pub fn validity(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.validity_seconds)
    }
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            issuer: CLONE_TOKEN_ISSUER.to_string(),
            validity_seconds: 300,
        }
    }
}
