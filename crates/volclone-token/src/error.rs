//! Token error types.

use thiserror::Error;

/// A result type using `TokenError`.
pub type Result<T> = std::result::Result<T, TokenError>;

/// Errors that can occur while issuing or checking clone tokens.
#[derive(Debug, Error)]
pub enum TokenError {
    /// The token has expired or is not yet valid.
    #[error("token expired")]
    TokenExpired,

    /// The token signature does not verify.
    #[error("invalid signature")]
    InvalidSignature,

    /// The token issuer does not match the expected value.
    #[error("invalid issuer")]
    InvalidIssuer,

    /// The token format or claims are invalid.
    #[error("invalid token: {0}")]
    InvalidToken(String),

    /// A signing or verification key could not be loaded.
    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// The token could not be encoded.
    #[error("token encoding failed: {0}")]
    Encode(String),

    /// The token does not authorize the requested clone.
    ///
    /// Deliberately carries no detail about which check failed.
    #[error("clone authorization failed")]
    AuthorizationFailed,
}

impl TokenError {
    /// Returns `true` if the token itself is unusable (bad, expired, forged).
    #[must_use]
    pub const fn is_invalid_token(&self) -> bool {
        matches!(
            self,
            Self::TokenExpired | Self::InvalidSignature | Self::InvalidIssuer | Self::InvalidToken(_)
        )
    }
}

impl From<jsonwebtoken::errors::Error> for TokenError {
    fn from(e: jsonwebtoken::errors::Error) -> Self {
        use jsonwebtoken::errors::ErrorKind;

        match e.kind() {
            ErrorKind::ExpiredSignature | ErrorKind::ImmatureSignature => Self::TokenExpired,
            ErrorKind::InvalidSignature => Self::InvalidSignature,
            ErrorKind::InvalidIssuer => Self::InvalidIssuer,
            ErrorKind::InvalidKeyFormat
            | ErrorKind::InvalidRsaKey(_)
            | ErrorKind::InvalidEcdsaKey => Self::InvalidKey(e.to_string()),
            _ => Self::InvalidToken(e.to_string()),
        }
    }
}
