//! Signing error types

use std::borrow::Cow;

use crate::UserFacingError;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum SigningError {
    #[error("no signature published for {key}")]
    SignatureMissing { key: String },

    #[error("signature verification failed: {reason}")]
    SignatureInvalid { reason: String },

    #[error("no trusted key found for signature with key id: {key_id}")]
    NoTrustedKeyFound { key_id: String },

    #[error("no trusted keys available")]
    NoTrustedKeys,

    #[error("no signing key configured")]
    NoSigningKey,

    #[error("invalid signature format: {0}")]
    InvalidSignatureFormat(String),

    #[error("invalid public key format: {0}")]
    InvalidPublicKey(String),

    #[error("invalid secret key: {0}")]
    InvalidSecretKey(String),

    #[error("signing failed: {message}")]
    SigningFailed { message: String },
}

impl UserFacingError for SigningError {
    fn user_message(&self) -> Cow<'_, str> {
        Cow::Owned(self.to_string())
    }

    fn user_hint(&self) -> Option<&'static str> {
        match self {
            Self::SignatureMissing { .. } | Self::NoTrustedKeys => {
                Some("Run `bindist keys --install` or pass --unsigned to skip verification.")
            }
            Self::NoTrustedKeyFound { .. } => Some("Install the signer's public key first."),
            Self::NoSigningKey => {
                Some("Set signing.secret_key in the config or pass --unsigned.")
            }
            _ => None,
        }
    }

    fn user_code(&self) -> Option<&'static str> {
        Some(match self {
            Self::SignatureMissing { .. } => "signing.signature_missing",
            Self::SignatureInvalid { .. } => "signing.signature_invalid",
            Self::NoTrustedKeyFound { .. } => "signing.untrusted_key",
            Self::NoTrustedKeys => "signing.no_trusted_keys",
            Self::NoSigningKey => "signing.no_signing_key",
            Self::InvalidSignatureFormat(_) => "signing.invalid_signature_format",
            Self::InvalidPublicKey(_) => "signing.invalid_public_key",
            Self::InvalidSecretKey(_) => "signing.invalid_secret_key",
            Self::SigningFailed { .. } => "signing.failed",
        })
    }
}
