#![deny(clippy::pedantic, unsafe_code)]
#![allow(clippy::module_name_repetitions)]

//! Detached minisign signatures for build cache archives
//!
//! Signing needs a secret key; verification walks the trusted keyring and
//! succeeds on the first key that accepts the signature.

mod backend;
mod keys;

pub use backend::{MinisignSigner, SigningBackend};
pub use keys::{install_key, load_trusted_keys, Algorithm, PublicKeyRef, KEY_FILE_EXTENSION};

use bindist_errors::{Error, SigningError};
use minisign_verify::{PublicKey, Signature};
use std::path::Path;

/// Verify content at `content_path` against a minisign signature string using any of the provided trusted keys.
/// Returns the key id that successfully verified.
///
/// # Errors
/// Returns an error if the content cannot be read, the signature cannot be parsed,
/// or if verification fails for all provided keys.
pub async fn verify_minisign_file_with_keys(
    content_path: &Path,
    signature_str: &str,
    trusted_keys: &[PublicKeyRef],
) -> Result<String, Error> {
    let content = tokio::fs::read(content_path)
        .await
        .map_err(|e| Error::io_with_path(&e, content_path))?;
    verify_minisign_bytes_with_keys(&content, signature_str, trusted_keys)
}

/// Verify raw bytes against a minisign signature string using any of the provided trusted keys.
/// Returns the key id that successfully verified.
///
/// # Errors
/// Returns an error if the signature cannot be parsed or if no trusted key verifies the content.
pub fn verify_minisign_bytes_with_keys(
    content: &[u8],
    signature_str: &str,
    trusted_keys: &[PublicKeyRef],
) -> Result<String, Error> {
    if trusted_keys.is_empty() {
        return Err(SigningError::NoTrustedKeys.into());
    }

    // Parse signature (full minisign string including comment line)
    let sig = Signature::decode(signature_str)
        .map_err(|e| SigningError::InvalidSignatureFormat(e.to_string()))?;

    let mut last_err = None;
    for key in trusted_keys {
        if key.algo != Algorithm::Minisign {
            continue;
        }
        match PublicKey::from_base64(&key.data) {
            Ok(pk) => match pk.verify(content, &sig, false) {
                Ok(()) => return Ok(key.id.clone()),
                Err(e) => {
                    last_err = Some(format!("{e}"));
                }
            },
            Err(e) => {
                last_err = Some(format!("invalid trusted key format for {}: {e}", key.id));
            }
        }
    }

    Err(SigningError::SignatureInvalid {
        reason: format!(
            "no match among {} trusted keys; last error: {}",
            trusted_keys.len(),
            last_err.unwrap_or_else(|| "unknown".to_string())
        ),
    }
    .into())
}
