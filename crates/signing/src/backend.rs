//! The signing seam and its minisign implementation

use async_trait::async_trait;
use bindist_errors::{Error, SigningError};
use minisign::{KeyPair, PublicKey, SecretKey, SecretKeyBox};
use std::io::Cursor;
use std::path::Path;
use tokio::fs;

use crate::keys::PublicKeyRef;

/// Produces and checks detached signatures over archive files
#[async_trait]
pub trait SigningBackend: Send + Sync {
    /// Sign the file at `archive`, returning the full signature text
    async fn sign(&self, archive: &Path) -> Result<String, Error>;

    /// Check `signature` against the file at `archive`
    ///
    /// `Ok(false)` means no trusted key accepted the signature. A malformed
    /// signature or an empty keyring is an error.
    async fn verify(&self, archive: &Path, signature: &str) -> Result<bool, Error>;
}

const DEFAULT_TRUSTED_COMMENT: &str = "bindist build cache entry";

/// Minisign signer and verifier
pub struct MinisignSigner {
    secret: Option<SecretKey>,
    trusted: Vec<PublicKeyRef>,
    trusted_comment: String,
}

impl std::fmt::Debug for MinisignSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MinisignSigner")
            .field("has_secret_key", &self.secret.is_some())
            .field("trusted", &self.trusted.len())
            .field("trusted_comment", &self.trusted_comment)
            .finish()
    }
}

impl MinisignSigner {
    /// Verify-only signer over a set of trusted keys
    #[must_use]
    pub fn new(trusted: Vec<PublicKeyRef>) -> Self {
        Self {
            secret: None,
            trusted,
            trusted_comment: DEFAULT_TRUSTED_COMMENT.to_string(),
        }
    }

    #[must_use]
    pub fn with_secret_key(mut self, secret: SecretKey) -> Self {
        self.secret = Some(secret);
        self
    }

    #[must_use]
    pub fn with_trusted_comment(mut self, comment: impl Into<String>) -> Self {
        self.trusted_comment = comment.into();
        self
    }

    #[must_use]
    pub fn trusted_keys(&self) -> &[PublicKeyRef] {
        &self.trusted
    }

    /// Read a minisign secret key file, decrypting it with `password`
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or decrypted.
    pub async fn load_secret_key(path: &Path, password: Option<String>) -> Result<SecretKey, Error> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| Error::io_with_path(&e, path))?;
        let sk_box = SecretKeyBox::from_string(&content)
            .map_err(|e| SigningError::InvalidSecretKey(e.to_string()))?;
        let secret = sk_box
            .into_secret_key(password)
            .map_err(|e| SigningError::InvalidSecretKey(e.to_string()))?;
        Ok(secret)
    }

    /// Generate an unencrypted key pair
    ///
    /// # Errors
    ///
    /// Returns an error if key pair generation fails.
    pub fn generate_keypair() -> Result<(SecretKey, PublicKey), Error> {
        let KeyPair { pk, sk } =
            KeyPair::generate_unencrypted_keypair().map_err(|e| SigningError::SigningFailed {
                message: format!("failed to generate key pair: {e}"),
            })?;
        Ok((sk, pk))
    }

    /// Save a secret key to file without a password
    ///
    /// # Errors
    ///
    /// Returns an error if key serialization or file writing fails.
    pub async fn save_secret_key(secret_key: &SecretKey, path: &Path) -> Result<(), Error> {
        let sk_box = secret_key
            .to_box(None)
            .map_err(|e| SigningError::InvalidSecretKey(e.to_string()))?;
        fs::write(path, sk_box.to_string())
            .await
            .map_err(|e| Error::io_with_path(&e, path))?;
        Ok(())
    }

    /// Describe a minisign public key for a keyring
    #[must_use]
    pub fn public_key_ref(id: impl Into<String>, public_key: &PublicKey) -> PublicKeyRef {
        PublicKeyRef {
            id: id.into(),
            algo: crate::keys::Algorithm::Minisign,
            data: public_key.to_base64(),
        }
    }
}

#[async_trait]
impl SigningBackend for MinisignSigner {
    async fn sign(&self, archive: &Path) -> Result<String, Error> {
        let secret = self.secret.as_ref().ok_or(SigningError::NoSigningKey)?;
        let data = fs::read(archive)
            .await
            .map_err(|e| Error::io_with_path(&e, archive))?;
        let untrusted_comment = format!(
            "signature from bindist for {}",
            archive
                .file_name()
                .unwrap_or_default()
                .to_string_lossy()
        );

        let signature = minisign::sign(
            None,
            secret,
            Cursor::new(&data),
            Some(self.trusted_comment.as_str()),
            Some(untrusted_comment.as_str()),
        )
        .map_err(|e| SigningError::SigningFailed {
            message: e.to_string(),
        })?;
        Ok(signature.into_string())
    }

    async fn verify(&self, archive: &Path, signature: &str) -> Result<bool, Error> {
        match crate::verify_minisign_file_with_keys(archive, signature, &self.trusted).await {
            Ok(_) => Ok(true),
            Err(Error::Signing(SigningError::SignatureInvalid { .. })) => Ok(false),
            Err(e) => Err(e),
        }
    }
}
