//! Trusted public keys and the on-disk keyring

use bindist_errors::{Error, SigningError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;

/// Extension of public key files in a keyring or a mirror's `keys/`
pub const KEY_FILE_EXTENSION: &str = "pub";

const COMMENT_PREFIX: &str = "untrusted comment:";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Algorithm {
    Minisign,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicKeyRef {
    pub id: String,
    pub algo: Algorithm,
    /// Base64 key material
    pub data: String,
}

impl PublicKeyRef {
    /// Wrap base64 key material, checking that it decodes
    ///
    /// # Errors
    ///
    /// Returns `InvalidPublicKey` if `data` is not a minisign public key.
    pub fn new(id: impl Into<String>, data: impl Into<String>) -> Result<Self, Error> {
        let data = data.into().trim().to_string();
        minisign_verify::PublicKey::from_base64(&data)
            .map_err(|e| SigningError::InvalidPublicKey(e.to_string()))?;
        Ok(Self {
            id: id.into(),
            algo: Algorithm::Minisign,
            data,
        })
    }

    /// Parse a minisign `.pub` file; the comment line is optional
    ///
    /// # Errors
    ///
    /// Returns `InvalidPublicKey` if the file holds no valid key.
    pub fn from_key_file(id: impl Into<String>, content: &str) -> Result<Self, Error> {
        let line = content
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty() && !line.starts_with(COMMENT_PREFIX))
            .ok_or_else(|| SigningError::InvalidPublicKey("empty key file".to_string()))?;
        Self::new(id, line)
    }

    /// Render as a minisign `.pub` file
    #[must_use]
    pub fn to_key_file(&self) -> String {
        format!("{COMMENT_PREFIX} bindist public key {}\n{}\n", self.id, self.data)
    }

    /// File name used when the key is stored in a directory
    #[must_use]
    pub fn file_name(&self) -> String {
        format!("{}.{KEY_FILE_EXTENSION}", self.id)
    }
}

/// Read every `*.pub` file in `dir`, sorted by file name
///
/// A missing directory is an empty keyring.
///
/// # Errors
///
/// Returns an error if the directory cannot be read or a key file is
/// malformed.
pub async fn load_trusted_keys(dir: &Path) -> Result<Vec<PublicKeyRef>, Error> {
    let mut entries = match fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(Error::io_with_path(&e, dir)),
    };

    let mut paths = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| Error::io_with_path(&e, dir))?
    {
        let path = entry.path();
        if path.extension().and_then(|ext| ext.to_str()) == Some(KEY_FILE_EXTENSION) {
            paths.push(path);
        }
    }
    paths.sort();

    let mut keys = Vec::with_capacity(paths.len());
    for path in paths {
        let content = fs::read_to_string(&path)
            .await
            .map_err(|e| Error::io_with_path(&e, &path))?;
        let id = path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_default();
        keys.push(PublicKeyRef::from_key_file(id, &content)?);
    }
    Ok(keys)
}

/// Write `key` into the keyring at `dir`
///
/// Returns the written path, or `None` when a key file of that name
/// already exists and `force` is false.
///
/// # Errors
///
/// Returns an error if the directory or file cannot be written.
pub async fn install_key(dir: &Path, key: &PublicKeyRef, force: bool) -> Result<Option<PathBuf>, Error> {
    fs::create_dir_all(dir)
        .await
        .map_err(|e| Error::io_with_path(&e, dir))?;
    let path = dir.join(key.file_name());
    if !force && fs::try_exists(&path).await.unwrap_or(false) {
        return Ok(None);
    }
    fs::write(&path, key.to_key_file())
        .await
        .map_err(|e| Error::io_with_path(&e, &path))?;
    Ok(Some(path))
}

#[cfg(test)]
mod tests {
    use super::*;

    // Public key from the minisign documentation
    const SAMPLE_KEY: &str = "RWQf6LRCGA9i53mlYecO4IzT51TGPpvWucNSCh1CBM0QTaLn73Y7GFO3";

    #[test]
    fn key_file_roundtrip() {
        let key = PublicKeyRef::new("release", SAMPLE_KEY).unwrap();
        let file = key.to_key_file();
        assert!(file.starts_with(COMMENT_PREFIX));
        assert_eq!(PublicKeyRef::from_key_file("release", &file).unwrap(), key);
        assert_eq!(key.file_name(), "release.pub");
    }

    #[test]
    fn bare_key_line_is_accepted() {
        let key = PublicKeyRef::from_key_file("bare", &format!("\n{SAMPLE_KEY}\n")).unwrap();
        assert_eq!(key.data, SAMPLE_KEY);
    }

    #[test]
    fn rejects_garbage() {
        assert!(PublicKeyRef::new("bad", "not a key").is_err());
        assert!(PublicKeyRef::from_key_file("empty", "untrusted comment: nothing\n").is_err());
    }
}
