//! Mirrors hosting build cache entries and public keys

use async_trait::async_trait;
use bindist_errors::{CacheError, Error};
use bindist_signing::{install_key, load_trusted_keys, PublicKeyRef};
use bindist_types::{BuildManifest, PackageId};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;

/// Extension of published archives
pub const ARCHIVE_EXTENSION: &str = "tar.zst";

/// Extension of detached signatures, appended to the archive name
pub const SIGNATURE_EXTENSION: &str = "minisig";

const ENTRY_EXTENSION: &str = "toml";
const BUILD_CACHE_DIR: &str = "build_cache";
const KEYS_DIR: &str = "keys";

/// Sidecar published next to every archive (`<key>.toml`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Hex BLAKE3 digest of the archive
    pub blake3: String,
    pub id: PackageId,
    pub manifest: BuildManifest,
}

impl CacheEntry {
    #[must_use]
    pub fn new(id: PackageId, blake3: impl Into<String>, manifest: BuildManifest) -> Self {
        Self {
            blake3: blake3.into(),
            id,
            manifest,
        }
    }

    /// Serialize to TOML string
    ///
    /// # Errors
    ///
    /// Returns an error if the entry cannot be serialized.
    pub fn to_toml(&self) -> Result<String, Error> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Parse a sidecar, validating the package id and embedded manifest
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is malformed, the id cannot name a
    /// store directory or the manifest is invalid.
    pub fn from_toml(content: &str) -> Result<Self, Error> {
        let entry: Self = toml::from_str(content)?;
        entry.id.validate()?;
        entry.manifest.validate()?;
        Ok(entry)
    }
}

/// An entry copied out of a mirror
#[derive(Debug, Clone)]
pub struct FetchedArtifact {
    pub entry: CacheEntry,
    /// Local copy of the archive
    pub archive: PathBuf,
    /// Detached signature, if one was published
    pub signature: Option<String>,
}

/// A place build cache entries are published to and fetched from
#[async_trait]
pub trait Mirror: Send + Sync {
    /// Name used in config and output
    fn name(&self) -> &str;

    /// Stable description of where the mirror lives
    fn location(&self) -> String;

    async fn contains(&self, key: &str) -> Result<bool, Error>;

    /// Publish an archive with its sidecar and optional signature
    ///
    /// Fails with `AlreadyPublished` if the key exists and `force` is off.
    async fn publish(
        &self,
        entry: &CacheEntry,
        archive: &Path,
        signature: Option<&str>,
        force: bool,
    ) -> Result<(), Error>;

    /// Copy the entry for `key` into the directory `dest`
    async fn fetch(&self, key: &str, dest: &Path) -> Result<FetchedArtifact, Error>;

    /// Packages on the mirror, optionally only those matching `filter`
    async fn list(&self, filter: Option<&str>) -> Result<Vec<PackageId>, Error>;

    /// Public keys published on the mirror
    async fn list_keys(&self) -> Result<Vec<PublicKeyRef>, Error>;
}

/// Mirror backed by a local directory
///
/// ```text
/// <root>/build_cache/<key>.tar.zst
/// <root>/build_cache/<key>.tar.zst.minisig
/// <root>/build_cache/<key>.toml
/// <root>/keys/<id>.pub
/// ```
#[derive(Debug, Clone)]
pub struct LocalMirror {
    name: String,
    root: PathBuf,
}

impl LocalMirror {
    pub fn new(name: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            root: root.into(),
        }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn cache_dir(&self) -> PathBuf {
        self.root.join(BUILD_CACHE_DIR)
    }

    #[must_use]
    pub fn archive_path(&self, key: &str) -> PathBuf {
        self.cache_dir().join(format!("{key}.{ARCHIVE_EXTENSION}"))
    }

    #[must_use]
    pub fn signature_path(&self, key: &str) -> PathBuf {
        self.cache_dir()
            .join(format!("{key}.{ARCHIVE_EXTENSION}.{SIGNATURE_EXTENSION}"))
    }

    #[must_use]
    pub fn entry_path(&self, key: &str) -> PathBuf {
        self.cache_dir().join(format!("{key}.{ENTRY_EXTENSION}"))
    }

    /// Publish a public key into `keys/`
    ///
    /// Returns the written path, or `None` if the key exists and `force`
    /// is off.
    ///
    /// # Errors
    ///
    /// Returns an error if the key file cannot be written.
    pub async fn publish_key(&self, key: &PublicKeyRef, force: bool) -> Result<Option<PathBuf>, Error> {
        install_key(&self.root.join(KEYS_DIR), key, force).await
    }

    async fn read_entry(&self, key: &str) -> Result<CacheEntry, Error> {
        let path = self.entry_path(key);
        let content = match fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(CacheError::NotFound {
                    query: key.to_string(),
                }
                .into());
            }
            Err(e) => return Err(Error::io_with_path(&e, path)),
        };
        let invalid = |message: String| -> Error {
            CacheError::InvalidEntry {
                key: key.to_string(),
                message,
            }
            .into()
        };
        let entry = CacheEntry::from_toml(&content).map_err(|e| invalid(e.to_string()))?;
        // Sidecars are unsigned; the file name is the only key we asked for
        if entry.id.key() != key {
            return Err(invalid(format!("sidecar describes {}", entry.id.key())));
        }
        Ok(entry)
    }
}

async fn exists(path: &Path) -> Result<bool, Error> {
    fs::try_exists(path)
        .await
        .map_err(|e| Error::io_with_path(&e, path))
}

/// Copy `from` to a sibling temporary of `to`, then rename into place
async fn copy_into_place(from: &Path, to: &Path) -> Result<(), Error> {
    let temp = to.with_extension(format!("tmp-{}", uuid::Uuid::new_v4()));
    let result = async {
        fs::copy(from, &temp).await?;
        fs::rename(&temp, to).await
    }
    .await;
    if let Err(e) = result {
        let _ = fs::remove_file(&temp).await;
        return Err(Error::io_with_path(&e, to));
    }
    Ok(())
}

async fn write_into_place(to: &Path, content: &str) -> Result<(), Error> {
    let temp = to.with_extension(format!("tmp-{}", uuid::Uuid::new_v4()));
    let result = async {
        fs::write(&temp, content).await?;
        fs::rename(&temp, to).await
    }
    .await;
    if let Err(e) = result {
        let _ = fs::remove_file(&temp).await;
        return Err(Error::io_with_path(&e, to));
    }
    Ok(())
}

#[async_trait]
impl Mirror for LocalMirror {
    fn name(&self) -> &str {
        &self.name
    }

    fn location(&self) -> String {
        self.root.display().to_string()
    }

    async fn contains(&self, key: &str) -> Result<bool, Error> {
        exists(&self.entry_path(key)).await
    }

    async fn publish(
        &self,
        entry: &CacheEntry,
        archive: &Path,
        signature: Option<&str>,
        force: bool,
    ) -> Result<(), Error> {
        let key = entry.id.key();
        if !force && self.contains(&key).await? {
            return Err(CacheError::AlreadyPublished {
                key,
                mirror: self.name.clone(),
            }
            .into());
        }

        let dir = self.cache_dir();
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| Error::io_with_path(&e, &dir))?;

        // The sidecar goes last; an entry without it is not listed
        copy_into_place(archive, &self.archive_path(&key)).await?;
        let signature_path = self.signature_path(&key);
        match signature {
            Some(signature) => write_into_place(&signature_path, signature).await?,
            None => match fs::remove_file(&signature_path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(Error::io_with_path(&e, signature_path)),
            },
        }
        write_into_place(&self.entry_path(&key), &entry.to_toml()?).await
    }

    async fn fetch(&self, key: &str, dest: &Path) -> Result<FetchedArtifact, Error> {
        let entry = self.read_entry(key).await?;
        let source = self.archive_path(key);
        if !exists(&source).await? {
            return Err(CacheError::InvalidEntry {
                key: key.to_string(),
                message: "archive is missing".to_string(),
            }
            .into());
        }

        fs::create_dir_all(dest)
            .await
            .map_err(|e| Error::io_with_path(&e, dest))?;
        let archive = dest.join(format!("{key}.{ARCHIVE_EXTENSION}"));
        fs::copy(&source, &archive)
            .await
            .map_err(|e| Error::io_with_path(&e, &source))?;

        let signature = match fs::read_to_string(self.signature_path(key)).await {
            Ok(signature) => Some(signature),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => return Err(Error::io_with_path(&e, self.signature_path(key))),
        };

        Ok(FetchedArtifact {
            entry,
            archive,
            signature,
        })
    }

    async fn list(&self, filter: Option<&str>) -> Result<Vec<PackageId>, Error> {
        let dir = self.cache_dir();
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(Error::io_with_path(&e, dir)),
        };

        let mut ids = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| Error::io_with_path(&e, &dir))?
        {
            let name = entry.file_name().to_string_lossy().into_owned();
            let Some(key) = name.strip_suffix(&format!(".{ENTRY_EXTENSION}")) else {
                continue;
            };
            let id = self.read_entry(key).await?.id;
            if filter.is_none_or(|f| id.matches(f)) {
                ids.push(id);
            }
        }
        ids.sort();
        Ok(ids)
    }

    async fn list_keys(&self) -> Result<Vec<PublicKeyRef>, Error> {
        load_trusted_keys(&self.root.join(KEYS_DIR)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_KEY: &str = "RWQf6LRCGA9i53mlYecO4IzT51TGPpvWucNSCh1CBM0QTaLn73Y7GFO3";

    fn entry(name: &str, hash: &str) -> CacheEntry {
        let mut manifest = BuildManifest::new("/opt/sw/pkg", "/opt/sw").unwrap();
        manifest.add_textfile("bin/tool").unwrap();
        CacheEntry::new(PackageId::new(name, "1.0", hash), "00ff", manifest)
    }

    #[test]
    fn sidecar_round_trip() {
        let entry = entry("zlib", "abcdef0123");
        let parsed = CacheEntry::from_toml(&entry.to_toml().unwrap()).unwrap();
        assert_eq!(parsed, entry);
    }

    #[tokio::test]
    async fn publish_fetch_and_list() {
        let dir = tempfile::tempdir().unwrap();
        let mirror = LocalMirror::new("local", dir.path().join("mirror"));
        let archive = dir.path().join("input.tar.zst");
        std::fs::write(&archive, b"archive bytes").unwrap();

        let zlib = entry("zlib", "abcdef0123");
        mirror.publish(&zlib, &archive, Some("sig"), false).await.unwrap();
        mirror
            .publish(&entry("bzip2", "1234567890"), &archive, None, false)
            .await
            .unwrap();

        let names: Vec<_> = mirror.list(None).await.unwrap().into_iter().map(|id| id.name).collect();
        assert_eq!(names, vec!["bzip2", "zlib"]);
        assert_eq!(mirror.list(Some("/abc")).await.unwrap(), vec![zlib.id.clone()]);

        let fetched = mirror.fetch(&zlib.id.key(), &dir.path().join("dl")).await.unwrap();
        assert_eq!(fetched.entry, zlib);
        assert_eq!(fetched.signature.as_deref(), Some("sig"));
        assert_eq!(std::fs::read(&fetched.archive).unwrap(), b"archive bytes");
    }

    #[tokio::test]
    async fn republish_requires_force() {
        let dir = tempfile::tempdir().unwrap();
        let mirror = LocalMirror::new("local", dir.path());
        let archive = dir.path().join("input.tar.zst");
        std::fs::write(&archive, b"v1").unwrap();
        let zlib = entry("zlib", "abcdef0123");

        mirror.publish(&zlib, &archive, Some("sig"), false).await.unwrap();
        let err = mirror.publish(&zlib, &archive, None, false).await.unwrap_err();
        assert!(matches!(err, Error::Cache(CacheError::AlreadyPublished { .. })));

        std::fs::write(&archive, b"v2").unwrap();
        mirror.publish(&zlib, &archive, None, true).await.unwrap();
        assert_eq!(std::fs::read(mirror.archive_path(&zlib.id.key())).unwrap(), b"v2");
        assert!(!mirror.signature_path(&zlib.id.key()).exists());
    }

    #[tokio::test]
    async fn missing_key_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let mirror = LocalMirror::new("local", dir.path());
        let err = mirror.fetch("nope-1.0-abc", dir.path()).await.unwrap_err();
        assert!(matches!(err, Error::Cache(CacheError::NotFound { .. })));
        assert!(mirror.list(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn sidecar_must_describe_its_own_key() {
        let dir = tempfile::tempdir().unwrap();
        let mirror = LocalMirror::new("local", dir.path());
        std::fs::create_dir_all(mirror.cache_dir()).unwrap();

        let renamed = entry("zlib", "abcdef0123").to_toml().unwrap();
        std::fs::write(mirror.entry_path("other-1.0-abc"), renamed).unwrap();
        let err = mirror.fetch("other-1.0-abc", &dir.path().join("dl")).await.unwrap_err();
        assert!(matches!(err, Error::Cache(CacheError::InvalidEntry { .. })));

        let escaping = entry("zlib", "abc").to_toml().unwrap().replace("\"abc\"", "\"x/../../victim\"");
        std::fs::remove_file(mirror.entry_path("other-1.0-abc")).unwrap();
        std::fs::write(mirror.entry_path("zlib-1.0-x"), escaping).unwrap();
        let err = mirror.list(None).await.unwrap_err();
        assert!(matches!(err, Error::Cache(CacheError::InvalidEntry { .. })));
        assert!(CacheEntry::from_toml(&entry("zlib", "x/../../victim").to_toml().unwrap()).is_err());
    }

    #[tokio::test]
    async fn keys_are_listed() {
        let dir = tempfile::tempdir().unwrap();
        let mirror = LocalMirror::new("local", dir.path());
        assert!(mirror.list_keys().await.unwrap().is_empty());

        let key = PublicKeyRef::new("builder", SAMPLE_KEY).unwrap();
        assert!(mirror.publish_key(&key, false).await.unwrap().is_some());
        assert!(mirror.publish_key(&key, false).await.unwrap().is_none());
        assert_eq!(mirror.list_keys().await.unwrap(), vec![key]);
    }
}
