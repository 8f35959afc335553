//! Record of packages installed from the build cache

use async_trait::async_trait;
use bindist_errors::{CacheError, Error};
use bindist_types::PackageId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

/// One installed package
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstalledRecord {
    pub id: PackageId,
    pub prefix: PathBuf,
    /// Prefix the archive was built at
    pub original_prefix: PathBuf,
    pub installed_at: DateTime<Utc>,
    /// Files that could not be relocated
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unrelocated: Vec<PathBuf>,
}

/// Package database the build cache reports installs to
#[async_trait]
pub trait InstallRegistry: Send + Sync {
    async fn lookup(&self, id: &PackageId) -> Result<Option<InstalledRecord>, Error>;

    /// Add a record, replacing any previous record for the same package
    async fn register(&self, record: InstalledRecord) -> Result<(), Error>;

    /// Remove a record; returns whether one existed
    async fn unregister(&self, id: &PackageId) -> Result<bool, Error>;

    async fn installed(&self) -> Result<Vec<InstalledRecord>, Error>;
}

fn registry_error(path: &Path, message: impl std::fmt::Display) -> Error {
    CacheError::Registry {
        message: format!("{}: {message}", path.display()),
    }
    .into()
}

/// Registry persisted as a JSON array
///
/// Every change rewrites the whole file through a rename, so a crash
/// leaves either the old or the new contents.
#[derive(Debug)]
pub struct JsonRegistry {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonRegistry {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> Result<Vec<InstalledRecord>, Error> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(content) if content.trim().is_empty() => Ok(Vec::new()),
            Ok(content) => serde_json::from_str(&content).map_err(|e| registry_error(&self.path, e)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(registry_error(&self.path, e)),
        }
    }

    async fn store(&self, mut records: Vec<InstalledRecord>) -> Result<(), Error> {
        records.sort_by(|a, b| a.id.cmp(&b.id));
        let content = serde_json::to_string_pretty(&records)?;

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| registry_error(parent, e))?;
        }
        let temp = self.path.with_extension("json.tmp");
        tokio::fs::write(&temp, content)
            .await
            .map_err(|e| registry_error(&temp, e))?;
        tokio::fs::rename(&temp, &self.path)
            .await
            .map_err(|e| registry_error(&self.path, e))
    }
}

#[async_trait]
impl InstallRegistry for JsonRegistry {
    async fn lookup(&self, id: &PackageId) -> Result<Option<InstalledRecord>, Error> {
        let _guard = self.lock.lock().await;
        Ok(self.load().await?.into_iter().find(|r| r.id == *id))
    }

    async fn register(&self, record: InstalledRecord) -> Result<(), Error> {
        let _guard = self.lock.lock().await;
        let mut records = self.load().await?;
        records.retain(|r| r.id != record.id);
        records.push(record);
        self.store(records).await
    }

    async fn unregister(&self, id: &PackageId) -> Result<bool, Error> {
        let _guard = self.lock.lock().await;
        let mut records = self.load().await?;
        let before = records.len();
        records.retain(|r| r.id != *id);
        if records.len() == before {
            return Ok(false);
        }
        self.store(records).await?;
        Ok(true)
    }

    async fn installed(&self) -> Result<Vec<InstalledRecord>, Error> {
        let _guard = self.lock.lock().await;
        self.load().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(name: &str) -> InstalledRecord {
        InstalledRecord {
            id: PackageId::new(name, "1.0", "abcdef0123"),
            prefix: PathBuf::from(format!("/opt/new/{name}")),
            original_prefix: PathBuf::from(format!("/opt/old/{name}")),
            installed_at: Utc::now(),
            unrelocated: Vec::new(),
        }
    }

    #[tokio::test]
    async fn register_lookup_unregister() {
        let dir = tempfile::tempdir().unwrap();
        let registry = JsonRegistry::new(dir.path().join("db/installed.json"));
        let zlib = record("zlib");

        assert!(registry.lookup(&zlib.id).await.unwrap().is_none());
        registry.register(zlib.clone()).await.unwrap();
        registry.register(record("bzip2")).await.unwrap();
        assert_eq!(registry.lookup(&zlib.id).await.unwrap(), Some(zlib.clone()));

        let names: Vec<_> = registry
            .installed()
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.id.name)
            .collect();
        assert_eq!(names, vec!["bzip2", "zlib"]);

        assert!(registry.unregister(&zlib.id).await.unwrap());
        assert!(!registry.unregister(&zlib.id).await.unwrap());
        assert!(registry.lookup(&zlib.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn register_replaces_existing_record() {
        let dir = tempfile::tempdir().unwrap();
        let registry = JsonRegistry::new(dir.path().join("installed.json"));
        let mut zlib = record("zlib");
        registry.register(zlib.clone()).await.unwrap();
        zlib.unrelocated = vec![PathBuf::from("lib/libz.so")];
        registry.register(zlib.clone()).await.unwrap();

        assert_eq!(registry.installed().await.unwrap(), vec![zlib]);
    }

    #[tokio::test]
    async fn corrupt_file_is_a_registry_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("installed.json");
        std::fs::write(&path, b"{not json").unwrap();
        let err = JsonRegistry::new(&path).installed().await.unwrap_err();
        assert!(matches!(err, Error::Cache(CacheError::Registry { .. })));
    }
}
