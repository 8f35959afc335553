//! Cache of the packages available on a set of mirrors

use bindist_errors::Error;
use bindist_types::PackageId;
use std::sync::Arc;

use crate::mirror::Mirror;

/// A package and the mirror that serves it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AvailableSpec {
    pub mirror: String,
    pub id: PackageId,
}

/// Listing of every mirror, reused until the mirror set changes or an
/// entry is published
#[derive(Debug, Default)]
pub struct SpecCache {
    fingerprint: Option<String>,
    specs: Vec<AvailableSpec>,
}

/// Digest of the names and locations of `mirrors`, in order
#[must_use]
pub fn fingerprint(mirrors: &[Arc<dyn Mirror>]) -> String {
    let mut hasher = blake3::Hasher::new();
    for mirror in mirrors {
        hasher.update(mirror.name().as_bytes());
        hasher.update(&[0]);
        hasher.update(mirror.location().as_bytes());
        hasher.update(&[b'\n']);
    }
    hasher.finalize().to_hex().to_string()
}

impl SpecCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn is_fresh(&self, mirrors: &[Arc<dyn Mirror>]) -> bool {
        self.fingerprint.as_deref() == Some(fingerprint(mirrors).as_str())
    }

    pub fn invalidate(&mut self) {
        self.fingerprint = None;
        self.specs.clear();
    }

    /// Every package on `mirrors`, listing them again only when stale
    ///
    /// Mirrors are listed in order; a package served by several mirrors
    /// appears once per mirror. Returns whether a refresh happened.
    ///
    /// # Errors
    ///
    /// Returns an error if a mirror cannot be listed.
    pub async fn refresh(&mut self, mirrors: &[Arc<dyn Mirror>]) -> Result<bool, Error> {
        let current = fingerprint(mirrors);
        if self.fingerprint.as_deref() == Some(current.as_str()) {
            return Ok(false);
        }

        let mut specs = Vec::new();
        for mirror in mirrors {
            specs.extend(mirror.list(None).await?.into_iter().map(|id| AvailableSpec {
                mirror: mirror.name().to_string(),
                id,
            }));
        }
        self.specs = specs;
        self.fingerprint = Some(current);
        Ok(true)
    }

    #[must_use]
    pub fn specs(&self) -> &[AvailableSpec] {
        &self.specs
    }

    /// Cached specs matching `query`
    #[must_use]
    pub fn matching(&self, query: &str) -> Vec<&AvailableSpec> {
        self.specs.iter().filter(|s| s.id.matches(query)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mirror::LocalMirror;

    fn mirrors(paths: &[&str]) -> Vec<Arc<dyn Mirror>> {
        paths
            .iter()
            .enumerate()
            .map(|(i, p)| Arc::new(LocalMirror::new(format!("m{i}"), *p)) as Arc<dyn Mirror>)
            .collect()
    }

    #[test]
    fn fingerprint_tracks_mirror_set() {
        let a = fingerprint(&mirrors(&["/srv/a"]));
        assert_eq!(a, fingerprint(&mirrors(&["/srv/a"])));
        assert_ne!(a, fingerprint(&mirrors(&["/srv/b"])));
        assert_ne!(a, fingerprint(&mirrors(&["/srv/a", "/srv/b"])));
    }

    #[tokio::test]
    async fn refresh_only_when_stale() {
        let dir = tempfile::tempdir().unwrap();
        let set = mirrors(&[dir.path().to_str().unwrap()]);
        let mut cache = SpecCache::new();

        assert!(!cache.is_fresh(&set));
        assert!(cache.refresh(&set).await.unwrap());
        assert!(cache.is_fresh(&set));
        assert!(!cache.refresh(&set).await.unwrap());

        cache.invalidate();
        assert!(!cache.is_fresh(&set));
        assert!(cache.specs().is_empty());
        assert!(cache.refresh(&set).await.unwrap());
    }
}
