//! Packaging and install state machines

use bindist_errors::{CacheError, Error, RelocationError, SigningError};
use bindist_events::{AppEvent, CacheEvent, CachePhase, EventEmitter, EventSender, FailureContext};
use bindist_platform::fs::remove_tree;
use bindist_relocate::{RelocationEngine, RelocationReport};
use bindist_signing::{install_key, PublicKeyRef, SigningBackend};
use bindist_types::{
    InstallTree, OverwriteMode, PackageId, SigningMode, VerifyMode, MANIFEST_PATH, METADATA_DIR,
};
use chrono::Utc;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::sync::{Mutex, MutexGuard};

use crate::archive::{create_archive, extract_archive, read_embedded_manifest};
use crate::checksum::hash_file;
use crate::mirror::{CacheEntry, Mirror, ARCHIVE_EXTENSION};
use crate::registry::{InstallRegistry, InstalledRecord};
use crate::spec_cache::{AvailableSpec, SpecCache};

/// Result of a successful install
#[derive(Debug, Clone)]
pub struct InstallOutcome {
    pub id: PackageId,
    pub mirror: String,
    pub prefix: PathBuf,
    pub report: RelocationReport,
}

/// Tracks how far an install got, for cleanup after a timeout
#[derive(Debug, Default)]
struct InstallProgress {
    /// Set before the target prefix or its registry record is touched
    replacing: OnceLock<(PackageId, PathBuf)>,
    registered: AtomicBool,
}

impl InstallProgress {
    /// Package and prefix left half replaced and unregistered
    fn abandoned(&self) -> Option<&(PackageId, PathBuf)> {
        if self.registered.load(Ordering::SeqCst) {
            None
        } else {
            self.replacing.get()
        }
    }
}

/// Packages trees onto mirrors and installs them under a store root
///
/// Packages install to `<store_root>/<key>`. Scratch space for staging,
/// downloads and archives lives under `work_dir`.
pub struct BuildCache {
    store_root: PathBuf,
    work_dir: PathBuf,
    keys_dir: PathBuf,
    mirrors: Vec<Arc<dyn Mirror>>,
    registry: Arc<dyn InstallRegistry>,
    engine: RelocationEngine,
    signer: Option<Arc<dyn SigningBackend>>,
    spec_cache: Mutex<SpecCache>,
    event_sender: Option<EventSender>,
}

impl std::fmt::Debug for BuildCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuildCache")
            .field("store_root", &self.store_root)
            .field("work_dir", &self.work_dir)
            .field("keys_dir", &self.keys_dir)
            .field(
                "mirrors",
                &self.mirrors.iter().map(|m| m.name().to_string()).collect::<Vec<_>>(),
            )
            .field("engine", &self.engine)
            .field("signer", &self.signer.is_some())
            .finish_non_exhaustive()
    }
}

impl EventEmitter for BuildCache {
    fn event_sender(&self) -> Option<&EventSender> {
        self.event_sender.as_ref()
    }
}

impl BuildCache {
    pub fn new(
        store_root: impl Into<PathBuf>,
        work_dir: impl Into<PathBuf>,
        registry: Arc<dyn InstallRegistry>,
        engine: RelocationEngine,
    ) -> Self {
        let work_dir = work_dir.into();
        Self {
            store_root: store_root.into(),
            keys_dir: work_dir.join("keys"),
            work_dir,
            mirrors: Vec::new(),
            registry,
            engine,
            signer: None,
            spec_cache: Mutex::new(SpecCache::new()),
            event_sender: None,
        }
    }

    /// Add a mirror; the first one added receives published entries
    #[must_use]
    pub fn with_mirror(mut self, mirror: Arc<dyn Mirror>) -> Self {
        self.mirrors.push(mirror);
        self
    }

    #[must_use]
    pub fn with_signer(mut self, signer: Arc<dyn SigningBackend>) -> Self {
        self.signer = Some(signer);
        self
    }

    /// Directory trusted keys are installed into by [`BuildCache::fetch_keys`]
    #[must_use]
    pub fn with_keys_dir(mut self, keys_dir: impl Into<PathBuf>) -> Self {
        self.keys_dir = keys_dir.into();
        self
    }

    #[must_use]
    pub fn with_event_sender(mut self, sender: EventSender) -> Self {
        self.engine = self.engine.with_event_sender(sender.clone());
        self.event_sender = Some(sender);
        self
    }

    #[must_use]
    pub fn store_root(&self) -> &Path {
        &self.store_root
    }

    /// Where `id` is installed
    #[must_use]
    pub fn prefix_for(&self, id: &PackageId) -> PathBuf {
        self.store_root.join(id.key())
    }

    /// Package `tree` and publish it to the primary mirror
    ///
    /// The tree is copied to a staging directory, where binaries are made
    /// loader-relative if `relative` is set and the manifest is embedded.
    /// The tree itself is never modified.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyPublished` if the key exists and `force` is off,
    /// `NoSigningKey` when signing without a configured key, and any
    /// analysis, archive or mirror error.
    pub async fn package(
        &self,
        tree: &InstallTree,
        signing: SigningMode,
        force: bool,
        relative: bool,
    ) -> Result<CacheEntry, Error> {
        let package = tree.id.to_string();
        let mut phase = CachePhase::Analyze;
        let result = self
            .package_inner(tree, signing, force, relative, &mut phase)
            .await;
        if let Err(e) = &result {
            self.emit_failure(&package, phase, e);
        }
        result
    }

    async fn package_inner(
        &self,
        tree: &InstallTree,
        signing: SigningMode,
        force: bool,
        relative: bool,
        phase: &mut CachePhase,
    ) -> Result<CacheEntry, Error> {
        tree.id.validate()?;
        let package = tree.id.to_string();
        let key = tree.id.key();
        let mirror = self.primary_mirror()?;
        if !force && mirror.contains(&key).await? {
            return Err(CacheError::AlreadyPublished {
                key,
                mirror: mirror.name().to_string(),
            }
            .into());
        }

        self.enter(&package, phase, CachePhase::Analyze);
        let mut manifest = self.engine.analyze(tree).await?;
        manifest.relative_rpaths = relative;

        self.enter(&package, phase, CachePhase::Archive);
        let scratch = self.scratch_dir("package")?;
        let staged = scratch.path().join(&key);
        copy_tree(&tree.prefix, &staged).await?;
        if relative {
            let report = self.engine.make_relative(&staged, &manifest).await?;
            if let Some(failure) = report.failures.into_iter().next() {
                return Err(failure.error);
            }
        }
        let metadata = staged.join(METADATA_DIR);
        tokio::fs::create_dir_all(&metadata)
            .await
            .map_err(|e| Error::io_with_path(&e, &metadata))?;
        let manifest_path = staged.join(MANIFEST_PATH);
        tokio::fs::write(&manifest_path, manifest.to_toml()?)
            .await
            .map_err(|e| Error::io_with_path(&e, &manifest_path))?;

        let archive = scratch.path().join(format!("{key}.{ARCHIVE_EXTENSION}"));
        create_archive(&staged, &archive).await?;
        let digest = hash_file(&archive).await?;

        let signature = match signing {
            SigningMode::Signed => {
                self.enter(&package, phase, CachePhase::Sign);
                let signer = self.signer.as_ref().ok_or(SigningError::NoSigningKey)?;
                Some(signer.sign(&archive).await?)
            }
            SigningMode::Unsigned => {
                self.emit(AppEvent::Cache(CacheEvent::SignatureSkipped {
                    package: package.clone(),
                    phase: CachePhase::Sign,
                }));
                None
            }
        };

        self.enter(&package, phase, CachePhase::Publish);
        let entry = CacheEntry::new(tree.id.clone(), digest, manifest);
        mirror
            .publish(&entry, &archive, signature.as_deref(), force)
            .await?;
        self.spec_cache.lock().await.invalidate();

        self.emit(AppEvent::Cache(CacheEvent::Published {
            package,
            mirror: mirror.name().to_string(),
            key,
            signed: signature.is_some(),
        }));
        Ok(entry)
    }

    /// Install the package selected by `query`
    ///
    /// `query` is `/<hash prefix>`, a name, `name@version` or a full key.
    /// Nothing under the target prefix changes until the archive has been
    /// verified, extracted into a sibling staging directory, relocated and
    /// validated there.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyInstalled` before fetching when the prefix is
    /// occupied and `overwrite` is `FailIfExists`; `ChecksumMismatch`,
    /// `SignatureMissing` or `SignatureInvalid` when verification fails;
    /// `CorruptTree` when relocated files still mention the old root.
    pub async fn install(
        &self,
        query: &str,
        verify: VerifyMode,
        overwrite: OverwriteMode,
    ) -> Result<InstallOutcome, Error> {
        self.install_tracked(query, verify, overwrite, &InstallProgress::default())
            .await
    }

    /// [`BuildCache::install`] bounded by `timeout`
    ///
    /// If the deadline passes once the target prefix has started changing
    /// but before the new tree was registered, whatever is left at the
    /// prefix is removed along with its registry record.
    ///
    /// # Errors
    ///
    /// Returns `Timeout` when the deadline passes, otherwise whatever
    /// [`BuildCache::install`] returns.
    pub async fn install_with_timeout(
        &self,
        query: &str,
        verify: VerifyMode,
        overwrite: OverwriteMode,
        timeout: Duration,
    ) -> Result<InstallOutcome, Error> {
        let progress = InstallProgress::default();
        let install = self.install_tracked(query, verify, overwrite, &progress);
        if let Ok(result) = tokio::time::timeout(timeout, install).await {
            return result;
        }

        if let Some((id, prefix)) = progress.abandoned() {
            self.discard(id, prefix).await?;
        }
        Err(CacheError::Timeout {
            package: query.to_string(),
            millis: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
        }
        .into())
    }

    async fn install_tracked(
        &self,
        query: &str,
        verify: VerifyMode,
        overwrite: OverwriteMode,
        progress: &InstallProgress,
    ) -> Result<InstallOutcome, Error> {
        let mut phase = CachePhase::Lookup;
        let result = self
            .install_inner(query, verify, overwrite, progress, &mut phase)
            .await;
        if let Err(e) = &result {
            self.emit_failure(query, phase, e);
        }
        result
    }

    async fn install_inner(
        &self,
        query: &str,
        verify: VerifyMode,
        overwrite: OverwriteMode,
        progress: &InstallProgress,
        phase: &mut CachePhase,
    ) -> Result<InstallOutcome, Error> {
        self.enter(query, phase, CachePhase::Lookup);
        let spec = self.lookup(query).await?;
        let id = spec.id;
        let key = id.key();
        let package = id.to_string();
        let mirror = self.mirror_named(&spec.mirror)?;
        let prefix = self.prefix_for(&id);

        let occupied = path_exists(&prefix).await? || self.registry.lookup(&id).await?.is_some();
        if occupied && overwrite == OverwriteMode::FailIfExists {
            return Err(CacheError::AlreadyInstalled {
                package,
                prefix: prefix.display().to_string(),
            }
            .into());
        }

        self.enter(&package, phase, CachePhase::Fetch);
        let download = self.scratch_dir("fetch")?;
        let fetched = mirror.fetch(&key, download.path()).await?;

        self.enter(&package, phase, CachePhase::Verify);
        let actual = hash_file(&fetched.archive).await?;
        if actual != fetched.entry.blake3 {
            return Err(CacheError::ChecksumMismatch {
                key,
                expected: fetched.entry.blake3.clone(),
                actual,
            }
            .into());
        }
        match verify {
            VerifyMode::Verify => {
                let signature = fetched
                    .signature
                    .as_deref()
                    .ok_or_else(|| SigningError::SignatureMissing { key: key.clone() })?;
                let signer = self.signer.as_ref().ok_or(SigningError::NoTrustedKeys)?;
                if !signer.verify(&fetched.archive, signature).await? {
                    return Err(SigningError::SignatureInvalid {
                        reason: format!("no trusted key accepted the signature of {key}"),
                    }
                    .into());
                }
            }
            VerifyMode::Unverified => {
                self.emit(AppEvent::Cache(CacheEvent::SignatureSkipped {
                    package: package.clone(),
                    phase: CachePhase::Verify,
                }));
            }
        }

        self.enter(&package, phase, CachePhase::Extract);
        let parent = prefix
            .parent()
            .ok_or_else(|| Error::internal(format!("{} has no parent", prefix.display())))?;
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| Error::io_with_path(&e, parent))?;
        let staging = tempfile::Builder::new()
            .prefix(&format!(".{key}.staging-"))
            .tempdir_in(parent)
            .map_err(|e| Error::io_with_path(&e, parent))?;
        extract_archive(&fetched.archive, staging.path()).await?;
        drop(download);

        self.enter(&package, phase, CachePhase::ReadManifest);
        let manifest = read_embedded_manifest(staging.path()).await?;

        self.enter(&package, phase, CachePhase::Relocate);
        let report = self
            .engine
            .relocate(staging.path(), &manifest, &self.store_root, &prefix)
            .await?;

        self.enter(&package, phase, CachePhase::Validate);
        let offending = self
            .engine
            .validate(staging.path(), &manifest, manifest.original_root(), &report)
            .await?;
        if !offending.is_empty() {
            // Dropping the staging directory removes the tree
            return Err(RelocationError::CorruptTree {
                root: manifest.original_root().display().to_string(),
                count: offending.len(),
            }
            .into());
        }

        // The old record goes first so a failure below never leaves it
        // pointing at a removed tree
        let _ = progress.replacing.set((id.clone(), prefix.clone()));
        self.registry.unregister(&id).await?;
        remove_tree(&prefix)
            .await
            .map_err(|e| Error::io_with_path(&e, &prefix))?;
        let staged = staging.keep();
        if let Err(e) = tokio::fs::rename(&staged, &prefix).await {
            let _ = remove_tree(&staged).await;
            return Err(Error::io_with_path(&e, &prefix));
        }

        self.enter(&package, phase, CachePhase::Register);
        let unrelocated = report.unrelocated();
        let registered = self
            .registry
            .register(InstalledRecord {
                id: id.clone(),
                prefix: prefix.clone(),
                original_prefix: manifest.original_prefix.clone(),
                installed_at: Utc::now(),
                unrelocated: unrelocated.clone(),
            })
            .await;
        if let Err(e) = registered {
            let _ = remove_tree(&prefix).await;
            return Err(e);
        }
        progress.registered.store(true, Ordering::SeqCst);

        self.emit(AppEvent::Cache(CacheEvent::Installed {
            package,
            prefix: prefix.clone(),
            unrelocated,
        }));
        Ok(InstallOutcome {
            id,
            mirror: spec.mirror,
            prefix,
            report,
        })
    }

    /// Packages on the mirrors, optionally filtered by a query
    ///
    /// # Errors
    ///
    /// Returns `NoMirrors` without mirrors, or an error if one cannot be
    /// listed.
    pub async fn list_available(&self, filter: Option<&str>) -> Result<Vec<AvailableSpec>, Error> {
        let mut specs: Vec<AvailableSpec> = {
            let cache = self.refreshed_specs().await?;
            match filter {
                Some(query) => cache.matching(query).into_iter().cloned().collect(),
                None => cache.specs().to_vec(),
            }
        };
        specs.sort_by(|a, b| a.id.cmp(&b.id).then_with(|| a.mirror.cmp(&b.mirror)));
        Ok(specs)
    }

    /// Public keys published on every mirror, first occurrence of an id wins
    ///
    /// # Errors
    ///
    /// Returns `NoMirrors` without mirrors, or an error if a mirror's keys
    /// cannot be read.
    pub async fn list_mirror_keys(&self) -> Result<Vec<PublicKeyRef>, Error> {
        if self.mirrors.is_empty() {
            return Err(CacheError::NoMirrors.into());
        }
        let mut seen = BTreeSet::new();
        let mut keys = Vec::new();
        for mirror in &self.mirrors {
            for key in mirror.list_keys().await? {
                if seen.insert(key.id.clone()) {
                    keys.push(key);
                }
            }
        }
        Ok(keys)
    }

    /// List mirror keys and, with `trust`, install them into the keyring
    ///
    /// Existing key files are kept unless `force` is set. Each key is
    /// returned with the path it was written to, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the keys cannot be listed or written.
    pub async fn fetch_keys(
        &self,
        trust: bool,
        force: bool,
    ) -> Result<Vec<(PublicKeyRef, Option<PathBuf>)>, Error> {
        let keys = self.list_mirror_keys().await?;
        let mut result = Vec::with_capacity(keys.len());
        for key in keys {
            let installed = if trust {
                install_key(&self.keys_dir, &key, force).await?
            } else {
                None
            };
            if let Some(path) = &installed {
                self.emit(AppEvent::Cache(CacheEvent::KeyInstalled {
                    id: key.id.clone(),
                    path: path.clone(),
                }));
            }
            result.push((key, installed));
        }
        Ok(result)
    }

    async fn refreshed_specs(&self) -> Result<MutexGuard<'_, SpecCache>, Error> {
        if self.mirrors.is_empty() {
            return Err(CacheError::NoMirrors.into());
        }
        let mut cache = self.spec_cache.lock().await;
        if cache.refresh(&self.mirrors).await? {
            self.emit(AppEvent::Cache(CacheEvent::SpecCacheRefreshed {
                mirrors: self.mirrors.len(),
                specs: cache.specs().len(),
            }));
        }
        Ok(cache)
    }

    async fn lookup(&self, query: &str) -> Result<AvailableSpec, Error> {
        let cache = self.refreshed_specs().await?;
        let matches = cache.matching(query);
        let ids: BTreeSet<&PackageId> = matches.iter().map(|s| &s.id).collect();

        match ids.len() {
            0 => Err(CacheError::NotFound {
                query: query.to_string(),
            }
            .into()),
            1 => Ok(matches[0].clone()),
            _ => Err(CacheError::Ambiguous {
                query: query.to_string(),
                candidates: ids
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(", "),
            }
            .into()),
        }
    }

    /// Remove an unregistered tree and any record left for it
    async fn discard(&self, id: &PackageId, prefix: &Path) -> Result<(), Error> {
        remove_tree(prefix)
            .await
            .map_err(|e| Error::io_with_path(&e, prefix))?;
        self.registry.unregister(id).await?;
        Ok(())
    }

    fn primary_mirror(&self) -> Result<&Arc<dyn Mirror>, Error> {
        self.mirrors.first().ok_or_else(|| CacheError::NoMirrors.into())
    }

    fn mirror_named(&self, name: &str) -> Result<&Arc<dyn Mirror>, Error> {
        self.mirrors
            .iter()
            .find(|m| m.name() == name)
            .ok_or_else(|| {
                CacheError::UnknownMirror {
                    name: name.to_string(),
                }
                .into()
            })
    }

    fn scratch_dir(&self, label: &str) -> Result<tempfile::TempDir, Error> {
        std::fs::create_dir_all(&self.work_dir).map_err(|e| Error::io_with_path(&e, &self.work_dir))?;
        tempfile::Builder::new()
            .prefix(&format!("{label}-"))
            .tempdir_in(&self.work_dir)
            .map_err(|e| Error::io_with_path(&e, &self.work_dir))
    }

    fn enter(&self, package: &str, phase: &mut CachePhase, next: CachePhase) {
        *phase = next;
        self.emit_phase(package, next);
    }

    fn emit_failure(&self, package: &str, phase: CachePhase, error: &Error) {
        self.emit(AppEvent::Cache(CacheEvent::Failed {
            package: package.to_string(),
            phase,
            failure: FailureContext::from_error(error),
        }));
    }
}

async fn path_exists(path: &Path) -> Result<bool, Error> {
    tokio::fs::try_exists(path)
        .await
        .map_err(|e| Error::io_with_path(&e, path))
}

/// Copy a tree keeping symlinks as links and permission bits
async fn copy_tree(src: &Path, dest: &Path) -> Result<(), Error> {
    let src = src.to_path_buf();
    let dest = dest.to_path_buf();
    tokio::task::spawn_blocking(move || copy_tree_blocking(&src, &dest))
        .await
        .map_err(|e| Error::internal(format!("copy task failed: {e}")))?
}

fn copy_tree_blocking(src: &Path, dest: &Path) -> Result<(), Error> {
    let metadata = std::fs::symlink_metadata(src).map_err(|e| Error::io_with_path(&e, src))?;
    std::fs::create_dir_all(dest).map_err(|e| Error::io_with_path(&e, dest))?;

    for entry in std::fs::read_dir(src).map_err(|e| Error::io_with_path(&e, src))? {
        let entry = entry.map_err(|e| Error::io_with_path(&e, src))?;
        let from = entry.path();
        let to = dest.join(entry.file_name());
        let file_type = entry.file_type().map_err(|e| Error::io_with_path(&e, &from))?;

        if file_type.is_symlink() {
            let target = std::fs::read_link(&from).map_err(|e| Error::io_with_path(&e, &from))?;
            make_symlink(&target, &to)?;
        } else if file_type.is_dir() {
            copy_tree_blocking(&from, &to)?;
        } else if file_type.is_file() {
            std::fs::copy(&from, &to).map_err(|e| Error::io_with_path(&e, &from))?;
        }
    }

    // Directory modes last so read-only directories can be filled
    std::fs::set_permissions(dest, metadata.permissions()).map_err(|e| Error::io_with_path(&e, dest))
}

#[cfg(unix)]
fn make_symlink(target: &Path, link: &Path) -> Result<(), Error> {
    std::os::unix::fs::symlink(target, link).map_err(|e| Error::io_with_path(&e, link))
}

#[cfg(not(unix))]
fn make_symlink(_target: &Path, link: &Path) -> Result<(), Error> {
    Err(Error::io_with_path(
        &std::io::Error::new(
            std::io::ErrorKind::Unsupported,
            "symbolic links are not supported on this platform",
        ),
        link,
    ))
}
