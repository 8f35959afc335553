//! Tree-wide relocation driven by a build manifest

use bindist_errors::{Error, RelocationError};
use bindist_events::{AppEvent, EventEmitter, EventSender, FailureContext, RelocationEvent};
use bindist_platform::RewriterSet;
use bindist_types::{BuildManifest, FileTreatment, InstallTree, ObjectFormat, METADATA_DIR};
use ignore::WalkBuilder;
use std::future::Future;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::binary_strings::patch_binary_strings_with;
use crate::classify::{classify, sniff, treatment_of};
use crate::paths::{is_under, PrefixMap};
use crate::report::RelocationReport;
use crate::text::{contains_install_root, contains_stale_install_root, relocate_links_with, relocate_text_with};
use crate::{elf, macho};

/// Result of rewriting one object file
#[derive(Debug, Default, Clone, Copy)]
struct BinaryOutcome {
    changed: bool,
    /// Embedded strings too short to take the new path
    strings_skipped: usize,
}

/// Walks trees, builds manifests and rewrites install paths
///
/// Object files are rewritten in parallel, bounded by `max_parallel`.
/// Text files and symlinks are handled alongside them since the file sets
/// are disjoint.
#[derive(Debug, Clone)]
pub struct RelocationEngine {
    rewriters: RewriterSet,
    max_parallel: usize,
    patch_binary_strings: bool,
    event_sender: Option<EventSender>,
}

impl EventEmitter for RelocationEngine {
    fn event_sender(&self) -> Option<&EventSender> {
        self.event_sender.as_ref()
    }
}

impl RelocationEngine {
    #[must_use]
    pub fn new(rewriters: RewriterSet) -> Self {
        Self {
            rewriters,
            max_parallel: num_cpus::get(),
            patch_binary_strings: false,
            event_sender: None,
        }
    }

    #[must_use]
    pub fn with_max_parallel(mut self, max_parallel: usize) -> Self {
        self.max_parallel = max_parallel.max(1);
        self
    }

    /// Also patch install paths compiled into object file data
    #[must_use]
    pub fn with_binary_strings(mut self, enabled: bool) -> Self {
        self.patch_binary_strings = enabled;
        self
    }

    #[must_use]
    pub fn with_event_sender(mut self, sender: EventSender) -> Self {
        self.event_sender = Some(sender);
        self
    }

    /// Build the manifest for a frozen tree
    ///
    /// Records text files that mention the install root, symlinks with
    /// absolute targets under it, and every object file with load paths.
    ///
    /// # Errors
    ///
    /// Returns an error if the tree cannot be walked or a file cannot be
    /// read.
    pub async fn analyze(&self, tree: &InstallTree) -> Result<BuildManifest, Error> {
        let mut manifest = BuildManifest::new(&tree.prefix, &tree.root)?;

        for path in walk_files(&tree.prefix).await? {
            let relative = relative_entry(&tree.prefix, &path)?;
            let signature = sniff(&path).await?;
            match treatment_of(&signature) {
                FileTreatment::Symlink => {
                    let target = PathBuf::from(&signature.subtype);
                    if target.is_absolute() && is_under(&target, &tree.root) {
                        manifest.add_link(relative)?;
                    }
                }
                FileTreatment::Text => {
                    if contains_install_root(&path, &tree.root).await? {
                        manifest.add_textfile(relative)?;
                    }
                }
                FileTreatment::Binary(_) => manifest.add_binary(relative)?,
                FileTreatment::Opaque => {}
            }
        }
        manifest.sort();

        self.emit(AppEvent::Relocation(RelocationEvent::AnalysisCompleted {
            prefix: tree.prefix.clone(),
            textfiles: manifest.relocate_textfiles.len(),
            links: manifest.relocate_links.len(),
            binaries: manifest.relocate_binaries.len(),
        }));
        Ok(manifest)
    }

    /// Give the object files of a staged copy loader-relative load paths
    ///
    /// Relative paths are computed from each file's original location
    /// under `manifest.original_prefix`, not from the staging directory.
    ///
    /// # Errors
    ///
    /// Returns an error only for conditions fatal to the whole tree, such
    /// as a missing rewriting tool; per-file errors land in the report.
    pub async fn make_relative(
        &self,
        staged_prefix: &Path,
        manifest: &BuildManifest,
    ) -> Result<RelocationReport, Error> {
        let binaries = self.binaries_of(staged_prefix, manifest).await?;
        let (binaries, escaped) = contained(staged_prefix, binaries, false).await?;
        let rewriters = self.rewriters.clone();
        let root = manifest.original_root().to_path_buf();
        let original_prefix = manifest.original_prefix.clone();
        let staged_prefix = staged_prefix.to_path_buf();

        let mut report = self
            .run_binaries(binaries, move |staged| {
                let rewriters = rewriters.clone();
                let root = root.clone();
                let original = staged
                    .strip_prefix(&staged_prefix)
                    .map(|relative| original_prefix.join(relative))
                    .unwrap_or_else(|_| staged.clone());
                async move { make_binary_relative(&rewriters, &staged, &original, &root).await }
            })
            .await?;
        report.merge(escaped);
        report.sort();
        self.emit_file_events("binary", &report);
        Ok(report)
    }

    /// Rewrite a tree extracted at `prefix` so it works at `new_prefix`
    /// under `new_root`
    ///
    /// Paths under the original prefix map to `new_prefix`; other paths
    /// under the original root map to `new_root`. `prefix` is where the
    /// files are now, which may be a staging directory.
    ///
    /// # Errors
    ///
    /// Returns an error only for conditions fatal to the whole tree, such
    /// as a missing rewriting tool; per-file errors land in the report.
    pub async fn relocate(
        &self,
        prefix: &Path,
        manifest: &BuildManifest,
        new_root: &Path,
        new_prefix: &Path,
    ) -> Result<RelocationReport, Error> {
        let map = PrefixMap::single(&manifest.original_prefix, new_prefix)
            .with(manifest.original_root(), new_root);

        self.emit(AppEvent::Relocation(RelocationEvent::Started {
            prefix: prefix.to_path_buf(),
            old_root: manifest.original_root().to_path_buf(),
            new_root: new_root.to_path_buf(),
        }));

        let mut report = RelocationReport::default();
        if !map.is_empty() {
            let (binaries, escaped_binaries) =
                contained(prefix, self.binaries_of(prefix, manifest).await?, false).await?;
            let (textfiles, escaped_text) = contained(
                prefix,
                manifest.relocate_textfiles.iter().map(|p| prefix.join(p)).collect(),
                false,
            )
            .await?;
            let (links, escaped_links) = contained(
                prefix,
                manifest.relocate_links.iter().map(|p| prefix.join(p)).collect(),
                true,
            )
            .await?;

            let context = BinaryContext {
                rewriters: self.rewriters.clone(),
                map: map.clone(),
                patch_strings: self.patch_binary_strings,
            };
            let (binary_report, mut text_report, mut link_report) = tokio::join!(
                self.run_binaries(binaries, move |path| {
                    let context = context.clone();
                    async move { context.relocate(&path).await }
                }),
                relocate_text_with(&textfiles, &map),
                relocate_links_with(&links, &map),
            );
            let mut binary_report = binary_report?;
            binary_report.merge(escaped_binaries);
            text_report.merge(escaped_text);
            link_report.merge(escaped_links);

            self.emit_file_events("binary", &binary_report);
            self.emit_file_events("text", &text_report);
            self.emit_file_events("symlink", &link_report);
            report.merge(binary_report);
            report.merge(text_report);
            report.merge(link_report);
            report.sort();
        }
        report.new_roots = vec![new_prefix.to_path_buf(), new_root.to_path_buf()];

        self.emit(AppEvent::Relocation(RelocationEvent::Completed {
            prefix: prefix.to_path_buf(),
            relocated: report.relocated.len(),
            failed: report.failures.len(),
        }));
        Ok(report)
    }

    /// Text files that still mention `old_root` after relocation
    ///
    /// Files already in the report's failure set are skipped, as are
    /// occurrences that are part of the new locations recorded in the
    /// report.
    ///
    /// # Errors
    ///
    /// Returns an error if a listed file cannot be read.
    pub async fn validate(
        &self,
        prefix: &Path,
        manifest: &BuildManifest,
        old_root: &Path,
        report: &RelocationReport,
    ) -> Result<Vec<PathBuf>, Error> {
        let failed = report.failed_paths();
        let mut offending = Vec::new();
        for relative in &manifest.relocate_textfiles {
            let path = prefix.join(relative);
            if failed.contains(path.as_path()) {
                continue;
            }
            if contains_stale_install_root(&path, old_root, &report.new_roots).await? {
                offending.push(path);
            }
        }

        if !offending.is_empty() {
            self.emit(AppEvent::Relocation(RelocationEvent::ValidationFailed {
                prefix: prefix.to_path_buf(),
                offending: offending.clone(),
            }));
        }
        Ok(offending)
    }

    /// Absolute paths of the object files to rewrite
    ///
    /// `relocate_binaries` is never persisted, so a manifest read back from
    /// an archive has none and the tree is scanned instead.
    async fn binaries_of(&self, prefix: &Path, manifest: &BuildManifest) -> Result<Vec<PathBuf>, Error> {
        if !manifest.relocate_binaries.is_empty() {
            return Ok(manifest
                .relocate_binaries
                .iter()
                .map(|p| prefix.join(p))
                .collect());
        }

        let mut binaries = Vec::new();
        for path in walk_files(prefix).await? {
            if classify(&path).await?.is_binary() {
                binaries.push(path);
            }
        }
        Ok(binaries)
    }

    /// Run `task` for every path with at most `max_parallel` in flight
    async fn run_binaries<F, Fut>(&self, paths: Vec<PathBuf>, task: F) -> Result<RelocationReport, Error>
    where
        F: Fn(PathBuf) -> Fut,
        Fut: Future<Output = Result<BinaryOutcome, Error>> + Send + 'static,
    {
        let semaphore = Arc::new(Semaphore::new(self.max_parallel));
        let mut tasks = JoinSet::new();

        for path in paths {
            let permit = semaphore
                .clone()
                .acquire_owned()
                .await
                .map_err(|e| Error::internal(format!("semaphore acquire error: {e}")))?;
            let work = task(path.clone());
            tasks.spawn(async move {
                let _permit = permit; // Hold permit until task completes
                (path, work.await)
            });
        }

        let mut report = RelocationReport::default();
        let mut strings_skipped = 0;
        while let Some(joined) = tasks.join_next().await {
            let (path, result) =
                joined.map_err(|e| Error::internal(format!("relocation task failed: {e}")))?;
            match result {
                Ok(outcome) => {
                    if outcome.changed {
                        report.record_relocated(path);
                    }
                    strings_skipped += outcome.strings_skipped;
                }
                Err(e) if e.is_fatal_for_tree() => {
                    tasks.abort_all();
                    return Err(e);
                }
                Err(e) => report.record_failure(path, e),
            }
        }

        if strings_skipped > 0 {
            self.emit_warning_with_context(
                format!("{strings_skipped} embedded path(s) left unpatched"),
                "the new path is longer than the space reserved in the object file",
            );
        }
        report.sort();
        Ok(report)
    }

    fn emit_file_events(&self, kind: &str, report: &RelocationReport) {
        for path in &report.relocated {
            self.emit(AppEvent::Relocation(RelocationEvent::FilePatched {
                path: path.clone(),
                kind: kind.to_string(),
            }));
        }
        for failure in &report.failures {
            self.emit(AppEvent::Relocation(RelocationEvent::FileFailed {
                path: failure.path.clone(),
                failure: FailureContext::from_error(&failure.error),
            }));
        }
    }
}

/// Everything a relocation task needs, cloned into each task
#[derive(Debug, Clone)]
struct BinaryContext {
    rewriters: RewriterSet,
    map: PrefixMap,
    patch_strings: bool,
}

impl BinaryContext {
    async fn relocate(&self, path: &Path) -> Result<BinaryOutcome, Error> {
        let changed = match classify(path).await? {
            FileTreatment::Binary(ObjectFormat::Elf) => {
                let old = elf::get_paths(&self.rewriters.elf, path).await?;
                let new = self.map.map_all(&old.rpaths);
                elf::apply(&self.rewriters.elf, path, &old, new).await?
            }
            FileTreatment::Binary(ObjectFormat::MachO) => {
                let old = macho::get_paths(&self.rewriters.macho, path).await?;
                let new = macho::map_paths(&self.map, &old);
                macho::apply(&self.rewriters.macho, path, &old, &new).await?
            }
            other => return Err(not_an_object(path, other)),
        };

        let mut outcome = BinaryOutcome {
            changed,
            strings_skipped: 0,
        };
        if self.patch_strings {
            let mut data = tokio::fs::read(path)
                .await
                .map_err(|e| Error::io_with_path(&e, path))?;
            let patch = patch_binary_strings_with(&mut data, &self.map);
            if patch.patched > 0 {
                bindist_platform::fs::write_preserving_permissions(path, &data)
                    .await
                    .map_err(|e| Error::io_with_path(&e, path))?;
                outcome.changed = true;
            }
            outcome.strings_skipped = patch.skipped;
        }
        Ok(outcome)
    }
}

async fn make_binary_relative(
    rewriters: &RewriterSet,
    staged: &Path,
    original: &Path,
    root: &Path,
) -> Result<BinaryOutcome, Error> {
    let changed = match classify(staged).await? {
        FileTreatment::Binary(ObjectFormat::Elf) => {
            let old = elf::get_paths(&rewriters.elf, staged).await?;
            let new = elf::compute_relative_rpaths(original, root, &old.rpaths)?;
            elf::apply(&rewriters.elf, staged, &old, new).await?
        }
        FileTreatment::Binary(ObjectFormat::MachO) => {
            let old = macho::get_paths(&rewriters.macho, staged).await?;
            let new = macho::make_relative(original, root, &old)?;
            macho::apply(&rewriters.macho, staged, &old, &new).await?
        }
        other => return Err(not_an_object(staged, other)),
    };
    Ok(BinaryOutcome {
        changed,
        strings_skipped: 0,
    })
}

fn not_an_object(path: &Path, treatment: FileTreatment) -> Error {
    RelocationError::Failed {
        path: path.display().to_string(),
        message: format!("expected an object file, found {treatment:?}"),
    }
    .into()
}

/// Split `paths` into those that resolve inside `prefix` and a report of
/// the ones that do not
///
/// A symlinked directory between `prefix` and an entry would send reads
/// and writes outside the tree, so any symlink among the parents fails the
/// entry with `PathEscapesRoot`. The entry itself may be a symlink only
/// when `link_entries` is set.
async fn contained(
    prefix: &Path,
    paths: Vec<PathBuf>,
    link_entries: bool,
) -> Result<(Vec<PathBuf>, RelocationReport), Error> {
    let mut inside = Vec::with_capacity(paths.len());
    let mut escaped = RelocationReport::default();
    for path in paths {
        if resolves_inside(prefix, &path, link_entries).await? {
            inside.push(path);
        } else {
            let error = RelocationError::PathEscapesRoot {
                path: path.display().to_string(),
                base: prefix.display().to_string(),
            };
            escaped.record_failure(path, error.into());
        }
    }
    Ok((inside, escaped))
}

async fn resolves_inside(prefix: &Path, path: &Path, link_entry: bool) -> Result<bool, Error> {
    let Ok(relative) = path.strip_prefix(prefix) else {
        return Ok(false);
    };
    let parts: Vec<Component<'_>> = relative.components().collect();
    if parts.is_empty() || !parts.iter().all(|part| matches!(part, Component::Normal(_))) {
        return Ok(false);
    }

    let mut current = prefix.to_path_buf();
    for (index, part) in parts.iter().enumerate() {
        current.push(part);
        let is_leaf = index + 1 == parts.len();
        match tokio::fs::symlink_metadata(&current).await {
            Ok(meta) if meta.file_type().is_symlink() => return Ok(is_leaf && link_entry),
            Ok(_) => {}
            // Missing entries are reported by the rewrite itself
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(true),
            Err(e) => return Err(Error::io_with_path(&e, &current)),
        }
    }
    Ok(true)
}

fn relative_entry(prefix: &Path, path: &Path) -> Result<PathBuf, Error> {
    path.strip_prefix(prefix)
        .map(Path::to_path_buf)
        .map_err(|_| Error::internal(format!("{} is outside {}", path.display(), prefix.display())))
}

/// Every non-directory entry under `prefix`, sorted, without following
/// symlinks and skipping the metadata directory
async fn walk_files(prefix: &Path) -> Result<Vec<PathBuf>, Error> {
    let prefix = prefix.to_path_buf();
    tokio::task::spawn_blocking(move || -> Result<Vec<PathBuf>, Error> {
        let mut files = Vec::new();
        let walker = WalkBuilder::new(&prefix)
            .standard_filters(false)
            .hidden(false)
            .parents(false)
            .follow_links(false)
            .filter_entry(|entry| !(entry.depth() == 1 && entry.file_name() == METADATA_DIR))
            .build();

        for entry in walker {
            let entry = entry.map_err(|e| RelocationError::Failed {
                path: prefix.display().to_string(),
                message: e.to_string(),
            })?;
            if entry.file_type().is_some_and(|t| !t.is_dir()) {
                files.push(entry.into_path());
            }
        }
        files.sort();
        Ok(files)
    })
    .await
    .map_err(|e| Error::internal(format!("tree walk task failed: {e}")))?
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn walk_skips_metadata_and_keeps_links() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        std::fs::create_dir_all(root.join("bin")).unwrap();
        std::fs::create_dir_all(root.join(".bindist")).unwrap();
        std::fs::create_dir_all(root.join("share/.hidden")).unwrap();
        std::fs::write(root.join("bin/tool"), b"#!/bin/sh\n").unwrap();
        std::fs::write(root.join(".bindist/manifest.toml"), b"x").unwrap();
        std::fs::write(root.join("share/.hidden/.keep"), b"").unwrap();
        #[cfg(unix)]
        std::os::unix::fs::symlink("/nonexistent/target", root.join("dangling")).unwrap();

        let files = walk_files(root).await.unwrap();
        let relative: Vec<_> = files
            .iter()
            .map(|p| p.strip_prefix(root).unwrap().to_path_buf())
            .collect();

        assert!(relative.contains(&PathBuf::from("bin/tool")));
        assert!(relative.contains(&PathBuf::from("share/.hidden/.keep")));
        assert!(!relative.iter().any(|p| p.starts_with(".bindist")));
        #[cfg(unix)]
        assert!(relative.contains(&PathBuf::from("dangling")));
    }
}
