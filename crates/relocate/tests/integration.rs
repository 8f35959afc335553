//! Integration tests for relocate crate

#[cfg(test)]
mod tests {
    use bindist_errors::{Error, PlatformError, RelocationError};
    use bindist_events::{AppEvent, RelocationEvent};
    use bindist_platform::fixtures::{elf64_shared_object, macho64_image, ElfSearchTag, MachOSpec};
    use bindist_platform::{
        BinaryRewriter, NativeElfRewriter, NativeMachORewriter, PatchelfRewriter, RewriterSet,
    };
    use bindist_relocate::elf::{compute_relative_rpaths, substitute_prefix};
    use bindist_relocate::paths::normalize;
    use bindist_relocate::{relocate_links, relocate_text, RelocationEngine, RelocationReport};
    use bindist_types::{BuildManifest, InstallTree, PackageId, RewriterKind};
    use proptest::prelude::*;
    use std::path::{Path, PathBuf};
    use std::sync::Arc;
    use tempfile::TempDir;

    const OLD_ROOT: &str = "/old/root";
    const OLD_PREFIX: &str = "/old/root/pkg";
    const NEW_ROOT: &str = "/new/root";
    const NEW_PREFIX: &str = "/new/root/pkg";

    fn engine() -> RelocationEngine {
        RelocationEngine::new(RewriterSet::for_kind(RewriterKind::Native)).with_max_parallel(2)
    }

    fn write(path: &Path, data: &[u8]) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, data).unwrap();
    }

    /// A staged tree built for `/old/root/pkg`, as extracted from an archive
    fn staged_tree() -> (TempDir, BuildManifest) {
        let dir = tempfile::tempdir().unwrap();
        let prefix = dir.path();
        write(
            &prefix.join("lib/libfoo.so"),
            &elf64_shared_object(
                Some((ElfSearchTag::Runpath, "/old/root/pkg/lib:/old/root/dep/lib")),
                0,
            ),
        );
        write(
            &prefix.join("bin/foo-config"),
            b"#!/bin/sh\necho /old/root/pkg/include -I/old/root/dep/include\n",
        );
        #[cfg(unix)]
        std::os::unix::fs::symlink("/old/root/pkg/lib/libfoo.so", prefix.join("lib/libfoo.so.1")).unwrap();

        let mut manifest = BuildManifest::new(OLD_PREFIX, OLD_ROOT).unwrap();
        manifest.add_textfile("bin/foo-config").unwrap();
        #[cfg(unix)]
        manifest.add_link("lib/libfoo.so.1").unwrap();
        (dir, manifest)
    }

    #[tokio::test]
    async fn relocate_text_vectors() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("dummy.txt");
        let old_dir = "/home/spack/opt/spack";
        let new_dir = "/opt/rh/devtoolset/";
        std::fs::write(&file, old_dir).unwrap();

        let report = relocate_text(
            std::slice::from_ref(&file),
            Path::new(old_dir),
            Path::new(new_dir),
            Path::new(old_dir),
            Path::new(new_dir),
        )
        .await;

        assert!(report.is_clean());
        assert_eq!(report.relocated, vec![file.clone()]);
        assert_eq!(std::fs::read_to_string(&file).unwrap(), new_dir);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn relocate_links_vectors() {
        let dir = tempfile::tempdir().unwrap();
        let link = dir.path().join("link.ln");
        std::os::unix::fs::symlink("/home/spack/opt/spack/link.ln", &link).unwrap();

        let report = relocate_links(
            std::slice::from_ref(&link),
            Path::new("/home/spack/opt/spack"),
            Path::new("/opt/rh/devtoolset/"),
        )
        .await;

        assert!(report.is_clean());
        assert_eq!(
            std::fs::read_link(&link).unwrap(),
            PathBuf::from("/opt/rh/devtoolset/link.ln")
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn relative_links_are_left_alone() {
        let dir = tempfile::tempdir().unwrap();
        let link = dir.path().join("rel.ln");
        std::os::unix::fs::symlink("../lib/libz.so", &link).unwrap();

        let report = relocate_links(std::slice::from_ref(&link), Path::new(".."), Path::new("/x")).await;
        assert!(report.relocated.is_empty());
        assert_eq!(std::fs::read_link(&link).unwrap(), PathBuf::from("../lib/libz.so"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn entries_behind_symlinked_directories_are_refused() {
        let dir = tempfile::tempdir().unwrap();
        let outside = dir.path().join("outside");
        let staged = dir.path().join("staged");
        write(&outside.join("victim.txt"), b"data /old/root/pkg here\n");
        std::os::unix::fs::symlink("/old/root/pkg/x", outside.join("victim.ln")).unwrap();
        std::fs::create_dir_all(&staged).unwrap();
        std::os::unix::fs::symlink(&outside, staged.join("evil")).unwrap();
        std::os::unix::fs::symlink(outside.join("victim.txt"), staged.join("direct.txt")).unwrap();

        let mut manifest = BuildManifest::new(OLD_PREFIX, OLD_ROOT).unwrap();
        manifest.add_textfile("evil/victim.txt").unwrap();
        manifest.add_textfile("direct.txt").unwrap();
        manifest.add_link("evil/victim.ln").unwrap();
        let manifest = BuildManifest::from_toml(&manifest.to_toml().unwrap()).unwrap();

        let report = engine()
            .relocate(&staged, &manifest, Path::new(NEW_ROOT), Path::new(NEW_PREFIX))
            .await
            .unwrap();

        assert!(report.relocated.is_empty(), "{:?}", report.relocated);
        assert_eq!(report.failures.len(), 3);
        assert!(report.failures.iter().all(|failure| matches!(
            failure.error,
            Error::Relocation(RelocationError::PathEscapesRoot { .. })
        )));
        assert_eq!(
            std::fs::read_to_string(outside.join("victim.txt")).unwrap(),
            "data /old/root/pkg here\n"
        );
        assert_eq!(
            std::fs::read_link(outside.join("victim.ln")).unwrap(),
            PathBuf::from("/old/root/pkg/x")
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn analyze_lists_text_links_and_binaries() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("opt");
        let prefix = root.join("pkg");
        let dummy = prefix.join("dummy.txt");
        write(&dummy, format!("prefix is {}\n", prefix.display()).as_bytes());
        std::os::unix::fs::symlink(&dummy, prefix.join("link_to_dummy.txt")).unwrap();
        std::os::unix::fs::symlink("dummy.txt", prefix.join("relative_link.txt")).unwrap();
        write(&prefix.join("share/plain.txt"), b"no install paths here\n");
        write(&prefix.join("lib/libbar.so"), &elf64_shared_object(None, 0));
        write(&prefix.join(".bindist/manifest.toml"), prefix.display().to_string().as_bytes());

        let tree = InstallTree::new(PackageId::new("dummy", "1.0", "abcdefg"), &prefix, &root);
        let manifest = engine().analyze(&tree).await.unwrap();

        assert_eq!(manifest.original_prefix, prefix);
        assert_eq!(manifest.original_root(), root.as_path());
        assert_eq!(manifest.relocate_textfiles, vec![PathBuf::from("dummy.txt")]);
        assert_eq!(manifest.relocate_links, vec![PathBuf::from("link_to_dummy.txt")]);
        assert_eq!(manifest.relocate_binaries, vec![PathBuf::from("lib/libbar.so")]);
    }

    #[tokio::test]
    async fn relocate_rewrites_every_kind() {
        let (dir, mut manifest) = staged_tree();
        let prefix = dir.path();
        manifest.add_binary("lib/libfoo.so").unwrap();

        let (tx, mut rx) = bindist_events::channel();
        let engine = engine().with_event_sender(tx);
        let report = engine
            .relocate(prefix, &manifest, Path::new(NEW_ROOT), Path::new(NEW_PREFIX))
            .await
            .unwrap();

        assert!(report.is_clean(), "{:?}", report.failures);
        assert!(report.relocated.contains(&prefix.join("lib/libfoo.so")));
        assert!(report.relocated.contains(&prefix.join("bin/foo-config")));

        let paths = NativeElfRewriter::new()
            .read_paths(&prefix.join("lib/libfoo.so"))
            .await
            .unwrap();
        assert_eq!(paths.rpaths, vec!["/new/root/pkg/lib", "/new/root/dep/lib"]);
        assert_eq!(
            std::fs::read_to_string(prefix.join("bin/foo-config")).unwrap(),
            "#!/bin/sh\necho /new/root/pkg/include -I/new/root/dep/include\n"
        );
        #[cfg(unix)]
        assert_eq!(
            std::fs::read_link(prefix.join("lib/libfoo.so.1")).unwrap(),
            PathBuf::from("/new/root/pkg/lib/libfoo.so")
        );

        let offending = engine
            .validate(prefix, &manifest, Path::new(OLD_ROOT), &report)
            .await
            .unwrap();
        assert!(offending.is_empty());

        drop(engine);
        let mut started = false;
        let mut completed = None;
        while let Some(message) = rx.recv().await {
            match message.event {
                AppEvent::Relocation(RelocationEvent::Started { .. }) => started = true,
                AppEvent::Relocation(RelocationEvent::Completed { relocated, failed, .. }) => {
                    completed = Some((relocated, failed));
                }
                _ => {}
            }
        }
        assert!(started);
        assert_eq!(completed, Some((report.relocated.len(), 0)));
    }

    #[tokio::test]
    async fn binaries_are_rescanned_when_manifest_lists_none() {
        let (dir, manifest) = staged_tree();
        let prefix = dir.path();
        assert!(manifest.relocate_binaries.is_empty());

        let report = engine()
            .relocate(prefix, &manifest, Path::new(NEW_ROOT), Path::new(NEW_PREFIX))
            .await
            .unwrap();

        assert!(report.relocated.contains(&prefix.join("lib/libfoo.so")));
    }

    #[tokio::test]
    async fn relocating_back_restores_the_tree() {
        let (dir, manifest) = staged_tree();
        let prefix = dir.path();
        let library = prefix.join("lib/libfoo.so");
        let script = prefix.join("bin/foo-config");
        let original_library = std::fs::read(&library).unwrap();
        let original_script = std::fs::read(&script).unwrap();

        let engine = engine();
        engine
            .relocate(prefix, &manifest, Path::new(NEW_ROOT), Path::new(NEW_PREFIX))
            .await
            .unwrap();
        assert_ne!(std::fs::read(&library).unwrap(), original_library);

        let mut moved = BuildManifest::new(NEW_PREFIX, NEW_ROOT).unwrap();
        moved.relocate_textfiles.clone_from(&manifest.relocate_textfiles);
        moved.relocate_links.clone_from(&manifest.relocate_links);
        let report = engine
            .relocate(prefix, &moved, Path::new(OLD_ROOT), Path::new(OLD_PREFIX))
            .await
            .unwrap();

        assert!(report.is_clean());
        assert_eq!(std::fs::read(&library).unwrap(), original_library);
        assert_eq!(std::fs::read(&script).unwrap(), original_script);
    }

    #[tokio::test]
    async fn longer_root_fails_only_the_binary() {
        let (dir, manifest) = staged_tree();
        let prefix = dir.path();
        let library = prefix.join("lib/libfoo.so");
        let before = std::fs::read(&library).unwrap();

        let report = engine()
            .relocate(
                prefix,
                &manifest,
                Path::new("/a/much/longer/root"),
                Path::new("/a/much/longer/root/pkg"),
            )
            .await
            .unwrap();

        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].path, library);
        assert!(matches!(
            report.failures[0].error,
            Error::Platform(PlatformError::BinaryFormat { .. })
        ));
        assert_eq!(std::fs::read(&library).unwrap(), before);
        assert!(report.relocated.contains(&prefix.join("bin/foo-config")));
        assert_eq!(report.unrelocated(), vec![library]);
    }

    #[tokio::test]
    async fn same_location_is_a_no_op() {
        let (dir, manifest) = staged_tree();
        let prefix = dir.path();
        let report = engine()
            .relocate(prefix, &manifest, Path::new(OLD_ROOT), Path::new(OLD_PREFIX))
            .await
            .unwrap();
        assert!(report.relocated.is_empty());
        assert!(report.is_clean());
    }

    #[tokio::test]
    async fn missing_tool_aborts_the_tree() {
        let (dir, manifest) = staged_tree();
        let rewriters = RewriterSet {
            elf: Arc::new(PatchelfRewriter::with_path(PathBuf::from("/nonexistent/bin/patchelf"))),
            macho: Arc::new(NativeMachORewriter::new()),
        };
        let err = RelocationEngine::new(rewriters)
            .relocate(dir.path(), &manifest, Path::new(NEW_ROOT), Path::new(NEW_PREFIX))
            .await
            .unwrap_err();
        assert!(err.is_fatal_for_tree());
    }

    #[tokio::test]
    async fn make_relative_uses_original_locations() {
        let (dir, mut manifest) = staged_tree();
        let prefix = dir.path();
        manifest.add_binary("lib/libfoo.so").unwrap();

        let report = engine().make_relative(prefix, &manifest).await.unwrap();
        assert!(report.is_clean());

        let paths = NativeElfRewriter::new()
            .read_paths(&prefix.join("lib/libfoo.so"))
            .await
            .unwrap();
        assert_eq!(paths.rpaths, vec!["$ORIGIN", "$ORIGIN/../../dep/lib"]);
    }

    #[tokio::test]
    async fn macho_library_is_relocated() {
        let dir = tempfile::tempdir().unwrap();
        let prefix = dir.path();
        let spec = MachOSpec {
            id: Some("/old/root/pkg/lib/libfoo.dylib".into()),
            deps: vec![
                "/old/root/dep/lib/libz.dylib".into(),
                "/usr/lib/libSystem.B.dylib".into(),
            ],
            rpaths: vec!["/old/root/dep/lib".into()],
            slack: 16,
        };
        write(&prefix.join("lib/libfoo.dylib"), &macho64_image(&spec));
        let mut manifest = BuildManifest::new(OLD_PREFIX, OLD_ROOT).unwrap();
        manifest.add_binary("lib/libfoo.dylib").unwrap();

        let report = engine()
            .relocate(prefix, &manifest, Path::new("/opt/longer-root"), Path::new("/opt/longer-root/pkg"))
            .await
            .unwrap();
        assert!(report.is_clean(), "{:?}", report.failures);

        let paths = NativeMachORewriter::new()
            .read_paths(&prefix.join("lib/libfoo.dylib"))
            .await
            .unwrap();
        assert_eq!(paths.id.as_deref(), Some("/opt/longer-root/pkg/lib/libfoo.dylib"));
        assert_eq!(
            paths.deps,
            vec!["/opt/longer-root/dep/lib/libz.dylib", "/usr/lib/libSystem.B.dylib"]
        );
        assert_eq!(paths.rpaths, vec!["/opt/longer-root/dep/lib"]);
    }

    #[tokio::test]
    async fn binary_strings_are_patched_when_enabled() {
        let dir = tempfile::tempdir().unwrap();
        let prefix = dir.path();
        let mut image = elf64_shared_object(None, 0);
        image.extend_from_slice(b"/old/root/pkg/share/data\0");
        let library = prefix.join("lib/libdata.so");
        write(&library, &image);
        let mut manifest = BuildManifest::new(OLD_PREFIX, OLD_ROOT).unwrap();
        manifest.add_binary("lib/libdata.so").unwrap();

        let report = engine()
            .with_binary_strings(true)
            .relocate(prefix, &manifest, Path::new("/n"), Path::new("/n/pkg"))
            .await
            .unwrap();

        assert_eq!(report.relocated, vec![library.clone()]);
        let data = std::fs::read(&library).unwrap();
        assert_eq!(data.len(), image.len());
        assert!(data.windows(17).any(|w| w == b"/n/pkg/share/data"));
    }

    #[tokio::test]
    async fn validate_reports_stale_files() {
        let dir = tempfile::tempdir().unwrap();
        let prefix = dir.path();
        write(&prefix.join("stale.txt"), b"/old/root/pkg/bin\n");
        write(&prefix.join("nested.txt"), b"/old/root2/pkg/bin\n");
        let mut manifest = BuildManifest::new(OLD_PREFIX, OLD_ROOT).unwrap();
        manifest.add_textfile("stale.txt").unwrap();
        manifest.add_textfile("nested.txt").unwrap();

        let report = RelocationReport {
            new_roots: vec![PathBuf::from("/old/root2")],
            ..RelocationReport::default()
        };
        let offending = engine()
            .validate(prefix, &manifest, Path::new(OLD_ROOT), &report)
            .await
            .unwrap();
        assert_eq!(offending, vec![prefix.join("stale.txt")]);
    }

    fn under(base: &Path, segments: &[String]) -> String {
        if segments.is_empty() {
            base.display().to_string()
        } else {
            format!("{}/{}", base.display(), segments.join("/"))
        }
    }

    fn segment() -> impl Strategy<Value = String> {
        "[a-z][a-z0-9]{0,7}"
    }

    proptest! {
        #[test]
        fn substitution_round_trips(
            old in prop::collection::vec(segment(), 1..4),
            new in prop::collection::vec(segment(), 1..4),
            tail in prop::collection::vec(segment(), 0..4),
        ) {
            let old_root = PathBuf::from(format!("/x/{}", old.join("/")));
            let new_root = PathBuf::from(format!("/y/{}", new.join("/")));
            let entry = under(&old_root, &tail);

            let moved = substitute_prefix(std::slice::from_ref(&entry), &old_root, &new_root);
            let back = substitute_prefix(&moved, &new_root, &old_root);
            prop_assert_eq!(back, vec![entry]);
        }

        #[test]
        fn relative_rpaths_resolve_to_the_original(
            bin in prop::collection::vec(segment(), 1..4),
            target in prop::collection::vec(segment(), 0..4),
        ) {
            let root = Path::new("/root");
            let binary = root.join(bin.join("/")).join("tool");
            let entry = under(root, &target);

            let out = compute_relative_rpaths(&binary, root, std::slice::from_ref(&entry)).unwrap();
            let relative = out[0].strip_prefix("$ORIGIN").unwrap().trim_start_matches('/');
            let resolved = normalize(&binary.parent().unwrap().join(relative)).unwrap();
            prop_assert_eq!(resolved, PathBuf::from(entry));
        }
    }
}
