//! Integration tests for types

#[cfg(test)]
mod tests {
    use bindist_types::*;
    use std::path::{Path, PathBuf};

    #[test]
    fn test_package_key_and_display() {
        let id = PackageId::new("zlib", "1.2.11", "pbk5z4rlwujjvygdhgpvzpitmmvqbyyr");
        assert_eq!(id.key(), "zlib-1.2.11-pbk5z4rlwujjvygdhgpvzpitmmvqbyyr");
        assert_eq!(id.to_string(), "zlib@1.2.11/pbk5z4r");
        assert!(id.matches("zlib@1.2.11/pbk5"));
        assert!(!id.matches("zlib@1.2.12"));
    }

    #[test]
    fn test_manifest_requires_absolute_prefixes() {
        assert!(BuildManifest::new("relative/prefix", "/root").is_err());
        assert!(BuildManifest::new("/opt/root/zlib", "root").is_err());

        let mut manifest = BuildManifest::new("/opt/root/zlib", "/opt/root").unwrap();
        manifest.add_link("lib/libz.so").unwrap();
        manifest.add_textfile("bin/zlib-config").unwrap();
        assert!(manifest.add_textfile("../escape").is_err());
        assert_eq!(manifest.original_root(), Path::new("/opt/root"));
    }

    #[test]
    fn test_minimal_manifest_defaults_root_to_prefix() {
        let manifest = BuildManifest::from_toml(
            r#"
original_prefix = "/home/spack/opt/spack/zlib"
relocate_textfiles = ["share/pkgconfig/zlib.pc"]
"#,
        )
        .unwrap();
        assert_eq!(manifest.format_version, MANIFEST_FORMAT_VERSION);
        assert_eq!(
            manifest.original_root(),
            Path::new("/home/spack/opt/spack/zlib")
        );
        assert!(!manifest.relative_rpaths);
        assert!(manifest.relocate_links.is_empty());
        assert_eq!(
            manifest.relocate_textfiles,
            vec![PathBuf::from("share/pkgconfig/zlib.pc")]
        );
    }

    #[test]
    fn test_binaries_are_not_serialized() {
        let mut manifest = BuildManifest::new("/opt/root/zlib", "/opt/root").unwrap();
        manifest.add_binary("lib/libz.so.1").unwrap();
        let toml = manifest.to_toml().unwrap();
        assert!(!toml.contains("libz.so.1"));
        assert!(BuildManifest::from_toml(&toml)
            .unwrap()
            .relocate_binaries
            .is_empty());
    }

    #[test]
    fn test_modes() {
        assert_eq!(OverwriteMode::from_force(true), OverwriteMode::Force);
        assert_eq!(OverwriteMode::from_force(false), OverwriteMode::FailIfExists);
        assert_eq!("Tool".parse::<RewriterKind>().unwrap(), RewriterKind::Tool);
        assert_eq!(RewriterKind::default().to_string(), "native");
        assert!("patchelf".parse::<RewriterKind>().is_err());
    }

    #[test]
    fn test_paths_and_treatment() {
        let paths = ElfPaths::new(
            vec!["/opt/root/zlib/lib".into(), "$ORIGIN".into()],
            Some(DynamicPathTag::Runpath),
        );
        assert_eq!(paths.joined(), "/opt/root/zlib/lib:$ORIGIN");
        assert!(FileTreatment::Binary(ObjectFormat::MachO).is_binary());
        assert!(!FileTreatment::Symlink.is_binary());
        assert_eq!(ObjectFormat::MachO.to_string(), "Mach-O");
    }
}
