//! Integration tests for config

#[cfg(test)]
mod tests {
    use bindist_config::*;
    use bindist_types::RewriterKind;
    use std::io::Write;
    use std::path::PathBuf;
    use std::sync::Mutex;
    use tempfile::NamedTempFile;

    // Env var tests must not run concurrently
    static ENV_TEST_MUTEX: Mutex<()> = Mutex::new(());

    const ENV_VARS: &[&str] = &[
        "BINDIST_STORE_ROOT",
        "BINDIST_CACHE_DIR",
        "BINDIST_MIRROR",
        "BINDIST_SECRET_KEY",
        "BINDIST_INSTALL_TIMEOUT",
        "BINDIST_REWRITER",
        "BINDIST_MAX_PARALLEL",
    ];

    fn clear_env() {
        for var in ENV_VARS {
            std::env::remove_var(var);
        }
    }

    #[tokio::test]
    async fn test_load_config_from_file() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(
            temp_file,
            r#"
[paths]
store_root = "/opt/spack"

[signing]
secret_key = "/etc/bindist/build.key"

[relocation]
rewriter = "tool"
max_parallel = 3
patch_binary_strings = true

[install]
timeout_secs = 600

[[mirrors]]
name = "local"
path = "/srv/mirror"
        "#
        )
        .unwrap();

        let config = Config::load_from_file(temp_file.path()).await.unwrap();
        assert_eq!(config.store_root(), PathBuf::from("/opt/spack"));
        assert_eq!(
            config.signing.secret_key,
            Some(PathBuf::from("/etc/bindist/build.key"))
        );
        assert_eq!(config.relocation.rewriter, RewriterKind::Tool);
        assert_eq!(config.max_parallel(), 3);
        assert!(config.relocation.patch_binary_strings);
        assert_eq!(config.install.timeout_secs, Some(600));
        assert_eq!(
            config.mirror("local").map(|m| m.path.clone()),
            Some(PathBuf::from("/srv/mirror"))
        );
    }

    #[tokio::test]
    async fn test_missing_file_is_not_found() {
        let err = Config::load_from_file(std::path::Path::new("/nonexistent/bindist.toml"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[tokio::test]
    async fn test_invalid_toml_is_parse_error() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(temp_file, "[relocation\nrewriter = ").unwrap();
        assert!(Config::load_from_file(temp_file.path()).await.is_err());
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.relocation.rewriter, RewriterKind::Native);
        assert!(config.max_parallel() >= 1);
        assert!(config.mirrors.is_empty());
        assert!(config.install.timeout_secs.is_none());
    }

    #[test]
    fn test_merge_env() {
        let _guard = ENV_TEST_MUTEX.lock().unwrap();
        clear_env();

        std::env::set_var("BINDIST_STORE_ROOT", "/tmp/store");
        std::env::set_var("BINDIST_MIRROR", "/tmp/mirror");
        std::env::set_var("BINDIST_INSTALL_TIMEOUT", "30");
        std::env::set_var("BINDIST_REWRITER", "tool");

        let mut config = Config {
            mirrors: vec![MirrorConfig {
                name: "site".into(),
                path: PathBuf::from("/srv/site"),
            }],
            ..Config::default()
        };
        config.merge_env().unwrap();

        assert_eq!(config.store_root(), PathBuf::from("/tmp/store"));
        assert_eq!(config.mirrors[0].name, "env");
        assert_eq!(config.mirrors[0].path, PathBuf::from("/tmp/mirror"));
        assert_eq!(config.mirrors.len(), 2);
        assert_eq!(config.install.timeout_secs, Some(30));
        assert_eq!(config.relocation.rewriter, RewriterKind::Tool);

        clear_env();
    }

    #[test]
    fn test_merge_env_rejects_bad_values() {
        let _guard = ENV_TEST_MUTEX.lock().unwrap();
        clear_env();

        std::env::set_var("BINDIST_INSTALL_TIMEOUT", "soon");
        let mut config = Config::default();
        assert!(config.merge_env().is_err());
        clear_env();

        std::env::set_var("BINDIST_REWRITER", "magic");
        let mut config = Config::default();
        assert!(config.merge_env().is_err());
        clear_env();
    }
}
