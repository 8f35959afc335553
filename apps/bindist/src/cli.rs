//! Command line interface definition

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// bindist - relocatable binary build cache
#[derive(Parser)]
#[command(name = "bindist")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Relocatable binary build cache")]
#[command(long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[command(flatten)]
    pub global: GlobalArgs,
}

/// Global arguments available for all commands
#[derive(Parser)]
pub struct GlobalArgs {
    /// Output in JSON format
    #[arg(long, global = true)]
    pub json: bool,

    /// Enable debug logging
    #[arg(long, global = true)]
    pub debug: bool,

    /// Use alternate config file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Mirror directory used ahead of the configured mirrors
    #[arg(long, global = true, value_name = "DIR")]
    pub mirror: Option<PathBuf>,

    /// Install root that package prefixes are created under
    #[arg(long, global = true, value_name = "DIR")]
    pub store_root: Option<PathBuf>,
}

/// Available commands
#[derive(Subcommand)]
pub enum Commands {
    /// Package an installed prefix and publish it to a mirror
    Create {
        /// Installed package prefix
        prefix: PathBuf,

        /// Install root the prefix was built under (default: its parent)
        #[arg(long, value_name = "DIR")]
        root: Option<PathBuf>,

        /// Package name
        #[arg(long)]
        name: String,

        /// Package version
        #[arg(long)]
        version: String,

        /// Dependency hash identifying the concretized package
        #[arg(long)]
        hash: String,

        /// Mirror directory to publish into
        #[arg(short = 'd', long, value_name = "DIR")]
        directory: Option<PathBuf>,

        /// Overwrite an entry already published under the same key
        #[arg(short, long)]
        force: bool,

        /// Make library search paths relative before archiving
        #[arg(short, long)]
        relative: bool,

        /// Publish without a signature
        #[arg(short, long)]
        unsigned: bool,
    },

    /// Install a package from the mirrors
    #[command(alias = "i")]
    Install {
        /// `name`, `name@version`, `/hashprefix` or `name@version/hashprefix`
        query: String,

        /// Replace an existing install of the same package
        #[arg(short, long)]
        force: bool,

        /// Skip signature verification
        #[arg(short, long)]
        unsigned: bool,
    },

    /// List packages available on the mirrors
    #[command(alias = "ls")]
    List {
        /// Only show packages matching this query
        filter: Option<String>,

        /// Show full dependency hashes
        #[arg(short, long)]
        full: bool,
    },

    /// List public keys published on the mirrors
    Keys {
        /// Trust the keys by installing them into the keyring
        #[arg(short, long)]
        install: bool,

        /// Overwrite key files that already exist
        #[arg(short, long)]
        force: bool,
    },
}

impl Commands {
    /// Get command name for logging
    pub fn name(&self) -> &'static str {
        match self {
            Commands::Create { .. } => "create",
            Commands::Install { .. } => "install",
            Commands::List { .. } => "list",
            Commands::Keys { .. } => "keys",
        }
    }

    /// Validate command arguments
    pub fn validate(&self) -> Result<(), String> {
        match self {
            Commands::Create {
                name,
                version,
                hash,
                ..
            } => {
                if name.is_empty() || version.is_empty() || hash.is_empty() {
                    Err("Package name, version and hash must not be empty".to_string())
                } else if name.contains(['/', '@']) {
                    Err(format!("Package name '{name}' must not contain '/' or '@'"))
                } else if !hash.chars().all(|c| c.is_ascii_alphanumeric()) {
                    Err(format!("Hash '{hash}' must be alphanumeric"))
                } else {
                    Ok(())
                }
            }
            Commands::Install { query, .. } if query.trim().is_empty() => {
                Err("No package specified for installation".to_string())
            }
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn test_cli_parsing() {
        let cli = Cli::parse_from(["bindist", "install", "-f", "-u", "zlib@1.2.11"]);
        match cli.command {
            Commands::Install {
                query,
                force,
                unsigned,
            } => {
                assert_eq!(query, "zlib@1.2.11");
                assert!(force);
                assert!(unsigned);
            }
            _ => panic!("Expected Install command"),
        }

        let cli = Cli::parse_from(["bindist", "--json", "--debug", "list", "-f"]);
        assert!(cli.global.json);
        assert!(cli.global.debug);
        assert!(matches!(
            cli.command,
            Commands::List {
                filter: None,
                full: true
            }
        ));
    }

    #[test]
    fn test_create_flags() {
        let cli = Cli::parse_from([
            "bindist",
            "create",
            "/opt/root/zlib",
            "--name",
            "zlib",
            "--version",
            "1.2.11",
            "--hash",
            "pbk5z4r",
            "-d",
            "/srv/mirror",
            "-r",
            "-u",
        ]);
        match &cli.command {
            Commands::Create {
                prefix,
                root,
                directory,
                force,
                relative,
                unsigned,
                ..
            } => {
                assert_eq!(prefix, &PathBuf::from("/opt/root/zlib"));
                assert!(root.is_none());
                assert_eq!(directory.as_deref(), Some(std::path::Path::new("/srv/mirror")));
                assert!(!force);
                assert!(relative);
                assert!(unsigned);
            }
            _ => panic!("Expected Create command"),
        }
        assert_eq!(cli.command.name(), "create");
    }

    #[test]
    fn test_command_aliases() {
        let cli = Cli::parse_from(["bindist", "i", "/abc"]);
        assert!(matches!(cli.command, Commands::Install { .. }));

        let cli = Cli::parse_from(["bindist", "ls"]);
        assert!(matches!(cli.command, Commands::List { .. }));
    }

    #[test]
    fn test_command_validation() {
        let cmd = Commands::Install {
            query: "  ".to_string(),
            force: false,
            unsigned: false,
        };
        assert!(cmd.validate().is_err());

        let create = |name: &str, hash: &str| Commands::Create {
            prefix: PathBuf::from("/p"),
            root: None,
            name: name.to_string(),
            version: "1.0".to_string(),
            hash: hash.to_string(),
            directory: None,
            force: false,
            relative: false,
            unsigned: false,
        };
        assert!(create("zlib", "abc123").validate().is_ok());
        assert!(create("zlib@1", "abc123").validate().is_err());
        assert!(create("zlib", "abc/123").validate().is_err());
        assert!(create("", "abc").validate().is_err());
    }
}
