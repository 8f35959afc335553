//! bindist - relocatable binary build cache
//!
//! Packages installed prefixes into signed, relocatable archives on a
//! mirror and installs them under a different root.

mod cli;
mod display;
mod error;
mod events;
mod logging;

use crate::cli::{Cli, Commands};
use crate::display::{CommandOutput, OutputRenderer};
use crate::error::CliError;
use crate::events::EventHandler;
use bindist_cache::{BuildCache, JsonRegistry, LocalMirror};
use bindist_config::{Config, MirrorConfig};
use bindist_events::{EventReceiver, EventSender};
use bindist_platform::RewriterSet;
use bindist_relocate::RelocationEngine;
use bindist_signing::{load_trusted_keys, MinisignSigner};
use bindist_types::{InstallTree, OverwriteMode, PackageId, SigningMode, VerifyMode};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use std::time::Duration;
use tokio::select;
use tracing::{error, info};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let json_mode = cli.global.json;

    init_tracing(json_mode, cli.global.debug);

    if let Err(e) = run(cli).await {
        error!("Application error: {}", e);
        if !json_mode {
            eprintln!("Error: {e}");
        }
        process::exit(1);
    }
}

/// Main application logic
async fn run(cli: Cli) -> Result<(), CliError> {
    info!("Starting bindist v{}", env!("CARGO_PKG_VERSION"));
    cli.command.validate().map_err(CliError::InvalidArguments)?;

    // File config (or defaults), then environment, then CLI flags
    let mut config = Config::load_or_default(cli.global.config.as_deref()).await?;
    config.merge_env()?;
    apply_cli_config(&mut config, &cli.global, &cli.command);

    let (event_sender, event_receiver) = bindist_events::channel();
    let cache = build_cache(&config, event_sender).await?;

    let colors_enabled = console::Term::stderr().features().colors_supported();
    let mut event_handler = EventHandler::new(colors_enabled, cli.global.json);

    let command_name = cli.command.name();
    let output = execute_command_with_events(
        execute_command(cli.command, &cache, &config),
        event_receiver,
        &mut event_handler,
    )
    .await?;

    OutputRenderer::new(cli.global.json).render(&output)?;

    info!(command = command_name, "Command completed successfully");
    Ok(())
}

/// Drive the command while forwarding its events
async fn execute_command_with_events<F>(
    command: F,
    mut event_receiver: EventReceiver,
    event_handler: &mut EventHandler,
) -> Result<CommandOutput, CliError>
where
    F: std::future::Future<Output = Result<CommandOutput, CliError>>,
{
    let mut command_future = Box::pin(command);

    loop {
        select! {
            result = &mut command_future => {
                while let Ok(message) = event_receiver.try_recv() {
                    event_handler.handle_event(message);
                }
                return result;
            }

            message = event_receiver.recv() => {
                match message {
                    Some(message) => event_handler.handle_event(message),
                    None => { /* Channel closed: keep waiting for command to finish */ }
                }
            }
        }
    }
}

/// Execute the specified command
async fn execute_command(
    command: Commands,
    cache: &BuildCache,
    config: &Config,
) -> Result<CommandOutput, CliError> {
    match command {
        Commands::Create {
            prefix,
            root,
            name,
            version,
            hash,
            directory: _,
            force,
            relative,
            unsigned,
        } => {
            let prefix = absolute(&prefix)?;
            let root = match root {
                Some(root) => absolute(&root)?,
                None => prefix
                    .parent()
                    .map(Path::to_path_buf)
                    .ok_or_else(|| {
                        CliError::InvalidArguments(format!(
                            "{} has no parent to use as install root",
                            prefix.display()
                        ))
                    })?,
            };
            let tree = InstallTree::new(PackageId::new(name, version, hash), prefix, root);
            let signing = if unsigned {
                SigningMode::Unsigned
            } else {
                SigningMode::Signed
            };
            let entry = cache.package(&tree, signing, force, relative).await?;
            Ok(CommandOutput::Published(entry))
        }

        Commands::Install {
            query,
            force,
            unsigned,
        } => {
            let verify = if unsigned {
                VerifyMode::Unverified
            } else {
                VerifyMode::Verify
            };
            let overwrite = OverwriteMode::from_force(force);
            let outcome = match config.install.timeout_secs {
                Some(secs) => {
                    cache
                        .install_with_timeout(&query, verify, overwrite, Duration::from_secs(secs))
                        .await?
                }
                None => cache.install(&query, verify, overwrite).await?,
            };
            Ok(CommandOutput::Installed(outcome))
        }

        Commands::List { filter, full } => {
            let specs = cache.list_available(filter.as_deref()).await?;
            Ok(CommandOutput::Available { specs, full })
        }

        Commands::Keys { install, force } => {
            let keys = cache.fetch_keys(install, force).await?;
            Ok(CommandOutput::Keys(keys))
        }
    }
}

/// Assemble the build cache from configuration
async fn build_cache(config: &Config, event_sender: EventSender) -> Result<BuildCache, CliError> {
    let engine = RelocationEngine::new(RewriterSet::for_kind(config.relocation.rewriter))
        .with_max_parallel(config.max_parallel())
        .with_binary_strings(config.relocation.patch_binary_strings);

    let keys_dir = config.keys_dir();
    let mut signer = MinisignSigner::new(load_trusted_keys(&keys_dir).await?)
        .with_trusted_comment(config.signing.trusted_comment.clone());
    if let Some(secret_key) = &config.signing.secret_key {
        let password = config
            .signing
            .password_env
            .as_ref()
            .and_then(|var| std::env::var(var).ok());
        signer = signer.with_secret_key(MinisignSigner::load_secret_key(secret_key, password).await?);
    }

    let registry = Arc::new(JsonRegistry::new(config.registry_path()));
    let mut cache = BuildCache::new(config.store_root(), config.cache_dir(), registry, engine)
        .with_signer(Arc::new(signer))
        .with_keys_dir(keys_dir)
        .with_event_sender(event_sender);
    for mirror in &config.mirrors {
        cache = cache.with_mirror(Arc::new(LocalMirror::new(&mirror.name, &mirror.path)));
    }
    Ok(cache)
}

/// Initialize tracing/logging
fn init_tracing(json_mode: bool, debug_enabled: bool) {
    let default_filter = if debug_enabled {
        "info,bindist=debug"
    } else {
        "warn"
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter));

    if json_mode {
        // JSON mode: structured records on stderr, stdout stays clean for results
        tracing_subscriber::fmt()
            .json()
            .with_writer(std::io::stderr)
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_writer(std::io::stderr)
            .with_target(debug_enabled)
            .with_env_filter(filter)
            .init();
    }
}

/// Apply CLI configuration overrides (highest precedence)
fn apply_cli_config(config: &mut Config, global: &cli::GlobalArgs, command: &Commands) {
    if let Some(root) = &global.store_root {
        config.paths.store_root = Some(root.clone());
    }

    // The first mirror receives published entries
    let mirror = match command {
        Commands::Create {
            directory: Some(directory),
            ..
        } => Some(directory),
        _ => global.mirror.as_ref(),
    };
    if let Some(path) = mirror {
        config.mirrors.retain(|m| m.name != "cli");
        config.mirrors.insert(
            0,
            MirrorConfig {
                name: "cli".to_string(),
                path: path.clone(),
            },
        );
    }
}

fn absolute(path: &Path) -> Result<PathBuf, CliError> {
    Ok(std::path::absolute(path)?)
}
