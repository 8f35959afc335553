//! Output rendering and formatting

use bindist_cache::{AvailableSpec, CacheEntry, InstallOutcome};
use bindist_signing::PublicKeyRef;
use comfy_table::{presets::UTF8_FULL, Attribute, Cell, ContentArrangement, Table};
use serde_json::{json, Value};
use std::io;
use std::path::PathBuf;

/// Result of a command, rendered once it completes
#[derive(Debug)]
pub enum CommandOutput {
    Published(CacheEntry),
    Installed(InstallOutcome),
    Available { specs: Vec<AvailableSpec>, full: bool },
    Keys(Vec<(PublicKeyRef, Option<PathBuf>)>),
}

/// Output renderer for CLI results
#[derive(Clone)]
pub struct OutputRenderer {
    json_output: bool,
}

impl OutputRenderer {
    pub fn new(json_output: bool) -> Self {
        Self { json_output }
    }

    /// Render command output to stdout
    pub fn render(&self, output: &CommandOutput) -> io::Result<()> {
        if self.json_output {
            let json = serde_json::to_string_pretty(&to_json(output)?).map_err(io::Error::other)?;
            println!("{json}");
            return Ok(());
        }

        match output {
            CommandOutput::Published(entry) => {
                println!("{}", entry.id.key());
                println!("  blake3: {}", entry.blake3);
                println!(
                    "  built at {} ({} text file(s), {} link(s))",
                    entry.manifest.original_prefix.display(),
                    entry.manifest.relocate_textfiles.len(),
                    entry.manifest.relocate_links.len()
                );
            }
            CommandOutput::Installed(outcome) => {
                println!("{} -> {}", outcome.id, outcome.prefix.display());
                for path in outcome.report.unrelocated() {
                    println!("  not relocated: {}", path.display());
                }
            }
            CommandOutput::Available { specs, full } => {
                if specs.is_empty() {
                    println!("No packages found.");
                } else {
                    println!("{}", spec_table(specs, *full));
                }
            }
            CommandOutput::Keys(keys) => {
                if keys.is_empty() {
                    println!("No keys published.");
                } else {
                    println!("{}", key_table(keys));
                }
            }
        }
        Ok(())
    }
}

fn to_json(output: &CommandOutput) -> io::Result<Value> {
    let value = match output {
        CommandOutput::Published(entry) => serde_json::to_value(entry).map_err(io::Error::other)?,
        CommandOutput::Installed(outcome) => json!({
            "package": outcome.id,
            "mirror": outcome.mirror,
            "prefix": outcome.prefix,
            "relocated": outcome.report.relocated.len(),
            "unrelocated": outcome.report.unrelocated(),
        }),
        CommandOutput::Available { specs, .. } => Value::Array(
            specs
                .iter()
                .map(|spec| {
                    json!({
                        "name": spec.id.name,
                        "version": spec.id.version,
                        "hash": spec.id.dag_hash,
                        "mirror": spec.mirror,
                    })
                })
                .collect(),
        ),
        CommandOutput::Keys(keys) => Value::Array(
            keys.iter()
                .map(|(key, installed)| {
                    json!({
                        "id": key.id,
                        "key": key.data,
                        "installed": installed,
                    })
                })
                .collect(),
        ),
    };
    Ok(value)
}

fn header(names: &[&str]) -> Vec<Cell> {
    names
        .iter()
        .map(|name| Cell::new(name).add_attribute(Attribute::Bold))
        .collect()
}

fn spec_table(specs: &[AvailableSpec], full: bool) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(header(&["Name", "Version", "Hash", "Mirror"]));
    for spec in specs {
        let hash = if full {
            spec.id.dag_hash.as_str()
        } else {
            spec.id.short_hash()
        };
        table.add_row(vec![
            Cell::new(&spec.id.name),
            Cell::new(&spec.id.version),
            Cell::new(hash),
            Cell::new(&spec.mirror),
        ]);
    }
    table
}

fn key_table(keys: &[(PublicKeyRef, Option<PathBuf>)]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(header(&["Id", "Key", "Installed"]));
    for (key, installed) in keys {
        let installed = installed
            .as_ref()
            .map_or_else(|| "-".to_string(), |path| path.display().to_string());
        table.add_row(vec![
            Cell::new(&key.id),
            Cell::new(&key.data),
            Cell::new(installed),
        ]);
    }
    table
}

#[cfg(test)]
mod tests {
    use super::*;
    use bindist_types::PackageId;

    fn spec(name: &str, hash: &str) -> AvailableSpec {
        AvailableSpec {
            mirror: "local".to_string(),
            id: PackageId::new(name, "1.0", hash),
        }
    }

    #[test]
    fn test_spec_table_hash_width() {
        let specs = vec![spec("zlib", "pbk5z4rlwujjvygdhgpvzpitmmvqbyyr")];
        let short = spec_table(&specs, false).to_string();
        assert!(short.contains("pbk5z4r"));
        assert!(!short.contains("pbk5z4rl"));

        let full = spec_table(&specs, true).to_string();
        assert!(full.contains("pbk5z4rlwujjvygdhgpvzpitmmvqbyyr"));
    }

    #[test]
    fn test_available_json() {
        let output = CommandOutput::Available {
            specs: vec![spec("zlib", "abc")],
            full: false,
        };
        let value = to_json(&output).unwrap();
        assert_eq!(value[0]["name"], "zlib");
        assert_eq!(value[0]["hash"], "abc");
        assert_eq!(value[0]["mirror"], "local");
    }
}
