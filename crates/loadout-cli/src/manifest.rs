//! Manifest pool commands.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Subcommand;
use console::style;
use loadout_manifest::{ContentManifest, ContentType, ManifestQuery};

use crate::context::AppContext;
use crate::format::format_bytes;

#[derive(Subcommand, Debug)]
pub enum ManifestCommands {
    /// Add manifest JSON files to the pool
    Add {
        #[arg(value_name = "FILE", required = true)]
        files: Vec<PathBuf>,
    },

    /// List manifests in the pool
    List {
        /// Only this content type (e.g. mod, patch, mapPack)
        #[arg(long = "type", value_parser = parse_content_type)]
        content_type: Option<ContentType>,

        /// Only manifests for this game
        #[arg(long)]
        game: Option<String>,

        /// Name contains (case-insensitive)
        #[arg(long)]
        name: Option<String>,
    },

    /// Print a manifest as JSON
    Show {
        #[arg(value_name = "ID")]
        id: String,
    },

    /// Remove a manifest and release its CAS references
    Remove {
        #[arg(value_name = "ID")]
        id: String,
    },
}

pub async fn run(ctx: &AppContext, command: ManifestCommands) -> Result<()> {
    match command {
        ManifestCommands::Add { files } => {
            for path in files {
                let bytes = tokio::fs::read(&path)
                    .await
                    .with_context(|| format!("Failed to read {}", path.display()))?;
                let manifest: ContentManifest = serde_json::from_slice(&bytes)
                    .with_context(|| format!("Invalid manifest {}", path.display()))?;
                let id = manifest.id.clone();

                let missing = ctx.pool.missing_dependencies(&manifest).await?;
                ctx.pool
                    .add_manifest(manifest)
                    .await
                    .with_context(|| format!("Failed to add manifest {id}"))?;
                println!("✅ Added {id}");
                for dep in missing {
                    println!(
                        "   {} missing dependency {} ({})",
                        style("⚠️").yellow(),
                        dep.id,
                        dep.name
                    );
                }
            }
            Ok(())
        }
        ManifestCommands::List {
            content_type,
            game,
            name,
        } => {
            let query = ManifestQuery {
                content_type,
                target_game: game,
                name,
            };
            let manifests = ctx.pool.search(&query).await?;
            if manifests.is_empty() {
                println!("No manifests found.");
                return Ok(());
            }
            for m in manifests {
                println!(
                    "{:<32} {:<10} {:<18} {:>6} files  {}",
                    m.id,
                    m.version,
                    format!("{:?}", m.content_type),
                    m.files.len(),
                    format_bytes(m.total_size())
                );
            }
            Ok(())
        }
        ManifestCommands::Show { id } => {
            let manifest = ctx
                .pool
                .get_manifest(&id)
                .await?
                .with_context(|| format!("No manifest {id}"))?;
            println!("{}", serde_json::to_string_pretty(&manifest)?);
            Ok(())
        }
        ManifestCommands::Remove { id } => {
            if ctx.pool.remove_manifest(&id).await? {
                println!("🗑️  Removed {id}");
            } else {
                println!("No manifest {id}");
            }
            Ok(())
        }
    }
}

/// Accepts the serialized names (`mapPack`) as well as `map-pack`/`map_pack`.
fn parse_content_type(raw: &str) -> Result<ContentType, String> {
    let mut camel = String::new();
    let mut upper = false;
    for c in raw.chars() {
        if c == '-' || c == '_' {
            upper = true;
        } else if upper {
            camel.extend(c.to_uppercase());
            upper = false;
        } else {
            camel.push(c);
        }
    }
    serde_json::from_value(serde_json::Value::String(camel))
        .map_err(|_| format!("unknown content type: {raw}"))
}
