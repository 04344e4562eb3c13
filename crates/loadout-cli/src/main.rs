//! # loadout CLI
//!
//! Command-line front end for the content store and workspace materializer.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use loadout_config::logging::{init_logging, LogLevel};
use loadout_config::Config;

mod cas;
mod context;
mod format;
mod manifest;
mod workspace;

use context::AppContext;

/// Loadout - content-addressable game content store and workspace builder
#[derive(Parser)]
#[command(name = "loadout")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Config file to use instead of ~/.loadout/config.toml and .loadout/config.toml
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Content root override (manifests, workspace metadata, default CAS)
    #[arg(long, global = true, env = "LOADOUT_CONTENT_ROOT", value_name = "DIR")]
    content_root: Option<PathBuf>,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Store files in the CAS and print their hashes
    Store(cas::StoreArgs),

    /// Manage acquired content manifests
    Manifest {
        #[command(subcommand)]
        command: manifest::ManifestCommands,
    },

    /// Build a workspace from manifests
    Prepare(workspace::PrepareArgs),

    /// Estimate a workspace's disk usage without building it
    Estimate(workspace::PrepareArgs),

    /// List prepared workspaces
    Workspaces {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Remove a workspace and release its CAS references
    Cleanup {
        #[arg(value_name = "ID")]
        id: String,
    },

    /// Garbage-collect unreferenced CAS objects
    Gc(cas::GcArgs),

    /// Re-hash every CAS object and report corruption
    Verify,

    /// Run CAS maintenance once, or periodically with --watch
    Maintain {
        /// Keep running until interrupted
        #[arg(long)]
        watch: bool,
    },

    /// Show or initialize configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Print the effective configuration
    Show,
    /// Write a default config file
    Init {
        /// Write to ~/.loadout/config.toml instead of .loadout/config.toml
        #[arg(long)]
        global: bool,
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(LogLevel::from_verbosity(cli.verbose));

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    rt.block_on(async_main(cli))
}

async fn async_main(cli: Cli) -> Result<()> {
    let mut config = match &cli.config {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => loadout_config::config().clone(),
    };
    if let Some(root) = cli.content_root {
        config.storage.content_root = loadout_config::path::expand_tilde(&root);
    }

    if let Commands::Config { command } = cli.command {
        return run_config(command, &config);
    }

    let ctx = AppContext::open(config)?;
    match cli.command {
        Commands::Store(args) => cas::store(&ctx, args).await,
        Commands::Manifest { command } => manifest::run(&ctx, command).await,
        Commands::Prepare(args) => workspace::prepare(&ctx, args).await,
        Commands::Estimate(args) => workspace::estimate(&ctx, args).await,
        Commands::Workspaces { json } => workspace::list(&ctx, json).await,
        Commands::Cleanup { id } => workspace::cleanup(&ctx, &id).await,
        Commands::Gc(args) => cas::gc(&ctx, args).await,
        Commands::Verify => cas::verify(&ctx).await,
        Commands::Maintain { watch } => cas::maintain(&ctx, watch).await,
        Commands::Config { .. } => Ok(()),
    }
}

fn run_config(command: ConfigCommands, config: &Config) -> Result<()> {
    match command {
        ConfigCommands::Show => {
            let toml = config
                .to_toml()
                .context("Failed to serialize configuration")?;
            print!("{toml}");
            Ok(())
        }
        ConfigCommands::Init { global, force } => {
            let path = if global {
                Config::global_config_path().context("Cannot determine home directory")?
            } else {
                Config::project_config_path()
            };
            if path.exists() && !force {
                anyhow::bail!(
                    "{} already exists (use --force to overwrite)",
                    path.display()
                );
            }
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
            std::fs::write(&path, Config::default_toml()?)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            println!("✅ Wrote {}", path.display());
            Ok(())
        }
    }
}
