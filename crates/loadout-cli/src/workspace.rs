//! Workspace commands: prepare, estimate, list, cleanup.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use loadout_config::{log_cli_debug, ConfigurationProvider};
use loadout_manifest::WorkspaceStrategy;
use loadout_workspace::{ChannelProgress, IssueSeverity, WorkspaceConfiguration, WorkspaceInfo};
use tokio_util::sync::CancellationToken;

use crate::context::AppContext;
use crate::format::{format_bytes, format_number};

#[derive(Args, Debug)]
pub struct PrepareArgs {
    /// Workspace id (also its directory name)
    #[arg(value_name = "ID")]
    id: String,

    /// Manifest ids from the pool, applied in order
    #[arg(short, long = "manifest", value_name = "MANIFEST", required = true)]
    manifests: Vec<String>,

    /// Base game installation directory
    #[arg(long, value_name = "DIR")]
    base: PathBuf,

    /// full-copy, symlink-only, hybrid-copy-symlink, full-symlink or hard-link
    #[arg(short, long)]
    strategy: Option<WorkspaceStrategy>,

    /// Workspace root override
    #[arg(long, value_name = "DIR")]
    root: Option<PathBuf>,

    /// Delete an existing workspace directory first
    #[arg(long)]
    force: bool,

    /// Check the finished workspace
    #[arg(long)]
    validate: bool,
}

async fn build_configuration(ctx: &AppContext, args: &PrepareArgs) -> Result<WorkspaceConfiguration> {
    let strategy = args
        .strategy
        .unwrap_or_else(|| ctx.config.default_strategy());
    let root = args
        .root
        .clone()
        .unwrap_or_else(|| ctx.config.workspace_root());

    let mut config = WorkspaceConfiguration::new(&args.id, strategy, &args.base, root)
        .force_recreate(args.force)
        .validate_after_preparation(args.validate);

    for id in &args.manifests {
        let manifest = ctx
            .pool
            .get_manifest(id)
            .await?
            .with_context(|| format!("Manifest {id} is not in the pool"))?;
        for dep in ctx.pool.missing_dependencies(&manifest).await? {
            if !args.manifests.contains(&dep.id) {
                eprintln!(
                    "{} {} depends on {} which is not available",
                    style("⚠️").yellow(),
                    id,
                    dep.id
                );
            }
        }
        config = config.with_manifest(manifest);
    }
    log_cli_debug!("Workspace configuration built", id = %config.id, strategy = %config.strategy, manifests = config.manifests.len());
    Ok(config)
}

pub async fn prepare(ctx: &AppContext, args: PrepareArgs) -> Result<()> {
    let config = build_configuration(ctx, &args).await?;

    let pb = ProgressBar::new(0);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.cyan} [{bar:30.cyan/blue}] {pos}/{len} {msg}")
            .context("Invalid progress template")?
            .progress_chars("=> "),
    );
    pb.enable_steady_tick(Duration::from_millis(100));
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<loadout_workspace::WorkspaceProgress>();
    let bar = pb.clone();
    let render = tokio::spawn(async move {
        while let Some(p) = rx.recv().await {
            bar.set_length(p.total);
            bar.set_position(p.processed);
            bar.set_message(format!("{} {}", p.operation, p.current_file));
        }
    });
    let reporter = ChannelProgress(tx);

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    let ctrl_c = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            interrupt.cancel();
        }
    });

    let result = ctx
        .workspaces
        .prepare_workspace(&config, &reporter, &cancel)
        .await;
    ctrl_c.abort();
    drop(reporter);
    let _ = render.await;
    pb.finish_and_clear();

    let info = result.with_context(|| format!("Failed to prepare workspace {}", config.id))?;
    print_info(&info);
    if !info.success {
        anyhow::bail!("Workspace {} could not be prepared", info.id);
    }
    Ok(())
}

pub async fn estimate(ctx: &AppContext, args: PrepareArgs) -> Result<()> {
    let config = build_configuration(ctx, &args).await?;
    let bytes = ctx.workspaces.estimate_disk_usage(&config)?;
    println!(
        "{} ({}) with {}",
        format_bytes(bytes),
        format_number(bytes),
        config.strategy
    );
    Ok(())
}

pub async fn list(ctx: &AppContext, json: bool) -> Result<()> {
    let workspaces = ctx.workspaces.get_all_workspaces().await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&workspaces)?);
        return Ok(());
    }
    if workspaces.is_empty() {
        println!("No workspaces.");
        return Ok(());
    }
    for ws in workspaces {
        println!(
            "{:<24} {:<20} {:>7} files {:>12}  {}",
            ws.id,
            ws.strategy.as_str(),
            format_number(ws.file_count),
            format_bytes(ws.total_size_bytes),
            ws.workspace_path.display()
        );
    }
    Ok(())
}

pub async fn cleanup(ctx: &AppContext, id: &str) -> Result<()> {
    if ctx
        .workspaces
        .cleanup_workspace(id)
        .await
        .with_context(|| format!("Failed to clean up workspace {id}"))?
    {
        println!("🗑️  Removed workspace {id}");
    } else {
        println!("No workspace {id}");
    }
    Ok(())
}

fn print_info(info: &WorkspaceInfo) {
    if info.success {
        println!(
            "{} Workspace {} ready: {} files, {}",
            style("✅").green(),
            style(&info.id).bold(),
            format_number(info.file_count),
            format_bytes(info.total_size_bytes)
        );
        println!("   📁 {}", info.workspace_path.display());
        if let Some(exe) = &info.executable_path {
            println!("   🎮 {}", exe.display());
        }
    } else {
        println!(
            "{} Workspace {} failed",
            style("❌").red(),
            style(&info.id).bold()
        );
    }
    for issue in &info.validation_issues {
        let tag = match issue.severity {
            IssueSeverity::Error => style("error").red().bold(),
            IssueSeverity::Warning => style("warning").yellow(),
            IssueSeverity::Info => style("info").dim(),
        };
        match &issue.path {
            Some(path) => println!("   {tag}: {} ({path})", issue.message),
            None => println!("   {tag}: {}", issue.message),
        }
    }
}
