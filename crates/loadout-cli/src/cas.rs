//! CAS commands: store, gc, verify, maintain.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use console::style;
use loadout_cas::{CasMaintenanceService, GarbageCollector, GcStats};
use tokio_util::sync::CancellationToken;

use crate::context::AppContext;
use crate::format::{format_bytes, format_number, short_hash};

#[derive(Args, Debug)]
pub struct StoreArgs {
    /// Files to store
    #[arg(value_name = "FILE", required = true)]
    files: Vec<PathBuf>,

    /// Expected SHA-256 (only with a single file); the store fails on mismatch
    #[arg(long)]
    hash: Option<String>,
}

pub async fn store(ctx: &AppContext, args: StoreArgs) -> Result<()> {
    if args.hash.is_some() && args.files.len() != 1 {
        anyhow::bail!("--hash can only be used with a single file");
    }
    for file in &args.files {
        let (hash, _) = ctx
            .storage
            .store_file(file, args.hash.as_deref())
            .await
            .with_context(|| format!("Failed to store {}", file.display()))?;
        println!("{hash}  {}", file.display());
    }
    Ok(())
}

#[derive(Args, Debug)]
pub struct GcArgs {
    /// Actually delete objects (default is dry-run)
    #[arg(long)]
    delete: bool,

    /// Ignore the grace period and consider every unreferenced object
    #[arg(long)]
    immediate: bool,
}

pub async fn gc(ctx: &AppContext, args: GcArgs) -> Result<()> {
    println!();
    println!("  Loadout Garbage Collection");
    println!("  ==========================");

    let gc = GarbageCollector::new(
        Arc::clone(&ctx.storage),
        Arc::clone(&ctx.tracker),
        ctx.config.cas.gc_grace_period(),
    );
    let stats = if args.delete {
        gc.collect(args.immediate).await
    } else {
        gc.dry_run(args.immediate).await
    }
    .context("Garbage collection failed")?;

    print_gc_stats(&stats);

    println!();
    if stats.dry_run {
        println!("  📋 Dry run complete. Use --delete to remove unreferenced objects.");
    } else if stats.deleted == 0 {
        println!("  ✨ No unreferenced objects to delete!");
    } else {
        println!(
            "  ✅ Deleted: {} objects ({})",
            format_number(stats.deleted),
            format_bytes(stats.bytes_freed)
        );
    }
    println!();
    Ok(())
}

fn print_gc_stats(stats: &GcStats) {
    println!();
    println!("  CAS Statistics:");
    println!("    📦 Scanned:       {}", format_number(stats.scanned));
    println!("    ✅ Referenced:    {}", format_number(stats.referenced));
    println!(
        "    🗑️  Unreferenced:  {} ({})",
        format_number(stats.deleted),
        format_bytes(stats.bytes_freed)
    );
    if stats.skipped_grace_period > 0 {
        println!(
            "    ⏳ In grace period: {}",
            format_number(stats.skipped_grace_period)
        );
    }
    if stats.failures > 0 {
        println!(
            "    {} Failed deletions: {}",
            style("❌").red(),
            format_number(stats.failures)
        );
    }
}

pub async fn verify(ctx: &AppContext) -> Result<()> {
    let report = loadout_cas::validate_integrity(&ctx.storage)
        .await
        .context("Integrity audit failed")?;

    println!(
        "Checked {} objects in {:.1}s",
        format_number(report.checked),
        report.elapsed.as_secs_f64()
    );
    for corrupt in &report.corrupted {
        println!(
            "  {} {} (content hashes to {})",
            style("corrupt").red().bold(),
            corrupt.hash,
            short_hash(&corrupt.actual)
        );
    }
    for hash in &report.unreadable {
        println!("  {} {}", style("unreadable").yellow(), hash);
    }

    if report.is_clean() {
        println!("{}", style("✅ CAS is consistent").green());
        Ok(())
    } else {
        anyhow::bail!(
            "{} corrupt and {} unreadable objects",
            report.corrupted.len(),
            report.unreadable.len()
        )
    }
}

pub async fn maintain(ctx: &AppContext, watch: bool) -> Result<()> {
    let service = Arc::new(CasMaintenanceService::new(
        Arc::clone(&ctx.storage),
        Arc::clone(&ctx.tracker),
        &ctx.config.cas,
    ));

    if !watch {
        let report = service.run_once().await;
        println!("Purged {} stale temp files", report.temp_files_purged);
        match &report.gc {
            Some(stats) => print_gc_stats(stats),
            None => println!("Garbage collection skipped"),
        }
        match &report.integrity {
            Some(integrity) if integrity.is_clean() => {
                println!("Integrity audit: {} objects clean", format_number(integrity.checked))
            }
            Some(integrity) => println!(
                "Integrity audit: {} corrupt objects",
                integrity.corrupted.len()
            ),
            None => println!("Integrity audit not due"),
        }
        return Ok(());
    }

    let cancel = CancellationToken::new();
    let handle = Arc::clone(&service).spawn(cancel.clone());
    println!(
        "Running maintenance every {} minutes. Press Ctrl+C to stop.",
        ctx.config.cas.maintenance_interval_minutes
    );
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl+C")?;
    cancel.cancel();
    handle.await.context("Maintenance task panicked")?;
    Ok(())
}
