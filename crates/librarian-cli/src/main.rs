mod commands;
mod logging;
mod progress;

use std::process;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use anyhow::Context;
use clap::{CommandFactory, Parser};
use colored::*;
use commands::{Cli, Commands};
use dotenv::dotenv;
use librarian_core::storage::{Catalog, SearchQuery};
use librarian_core::{LibraryConfig, LibraryEngine, RunReport};
use progress::CliReporter;
use signal_hook::consts::{SIGINT, SIGTERM};
use tracing::{error, info, warn};

fn main() -> anyhow::Result<()> {
    dotenv().ok();

    let _guard = logging::init_logger();

    let config = match librarian_core::config::load_configuration() {
        Ok(config) => config,
        Err(err) => {
            error!("Error loading configuration: {}", err);
            process::exit(1);
        }
    };

    let args = Cli::parse();

    match args.command {
        Some(Commands::Build) => run_library(config, false)?,
        Some(Commands::Resume) => run_library(config, true)?,
        Some(Commands::Search {
            term,
            category,
            exact,
            limit,
        }) => run_search(&config, term, category, exact, limit)?,
        Some(Commands::Categories) => run_categories(&config)?,
        Some(Commands::Status) => run_status(&config)?,
        Some(Commands::PrintConfig) => {
            println!("Configuration: {:#?}", config);
        }
        None => {
            let _ = Cli::command().print_long_help();
        }
    }

    Ok(())
}

/// A second signal while the first is still being honoured exits immediately.
fn install_cancel_flag() -> anyhow::Result<Arc<AtomicBool>> {
    let cancel = Arc::new(AtomicBool::new(false));
    for signal in [SIGINT, SIGTERM] {
        signal_hook::flag::register_conditional_shutdown(signal, 1, Arc::clone(&cancel))
            .context("registering shutdown handler")?;
        signal_hook::flag::register(signal, Arc::clone(&cancel))
            .context("registering cancel handler")?;
    }
    Ok(cancel)
}

fn run_library(config: LibraryConfig, resume: bool) -> anyhow::Result<()> {
    let cancel = install_cancel_flag()?;
    let engine = LibraryEngine::new(config).with_cancel_flag(cancel);
    let reporter = CliReporter::new();

    let report = if resume {
        engine.resume(&reporter)
    } else {
        engine.build(&reporter)
    }
    .context("library run failed")?;

    print_report(&report);
    if report.cancelled {
        warn!("Run was interrupted; `librarian resume` continues where it stopped");
    }
    Ok(())
}

fn print_report(report: &RunReport) {
    println!();
    info!(
        "Scan: {}, Fingerprint: {}, Library: {}",
        format!("{:.2}s", report.scan_duration.as_secs_f64()).green(),
        format!("{:.2}s", report.fingerprint_duration.as_secs_f64()).green(),
        format!("{:.2}s", report.library_duration.as_secs_f64()).green(),
    );
    info!(
        "{} files scanned ({} fingerprints reused), {} failed",
        format!("{}", report.files_scanned).cyan(),
        format!("{}", report.fingerprints_reused).cyan(),
        format!("{}", report.files_failed).red(),
    );
    info!(
        "{} distinct contents, {} redundant copies left in place",
        format!("{}", report.hash_groups).cyan(),
        format!("{}", report.files_redundant).yellow(),
    );
    info!(
        "{} copied ({} bytes), {} adopted, {} already in library, {} catalog rows written",
        format!("{}", report.files_copied).green(),
        report.bytes_copied,
        format!("{}", report.files_adopted).green(),
        report.already_indexed,
        report.entries_indexed,
    );
}

fn open_catalog(config: &LibraryConfig) -> anyhow::Result<Catalog> {
    let path = config.catalog_path();
    Catalog::open_read_only(&path)
        .with_context(|| format!("opening catalog at {}", path.display()))
}

fn run_search(
    config: &LibraryConfig,
    term: String,
    category: Option<String>,
    exact: bool,
    limit: i64,
) -> anyhow::Result<()> {
    let catalog = open_catalog(config)?;
    let query = SearchQuery {
        file_name: (!term.is_empty()).then_some(term),
        category,
        exact,
        limit,
        offset: 0,
    };
    let entries = catalog.search(&query)?;

    if entries.is_empty() {
        println!("{}", "No matching files".yellow());
        return Ok(());
    }
    for entry in &entries {
        println!(
            "{}  {}  {}",
            entry.library_path.green(),
            entry.category.dimmed(),
            entry.content_hash.short().dimmed(),
        );
    }
    println!("{} result(s)", entries.len());
    Ok(())
}

fn run_categories(config: &LibraryConfig) -> anyhow::Result<()> {
    let catalog = open_catalog(config)?;
    for (category, count) in catalog.list_categories()? {
        println!("{:>8}  {}", count, category.cyan());
    }
    Ok(())
}

fn run_status(config: &LibraryConfig) -> anyhow::Result<()> {
    let catalog = open_catalog(config)?;
    println!(
        "{} files, {} bytes, {} redundant sources recorded",
        format!("{}", catalog.entry_count()?).green(),
        catalog.total_bytes()?,
        catalog.redundant_count()?,
    );
    for run in catalog.list_runs(5)? {
        let status = match run.status.as_str() {
            "completed" => run.status.green(),
            "running" | "cancelled" => run.status.yellow(),
            _ => run.status.red(),
        };
        println!(
            "  run {} {} started {} ({} scanned, {} copied, {} redundant, {} failed)",
            run.id,
            status,
            run.started_at,
            run.files_scanned,
            run.files_copied,
            run.files_redundant,
            run.files_failed,
        );
    }
    Ok(())
}
