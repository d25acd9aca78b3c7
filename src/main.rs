mod config;
mod db;
mod logging;
mod pipeline;
mod schedule;
mod sink;
mod source;
#[cfg(test)]
mod testing;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Instant;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::{error, info};

use crate::config::RunOptions;
use crate::db::SqliteSink;
use crate::pipeline::filters::FilterLists;
use crate::pipeline::{FilterLoader, Pipeline, RunSummary};
use crate::schedule::format_duration;
use crate::sink::{ResultSink, PARTS_ROOT};

#[derive(Parser)]
#[command(name = "parts_collector", about = "Storefront product listing collector")]
struct Cli {
    /// Run options file (JSON, TOML or YAML)
    #[arg(long, global = true, default_value = "config/config.json")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Collect every configured storefront once
    Run,
    /// Collect on a daily schedule
    Daemon,
    /// Validate site definitions and filter lists, then print the walk plan
    Sites,
    /// Show stored entry counts per device and version
    Stats,
    /// Print the stored JSON at a path (e.g. parts/phone-gen1)
    Show {
        #[arg(default_value = PARTS_ROOT)]
        path: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    let options = RunOptions::load(&cli.config)?;
    let _guard = logging::init(&options)?;

    let t0 = Instant::now();
    let result = match cli.command {
        Commands::Run => collect(&options).await.map(|summary| print_summary(&summary)),
        Commands::Daemon => {
            let opts = &options;
            schedule::run_daily(opts, move || async move { collect(opts).await.map(|_| ()) }).await
        }
        Commands::Sites => show_plan(&options),
        Commands::Stats => show_stats(&options).await,
        Commands::Show { path } => show_path(&options, &path).await,
    };

    let code = report(&result);

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }

    Ok(code)
}

/// Log a failed command once and turn it into the process exit status.
fn report(result: &Result<()>) -> ExitCode {
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

/// One collection pass: clear stale data, walk every site, persist as we go.
async fn collect(options: &RunOptions) -> Result<RunSummary> {
    info!("Beginning data collection...");
    let sites = config::load_sites(&options.sites_path)?;
    let source = source::from_renderer(options.renderer)?;

    let filters_path = options.filters_path.clone();
    let loader: FilterLoader = Box::new(move || FilterLists::load(&filters_path));
    let pipeline = Pipeline::new(source.as_ref(), loader);

    let start = Instant::now();
    let summary = if options.update_database {
        let sink = SqliteSink::open(&options.database_path)?;
        let cleared = sink.delete_subtree(PARTS_ROOT).await?;
        info!("Cleared {} stored nodes under {}", cleared, PARTS_ROOT);
        pipeline.with_sink(&sink).run(&sites).await?
    } else {
        pipeline.run(&sites).await?
    };

    info!("Time Elapsed: {}", format_duration(start.elapsed()));
    info!("Total Entries: {}", summary.accepted);
    Ok(summary)
}

fn print_summary(s: &RunSummary) {
    println!(
        "Accepted {} entries ({} persisted) over {} walks.",
        s.accepted, s.persisted, s.walks
    );
    println!(
        "Pages: {} visited, {} failed.",
        s.pages_visited, s.pages_failed
    );
    println!(
        "Rejected: {} no link, {} duplicate, {} blacklisted, {} not whitelisted.",
        s.no_link, s.duplicates, s.blacklisted, s.not_whitelisted
    );
}

fn show_plan(options: &RunOptions) -> Result<()> {
    let sites = config::load_sites(&options.sites_path)?;
    let filters = FilterLists::load(&options.filters_path)?;
    let plan = pipeline::plan(&sites);

    println!(
        "{:>3} | {:<20} | {:<12} | {:<12} | {:<5} | {:<48}",
        "#", "Storefront", "Device", "Version", "Pages", "URL"
    );
    println!("{}", "-".repeat(113));
    for (i, (site, device, version)) in plan.iter().enumerate() {
        let pages = if site.pagination().is_some() { "multi" } else { "one" };
        println!(
            "{:>3} | {:<20} | {:<12} | {:<12} | {:<5} | {:<48}",
            i + 1,
            truncate(&site.storefront, 20),
            truncate(&device.name, 12),
            truncate(&version.name, 12),
            pages,
            truncate(&site.url_for(device, version), 48)
        );
    }

    println!(
        "\n{} walks | {} blacklist, {} whitelist keywords, {} categories",
        plan.len(),
        filters.blacklist.len(),
        filters.whitelist.len(),
        filters.categories.len()
    );
    Ok(())
}

async fn show_stats(options: &RunOptions) -> Result<()> {
    let sink = SqliteSink::open(&options.database_path)?;
    let paths = sink.paths(PARTS_ROOT).await?;
    if paths.is_empty() {
        println!("No stored entries. Run 'run' first.");
        return Ok(());
    }

    let mut per_combo: BTreeMap<&str, usize> = BTreeMap::new();
    for path in &paths {
        let combo = path.split('/').nth(1).unwrap_or("-");
        *per_combo.entry(combo).or_default() += 1;
    }
    for (combo, categories) in &per_combo {
        println!("{:<32} {:>4} categories", combo, categories);
    }
    println!("\n{} stored paths", paths.len());
    Ok(())
}

async fn show_path(options: &RunOptions, path: &str) -> Result<()> {
    let sink = SqliteSink::open(&options.database_path)?;
    match sink.get(path).await? {
        Some(value) => println!("{}", serde_json::to_string_pretty(&value)?),
        None => println!("Nothing stored at {}", path),
    }
    Ok(())
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", cut)
    }
}
