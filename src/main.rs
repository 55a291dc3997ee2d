use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use scraper::Html;
use std::path::PathBuf;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

use timetable_watch::calendar::{Clock, SystemClock};
use timetable_watch::config::AppConfig;
use timetable_watch::models::{EntryCache, LessonSlot, total_lessons};
use timetable_watch::parser::ParserKind;
use timetable_watch::pipeline::{EventBatch, Pipeline};
use timetable_watch::storage::CacheStore;
use timetable_watch::utils::Timer;

#[derive(Parser)]
#[command(name = "timetable-watch", about = "School timetable change watcher", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Command {
    /// Poll the timetable pages and print event batches as JSON lines
    Run,

    /// Run a single parse cycle and print its events
    Once,

    /// Parse a local HTML file and print the entities as JSON
    Parse {
        file: PathBuf,

        /// group-v1, teacher-v1, group-v2 or teacher-v2
        #[arg(short, long, default_value = "group-v2")]
        parser: ParserKind,
    },

    /// Show cache statistics
    Stats,

    /// Print every cached day as a flushCache batch
    Flush,
}

fn print_batch(batch: &EventBatch) -> Result<()> {
    println!("{}", serde_json::to_string(batch).context("Failed to serialize events")?);
    Ok(())
}

fn print_family<L: LessonSlot>(cache: &EntryCache<L>) {
    let days: usize = cache.entities.values().map(|e| e.days.len()).sum();
    let fmt_time = |t: Option<chrono::DateTime<chrono::Utc>>| t.map_or_else(|| "—".to_string(), |t| t.to_rfc3339());

    println!("  {}", L::AUDIENCE.file_stem());
    println!("    Entities : {}", cache.entities.len());
    println!("    Days     : {}", days);
    println!("    Lessons  : {}", total_lessons(&cache.entities));
    println!(
        "    Week     : {}",
        cache
            .last_week_index
            .map_or_else(
                || "—".to_string(),
                |w| format!("{} (academic week {})", w, w.academic_week_number())
            )
    );
    println!("    Updated  : {}", fmt_time(cache.last_update));
    println!("    Changed  : {}", fmt_time(cache.last_changed));
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "timetable_watch=info,warn",
        1 => "timetable_watch=debug,info",
        _ => "trace",
    };

    tracing_subscriber::registry()
        .with(fmt::layer().compact().with_target(false))
        .with(EnvFilter::new(filter))
        .init();

    let config = AppConfig::load()?;

    match cli.command {
        Command::Run => {
            let mut pipeline = Pipeline::from_config(config)?;
            let (tx, mut rx) = mpsc::channel::<EventBatch>(16);

            let printer = tokio::spawn(async move {
                while let Some(batch) = rx.recv().await {
                    if let Err(e) = print_batch(&batch) {
                        warn!("{:#}", e);
                    }
                }
            });

            tokio::select! {
                _ = pipeline.run_loop(tx) => {}
                _ = tokio::signal::ctrl_c() => info!("Interrupted, stopping"),
            }

            printer.await.context("Event printer panicked")?;
        }

        Command::Once => {
            let mut pipeline = Pipeline::from_config(config)?;
            let report = pipeline.run_cycle().await;
            print_batch(&report.events)?;
            if let Some(failure) = report.failure {
                anyhow::bail!("cycle failed: {}", failure.message);
            }
        }

        Command::Parse { file, parser } => {
            let _t = Timer::start(format!("parse {}", file.display()));
            let html = std::fs::read_to_string(&file).with_context(|| format!("Could not read {:?}", file))?;
            let opts = config.parser.parse_options(SystemClock.today());
            let timetable = parser
                .parse(&Html::parse_document(&html), &opts)
                .with_context(|| format!("{} failed on {:?}", parser, file))?;

            info!("Parsed {} entities, {} lessons", timetable.len(), timetable.total_lessons());
            println!("{}", serde_json::to_string_pretty(&timetable)?);
        }

        Command::Stats => {
            let caches = CacheStore::new(&config.storage.cache_dir).load_all()?;
            println!("─────────────────────────────────");
            println!("  Timetable Watch — Cache Stats");
            println!("─────────────────────────────────");
            print_family(&caches.groups);
            print_family(&caches.teachers);
            println!("  team");
            println!("    Names    : {}", caches.team.names.len());
            println!("    Pages    : {}", caches.team.hash.len());
            println!("─────────────────────────────────");
        }

        Command::Flush => {
            let pipeline = Pipeline::from_config(config)?;
            print_batch(&pipeline.flush_all())?;
        }
    }

    Ok(())
}
