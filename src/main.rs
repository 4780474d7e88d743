//! Fuseki: cached Go position analysis on the command line.
//!
//! ## Usage
//!
//! - `fuseki analyze --size 19 "B Q16" "W D4"` - analyze a position
//! - `fuseki build-book --size 9 --depth 6` - grow the opening book
//! - `fuseki merge other.db` - fold another cache into the configured one
//! - `fuseki stats` - show what the cache holds
//! - `fuseki clear --yes` - drop every cached analysis

use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use env_logger::Env;

use fuseki::analysis::{AnalysisRequest, Analyzer};
use fuseki::book::{BookBuilder, BookParams};
use fuseki::cache::PositionCache;
use fuseki::config::Config;
use fuseki::engine::EngineClient;

/// Cached Go position analysis backed by an external KataGo engine
#[derive(Parser)]
#[command(name = "fuseki")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the YAML configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Analyze the position reached by a sequence of moves
    Analyze {
        /// Board size (9, 13 or 19)
        #[arg(short, long, default_value_t = 19)]
        size: u8,
        /// Handicap stones placed before alternation (0-9)
        #[arg(short = 'H', long, default_value_t = 0)]
        handicap: u8,
        /// Komi; defaults to the configured value, or 0.5 with handicap
        #[arg(short, long)]
        komi: Option<f64>,
        /// Visit budget; defaults per board size
        #[arg(long)]
        visits: Option<u32>,
        /// Ignore any cached result and ask the engine again
        #[arg(short, long)]
        refresh: bool,
        /// Print the report as JSON instead of the formatted block
        #[arg(long)]
        json: bool,
        /// Moves as "COLOR VERTEX" pairs, e.g. "B Q16" "W D4"
        moves: Vec<String>,
    },
    /// Grow the opening book breadth-first from the starting position
    BuildBook {
        /// Board size (9, 13 or 19)
        #[arg(short, long, default_value_t = 9)]
        size: u8,
        /// Handicap stones placed before alternation (0-9)
        #[arg(short = 'H', long, default_value_t = 0)]
        handicap: u8,
        /// Komi; defaults to the configured value, or 0.5 with handicap
        #[arg(short, long)]
        komi: Option<f64>,
        /// Visit budget per node; defaults per board size
        #[arg(long)]
        visits: Option<u32>,
        /// Maximum book depth in plies
        #[arg(short, long, default_value_t = 10)]
        depth: u32,
        /// Candidates expanded per node
        #[arg(short, long, default_value_t = 3)]
        branch: usize,
        /// Drop candidates trailing the best winrate by more than this
        #[arg(long, default_value_t = 0.10)]
        prune: f64,
    },
    /// Fold another analysis database into the configured one
    Merge {
        /// Database file to read from
        source: PathBuf,
    },
    /// Show cache statistics
    Stats {
        /// Also break down visit budgets for this board size
        #[arg(short, long)]
        size: Option<u8>,
        /// Komi for the per-budget breakdown
        #[arg(short, long)]
        komi: Option<f64>,
    },
    /// Delete every cached analysis
    Clear {
        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let config = Config::load(&cli.config)
        .with_context(|| format!("loading configuration from {}", cli.config.display()))?;

    if let Some(dir) = config.database.path.parent() {
        if !dir.as_os_str().is_empty() {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("creating database directory {}", dir.display()))?;
        }
    }
    let cache = PositionCache::open(&config.database.path)
        .with_context(|| format!("opening cache {}", config.database.path.display()))?;

    match cli.command {
        Commands::Analyze {
            size,
            handicap,
            komi,
            visits,
            refresh,
            json,
            moves,
        } => {
            if moves.is_empty() && handicap == 0 {
                bail!("nothing to analyze: pass moves or set --handicap");
            }
            let engine = engine_from(&config);
            let analyzer = Analyzer::new(&cache, &engine, config.analyzer_options());
            let result = analyzer.analyze(&AnalysisRequest {
                board_size: size,
                moves,
                handicap,
                komi,
                visits,
                force_refresh: refresh,
            });
            engine.shutdown();
            let report = result?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("{report}");
            }
        }
        Commands::BuildBook {
            size,
            handicap,
            komi,
            visits,
            depth,
            branch,
            prune,
        } => {
            let engine = engine_from(&config);
            let analyzer = Analyzer::new(&cache, &engine, config.analyzer_options());
            let params = BookParams {
                board_size: size,
                komi: komi.unwrap_or(if handicap >= 2 {
                    0.5
                } else {
                    config.analysis.default_komi
                }),
                handicap,
                visits: visits.unwrap_or_else(|| config.visits_for(size)),
                max_depth: depth,
                branch_limit: branch,
                prune_margin: prune,
            };
            let cancel = AtomicBool::new(false);
            let result = BookBuilder::new(&analyzer, params).build(&cancel);
            engine.shutdown();
            let stats = result?;
            println!(
                "book run {}: {} analyzed, {} transpositions, {} enqueued",
                if stats.completed { "complete" } else { "stopped" },
                stats.analyzed,
                stats.transpositions,
                stats.enqueued
            );
        }
        Commands::Merge { source } => {
            let other = PositionCache::open(&source)
                .with_context(|| format!("opening merge source {}", source.display()))?;
            let stats = cache.merge_from(&other)?;
            println!(
                "merged {}: {} inserted, {} merged, {} errors",
                source.display(),
                stats.inserted,
                stats.merged,
                stats.errors
            );
        }
        Commands::Stats { size, komi } => show_stats(&cache, &config, size, komi)?,
        Commands::Clear { yes } => {
            let count = cache.len()?;
            if count == 0 {
                println!("Cache is already empty.");
                return Ok(());
            }
            if !yes && !confirm(&format!("Clear {count} cached entries? [y/N]: "))? {
                println!("Cancelled.");
                return Ok(());
            }
            cache.clear()?;
            println!("Deleted {count} entries.");
        }
    }
    Ok(())
}

fn engine_from(config: &Config) -> EngineClient {
    EngineClient::new(
        config.engine.exe_path.clone(),
        config.engine.model_path.clone(),
        config.engine.config_path.clone(),
    )
}

fn show_stats(
    cache: &PositionCache,
    config: &Config,
    size: Option<u8>,
    komi: Option<f64>,
) -> Result<()> {
    let stats = cache.stats()?;
    println!("{:=<50}", "");
    println!("Cache statistics");
    println!("{:=<50}", "");
    println!("Total entries: {}", stats.total_entries);
    println!("Database: {}", config.database.path.display());
    if !stats.by_size.is_empty() {
        println!("\nBy board size:");
        for (s, count) in &stats.by_size {
            println!("  {s}x{s}: {count}");
        }
    }
    if !stats.by_model.is_empty() {
        println!("\nBy model:");
        for (model, count) in &stats.by_model {
            println!("  {model}: {count}");
        }
    }
    if let Some(size) = size {
        let komi = komi.unwrap_or(config.analysis.default_komi);
        println!("\nBy visit budget ({size}x{size}, komi {komi}):");
        for (visits, count) in cache.visit_counts(size, komi)? {
            println!("  {visits} visits: {count}");
        }
    }
    Ok(())
}

fn confirm(prompt: &str) -> Result<bool> {
    print!("{prompt}");
    std::io::stdout().flush()?;
    let mut line = String::new();
    std::io::stdin().read_line(&mut line)?;
    Ok(line.trim().eq_ignore_ascii_case("y"))
}
