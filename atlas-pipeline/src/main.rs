//! `atlas` - verify, backtest and inspect trading strategies.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use atlas_backtest::{BacktestEngine, BacktestReport, PriceSeries};
use atlas_common::logging::init_logging;
use atlas_common::util::truncate_with_ellipsis;
use atlas_common::AtlasConfig;
use atlas_pipeline::{seed_strategy, NewStrategy, SqliteStrategyStore, StrategyStatus, StrategyStore};
use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "atlas")]
#[command(version)]
#[command(about = "Walk-forward research for machine-generated trading strategies.", long_about = None)]
struct Cli {
    /// Config file (default: ~/.atlas/config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run policy verification on a strategy script
    Verify {
        /// Strategy script
        file: PathBuf,
    },

    /// Walk-forward backtest a strategy script
    Backtest {
        /// Strategy script
        file: PathBuf,

        /// JSON array of daily OHLCV bars
        #[arg(long)]
        prices: PathBuf,

        /// Print the full result as JSON instead of the text report
        #[arg(long)]
        json: bool,
    },

    /// List the best completed strategies
    Top {
        /// Metric to rank by
        #[arg(long, default_value = "test_sharpe")]
        metric: String,

        /// Number of strategies
        #[arg(short, default_value = "5")]
        k: usize,
    },

    /// Show a strategy and everything derived from it
    Lineage {
        /// Root strategy id
        id: i64,
    },

    /// Strategy counts by status
    Stats,

    /// Store the built-in seed strategy
    Seed,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = AtlasConfig::load_validated(cli.config.as_deref())?;
    init_logging(
        &config.observability.log_level,
        &config.observability.log_format,
    );

    match cli.command {
        Commands::Verify { file } => verify(&config, &file),
        Commands::Backtest { file, prices, json } => backtest(&config, &file, &prices, json).await,
        Commands::Top { metric, k } => top(&open_store(&config)?, &metric, k).await,
        Commands::Lineage { id } => lineage(&open_store(&config)?, id).await,
        Commands::Stats => stats(&open_store(&config)?).await,
        Commands::Seed => {
            let store = open_store(&config)?;
            let draft = seed_strategy();
            let id = store
                .store(
                    NewStrategy::new(draft.code)
                        .with_motivation(draft.motivation)
                        .with_status(StrategyStatus::Seed),
                )
                .await?;
            println!("Stored seed strategy #{id}");
            Ok(())
        }
    }
}

fn open_store(config: &AtlasConfig) -> Result<SqliteStrategyStore> {
    SqliteStrategyStore::open(&config.storage.resolved_path())
}

fn read_script(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))
}

fn verify(config: &AtlasConfig, file: &Path) -> Result<()> {
    let engine = BacktestEngine::new(config)?;
    let verdict = engine.verify(&read_script(file)?);
    if verdict.passed {
        println!("PASSED");
        return Ok(());
    }
    println!("FAILED");
    for violation in verdict.violations_text() {
        println!("  - {violation}");
    }
    bail!("{} violation(s)", verdict.violations.len())
}

async fn backtest(config: &AtlasConfig, file: &Path, prices: &Path, json: bool) -> Result<()> {
    let engine = BacktestEngine::new(config)?;
    let code = read_script(file)?;
    let raw = tokio::fs::read_to_string(prices)
        .await
        .with_context(|| format!("reading {}", prices.display()))?;
    let series = PriceSeries::from_json(&raw)?;

    let result = tokio::task::spawn_blocking(move || engine.run_walk_forward(&code, &series))
        .await
        .context("walk-forward task panicked")??;

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        println!("{}", BacktestReport::generate(&result).text_report);
    }
    Ok(())
}

async fn top(store: &SqliteStrategyStore, metric: &str, k: usize) -> Result<()> {
    let strategies = store.top_k(metric, k).await?;
    if strategies.is_empty() {
        println!("No completed strategies with metric '{metric}'");
        return Ok(());
    }
    println!("{:>6}  {:>4}  {:>10}  motivation", "id", "ver", metric);
    for s in strategies {
        println!(
            "{:>6}  {:>4}  {:>10.4}  {}",
            s.id,
            s.version,
            s.metric(metric).unwrap_or(f64::NAN),
            truncate_with_ellipsis(s.motivation.as_deref().unwrap_or("-"), 60)
        );
    }
    Ok(())
}

async fn lineage(store: &SqliteStrategyStore, id: i64) -> Result<()> {
    let Some(root) = store.get(id).await? else {
        bail!("strategy {id} not found");
    };
    println!("#{} v{} [{}]", root.id, root.version, root.status);
    for s in store.descendants(id).await? {
        let depth = (s.version - root.version).max(1) as usize;
        println!(
            "{}#{} v{} [{}] parent #{}",
            "  ".repeat(depth),
            s.id,
            s.version,
            s.status,
            s.parent_id.unwrap_or_default()
        );
    }
    Ok(())
}

async fn stats(store: &SqliteStrategyStore) -> Result<()> {
    let counts = store.status_counts().await?;
    let total: usize = counts.values().sum();
    let failures: usize = counts
        .iter()
        .filter(|(status, _)| status.is_failure())
        .map(|(_, n)| n)
        .sum();
    for (status, n) in &counts {
        println!("{:<16} {n}", status.as_str());
    }
    println!("{:<16} {total}", "total");
    if total > 0 {
        println!(
            "{:<16} {}",
            "failure rate",
            atlas_common::util::format_percent(failures as f64 / total as f64)
        );
    }
    Ok(())
}
