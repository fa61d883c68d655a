//! InsightForge — batch customer DNA / NES segmentation pipeline.
//!
//! Loads transaction rows (JSON lines, or a synthesized demo population),
//! runs one cohort analysis end to end, and prints the run report.

mod demo;

use std::io::BufRead;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use chrono::{DateTime, Utc};
use clap::Parser;
use insight_core::config::AppConfig;
use insight_core::types::{ClassificationMode, TimeGranularity, Transaction, TrendFilter};
use insight_pipeline::{CohortJob, DnaPipeline};
use insight_store::{MemoryStore, TransactionQuery};
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "insight-forge")]
#[command(about = "Batch customer DNA / NES segmentation pipeline")]
#[command(version)]
struct Cli {
    /// JSON-lines file of transaction rows; omitted → demo population
    #[arg(long)]
    input: Option<PathBuf>,

    /// Source/cohort key the rows are analyzed under
    #[arg(long, env = "INSIGHT_FORGE__SOURCE", default_value = "all")]
    source: String,

    /// Classification mode: recency_threshold or nes_ratio_breaks
    #[arg(long, default_value = "nes_ratio_breaks")]
    mode: ClassificationMode,

    /// Trend bucket granularity: day or month
    #[arg(long, default_value = "month")]
    granularity: TimeGranularity,

    /// Analysis reference time (RFC 3339); defaults to now
    #[arg(long)]
    reference_time: Option<DateTime<Utc>>,

    /// Extra trend slice restricted to this state
    #[arg(long)]
    state: Option<String>,

    /// Extra trend slice restricted to this product line
    #[arg(long)]
    product_line: Option<String>,

    /// Demo population size when no input file is given
    #[arg(long, default_value_t = 200)]
    demo_customers: usize,

    /// Demo population RNG seed
    #[arg(long, default_value_t = 7)]
    demo_seed: u64,

    /// Pretty-print the run report
    #[arg(long, default_value_t = false)]
    pretty: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "insight_forge=info,insight_pipeline=info".into()),
        )
        .json()
        .init();

    let cli = Cli::parse();

    info!("InsightForge starting up");

    let config = AppConfig::load().unwrap_or_else(|e| {
        warn!(error = %e, "Failed to load config, using defaults");
        AppConfig::default()
    });

    let rows = match &cli.input {
        Some(path) => read_jsonl(path)?,
        None => {
            info!(
                customers = cli.demo_customers,
                seed = cli.demo_seed,
                "no input file, synthesizing demo population"
            );
            demo::generate(cli.demo_customers, cli.demo_seed, &cli.source)
        }
    };

    info!(source = %cli.source, rows = rows.len(), "transactions loaded");

    let store = Arc::new(MemoryStore::new());
    store.load_transactions(&cli.source, rows);

    let mut trend_filters = Vec::new();
    if cli.state.is_some() || cli.product_line.is_some() {
        trend_filters.push(TrendFilter {
            state: cli.state.clone(),
            product_line: cli.product_line.clone(),
            ..Default::default()
        });
    }

    let job = CohortJob {
        cohort_key: cli.source.clone(),
        query: TransactionQuery {
            source: Some(cli.source.clone()),
            ..Default::default()
        },
        mode: cli.mode,
        granularity: cli.granularity,
        trend_filters,
        reference_time: cli.reference_time,
    };

    let pipeline = Arc::new(DnaPipeline::new(store.clone(), store, config));
    let report = pipeline
        .run_cohorts(vec![job])
        .await
        .into_iter()
        .next()
        .context("pipeline produced no report")??;

    let rendered = if cli.pretty {
        serde_json::to_string_pretty(&report)?
    } else {
        serde_json::to_string(&report)?
    };
    println!("{rendered}");

    Ok(())
}

fn read_jsonl(path: &PathBuf) -> anyhow::Result<Vec<Transaction>> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("cannot open input file {}", path.display()))?;
    let reader = std::io::BufReader::new(file);

    let mut rows = Vec::new();
    for (line_no, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let tx: Transaction = serde_json::from_str(&line)
            .with_context(|| format!("invalid transaction on line {}", line_no + 1))?;
        rows.push(tx);
    }
    Ok(rows)
}
