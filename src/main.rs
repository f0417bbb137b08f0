use anyhow::{Context, Result};
use clap::Parser;
use itertools::Itertools;
use polars::prelude::*;
use scorecard_engine::aggregate::{metric_scores, SummaryRecord};
use scorecard_engine::config::{parse_param, parse_run_date};
use scorecard_engine::engine::{DETAIL_TABLE, SUMMARY_TABLE};
use scorecard_engine::scorecard::{latest_scorecard, score_history};
use scorecard_engine::store::JsonExportWriter;
use scorecard_engine::{
    load_metrics, EngineConfig, FileSnapshotStore, MetricsEngine, ParquetTableWriter, TableWriter,
    TracingNotifier,
};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "scorecard")]
#[command(about = "Evaluate security compliance metrics and update the summary history")]
struct Args {
    /// Root directory of the collected data sets
    #[arg(long)]
    data: Option<PathBuf>,

    /// Directory holding metric_*.yml definitions
    #[arg(long)]
    metrics: Option<PathBuf>,

    /// Detail table output (Parquet)
    #[arg(long)]
    detail: Option<PathBuf>,

    /// Summary snapshot (Parquet), read and rewritten
    #[arg(long)]
    summary: Option<PathBuf>,

    /// Also export the tables as JSON into this directory
    #[arg(long)]
    json_dir: Option<PathBuf>,

    /// Only run the metric with this id or file name
    #[arg(long)]
    metric: Option<String>,

    /// Evaluate and print, but persist nothing and send no alerts
    #[arg(long)]
    dryrun: bool,

    /// Keep resource identifiers and details in the detail table
    #[arg(long)]
    privacy_off: bool,

    /// Run date (YYYY-MM-DD), defaults to today in UTC
    #[arg(long)]
    date: Option<String>,

    /// Template parameter, repeatable
    #[arg(long = "param", value_name = "KEY=VALUE")]
    params: Vec<String>,
}

impl Args {
    fn apply(self, mut config: EngineConfig) -> Result<EngineConfig> {
        if let Some(v) = self.data {
            config.data_root = v;
        }
        if let Some(v) = self.metrics {
            config.metric_dir = v;
        }
        if let Some(v) = self.detail {
            config.detail_path = v;
        }
        if let Some(v) = self.summary {
            config.summary_path = v;
        }
        if let Some(v) = self.json_dir {
            config.json_export_dir = Some(v);
        }
        if let Some(date) = self.date {
            config.run_date = Some(parse_run_date(&date)?);
        }
        for pair in &self.params {
            let (key, value) = parse_param(pair)?;
            config.params.insert(key, value);
        }
        config.metric_filter = self.metric;
        config.dry_run = self.dryrun;
        if self.privacy_off {
            config.privacy = false;
        }
        Ok(config)
    }
}

fn print_scores(detail: &DataFrame) -> Result<()> {
    let scores = metric_scores(detail)?;
    let metric_id = scores.column("metric_id")?.str()?;
    let totalok = scores.column("totalok")?.f64()?;
    let total = scores.column("total")?.i64()?;
    let score = scores.column("score")?.f64()?;

    println!("\n=== Metric scores ===");
    println!("{:<40} {:>10} {:>8} {:>8}", "metric_id", "totalok", "total", "score");
    for i in 0..scores.height() {
        println!(
            "{:<40} {:>10.2} {:>8} {:>8.2}",
            metric_id.get(i).unwrap_or_default(),
            totalok.get(i).unwrap_or(0.0),
            total.get(i).unwrap_or(0),
            score.get(i).unwrap_or(0.0)
        );
    }
    Ok(())
}

fn export_json(dir: &Path, detail: &mut DataFrame, snapshot: &mut DataFrame) -> Result<()> {
    let writer = JsonExportWriter::new(dir);
    writer.write_table(DETAIL_TABLE, detail)?;
    writer.write_table(SUMMARY_TABLE, snapshot)?;

    let records = SummaryRecord::from_frame(snapshot)?;
    let card = serde_json::json!({
        "latest": latest_scorecard(&records),
        "history": score_history(&records),
    });
    fs::write(dir.join("scorecard.json"), serde_json::to_vec_pretty(&card)?)?;
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let config = args.apply(EngineConfig::from_env()?)?;

    info!("Scorecard run for {}", config.datestamp());
    let metrics = load_metrics(&config.metric_dir)?;

    let notifier = TracingNotifier;
    let store = FileSnapshotStore::new(config.summary_path.clone());
    let writer = ParquetTableWriter::new().with_target(DETAIL_TABLE, config.detail_path.clone());
    let engine = MetricsEngine::new(config.clone(), &notifier);

    let mut outcome = engine
        .run(&metrics, &store, &writer)
        .context("metrics run failed")?;

    print_scores(&outcome.detail)?;

    let failed = outcome
        .report
        .metrics
        .iter()
        .filter(|m| m.failed_queries > 0)
        .map(|m| m.metric.as_str())
        .join(", ");
    if !failed.is_empty() {
        println!("\nMetrics with failed queries: {}", failed);
    }

    match &config.json_export_dir {
        Some(dir) if !config.dry_run => {
            export_json(dir, &mut outcome.detail, &mut outcome.snapshot)?;
        }
        _ => {}
    }

    info!(
        "Done: {} detail rows, {} summary rows in history",
        outcome.report.detail_rows, outcome.report.snapshot_rows
    );
    Ok(())
}
