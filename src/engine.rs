//! Metrics engine
//!
//! Drives a run end to end: every metric definition is rendered, executed and
//! validated in catalogue order, the detail rows are aggregated into summary
//! rows, and those are merged into the persisted snapshot.
//!
//! Failures scoped to one query or one metric are logged, counted in the
//! [`RunReport`] and skipped. Only an empty detail table, an unreadable snapshot
//! or a storage failure ends the run with an error.

use crate::aggregate;
use crate::config::EngineConfig;
use crate::error::{Result, ScoreError};
use crate::metadata::MetricDefinition;
use crate::notify::{Notifier, Severity};
use crate::renderer::QueryRenderer;
use crate::resolver::DataSetRegistry;
use crate::snapshot::{self, MergeOutcome};
use crate::sql_engine::SqlEngine;
use crate::store::{decode_parquet, encode_parquet, SnapshotStore, TableWriter};
use crate::validation::{MetricMetadata, ResultValidator};
use polars::prelude::*;
use serde::Serialize;
use tracing::{debug, error, info, warn};

/// Table name the detail rows are written under.
pub const DETAIL_TABLE: &str = "detail";
pub const SUMMARY_TABLE: &str = "summary";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum MetricOutcome {
    Evaluated { rows: usize },
    Disabled,
    NoQuery,
    /// Not selected by the metric filter.
    Filtered,
    Discarded { reason: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricReport {
    pub metric: String,
    pub outcome: MetricOutcome,
    pub failed_queries: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RunReport {
    pub datestamp: String,
    pub metrics: Vec<MetricReport>,
    pub failed_queries: usize,
    pub detail_rows: usize,
    pub summary_rows: usize,
    pub snapshot_rows: usize,
    pub replaced_rows: usize,
}

impl RunReport {
    pub fn outcome(&self, metric: &str) -> Option<&MetricOutcome> {
        self.metrics
            .iter()
            .find(|m| m.metric == metric)
            .map(|m| &m.outcome)
    }
}

/// Detail rows of every evaluated metric.
#[derive(Debug, Clone)]
pub struct Evaluation {
    pub detail: DataFrame,
    pub report: RunReport,
}

#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub report: RunReport,
    pub detail: DataFrame,
    /// Summary rows computed by this run alone.
    pub summary: DataFrame,
    /// Full post-merge history.
    pub snapshot: DataFrame,
}

pub struct MetricsEngine<'a> {
    config: EngineConfig,
    executor: SqlEngine,
    notifier: &'a dyn Notifier,
}

impl<'a> MetricsEngine<'a> {
    pub fn new(config: EngineConfig, notifier: &'a dyn Notifier) -> Self {
        let executor = SqlEngine::new(DataSetRegistry::new(config.data_root.clone()));
        Self {
            config,
            executor,
            notifier,
        }
    }

    /// Use a custom registry, e.g. one with extra column type hints.
    pub fn with_registry(mut self, registry: DataSetRegistry) -> Self {
        self.executor = SqlEngine::new(registry);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn alert(&self, severity: Severity, message: &str) {
        if self.config.alerts_enabled() {
            self.notifier.notify(severity, message);
        } else {
            debug!(%severity, "Alert suppressed: {}", message);
        }
    }

    fn renderer(&self) -> QueryRenderer {
        let mut params = self.config.params.clone();
        params.insert(
            "datestamp".to_string(),
            self.config.datestamp().format("%Y-%m-%d").to_string(),
        );
        QueryRenderer::new(params)
    }

    /// Evaluate every metric and collect the detail rows, in processing order.
    pub fn evaluate(&self, metrics: &[MetricDefinition]) -> Result<Evaluation> {
        let datestamp = self.config.datestamp();
        let validator = ResultValidator::new(datestamp, self.config.privacy);
        let renderer = self.renderer();

        let mut report = RunReport {
            datestamp: datestamp.format("%Y-%m-%d").to_string(),
            ..Default::default()
        };
        let mut frames: Vec<LazyFrame> = Vec::new();

        for def in metrics {
            let metric = def.label().to_string();

            if let Some(filter) = &self.config.metric_filter {
                if !def.matches_filter(filter) {
                    report.metrics.push(MetricReport {
                        metric,
                        outcome: MetricOutcome::Filtered,
                        failed_queries: 0,
                    });
                    continue;
                }
            }

            let (outcome, failed_queries) =
                self.evaluate_metric(def, &renderer, &validator, &mut frames);
            match &outcome {
                MetricOutcome::Evaluated { rows: 0 } | MetricOutcome::Discarded { .. } => {
                    self.alert(Severity::Error, &format!("Metric {} did not return any rows", metric));
                }
                _ => {}
            }
            report.failed_queries += failed_queries;
            report.metrics.push(MetricReport {
                metric,
                outcome,
                failed_queries,
            });
        }

        let detail = if frames.is_empty() {
            DataFrame::empty()
        } else {
            concat(frames, UnionArgs::default())?.collect()?
        };
        report.detail_rows = detail.height();
        Ok(Evaluation { detail, report })
    }

    fn evaluate_metric(
        &self,
        def: &MetricDefinition,
        renderer: &QueryRenderer,
        validator: &ResultValidator,
        frames: &mut Vec<LazyFrame>,
    ) -> (MetricOutcome, usize) {
        let metric = def.label();

        if let Some(reason) = &def.load_error {
            error!(metric_id = metric, "Discarding metric: {}", reason);
            return (MetricOutcome::Discarded { reason: reason.clone() }, 0);
        }
        if !def.enabled {
            warn!(metric_id = metric, "Metric is disabled");
            return (MetricOutcome::Disabled, 0);
        }
        if def.queries().is_empty() {
            warn!(metric_id = metric, "Metric has no query");
            return (MetricOutcome::NoQuery, 0);
        }
        let meta = match MetricMetadata::from_definition(def) {
            Ok(meta) => meta,
            Err(e) => {
                error!(metric_id = metric, "Discarding metric: {}", e);
                return (MetricOutcome::Discarded { reason: e.to_string() }, 0);
            }
        };

        info!(metric_id = metric, "Running metric");
        let mut rows = 0;
        let mut failed = 0;
        for (query_index, template) in def.queries().iter().enumerate() {
            match self.evaluate_query(&meta, renderer, validator, template) {
                Ok(df) => {
                    debug!(metric_id = metric, query_index, rows = df.height(), "Query validated");
                    rows += df.height();
                    frames.push(df.lazy());
                }
                Err(e) => {
                    error!(
                        metric_id = metric,
                        query_index,
                        recoverable = e.is_recoverable(),
                        "Query produced no rows: {}",
                        e
                    );
                    failed += 1;
                }
            }
        }
        info!(metric_id = metric, rows, "Metric evaluated");
        (MetricOutcome::Evaluated { rows }, failed)
    }

    fn evaluate_query(
        &self,
        meta: &MetricMetadata,
        renderer: &QueryRenderer,
        validator: &ResultValidator,
        template: &str,
    ) -> Result<DataFrame> {
        let rendered = renderer.render(template)?;
        let result = self.executor.execute(&rendered)?;
        validator.validate(meta, result.data)
    }

    /// The persisted snapshot. A fetch failure counts as "no snapshot yet";
    /// bytes that do not decode are an error.
    fn load_snapshot(&self, store: &dyn SnapshotStore) -> Result<Option<DataFrame>> {
        match store.fetch_snapshot() {
            Ok(Some(bytes)) => Ok(Some(decode_parquet(bytes)?)),
            Ok(None) => Ok(None),
            Err(e) => {
                warn!("Could not fetch snapshot, starting from an empty one: {}", e);
                Ok(None)
            }
        }
    }

    /// Evaluate, aggregate and merge; then write the detail table and persist
    /// the snapshot unless this is a dry run.
    pub fn run(
        &self,
        metrics: &[MetricDefinition],
        store: &dyn SnapshotStore,
        writer: &dyn TableWriter,
    ) -> Result<RunOutcome> {
        let Evaluation { mut detail, mut report } = self.evaluate(metrics)?;

        if detail.height() == 0 {
            error!("No data in the detail table");
            self.alert(Severity::Error, "Metrics run produced no data");
            return Err(ScoreError::NoData);
        }

        let summary = aggregate::summarize(&detail)?;
        let persisted = self.load_snapshot(store)?;
        let MergeOutcome {
            mut snapshot,
            replaced,
            ..
        } = snapshot::merge(&summary, persisted.as_ref())?;

        report.summary_rows = summary.height();
        report.snapshot_rows = snapshot.height();
        report.replaced_rows = replaced;

        if self.config.dry_run {
            info!("Dry run, nothing persisted");
        } else {
            writer.write_table(DETAIL_TABLE, &mut detail)?;
            store.persist_snapshot(&encode_parquet(&mut snapshot)?)?;
        }

        info!(
            detail_rows = report.detail_rows,
            summary_rows = report.summary_rows,
            snapshot_rows = report.snapshot_rows,
            failed_queries = report.failed_queries,
            "Metrics run complete"
        );
        self.alert(
            Severity::Success,
            &format!("Metrics run complete: {} detail rows", report.detail_rows),
        );

        Ok(RunOutcome {
            report,
            detail,
            summary,
            snapshot,
        })
    }
}
