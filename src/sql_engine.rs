//! SQL Engine
//!
//! Executes rendered metric queries with Polars SQL. Each data set a query
//! references is loaded from its JSON exports (see [`DataSetRegistry`]) and
//! registered as a table under its logical name before the query runs.
//!
//! Loaded data sets are cached for the lifetime of the engine, so metrics that
//! read the same source within one run only parse its files once.

use crate::error::{Result, ScoreError};
use crate::renderer::RenderedQuery;
use crate::resolver::DataSetRegistry;
use polars::prelude::*;
use polars::sql::SQLContext;
use std::cell::RefCell;
use std::collections::HashMap;
use std::time::Instant;
use tracing::{debug, error, info};

pub struct SqlEngine {
    registry: DataSetRegistry,
    cache: RefCell<HashMap<String, DataFrame>>,
}

/// Tabular result of one query.
#[derive(Debug, Clone)]
pub struct QueryResult {
    pub data: DataFrame,
    pub columns: Vec<String>,
    pub row_count: usize,
    pub execution_time_ms: u64,
}

impl SqlEngine {
    pub fn new(registry: DataSetRegistry) -> Self {
        Self {
            registry,
            cache: RefCell::new(HashMap::new()),
        }
    }

    pub fn registry(&self) -> &DataSetRegistry {
        &self.registry
    }

    /// Execute a rendered query.
    ///
    /// Fails with `MissingDataSet` when a referenced data set has no files and
    /// with `QueryExecution` for anything the query engine rejects. The rendered
    /// text is logged on execution failures.
    pub fn execute(&self, query: &RenderedQuery) -> Result<QueryResult> {
        let start_time = Instant::now();
        self.registry
            .ensure_available(query.references.iter().map(String::as_str))?;

        let result = self.run_sql(query);
        let df = match result {
            Ok(df) => df,
            Err(e) => {
                error!("Failed to execute query: {}", e);
                error!(sql = %query.text, "Rendered query");
                return Err(ScoreError::QueryExecution(e.to_string()));
            }
        };

        let execution_time_ms = elapsed_ms(start_time.elapsed());
        let columns: Vec<String> = df.get_column_names().iter().map(|s| s.to_string()).collect();
        info!("Retrieved {} records in {}ms", df.height(), execution_time_ms);

        Ok(QueryResult {
            row_count: df.height(),
            columns,
            data: df,
            execution_time_ms,
        })
    }

    fn run_sql(&self, query: &RenderedQuery) -> Result<DataFrame> {
        let mut ctx = SQLContext::new();
        for dataset in &query.references {
            let frame = self.dataset(dataset)?;
            ctx.register(dataset, frame.lazy());
        }
        Ok(ctx.execute(&query.text)?.collect()?)
    }

    fn dataset(&self, name: &str) -> Result<DataFrame> {
        if let Some(df) = self.cache.borrow().get(name) {
            debug!(dataset = name, "Using cached data set");
            return Ok(df.clone());
        }
        let df = self.registry.load(name)?.collect()?;
        debug!(dataset = name, rows = df.height(), "Loaded data set");
        self.cache.borrow_mut().insert(name.to_string(), df.clone());
        Ok(df)
    }
}

/// Whole milliseconds, saturating at `u64::MAX`.
fn elapsed_ms(elapsed: std::time::Duration) -> u64 {
    u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
}
