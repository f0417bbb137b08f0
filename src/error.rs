use thiserror::Error;

#[derive(Error, Debug)]
pub enum ScoreError {
    #[error("Data set '{dataset}' has no files matching {pattern}")]
    MissingDataSet { dataset: String, pattern: String },

    #[error("Query execution failed: {0}")]
    QueryExecution(String),

    #[error("Query result is missing required columns: {}", missing.join(", "))]
    SchemaViolation { missing: Vec<String> },

    #[error("Metric '{metric}' is missing metadata field '{field}'")]
    MetadataIncomplete { metric: String, field: String },

    #[error("Metric '{metric}': {field} {reason}")]
    RangeViolation {
        metric: String,
        field: String,
        reason: String,
    },

    #[error("Metric '{metric}' has an unknown category '{category}'")]
    UnknownCategory { metric: String, category: String },

    #[error("Template error: {0}")]
    Render(String),

    #[error("No metric produced any rows - the detail table is empty")]
    NoData,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Glob pattern error: {0}")]
    Pattern(#[from] glob::PatternError),

    #[error("Polars error: {0}")]
    Polars(#[from] polars::prelude::PolarsError),
}

impl ScoreError {
    /// Errors scoped to a single query or metric; the run carries on past them.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            ScoreError::MissingDataSet { .. }
                | ScoreError::QueryExecution(_)
                | ScoreError::SchemaViolation { .. }
                | ScoreError::MetadataIncomplete { .. }
                | ScoreError::RangeViolation { .. }
                | ScoreError::UnknownCategory { .. }
                | ScoreError::Render(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, ScoreError>;
