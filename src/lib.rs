pub mod aggregate;
pub mod config;
pub mod engine;
pub mod error;
pub mod metadata;
pub mod notify;
pub mod renderer;
pub mod resolver;
pub mod scorecard;
pub mod snapshot;
pub mod sql_engine;
pub mod store;
pub mod validation;

pub use config::EngineConfig;
pub use engine::{MetricOutcome, MetricsEngine, RunOutcome, RunReport};
pub use error::{Result, ScoreError};
pub use metadata::{load_metrics, Category, MetricDefinition};
pub use notify::{Notifier, RecordingNotifier, Severity, TracingNotifier};
pub use store::{FileSnapshotStore, MemorySnapshotStore, ParquetTableWriter, SnapshotStore, TableWriter};
