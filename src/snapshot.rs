//! Snapshot merge
//!
//! The snapshot is the persisted history of summary rows. A run supersedes
//! every persisted row sharing a `(metric_id, datestamp)` pair with its own
//! output, whatever the dimension values of those rows were, and keeps
//! everything else.

use crate::aggregate::SUMMARY_COLUMNS;
use crate::error::Result;
use crate::validation::{DIMENSIONS, UNDEFINED};
use polars::prelude::*;
use tracing::{debug, info};

const MERGE_KEYS: [&str; 2] = ["metric_id", "datestamp"];
const ROW_INDEX: &str = "__row";

#[derive(Debug, Clone)]
pub struct MergeOutcome {
    pub snapshot: DataFrame,
    /// Persisted rows dropped because this run re-computed their key.
    pub replaced: usize,
    /// Persisted rows carried over unchanged.
    pub retained: usize,
    pub added: usize,
}

fn datestamp_expr(dtype: &DataType) -> Expr {
    let c = col("datestamp");
    match dtype {
        DataType::Date => c.cast(DataType::String),
        DataType::Datetime(_, _) => c.cast(DataType::Date).cast(DataType::String),
        DataType::String => {
            let parsed = c.clone().str().to_date(StrptimeOptions {
                format: Some("%Y-%m-%d".into()),
                strict: false,
                exact: false,
                cache: true,
            });
            coalesce(&[parsed.cast(DataType::String), c])
        }
        _ => c.cast(DataType::String),
    }
}

/// `true`, `1` and `yes` (any case) are true; anything else, null included,
/// is false.
fn indicator_expr(dtype: Option<&DataType>) -> Expr {
    let c = col("indicator");
    match dtype {
        Some(DataType::Boolean) => c.fill_null(lit(false)),
        Some(DataType::String) => {
            let s = c.str().to_lowercase();
            s.clone()
                .eq(lit("true"))
                .or(s.clone().eq(lit("1")))
                .or(s.eq(lit("yes")))
                .fill_null(lit(false))
        }
        Some(dt) if dt.is_numeric() => c.cast(DataType::Float64).neq(lit(0.0)).fill_null(lit(false)),
        _ => lit(false),
    }
}

/// Bring a summary frame to the canonical snapshot schema: `datestamp` as a
/// `YYYY-MM-DD` string, `indicator` as a strict boolean, missing dimensions as
/// `"undefined"`, columns in [`SUMMARY_COLUMNS`] order.
pub fn normalize(df: &DataFrame) -> Result<DataFrame> {
    let schema = df.schema();
    let datestamp = datestamp_expr(df.column("datestamp")?.dtype());

    let mut columns = vec![
        datestamp.alias("datestamp"),
        col("metric_id").cast(DataType::String),
        col("title").cast(DataType::String),
        col("category").cast(DataType::String),
        col("slo").cast(DataType::Float64),
        col("slo_min").cast(DataType::Float64),
        col("weight").cast(DataType::Float64),
        indicator_expr(schema.get("indicator")).alias("indicator"),
        col("totalok").cast(DataType::Float64),
        col("total").cast(DataType::Int64),
    ];
    for dim in DIMENSIONS {
        let value = if schema.contains(dim) {
            col(dim).cast(DataType::String).fill_null(lit(UNDEFINED))
        } else {
            lit(UNDEFINED)
        };
        columns.push(value.alias(dim));
    }

    Ok(df
        .clone()
        .lazy()
        .with_columns(columns)
        .select(SUMMARY_COLUMNS.map(col))
        .collect()?)
}

/// Merge this run's summary rows into the persisted snapshot.
///
/// Persisted rows whose `(metric_id, datestamp)` appears in `new_rows` are
/// dropped; the survivors keep their order and the new rows follow them.
/// `None` is the first run.
pub fn merge(new_rows: &DataFrame, persisted: Option<&DataFrame>) -> Result<MergeOutcome> {
    let new_rows = normalize(new_rows)?;
    let added = new_rows.height();

    let Some(persisted) = persisted.filter(|p| p.height() > 0) else {
        info!("No persisted snapshot, starting a new one with {} rows", added);
        return Ok(MergeOutcome {
            snapshot: new_rows,
            replaced: 0,
            retained: 0,
            added,
        });
    };
    let persisted = normalize(persisted)?;

    let keys = new_rows
        .clone()
        .lazy()
        .select(MERGE_KEYS.map(col))
        .unique(None, UniqueKeepStrategy::First);

    let retained_rows = persisted
        .clone()
        .lazy()
        .with_row_index(ROW_INDEX, None)
        .join(
            keys,
            MERGE_KEYS.map(col),
            MERGE_KEYS.map(col),
            JoinArgs::new(JoinType::Anti),
        )
        .sort([ROW_INDEX], SortMultipleOptions::default())
        .select(SUMMARY_COLUMNS.map(col));

    let snapshot = concat([retained_rows, new_rows.lazy()], UnionArgs::default())?.collect()?;

    let retained = snapshot.height() - added;
    let replaced = persisted.height() - retained;
    debug!(replaced, retained, added, "Merged snapshot");

    Ok(MergeOutcome {
        snapshot,
        replaced,
        retained,
        added,
    })
}
