//! Aggregation of detail rows into dimensioned summary rows.

use crate::error::Result;
use polars::prelude::*;
use serde::Serialize;

/// Grouping key of a summary row.
pub const SUMMARY_KEYS: [&str; 11] = [
    "datestamp",
    "metric_id",
    "title",
    "category",
    "slo",
    "slo_min",
    "weight",
    "indicator",
    "business_unit",
    "team",
    "location",
];

/// Column order of the summary table.
pub const SUMMARY_COLUMNS: [&str; 13] = [
    "datestamp",
    "metric_id",
    "title",
    "category",
    "slo",
    "slo_min",
    "weight",
    "indicator",
    "business_unit",
    "team",
    "location",
    "totalok",
    "total",
];

/// `round(totalok / total * 100, 2)`; an empty group scores zero.
pub fn compliance_score(totalok: f64, total: i64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    (totalok / total as f64 * 100.0 * 100.0).round() / 100.0
}

fn score_expr() -> Expr {
    (col("totalok") / col("total").cast(DataType::Float64) * lit(100.0))
        .round(2)
        .alias("score")
}

/// Group detail rows by [`SUMMARY_KEYS`], summing compliance into `totalok`
/// and counting rows into `total`.
///
/// Groups appear in first-seen order so repeated runs over the same detail
/// table produce identical output. `datestamp` is rendered as `YYYY-MM-DD`.
pub fn summarize(detail: &DataFrame) -> Result<DataFrame> {
    let summary = detail
        .clone()
        .lazy()
        .group_by_stable(SUMMARY_KEYS.map(col))
        .agg([
            col("compliance").sum().alias("totalok"),
            len().cast(DataType::Int64).alias("total"),
        ])
        .with_column(col("datestamp").cast(DataType::String))
        .select(SUMMARY_COLUMNS.map(col))
        .collect()?;
    Ok(summary)
}

/// Append a `score` column to a summary frame.
pub fn with_scores(summary: &DataFrame) -> Result<DataFrame> {
    Ok(summary.clone().lazy().with_column(score_expr()).collect()?)
}

/// Per-metric totals across all dimensions, as printed at the end of a run.
pub fn metric_scores(detail: &DataFrame) -> Result<DataFrame> {
    let scores = detail
        .clone()
        .lazy()
        .group_by_stable([col("metric_id")])
        .agg([
            col("compliance").sum().alias("totalok"),
            len().cast(DataType::Int64).alias("total"),
        ])
        .with_column(score_expr())
        .collect()?;
    Ok(scores)
}

/// One row of the summary table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SummaryRecord {
    pub datestamp: String,
    pub metric_id: String,
    pub title: String,
    pub category: String,
    pub slo: f64,
    pub slo_min: f64,
    pub weight: f64,
    pub indicator: bool,
    pub business_unit: String,
    pub team: String,
    pub location: String,
    pub totalok: f64,
    pub total: i64,
}

impl SummaryRecord {
    pub fn score(&self) -> f64 {
        compliance_score(self.totalok, self.total)
    }

    /// Read typed records from a normalized summary frame.
    pub fn from_frame(df: &DataFrame) -> Result<Vec<SummaryRecord>> {
        let datestamp = df.column("datestamp")?.str()?;
        let metric_id = df.column("metric_id")?.str()?;
        let title = df.column("title")?.str()?;
        let category = df.column("category")?.str()?;
        let slo = df.column("slo")?.f64()?;
        let slo_min = df.column("slo_min")?.f64()?;
        let weight = df.column("weight")?.f64()?;
        let indicator = df.column("indicator")?.bool()?;
        let business_unit = df.column("business_unit")?.str()?;
        let team = df.column("team")?.str()?;
        let location = df.column("location")?.str()?;
        let totalok = df.column("totalok")?.f64()?;
        let total = df.column("total")?.i64()?;

        let text = |ca: &StringChunked, i: usize| ca.get(i).unwrap_or_default().to_string();

        let records = (0..df.height())
            .map(|i| SummaryRecord {
                datestamp: text(datestamp, i),
                metric_id: text(metric_id, i),
                title: text(title, i),
                category: text(category, i),
                slo: slo.get(i).unwrap_or(0.0),
                slo_min: slo_min.get(i).unwrap_or(0.0),
                weight: weight.get(i).unwrap_or(0.0),
                indicator: indicator.get(i).unwrap_or(false),
                business_unit: text(business_unit, i),
                team: text(team, i),
                location: text(location, i),
                totalok: totalok.get(i).unwrap_or(0.0),
                total: total.get(i).unwrap_or(0),
            })
            .collect();
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn detail(compliance: &[f64], teams: &[&str]) -> DataFrame {
        let n = compliance.len();
        let date = NaiveDate::from_ymd_opt(2024, 12, 1).unwrap();
        let df = df! [
            "metric_id" => vec!["access_mfa"; n],
            "title" => vec!["MFA"; n],
            "category" => vec!["Identity Management"; n],
            "slo" => vec![0.95; n],
            "slo_min" => vec![0.90; n],
            "weight" => vec![1.0; n],
            "indicator" => vec![true; n],
            "business_unit" => vec!["undefined"; n],
            "team" => teams.to_vec(),
            "location" => vec!["undefined"; n],
            "compliance" => compliance.to_vec()
        ]
        .unwrap();
        df.lazy()
            .with_column(lit(date).cast(DataType::Date).alias("datestamp"))
            .collect()
            .unwrap()
    }

    #[test]
    fn test_partial_compliance_group() {
        let summary = summarize(&detail(&[1.0, 1.0, 0.0, 0.5], &["a"; 4])).unwrap();
        assert_eq!(summary.height(), 1);
        assert_eq!(summary.get_column_names(), SUMMARY_COLUMNS.to_vec());

        let records = SummaryRecord::from_frame(&summary).unwrap();
        assert_eq!(records[0].total, 4);
        assert_eq!(records[0].totalok, 2.5);
        assert_eq!(records[0].score(), 62.5);
        assert_eq!(records[0].datestamp, "2024-12-01");

        let scored = with_scores(&summary).unwrap();
        assert_eq!(scored.column("score").unwrap().f64().unwrap().get(0), Some(62.5));
    }

    #[test]
    fn test_dimensions_split_groups() {
        let summary = summarize(&detail(&[1.0, 0.0, 1.0], &["platform", "digital", "platform"])).unwrap();
        let records = SummaryRecord::from_frame(&summary).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].team, "platform");
        assert_eq!((records[0].totalok, records[0].total), (2.0, 2));
        assert_eq!((records[1].totalok, records[1].total), (0.0, 1));
    }

    #[test]
    fn test_metric_scores() {
        let scores = metric_scores(&detail(&[1.0, 0.0, 0.0], &["a"; 3])).unwrap();
        assert_eq!(scores.height(), 1);
        assert_eq!(scores.column("score").unwrap().f64().unwrap().get(0), Some(33.33));
    }

    #[test]
    fn test_compliance_score_rounding() {
        assert_eq!(compliance_score(8.0, 10), 80.0);
        assert_eq!(compliance_score(2.0, 3), 66.67);
        assert_eq!(compliance_score(0.0, 0), 0.0);
    }
}
