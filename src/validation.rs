//! Result validation
//!
//! Turns a raw query result into detail rows: enforces the required-column
//! contract, stamps the metric's metadata and the run date on every row, and
//! fills the organisational dimensions the query did not supply.
//!
//! Metadata problems are checked once per metric by
//! [`MetricMetadata::from_definition`]; any missing or out-of-range field
//! discards the whole metric rather than defaulting, so a bad definition can
//! never shift score denominators.

use crate::error::{Result, ScoreError};
use crate::metadata::{Category, MetricDefinition};
use chrono::NaiveDate;
use polars::prelude::*;
use serde::Serialize;
use serde_yaml::Value;

pub const REQUIRED_COLUMNS: [&str; 4] = ["resource", "resource_type", "compliance", "detail"];
pub const DIMENSIONS: [&str; 3] = ["business_unit", "team", "location"];
pub const UNDEFINED: &str = "undefined";
pub const REDACTED: &str = "redacted - privacy enabled";

/// Column order of the detail table.
pub const DETAIL_COLUMNS: [&str; 18] = [
    "datestamp",
    "metric_id",
    "title",
    "category",
    "type",
    "description",
    "how",
    "weight",
    "slo",
    "slo_min",
    "indicator",
    "business_unit",
    "team",
    "location",
    "resource",
    "resource_type",
    "compliance",
    "detail",
];

/// Validated metadata copied onto every detail row of a metric.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricMetadata {
    pub metric_id: String,
    pub title: String,
    pub category: Category,
    pub weight: f64,
    pub slo: f64,
    pub slo_min: f64,
    pub indicator: bool,
    pub metric_type: String,
    pub description: String,
    pub how: String,
}

impl MetricMetadata {
    pub fn from_definition(def: &MetricDefinition) -> Result<Self> {
        let metric = def.label().to_string();
        let missing = |field: &str| ScoreError::MetadataIncomplete {
            metric: metric.clone(),
            field: field.to_string(),
        };
        let text = |value: &Option<String>, field: &str| {
            value
                .as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .ok_or_else(|| missing(field))
        };

        let metric_id = text(&def.metric_id, "metric_id")?;
        let title = text(&def.title, "title")?;
        let category = text(&def.category, "category")?;
        let weight = def.weight.as_ref().ok_or_else(|| missing("weight"))?;
        let slo = def.slo.as_ref().ok_or_else(|| missing("slo"))?;
        let indicator = def.indicator.as_ref().ok_or_else(|| missing("indicator"))?;
        let metric_type = text(&def.metric_type, "type")?;
        let description = text(&def.description, "description")?;
        let how = text(&def.how, "how")?;

        let category: Category = category.parse().map_err(|category| ScoreError::UnknownCategory {
            metric: metric.clone(),
            category,
        })?;

        let range = |field: &str, reason: String| ScoreError::RangeViolation {
            metric: metric.clone(),
            field: field.to_string(),
            reason,
        };
        let weight = unit_interval(weight).map_err(|reason| range("weight", reason))?;

        let (slo_min, slo) = match slo {
            Value::Sequence(pair) if pair.len() == 2 => (
                unit_interval(&pair[0]).map_err(|reason| range("slo[0]", reason))?,
                unit_interval(&pair[1]).map_err(|reason| range("slo[1]", reason))?,
            ),
            _ => return Err(range("slo", "is not a list with two values".to_string())),
        };
        if slo_min > slo {
            return Err(range(
                "slo",
                format!("minimum {} is above the target {}", slo_min, slo),
            ));
        }

        let indicator = match indicator {
            Value::Bool(b) => *b,
            Value::String(s) if s.eq_ignore_ascii_case("true") => true,
            Value::String(s) if s.eq_ignore_ascii_case("false") => false,
            _ => return Err(range("indicator", "is not a boolean".to_string())),
        };

        Ok(Self {
            metric_id,
            title,
            category,
            weight,
            slo,
            slo_min,
            indicator,
            metric_type,
            description,
            how,
        })
    }
}

/// A real number in [0, 1]; numeric strings are accepted.
fn unit_interval(value: &Value) -> std::result::Result<f64, String> {
    let number = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
    .ok_or_else(|| format!("'{}' is not a number", render_value(value)))?;

    if (0.0..=1.0).contains(&number) {
        Ok(number)
    } else {
        Err(format!("{} is not a percentage between 0 and 1", number))
    }
}

fn render_value(value: &Value) -> String {
    serde_yaml::to_string(value)
        .map(|s| s.trim().to_string())
        .unwrap_or_default()
}

pub struct ResultValidator {
    datestamp: NaiveDate,
    privacy: bool,
}

impl ResultValidator {
    pub fn new(datestamp: NaiveDate, privacy: bool) -> Self {
        Self { datestamp, privacy }
    }

    /// All required columns must be present; nothing is partially kept.
    pub fn check_required_columns(df: &DataFrame) -> Result<()> {
        let present = df.get_column_names();
        let missing: Vec<String> = REQUIRED_COLUMNS
            .iter()
            .filter(|c| !present.contains(*c))
            .map(|c| c.to_string())
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(ScoreError::SchemaViolation { missing })
        }
    }

    /// Validate one query result and shape it into detail rows.
    pub fn validate(&self, meta: &MetricMetadata, raw: DataFrame) -> Result<DataFrame> {
        Self::check_required_columns(&raw)?;
        let present: Vec<String> = raw.get_column_names().iter().map(|s| s.to_string()).collect();

        let (resource, detail) = if self.privacy {
            (lit(REDACTED), lit(REDACTED))
        } else {
            (col("resource").cast(DataType::String), col("detail").cast(DataType::String))
        };

        let mut columns = vec![
            lit(self.datestamp).cast(DataType::Date).alias("datestamp"),
            lit(meta.metric_id.as_str()).alias("metric_id"),
            lit(meta.title.as_str()).alias("title"),
            lit(meta.category.as_str()).alias("category"),
            lit(meta.metric_type.as_str()).alias("type"),
            lit(meta.description.as_str()).alias("description"),
            lit(meta.how.as_str()).alias("how"),
            lit(meta.weight).alias("weight"),
            lit(meta.slo).alias("slo"),
            lit(meta.slo_min).alias("slo_min"),
            lit(meta.indicator).alias("indicator"),
        ];
        for dim in DIMENSIONS {
            let value = if present.iter().any(|c| c == dim) {
                col(dim).cast(DataType::String).fill_null(lit(UNDEFINED))
            } else {
                lit(UNDEFINED)
            };
            columns.push(value.alias(dim));
        }
        columns.extend([
            resource.alias("resource"),
            col("resource_type").cast(DataType::String).alias("resource_type"),
            col("compliance").cast(DataType::Float64).alias("compliance"),
            detail.alias("detail"),
        ]);

        Ok(raw
            .lazy()
            .with_columns(columns)
            .select(DETAIL_COLUMNS.map(col))
            .collect()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn definition() -> MetricDefinition {
        MetricDefinition::from_yaml(
            r#"
metric_id: patch_mgmt
title: Patch management
category: Vulnerability Management
type: operational
description: Hosts patched within SLA
how: Compare last patch date against policy
weight: 0.9
slo: [0.90, 0.95]
indicator: true
"#,
        )
        .unwrap()
    }

    fn run_date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 12, 1).unwrap()
    }

    fn raw_result() -> DataFrame {
        df! [
            "resource" => ["web-01", "web-02"],
            "resource_type" => ["host", "host"],
            "compliance" => [1i64, 0],
            "detail" => ["patched", "missing KB5032"]
        ]
        .unwrap()
    }

    #[test]
    fn test_metadata_from_definition() {
        let meta = MetricMetadata::from_definition(&definition()).unwrap();
        assert_eq!(meta.metric_id, "patch_mgmt");
        assert_eq!(meta.category, Category::VulnerabilityManagement);
        assert_eq!(meta.slo_min, 0.90);
        assert_eq!(meta.slo, 0.95);
        assert!(meta.indicator);
    }

    #[test]
    fn test_missing_metadata_field_rejects_metric() {
        let mut def = definition();
        def.how = None;
        match MetricMetadata::from_definition(&def) {
            Err(ScoreError::MetadataIncomplete { field, .. }) => assert_eq!(field, "how"),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_blank_text_counts_as_missing() {
        let mut def = definition();
        def.title = Some("   ".to_string());
        match MetricMetadata::from_definition(&def) {
            Err(ScoreError::MetadataIncomplete { field, .. }) => assert_eq!(field, "title"),
            other => panic!("unexpected: {:?}", other),
        }

        let mut def = definition();
        def.description = Some(String::new());
        match MetricMetadata::from_definition(&def) {
            Err(ScoreError::MetadataIncomplete { field, .. }) => assert_eq!(field, "description"),
            other => panic!("unexpected: {:?}", other),
        }

        let mut def = definition();
        def.how = Some("  counts hosts ".to_string());
        let meta = MetricMetadata::from_definition(&def).unwrap();
        assert_eq!(meta.how, "counts hosts");
    }

    #[test]
    fn test_range_violations() {
        let mut def = definition();
        def.weight = Some(Value::from(1.5));
        assert!(matches!(
            MetricMetadata::from_definition(&def),
            Err(ScoreError::RangeViolation { .. })
        ));

        let mut def = definition();
        def.weight = Some(Value::from("heavy"));
        assert!(matches!(
            MetricMetadata::from_definition(&def),
            Err(ScoreError::RangeViolation { .. })
        ));

        let mut def = definition();
        def.slo = Some(serde_yaml::from_str("[0.9]").unwrap());
        assert!(matches!(
            MetricMetadata::from_definition(&def),
            Err(ScoreError::RangeViolation { .. })
        ));

        let mut def = definition();
        def.slo = Some(serde_yaml::from_str("[0.99, 0.95]").unwrap());
        assert!(matches!(
            MetricMetadata::from_definition(&def),
            Err(ScoreError::RangeViolation { .. })
        ));
    }

    #[test]
    fn test_unknown_category() {
        let mut def = definition();
        def.category = Some("Physical Security".to_string());
        assert!(matches!(
            MetricMetadata::from_definition(&def),
            Err(ScoreError::UnknownCategory { .. })
        ));
    }

    #[test]
    fn test_numeric_strings_accepted() {
        let mut def = definition();
        def.weight = Some(Value::from("0.5"));
        assert_eq!(MetricMetadata::from_definition(&def).unwrap().weight, 0.5);
    }

    #[test]
    fn test_missing_required_column_discards_result() {
        let meta = MetricMetadata::from_definition(&definition()).unwrap();
        let raw = raw_result().drop("detail").unwrap();
        let err = ResultValidator::new(run_date(), false)
            .validate(&meta, raw)
            .unwrap_err();
        match err {
            ScoreError::SchemaViolation { missing } => assert_eq!(missing, vec!["detail"]),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_privacy_does_not_mask_missing_columns() {
        let meta = MetricMetadata::from_definition(&definition()).unwrap();
        let raw = raw_result().drop("resource").unwrap();
        assert!(ResultValidator::new(run_date(), true).validate(&meta, raw).is_err());
    }

    #[test]
    fn test_metadata_dimensions_and_datestamp_attached() {
        let meta = MetricMetadata::from_definition(&definition()).unwrap();
        let mut raw = raw_result();
        raw.with_column(Series::new("team", ["platform", "digital"])).unwrap();

        let detail = ResultValidator::new(run_date(), false)
            .validate(&meta, raw)
            .unwrap();
        assert_eq!(detail.get_column_names(), DETAIL_COLUMNS.to_vec());
        assert_eq!(detail.height(), 2);

        let team = detail.column("team").unwrap().str().unwrap();
        assert_eq!(team.get(0), Some("platform"));
        for dim in ["business_unit", "location"] {
            let values = detail.column(dim).unwrap().str().unwrap();
            assert!(values.into_iter().all(|v| v == Some(UNDEFINED)));
        }
        assert_eq!(detail.column("datestamp").unwrap().dtype(), &DataType::Date);
        assert_eq!(detail.column("compliance").unwrap().f64().unwrap().get(0), Some(1.0));
        assert_eq!(
            detail.column("resource").unwrap().str().unwrap().get(1),
            Some("web-02")
        );
    }

    #[test]
    fn test_privacy_redacts_resource_and_detail() {
        let meta = MetricMetadata::from_definition(&definition()).unwrap();
        let detail = ResultValidator::new(run_date(), true)
            .validate(&meta, raw_result())
            .unwrap();
        for column in ["resource", "detail"] {
            let values = detail.column(column).unwrap().str().unwrap();
            assert!(values.into_iter().all(|v| v == Some(REDACTED)));
        }
    }
}
