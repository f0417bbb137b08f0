//! Scorecard views over the snapshot: the latest score of every metric
//! against its SLO, and each metric's score history.

use crate::aggregate::SummaryRecord;
use itertools::Itertools;
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SloStatus {
    Met,
    AtRisk,
    Breached,
}

impl SloStatus {
    pub fn classify(score: f64, slo: f64, slo_min: f64) -> Self {
        if score >= slo {
            SloStatus::Met
        } else if score >= slo_min {
            SloStatus::AtRisk
        } else {
            SloStatus::Breached
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScorecardEntry {
    pub metric_id: String,
    pub title: String,
    pub category: String,
    pub datestamp: String,
    pub totalok: f64,
    pub total: i64,
    /// Ratio in [0, 1], comparable with the SLO bounds.
    pub score: f64,
    pub slo: f64,
    pub slo_min: f64,
    pub status: SloStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScorePoint {
    pub datestamp: String,
    pub score: f64,
}

fn ratio(totalok: f64, total: i64) -> f64 {
    if total > 0 {
        totalok / total as f64
    } else {
        0.0
    }
}

/// One entry per metric for the most recent datestamp in the snapshot,
/// summed across dimensions and sorted by title.
///
/// When dimension rows disagree on the SLO bounds, the highest of each wins.
pub fn latest_scorecard(records: &[SummaryRecord]) -> Vec<ScorecardEntry> {
    let Some(latest) = records.iter().map(|r| r.datestamp.as_str()).max() else {
        return Vec::new();
    };

    let mut by_metric: BTreeMap<&str, ScorecardEntry> = BTreeMap::new();
    for r in records.iter().filter(|r| r.datestamp == latest) {
        let entry = by_metric.entry(r.metric_id.as_str()).or_insert_with(|| ScorecardEntry {
            metric_id: r.metric_id.clone(),
            title: r.title.clone(),
            category: r.category.clone(),
            datestamp: r.datestamp.clone(),
            totalok: 0.0,
            total: 0,
            score: 0.0,
            slo: r.slo,
            slo_min: r.slo_min,
            status: SloStatus::Breached,
        });
        entry.totalok += r.totalok;
        entry.total += r.total;
        entry.slo = entry.slo.max(r.slo);
        entry.slo_min = entry.slo_min.max(r.slo_min);
    }

    by_metric
        .into_values()
        .map(|mut e| {
            e.score = ratio(e.totalok, e.total);
            e.status = SloStatus::classify(e.score, e.slo, e.slo_min);
            e
        })
        .sorted_by(|a, b| a.title.cmp(&b.title))
        .collect()
}

/// Per metric, the score of every datestamp in the snapshot, oldest first.
pub fn score_history(records: &[SummaryRecord]) -> BTreeMap<String, Vec<ScorePoint>> {
    let totals = records
        .iter()
        .map(|r| ((r.metric_id.as_str(), r.datestamp.as_str()), (r.totalok, r.total)))
        .into_grouping_map()
        .fold((0.0, 0i64), |(ok, n), _, (r_ok, r_n)| (ok + r_ok, n + r_n));

    let mut history: BTreeMap<String, Vec<ScorePoint>> = BTreeMap::new();
    for ((metric_id, datestamp), (ok, n)) in totals.into_iter().sorted_by(|a, b| a.0.cmp(&b.0)) {
        history.entry(metric_id.to_string()).or_default().push(ScorePoint {
            datestamp: datestamp.to_string(),
            score: ratio(ok, n),
        });
    }
    history
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(datestamp: &str, metric_id: &str, title: &str, team: &str, totalok: f64, total: i64) -> SummaryRecord {
        SummaryRecord {
            datestamp: datestamp.to_string(),
            metric_id: metric_id.to_string(),
            title: title.to_string(),
            category: "Malware Protection".to_string(),
            slo: 0.95,
            slo_min: 0.9,
            weight: 1.0,
            indicator: true,
            business_unit: "undefined".to_string(),
            team: team.to_string(),
            location: "undefined".to_string(),
            totalok,
            total,
        }
    }

    #[test]
    fn test_latest_scorecard_sums_dimensions() {
        let records = vec![
            record("2024-11-30", "edr", "EDR coverage", "a", 0.0, 10),
            record("2024-12-01", "edr", "EDR coverage", "a", 9.0, 10),
            record("2024-12-01", "edr", "EDR coverage", "b", 10.0, 10),
            record("2024-12-01", "av", "Antivirus", "a", 5.0, 10),
        ];
        let card = latest_scorecard(&records);
        assert_eq!(card.len(), 2);
        assert_eq!(card[0].title, "Antivirus");
        assert_eq!(card[0].status, SloStatus::Breached);
        assert_eq!(card[1].total, 20);
        assert_eq!(card[1].score, 0.95);
        assert_eq!(card[1].status, SloStatus::Met);
    }

    #[test]
    fn test_classify() {
        assert_eq!(SloStatus::classify(0.92, 0.95, 0.9), SloStatus::AtRisk);
        assert_eq!(SloStatus::classify(0.9, 0.95, 0.9), SloStatus::AtRisk);
        assert_eq!(SloStatus::classify(0.5, 0.95, 0.9), SloStatus::Breached);
    }

    #[test]
    fn test_score_history_sorted_by_date() {
        let records = vec![
            record("2024-12-01", "edr", "EDR", "a", 3.0, 4),
            record("2024-11-30", "edr", "EDR", "a", 1.0, 4),
            record("2024-12-01", "edr", "EDR", "b", 1.0, 4),
        ];
        let history = score_history(&records);
        let edr = &history["edr"];
        assert_eq!(edr.len(), 2);
        assert_eq!(edr[0].datestamp, "2024-11-30");
        assert_eq!(edr[0].score, 0.25);
        assert_eq!(edr[1].score, 0.5);
    }

    #[test]
    fn test_empty_snapshot() {
        assert!(latest_scorecard(&[]).is_empty());
        assert!(score_history(&[]).is_empty());
    }
}
