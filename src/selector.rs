//! Derived read models over [`StoreState`].
//!
//! Selectors are pure functions of a snapshot. They are what views pass to
//! [`AuditStore::subscribe`](crate::AuditStore::subscribe) so that a callback
//! only fires when the derived value actually changes.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::model::{Anomaly, AnomalyStatus, PipelineStage, StoreState};

/// Direction of a predicted change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendDirection {
    Up,
    Down,
    Stable,
}

impl fmt::Display for TrendDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Up => "up",
            Self::Down => "down",
            Self::Stable => "stable",
        })
    }
}

/// Predicted movement of a chart metric from the last historical point to
/// the first predicted one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Trend {
    pub direction: TrendDirection,
    /// Absolute relative change in percent, formatted with one decimal
    /// (`"50.0"`), or `"0"` when no comparison is possible.
    pub percentage: String,
}

impl Trend {
    /// The trend reported when there is nothing to compare.
    pub fn stable() -> Self {
        Self {
            direction: TrendDirection::Stable,
            percentage: "0".to_owned(),
        }
    }
}

/// Share of pipeline items in the `complete` stage, in percent.
///
/// Returns `0.0` for an empty pipeline.
pub fn processing_progress_percent(state: &StoreState) -> f64 {
    let total = state.pipeline.len();
    if total == 0 {
        return 0.0;
    }
    let completed = state
        .pipeline
        .iter()
        .filter(|item| item.stage == PipelineStage::Complete)
        .count();
    completed as f64 / total as f64 * 100.0
}

/// Anomalies that have not been resolved, in store order (newest first).
pub fn active_anomalies(state: &StoreState) -> Vec<Anomaly> {
    state
        .anomalies
        .iter()
        .filter(|anomaly| anomaly.status != AnomalyStatus::Resolved)
        .cloned()
        .collect()
}

/// Compare `metric` between the last historical point and the first
/// predicted point.
///
/// # Arguments
///
/// * `state` - Snapshot to read the chart series from.
/// * `metric` - Key into [`ChartPoint::values`](crate::ChartPoint::values),
///   e.g. `"documents"`.
///
/// # Returns
///
/// [`Trend::stable`] when either series is empty, either point lacks the
/// metric, or the historical value is zero. Otherwise the signed change
/// decides the direction and its magnitude is formatted with one decimal.
pub fn prediction_trend(state: &StoreState, metric: &str) -> Trend {
    let (Some(last), Some(next)) = (state.chart.historical.last(), state.chart.predicted.first())
    else {
        return Trend::stable();
    };
    let (Some(&from), Some(&to)) = (last.values.get(metric), next.values.get(metric)) else {
        return Trend::stable();
    };
    if from == 0.0 {
        return Trend::stable();
    }

    let change = (to - from) / from * 100.0;
    let direction = if change > 0.0 {
        TrendDirection::Up
    } else if change < 0.0 {
        TrendDirection::Down
    } else {
        TrendDirection::Stable
    };
    Trend {
        direction,
        percentage: format!("{:.1}", change.abs()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::test_fixtures::{anomaly, pipeline_item};
    use crate::model::{ChartPoint, ChartSeries};

    fn with_chart(historical: &[f64], predicted: &[f64]) -> StoreState {
        let point = |value: f64| ChartPoint::new("p", [("documents", value)]);
        StoreState {
            chart: ChartSeries {
                historical: historical.iter().copied().map(point).collect(),
                predicted: predicted.iter().copied().map(point).collect(),
            },
            ..StoreState::default()
        }
    }

    #[test]
    fn progress_is_zero_for_empty_pipeline() {
        assert_eq!(processing_progress_percent(&StoreState::default()), 0.0);
    }

    #[test]
    fn progress_counts_complete_items() {
        let state = StoreState {
            pipeline: vec![
                pipeline_item(1, PipelineStage::Complete),
                pipeline_item(2, PipelineStage::Analysis),
                pipeline_item(3, PipelineStage::Upload),
                pipeline_item(4, PipelineStage::Complete),
            ],
            ..StoreState::default()
        };
        assert_eq!(processing_progress_percent(&state), 50.0);
    }

    #[test]
    fn progress_is_hundred_when_all_complete() {
        let state = StoreState {
            pipeline: vec![
                pipeline_item(1, PipelineStage::Complete),
                pipeline_item(2, PipelineStage::Complete),
            ],
            ..StoreState::default()
        };
        assert_eq!(processing_progress_percent(&state), 100.0);
    }

    #[test]
    fn active_anomalies_excludes_resolved() {
        let mut resolved = anomaly(2);
        resolved.status = AnomalyStatus::Resolved;
        let state = StoreState {
            anomalies: vec![anomaly(3), resolved, anomaly(1)],
            ..StoreState::default()
        };
        let ids: Vec<u64> = active_anomalies(&state).iter().map(|a| a.id).collect();
        assert_eq!(ids, vec![3, 1]);
    }

    #[test]
    fn trend_up() {
        let trend = prediction_trend(&with_chart(&[80.0, 100.0], &[150.0, 10.0]), "documents");
        assert_eq!(trend.direction, TrendDirection::Up);
        assert_eq!(trend.percentage, "50.0");
    }

    #[test]
    fn trend_down_reports_magnitude() {
        let trend = prediction_trend(&with_chart(&[200.0], &[150.0]), "documents");
        assert_eq!(trend.direction, TrendDirection::Down);
        assert_eq!(trend.percentage, "25.0");
    }

    #[test]
    fn trend_equal_values_is_stable_with_one_decimal() {
        let trend = prediction_trend(&with_chart(&[40.0], &[40.0]), "documents");
        assert_eq!(trend.direction, TrendDirection::Stable);
        assert_eq!(trend.percentage, "0.0");
    }

    #[test]
    fn trend_degenerate_inputs_are_stable() {
        assert_eq!(prediction_trend(&with_chart(&[], &[150.0]), "documents"), Trend::stable());
        assert_eq!(prediction_trend(&with_chart(&[100.0], &[]), "documents"), Trend::stable());
        assert_eq!(prediction_trend(&with_chart(&[0.0], &[5.0]), "documents"), Trend::stable());
        assert_eq!(
            prediction_trend(&with_chart(&[100.0], &[150.0]), "accuracy"),
            Trend::stable()
        );
    }

    #[test]
    fn seeded_document_trend() {
        // 280 -> 310
        let trend = prediction_trend(&StoreState::seeded(), "documents");
        assert_eq!(trend.direction, TrendDirection::Up);
        assert_eq!(trend.percentage, "10.7");
    }

    #[test]
    fn trend_serializes_direction_lowercase() {
        let json = serde_json::to_value(Trend::stable()).unwrap();
        assert_eq!(json, serde_json::json!({"direction": "stable", "percentage": "0"}));
    }
}
