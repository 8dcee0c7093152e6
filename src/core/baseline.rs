//! Personal-baseline trend analysis over daily records.
//!
//! Compares the latest day of each clinical metric against the patient's own
//! history (mean and sample standard deviation) and against the fixed
//! population threshold.

use crate::core::classify::{
    ASYMMETRY_ALERT_ABOVE, DOUBLE_SUPPORT_ALERT_ABOVE, SPEED_SEVERE_BELOW,
    STEP_LENGTH_REDUCED_BELOW,
};
use crate::core::record::GaitRecord;
use crate::source::Metric;
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;

/// Number of trailing records in the smoothed value.
pub const SMOOTHING_WINDOW: usize = 7;

/// Which direction of change is clinically bad.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendDirection {
    LowIsWorse,
    HighIsWorse,
}

/// Where the latest value sits relative to thresholds and baseline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendStatus {
    /// Past the fixed population threshold
    BeyondPopulationThreshold,
    /// More than two standard deviations past the personal mean
    WellBeyondBaseline,
    /// More than one standard deviation past the personal mean
    DriftingFromBaseline,
    WithinNormalRange,
    /// Fewer than two values to form a baseline
    InsufficientData,
}

impl std::fmt::Display for TrendStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TrendStatus::BeyondPopulationThreshold => "beyond population threshold",
            TrendStatus::WellBeyondBaseline => "well beyond personal baseline",
            TrendStatus::DriftingFromBaseline => "drifting from baseline",
            TrendStatus::WithinNormalRange => "within normal range",
            TrendStatus::InsufficientData => "insufficient data",
        };
        f.write_str(s)
    }
}

/// Trend summary for one metric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricTrend {
    pub metric: Metric,
    pub direction: TrendDirection,
    pub population_threshold: f64,
    /// Number of records with a value
    pub observations: usize,
    pub baseline_mean: Option<f64>,
    pub baseline_std: Option<f64>,
    pub latest: Option<f64>,
    /// Mean of the last [`SMOOTHING_WINDOW`] present values
    pub smoothed_latest: Option<f64>,
    pub status: TrendStatus,
}

/// Population threshold and bad direction of a clinical metric.
pub fn population_threshold(metric: Metric) -> Option<(f64, TrendDirection)> {
    match metric {
        Metric::WalkingSpeed => Some((SPEED_SEVERE_BELOW, TrendDirection::LowIsWorse)),
        Metric::StepLength => Some((STEP_LENGTH_REDUCED_BELOW, TrendDirection::LowIsWorse)),
        Metric::WalkingAsymmetry => Some((ASYMMETRY_ALERT_ABOVE, TrendDirection::HighIsWorse)),
        Metric::DoubleSupportTime => {
            Some((DOUBLE_SUPPORT_ALERT_ABOVE, TrendDirection::HighIsWorse))
        }
        _ => None,
    }
}

/// Analyze each clinical metric across `records` (expected in time order).
pub fn analyze_trends(records: &[GaitRecord]) -> Vec<MetricTrend> {
    Metric::CLINICAL
        .iter()
        .filter_map(|&metric| {
            let (threshold, direction) = population_threshold(metric)?;
            let values: Vec<f64> = records.iter().filter_map(|r| r.value(metric)).collect();
            Some(analyze_metric(metric, threshold, direction, &values))
        })
        .collect()
}

fn analyze_metric(
    metric: Metric,
    population_threshold: f64,
    direction: TrendDirection,
    values: &[f64],
) -> MetricTrend {
    let latest = values.last().copied();
    let smoothed_latest = if values.is_empty() {
        None
    } else {
        let tail = &values[values.len().saturating_sub(SMOOTHING_WINDOW)..];
        Some(tail.mean())
    };

    let mut trend = MetricTrend {
        metric,
        direction,
        population_threshold,
        observations: values.len(),
        baseline_mean: None,
        baseline_std: None,
        latest,
        smoothed_latest,
        status: TrendStatus::InsufficientData,
    };

    let Some(latest) = latest else {
        return trend;
    };
    if values.len() < 2 {
        return trend;
    }

    let mean = values.mean();
    let std = values.std_dev();
    trend.baseline_mean = Some(mean);
    trend.baseline_std = Some(std);

    // Signed distance in the bad direction.
    let (past_threshold, excess) = match direction {
        TrendDirection::LowIsWorse => (latest < population_threshold, mean - latest),
        TrendDirection::HighIsWorse => (latest > population_threshold, latest - mean),
    };

    trend.status = if past_threshold {
        TrendStatus::BeyondPopulationThreshold
    } else if excess > 2.0 * std {
        TrendStatus::WellBeyondBaseline
    } else if excess > std {
        TrendStatus::DriftingFromBaseline
    } else {
        TrendStatus::WithinNormalRange
    };
    trend
}
