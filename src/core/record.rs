//! The fused per-window gait record.
//!
//! A [`GaitRecord`] is built exactly once from a [`GaitRecordBuilder`] and is
//! read-only afterwards. Classification fields are derived on read.

use crate::core::classify::{self, SpeedCategory, StepLengthStatus};
use crate::source::Metric;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One aggregated window of gait metrics.
///
/// A metric that had no samples in the window is `None`, never zero. The one
/// exception is step count, which is `Some(0)` when its channel answered with
/// no samples and `None` only when the channel could not be queried.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GaitRecord {
    timestamp: DateTime<Utc>,
    walking_speed: Option<f64>,
    step_length: Option<f64>,
    walking_asymmetry: Option<f64>,
    double_support_time: Option<f64>,
    step_count: Option<u64>,
    step_cadence: Option<f64>,
    six_minute_walk_distance: Option<f64>,
}

impl GaitRecord {
    /// Start building a record for the window beginning at `timestamp`.
    pub fn builder(timestamp: DateTime<Utc>) -> GaitRecordBuilder {
        GaitRecordBuilder::new(timestamp)
    }

    /// A record with every metric absent.
    pub fn empty(timestamp: DateTime<Utc>) -> Self {
        GaitRecordBuilder::new(timestamp).build()
    }

    /// Window start this record represents.
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Mean walking speed (m/s).
    pub fn walking_speed(&self) -> Option<f64> {
        self.walking_speed
    }

    /// Mean step length (m).
    pub fn step_length(&self) -> Option<f64> {
        self.step_length
    }

    /// Mean walking asymmetry (%).
    pub fn walking_asymmetry(&self) -> Option<f64> {
        self.walking_asymmetry
    }

    /// Mean double support time (% of gait cycle).
    pub fn double_support_time(&self) -> Option<f64> {
        self.double_support_time
    }

    /// Total steps.
    pub fn step_count(&self) -> Option<u64> {
        self.step_count
    }

    /// Mean cadence (steps/min).
    pub fn step_cadence(&self) -> Option<f64> {
        self.step_cadence
    }

    /// Mean six-minute walk test distance (m).
    pub fn six_minute_walk_distance(&self) -> Option<f64> {
        self.six_minute_walk_distance
    }

    /// Value of a metric as a float, regardless of its storage type.
    pub fn value(&self, metric: Metric) -> Option<f64> {
        match metric {
            Metric::WalkingSpeed => self.walking_speed,
            Metric::StepLength => self.step_length,
            Metric::WalkingAsymmetry => self.walking_asymmetry,
            Metric::DoubleSupportTime => self.double_support_time,
            Metric::StepCount => self.step_count.map(|c| c as f64),
            Metric::StepCadence => self.step_cadence,
            Metric::SixMinuteWalkDistance => self.six_minute_walk_distance,
        }
    }

    /// True when no metric has a value.
    pub fn is_empty(&self) -> bool {
        Metric::ALL.iter().all(|m| self.value(*m).is_none())
    }

    /// Number of metrics with a value.
    pub fn present_count(&self) -> usize {
        Metric::ALL
            .iter()
            .filter(|m| self.value(**m).is_some())
            .count()
    }

    pub fn speed_category(&self) -> SpeedCategory {
        classify::speed_category(self.walking_speed)
    }

    pub fn asymmetry_alert(&self) -> bool {
        classify::asymmetry_alert(self.walking_asymmetry)
    }

    pub fn double_support_alert(&self) -> bool {
        classify::double_support_alert(self.double_support_time)
    }

    pub fn step_length_status(&self) -> StepLengthStatus {
        classify::step_length_status(self.step_length)
    }
}

/// Collects per-metric results for one window before the record is frozen.
///
/// Each metric owns exactly one field; setting it twice overwrites.
#[derive(Debug, Clone)]
pub struct GaitRecordBuilder {
    record: GaitRecord,
}

impl GaitRecordBuilder {
    pub fn new(timestamp: DateTime<Utc>) -> Self {
        Self {
            record: GaitRecord {
                timestamp,
                walking_speed: None,
                step_length: None,
                walking_asymmetry: None,
                double_support_time: None,
                step_count: None,
                step_cadence: None,
                six_minute_walk_distance: None,
            },
        }
    }

    /// Set a metric from a float value. Step count is rounded and clamped at zero.
    pub fn set(&mut self, metric: Metric, value: Option<f64>) -> &mut Self {
        let r = &mut self.record;
        match metric {
            Metric::WalkingSpeed => r.walking_speed = value,
            Metric::StepLength => r.step_length = value,
            Metric::WalkingAsymmetry => r.walking_asymmetry = value,
            Metric::DoubleSupportTime => r.double_support_time = value,
            Metric::StepCount => r.step_count = value.map(|v| v.max(0.0).round() as u64),
            Metric::StepCadence => r.step_cadence = value,
            Metric::SixMinuteWalkDistance => r.six_minute_walk_distance = value,
        }
        self
    }

    pub fn walking_speed(mut self, value: f64) -> Self {
        self.record.walking_speed = Some(value);
        self
    }

    pub fn step_length(mut self, value: f64) -> Self {
        self.record.step_length = Some(value);
        self
    }

    pub fn walking_asymmetry(mut self, value: f64) -> Self {
        self.record.walking_asymmetry = Some(value);
        self
    }

    pub fn double_support_time(mut self, value: f64) -> Self {
        self.record.double_support_time = Some(value);
        self
    }

    pub fn step_count(mut self, value: u64) -> Self {
        self.record.step_count = Some(value);
        self
    }

    pub fn step_cadence(mut self, value: f64) -> Self {
        self.record.step_cadence = Some(value);
        self
    }

    pub fn six_minute_walk_distance(mut self, value: f64) -> Self {
        self.record.six_minute_walk_distance = Some(value);
        self
    }

    pub fn build(self) -> GaitRecord {
        self.record
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_record() {
        let record = GaitRecord::empty(Utc::now());
        assert!(record.is_empty());
        assert_eq!(record.present_count(), 0);
        assert_eq!(record.speed_category(), SpeedCategory::Unknown);
        assert!(!record.asymmetry_alert());
        assert!(!record.double_support_alert());
    }

    #[test]
    fn test_zero_step_count_is_not_empty() {
        let mut builder = GaitRecordBuilder::new(Utc::now());
        builder.set(Metric::StepCount, Some(0.0));
        let record = builder.build();

        assert_eq!(record.step_count(), Some(0));
        assert!(!record.is_empty());
    }

    #[test]
    fn test_step_count_rounding() {
        let mut builder = GaitRecordBuilder::new(Utc::now());
        builder.set(Metric::StepCount, Some(59.6));
        assert_eq!(builder.build().step_count(), Some(60));

        let mut builder = GaitRecordBuilder::new(Utc::now());
        builder.set(Metric::StepCount, Some(-3.0));
        assert_eq!(builder.build().step_count(), Some(0));
    }

    #[test]
    fn test_value_lookup_matches_fields() {
        let record = GaitRecord::builder(Utc::now())
            .walking_speed(1.1)
            .step_count(42)
            .build();

        assert_eq!(record.value(Metric::WalkingSpeed), Some(1.1));
        assert_eq!(record.value(Metric::StepCount), Some(42.0));
        assert_eq!(record.value(Metric::StepLength), None);
        assert_eq!(record.present_count(), 2);
    }
}
