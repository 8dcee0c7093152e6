//! Deterministic synthetic gait source.
//!
//! Values are a profile baseline plus bounded pseudo-random variation derived
//! from the sample timestamp, so the same window always yields the same
//! samples. Flare periods degrade every metric in its clinically bad direction.

use crate::core::AggregationWindow;
use crate::source::types::{Metric, Sample};
use crate::source::{MetricSource, SourceError};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Patient profile driving the synthetic baselines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MockProfile {
    Healthy,
    MultipleSclerosis,
    Diabetes,
}

impl std::str::FromStr for MockProfile {
    type Err = SourceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "healthy" => Ok(MockProfile::Healthy),
            "ms" | "multiple_sclerosis" => Ok(MockProfile::MultipleSclerosis),
            "diabetes" => Ok(MockProfile::Diabetes),
            other => Err(SourceError::Setup(format!("Unknown mock profile '{other}'"))),
        }
    }
}

/// An inclusive range of days with degraded gait.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlarePeriod {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl FlarePeriod {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self { start, end }
    }

    fn days_into(&self, day: NaiveDate) -> Option<i64> {
        (day >= self.start && day <= self.end).then(|| (day - self.start).num_days())
    }
}

/// Baseline and spread for one metric.
struct Baseline {
    mean: f64,
    sd: f64,
    /// True when lower values are clinically worse
    low_is_worse: bool,
}

/// Hour of day (UTC) at which the daily six-minute walk test is recorded.
const WALK_TEST_HOUR: u32 = 9;

/// Lower bound applied to every synthetic rate value.
const MIN_VALUE: f64 = 0.2;

/// Synthetic source that never touches real sensor data.
#[derive(Debug, Clone)]
pub struct MockSource {
    profile: MockProfile,
    sample_interval_secs: i64,
    flares: Vec<FlarePeriod>,
    unavailable: HashSet<Metric>,
    latency: Option<std::time::Duration>,
}

impl MockSource {
    pub fn new(profile: MockProfile) -> Self {
        Self {
            profile,
            sample_interval_secs: 60,
            flares: Vec::new(),
            unavailable: HashSet::new(),
            latency: None,
        }
    }

    /// Set the spacing between generated samples (minimum one second).
    pub fn with_sample_interval(mut self, secs: u64) -> Self {
        self.sample_interval_secs = secs.max(1) as i64;
        self
    }

    pub fn with_flares(mut self, flares: Vec<FlarePeriod>) -> Self {
        self.flares = flares;
        self
    }

    /// Make the given channels fail every fetch.
    pub fn with_unavailable(mut self, metrics: impl IntoIterator<Item = Metric>) -> Self {
        self.unavailable.extend(metrics);
        self
    }

    /// Delay every fetch, emulating a slow provider.
    pub fn with_latency(mut self, latency: std::time::Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn profile(&self) -> MockProfile {
        self.profile
    }

    fn baseline(&self, metric: Metric) -> Baseline {
        use MockProfile::*;
        let (mean, sd, low_is_worse) = match (metric, self.profile) {
            (Metric::WalkingSpeed, Healthy) => (1.4, 0.1, true),
            (Metric::WalkingSpeed, MultipleSclerosis) => (1.0, 0.1, true),
            (Metric::WalkingSpeed, Diabetes) => (1.1, 0.1, true),
            (Metric::StepLength, Healthy) => (0.75, 0.05, true),
            (Metric::StepLength, MultipleSclerosis) => (0.6, 0.05, true),
            (Metric::StepLength, Diabetes) => (0.65, 0.05, true),
            (Metric::WalkingAsymmetry, Healthy) => (4.0, 0.4, false),
            (Metric::WalkingAsymmetry, MultipleSclerosis) => (9.0, 0.9, false),
            (Metric::WalkingAsymmetry, Diabetes) => (6.0, 0.6, false),
            (Metric::DoubleSupportTime, Healthy) => (24.0, 2.4, false),
            (Metric::DoubleSupportTime, MultipleSclerosis) => (29.0, 2.9, false),
            (Metric::DoubleSupportTime, Diabetes) => (26.0, 2.6, false),
            (Metric::StepCadence | Metric::StepCount, Healthy) => (110.0, 5.0, true),
            (Metric::StepCadence | Metric::StepCount, MultipleSclerosis) => (98.0, 5.0, true),
            (Metric::StepCadence | Metric::StepCount, Diabetes) => (104.0, 5.0, true),
            (Metric::SixMinuteWalkDistance, Healthy) => (560.0, 30.0, true),
            (Metric::SixMinuteWalkDistance, MultipleSclerosis) => (420.0, 30.0, true),
            (Metric::SixMinuteWalkDistance, Diabetes) => (480.0, 30.0, true),
        };
        Baseline {
            mean,
            sd,
            low_is_worse,
        }
    }

    /// Synthetic value of `metric` at `timestamp`.
    fn value_at(&self, metric: Metric, timestamp: DateTime<Utc>) -> f64 {
        let baseline = self.baseline(metric);
        let mut value = baseline.mean + baseline.sd * jitter(timestamp.timestamp(), metric as u64);

        let day = timestamp.date_naive();
        for flare in &self.flares {
            if let Some(days) = flare.days_into(day) {
                let drop = (baseline.sd * (2.0 - 0.3 * days as f64)).max(baseline.sd * 0.3);
                if baseline.low_is_worse {
                    value -= drop;
                } else {
                    value += drop;
                }
            }
        }

        value.max(MIN_VALUE)
    }

    fn generate(&self, metric: Metric, window: AggregationWindow) -> Vec<Sample> {
        if metric == Metric::SixMinuteWalkDistance {
            return self.daily_walk_tests(window);
        }

        let interval = self.sample_interval_secs;
        let start = window.start().timestamp();
        let first = start.div_euclid(interval) * interval
            + if start.rem_euclid(interval) == 0 { 0 } else { interval };

        let mut samples = Vec::new();
        let mut secs = first;
        while let Some(timestamp) = Utc.timestamp_opt(secs, 0).single() {
            if !window.contains(timestamp) {
                break;
            }
            let value = if metric == Metric::StepCount {
                (self.value_at(Metric::StepCadence, timestamp) * interval as f64 / 60.0).round()
            } else {
                self.value_at(metric, timestamp)
            };
            samples.push(Sample::new(timestamp, value));
            secs += interval;
        }
        samples
    }

    fn daily_walk_tests(&self, window: AggregationWindow) -> Vec<Sample> {
        let mut samples = Vec::new();
        let mut day = window.start().date_naive();
        while let Some(at) = day.and_hms_opt(WALK_TEST_HOUR, 0, 0) {
            let timestamp = at.and_utc();
            if timestamp >= window.end() {
                break;
            }
            if window.contains(timestamp) {
                samples.push(Sample::new(
                    timestamp,
                    self.value_at(Metric::SixMinuteWalkDistance, timestamp),
                ));
            }
            match day.succ_opt() {
                Some(next) => day = next,
                None => break,
            }
        }
        samples
    }
}

#[async_trait]
impl MetricSource for MockSource {
    async fn fetch_samples(
        &self,
        metric: Metric,
        window: AggregationWindow,
    ) -> Result<Vec<Sample>, SourceError> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        if self.unavailable.contains(&metric) {
            return Err(SourceError::ChannelUnavailable {
                metric,
                reason: "channel disabled in mock source".to_string(),
            });
        }
        Ok(self.generate(metric, window))
    }

    fn describe(&self) -> String {
        format!(
            "mock ({:?}, one sample every {}s)",
            self.profile, self.sample_interval_secs
        )
    }
}

/// Deterministic variation in [-1, 1) for a timestamp and channel salt.
fn jitter(secs: i64, salt: u64) -> f64 {
    let mut z = (secs as u64)
        .wrapping_add(salt.wrapping_mul(0x9E37_79B9_7F4A_7C15))
        .wrapping_add(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^= z >> 31;
    (z >> 11) as f64 / (1u64 << 53) as f64 * 2.0 - 1.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn window(start: DateTime<Utc>, secs: i64) -> AggregationWindow {
        AggregationWindow::new(start, start + Duration::seconds(secs)).unwrap()
    }

    fn at(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn test_samples_fall_inside_window() {
        let source = MockSource::new(MockProfile::Healthy).with_sample_interval(60);
        let w = window(at(2025, 6, 1, 12), 600);
        let samples = source.fetch_samples(Metric::WalkingSpeed, w).await.unwrap();

        assert_eq!(samples.len(), 10);
        assert!(samples.iter().all(|s| w.contains(s.timestamp)));
    }

    #[tokio::test]
    async fn test_generation_is_deterministic() {
        let source = MockSource::new(MockProfile::MultipleSclerosis);
        let w = window(at(2025, 6, 1, 12), 3600);
        let a = source.fetch_samples(Metric::StepLength, w).await.unwrap();
        let b = source.fetch_samples(Metric::StepLength, w).await.unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn test_unavailable_channel_fails() {
        let source = MockSource::new(MockProfile::Healthy).with_unavailable([Metric::StepCount]);
        let w = window(at(2025, 6, 1, 12), 60);
        assert!(source.fetch_samples(Metric::StepCount, w).await.is_err());
        assert!(source.fetch_samples(Metric::WalkingSpeed, w).await.is_ok());
    }

    #[tokio::test]
    async fn test_walk_test_recorded_once_per_day() {
        let source = MockSource::new(MockProfile::Healthy);
        let w = window(at(2025, 6, 1, 0), 3 * 86_400);
        let samples = source
            .fetch_samples(Metric::SixMinuteWalkDistance, w)
            .await
            .unwrap();
        assert_eq!(samples.len(), 3);

        let night = window(at(2025, 6, 1, 12), 3600);
        let none = source
            .fetch_samples(Metric::SixMinuteWalkDistance, night)
            .await
            .unwrap();
        assert!(none.is_empty());
    }

    #[test]
    fn test_flare_degrades_speed() {
        let day = NaiveDate::from_ymd_opt(2025, 6, 26).unwrap();
        let plain = MockSource::new(MockProfile::MultipleSclerosis);
        let flaring = plain
            .clone()
            .with_flares(vec![FlarePeriod::new(day, day + Duration::days(2))]);

        let ts = at(2025, 6, 26, 10);
        assert!(
            flaring.value_at(Metric::WalkingSpeed, ts) < plain.value_at(Metric::WalkingSpeed, ts)
        );
        assert!(
            flaring.value_at(Metric::DoubleSupportTime, ts)
                > plain.value_at(Metric::DoubleSupportTime, ts)
        );
    }

    #[test]
    fn test_jitter_bounds() {
        for secs in 0..1000 {
            let j = jitter(secs * 37, 3);
            assert!((-1.0..1.0).contains(&j));
        }
    }
}
