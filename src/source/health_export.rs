//! Source backed by a health-data XML export.
//!
//! The whole export is parsed once; samples are kept per metric in time order
//! and each fetch returns the slice that falls inside the window.

use crate::core::AggregationWindow;
use crate::export::{self, HealthEntry};
use crate::source::types::{Metric, Sample};
use crate::source::{MetricSource, SourceError};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Replays samples from a health export file.
#[derive(Debug, Clone)]
pub struct HealthExportSource {
    origin: Option<PathBuf>,
    samples: HashMap<Metric, Vec<Sample>>,
}

impl HealthExportSource {
    /// Load and index an export file.
    pub fn from_file(path: &Path) -> Result<Self, SourceError> {
        let entries = export::read_export(path)
            .map_err(|e| SourceError::Setup(format!("{}: {e}", path.display())))?;
        let mut source = Self::from_entries(&entries);
        source.origin = Some(path.to_path_buf());

        tracing::info!(
            path = %path.display(),
            samples = source.sample_count(),
            "loaded health export"
        );
        Ok(source)
    }

    /// Index already-parsed entries. A sample is stamped with its start date.
    pub fn from_entries(entries: &[HealthEntry]) -> Self {
        let mut samples: HashMap<Metric, Vec<Sample>> = HashMap::new();
        for entry in entries {
            samples
                .entry(entry.metric)
                .or_default()
                .push(Sample::new(entry.start, entry.value));
        }
        for channel in samples.values_mut() {
            channel.sort_by_key(|s| s.timestamp);
        }

        Self {
            origin: None,
            samples,
        }
    }

    pub fn sample_count(&self) -> usize {
        self.samples.values().map(Vec::len).sum()
    }

    fn window_slice(&self, metric: Metric, window: AggregationWindow) -> &[Sample] {
        let Some(channel) = self.samples.get(&metric) else {
            return &[];
        };
        let from = channel.partition_point(|s| s.timestamp < window.start());
        let to = channel.partition_point(|s| s.timestamp < window.end());
        &channel[from..to]
    }
}

#[async_trait]
impl MetricSource for HealthExportSource {
    async fn fetch_samples(
        &self,
        metric: Metric,
        window: AggregationWindow,
    ) -> Result<Vec<Sample>, SourceError> {
        Ok(self.window_slice(metric, window).to_vec())
    }

    fn describe(&self) -> String {
        match &self.origin {
            Some(path) => format!(
                "health export {} ({} samples)",
                path.display(),
                self.sample_count()
            ),
            None => format!("health export ({} samples)", self.sample_count()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Duration, TimeZone, Utc};

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, h, m, 0).unwrap()
    }

    fn entry(metric: Metric, start: DateTime<Utc>, value: f64) -> HealthEntry {
        HealthEntry {
            metric,
            start,
            end: start,
            value,
            unit: None,
        }
    }

    #[tokio::test]
    async fn test_window_is_half_open() {
        let source = HealthExportSource::from_entries(&[
            entry(Metric::WalkingSpeed, at(10, 0), 1.0),
            entry(Metric::WalkingSpeed, at(10, 30), 1.2),
            entry(Metric::WalkingSpeed, at(11, 0), 1.4),
            entry(Metric::StepCount, at(10, 15), 40.0),
        ]);
        let window = AggregationWindow::new(at(10, 0), at(11, 0)).unwrap();

        let speed = source
            .fetch_samples(Metric::WalkingSpeed, window)
            .await
            .unwrap();
        let values: Vec<f64> = speed.iter().map(|s| s.value).collect();
        assert_eq!(values, vec![1.0, 1.2]);

        let steps = source.fetch_samples(Metric::StepCount, window).await.unwrap();
        assert_eq!(steps.len(), 1);
    }

    #[tokio::test]
    async fn test_missing_metric_is_empty_not_error() {
        let source =
            HealthExportSource::from_entries(&[entry(Metric::WalkingSpeed, at(10, 0), 1.0)]);
        let window = AggregationWindow::new(at(9, 0), at(9, 0) + Duration::hours(3)).unwrap();

        let samples = source
            .fetch_samples(Metric::DoubleSupportTime, window)
            .await
            .unwrap();
        assert!(samples.is_empty());
    }

    #[tokio::test]
    async fn test_unsorted_entries_are_indexed() {
        let source = HealthExportSource::from_entries(&[
            entry(Metric::StepLength, at(12, 0), 0.7),
            entry(Metric::StepLength, at(8, 0), 0.6),
        ]);
        let window = AggregationWindow::new(at(7, 0), at(9, 0)).unwrap();

        let samples = source.fetch_samples(Metric::StepLength, window).await.unwrap();
        assert_eq!(samples, vec![Sample::new(at(8, 0), 0.6)]);
    }

    #[test]
    fn test_missing_file_is_setup_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = HealthExportSource::from_file(&dir.path().join("absent.xml"));
        assert!(matches!(result, Err(SourceError::Setup(_))));
    }
}
