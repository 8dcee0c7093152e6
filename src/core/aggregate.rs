//! Window aggregation.
//!
//! One window fans out into one fetch per metric. All fetches run
//! concurrently and the record is only built after every one of them has
//! answered, so a record never misses a channel because of a race.

use crate::core::record::{GaitRecord, GaitRecordBuilder};
use crate::core::window::AggregationWindow;
use crate::source::{AggregationKind, Metric, MetricSource, Sample, SourceError};
use crate::transparency::SharedTransparencyLog;
use futures_util::future::join_all;
use std::sync::Arc;

/// Fuses raw samples from a [`MetricSource`] into [`GaitRecord`]s.
pub struct WindowAggregator {
    source: Arc<dyn MetricSource>,
    metrics: Vec<Metric>,
    log: Option<SharedTransparencyLog>,
}

impl WindowAggregator {
    /// Aggregate every known metric.
    pub fn new(source: Arc<dyn MetricSource>) -> Self {
        Self {
            source,
            metrics: Metric::ALL.to_vec(),
            log: None,
        }
    }

    /// Restrict aggregation to a subset of metrics; the rest stay absent.
    pub fn with_metrics(mut self, metrics: impl IntoIterator<Item = Metric>) -> Self {
        let mut metrics: Vec<Metric> = metrics.into_iter().collect();
        metrics.sort();
        metrics.dedup();
        self.metrics = metrics;
        self
    }

    /// Count windows and channel failures in a transparency log.
    pub fn with_log(mut self, log: SharedTransparencyLog) -> Self {
        self.log = Some(log);
        self
    }

    pub fn metrics(&self) -> &[Metric] {
        &self.metrics
    }

    pub fn source(&self) -> &Arc<dyn MetricSource> {
        &self.source
    }

    /// Build the record for `window`. Never fails: unavailable channels
    /// become absent fields.
    pub async fn aggregate(&self, window: AggregationWindow) -> GaitRecord {
        self.aggregate_window(window).await.record
    }

    /// Like [`aggregate`](Self::aggregate), but also reports how many
    /// in-window samples the record was fused from.
    pub async fn aggregate_window(&self, window: AggregationWindow) -> WindowAggregate {
        let fetches = self.metrics.iter().map(|&metric| async move {
            let result = self.source.fetch_samples(metric, window).await;
            (metric, result)
        });
        let results = join_all(fetches).await;

        let mut builder = GaitRecordBuilder::new(window.start());
        let mut samples_seen = 0;
        for (metric, result) in results {
            let value = match result {
                Ok(samples) => {
                    samples_seen += samples
                        .iter()
                        .filter(|s| window.contains(s.timestamp))
                        .count();
                    fuse(metric, window, &samples)
                }
                Err(e) => {
                    self.record_failure(&e);
                    None
                }
            };
            builder.set(metric, value);
        }

        if let Some(log) = &self.log {
            log.record_window_aggregated();
        }

        let record = builder.build();
        tracing::debug!(
            window = %window,
            present = record.present_count(),
            samples = samples_seen,
            "aggregated window"
        );
        WindowAggregate {
            record,
            samples_seen,
        }
    }

    fn record_failure(&self, error: &SourceError) {
        tracing::warn!("{error}; field left absent");
        if let Some(log) = &self.log {
            log.record_channel_failure();
        }
    }
}

/// A fused record plus the number of samples behind it.
///
/// A step count of zero is a real value in a daily record, but a window where
/// no channel returned any sample carries no gait data at all.
#[derive(Debug, Clone, PartialEq)]
pub struct WindowAggregate {
    pub record: GaitRecord,
    pub samples_seen: usize,
}

impl WindowAggregate {
    /// True when at least one channel returned a sample inside the window.
    pub fn has_samples(&self) -> bool {
        self.samples_seen > 0
    }
}

/// Fuse the samples of one metric that fall in `window`.
///
/// Mean metrics with no samples are absent; sum metrics with no samples are zero.
pub fn fuse(metric: Metric, window: AggregationWindow, samples: &[Sample]) -> Option<f64> {
    let values: Vec<f64> = samples
        .iter()
        .filter(|s| window.contains(s.timestamp))
        .map(|s| s.value)
        .collect();

    match metric.aggregation() {
        AggregationKind::Sum => Some(values.iter().sum()),
        AggregationKind::Mean if values.is_empty() => None,
        AggregationKind::Mean => Some(values.iter().sum::<f64>() / values.len() as f64),
    }
}
