//! Metric sources for the Gait Sensor Agent.
//!
//! A source answers one question: which raw samples of a metric fall inside a
//! window. Two implementations exist, chosen by [`SourceKind`] in the
//! configuration:
//!
//! - [`MockSource`]: deterministic synthetic gait data for a patient profile
//! - [`HealthExportSource`]: samples replayed from a health-data XML export

pub mod health_export;
pub mod mock;
pub mod types;

use crate::config::SourceConfig;
use crate::core::AggregationWindow;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub use health_export::HealthExportSource;
pub use mock::{FlarePeriod, MockProfile, MockSource};
pub use types::{AggregationKind, Metric, Sample};

/// Errors returned by a metric source.
#[derive(Debug, Clone)]
pub enum SourceError {
    /// The channel for a metric could not be queried
    ChannelUnavailable { metric: Metric, reason: String },
    /// The source itself could not be constructed
    Setup(String),
}

impl std::fmt::Display for SourceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceError::ChannelUnavailable { metric, reason } => {
                write!(f, "{metric} channel unavailable: {reason}")
            }
            SourceError::Setup(msg) => write!(f, "Source setup error: {msg}"),
        }
    }
}

impl std::error::Error for SourceError {}

/// Supplier of raw timestamped samples per metric channel.
///
/// Implementations may return zero samples for a channel and may fail per
/// channel; a failure for one metric says nothing about the others.
#[async_trait]
pub trait MetricSource: Send + Sync {
    /// Fetch every sample of `metric` whose timestamp lies in `window`.
    async fn fetch_samples(
        &self,
        metric: Metric,
        window: AggregationWindow,
    ) -> Result<Vec<Sample>, SourceError>;

    /// Short description for status output.
    fn describe(&self) -> String;
}

/// Which source implementation to construct.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Mock,
    HealthExport,
}

impl std::str::FromStr for SourceKind {
    type Err = SourceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "mock" => Ok(SourceKind::Mock),
            "health_export" | "health-export" | "export" => Ok(SourceKind::HealthExport),
            other => Err(SourceError::Setup(format!("Unknown source kind '{other}'"))),
        }
    }
}

/// Build the configured source.
pub fn build_source(config: &SourceConfig) -> Result<Arc<dyn MetricSource>, SourceError> {
    match config.kind {
        SourceKind::Mock => Ok(Arc::new(
            MockSource::new(config.profile)
                .with_sample_interval(config.sample_interval_secs)
                .with_flares(config.flares.clone()),
        )),
        SourceKind::HealthExport => {
            let path = config.export_file.as_ref().ok_or_else(|| {
                SourceError::Setup("health_export source requires export_file".to_string())
            })?;
            Ok(Arc::new(HealthExportSource::from_file(path)?))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_kind_parsing() {
        assert_eq!("mock".parse::<SourceKind>().unwrap(), SourceKind::Mock);
        assert_eq!(
            "Health-Export".parse::<SourceKind>().unwrap(),
            SourceKind::HealthExport
        );
        assert!("healthkit".parse::<SourceKind>().is_err());
    }

    #[test]
    fn test_health_export_requires_file() {
        let config = SourceConfig {
            kind: SourceKind::HealthExport,
            export_file: None,
            ..SourceConfig::default()
        };
        assert!(matches!(build_source(&config), Err(SourceError::Setup(_))));
    }
}
