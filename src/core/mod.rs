//! Core functionality for the Gait Sensor Agent.
//!
//! This module contains:
//! - Aggregation windows and the fan-out/fan-in window aggregator
//! - The immutable gait record and its builder
//! - Clinical classification and alerts
//! - Personal-baseline trend analysis

pub mod aggregate;
pub mod baseline;
pub mod classify;
pub mod record;
pub mod window;

// Re-export commonly used types
pub use aggregate::{WindowAggregate, WindowAggregator};
pub use baseline::{analyze_trends, MetricTrend, TrendDirection, TrendStatus};
pub use classify::{
    alerts, classify, AlertKind, AlertSeverity, Classification, ClinicalAlert, SpeedCategory,
    StepLengthStatus,
};
pub use record::{GaitRecord, GaitRecordBuilder};
pub use window::{AggregationWindow, WindowError};
