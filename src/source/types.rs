//! Gait metric channels and raw sample types.
//!
//! A sample carries only a timestamp and a value. Units are fixed per metric.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How raw samples of a metric are fused into one window value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregationKind {
    /// Arithmetic mean (rates and percentages)
    Mean,
    /// Arithmetic sum (counts)
    Sum,
}

/// A gait metric channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    WalkingSpeed,
    StepLength,
    WalkingAsymmetry,
    DoubleSupportTime,
    StepCount,
    StepCadence,
    SixMinuteWalkDistance,
}

impl Metric {
    /// Every metric channel, in wire-field order.
    pub const ALL: [Metric; 7] = [
        Metric::WalkingSpeed,
        Metric::StepLength,
        Metric::WalkingAsymmetry,
        Metric::DoubleSupportTime,
        Metric::StepCount,
        Metric::StepCadence,
        Metric::SixMinuteWalkDistance,
    ];

    /// The four metrics written to the clinical export file.
    pub const CLINICAL: [Metric; 4] = [
        Metric::WalkingSpeed,
        Metric::StepLength,
        Metric::WalkingAsymmetry,
        Metric::DoubleSupportTime,
    ];

    pub fn aggregation(&self) -> AggregationKind {
        match self {
            Metric::StepCount => AggregationKind::Sum,
            _ => AggregationKind::Mean,
        }
    }

    /// Health-data type identifier used in export files.
    pub fn type_identifier(&self) -> &'static str {
        match self {
            Metric::WalkingSpeed => "HKQuantityTypeIdentifierWalkingSpeed",
            Metric::StepLength => "HKQuantityTypeIdentifierStepLength",
            Metric::WalkingAsymmetry => "HKQuantityTypeIdentifierWalkingAsymmetryPercentage",
            Metric::DoubleSupportTime => "HKQuantityTypeIdentifierWalkingDoubleSupportPercentage",
            Metric::StepCount => "HKQuantityTypeIdentifierStepCount",
            Metric::StepCadence => "HKQuantityTypeIdentifierWalkingStepCadence",
            Metric::SixMinuteWalkDistance => "HKQuantityTypeIdentifierSixMinuteWalkTestDistance",
        }
    }

    pub fn from_type_identifier(identifier: &str) -> Option<Metric> {
        Metric::ALL
            .into_iter()
            .find(|m| m.type_identifier() == identifier)
    }

    pub fn unit(&self) -> &'static str {
        match self {
            Metric::WalkingSpeed => "m/s",
            Metric::StepLength => "m",
            Metric::WalkingAsymmetry => "%",
            Metric::DoubleSupportTime => "%",
            Metric::StepCount => "count",
            Metric::StepCadence => "count/min",
            Metric::SixMinuteWalkDistance => "m",
        }
    }

    /// Human-readable label.
    pub fn label(&self) -> &'static str {
        match self {
            Metric::WalkingSpeed => "Walking Speed",
            Metric::StepLength => "Step Length",
            Metric::WalkingAsymmetry => "Walking Asymmetry",
            Metric::DoubleSupportTime => "Double Support Time",
            Metric::StepCount => "Step Count",
            Metric::StepCadence => "Step Cadence",
            Metric::SixMinuteWalkDistance => "Six-Minute Walk Distance",
        }
    }
}

impl std::fmt::Display for Metric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// A single raw reading from a metric channel.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// When the reading was taken
    pub timestamp: DateTime<Utc>,
    /// Reading value in the metric's unit
    pub value: f64,
}

impl Sample {
    pub fn new(timestamp: DateTime<Utc>, value: f64) -> Self {
        Self { timestamp, value }
    }
}
