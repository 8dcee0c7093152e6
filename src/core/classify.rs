//! Clinical classification of gait records.
//!
//! Every function here is pure: the same inputs always give the same outputs.
//! Thresholds are fixed population values (m/s, m, %).

use crate::core::record::GaitRecord;
use serde::{Deserialize, Serialize};

/// Below this walking speed gait is severely impaired (m/s).
pub const SPEED_SEVERE_BELOW: f64 = 0.8;
/// Below this walking speed gait is mildly impaired (m/s).
pub const SPEED_MILD_BELOW: f64 = 1.0;
/// At or above this walking speed gait is above average (m/s).
pub const SPEED_ABOVE_AVERAGE_FROM: f64 = 1.3;
/// Asymmetry strictly above this raises an alert (%).
pub const ASYMMETRY_ALERT_ABOVE: f64 = 10.0;
/// Double support strictly above this raises an alert (%).
pub const DOUBLE_SUPPORT_ALERT_ABOVE: f64 = 30.0;
/// Step length below this is reduced (m).
pub const STEP_LENGTH_REDUCED_BELOW: f64 = 0.6;

/// Ordinal walking speed severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum SpeedCategory {
    SeverelyImpaired,
    MildlyImpaired,
    Normal,
    AboveAverage,
    Unknown,
}

impl SpeedCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            SpeedCategory::SeverelyImpaired => "Severely Impaired",
            SpeedCategory::MildlyImpaired => "Mildly Impaired",
            SpeedCategory::Normal => "Normal",
            SpeedCategory::AboveAverage => "Above Average",
            SpeedCategory::Unknown => "Unknown",
        }
    }
}

impl std::fmt::Display for SpeedCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Display-only step length status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StepLengthStatus {
    Reduced,
    Normal,
    NoData,
}

impl StepLengthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepLengthStatus::Reduced => "Reduced",
            StepLengthStatus::Normal => "Normal",
            StepLengthStatus::NoData => "No Data",
        }
    }
}

impl std::fmt::Display for StepLengthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

pub fn speed_category(speed: Option<f64>) -> SpeedCategory {
    match speed {
        None => SpeedCategory::Unknown,
        Some(s) if s < SPEED_SEVERE_BELOW => SpeedCategory::SeverelyImpaired,
        Some(s) if s < SPEED_MILD_BELOW => SpeedCategory::MildlyImpaired,
        Some(s) if s < SPEED_ABOVE_AVERAGE_FROM => SpeedCategory::Normal,
        Some(_) => SpeedCategory::AboveAverage,
    }
}

pub fn asymmetry_alert(asymmetry: Option<f64>) -> bool {
    asymmetry.is_some_and(|a| a > ASYMMETRY_ALERT_ABOVE)
}

pub fn double_support_alert(double_support: Option<f64>) -> bool {
    double_support.is_some_and(|d| d > DOUBLE_SUPPORT_ALERT_ABOVE)
}

pub fn step_length_status(step_length: Option<f64>) -> StepLengthStatus {
    match step_length {
        None => StepLengthStatus::NoData,
        Some(l) if l < STEP_LENGTH_REDUCED_BELOW => StepLengthStatus::Reduced,
        Some(_) => StepLengthStatus::Normal,
    }
}

/// All derived fields of a record at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classification {
    pub speed_category: SpeedCategory,
    pub asymmetry_alert: bool,
    pub double_support_alert: bool,
    pub step_length_status: StepLengthStatus,
}

pub fn classify(record: &GaitRecord) -> Classification {
    Classification {
        speed_category: speed_category(record.walking_speed()),
        asymmetry_alert: asymmetry_alert(record.walking_asymmetry()),
        double_support_alert: double_support_alert(record.double_support_time()),
        step_length_status: step_length_status(record.step_length()),
    }
}

/// Kind of clinical alert raised for a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    WalkingSpeedLow,
    AsymmetryHigh,
    DoubleSupportHigh,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertSeverity {
    Medium,
    High,
}

/// A threshold crossing worth a clinician's attention.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClinicalAlert {
    #[serde(rename = "type")]
    pub kind: AlertKind,
    pub severity: AlertSeverity,
    pub message: String,
    pub value: f64,
}

/// Alerts raised by a record, in a fixed order: speed, asymmetry, double support.
pub fn alerts(record: &GaitRecord) -> Vec<ClinicalAlert> {
    let mut alerts = Vec::new();

    if let Some(speed) = record.walking_speed() {
        if speed < SPEED_SEVERE_BELOW {
            alerts.push(ClinicalAlert {
                kind: AlertKind::WalkingSpeedLow,
                severity: AlertSeverity::High,
                message: format!(
                    "Walking speed below threshold: {speed:.2} m/s (threshold: {SPEED_SEVERE_BELOW} m/s)"
                ),
                value: speed,
            });
        }
    }

    if let Some(asymmetry) = record.walking_asymmetry() {
        if asymmetry_alert(Some(asymmetry)) {
            alerts.push(ClinicalAlert {
                kind: AlertKind::AsymmetryHigh,
                severity: AlertSeverity::Medium,
                message: format!(
                    "High gait asymmetry detected: {asymmetry:.1}% (threshold: {ASYMMETRY_ALERT_ABOVE}%)"
                ),
                value: asymmetry,
            });
        }
    }

    if let Some(double_support) = record.double_support_time() {
        if double_support_alert(Some(double_support)) {
            alerts.push(ClinicalAlert {
                kind: AlertKind::DoubleSupportHigh,
                severity: AlertSeverity::Medium,
                message: format!(
                    "Increased double support time: {double_support:.1}% (threshold: {DOUBLE_SUPPORT_ALERT_ABOVE}%)"
                ),
                value: double_support,
            });
        }
    }

    alerts
}
