//! Wire messages exchanged with the collector.
//!
//! Every payload field maps one-to-one onto a [`GaitRecord`] field or one of
//! its derived classifications. Absent metrics are sent as explicit `null`.

use crate::core::GaitRecord;
use crate::source::Metric;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Whether a record is sent as it happens or as part of a historical batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecordKind {
    #[serde(rename = "real_time")]
    Realtime,
    #[serde(rename = "historical")]
    HistoricalBatch,
}

impl RecordKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordKind::Realtime => "real_time",
            RecordKind::HistoricalBatch => "historical",
        }
    }
}

impl std::fmt::Display for RecordKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One gait record as sent to the collector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GaitPayload {
    /// Session key the record belongs to
    pub patient_id: String,
    pub data_type: RecordKind,
    pub walking_speed: Option<f64>,
    pub step_length: Option<f64>,
    pub walking_asymmetry: Option<f64>,
    pub double_support_time: Option<f64>,
    pub step_count: Option<u64>,
    pub step_cadence: Option<f64>,
    pub six_minute_walk_distance: Option<f64>,
    /// Speed category label, "Unknown" when speed is absent
    pub speed_category: String,
    pub asymmetry_alert: bool,
    pub double_support_alert: bool,
    /// Window start (RFC 3339)
    pub timestamp: DateTime<Utc>,
}

impl GaitPayload {
    pub fn from_record(record: &GaitRecord, patient_id: &str, kind: RecordKind) -> Self {
        Self {
            patient_id: patient_id.to_string(),
            data_type: kind,
            walking_speed: record.walking_speed(),
            step_length: record.step_length(),
            walking_asymmetry: record.walking_asymmetry(),
            double_support_time: record.double_support_time(),
            step_count: record.step_count(),
            step_cadence: record.step_cadence(),
            six_minute_walk_distance: record.six_minute_walk_distance(),
            speed_category: record.speed_category().as_str().to_string(),
            asymmetry_alert: record.asymmetry_alert(),
            double_support_alert: record.double_support_alert(),
            timestamp: record.timestamp(),
        }
    }

    /// Rebuild the record carried by this payload. Derived fields are
    /// recomputed from the metric values, not read back.
    pub fn to_record(&self) -> GaitRecord {
        let mut builder = GaitRecord::builder(self.timestamp);
        builder
            .set(Metric::WalkingSpeed, self.walking_speed)
            .set(Metric::StepLength, self.step_length)
            .set(Metric::WalkingAsymmetry, self.walking_asymmetry)
            .set(Metric::DoubleSupportTime, self.double_support_time)
            .set(Metric::StepCount, self.step_count.map(|c| c as f64))
            .set(Metric::StepCadence, self.step_cadence)
            .set(Metric::SixMinuteWalkDistance, self.six_minute_walk_distance);
        builder.build()
    }
}

/// A complete historical sequence sent as a single message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoricalBatch {
    pub patient_id: String,
    /// Always [`RecordKind::HistoricalBatch`]
    pub data_type: RecordKind,
    pub export_date: DateTime<Utc>,
    /// Records in ascending timestamp order
    pub records: Vec<GaitPayload>,
}

impl HistoricalBatch {
    pub fn new(patient_id: &str, records: &[GaitRecord], export_date: DateTime<Utc>) -> Self {
        let mut records: Vec<GaitPayload> = records
            .iter()
            .map(|r| GaitPayload::from_record(r, patient_id, RecordKind::HistoricalBatch))
            .collect();
        records.sort_by_key(|p| p.timestamp);

        Self {
            patient_id: patient_id.to_string(),
            data_type: RecordKind::HistoricalBatch,
            export_date,
            records,
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Acknowledgement sent back by the collector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CollectorAck {
    /// A realtime record was stored
    Received {
        record_id: String,
        timestamp: String,
        alerts_triggered: usize,
    },
    /// A historical batch was stored
    BatchReceived {
        records_processed: usize,
        timestamp: String,
    },
    /// The message could not be understood
    Error { message: String },
}
