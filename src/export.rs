//! Health-data XML export.
//!
//! Records are written in the Apple Health export layout so the file can be
//! opened by the same tooling clinicians already use:
//!
//! ```xml
//! <?xml version="1.0" encoding="UTF-8"?>
//! <HealthData locale="en_US">
//!   <ExportDate value="2025-06-01T12:00:00Z"/>
//!   <Record type="HKQuantityTypeIdentifierWalkingSpeed" sourceName="..." .../>
//! </HealthData>
//! ```
//!
//! Only the four clinical metrics are written, one `Record` per present value.
//! The reader accepts both these files and full device exports.

use crate::core::GaitRecord;
use crate::source::Metric;
use chrono::{DateTime, SecondsFormat, Utc};
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, Event};
use quick_xml::{Reader, Writer};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Errors from writing or reading an export.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportError {
    /// The document could not be produced
    Serialization(String),
    /// The file could not be written or read
    Storage(String),
    /// The document is not a readable health export
    Parse(String),
}

impl std::fmt::Display for ExportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExportError::Serialization(msg) => write!(f, "Export serialization error: {msg}"),
            ExportError::Storage(msg) => write!(f, "Export storage error: {msg}"),
            ExportError::Parse(msg) => write!(f, "Export parse error: {msg}"),
        }
    }
}

impl std::error::Error for ExportError {}

/// Attributes stamped on every exported record.
#[derive(Debug, Clone)]
pub struct ExportOptions {
    pub patient_id: String,
    pub locale: String,
    pub source_name: String,
    pub source_version: String,
    pub device: String,
}

impl ExportOptions {
    pub fn new(patient_id: impl Into<String>) -> Self {
        let device = hostname::get()
            .map(|h| h.to_string_lossy().to_string())
            .unwrap_or_else(|_| "unknown".to_string());

        Self {
            patient_id: patient_id.into(),
            locale: "en_US".to_string(),
            source_name: "Gait Sensor Agent".to_string(),
            source_version: env!("CARGO_PKG_VERSION").to_string(),
            device,
        }
    }

    pub fn with_locale(mut self, locale: impl Into<String>) -> Self {
        self.locale = locale.into();
        self
    }
}

/// One quantity sample read from an export.
#[derive(Debug, Clone, PartialEq)]
pub struct HealthEntry {
    pub metric: Metric,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub value: f64,
    pub unit: Option<String>,
}

/// `{patientId}_gait_export_{unixSeconds}.xml`
pub fn export_file_name(patient_id: &str, at: DateTime<Utc>) -> String {
    format!("{}_gait_export_{}.xml", patient_id, at.timestamp())
}

fn serialization(e: impl std::fmt::Display) -> ExportError {
    ExportError::Serialization(e.to_string())
}

fn iso_instant(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

/// Render `records` as an export document.
pub fn render_export(
    records: &[GaitRecord],
    options: &ExportOptions,
    export_date: DateTime<Utc>,
) -> Result<String, ExportError> {
    let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);

    writer
        .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
        .map_err(serialization)?;
    writer
        .write_event(Event::Start(
            BytesStart::new("HealthData").with_attributes([("locale", options.locale.as_str())]),
        ))
        .map_err(serialization)?;

    let export_date = iso_instant(export_date);
    writer
        .write_event(Event::Empty(
            BytesStart::new("ExportDate").with_attributes([("value", export_date.as_str())]),
        ))
        .map_err(serialization)?;

    for record in records {
        let date = iso_instant(record.timestamp());
        for metric in Metric::CLINICAL {
            let Some(value) = record.value(metric) else {
                continue;
            };
            if !value.is_finite() {
                return Err(ExportError::Serialization(format!(
                    "{metric} value {value} at {date} is not a finite number"
                )));
            }
            let value = value.to_string();
            let element = BytesStart::new("Record").with_attributes([
                ("type", metric.type_identifier()),
                ("sourceName", options.source_name.as_str()),
                ("sourceVersion", options.source_version.as_str()),
                ("device", options.device.as_str()),
                ("unit", metric.unit()),
                ("creationDate", date.as_str()),
                ("startDate", date.as_str()),
                ("endDate", date.as_str()),
                ("value", value.as_str()),
            ]);
            writer.write_event(Event::Empty(element)).map_err(serialization)?;
        }
    }

    writer
        .write_event(Event::End(BytesEnd::new("HealthData")))
        .map_err(serialization)?;

    String::from_utf8(writer.into_inner()).map_err(serialization)
}

/// Write `records` to a new export file in `dir`, returning its path.
pub fn write_export(
    dir: &Path,
    records: &[GaitRecord],
    options: &ExportOptions,
    now: DateTime<Utc>,
) -> Result<PathBuf, ExportError> {
    let document = render_export(records, options, now)?;

    std::fs::create_dir_all(dir)
        .map_err(|e| ExportError::Storage(format!("{}: {e}", dir.display())))?;
    let path = dir.join(export_file_name(&options.patient_id, now));
    std::fs::write(&path, document)
        .map_err(|e| ExportError::Storage(format!("{}: {e}", path.display())))?;

    tracing::info!(path = %path.display(), records = records.len(), "wrote gait export");
    Ok(path)
}

/// Parse an export timestamp. Accepts RFC 3339 and the Apple Health
/// `2025-06-01 08:30:00 -0400` form.
pub fn parse_export_date(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    DateTime::parse_from_rfc3339(value)
        .or_else(|_| DateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S %z"))
        .or_else(|_| DateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%z"))
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Read every gait quantity sample from an export document.
///
/// `Record` elements of other types are skipped.
pub fn parse_export(xml: &str) -> Result<Vec<HealthEntry>, ExportError> {
    let mut reader = Reader::from_reader(xml.as_bytes());
    reader.trim_text(true);
    let mut buf = Vec::new();
    let mut entries = Vec::new();
    let mut saw_root = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) | Ok(Event::Empty(ref e)) => match e.name().as_ref() {
                b"HealthData" => saw_root = true,
                b"Record" => {
                    if let Some(entry) = entry_from_element(&reader, e)? {
                        entries.push(entry);
                    }
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(ExportError::Parse(format!(
                    "at byte {}: {e}",
                    reader.buffer_position()
                )))
            }
            _ => {}
        }
        buf.clear();
    }

    if !saw_root {
        return Err(ExportError::Parse("missing HealthData element".to_string()));
    }
    Ok(entries)
}

fn entry_from_element(
    reader: &Reader<&[u8]>,
    element: &BytesStart,
) -> Result<Option<HealthEntry>, ExportError> {
    let Some(kind) = attr_value(reader, element, "type") else {
        return Ok(None);
    };
    let Some(metric) = Metric::from_type_identifier(&kind) else {
        return Ok(None);
    };

    let required = |key: &str| {
        attr_value(reader, element, key)
            .ok_or_else(|| ExportError::Parse(format!("{kind} record missing {key}")))
    };
    let date = |key: &str| {
        let raw = required(key)?;
        parse_export_date(&raw)
            .ok_or_else(|| ExportError::Parse(format!("{kind} record has bad {key} '{raw}'")))
    };

    let raw_value = required("value")?;
    let value: f64 = raw_value
        .trim()
        .parse()
        .map_err(|_| ExportError::Parse(format!("{kind} record has bad value '{raw_value}'")))?;

    Ok(Some(HealthEntry {
        metric,
        start: date("startDate")?,
        end: date("endDate")?,
        value,
        unit: attr_value(reader, element, "unit"),
    }))
}

fn attr_value(reader: &Reader<&[u8]>, element: &BytesStart, key: &str) -> Option<String> {
    for attr in element.attributes().flatten() {
        let attr_key = reader.decoder().decode(attr.key.as_ref()).ok()?;
        if attr_key == key {
            let value = attr.unescape_value().ok()?;
            return Some(value.to_string());
        }
    }
    None
}

/// Regroup entries into one record per start timestamp, in time order.
pub fn records_from_entries(entries: &[HealthEntry]) -> Vec<GaitRecord> {
    let mut grouped: BTreeMap<DateTime<Utc>, Vec<&HealthEntry>> = BTreeMap::new();
    for entry in entries {
        grouped.entry(entry.start).or_default().push(entry);
    }

    grouped
        .into_iter()
        .map(|(timestamp, entries)| {
            let mut builder = GaitRecord::builder(timestamp);
            for entry in entries {
                builder.set(entry.metric, Some(entry.value));
            }
            builder.build()
        })
        .collect()
}

/// Read an export file from disk.
pub fn read_export(path: &Path) -> Result<Vec<HealthEntry>, ExportError> {
    let xml = std::fs::read_to_string(path)
        .map_err(|e| ExportError::Storage(format!("{}: {e}", path.display())))?;
    parse_export(&xml)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn options() -> ExportOptions {
        ExportOptions {
            patient_id: "P001".to_string(),
            locale: "en_US".to_string(),
            source_name: "Gait Sensor Agent".to_string(),
            source_version: "0.1.0".to_string(),
            device: "test-host".to_string(),
        }
    }

    fn at(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, day, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_file_name() {
        let name = export_file_name("P001", Utc.timestamp_opt(1_717_200_000, 0).unwrap());
        assert_eq!(name, "P001_gait_export_1717200000.xml");
    }

    #[test]
    fn test_document_layout() {
        let record = GaitRecord::builder(at(1)).walking_speed(1.05).build();
        let xml = render_export(&[record], &options(), at(2)).unwrap();

        assert!(xml.starts_with(r#"<?xml version="1.0" encoding="UTF-8"?>"#));
        assert!(xml.contains(r#"<HealthData locale="en_US">"#));
        assert!(xml.contains(r#"<ExportDate value="2025-06-02T00:00:00Z"/>"#));
        assert!(xml.contains(
            r#"<Record type="HKQuantityTypeIdentifierWalkingSpeed" sourceName="Gait Sensor Agent" sourceVersion="0.1.0" device="test-host" unit="m/s" creationDate="2025-06-01T00:00:00Z" startDate="2025-06-01T00:00:00Z" endDate="2025-06-01T00:00:00Z" value="1.05"/>"#
        ));
        assert!(xml.trim_end().ends_with("</HealthData>"));
    }

    #[test]
    fn test_absent_and_non_clinical_metrics_omitted() {
        let record = GaitRecord::builder(at(1))
            .walking_asymmetry(8.5)
            .step_count(4000)
            .step_cadence(100.0)
            .build();
        let xml = render_export(&[record], &options(), at(2)).unwrap();

        assert_eq!(xml.matches("<Record ").count(), 1);
        assert!(xml.contains("WalkingAsymmetryPercentage"));
        assert!(!xml.contains("HKQuantityTypeIdentifierStepCount"));
    }

    #[test]
    fn test_round_trip_preserves_values_and_alerts() {
        let records = vec![
            GaitRecord::builder(at(1))
                .walking_speed(0.7912345678)
                .step_length(0.55)
                .walking_asymmetry(10.01)
                .double_support_time(30.1)
                .build(),
            GaitRecord::builder(at(2))
                .walking_speed(1.3)
                .step_length(0.72)
                .walking_asymmetry(3.2)
                .double_support_time(24.0)
                .build(),
        ];

        let xml = render_export(&records, &options(), at(3)).unwrap();
        let decoded = records_from_entries(&parse_export(&xml).unwrap());

        assert_eq!(decoded.len(), 2);
        for (original, back) in records.iter().zip(&decoded) {
            assert_eq!(back.timestamp(), original.timestamp());
            for metric in Metric::CLINICAL {
                let (a, b) = (original.value(metric).unwrap(), back.value(metric).unwrap());
                assert!((a - b).abs() < 1e-12, "{metric}: {a} vs {b}");
            }
            assert_eq!(back.speed_category(), original.speed_category());
            assert_eq!(back.asymmetry_alert(), original.asymmetry_alert());
            assert_eq!(back.double_support_alert(), original.double_support_alert());
        }
    }

    #[test]
    fn test_reads_device_export_dates_and_skips_unknown_types() {
        let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
<HealthData locale="en_US">
 <ExportDate value="2025-06-03 10:00:00 -0400"/>
 <Record type="HKQuantityTypeIdentifierHeartRate" unit="count/min" startDate="2025-06-01 08:00:00 -0400" endDate="2025-06-01 08:00:00 -0400" value="72"/>
 <Record type="HKQuantityTypeIdentifierStepCount" unit="count" startDate="2025-06-01 08:00:00 -0400" endDate="2025-06-01 08:05:00 -0400" value="312">
  <MetadataEntry key="HKWasUserEntered" value="0"/>
 </Record>
</HealthData>"#;

        let entries = parse_export(xml).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].metric, Metric::StepCount);
        assert_eq!(entries[0].start, Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap());
        assert_eq!(entries[0].value, 312.0);
    }

    #[test]
    fn test_malformed_documents_rejected() {
        assert!(matches!(
            parse_export("<HealthData><Record></HealthData>"),
            Err(ExportError::Parse(_))
        ));
        assert!(matches!(parse_export("<Other/>"), Err(ExportError::Parse(_))));

        let bad_value = r#"<HealthData><Record type="HKQuantityTypeIdentifierWalkingSpeed" startDate="2025-06-01T00:00:00Z" endDate="2025-06-01T00:00:00Z" value="fast"/></HealthData>"#;
        assert!(matches!(parse_export(bad_value), Err(ExportError::Parse(_))));
    }

    #[test]
    fn test_write_export_creates_file() {
        let dir = tempfile::tempdir().unwrap();
        let record = GaitRecord::builder(at(1)).step_length(0.61).build();

        let path = write_export(&dir.path().join("exports"), &[record], &options(), at(4)).unwrap();

        assert_eq!(
            path.file_name().unwrap().to_string_lossy(),
            export_file_name("P001", at(4))
        );
        let entries = read_export(&path).unwrap();
        assert_eq!(entries[0].metric, Metric::StepLength);
    }

    #[test]
    fn test_storage_failure_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, "x").unwrap();

        let result = write_export(&blocker, &[], &options(), at(4));
        assert!(matches!(result, Err(ExportError::Storage(_))));
    }
}
