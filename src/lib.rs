//! Gait Sensor Agent - gait aggregation and transmission for MS symptom tracking.
//!
//! This library turns irregular walking-gait samples into one clinical record
//! per time window, classifies each record against fixed thresholds, and
//! delivers the results to a remote collector or an Apple-Health-compatible
//! export file.
//!
//! # Data Handling
//!
//! - **Aggregates only**: Raw samples never leave the device, only per-window means and sums
//! - **Absent is not zero**: A metric with no data is sent as `null`, never as `0`
//! - **No diagnosis**: Classifications are fixed thresholds to support, not replace, a clinician
//! - **Transparency**: Every aggregation, transmission and export is counted and auditable
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                        Gait Sensor Agent                         │
//! ├──────────────────────────────────────────────────────────────────┤
//! │  ┌────────────┐   ┌────────────┐   ┌────────────┐                │
//! │  │   Metric   │──▶│   Window   │──▶│ GaitRecord │──┐             │
//! │  │   Source   │   │ Aggregator │   │ + classify │  │             │
//! │  └────────────┘   └────────────┘   └────────────┘  │             │
//! │                     ▲        ▲                      ▼             │
//! │              ┌──────┴───┐ ┌──┴────────┐   ┌──────────────────┐   │
//! │              │   Live   │ │ Backfill  │   │ Transmission /   │   │
//! │              │ Monitor  │ │ (per day) │   │ XML export       │   │
//! │              └──────────┘ └───────────┘   └──────────────────┘   │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use gait_sensor_agent::{Config, GaitEngine};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let engine = GaitEngine::from_config(Config::load()?)?;
//!
//! engine.start_monitoring(|record| {
//!     println!("{}: {:?}", record.timestamp(), record.speed_category());
//! });
//!
//! let history = engine.request_historical().await?;
//! let path = engine.request_export(&history)?;
//! println!("exported to {}", path.display());
//! # Ok(())
//! # }
//! ```

pub mod backfill;
pub mod config;
pub mod core;
pub mod engine;
pub mod export;
pub mod monitor;
pub mod source;
pub mod transmission;
pub mod transparency;

#[cfg(feature = "server")]
pub mod server;

// Re-export key types at crate root for convenience
pub use backfill::{BackfillError, HistoricalBackfillPlanner};
pub use config::{Config, SourceConfig};
pub use core::{
    analyze_trends, classify, AggregationWindow, ClinicalAlert, GaitRecord, SpeedCategory,
    WindowAggregator,
};
pub use engine::{Delivery, EngineError, GaitEngine};
pub use export::{ExportError, ExportOptions};
pub use monitor::{LiveMonitorLoop, MonitorConfig};
pub use source::{Metric, MetricSource, MockProfile, MockSource, Sample, SourceError};
pub use transmission::{ConnectionState, RecordKind, TransmissionChannel, TransmissionError};
pub use transparency::{SharedTransparencyLog, TransparencyLog, TransparencyStats};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Clinical use notice that can be displayed to users.
pub const CLINICAL_DISCLAIMER: &str = r#"
╔══════════════════════════════════════════════════════════════════╗
║              GAIT SENSOR AGENT - CLINICAL USE NOTICE             ║
╠══════════════════════════════════════════════════════════════════╣
║                                                                  ║
║  This agent summarizes walking-gait measurements for             ║
║  longitudinal symptom tracking.                                  ║
║                                                                  ║
║  ✓ WHAT IT DOES:                                                 ║
║    • Averages walking speed, step length, asymmetry and          ║
║      double support time over fixed windows                      ║
║    • Flags values beyond fixed clinical thresholds               ║
║    • Sends summaries to your care team's collector, or           ║
║      writes them to a health-data export file                    ║
║                                                                  ║
║  ✗ WHAT IT NEVER DOES:                                           ║
║    • Diagnose, predict or treat any condition                    ║
║    • Send raw sensor samples off this device                     ║
║    • Fill in missing measurements with made-up values            ║
║                                                                  ║
║  Speak to your clinician before acting on any alert.             ║
║                                                                  ║
║  You can view data handling statistics anytime with:             ║
║    gait-sensor status                                            ║
║                                                                  ║
╚══════════════════════════════════════════════════════════════════╝
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clinical_disclaimer_contents() {
        assert!(CLINICAL_DISCLAIMER.contains("CLINICAL USE NOTICE"));
        assert!(CLINICAL_DISCLAIMER.contains("NEVER DOES"));
        assert!(CLINICAL_DISCLAIMER.contains("raw sensor samples"));
    }
}
