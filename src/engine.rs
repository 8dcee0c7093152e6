//! The gait engine: one object wiring source, aggregation, monitoring,
//! backfill, transmission and export together for the presentation layer.

use crate::backfill::{BackfillError, HistoricalBackfillPlanner};
use crate::config::{Config, ConfigError};
use crate::core::{GaitRecord, WindowAggregator};
use crate::export::{self, ExportError, ExportOptions};
use crate::monitor::{LiveMonitorLoop, MonitorConfig};
use crate::source::{build_source, MetricSource, SourceError};
use crate::transmission::{ConnectionState, RecordKind, TransmissionChannel, TransmissionError};
use crate::transparency::{create_shared_log_with_persistence, SharedTransparencyLog};
use chrono::Utc;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;

/// Errors from constructing or driving the engine.
#[derive(Debug)]
pub enum EngineError {
    Config(ConfigError),
    Source(SourceError),
    Backfill(BackfillError),
    Export(ExportError),
    Transmission(TransmissionError),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::Config(e) => write!(f, "{e}"),
            EngineError::Source(e) => write!(f, "{e}"),
            EngineError::Backfill(e) => write!(f, "{e}"),
            EngineError::Export(e) => write!(f, "{e}"),
            EngineError::Transmission(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for EngineError {}

impl From<ConfigError> for EngineError {
    fn from(e: ConfigError) -> Self {
        EngineError::Config(e)
    }
}

impl From<SourceError> for EngineError {
    fn from(e: SourceError) -> Self {
        EngineError::Source(e)
    }
}

impl From<BackfillError> for EngineError {
    fn from(e: BackfillError) -> Self {
        EngineError::Backfill(e)
    }
}

impl From<ExportError> for EngineError {
    fn from(e: ExportError) -> Self {
        EngineError::Export(e)
    }
}

impl From<TransmissionError> for EngineError {
    fn from(e: TransmissionError) -> Self {
        EngineError::Transmission(e)
    }
}

/// How a historical sequence left the device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    /// Sent to the collector as one batch message
    Transmitted { records: usize },
    /// Written to an export file
    Exported(PathBuf),
}

/// Facade used by the CLI and any other front end.
pub struct GaitEngine {
    config: Config,
    monitor: LiveMonitorLoop,
    planner: HistoricalBackfillPlanner,
    channel: TransmissionChannel,
    log: SharedTransparencyLog,
    export_options: ExportOptions,
}

impl GaitEngine {
    /// Build an engine over an explicit source.
    pub fn new(
        config: Config,
        source: Arc<dyn MetricSource>,
        log: SharedTransparencyLog,
    ) -> Result<Self, EngineError> {
        config.validate()?;
        let timezone = config.tz()?;
        let aggregator = Arc::new(WindowAggregator::new(source).with_log(log.clone()));

        let monitor = LiveMonitorLoop::new(
            aggregator.clone(),
            MonitorConfig {
                interval: config.monitor_interval,
                window: config.live_window_span(),
            },
        );
        let planner = HistoricalBackfillPlanner::new(aggregator, timezone)
            .with_default_days(config.backfill_days);
        let channel = TransmissionChannel::with_log(config.collector.url.clone(), log.clone());
        let export_options =
            ExportOptions::new(config.patient_id.clone()).with_locale(config.locale.clone());

        Ok(Self {
            config,
            monitor,
            planner,
            channel,
            log,
            export_options,
        })
    }

    /// Build the configured source and a persisted transparency log.
    pub fn from_config(config: Config) -> Result<Self, EngineError> {
        let source = build_source(&config.source)?;
        tracing::info!(source = %source.describe(), "metric source ready");
        let log = create_shared_log_with_persistence(config.transparency_path());
        Self::new(config, source, log)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn transparency(&self) -> &SharedTransparencyLog {
        &self.log
    }

    /// Start live monitoring.
    ///
    /// Each emitted record is counted, streamed to the collector when
    /// connected, then handed to `on_record`. Replaces any running session.
    pub fn start_monitoring<F>(&self, on_record: F)
    where
        F: Fn(GaitRecord) + Send + Sync + 'static,
    {
        let channel = self.channel.clone();
        let log = self.log.clone();
        let session_key = self.config.patient_id.clone();

        self.monitor.start(move |record| {
            log.record_emitted();
            if channel.is_connected() {
                channel.send_record(&record, &session_key, RecordKind::Realtime);
            }
            on_record(record);
        });
    }

    pub fn stop_monitoring(&self) {
        self.monitor.stop();
    }

    pub fn is_monitoring(&self) -> bool {
        self.monitor.is_active()
    }

    /// Run the default historical backfill and stream it as one batch when
    /// connected. Returns the sorted daily records.
    pub async fn request_historical(&self) -> Result<Vec<GaitRecord>, EngineError> {
        let records = self.planner.backfill_default(Utc::now()).await?;
        if self.channel.is_connected() {
            self.channel.send_batch(&records, &self.config.patient_id);
        }
        Ok(records)
    }

    /// Backfill an explicit number of trailing calendar days.
    pub async fn request_days(&self, days: u32) -> Result<Vec<GaitRecord>, EngineError> {
        Ok(self.planner.backfill_days(Utc::now(), days).await?)
    }

    /// Write `records` to a new export file under the configured export path.
    pub fn request_export(&self, records: &[GaitRecord]) -> Result<PathBuf, ExportError> {
        self.export_to(&self.config.export_path, records)
    }

    pub fn export_to(
        &self,
        dir: &std::path::Path,
        records: &[GaitRecord],
    ) -> Result<PathBuf, ExportError> {
        let path = export::write_export(dir, records, &self.export_options, Utc::now())?;
        self.log.record_exported(records.len() as u64);
        Ok(path)
    }

    /// Send `records` as one batch if connected, otherwise export them.
    pub fn deliver_historical(&self, records: &[GaitRecord]) -> Result<Delivery, ExportError> {
        if self.channel.is_connected() {
            self.channel.send_batch(records, &self.config.patient_id);
            return Ok(Delivery::Transmitted {
                records: records.len(),
            });
        }

        tracing::info!("collector not connected; exporting historical records instead");
        self.request_export(records).map(Delivery::Exported)
    }

    pub async fn connect(&self) -> Result<(), TransmissionError> {
        self.channel.connect(&self.config.patient_id).await
    }

    pub async fn disconnect(&self) {
        self.channel.disconnect().await;
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.channel.state()
    }

    pub fn subscribe_connection(&self) -> watch::Receiver<ConnectionState> {
        self.channel.subscribe()
    }

    pub fn transmission_errors(&self) -> crossbeam_channel::Receiver<TransmissionError> {
        self.channel.errors()
    }

    pub async fn probe_collector(&self) -> Result<bool, TransmissionError> {
        self.channel.probe_health().await
    }

    /// Stop monitoring, close the connection and persist statistics.
    pub async fn shutdown(&self) {
        self.stop_monitoring();
        self.disconnect().await;
        if let Err(e) = self.log.save() {
            tracing::warn!("Could not save transparency stats: {e}");
        }
    }
}
