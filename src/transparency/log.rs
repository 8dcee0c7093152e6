//! Transparency log of gait data handling.
//!
//! Counts what the agent aggregated, emitted, transmitted and exported, so a
//! patient can see exactly how much of their data left the device.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Data-handling statistics for the current session.
#[derive(Debug)]
pub struct TransparencyLog {
    /// Number of windows aggregated
    windows_aggregated: AtomicU64,
    /// Number of metric channels that could not be queried
    channel_failures: AtomicU64,
    /// Number of live records delivered to subscribers
    records_emitted: AtomicU64,
    /// Number of payloads handed to the collector connection
    payloads_sent: AtomicU64,
    /// Number of payloads that failed to serialize or send
    send_failures: AtomicU64,
    /// Number of records written to export files
    records_exported: AtomicU64,
    /// Session start time
    session_start: DateTime<Utc>,
    /// Path for persisting stats
    persist_path: Option<PathBuf>,
}

impl TransparencyLog {
    /// Create a new transparency log.
    pub fn new() -> Self {
        Self {
            windows_aggregated: AtomicU64::new(0),
            channel_failures: AtomicU64::new(0),
            records_emitted: AtomicU64::new(0),
            payloads_sent: AtomicU64::new(0),
            send_failures: AtomicU64::new(0),
            records_exported: AtomicU64::new(0),
            session_start: Utc::now(),
            persist_path: None,
        }
    }

    /// Create a transparency log with persistence.
    pub fn with_persistence(path: PathBuf) -> Self {
        let mut log = Self::new();
        log.persist_path = Some(path);

        if let Err(e) = log.load() {
            tracing::warn!("Could not load previous transparency stats: {e}");
        }

        log
    }

    pub fn record_window_aggregated(&self) {
        self.windows_aggregated.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_channel_failure(&self) {
        self.channel_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_emitted(&self) {
        self.records_emitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_payload_sent(&self) {
        self.payloads_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_send_failure(&self) {
        self.send_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_exported(&self, count: u64) {
        self.records_exported.fetch_add(count, Ordering::Relaxed);
    }

    /// Get the current statistics.
    pub fn stats(&self) -> TransparencyStats {
        TransparencyStats {
            windows_aggregated: self.windows_aggregated.load(Ordering::Relaxed),
            channel_failures: self.channel_failures.load(Ordering::Relaxed),
            records_emitted: self.records_emitted.load(Ordering::Relaxed),
            payloads_sent: self.payloads_sent.load(Ordering::Relaxed),
            send_failures: self.send_failures.load(Ordering::Relaxed),
            records_exported: self.records_exported.load(Ordering::Relaxed),
            session_start: self.session_start,
            session_duration_secs: (Utc::now() - self.session_start).num_seconds().max(0) as u64,
        }
    }

    /// Get a summary string for display.
    pub fn summary(&self) -> String {
        let stats = self.stats();
        format!(
            "Session Statistics:\n\
             - Windows aggregated: {}\n\
             - Unavailable channel reads: {}\n\
             - Live records emitted: {}\n\
             - Payloads sent to collector: {}\n\
             - Failed sends: {}\n\
             - Records exported to file: {}\n\
             - Session duration: {} seconds\n\
             \n\
             Data Handling:\n\
             - Only per-window aggregates leave this device\n\
             - Raw sensor samples are never transmitted or exported",
            stats.windows_aggregated,
            stats.channel_failures,
            stats.records_emitted,
            stats.payloads_sent,
            stats.send_failures,
            stats.records_exported,
            stats.session_duration_secs
        )
    }

    /// Save stats to disk.
    pub fn save(&self) -> Result<(), std::io::Error> {
        if let Some(ref path) = self.persist_path {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }

            let stats = self.stats();
            let persisted = PersistedStats {
                windows_aggregated: stats.windows_aggregated,
                channel_failures: stats.channel_failures,
                records_emitted: stats.records_emitted,
                payloads_sent: stats.payloads_sent,
                send_failures: stats.send_failures,
                records_exported: stats.records_exported,
                last_updated: Utc::now(),
            };

            let json = serde_json::to_string_pretty(&persisted).map_err(std::io::Error::other)?;

            std::fs::write(path, json)?;
        }
        Ok(())
    }

    /// Load stats from disk.
    fn load(&mut self) -> Result<(), std::io::Error> {
        if let Some(ref path) = self.persist_path {
            if path.exists() {
                let content = std::fs::read_to_string(path)?;
                let persisted: PersistedStats =
                    serde_json::from_str(&content).map_err(std::io::Error::other)?;

                self.windows_aggregated
                    .store(persisted.windows_aggregated, Ordering::Relaxed);
                self.channel_failures
                    .store(persisted.channel_failures, Ordering::Relaxed);
                self.records_emitted
                    .store(persisted.records_emitted, Ordering::Relaxed);
                self.payloads_sent
                    .store(persisted.payloads_sent, Ordering::Relaxed);
                self.send_failures
                    .store(persisted.send_failures, Ordering::Relaxed);
                self.records_exported
                    .store(persisted.records_exported, Ordering::Relaxed);
            }
        }
        Ok(())
    }

    /// Reset all counters.
    pub fn reset(&self) {
        self.windows_aggregated.store(0, Ordering::Relaxed);
        self.channel_failures.store(0, Ordering::Relaxed);
        self.records_emitted.store(0, Ordering::Relaxed);
        self.payloads_sent.store(0, Ordering::Relaxed);
        self.send_failures.store(0, Ordering::Relaxed);
        self.records_exported.store(0, Ordering::Relaxed);
    }
}

impl Default for TransparencyLog {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of transparency statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransparencyStats {
    pub windows_aggregated: u64,
    pub channel_failures: u64,
    pub records_emitted: u64,
    pub payloads_sent: u64,
    pub send_failures: u64,
    pub records_exported: u64,
    pub session_start: DateTime<Utc>,
    pub session_duration_secs: u64,
}

/// Stats format for persistence.
#[derive(Debug, Serialize, Deserialize)]
struct PersistedStats {
    windows_aggregated: u64,
    channel_failures: u64,
    records_emitted: u64,
    payloads_sent: u64,
    send_failures: u64,
    records_exported: u64,
    last_updated: DateTime<Utc>,
}

/// Thread-safe shared transparency log.
pub type SharedTransparencyLog = Arc<TransparencyLog>;

/// Create a new shared transparency log.
pub fn create_shared_log() -> SharedTransparencyLog {
    Arc::new(TransparencyLog::new())
}

/// Create a new shared transparency log with persistence.
pub fn create_shared_log_with_persistence(path: PathBuf) -> SharedTransparencyLog {
    Arc::new(TransparencyLog::with_persistence(path))
}
