//! Live gait monitoring.
//!
//! While active, the monitor aggregates the trailing window on a fixed
//! schedule and hands every record backed by at least one sample to one
//! subscriber callback.
//!
//! ```text
//!            start(cb)              stop()
//!   Idle ───────────────▶ Active ───────────▶ Idle
//!                          │  ▲
//!                          └──┘ start(cb') replaces cb
//! ```
//!
//! Each session carries a generation number. A tick only emits if its
//! generation is still the active one, checked under the same lock that
//! [`LiveMonitorLoop::stop`] takes, so nothing is emitted once `stop` returns.

use crate::core::{AggregationWindow, GaitRecord, WindowAggregate, WindowAggregator};
use chrono::Utc;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Subscriber invoked with each live record.
pub type RecordCallback = Arc<dyn Fn(GaitRecord) + Send + Sync>;

/// Schedule of the live monitor.
#[derive(Debug, Clone, Copy)]
pub struct MonitorConfig {
    /// Time between ticks
    pub interval: Duration,
    /// Length of the trailing window aggregated on each tick
    pub window: chrono::Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            window: chrono::Duration::minutes(1),
        }
    }
}

struct ActiveSession {
    generation: u64,
    callback: RecordCallback,
    handle: JoinHandle<()>,
}

#[derive(Default)]
struct MonitorState {
    generation: u64,
    active: Option<ActiveSession>,
}

/// Periodic live aggregation with at most one session alive.
pub struct LiveMonitorLoop {
    aggregator: Arc<WindowAggregator>,
    config: MonitorConfig,
    state: Arc<Mutex<MonitorState>>,
}

impl LiveMonitorLoop {
    pub fn new(aggregator: Arc<WindowAggregator>, config: MonitorConfig) -> Self {
        Self {
            aggregator,
            config,
            state: Arc::new(Mutex::new(MonitorState::default())),
        }
    }

    pub fn config(&self) -> MonitorConfig {
        self.config
    }

    /// Start monitoring, replacing any running session.
    ///
    /// The first aggregation runs immediately, then one every
    /// `config.interval`. Must be called from within a Tokio runtime.
    ///
    /// The callback runs while the monitor's session lock is held and must not
    /// call back into this monitor.
    pub fn start<F>(&self, callback: F)
    where
        F: Fn(GaitRecord) + Send + Sync + 'static,
    {
        let mut state = lock(&self.state);

        if let Some(previous) = state.active.take() {
            previous.handle.abort();
            tracing::debug!(generation = previous.generation, "replaced live session");
        }

        state.generation += 1;
        let generation = state.generation;
        let handle = tokio::spawn(run_session(
            self.aggregator.clone(),
            self.config,
            self.state.clone(),
            generation,
        ));

        state.active = Some(ActiveSession {
            generation,
            callback: Arc::new(callback),
            handle,
        });
        tracing::info!(
            generation,
            interval_secs = self.config.interval.as_secs_f64(),
            "live monitoring started"
        );
    }

    /// Stop monitoring. No record is emitted after this returns.
    ///
    /// Calling `stop` on an idle monitor does nothing.
    pub fn stop(&self) {
        let mut state = lock(&self.state);
        if let Some(session) = state.active.take() {
            session.handle.abort();
            tracing::info!(generation = session.generation, "live monitoring stopped");
        }
    }

    /// True while a session is running. A session whose window cannot be
    /// built ends on its own and leaves the monitor idle.
    pub fn is_active(&self) -> bool {
        lock(&self.state).active.is_some()
    }
}

impl Drop for LiveMonitorLoop {
    fn drop(&mut self) {
        self.stop();
    }
}

fn lock(state: &Mutex<MonitorState>) -> MutexGuard<'_, MonitorState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

async fn run_session(
    aggregator: Arc<WindowAggregator>,
    config: MonitorConfig,
    state: Arc<Mutex<MonitorState>>,
    generation: u64,
) {
    let mut ticker = tokio::time::interval(config.interval.max(Duration::from_millis(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;

        let window = match AggregationWindow::trailing(Utc::now(), config.window) {
            Ok(window) => window,
            Err(e) => {
                tracing::warn!("live window misconfigured: {e}");
                retire(&state, generation);
                return;
            }
        };
        let aggregate = aggregator.aggregate_window(window).await;

        if !deliver(&state, generation, aggregate) {
            return;
        }
    }
}

/// Clear the session slot if it still belongs to `generation`.
fn retire(state: &Mutex<MonitorState>, generation: u64) {
    let mut state = lock(state);
    if state
        .active
        .as_ref()
        .is_some_and(|session| session.generation == generation)
    {
        state.active = None;
        tracing::info!(generation, "live monitoring ended");
    }
}

/// Emit the record if `generation` is still active. Returns false once the
/// session has been stopped or replaced.
fn deliver(state: &Mutex<MonitorState>, generation: u64, aggregate: WindowAggregate) -> bool {
    let state = lock(state);
    match &state.active {
        Some(session) if session.generation == generation => {
            if aggregate.has_samples() {
                (session.callback)(aggregate.record);
            } else {
                tracing::debug!("no gait samples in live window; tick suppressed");
            }
            true
        }
        _ => false,
    }
}
