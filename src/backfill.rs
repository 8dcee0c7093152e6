//! Historical backfill over calendar days.
//!
//! A range is cut into consecutive calendar days in the configured time zone,
//! every day is aggregated on its own task, and the joined results are sorted
//! by timestamp before they are returned.

use crate::core::{AggregationWindow, GaitRecord, WindowAggregator, WindowError};
use chrono::{DateTime, Days, Duration, Utc};
use chrono_tz::Tz;
use futures_util::future::join_all;
use std::sync::Arc;

/// Days covered by the default historical request.
pub const DEFAULT_BACKFILL_DAYS: u32 = 90;

/// Errors from planning a backfill.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackfillError {
    /// The requested range is empty or inverted
    InvalidRange(WindowError),
}

impl std::fmt::Display for BackfillError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackfillError::InvalidRange(e) => write!(f, "Invalid backfill range: {e}"),
        }
    }
}

impl std::error::Error for BackfillError {}

impl From<WindowError> for BackfillError {
    fn from(e: WindowError) -> Self {
        BackfillError::InvalidRange(e)
    }
}

/// Partition `[start, end)` into consecutive calendar-day windows.
///
/// Each window begins where the previous one ended and spans one calendar day
/// in `timezone` (23 or 25 hours across DST changes). The last window is cut
/// at `end`.
pub fn plan_daily_windows(
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    timezone: Tz,
) -> Result<Vec<AggregationWindow>, BackfillError> {
    AggregationWindow::new(start, end)?;

    let mut windows = Vec::new();
    let mut cursor = start;
    while cursor < end {
        let next = next_calendar_day(cursor, timezone).min(end);
        windows.push(AggregationWindow::new(cursor, next)?);
        cursor = next;
    }
    Ok(windows)
}

/// Same local time one calendar day later, or 24 hours later when that local
/// time does not exist.
fn next_calendar_day(at: DateTime<Utc>, timezone: Tz) -> DateTime<Utc> {
    at.with_timezone(&timezone)
        .checked_add_days(Days::new(1))
        .map(|local| local.with_timezone(&Utc))
        .filter(|next| *next > at)
        .unwrap_or(at + Duration::days(1))
}

/// Same local time `days` calendar days before `at`, or `days * 24` hours
/// earlier when that local time does not exist.
pub fn calendar_days_before(at: DateTime<Utc>, days: u32, timezone: Tz) -> DateTime<Utc> {
    at.with_timezone(&timezone)
        .checked_sub_days(Days::new(u64::from(days)))
        .map(|local| local.with_timezone(&Utc))
        .unwrap_or(at - Duration::days(i64::from(days)))
}

/// Plans and runs day-by-day historical aggregation.
pub struct HistoricalBackfillPlanner {
    aggregator: Arc<WindowAggregator>,
    timezone: Tz,
    default_days: u32,
}

impl HistoricalBackfillPlanner {
    pub fn new(aggregator: Arc<WindowAggregator>, timezone: Tz) -> Self {
        Self {
            aggregator,
            timezone,
            default_days: DEFAULT_BACKFILL_DAYS,
        }
    }

    /// Override the number of days used by [`backfill_default`](Self::backfill_default).
    pub fn with_default_days(mut self, days: u32) -> Self {
        self.default_days = days.max(1);
        self
    }

    pub fn timezone(&self) -> Tz {
        self.timezone
    }

    pub fn default_days(&self) -> u32 {
        self.default_days
    }

    pub fn plan(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<AggregationWindow>, BackfillError> {
        plan_daily_windows(start, end, self.timezone)
    }

    /// Aggregate every day in `[start, end)` concurrently.
    ///
    /// The result has exactly one record per planned day, empty days included,
    /// sorted by ascending timestamp.
    pub async fn backfill(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<GaitRecord>, BackfillError> {
        let windows = self.plan(start, end)?;
        tracing::info!(days = windows.len(), "starting historical backfill");

        let tasks = windows.into_iter().map(|window| {
            let aggregator = self.aggregator.clone();
            let handle = tokio::spawn(async move { aggregator.aggregate(window).await });
            async move {
                match handle.await {
                    Ok(record) => record,
                    Err(e) => {
                        tracing::warn!(window = %window, "day aggregation failed: {e}");
                        GaitRecord::empty(window.start())
                    }
                }
            }
        });

        let mut records = join_all(tasks).await;
        records.sort_by_key(|r| r.timestamp());

        tracing::info!(
            days = records.len(),
            empty_days = records.iter().filter(|r| r.is_empty()).count(),
            "historical backfill complete"
        );
        Ok(records)
    }

    /// Backfill the trailing `days` calendar days ending at `now`.
    ///
    /// Always yields `days` records (at least one), even when the range
    /// crosses a DST change.
    pub async fn backfill_days(
        &self,
        now: DateTime<Utc>,
        days: u32,
    ) -> Result<Vec<GaitRecord>, BackfillError> {
        let start = calendar_days_before(now, days.max(1), self.timezone);
        self.backfill(start, now).await
    }

    /// Backfill the default policy: the trailing `default_days` ending at `now`.
    pub async fn backfill_default(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<GaitRecord>, BackfillError> {
        self.backfill_days(now, self.default_days).await
    }
}
