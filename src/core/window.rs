//! Half-open aggregation windows.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// A half-open time window `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AggregationWindow {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

/// Returned when a window would not satisfy `start < end`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowError {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl std::fmt::Display for WindowError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Invalid window: start {} is not before end {}",
            self.start.to_rfc3339(),
            self.end.to_rfc3339()
        )
    }
}

impl std::error::Error for WindowError {}

impl AggregationWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self, WindowError> {
        if start < end {
            Ok(Self { start, end })
        } else {
            Err(WindowError { start, end })
        }
    }

    /// The window of the given length ending at `end`.
    pub fn trailing(end: DateTime<Utc>, length: Duration) -> Result<Self, WindowError> {
        Self::new(end - length, end)
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.end
    }

    /// Check if a timestamp falls within this window.
    pub fn contains(&self, timestamp: DateTime<Utc>) -> bool {
        timestamp >= self.start && timestamp < self.end
    }

    pub fn duration(&self) -> Duration {
        self.end - self.start
    }
}

impl std::fmt::Display for AggregationWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{}, {})",
            self.start.format("%Y-%m-%d %H:%M:%S"),
            self.end.format("%Y-%m-%d %H:%M:%S")
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_creation() {
        let start = Utc::now();
        let window = AggregationWindow::new(start, start + Duration::seconds(10)).unwrap();

        assert_eq!(window.start(), start);
        assert_eq!(window.duration(), Duration::seconds(10));
    }

    #[test]
    fn test_window_contains() {
        let start = Utc::now();
        let window = AggregationWindow::new(start, start + Duration::seconds(10)).unwrap();

        assert!(window.contains(start));
        assert!(window.contains(start + Duration::seconds(5)));
        assert!(!window.contains(start + Duration::seconds(10)));
        assert!(!window.contains(start - Duration::seconds(1)));
    }

    #[test]
    fn test_empty_and_inverted_windows_rejected() {
        let now = Utc::now();
        assert!(AggregationWindow::new(now, now).is_err());
        assert!(AggregationWindow::new(now, now - Duration::seconds(1)).is_err());
    }

    #[test]
    fn test_trailing_window() {
        let now = Utc::now();
        let window = AggregationWindow::trailing(now, Duration::minutes(1)).unwrap();
        assert_eq!(window.end(), now);
        assert_eq!(window.start(), now - Duration::minutes(1));
    }
}
