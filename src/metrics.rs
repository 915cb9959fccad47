//! Processing counters for the consumer.
//!
//! Counters are updated by the processing callback and read by a periodic
//! reporter. They are informational only; nothing in the delivery pipeline
//! depends on them.

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

const MIN_REPORT_INTERVAL: Duration = Duration::from_millis(1);

#[derive(Debug)]
pub struct Metrics {
    processed: AtomicU64,
    failed: AtomicU64,
    started_at: DateTime<Utc>,
    last_error: Mutex<Option<String>>,
}

/// Point-in-time copy of [`Metrics`].
#[derive(Debug, Clone, PartialEq)]
pub struct MetricsSnapshot {
    pub processed: u64,
    pub failed: u64,
    pub started_at: DateTime<Utc>,
    pub last_error: Option<String>,
}

impl Metrics {
    pub fn new() -> Self {
        Self::starting_at(Utc::now())
    }

    pub fn starting_at(started_at: DateTime<Utc>) -> Self {
        Self {
            processed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            started_at,
            last_error: Mutex::new(None),
        }
    }

    pub fn record_processed(&self) {
        self.processed.fetch_add(1, Ordering::Relaxed);
        self.log_debug();
    }

    pub fn record_failed(&self, error: &dyn std::error::Error) {
        self.failed.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut last) = self.last_error.lock() {
            *last = Some(error.to_string());
        }
        self.log_debug();
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            processed: self.processed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            started_at: self.started_at,
            last_error: self.last_error.lock().ok().and_then(|e| e.clone()),
        }
    }

    /// Logs a snapshot every `interval` until `cancel` fires.
    pub fn spawn_reporter(
        self: Arc<Self>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval.max(MIN_REPORT_INTERVAL));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // The first tick completes immediately
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let snapshot = self.snapshot();
                        info!(
                            uptime = %snapshot.uptime(Utc::now()),
                            processed = snapshot.processed,
                            failed = snapshot.failed,
                            success_rate = %snapshot.success_rate(),
                            last_error = snapshot.last_error.as_deref().unwrap_or(""),
                            "Monitoring metrics"
                        );
                    }
                }
            }
        })
    }

    fn log_debug(&self) {
        let snapshot = self.snapshot();
        debug!(
            processed = snapshot.processed,
            failed = snapshot.failed,
            success_rate = %snapshot.success_rate(),
            "Metrics updated"
        );
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsSnapshot {
    pub fn success_rate(&self) -> String {
        let total = self.processed + self.failed;
        if total == 0 {
            return "0%".to_string();
        }
        format!("{:.2}%", self.processed as f64 / total as f64 * 100.0)
    }

    pub fn uptime(&self, now: DateTime<Utc>) -> String {
        let secs = (now - self.started_at).num_seconds().max(0);
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_counters_and_last_error() {
        let metrics = Metrics::new();
        metrics.record_processed();
        metrics.record_processed();
        metrics.record_processed();
        metrics.record_failed(&crate::Error::processing("store unavailable"));

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.processed, 3);
        assert_eq!(snapshot.failed, 1);
        assert_eq!(snapshot.success_rate(), "75.00%");
        assert_eq!(
            snapshot.last_error.as_deref(),
            Some("Processing error: store unavailable")
        );
    }

    #[test]
    fn test_success_rate_without_records() {
        assert_eq!(Metrics::new().snapshot().success_rate(), "0%");
    }

    #[test]
    fn test_uptime_format() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap();
        let metrics = Metrics::starting_at(start);
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 12, 5, 9).unwrap();
        assert_eq!(metrics.snapshot().uptime(now), "2h 5m 9s");
    }
}
