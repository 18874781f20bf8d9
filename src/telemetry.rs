//! Slow-operation diagnostics.
//!
//! A [`SlowQueryMonitor`] with a threshold times every collection call and, when a call runs
//! longer than the threshold, emits a timeout diagnostic on the `docbridge::slow` log target.
//! The call itself is never failed. Without a threshold the monitor does no work at all.

use bson::Document;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crate::errors::DbError;

/// Log target for slow-operation events.
pub const SLOW_TARGET: &str = "docbridge::slow";

#[derive(Debug, Default)]
pub struct Metrics {
    pub calls_total: AtomicU64,
    pub slow_total: AtomicU64,
}

#[derive(Debug, Clone, Default)]
pub struct SlowQueryMonitor {
    threshold: Option<Duration>,
    metrics: Arc<Metrics>,
}

impl SlowQueryMonitor {
    #[must_use]
    pub fn disabled() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn new(threshold: Duration) -> Self {
        Self { threshold: Some(threshold), metrics: Arc::default() }
    }

    /// `0` disables the monitor.
    #[must_use]
    pub fn from_millis(ms: u64) -> Self {
        if ms == 0 { Self::disabled() } else { Self::new(Duration::from_millis(ms)) }
    }

    #[must_use]
    pub const fn threshold(&self) -> Option<Duration> {
        self.threshold
    }

    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.threshold.is_some()
    }

    /// Start of a timed call; `None` when the monitor is disabled.
    #[must_use]
    pub fn start(&self) -> Option<Instant> {
        self.threshold.map(|_| Instant::now())
    }

    /// Ends a timed call. Returns true when the call was reported as slow.
    pub fn finish(
        &self,
        location: &'static str,
        started: Option<Instant>,
        collection: &str,
        filter: Option<&Document>,
    ) -> bool {
        let (Some(started), Some(threshold)) = (started, self.threshold) else {
            return false;
        };
        self.metrics.calls_total.fetch_add(1, Ordering::Relaxed);
        let elapsed = started.elapsed();
        if elapsed <= threshold {
            return false;
        }
        self.metrics.slow_total.fetch_add(1, Ordering::Relaxed);

        let elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
        let threshold_ms = u64::try_from(threshold.as_millis()).unwrap_or(u64::MAX);
        let filter_hash = filter.map(fingerprint);
        let event = DbError::timeout(
            location,
            format!("{collection}: took {elapsed_ms} ms, threshold is {threshold_ms} ms"),
        )
        .with_details(filter_hash.as_ref().map(|h| format!("filter: {h}")));
        let line = serde_json::json!({
            "ts": now_ts(),
            "collection": collection,
            "location": location,
            "duration_ms": elapsed_ms,
            "threshold_ms": threshold_ms,
            "filter_hash": filter_hash,
            "diagnostic": event.diagnostic(),
        });
        log::warn!(target: SLOW_TARGET, "{line}");
        true
    }

    #[must_use]
    pub fn calls_total(&self) -> u64 {
        self.metrics.calls_total.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn slow_total(&self) -> u64 {
        self.metrics.slow_total.load(Ordering::Relaxed)
    }

    /// Counters in Prometheus exposition format.
    #[must_use]
    pub fn metrics_text(&self) -> String {
        format!(
            "docbridge_calls_timed_total {}\n\
             docbridge_calls_slow_total {}\n",
            self.calls_total(),
            self.slow_total(),
        )
    }
}

/// Stable hash of a filter document, so slow-query lines can be grouped without logging
/// the values a filter carries.
#[must_use]
pub fn fingerprint(filter: &Document) -> String {
    use sha2::{Digest, Sha256};
    let mut h = Sha256::new();
    h.update(filter.to_string().as_bytes());
    hex::encode(h.finalize())
}

fn now_ts() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    #[test]
    fn disabled_monitor_records_nothing() {
        let m = SlowQueryMonitor::from_millis(0);
        assert!(!m.is_enabled());
        let started = m.start();
        assert!(started.is_none());
        assert!(!m.finish("loc", started, "c", None));
        assert_eq!(m.calls_total(), 0);
    }

    #[test]
    fn slow_calls_are_counted() {
        let m = SlowQueryMonitor::new(Duration::from_millis(1));
        let started = Some(Instant::now() - Duration::from_millis(50));
        assert!(m.finish("loc", started, "c", Some(&doc! { "a": 1 })));
        let fast = m.start();
        assert!(!SlowQueryMonitor::new(Duration::from_secs(60)).finish("loc", fast, "c", None));
        assert_eq!(m.slow_total(), 1);
        assert!(m.metrics_text().contains("docbridge_calls_slow_total 1"));
    }

    #[test]
    fn fingerprint_is_stable_and_value_sensitive() {
        let a = fingerprint(&doc! { "a": { "$eq": 1 } });
        assert_eq!(a, fingerprint(&doc! { "a": { "$eq": 1 } }));
        assert_ne!(a, fingerprint(&doc! { "a": { "$eq": 2 } }));
        assert_eq!(a.len(), 64);
    }
}
