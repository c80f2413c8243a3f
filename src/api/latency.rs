//! In-memory latency histogram for source feed fetches.
//! Records the wall time of each successful HTTP fetch, retries excluded.

use std::sync::Mutex;
use std::time::Duration;

use hdrhistogram::Histogram;
use tracing::warn;

/// Shared latency stats. The fetcher records, the API reads.
/// Values stored in microseconds.
pub struct LatencyStats {
    inner: Mutex<Option<Histogram<u64>>>,
}

impl LatencyStats {
    /// Tracks 1us to 100s, 3 significant figures.
    pub fn new() -> Self {
        let histogram = match Histogram::new_with_bounds(1, 100_000_000, 3) {
            Ok(h) => Some(h),
            Err(e) => {
                warn!(error = %e, "Latency histogram disabled");
                None
            }
        };
        Self { inner: Mutex::new(histogram) }
    }

    pub fn record_us(&self, us: u64) {
        if let Ok(mut guard) = self.inner.lock() {
            if let Some(h) = guard.as_mut() {
                h.saturating_record(us.max(1));
            }
        }
    }

    pub fn record(&self, d: Duration) {
        let us = d.as_micros().min(u128::from(u64::MAX)) as u64;
        self.record_us(us);
    }

    /// Return (p50_us, p95_us, p99_us). None if no samples.
    pub fn percentiles(&self) -> (Option<u64>, Option<u64>, Option<u64>) {
        let Ok(guard) = self.inner.lock() else {
            return (None, None, None);
        };
        match guard.as_ref() {
            Some(h) if h.len() > 0 => (
                Some(h.value_at_quantile(0.5)),
                Some(h.value_at_quantile(0.95)),
                Some(h.value_at_quantile(0.99)),
            ),
            _ => (None, None, None),
        }
    }

    /// Sample count.
    pub fn len(&self) -> u64 {
        self.inner
            .lock()
            .ok()
            .and_then(|g| g.as_ref().map(|h| h.len()))
            .unwrap_or(0)
    }
}

impl Default for LatencyStats {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_histogram_has_no_percentiles() {
        let stats = LatencyStats::new();
        assert_eq!(stats.percentiles(), (None, None, None));
        assert_eq!(stats.len(), 0);
    }

    #[test]
    fn records_durations_in_micros() {
        let stats = LatencyStats::new();
        for ms in [10, 20, 30, 40, 1_000] {
            stats.record(Duration::from_millis(ms));
        }
        assert_eq!(stats.len(), 5);
        let (p50, _, p99) = stats.percentiles();
        let p50 = p50.unwrap();
        assert!((29_000..=31_000).contains(&p50), "p50={p50}");
        assert!(p99.unwrap() >= 990_000);
    }
}
