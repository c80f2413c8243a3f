//! Shared health state for the /health endpoint.
//! Updated by the ingestor, the persistence writer, the monitor and the relay client.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use serde::Serialize;

/// Shared health counters. Written by background tasks, read by the API.
#[derive(Default)]
pub struct HealthState {
    /// Epoch ms of the last successful ingestion cycle (0 = none yet).
    pub last_ingest_at_ms: AtomicU64,
    pub ingest_cycles: AtomicU64,
    /// Cycles abandoned because a source failed.
    pub ingest_failures: AtomicU64,
    pub matched_last_cycle: AtomicU64,
    /// Batches sent to the writer and not yet persisted.
    pub write_queue_pending: AtomicU64,
    pub quotes_written: AtomicU64,
    pub last_monitor_at_ms: AtomicU64,
    pub relay_connected: AtomicBool,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthSnapshot {
    pub last_ingest_at_ms: u64,
    pub ingest_cycles: u64,
    pub ingest_failures: u64,
    pub matched_last_cycle: u64,
    pub write_queue_pending: u64,
    pub quotes_written: u64,
    pub last_monitor_at_ms: u64,
    pub relay_connected: bool,
}

impl HealthState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_ingest(&self, at_ms: i64, matched: usize) {
        self.last_ingest_at_ms.store(at_ms.max(0) as u64, Ordering::Relaxed);
        self.matched_last_cycle.store(matched as u64, Ordering::Relaxed);
        self.ingest_cycles.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_ingest_failure(&self) {
        self.ingest_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_write_queue_pending(&self) {
        self.write_queue_pending.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dec_write_queue_pending(&self) {
        // Saturating: never wraps below zero if a send failed after the increment.
        let _ = self
            .write_queue_pending
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| Some(v.saturating_sub(1)));
    }

    pub fn add_quotes_written(&self, n: u64) {
        self.quotes_written.fetch_add(n, Ordering::Relaxed);
    }

    pub fn set_last_monitor_at_ms(&self, at_ms: i64) {
        self.last_monitor_at_ms.store(at_ms.max(0) as u64, Ordering::Relaxed);
    }

    pub fn set_relay_connected(&self, v: bool) {
        self.relay_connected.store(v, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> HealthSnapshot {
        HealthSnapshot {
            last_ingest_at_ms: self.last_ingest_at_ms.load(Ordering::Relaxed),
            ingest_cycles: self.ingest_cycles.load(Ordering::Relaxed),
            ingest_failures: self.ingest_failures.load(Ordering::Relaxed),
            matched_last_cycle: self.matched_last_cycle.load(Ordering::Relaxed),
            write_queue_pending: self.write_queue_pending.load(Ordering::Relaxed),
            quotes_written: self.quotes_written.load(Ordering::Relaxed),
            last_monitor_at_ms: self.last_monitor_at_ms.load(Ordering::Relaxed),
            relay_connected: self.relay_connected.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_counter_saturates() {
        let h = HealthState::new();
        h.dec_write_queue_pending();
        assert_eq!(h.snapshot().write_queue_pending, 0);
        h.inc_write_queue_pending();
        h.inc_write_queue_pending();
        h.dec_write_queue_pending();
        assert_eq!(h.snapshot().write_queue_pending, 1);
    }

    #[test]
    fn ingest_updates_counters() {
        let h = HealthState::new();
        h.record_ingest(1_700_000_000_000, 12);
        h.record_ingest_failure();
        let s = h.snapshot();
        assert_eq!(s.ingest_cycles, 1);
        assert_eq!(s.ingest_failures, 1);
        assert_eq!(s.matched_last_cycle, 12);
        assert_eq!(s.last_ingest_at_ms, 1_700_000_000_000);
    }
}
