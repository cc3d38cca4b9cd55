//! Per-stream delivery counters

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Counters shared by the ingest, transform and writer tasks of one stream
#[derive(Debug, Default)]
pub struct WriterMetrics {
    /// Records pulled from the producer
    records_ingested: AtomicU64,
    /// Batches closed by the buffer
    batches_flushed: AtomicU64,
    /// Records accepted by the transform
    records_accepted: AtomicU64,
    /// Records routed to failed output (transform, conversion, oversize)
    records_rejected: AtomicU64,
    /// Objects committed, redirects included
    objects_committed: AtomicU64,
    bytes_committed: AtomicU64,
    /// Put attempts beyond the first
    sink_retries: AtomicU64,
    /// Writes that exhausted retries
    delivery_failures: AtomicU64,
}

impl WriterMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_ingested(&self, count: usize) {
        self.records_ingested.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn inc_batches_flushed(&self) {
        self.batches_flushed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_accepted(&self, count: usize) {
        self.records_accepted.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn add_rejected(&self, count: usize) {
        self.records_rejected.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn record_commit(&self, bytes: usize) {
        self.objects_committed.fetch_add(1, Ordering::Relaxed);
        self.bytes_committed.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn inc_sink_retries(&self) {
        self.sink_retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_delivery_failures(&self) {
        self.delivery_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn records_ingested(&self) -> u64 {
        self.records_ingested.load(Ordering::Relaxed)
    }

    pub fn objects_committed(&self) -> u64 {
        self.objects_committed.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            records_ingested: self.records_ingested(),
            batches_flushed: self.batches_flushed.load(Ordering::Relaxed),
            records_accepted: self.records_accepted.load(Ordering::Relaxed),
            records_rejected: self.records_rejected.load(Ordering::Relaxed),
            objects_committed: self.objects_committed(),
            bytes_committed: self.bytes_committed.load(Ordering::Relaxed),
            sink_retries: self.sink_retries.load(Ordering::Relaxed),
            delivery_failures: self.delivery_failures.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of stream counters (for reporting)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub records_ingested: u64,
    pub batches_flushed: u64,
    pub records_accepted: u64,
    pub records_rejected: u64,
    pub objects_committed: u64,
    pub bytes_committed: u64,
    pub sink_retries: u64,
    pub delivery_failures: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_reflects_updates() {
        let m = WriterMetrics::new();
        m.add_ingested(10);
        m.add_accepted(9);
        m.add_rejected(1);
        m.record_commit(128);
        m.record_commit(64);
        m.inc_sink_retries();

        let snap = m.snapshot();
        assert_eq!(snap.records_ingested, 10);
        assert_eq!(snap.records_accepted + snap.records_rejected, 10);
        assert_eq!(snap.objects_committed, 2);
        assert_eq!(snap.bytes_committed, 192);
        assert_eq!(snap.sink_retries, 1);
        assert_eq!(snap.delivery_failures, 0);
    }
}
