//! Cursor configuration and metrics

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// How a cursor interacts with stream retention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CursorMode {
    /// Records are kept until this cursor has read them; appends wait when
    /// retention is full.
    #[default]
    Durable,
    /// Never holds back producers; skips records evicted before it read them.
    Lossy,
}

/// Ingestion metrics
#[derive(Debug, Default)]
pub struct IngestionMetrics {
    /// Total records appended
    pub records_appended: AtomicU64,

    /// Total records handed to cursors (counted once per cursor)
    pub records_delivered: AtomicU64,

    /// Records evicted by retention
    pub records_evicted: AtomicU64,

    /// Records a lossy cursor missed
    pub records_skipped: AtomicU64,

    /// Appends that had to wait for a durable cursor
    pub append_waits: AtomicU64,

    /// Current number of retained records
    pub depth: AtomicUsize,
}

impl IngestionMetrics {
    /// Create new metrics instance
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_appended(&self) {
        self.records_appended.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_delivered(&self, count: usize) {
        self.records_delivered
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn record_evicted(&self, count: usize) {
        self.records_evicted
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn record_skipped(&self, count: u64) {
        self.records_skipped.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_append_wait(&self) {
        self.append_waits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn update_depth(&self, depth: usize) {
        self.depth.store(depth, Ordering::Relaxed);
    }

    /// Get snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            records_appended: self.records_appended.load(Ordering::Relaxed),
            records_delivered: self.records_delivered.load(Ordering::Relaxed),
            records_evicted: self.records_evicted.load(Ordering::Relaxed),
            records_skipped: self.records_skipped.load(Ordering::Relaxed),
            append_waits: self.append_waits.load(Ordering::Relaxed),
            depth: self.depth.load(Ordering::Relaxed),
        }
    }
}

/// Metrics snapshot
#[derive(Debug, Clone, Default)]
pub struct MetricsSnapshot {
    pub records_appended: u64,
    pub records_delivered: u64,
    pub records_evicted: u64,
    pub records_skipped: u64,
    pub append_waits: u64,
    pub depth: usize,
}
