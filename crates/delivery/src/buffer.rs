//! Buffer - size/interval batching per batch kind
//!
//! The buffer is owned by a single task, so closing a batch can never race
//! an append: every mutation goes through `&mut self`.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use contracts::{Batch, BatchKind, ContractError, FlushTrigger, Record, StreamId};
use tokio::time::Instant;
use tracing::{debug, instrument};

struct OpenBatch {
    opened: Instant,
    created_at: DateTime<Utc>,
    size_bytes: usize,
    records: Vec<Record>,
}

impl OpenBatch {
    fn new() -> Self {
        Self {
            opened: Instant::now(),
            created_at: Utc::now(),
            size_bytes: 0,
            records: Vec::new(),
        }
    }
}

/// Accumulates records into one open batch per kind.
pub struct Buffer {
    stream: StreamId,
    max_bytes: usize,
    interval: Duration,
    open: HashMap<BatchKind, OpenBatch>,
}

impl Buffer {
    pub fn new(stream: StreamId, max_bytes: usize, interval: Duration) -> Self {
        Self {
            stream,
            max_bytes: max_bytes.max(1),
            interval,
            open: HashMap::new(),
        }
    }

    /// Add a record to the open batch of `kind`.
    ///
    /// Returns the batch if this append brought it to the size threshold.
    ///
    /// # Errors
    /// `CapacityExceeded` when the record alone is larger than the threshold;
    /// the open batch is left untouched.
    pub fn append(&mut self, record: Record, kind: BatchKind) -> Result<Option<Batch>, ContractError> {
        let record_bytes = record.size_bytes();
        if record_bytes > self.max_bytes {
            return Err(ContractError::CapacityExceeded {
                record_bytes,
                max_bytes: self.max_bytes,
            });
        }

        let open = self.open.entry(kind).or_insert_with(OpenBatch::new);
        open.size_bytes += record_bytes;
        open.records.push(record);

        if open.size_bytes >= self.max_bytes {
            return Ok(self.close(kind, FlushTrigger::Size));
        }
        Ok(None)
    }

    /// Close every open batch whose age is at least the interval.
    #[instrument(name = "buffer_flush_expired", level = "trace", skip(self), fields(stream = %self.stream))]
    pub fn flush_expired(&mut self, now: Instant) -> Vec<Batch> {
        let expired: Vec<BatchKind> = self
            .open
            .iter()
            .filter(|(_, open)| now.saturating_duration_since(open.opened) >= self.interval)
            .map(|(kind, _)| *kind)
            .collect();
        expired
            .into_iter()
            .filter_map(|kind| self.close(kind, FlushTrigger::Interval))
            .collect()
    }

    /// Close every open batch (drain path).
    #[instrument(name = "buffer_flush_all", skip(self), fields(stream = %self.stream))]
    pub fn flush_all(&mut self) -> Vec<Batch> {
        let kinds: Vec<BatchKind> = self.open.keys().copied().collect();
        kinds
            .into_iter()
            .filter_map(|kind| self.close(kind, FlushTrigger::Shutdown))
            .collect()
    }

    /// Earliest instant at which an open batch expires.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.open.values().map(|open| open.opened + self.interval).min()
    }

    /// Size threshold; also the largest record `append` accepts.
    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }

    pub fn pending_records(&self) -> usize {
        self.open.values().map(|open| open.records.len()).sum()
    }

    pub fn pending_bytes(&self) -> usize {
        self.open.values().map(|open| open.size_bytes).sum()
    }

    fn close(&mut self, kind: BatchKind, trigger: FlushTrigger) -> Option<Batch> {
        let open = self.open.remove(&kind)?;
        if open.records.is_empty() {
            return None;
        }
        debug!(
            stream = %self.stream,
            %kind,
            trigger = trigger.as_str(),
            records = open.records.len(),
            bytes = open.size_bytes,
            "batch closed"
        );
        Some(Batch {
            stream: self.stream.clone(),
            kind,
            created_at: open.created_at,
            trigger,
            size_bytes: open.size_bytes,
            records: open.records,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::SequenceToken;

    fn record(bytes: usize, seq: u64) -> Record {
        Record::new(vec![b'x'; bytes], Utc::now(), SequenceToken(seq))
    }

    fn buffer(max_bytes: usize, interval_ms: u64) -> Buffer {
        Buffer::new("s".into(), max_bytes, Duration::from_millis(interval_ms))
    }

    #[test]
    fn test_size_trigger_fires_at_threshold_not_before() {
        let mut buf = buffer(10, 60_000);
        assert!(buf.append(record(4, 0), BatchKind::Raw).unwrap().is_none());
        assert!(buf.append(record(5, 1), BatchKind::Raw).unwrap().is_none());
        assert_eq!(buf.pending_bytes(), 9);

        let batch = buf.append(record(1, 2), BatchKind::Raw).unwrap().unwrap();
        assert_eq!(batch.size_bytes, 10);
        assert_eq!(batch.trigger, FlushTrigger::Size);
        assert_eq!(batch.len(), 3);
        assert_eq!(buf.pending_records(), 0);
    }

    #[test]
    fn test_record_equal_to_threshold_closes_alone() {
        let mut buf = buffer(8, 60_000);
        let batch = buf.append(record(8, 0), BatchKind::Raw).unwrap().unwrap();
        assert_eq!(batch.len(), 1);
    }

    #[test]
    fn test_oversized_record_rejected_without_touching_open_batch() {
        let mut buf = buffer(8, 60_000);
        buf.append(record(3, 0), BatchKind::Raw).unwrap();
        let err = buf.append(record(9, 1), BatchKind::Raw).unwrap_err();
        assert!(matches!(
            err,
            ContractError::CapacityExceeded {
                record_bytes: 9,
                max_bytes: 8
            }
        ));
        assert_eq!(buf.pending_records(), 1);
    }

    #[test]
    fn test_next_append_opens_new_batch() {
        let mut buf = buffer(2, 60_000);
        let first = buf.append(record(2, 0), BatchKind::Raw).unwrap().unwrap();
        buf.append(record(1, 1), BatchKind::Raw).unwrap();
        let rest = buf.flush_all();
        assert_eq!(first.records[0].sequence, SequenceToken(0));
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].records[0].sequence, SequenceToken(1));
        assert_eq!(rest[0].trigger, FlushTrigger::Shutdown);
    }

    #[test]
    fn test_kinds_are_buffered_separately() {
        let mut buf = buffer(100, 60_000);
        buf.append(record(1, 0), BatchKind::Raw).unwrap();
        buf.append(record(1, 1), BatchKind::Failed).unwrap();
        let mut kinds: Vec<_> = buf.flush_all().into_iter().map(|b| b.kind).collect();
        kinds.sort_by_key(|k| k.as_str());
        assert_eq!(kinds, vec![BatchKind::Failed, BatchKind::Raw]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_interval_trigger_fires_at_boundary_not_before() {
        let mut buf = buffer(1_000, 1_000);
        buf.append(record(1, 0), BatchKind::Raw).unwrap();
        let opened = Instant::now();

        assert!(buf
            .flush_expired(opened + Duration::from_millis(999))
            .is_empty());
        let flushed = buf.flush_expired(opened + Duration::from_millis(1_000));
        assert_eq!(flushed.len(), 1);
        assert_eq!(flushed[0].trigger, FlushTrigger::Interval);
        assert!(buf.next_deadline().is_none());
    }

    #[test]
    fn test_flush_on_empty_buffer_is_noop() {
        let mut buf = buffer(10, 10);
        assert!(buf.flush_all().is_empty());
        assert!(buf.flush_expired(Instant::now()).is_empty());
    }

    #[test]
    fn test_order_preserved() {
        let mut buf = buffer(1_000, 60_000);
        for seq in 0..20 {
            buf.append(record(1, seq), BatchKind::Raw).unwrap();
        }
        let batch = buf.flush_all().remove(0);
        let seqs: Vec<u64> = batch.records.iter().map(|r| r.sequence.value()).collect();
        assert_eq!(seqs, (0..20).collect::<Vec<_>>());
    }
}
