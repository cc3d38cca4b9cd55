//! SharedStream - in-memory record log with independent cursors
//!
//! Every delivery stream and the alert fan-out read the same source through
//! their own cursor, so each one sees every record in arrival order.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use contracts::{ContractError, Producer, Record, SequenceToken};
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, instrument, warn};

use crate::config::{CursorMode, IngestionMetrics};
use crate::error::{IngestionError, Result};

struct CursorSlot {
    name: String,
    position: u64,
    mode: CursorMode,
    active: bool,
}

struct Log {
    records: VecDeque<Record>,
    /// Offset of `records[0]`
    base: u64,
    closed: bool,
    cursors: Vec<CursorSlot>,
}

impl Log {
    fn next_offset(&self) -> u64 {
        self.base + self.records.len() as u64
    }

    fn active(&self) -> impl Iterator<Item = &CursorSlot> {
        self.cursors.iter().filter(|c| c.active)
    }

    fn durable_floor(&self) -> Option<u64> {
        self.active()
            .filter(|c| c.mode == CursorMode::Durable)
            .map(|c| c.position)
            .min()
    }

    fn pop_front(&mut self) -> bool {
        if self.records.pop_front().is_some() {
            self.base += 1;
            true
        } else {
            false
        }
    }

    /// Drop records that every active cursor has already read.
    fn compact(&mut self) -> usize {
        let Some(floor) = self.active().map(|c| c.position).min() else {
            return 0;
        };
        let mut dropped = 0;
        while self.base < floor && self.pop_front() {
            dropped += 1;
        }
        dropped
    }

    /// Free one slot below `retention`. Returns false when a durable cursor
    /// still needs the oldest record.
    fn make_room(&mut self, retention: usize) -> (bool, usize) {
        let mut evicted = self.compact();
        while self.records.len() >= retention {
            if self.durable_floor().is_some_and(|floor| floor <= self.base) {
                return (false, evicted);
            }
            if self.pop_front() {
                evicted += 1;
            }
        }
        (true, evicted)
    }
}

struct Shared {
    name: String,
    retention: usize,
    log: Mutex<Log>,
    /// Signalled after an append or close
    appended: Notify,
    /// Signalled after a cursor advances or goes away
    consumed: Notify,
    metrics: Arc<IngestionMetrics>,
}

/// Multi-consumer record log with bounded retention.
///
/// Cheap to clone; all clones refer to the same log.
#[derive(Clone)]
pub struct SharedStream {
    inner: Arc<Shared>,
}

impl SharedStream {
    /// Create a stream that retains at most `retention` records.
    pub fn new(name: impl Into<String>, retention: usize) -> Self {
        Self {
            inner: Arc::new(Shared {
                name: name.into(),
                retention: retention.max(1),
                log: Mutex::new(Log {
                    records: VecDeque::new(),
                    base: 0,
                    closed: false,
                    cursors: Vec::new(),
                }),
                appended: Notify::new(),
                consumed: Notify::new(),
                metrics: Arc::new(IngestionMetrics::new()),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn metrics(&self) -> &Arc<IngestionMetrics> {
        &self.inner.metrics
    }

    /// Number of records currently retained.
    pub fn len(&self) -> usize {
        self.inner.log.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_closed(&self) -> bool {
        self.inner.log.lock().closed
    }

    /// `(cursor name, unread records)` for every live cursor.
    pub fn cursor_lags(&self) -> Vec<(String, u64)> {
        let log = self.inner.log.lock();
        let next = log.next_offset();
        log.active()
            .map(|c| (c.name.clone(), next - c.position.max(log.base)))
            .collect()
    }

    /// Register a cursor positioned at the oldest retained record.
    pub fn cursor(
        &self,
        name: impl Into<String>,
        mode: CursorMode,
        poll_timeout: Duration,
    ) -> StreamCursor {
        let name = name.into();
        let id = {
            let mut log = self.inner.log.lock();
            let position = log.base;
            log.cursors.push(CursorSlot {
                name: name.clone(),
                position,
                mode,
                active: true,
            });
            log.cursors.len() - 1
        };
        debug!(stream = %self.inner.name, cursor = %name, ?mode, "cursor registered");
        StreamCursor {
            shared: Arc::clone(&self.inner),
            id,
            name,
            poll_timeout,
        }
    }

    /// Append a payload stamped with the current time.
    pub async fn append(&self, payload: impl Into<Bytes>) -> Result<SequenceToken> {
        self.append_at(payload.into(), Utc::now()).await
    }

    /// Append a payload with an explicit arrival time.
    ///
    /// Waits while retention is full and a durable cursor has not read the
    /// oldest record.
    pub async fn append_at(&self, payload: Bytes, arrival: DateTime<Utc>) -> Result<SequenceToken> {
        let shared = &self.inner;
        loop {
            let space = shared.consumed.notified();
            tokio::pin!(space);
            space.as_mut().enable();

            {
                let mut log = shared.log.lock();
                if log.closed {
                    return Err(IngestionError::Closed {
                        stream: shared.name.clone(),
                    });
                }
                let (has_room, evicted) = log.make_room(shared.retention);
                if evicted > 0 {
                    shared.metrics.record_evicted(evicted);
                }
                if has_room {
                    let sequence = SequenceToken(log.next_offset());
                    log.records.push_back(Record::new(payload, arrival, sequence));
                    let depth = log.records.len();
                    drop(log);
                    shared.metrics.record_appended();
                    shared.metrics.update_depth(depth);
                    observability::record_records_appended(&shared.name, 1);
                    observability::record_source_depth(&shared.name, depth);
                    shared.appended.notify_waiters();
                    return Ok(sequence);
                }
            }

            shared.metrics.record_append_wait();
            space.await;
        }
    }

    /// Stop accepting appends. Cursors drain what is retained, then report end of stream.
    pub fn close(&self) {
        let already = {
            let mut log = self.inner.log.lock();
            std::mem::replace(&mut log.closed, true)
        };
        if !already {
            debug!(stream = %self.inner.name, "stream closed");
        }
        self.inner.appended.notify_waiters();
        self.inner.consumed.notify_waiters();
    }
}

enum Take {
    Records(Vec<Record>),
    Empty,
    Finished,
}

/// One consumer's position in a [`SharedStream`].
pub struct StreamCursor {
    shared: Arc<Shared>,
    id: usize,
    name: String,
    poll_timeout: Duration,
}

impl StreamCursor {
    /// Records appended but not yet read by this cursor.
    pub fn lag(&self) -> u64 {
        let log = self.shared.log.lock();
        let position = log.cursors[self.id].position.max(log.base);
        log.next_offset() - position
    }

    /// Next batch of up to `max_records`, waiting at most the poll timeout.
    ///
    /// `None` once the stream is closed and this cursor has read everything.
    #[instrument(name = "stream_cursor_next", level = "trace", skip(self), fields(cursor = %self.name))]
    pub async fn next_batch(&mut self, max_records: usize) -> Option<Vec<Record>> {
        let deadline = Instant::now() + self.poll_timeout;
        loop {
            let appended = self.shared.appended.notified();
            tokio::pin!(appended);
            appended.as_mut().enable();

            match self.take(max_records.max(1)) {
                Take::Records(records) => return Some(records),
                Take::Finished => return None,
                Take::Empty => {}
            }

            if tokio::time::timeout_at(deadline, appended).await.is_err() {
                return Some(Vec::new());
            }
        }
    }

    fn take(&self, max_records: usize) -> Take {
        let mut guard = self.shared.log.lock();
        let log = &mut *guard;
        let base = log.base;
        let slot = &mut log.cursors[self.id];

        if slot.position < base {
            let skipped = base - slot.position;
            slot.position = base;
            self.shared.metrics.record_skipped(skipped);
            warn!(
                stream = %self.shared.name,
                cursor = %self.name,
                skipped,
                "cursor fell behind retention, records skipped"
            );
        }

        let start = (slot.position - base) as usize;
        let available = log.records.len() - start;
        if available == 0 {
            return if log.closed { Take::Finished } else { Take::Empty };
        }

        let count = available.min(max_records);
        slot.position += count as u64;
        let records: Vec<Record> = log.records.range(start..start + count).cloned().collect();
        log.compact();
        self.shared.metrics.update_depth(log.records.len());
        self.shared.metrics.record_delivered(count);
        drop(guard);

        self.shared.consumed.notify_waiters();
        Take::Records(records)
    }
}

impl Producer for StreamCursor {
    fn name(&self) -> &str {
        &self.name
    }

    async fn poll(&mut self, max_records: usize) -> std::result::Result<Option<Vec<Record>>, ContractError> {
        Ok(self.next_batch(max_records).await)
    }
}

impl Drop for StreamCursor {
    fn drop(&mut self) {
        {
            let mut log = self.shared.log.lock();
            log.cursors[self.id].active = false;
            log.compact();
        }
        self.shared.consumed.notify_waiters();
        debug!(stream = %self.shared.name, cursor = %self.name, "cursor released");
    }
}
