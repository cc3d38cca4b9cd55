//! MemorySink - in-process object map

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use contracts::{ObjectSink, SinkError};
use parking_lot::Mutex;
use tracing::trace;

/// Object store kept in memory. Failures can be scripted for tests.
pub struct MemorySink {
    name: String,
    objects: Mutex<BTreeMap<String, Bytes>>,
    put_faults: Mutex<VecDeque<SinkError>>,
    unreachable: Mutex<Option<SinkError>>,
    put_calls: AtomicU64,
}

impl MemorySink {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            objects: Mutex::new(BTreeMap::new()),
            put_faults: Mutex::new(VecDeque::new()),
            unreachable: Mutex::new(None),
            put_calls: AtomicU64::new(0),
        }
    }

    /// The next `count` puts fail with a transient error.
    pub fn fail_next_puts(&self, count: usize) {
        let mut faults = self.put_faults.lock();
        for _ in 0..count {
            faults.push_back(SinkError::transient(&self.name, "injected put failure"));
        }
    }

    /// Queue a specific failure for an upcoming put.
    pub fn inject_put_failure(&self, error: SinkError) {
        self.put_faults.lock().push_back(error);
    }

    /// Every `list` fails until cleared with `None`.
    pub fn set_unreachable(&self, error: Option<SinkError>) {
        *self.unreachable.lock() = error;
    }

    pub fn get(&self, path: &str) -> Option<Bytes> {
        self.objects.lock().get(path).cloned()
    }

    /// All object paths in lexical order.
    pub fn paths(&self) -> Vec<String> {
        self.objects.lock().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.objects.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.lock().is_empty()
    }

    /// Number of `put` calls, failed ones included.
    pub fn put_calls(&self) -> u64 {
        self.put_calls.load(Ordering::Relaxed)
    }
}

impl ObjectSink for MemorySink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn put(&self, path: &str, body: Bytes) -> Result<(), SinkError> {
        self.put_calls.fetch_add(1, Ordering::Relaxed);
        if let Some(fault) = self.put_faults.lock().pop_front() {
            return Err(fault);
        }
        trace!(sink = %self.name, path, bytes = body.len(), "object stored");
        self.objects.lock().insert(path.to_string(), body);
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, SinkError> {
        if let Some(error) = self.unreachable.lock().clone() {
            return Err(error);
        }
        Ok(self
            .objects
            .lock()
            .range(prefix.to_string()..)
            .take_while(|(path, _)| path.starts_with(prefix))
            .map(|(path, _)| path.clone())
            .collect())
    }
}
