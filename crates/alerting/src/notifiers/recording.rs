//! RecordingNotifier - in-memory notifier with scripted failures

use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use contracts::{AlertEvent, NotifyError, Notifier};
use parking_lot::Mutex;

/// Keeps every delivered alert. Clones share state, so a clone kept by
/// the caller observes what the worker delivered.
#[derive(Clone)]
pub struct RecordingNotifier {
    name: String,
    delivered: Arc<Mutex<Vec<AlertEvent>>>,
    calls: Arc<AtomicUsize>,
    fail_remaining: Arc<AtomicU32>,
    reject_all: bool,
    delay: Duration,
}

impl RecordingNotifier {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            delivered: Arc::new(Mutex::new(Vec::new())),
            calls: Arc::new(AtomicUsize::new(0)),
            fail_remaining: Arc::new(AtomicU32::new(0)),
            reject_all: false,
            delay: Duration::ZERO,
        }
    }

    /// Fail the next `n` sends with a transient error.
    pub fn failing_first(self, n: u32) -> Self {
        self.fail_remaining.store(n, Ordering::SeqCst);
        self
    }

    /// Fail every send with a permanent error.
    pub fn rejecting(mut self) -> Self {
        self.reject_all = true;
        self
    }

    /// Sleep before each send.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn delivered(&self) -> Vec<AlertEvent> {
        self.delivered.lock().clone()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Notifier for RecordingNotifier {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&mut self, event: &AlertEvent) -> Result<(), NotifyError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.reject_all {
            return Err(NotifyError::permanent(&self.name, "rejected"));
        }
        let failing = self
            .fail_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(NotifyError::transient(&self.name, "scripted failure"));
        }
        self.delivered.lock().push(event.clone());
        Ok(())
    }

    async fn close(&mut self) -> Result<(), NotifyError> {
        Ok(())
    }
}
