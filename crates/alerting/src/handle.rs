//! NotifierHandle - manages a notifier with isolated queue and worker task

use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, instrument, warn};

use contracts::{AlertEvent, Notifier, NotifyError, RetryPolicy};

use crate::metrics::AlertMetrics;

/// Handle to a running notifier worker
pub struct NotifierHandle {
    /// Notifier name
    name: String,
    /// Channel to send alerts to worker
    tx: mpsc::Sender<AlertEvent>,
    /// Shared metrics
    metrics: Arc<AlertMetrics>,
    /// Worker task handle
    worker_handle: JoinHandle<()>,
}

impl NotifierHandle {
    /// Create a new NotifierHandle and spawn the worker task
    pub fn spawn<N: Notifier + 'static>(notifier: N, queue_capacity: usize, retry: RetryPolicy) -> Self {
        let name = notifier.name().to_string();
        let (tx, rx) = mpsc::channel(queue_capacity.max(1));
        let metrics = Arc::new(AlertMetrics::new());

        let worker_metrics = Arc::clone(&metrics);
        let worker_name = name.clone();

        let worker_handle = tokio::spawn(async move {
            notifier_worker(notifier, rx, retry, worker_metrics, worker_name).await;
        });

        Self {
            name,
            tx,
            metrics,
            worker_handle,
        }
    }

    /// Get notifier name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get current metrics
    pub fn metrics(&self) -> &Arc<AlertMetrics> {
        &self.metrics
    }

    /// Queue an alert (non-blocking)
    ///
    /// Returns true if queued, false if the queue was full (alert dropped)
    pub fn try_send(&self, event: AlertEvent) -> bool {
        match self.tx.try_send(event) {
            Ok(()) => {
                self.metrics
                    .set_queue_len(self.tx.max_capacity() - self.tx.capacity());
                true
            }
            Err(mpsc::error::TrySendError::Full(e)) => {
                self.metrics.inc_dropped_count();
                observability::record_alert_dropped(&self.name);
                warn!(
                    notifier = %self.name,
                    sequence = %e.sequence(),
                    "Queue full, alert dropped"
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                error!(notifier = %self.name, "Notifier worker closed unexpectedly");
                false
            }
        }
    }

    /// Shutdown the notifier worker gracefully; queued alerts are still sent
    #[instrument(name = "notifier_handle_shutdown", skip(self), fields(notifier = %self.name))]
    pub async fn shutdown(self) {
        drop(self.tx);
        if let Err(e) = self.worker_handle.await {
            error!(notifier = %self.name, error = ?e, "Worker task panicked");
        }
        debug!(notifier = %self.name, "NotifierHandle shutdown complete");
    }
}

/// Send one alert with capped exponential backoff on transient errors.
///
/// `event.attempts` counts every send made. Permanent errors stop
/// immediately.
#[instrument(
    name = "alert_dispatch",
    skip(notifier, event, retry),
    fields(notifier = notifier.name(), sequence = %event.sequence())
)]
pub async fn dispatch<N: Notifier>(
    notifier: &mut N,
    event: &mut AlertEvent,
    retry: &RetryPolicy,
) -> Result<u32, NotifyError> {
    loop {
        event.attempts += 1;
        match notifier.send(event).await {
            Ok(()) => return Ok(event.attempts),
            Err(e) if e.is_transient() && retry.allows_retry(event.attempts) => {
                let delay = retry.backoff(event.attempts);
                debug!(attempt = event.attempts, ?delay, error = %e, "transient notify failure");
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Worker task that consumes alerts and sends them to the notifier
#[instrument(name = "notifier_worker_loop", skip(notifier, rx, retry, metrics), fields(notifier = %name))]
async fn notifier_worker<N: Notifier>(
    mut notifier: N,
    mut rx: mpsc::Receiver<AlertEvent>,
    retry: RetryPolicy,
    metrics: Arc<AlertMetrics>,
    name: String,
) {
    debug!(notifier = %name, "Notifier worker started");

    while let Some(mut event) = rx.recv().await {
        metrics.set_queue_len(rx.len());

        match dispatch(&mut notifier, &mut event, &retry).await {
            Ok(attempts) => {
                metrics.inc_sent_count();
                metrics.add_retries(attempts - 1);
                observability::record_alert_sent(&name, true, attempts);
            }
            Err(e) => {
                metrics.inc_failure_count();
                metrics.add_retries(event.attempts.saturating_sub(1));
                observability::record_alert_sent(&name, false, event.attempts);
                error!(
                    notifier = %name,
                    attempts = event.attempts,
                    alert = %event.summary(),
                    error = %e,
                    "Alert dropped after final failure"
                );
            }
        }
    }

    if let Err(e) = notifier.close().await {
        error!(notifier = %name, error = %e, "Close failed on shutdown");
    }

    debug!(notifier = %name, "Notifier worker stopped");
}
