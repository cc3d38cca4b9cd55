//! AlertFanOut - reads a stream cursor, filters by predicate, fans out to notifiers

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use contracts::{AlertConfig, NotifierConfig, NotifierType, Producer, RetryPolicy};

use crate::error::AlertError;
use crate::handle::NotifierHandle;
use crate::metrics::MetricsSnapshot;
use crate::notifiers::{LogNotifier, UdpNotifier, WebhookNotifier};
use crate::predicate::AlertPredicate;

const DEFAULT_POLL_MAX_RECORDS: usize = 500;

/// Summary of a finished fan-out run
#[derive(Debug, Clone, Default)]
pub struct AlertReport {
    pub source: String,
    pub records_scanned: u64,
    pub alerts_matched: u64,
    pub notifiers: Vec<(String, MetricsSnapshot)>,
}

impl AlertReport {
    pub fn total_sent(&self) -> u64 {
        self.notifiers.iter().map(|(_, m)| m.sent_count).sum()
    }

    pub fn total_dropped(&self) -> u64 {
        self.notifiers
            .iter()
            .map(|(_, m)| m.dropped_count + m.failure_count)
            .sum()
    }
}

/// Builder for creating an AlertFanOut
pub struct AlertFanOutBuilder<P> {
    config: AlertConfig,
    producer: P,
}

impl<P: Producer> AlertFanOutBuilder<P> {
    pub fn new(config: AlertConfig, producer: P) -> Self {
        Self { config, producer }
    }

    /// Create every configured notifier and spawn its worker.
    ///
    /// With no notifiers configured, alerts go to a single `LogNotifier`.
    #[instrument(
        name = "alert_fanout_build",
        skip(self),
        fields(notifier_count = self.config.notifiers.len())
    )]
    pub async fn build(self) -> Result<AlertFanOut<P>, AlertError> {
        let retry = self.config.retry_policy();
        let capacity = self.config.alert_queue_capacity;

        let mut handles = Vec::with_capacity(self.config.notifiers.len().max(1));
        for notifier in &self.config.notifiers {
            handles.push(create_notifier_handle(notifier, capacity, retry).await?);
        }
        if handles.is_empty() {
            debug!("no notifiers configured, alerts go to the log");
            handles.push(NotifierHandle::spawn(LogNotifier::new("log"), capacity, retry));
        }

        let predicate = AlertPredicate::from_config(&self.config.alert_predicate);
        Ok(AlertFanOut::with_handles(predicate, handles, self.producer))
    }
}

/// Create a NotifierHandle from configuration
#[instrument(
    name = "alert_create_notifier_handle",
    skip(config, retry),
    fields(notifier = %config.name, notifier_type = ?config.notifier_type)
)]
async fn create_notifier_handle(
    config: &NotifierConfig,
    capacity: usize,
    retry: RetryPolicy,
) -> Result<NotifierHandle, AlertError> {
    match config.notifier_type {
        NotifierType::Log => Ok(NotifierHandle::spawn(
            LogNotifier::new(&config.name),
            capacity,
            retry,
        )),
        NotifierType::Webhook => {
            let notifier = WebhookNotifier::from_params(&config.name, &config.params)
                .map_err(|e| AlertError::notifier_creation(&config.name, e.to_string()))?;
            Ok(NotifierHandle::spawn(notifier, capacity, retry))
        }
        NotifierType::Udp => {
            let notifier = UdpNotifier::from_params(&config.name, &config.params)
                .await
                .map_err(|e| AlertError::notifier_creation(&config.name, e.to_string()))?;
            Ok(NotifierHandle::spawn(notifier, capacity, retry))
        }
    }
}

/// Second consumer of the source stream. Never blocks on notifiers: matched
/// events are queued with `try_send` and dropped when a queue is full.
pub struct AlertFanOut<P> {
    predicate: AlertPredicate,
    handles: Vec<NotifierHandle>,
    producer: P,
    poll_max_records: usize,
}

impl<P: Producer> AlertFanOut<P> {
    /// Create a fan-out with custom notifier handles (for testing)
    pub fn with_handles(predicate: AlertPredicate, handles: Vec<NotifierHandle>, producer: P) -> Self {
        Self {
            predicate,
            handles,
            producer,
            poll_max_records: DEFAULT_POLL_MAX_RECORDS,
        }
    }

    pub fn with_poll_max_records(mut self, max: usize) -> Self {
        self.poll_max_records = max.max(1);
        self
    }

    /// Get metrics for all notifiers
    pub fn metrics(&self) -> Vec<(String, MetricsSnapshot)> {
        self.handles
            .iter()
            .map(|h| (h.name().to_string(), h.metrics().snapshot()))
            .collect()
    }

    /// Run until the producer ends or `stop` turns true, then let every
    /// notifier finish its queue.
    #[instrument(name = "alert_fanout_run", skip_all, fields(source = self.producer.name()))]
    pub async fn run(mut self, stop: watch::Receiver<bool>) -> AlertReport {
        let source = self.producer.name().to_string();
        info!(source = %source, notifiers = self.handles.len(), field = self.predicate.field(), "Alert fan-out started");

        let mut report = AlertReport {
            source: source.clone(),
            ..AlertReport::default()
        };

        loop {
            if *stop.borrow() {
                debug!(source = %source, "stop requested");
                break;
            }
            match self.producer.poll(self.poll_max_records).await {
                Ok(Some(records)) => {
                    report.records_scanned += records.len() as u64;
                    for record in &records {
                        if let Some(event) = self.predicate.evaluate(record, &source) {
                            report.alerts_matched += 1;
                            observability::record_alert_matched(self.predicate.field());
                            for handle in &self.handles {
                                handle.try_send(event.clone());
                            }
                        }
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    warn!(source = %source, error = %e, "alert poll failed");
                    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
                }
            }
        }

        info!(
            source = %source,
            scanned = report.records_scanned,
            matched = report.alerts_matched,
            "Alert fan-out input finished, shutting down notifiers"
        );

        let metrics: Vec<_> = self
            .handles
            .iter()
            .map(|h| (h.name().to_string(), std::sync::Arc::clone(h.metrics())))
            .collect();
        for handle in self.handles {
            handle.shutdown().await;
        }
        report.notifiers = metrics
            .into_iter()
            .map(|(name, m)| (name, m.snapshot()))
            .collect();
        report
    }
}

impl<P: Producer + 'static> AlertFanOut<P> {
    /// Spawn the fan-out as a background task
    pub fn spawn(self, stop: watch::Receiver<bool>) -> JoinHandle<AlertReport> {
        tokio::spawn(self.run(stop))
    }
}
