//! LogNotifier - writes alerts to the log via tracing

use contracts::{AlertEvent, NotifyError, Notifier};
use tracing::{info, instrument, warn};

/// Notifier that logs each alert at warn level
pub struct LogNotifier {
    name: String,
}

impl LogNotifier {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl Notifier for LogNotifier {
    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(
        name = "log_notifier_send",
        skip(self, event),
        fields(notifier = %self.name, sequence = %event.sequence())
    )]
    async fn send(&mut self, event: &AlertEvent) -> Result<(), NotifyError> {
        warn!(
            notifier = %self.name,
            source = %event.source,
            field = %event.field,
            value = %event.value,
            sequence = %event.sequence(),
            "ALERT {}",
            event.summary()
        );
        Ok(())
    }

    async fn close(&mut self) -> Result<(), NotifyError> {
        info!(notifier = %self.name, "LogNotifier closed");
        Ok(())
    }
}
