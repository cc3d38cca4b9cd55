//! Notifier trait - alert output interface

use crate::{AlertEvent, NotifyError};

/// External alert target (chat webhook, pager, log).
#[trait_variant::make(Notifier: Send)]
pub trait LocalNotifier {
    /// Notifier name (used for logging/metrics)
    fn name(&self) -> &str;

    /// Deliver one alert.
    ///
    /// # Errors
    /// Transient errors are retried by the caller; permanent errors drop the alert.
    async fn send(&mut self, event: &AlertEvent) -> Result<(), NotifyError>;

    /// Release resources
    async fn close(&mut self) -> Result<(), NotifyError>;
}
