//! Notifier implementations
//!
//! Contains LogNotifier, WebhookNotifier, UdpNotifier and the in-memory
//! RecordingNotifier.

mod log;
mod recording;
mod udp;
mod webhook;

pub use self::log::LogNotifier;
pub use self::recording::RecordingNotifier;
pub use self::udp::UdpNotifier;
pub use self::webhook::WebhookNotifier;

use serde::Serialize;

use contracts::AlertEvent;

/// Wire form of an alert, shared by the webhook and UDP notifiers
#[derive(Debug, Serialize)]
pub(crate) struct AlertMessage<'a> {
    text: String,
    source: &'a str,
    field: &'a str,
    value: &'a str,
    sequence: u64,
    arrival: String,
    payload: String,
}

impl<'a> AlertMessage<'a> {
    pub(crate) fn from_event(event: &'a AlertEvent) -> Self {
        Self {
            text: event.summary(),
            source: &event.source,
            field: &event.field,
            value: &event.value,
            sequence: event.sequence().value(),
            arrival: event.arrival().to_rfc3339(),
            payload: event.payload_text(),
        }
    }
}
