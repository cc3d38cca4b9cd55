//! AlertEvent - output of the alert fan-out predicate

use chrono::{DateTime, Utc};

use crate::{Record, SequenceToken};

/// A record that matched the alert predicate, plus delivery bookkeeping.
#[derive(Debug, Clone)]
pub struct AlertEvent {
    /// Name of the source the record came from
    pub source: String,
    pub record: Record,
    /// Dotted path of the matched field
    pub field: String,
    /// Matched value, rendered as text
    pub value: String,
    /// Send attempts made so far
    pub attempts: u32,
}

impl AlertEvent {
    pub fn new(
        source: impl Into<String>,
        record: Record,
        field: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        Self {
            source: source.into(),
            record,
            field: field.into(),
            value: value.into(),
            attempts: 0,
        }
    }

    pub fn sequence(&self) -> SequenceToken {
        self.record.sequence
    }

    pub fn arrival(&self) -> DateTime<Utc> {
        self.record.arrival
    }

    /// Payload as text, invalid UTF-8 replaced.
    pub fn payload_text(&self) -> String {
        String::from_utf8_lossy(&self.record.payload).into_owned()
    }

    /// One-line human readable message.
    pub fn summary(&self) -> String {
        format!(
            "[{}] {}={} at {} (seq {})",
            self.source,
            self.field,
            self.value,
            self.record.arrival.to_rfc3339(),
            self.record.sequence
        )
    }
}
