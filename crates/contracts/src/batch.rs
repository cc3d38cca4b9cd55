//! Batches and per-record outcomes

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{Record, StreamId};

/// Output family a batch belongs to. Also the first path segment after the prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchKind {
    /// Untransformed records (source backup)
    Raw,
    /// Transformed, accepted records
    Processed,
    /// Records that could not be processed or delivered
    Failed,
}

impl BatchKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Raw => "raw",
            Self::Processed => "processed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for BatchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a batch was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlushTrigger {
    Size,
    Interval,
    Shutdown,
}

impl FlushTrigger {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Size => "size",
            Self::Interval => "interval",
            Self::Shutdown => "shutdown",
        }
    }
}

/// Sub-category of failed output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorOutputType {
    ProcessingFailed,
    FormatConversionFailed,
    DeliveryFailed,
}

impl ErrorOutputType {
    /// Path segment under the `failed/` tree.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ProcessingFailed => "processing-failed",
            Self::FormatConversionFailed => "format-conversion-failed",
            Self::DeliveryFailed => "delivery-failed",
        }
    }
}

impl fmt::Display for ErrorOutputType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordered group of records closed together by the buffer.
///
/// Record order is arrival order and is never changed downstream.
#[derive(Debug, Clone)]
pub struct Batch {
    pub stream: StreamId,
    pub kind: BatchKind,
    pub created_at: DateTime<Utc>,
    pub trigger: FlushTrigger,
    pub size_bytes: usize,
    pub records: Vec<Record>,
}

impl Batch {
    pub fn new(
        stream: StreamId,
        kind: BatchKind,
        created_at: DateTime<Utc>,
        trigger: FlushTrigger,
        records: Vec<Record>,
    ) -> Self {
        let size_bytes = records.iter().map(Record::size_bytes).sum();
        Self {
            stream,
            kind,
            created_at,
            trigger,
            size_bytes,
            records,
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Timestamp used for partitioning: arrival of the first record, or the
    /// batch creation time when the batch is empty.
    pub fn event_time(&self) -> DateTime<Utc> {
        self.records
            .first()
            .map(|r| r.arrival)
            .unwrap_or(self.created_at)
    }

    /// Same records and metadata under a different kind.
    pub fn relabel(mut self, kind: BatchKind) -> Self {
        self.kind = kind;
        self
    }
}

/// A record that ended in failed output, with the reason.
#[derive(Debug, Clone)]
pub struct RejectedRecord {
    /// Original record (pre-transform payload)
    pub record: Record,
    pub error_type: ErrorOutputType,
    /// Short machine-readable code, e.g. `TransformTimeout`
    pub error_code: String,
    pub message: String,
    /// How many processing attempts were made before giving up
    pub attempts: u32,
}

impl RejectedRecord {
    pub fn new(
        record: Record,
        error_type: ErrorOutputType,
        error_code: impl Into<String>,
        message: impl Into<String>,
        attempts: u32,
    ) -> Self {
        Self {
            record,
            error_type,
            error_code: error_code.into(),
            message: message.into(),
            attempts,
        }
    }
}

/// Failed records of one error type that share a batch origin.
#[derive(Debug, Clone)]
pub struct RejectedBatch {
    pub stream: StreamId,
    pub created_at: DateTime<Utc>,
    pub error_type: ErrorOutputType,
    pub records: Vec<RejectedRecord>,
}

impl RejectedBatch {
    pub fn event_time(&self) -> DateTime<Utc> {
        self.records
            .first()
            .map(|r| r.record.arrival)
            .unwrap_or(self.created_at)
    }
}

/// Outcome of transforming one record. Exactly one variant per input record.
#[derive(Debug, Clone)]
pub enum TransformResult {
    Accepted(Record),
    Rejected(RejectedRecord),
}

impl TransformResult {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SequenceToken;
    use chrono::TimeZone;

    #[test]
    fn test_batch_size_is_sum_of_payloads() {
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let records = vec![
            Record::new(&b"aaaa"[..], at, SequenceToken(1)),
            Record::new(&b"bb"[..], at, SequenceToken(2)),
        ];
        let batch = Batch::new("s".into(), BatchKind::Raw, at, FlushTrigger::Size, records);
        assert_eq!(batch.size_bytes, 6);
        assert_eq!(batch.len(), 2);
    }

    #[test]
    fn test_event_time_falls_back_to_creation() {
        let created = Utc.with_ymd_and_hms(2024, 1, 1, 5, 0, 0).unwrap();
        let first = Utc.with_ymd_and_hms(2024, 1, 1, 4, 59, 59).unwrap();
        let empty = Batch::new("s".into(), BatchKind::Raw, created, FlushTrigger::Interval, vec![]);
        assert_eq!(empty.event_time(), created);

        let full = Batch::new(
            "s".into(),
            BatchKind::Raw,
            created,
            FlushTrigger::Interval,
            vec![Record::new(&b"x"[..], first, SequenceToken(0))],
        );
        assert_eq!(full.event_time(), first);
    }

    #[test]
    fn test_error_output_type_segments() {
        assert_eq!(ErrorOutputType::ProcessingFailed.as_str(), "processing-failed");
        assert_eq!(
            serde_json::to_string(&ErrorOutputType::FormatConversionFailed).unwrap(),
            "\"format-conversion-failed\""
        );
    }
}
