//! Record - the unit of data moving through a delivery stream

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Producer-assigned position of a record, monotonic per source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct SequenceToken(pub u64);

impl SequenceToken {
    #[inline]
    pub fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SequenceToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Zero padded so tokens sort lexically in failed-record output.
        write!(f, "{:020}", self.0)
    }
}

/// Opaque payload plus the metadata assigned on arrival.
///
/// Cloning is cheap: the payload is reference counted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub payload: Bytes,
    pub arrival: DateTime<Utc>,
    pub sequence: SequenceToken,
}

impl Record {
    pub fn new(payload: impl Into<Bytes>, arrival: DateTime<Utc>, sequence: SequenceToken) -> Self {
        Self {
            payload: payload.into(),
            arrival,
            sequence,
        }
    }

    /// Size counted against buffer thresholds.
    #[inline]
    pub fn size_bytes(&self) -> usize {
        self.payload.len()
    }

    /// Same metadata, different payload. Used when a transform rewrites a record.
    pub fn with_payload(&self, payload: Bytes) -> Self {
        Self {
            payload,
            arrival: self.arrival,
            sequence: self.sequence,
        }
    }
}
