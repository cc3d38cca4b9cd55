//! Partition keys and object naming
//!
//! Layout: `<prefix>/<kind>[/<error-type>]/year=YYYY/month=MM/day=DD/hour=HH/<object>`

use chrono::{DateTime, Datelike, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;

use crate::{BatchKind, ErrorOutputType};

/// Destination partition of one object. Derived deterministically from the
/// batch kind and a UTC timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PartitionKey {
    pub kind: BatchKind,
    pub error_type: Option<ErrorOutputType>,
    pub year: i32,
    pub month: u32,
    pub day: u32,
    pub hour: u32,
}

impl PartitionKey {
    pub fn new(kind: BatchKind, at: DateTime<Utc>) -> Self {
        Self {
            kind,
            error_type: None,
            year: at.year(),
            month: at.month(),
            day: at.day(),
            hour: at.hour(),
        }
    }

    /// Failed-output key; always `BatchKind::Failed`.
    pub fn failed(error_type: ErrorOutputType, at: DateTime<Utc>) -> Self {
        Self {
            error_type: Some(error_type),
            ..Self::new(BatchKind::Failed, at)
        }
    }

    /// Directory for this key under `prefix`, with a trailing `/`.
    pub fn directory(&self, prefix: &str) -> String {
        let mut dir = String::new();
        let prefix = prefix.trim_matches('/');
        if !prefix.is_empty() {
            dir.push_str(prefix);
            dir.push('/');
        }
        dir.push_str(self.kind.as_str());
        dir.push('/');
        if let Some(error_type) = self.error_type {
            dir.push_str(error_type.as_str());
            dir.push('/');
        }
        // Writing into a String cannot fail.
        let _ = write!(
            dir,
            "year={:04}/month={:02}/day={:02}/hour={:02}/",
            self.year, self.month, self.day, self.hour
        );
        dir
    }
}

/// Object name: `{stream}-{YYYY-MM-DD-HH-MM-SS}-{seq}`.
pub fn object_name(stream: &str, created_at: DateTime<Utc>, sequence: u64) -> String {
    format!(
        "{}-{}-{}",
        stream,
        created_at.format("%Y-%m-%d-%H-%M-%S"),
        sequence
    )
}
