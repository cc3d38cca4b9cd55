//! Delivery lifecycle state and status events

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{BatchKind, ErrorOutputType, StreamId};

/// Lifecycle of a delivery stream.
///
/// ```text
/// Created -> Active -> Draining -> Stopped
///    \          \          \
///     +----------+----------+--> Failed
/// ```
/// `Created -> Draining` is also legal (stop before start completes).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryState {
    Created,
    Active,
    Draining,
    Stopped,
    Failed,
}

impl DeliveryState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Stopped | Self::Failed)
    }

    /// Whether the state machine allows `self -> next`.
    pub fn can_transition_to(self, next: DeliveryState) -> bool {
        use DeliveryState::*;
        match (self, next) {
            (Created, Active) | (Created, Draining) => true,
            (Active, Draining) => true,
            (Draining, Stopped) => true,
            (from, Failed) => !from.is_terminal(),
            _ => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Active => "active",
            Self::Draining => "draining",
            Self::Stopped => "stopped",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for DeliveryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Observable event published by a running delivery stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum StatusEvent {
    StateChanged {
        stream: StreamId,
        from: DeliveryState,
        to: DeliveryState,
        reason: Option<String>,
    },
    BatchFlushed {
        stream: StreamId,
        records: usize,
        bytes: usize,
        trigger: crate::FlushTrigger,
    },
    BatchCommitted {
        stream: StreamId,
        kind: BatchKind,
        error_type: Option<ErrorOutputType>,
        path: String,
        records: usize,
        bytes: usize,
        attempts: u32,
    },
    RecordsRejected {
        stream: StreamId,
        error_type: ErrorOutputType,
        count: usize,
    },
    DeliveryFailure {
        stream: StreamId,
        path: String,
        redirected_to: Option<String>,
        message: String,
    },
}

impl StatusEvent {
    pub fn stream(&self) -> &StreamId {
        match self {
            Self::StateChanged { stream, .. }
            | Self::BatchFlushed { stream, .. }
            | Self::BatchCommitted { stream, .. }
            | Self::RecordsRejected { stream, .. }
            | Self::DeliveryFailure { stream, .. } => stream,
        }
    }
}
