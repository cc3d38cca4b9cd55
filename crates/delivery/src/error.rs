//! Delivery error types

use contracts::{ContractError, DeliveryState, SinkError};
use thiserror::Error;

/// Delivery-specific errors
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// Sink did not answer the startup probe
    #[error("sink '{sink}' unreachable at startup: {source}")]
    SinkUnreachable {
        sink: String,
        #[source]
        source: SinkError,
    },

    /// Primary write and the delivery-failed redirect both failed
    #[error("redirect of '{path}' to failed storage failed: {source}")]
    RedirectFailed {
        path: String,
        #[source]
        source: SinkError,
    },

    /// Transition not allowed by the lifecycle state machine
    #[error("illegal state transition {from} -> {to}")]
    IllegalTransition {
        from: DeliveryState,
        to: DeliveryState,
    },

    /// A pipeline stage went away while others were still sending to it
    #[error("pipeline stage '{stage}' closed unexpectedly")]
    StageClosed { stage: &'static str },

    /// Task join failure
    #[error("delivery task for '{stream}' aborted: {message}")]
    TaskAborted { stream: String, message: String },

    /// Contract-level error (encoding, conversion)
    #[error(transparent)]
    Contract(#[from] ContractError),
}

impl DeliveryError {
    pub fn stage_closed(stage: &'static str) -> Self {
        Self::StageClosed { stage }
    }

    /// Errors that end the stream in `Failed`.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::IllegalTransition { .. })
    }
}
