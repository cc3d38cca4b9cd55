//! Layered error definitions
//!
//! Categorized by source: config / buffer / conversion / transform / sink / notifier

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Whether retrying the same operation may succeed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    Transient,
    Permanent,
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transient => f.write_str("transient"),
            Self::Permanent => f.write_str("permanent"),
        }
    }
}

/// Failure reported by a transform function.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{class} transform error [{code}]: {message}")]
pub struct TransformError {
    pub class: ErrorClass,
    pub code: String,
    pub message: String,
}

impl TransformError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            class: ErrorClass::Transient,
            code: "TransformTransient".to_string(),
            message: message.into(),
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            class: ErrorClass::Permanent,
            code: "TransformFailed".to_string(),
            message: message.into(),
        }
    }

    /// Invocation exceeded its time budget. Treated as transient.
    pub fn timeout(after: Duration) -> Self {
        Self {
            class: ErrorClass::Transient,
            code: "TransformTimeout".to_string(),
            message: format!("transform did not complete within {}ms", after.as_millis()),
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = code.into();
        self
    }

    pub fn is_transient(&self) -> bool {
        self.class == ErrorClass::Transient
    }
}

/// Failure reported by an object sink.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("sink '{sink}' {class} error: {message}")]
pub struct SinkError {
    pub sink: String,
    pub class: ErrorClass,
    pub message: String,
}

impl SinkError {
    pub fn transient(sink: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            sink: sink.into(),
            class: ErrorClass::Transient,
            message: message.into(),
        }
    }

    pub fn permanent(sink: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            sink: sink.into(),
            class: ErrorClass::Permanent,
            message: message.into(),
        }
    }

    pub fn is_transient(&self) -> bool {
        self.class == ErrorClass::Transient
    }
}

impl From<std::io::Error> for SinkError {
    fn from(e: std::io::Error) -> Self {
        use std::io::ErrorKind;
        let class = match e.kind() {
            ErrorKind::NotFound
            | ErrorKind::PermissionDenied
            | ErrorKind::InvalidInput
            | ErrorKind::AlreadyExists => ErrorClass::Permanent,
            _ => ErrorClass::Transient,
        };
        Self {
            sink: "io".to_string(),
            class,
            message: e.to_string(),
        }
    }
}

/// Failure reported by an alert notifier.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("notifier '{notifier}' {class} error: {message}")]
pub struct NotifyError {
    pub notifier: String,
    pub class: ErrorClass,
    pub message: String,
}

impl NotifyError {
    pub fn transient(notifier: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            notifier: notifier.into(),
            class: ErrorClass::Transient,
            message: message.into(),
        }
    }

    pub fn permanent(notifier: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            notifier: notifier.into(),
            class: ErrorClass::Permanent,
            message: message.into(),
        }
    }

    pub fn is_transient(&self) -> bool {
        self.class == ErrorClass::Transient
    }
}

/// Unified error type
#[derive(Debug, Error)]
pub enum ContractError {
    // ===== Configuration Errors =====
    /// Configuration parse error
    #[error("config parse error: {message}")]
    ConfigParse {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Configuration validation error
    #[error("config validation error at '{field}': {message}")]
    ConfigValidation { field: String, message: String },

    // ===== Buffer Errors =====
    /// A single record larger than the batch size threshold
    #[error("record of {record_bytes} bytes exceeds buffer capacity of {max_bytes} bytes")]
    CapacityExceeded { record_bytes: usize, max_bytes: usize },

    // ===== Conversion Errors =====
    /// Record cannot be coerced into the configured schema
    #[error("schema mismatch at '{column}': {message}")]
    SchemaMismatch { column: String, message: String },

    /// Columnar or row encoding failed
    #[error("encode error: {message}")]
    Encode { message: String },

    // ===== Stage Errors =====
    #[error(transparent)]
    Transform(#[from] TransformError),

    #[error(transparent)]
    Sink(#[from] SinkError),

    #[error(transparent)]
    Notify(#[from] NotifyError),

    /// Producer side failure while polling
    #[error("producer '{producer}' error: {message}")]
    Producer { producer: String, message: String },

    // ===== General Errors =====
    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl ContractError {
    /// Create configuration parse error
    pub fn config_parse(message: impl Into<String>) -> Self {
        Self::ConfigParse {
            message: message.into(),
            source: None,
        }
    }

    /// Create configuration validation error
    pub fn config_validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ConfigValidation {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn schema_mismatch(column: impl Into<String>, message: impl Into<String>) -> Self {
        Self::SchemaMismatch {
            column: column.into(),
            message: message.into(),
        }
    }

    pub fn encode(message: impl Into<String>) -> Self {
        Self::Encode {
            message: message.into(),
        }
    }

    pub fn producer(producer: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Producer {
            producer: producer.into(),
            message: message.into(),
        }
    }

    /// Retry classification. Anything not explicitly transient is permanent.
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Transform(e) => e.class,
            Self::Sink(e) => e.class,
            Self::Notify(e) => e.class,
            Self::Producer { .. } | Self::Io(_) => ErrorClass::Transient,
            _ => ErrorClass::Permanent,
        }
    }

    /// Short code written into failed-record envelopes.
    pub fn code(&self) -> &str {
        match self {
            Self::ConfigParse { .. } | Self::ConfigValidation { .. } => "InvalidConfig",
            Self::CapacityExceeded { .. } => "RecordTooLarge",
            Self::SchemaMismatch { .. } => "SchemaMismatch",
            Self::Encode { .. } => "EncodeFailed",
            Self::Transform(e) => e.code.as_str(),
            Self::Sink(_) => "DeliveryFailed",
            Self::Notify(_) => "NotifyFailed",
            Self::Producer { .. } => "ProducerError",
            Self::Io(_) => "IoError",
            Self::Other(_) => "InternalError",
        }
    }
}
