//! Object sink implementations
//!
//! Contains MemorySink and FsSink.

mod fs;
mod memory;

pub use self::fs::FsSink;
pub use self::memory::MemorySink;

use bytes::Bytes;
use contracts::{ObjectSink, SinkConfig, SinkError, SinkType};

/// Sink selected by configuration.
pub enum ConfiguredSink {
    Memory(MemorySink),
    Fs(FsSink),
}

impl ConfiguredSink {
    /// Build the sink described by `config`.
    ///
    /// # Errors
    /// Permanent `SinkError` when a required parameter is missing or the
    /// root directory cannot be created.
    pub fn from_config(config: &SinkConfig) -> Result<Self, SinkError> {
        match config.sink_type {
            SinkType::Memory => Ok(Self::Memory(MemorySink::new(config.name.clone()))),
            SinkType::Fs => FsSink::from_params(config.name.clone(), &config.params).map(Self::Fs),
        }
    }
}

impl ObjectSink for ConfiguredSink {
    fn name(&self) -> &str {
        match self {
            Self::Memory(s) => s.name(),
            Self::Fs(s) => s.name(),
        }
    }

    async fn put(&self, path: &str, body: Bytes) -> Result<(), SinkError> {
        match self {
            Self::Memory(s) => s.put(path, body).await,
            Self::Fs(s) => s.put(path, body).await,
        }
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, SinkError> {
        match self {
            Self::Memory(s) => s.list(prefix).await,
            Self::Fs(s) => s.list(prefix).await,
        }
    }
}
