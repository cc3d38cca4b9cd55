//! ObjectSink trait - durable object storage interface
//!
//! Keys are `/`-separated paths; a successful `put` makes the object durable.

use bytes::Bytes;

use crate::SinkError;

/// Object store that delivery writers commit batches to.
#[trait_variant::make(ObjectSink: Send)]
pub trait LocalObjectSink {
    /// Sink name (used for logging/metrics)
    fn name(&self) -> &str;

    /// Store `body` under `path`, replacing any object with the same path.
    ///
    /// # Errors
    /// Classified transient or permanent; only transient errors are retried.
    async fn put(&self, path: &str, body: Bytes) -> Result<(), SinkError>;

    /// List object paths beginning with `prefix`, sorted.
    async fn list(&self, prefix: &str) -> Result<Vec<String>, SinkError>;
}
