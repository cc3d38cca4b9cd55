//! # Ingestion
//!
//! Record ingestion module.
//!
//! Responsibilities:
//! - Hold the shared source stream that all consumers read
//! - Give each consumer its own cursor (durable or lossy)
//! - Apply producer backpressure when durable cursors fall behind retention
//! - Feed records from NDJSON files, stdin, or synthetic traffic
//!
//! ## Usage Example
//!
//! ```ignore
//! use ingestion::{CursorMode, FilePump, SharedStream};
//!
//! let stream = SharedStream::new("web", 10_000);
//! let cursor = stream.cursor("orders", CursorMode::Durable, Duration::from_millis(200));
//! FilePump::new("events.ndjson", stream.clone()).spawn();
//! // hand `cursor` to a delivery stream as its Producer
//! ```

mod config;
mod error;
mod mock;
mod pump;
mod stream;

// Re-exports
pub use config::{CursorMode, IngestionMetrics, MetricsSnapshot};
pub use contracts::{Producer, Record};
pub use error::{IngestionError, Result};
pub use mock::{synthetic_payloads, MockProducer};
pub use pump::FilePump;
pub use stream::{SharedStream, StreamCursor};
