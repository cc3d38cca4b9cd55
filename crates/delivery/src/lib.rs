//! # Delivery
//!
//! Buffer -> Transform Stage -> Format Converter -> Partitioned Writer -> Sink,
//! driven per stream by the Delivery Coordinator.
//!
//! Each `DeliveryStream` owns its own buffer and task graph; only the sink
//! handle and the `ObjectNamer` are shared between streams writing to the
//! same sink.

mod buffer;
mod converter;
mod coordinator;
mod encode;
mod error;
mod metrics;
pub mod sinks;
mod state;
mod transform;
pub mod transforms;
mod writer;

pub use buffer::Buffer;
pub use converter::{Conversion, FormatConverter};
pub use coordinator::{DeliveryHandle, DeliveryReport, DeliveryStream};
pub use encode::{encode_parquet, encode_rejected, encode_rows};
pub use error::DeliveryError;
pub use metrics::{MetricsSnapshot, WriterMetrics};
pub use sinks::{ConfiguredSink, FsSink, MemorySink};
pub use state::StateCell;
pub use transform::{TransformOutcome, TransformStage};
pub use transforms::{
    CommandTransform, ConfiguredTransform, FnTransform, IdentityTransform, JsonTransform,
};
pub use writer::{ObjectNamer, PartitionedWriter, WriteReceipt, WriteRequest};
