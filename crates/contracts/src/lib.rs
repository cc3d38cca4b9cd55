//! # Contracts
//!
//! Frozen interface contracts, defining inter-module data structures and traits.
//! All business crates can only depend on this crate, reverse dependencies are prohibited.
//!
//! ## Time Model
//! - Record arrival time is UTC wall clock (`chrono::DateTime<Utc>`), assigned by the producer
//! - Partitions are derived from arrival time, never from processing time
//! - Buffer deadlines use the monotonic clock and never appear in data

mod alert;
mod batch;
mod blueprint;
mod error;
mod notifier;
mod partition;
mod producer;
mod record;
mod retry;
mod sink;
mod status;
mod stream_id;
mod transform;

pub use alert::AlertEvent;
pub use batch::*;
pub use blueprint::*;
pub use error::*;
pub use notifier::{LocalNotifier, Notifier};
pub use partition::{object_name, PartitionKey};
pub use producer::{LocalProducer, Producer};
pub use record::{Record, SequenceToken};
pub use retry::RetryPolicy;
pub use sink::{LocalObjectSink, ObjectSink};
pub use status::{DeliveryState, StatusEvent};
pub use stream_id::StreamId;
pub use transform::{LocalTransformFunction, TransformFunction};
