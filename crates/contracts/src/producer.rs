//! Producer trait - input interface of a delivery stream

use crate::{ContractError, Record};

/// Source of records for one consumer.
///
/// `poll` must be non-blocking or bounded-blocking: it returns an empty
/// vector when nothing arrived within the implementation's wait budget.
#[trait_variant::make(Producer: Send)]
pub trait LocalProducer {
    /// Producer name (used for logging/metrics)
    fn name(&self) -> &str;

    /// Take up to `max_records` records in arrival order.
    ///
    /// Returns `Ok(None)` once the source is closed and fully drained.
    /// Must be cancel-safe: dropping the future before it completes loses no records.
    async fn poll(&mut self, max_records: usize) -> Result<Option<Vec<Record>>, ContractError>;
}
