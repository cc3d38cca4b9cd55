//! TransformFunction trait - user supplied per-record transformation

use bytes::Bytes;

use crate::TransformError;

/// Pure function from one input payload to one output payload.
///
/// Implementations may be invoked concurrently and more than once for the
/// same payload when a transient failure is retried.
#[trait_variant::make(TransformFunction: Send)]
pub trait LocalTransformFunction {
    /// Function name (used for logging/metrics)
    fn name(&self) -> &str;

    /// Transform one payload.
    ///
    /// # Errors
    /// Transient errors are retried within the configured budget; permanent
    /// errors reject the record immediately.
    async fn apply(&self, payload: Bytes) -> Result<Bytes, TransformError>;
}
