//! Transform Stage - per-record transform with retry and failure isolation

use std::sync::Arc;
use std::time::Duration;

use contracts::{
    Batch, BatchKind, ErrorOutputType, Record, RejectedRecord, StreamId, TransformError,
    TransformFunction, TransformResult,
};
use tracing::{debug, instrument, warn};

/// Output of transforming one batch.
#[derive(Debug)]
pub struct TransformOutcome {
    /// Accepted records, kind `processed`
    pub processed: Batch,
    /// Records tagged `processing-failed`
    pub rejected: Vec<RejectedRecord>,
    /// Pre-transform copy, kind `raw`, when raw backup is on
    pub raw: Option<Batch>,
}

impl TransformOutcome {
    pub fn accepted(&self) -> usize {
        self.processed.len()
    }

    /// Accepted + rejected. Always equals the input record count.
    pub fn total(&self) -> usize {
        self.processed.len() + self.rejected.len()
    }
}

pub struct TransformStage<T> {
    stream: StreamId,
    function: Arc<T>,
    retries: u32,
    timeout: Duration,
}

impl<T> Clone for TransformStage<T> {
    fn clone(&self) -> Self {
        Self {
            stream: self.stream.clone(),
            function: Arc::clone(&self.function),
            retries: self.retries,
            timeout: self.timeout,
        }
    }
}

impl<T: TransformFunction + Sync> TransformStage<T> {
    pub fn new(stream: StreamId, function: Arc<T>, retries: u32, timeout: Duration) -> Self {
        Self {
            stream,
            function,
            retries,
            timeout,
        }
    }

    /// Transform a single record. Never fails: exhausted or permanent errors
    /// come back as `Rejected` with the attempt count.
    pub async fn apply_record(&self, record: Record) -> TransformResult {
        let mut attempts = 0u32;
        loop {
            attempts += 1;
            let result = match tokio::time::timeout(
                self.timeout,
                self.function.apply(record.payload.clone()),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(TransformError::timeout(self.timeout)),
            };

            match result {
                Ok(payload) => return TransformResult::Accepted(record.with_payload(payload)),
                Err(e) if e.is_transient() && attempts <= self.retries => {
                    debug!(
                        stream = %self.stream,
                        sequence = %record.sequence,
                        attempt = attempts,
                        error = %e,
                        "transient transform failure, retrying"
                    );
                    observability::record_transform_retry(&self.stream);
                }
                Err(e) => {
                    return TransformResult::Rejected(RejectedRecord::new(
                        record,
                        ErrorOutputType::ProcessingFailed,
                        e.code,
                        e.message,
                        attempts,
                    ));
                }
            }
        }
    }

    /// Transform every record of `batch`, preserving order.
    #[instrument(
        name = "transform_batch",
        skip(self, batch),
        fields(stream = %self.stream, records = batch.len(), function = self.function.name())
    )]
    pub async fn process(&self, batch: Batch, raw_backup: bool) -> TransformOutcome {
        let raw = raw_backup.then(|| batch.clone().relabel(BatchKind::Raw));
        let Batch {
            stream,
            created_at,
            trigger,
            records,
            ..
        } = batch;

        let mut accepted = Vec::with_capacity(records.len());
        let mut rejected = Vec::new();
        for record in records {
            match self.apply_record(record).await {
                TransformResult::Accepted(r) => accepted.push(r),
                TransformResult::Rejected(r) => rejected.push(r),
            }
        }

        if !rejected.is_empty() {
            warn!(
                stream = %self.stream,
                rejected = rejected.len(),
                accepted = accepted.len(),
                "records rejected by transform"
            );
        }
        observability::record_transform_outcome(&self.stream, accepted.len(), rejected.len());

        TransformOutcome {
            processed: Batch::new(stream, BatchKind::Processed, created_at, trigger, accepted),
            rejected,
            raw,
        }
    }
}
