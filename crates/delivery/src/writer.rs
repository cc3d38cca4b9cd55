//! Partitioned Writer - path computation, retry and failed-storage redirect

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use contracts::{
    object_name, Batch, BatchKind, ErrorOutputType, ObjectSink, PartitionKey, RejectedRecord,
    RetryPolicy, SinkError, StreamId,
};
use tracing::{debug, error, instrument, warn};

use crate::error::DeliveryError;
use crate::metrics::WriterMetrics;

/// Object-name sequence shared by every writer of one sink.
#[derive(Debug, Default)]
pub struct ObjectNamer {
    next: AtomicU64,
}

impl ObjectNamer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn starting_at(first: u64) -> Self {
        Self {
            next: AtomicU64::new(first),
        }
    }

    /// Continue after the highest sequence among already committed paths,
    /// so a restart never reuses an object name.
    pub fn resume_after<'a>(paths: impl IntoIterator<Item = &'a str>) -> Self {
        let next = paths
            .into_iter()
            .filter_map(sequence_of)
            .max()
            .map_or(0, |seq| seq + 1);
        Self::starting_at(next)
    }

    /// Allocate a fresh `{stream}-{YYYY-MM-DD-HH-MM-SS}-{seq}` name.
    pub fn next_name(&self, stream: &str, created_at: DateTime<Utc>) -> String {
        let seq = self.next.fetch_add(1, Ordering::Relaxed);
        object_name(stream, created_at, seq)
    }
}

fn sequence_of(path: &str) -> Option<u64> {
    let name = path.rsplit('/').next()?;
    name.rsplit_once('-')?.1.parse().ok()
}

/// One object to commit.
#[derive(Debug, Clone)]
pub struct WriteRequest {
    pub stream: StreamId,
    pub kind: BatchKind,
    /// Set for `failed` objects
    pub error_type: Option<ErrorOutputType>,
    /// Batch creation time, used in the object name
    pub created_at: DateTime<Utc>,
    /// Time the partition key is derived from
    pub event_time: DateTime<Utc>,
    pub records: usize,
    pub body: Bytes,
}

impl WriteRequest {
    /// Request for an encoded raw or processed batch.
    pub fn for_batch(batch: &Batch, body: Bytes) -> Self {
        Self {
            stream: batch.stream.clone(),
            kind: batch.kind,
            error_type: None,
            created_at: batch.created_at,
            event_time: batch.event_time(),
            records: batch.len(),
            body,
        }
    }

    /// Request for encoded failed-record envelopes.
    pub fn for_rejected(
        stream: StreamId,
        created_at: DateTime<Utc>,
        error_type: ErrorOutputType,
        records: &[RejectedRecord],
        body: Bytes,
    ) -> Self {
        let event_time = records
            .first()
            .map(|r| r.record.arrival)
            .unwrap_or(created_at);
        Self {
            stream,
            kind: BatchKind::Failed,
            error_type: Some(error_type),
            created_at,
            event_time,
            records: records.len(),
            body,
        }
    }

    fn partition_key(&self) -> PartitionKey {
        match self.error_type {
            Some(error_type) => PartitionKey::failed(error_type, self.event_time),
            None => PartitionKey::new(self.kind, self.event_time),
        }
    }
}

/// Outcome of a successful `write`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteReceipt {
    pub path: String,
    pub kind: BatchKind,
    pub error_type: Option<ErrorOutputType>,
    /// Put attempts across the primary path and any redirect
    pub attempts: u32,
    pub bytes: usize,
    pub records: usize,
    /// Original destination when the object was redirected
    pub redirected_from: Option<String>,
    /// Last primary-path error when redirected
    pub failure: Option<String>,
}

impl WriteReceipt {
    pub fn is_redirect(&self) -> bool {
        self.redirected_from.is_some()
    }
}

pub struct PartitionedWriter<S> {
    sink: Arc<S>,
    namer: Arc<ObjectNamer>,
    prefix: String,
    retry: RetryPolicy,
    metrics: Arc<WriterMetrics>,
}

impl<S> Clone for PartitionedWriter<S> {
    fn clone(&self) -> Self {
        Self {
            sink: Arc::clone(&self.sink),
            namer: Arc::clone(&self.namer),
            prefix: self.prefix.clone(),
            retry: self.retry,
            metrics: Arc::clone(&self.metrics),
        }
    }
}

impl<S: ObjectSink + Sync> PartitionedWriter<S> {
    pub fn new(
        sink: Arc<S>,
        namer: Arc<ObjectNamer>,
        prefix: impl Into<String>,
        retry: RetryPolicy,
        metrics: Arc<WriterMetrics>,
    ) -> Self {
        Self {
            sink,
            namer,
            prefix: prefix.into(),
            retry,
            metrics,
        }
    }

    /// Commit `request` under its partition path.
    ///
    /// The object name is allocated once and reused by every retry and by
    /// the redirect, so one request produces at most one object.
    ///
    /// # Errors
    /// `RedirectFailed` when the primary path exhausted its attempts and the
    /// `delivery-failed` redirect failed as well. This is fatal for the stream.
    #[instrument(
        name = "partitioned_write",
        skip(self, request),
        fields(stream = %request.stream, kind = %request.kind, records = request.records)
    )]
    pub async fn write(&self, request: WriteRequest) -> Result<WriteReceipt, DeliveryError> {
        let name = self.namer.next_name(&request.stream, request.created_at);
        let path = format!("{}{}", request.partition_key().directory(&self.prefix), name);
        let bytes = request.body.len();
        let started = Instant::now();

        let primary_error = match self.put_with_retry(&request.stream, &path, &request.body).await {
            Ok(attempts) => {
                self.metrics.record_commit(bytes);
                observability::record_object_committed(
                    &request.stream,
                    request.kind,
                    bytes,
                    attempts,
                    started.elapsed().as_secs_f64() * 1000.0,
                );
                debug!(path = %path, attempts, "object committed");
                return Ok(WriteReceipt {
                    path,
                    kind: request.kind,
                    error_type: request.error_type,
                    attempts,
                    bytes,
                    records: request.records,
                    redirected_from: None,
                    failure: None,
                });
            }
            Err(failure) => failure,
        };

        let (cause, primary_attempts) = primary_error;
        self.metrics.inc_delivery_failures();
        let redirect = format!(
            "{}{}",
            PartitionKey::failed(ErrorOutputType::DeliveryFailed, request.event_time)
                .directory(&self.prefix),
            name
        );
        warn!(
            path = %path,
            redirect = %redirect,
            attempts = primary_attempts,
            error = %cause,
            "write failed, redirecting to failed storage"
        );

        match self.put_with_retry(&request.stream, &redirect, &request.body).await {
            Ok(attempts) => {
                self.metrics.record_commit(bytes);
                observability::record_delivery_failure(&request.stream, true);
                observability::record_object_committed(
                    &request.stream,
                    BatchKind::Failed,
                    bytes,
                    attempts,
                    started.elapsed().as_secs_f64() * 1000.0,
                );
                Ok(WriteReceipt {
                    path: redirect,
                    kind: BatchKind::Failed,
                    error_type: Some(ErrorOutputType::DeliveryFailed),
                    attempts: primary_attempts + attempts,
                    bytes,
                    records: request.records,
                    redirected_from: Some(path),
                    failure: Some(cause.to_string()),
                })
            }
            Err((source, _)) => {
                observability::record_delivery_failure(&request.stream, false);
                error!(path = %redirect, error = %source, "redirect to failed storage failed");
                Err(DeliveryError::RedirectFailed {
                    path: redirect,
                    source,
                })
            }
        }
    }

    /// Put with capped exponential backoff on transient errors.
    /// Returns the attempts made, alongside the last error on failure.
    async fn put_with_retry(
        &self,
        stream: &StreamId,
        path: &str,
        body: &Bytes,
    ) -> Result<u32, (SinkError, u32)> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.sink.put(path, body.clone()).await {
                Ok(()) => return Ok(attempt),
                Err(e) if e.is_transient() && self.retry.allows_retry(attempt) => {
                    let delay = self.retry.backoff(attempt);
                    debug!(path, attempt, ?delay, error = %e, "transient put failure");
                    self.metrics.inc_sink_retries();
                    observability::record_sink_retry(stream);
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err((e, attempt)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sinks::MemorySink;
    use chrono::TimeZone;
    use contracts::{FlushTrigger, Record, SequenceToken};
    use std::time::Duration;

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 10, 14, 30, 5).unwrap()
    }

    fn writer(sink: Arc<MemorySink>, retries: u32) -> PartitionedWriter<MemorySink> {
        PartitionedWriter::new(
            sink,
            Arc::new(ObjectNamer::new()),
            "logs",
            RetryPolicy::with_retries(retries, Duration::from_millis(10), Duration::from_millis(40)),
            Arc::new(WriterMetrics::new()),
        )
    }

    fn processed() -> WriteRequest {
        let batch = Batch::new(
            "web".into(),
            BatchKind::Processed,
            at(),
            FlushTrigger::Size,
            vec![Record::new("{}", at(), SequenceToken(0))],
        );
        WriteRequest::for_batch(&batch, Bytes::from_static(b"{}\n"))
    }

    #[test]
    fn test_names_are_unique_and_ordered() {
        let namer = ObjectNamer::starting_at(5);
        assert_eq!(namer.next_name("web", at()), "web-2024-03-10-14-30-05-5");
        assert_eq!(namer.next_name("web", at()), "web-2024-03-10-14-30-05-6");
    }

    #[test]
    fn test_resume_after_existing_objects() {
        let existing = [
            "logs/processed/year=2024/month=03/day=10/hour=14/web-2024-03-10-14-30-05-3",
            "logs/raw/year=2024/month=03/day=10/hour=14/my-web-2024-03-10-14-30-05-11",
            "logs/notes.txt",
        ];
        let namer = ObjectNamer::resume_after(existing);
        assert_eq!(namer.next_name("web", at()), "web-2024-03-10-14-30-05-12");
        assert_eq!(
            ObjectNamer::resume_after(std::iter::empty()).next_name("web", at()),
            "web-2024-03-10-14-30-05-0"
        );
    }

    #[tokio::test]
    async fn test_commit_under_partition_path() {
        let sink = Arc::new(MemorySink::new("mem"));
        let receipt = writer(sink.clone(), 3).write(processed()).await.unwrap();
        assert_eq!(
            receipt.path,
            "logs/processed/year=2024/month=03/day=10/hour=14/web-2024-03-10-14-30-05-0"
        );
        assert_eq!(receipt.attempts, 1);
        assert_eq!(sink.get(&receipt.path).unwrap().as_ref(), b"{}\n");
    }

    #[tokio::test(start_paused = true)]
    async fn test_two_failures_then_success_commits_one_object() {
        let sink = Arc::new(MemorySink::new("mem"));
        sink.fail_next_puts(2);
        let receipt = writer(sink.clone(), 3).write(processed()).await.unwrap();
        assert_eq!(receipt.attempts, 3);
        assert!(!receipt.is_redirect());
        assert_eq!(sink.paths(), vec![receipt.path]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_redirects_with_same_name() {
        let sink = Arc::new(MemorySink::new("mem"));
        sink.fail_next_puts(2);
        let receipt = writer(sink.clone(), 1).write(processed()).await.unwrap();
        assert!(receipt.is_redirect());
        assert_eq!(receipt.error_type, Some(ErrorOutputType::DeliveryFailed));
        assert_eq!(
            receipt.path,
            "logs/failed/delivery-failed/year=2024/month=03/day=10/hour=14/web-2024-03-10-14-30-05-0"
        );
        assert_eq!(sink.len(), 1);
    }

    #[tokio::test]
    async fn test_permanent_error_skips_retries() {
        let sink = Arc::new(MemorySink::new("mem"));
        sink.inject_put_failure(SinkError::permanent("mem", "denied"));
        let receipt = writer(sink.clone(), 3).write(processed()).await.unwrap();
        assert_eq!(receipt.attempts, 2);
        assert!(receipt.is_redirect());
    }

    #[tokio::test]
    async fn test_redirect_failure_is_fatal() {
        let sink = Arc::new(MemorySink::new("mem"));
        sink.inject_put_failure(SinkError::permanent("mem", "denied"));
        sink.inject_put_failure(SinkError::permanent("mem", "denied"));
        let err = writer(sink.clone(), 3).write(processed()).await.unwrap_err();
        assert!(matches!(err, DeliveryError::RedirectFailed { .. }));
        assert!(err.is_fatal());
        assert!(sink.is_empty());
    }

    #[tokio::test]
    async fn test_redelivery_never_reuses_a_path() {
        let sink = Arc::new(MemorySink::new("mem"));
        let w = writer(sink.clone(), 0);
        let first = w.write(processed()).await.unwrap();
        let second = w.write(processed()).await.unwrap();
        assert_ne!(first.path, second.path);
        assert_eq!(sink.len(), 2);
    }

    #[tokio::test]
    async fn test_rejected_request_path() {
        let sink = Arc::new(MemorySink::new("mem"));
        let rejected = vec![RejectedRecord::new(
            Record::new("x", at(), SequenceToken(1)),
            ErrorOutputType::ProcessingFailed,
            "TransformFailed",
            "bad",
            1,
        )];
        let request = WriteRequest::for_rejected(
            "web".into(),
            at(),
            ErrorOutputType::ProcessingFailed,
            &rejected,
            Bytes::from_static(b"{}\n"),
        );
        let receipt = writer(sink, 0).write(request).await.unwrap();
        assert!(receipt
            .path
            .starts_with("logs/failed/processing-failed/year=2024/month=03/day=10/hour=14/"));
    }
}
