//! Delivery Coordinator - one delivery stream's task graph and lifecycle
//!
//! ```text
//! Producer -> [ingest task: Buffer] -batch queue-> [transform task] -write queue-> [writer workers] -> Sink
//! ```
//!
//! Both queues are bounded by `queueCapacity`. The ingest task blocks on the
//! batch queue when the transform falls behind, which in turn stops it
//! polling the producer.

use std::sync::Arc;

use chrono::Utc;
use contracts::{
    Batch, BatchKind, DeliveryState, ErrorOutputType, ObjectSink, OutputFormat, Producer,
    RejectedRecord, StatusEvent, StreamConfig, StreamId, TransformFunction,
};
use serde::Serialize;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep, sleep_until, Duration, Instant};
use tracing::{debug, info, instrument, warn};

use crate::buffer::Buffer;
use crate::converter::FormatConverter;
use crate::encode::{encode_parquet, encode_rejected, encode_rows};
use crate::error::DeliveryError;
use crate::metrics::{MetricsSnapshot, WriterMetrics};
use crate::state::StateCell;
use crate::transform::TransformStage;
use crate::writer::{ObjectNamer, PartitionedWriter, WriteRequest};

const STATUS_CAPACITY: usize = 1024;
const DEFAULT_POLL_MAX_RECORDS: usize = 500;
const PRODUCER_ERROR_PAUSE: Duration = Duration::from_millis(100);

/// Summary of a finished delivery stream.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryReport {
    pub stream: StreamId,
    pub final_state: DeliveryState,
    pub metrics: MetricsSnapshot,
}

/// A configured, not yet started delivery stream.
pub struct DeliveryStream<T, S> {
    config: StreamConfig,
    transform: Arc<T>,
    sink: Arc<S>,
    namer: Arc<ObjectNamer>,
    poll_max_records: usize,
    state: Arc<StateCell>,
    status: broadcast::Sender<StatusEvent>,
    metrics: Arc<WriterMetrics>,
}

impl<T, S> DeliveryStream<T, S>
where
    T: TransformFunction + Sync + 'static,
    S: ObjectSink + Sync + 'static,
{
    pub fn new(config: StreamConfig, transform: Arc<T>, sink: Arc<S>, namer: Arc<ObjectNamer>) -> Self {
        let (status, _) = broadcast::channel(STATUS_CAPACITY);
        let state = Arc::new(StateCell::new(config.name.clone(), status.clone()));
        Self {
            config,
            transform,
            sink,
            namer,
            poll_max_records: DEFAULT_POLL_MAX_RECORDS,
            state,
            status,
            metrics: Arc::new(WriterMetrics::new()),
        }
    }

    /// Records requested per producer poll.
    pub fn with_poll_max_records(mut self, max: usize) -> Self {
        self.poll_max_records = max.max(1);
        self
    }

    pub fn name(&self) -> &StreamId {
        &self.config.name
    }

    pub fn state(&self) -> DeliveryState {
        self.state.get()
    }

    /// Status events; subscribe before `start` to see the whole run.
    pub fn subscribe(&self) -> broadcast::Receiver<StatusEvent> {
        self.status.subscribe()
    }

    pub fn watch_state(&self) -> watch::Receiver<DeliveryState> {
        self.state.watch()
    }

    /// Stop a stream that was never started: `Created -> Draining -> Stopped`.
    pub fn cancel(self) -> Result<DeliveryReport, DeliveryError> {
        self.state
            .transition(DeliveryState::Draining, Some("stopped before start".into()))?;
        self.state.transition(DeliveryState::Stopped, None)?;
        Ok(DeliveryReport {
            stream: self.config.name.clone(),
            final_state: self.state.get(),
            metrics: self.metrics.snapshot(),
        })
    }

    /// Probe the sink, go `Active` and spawn the pipeline tasks.
    ///
    /// # Errors
    /// `SinkUnreachable` when the startup `list` fails; the stream is then
    /// `Failed` and nothing is spawned.
    #[instrument(name = "delivery_start", skip(self, producer), fields(stream = %self.config.name))]
    pub async fn start<P>(self, producer: P) -> Result<DeliveryHandle, DeliveryError>
    where
        P: Producer + 'static,
    {
        if let Err(source) = self.sink.list(&self.config.prefix).await {
            self.state.fail(format!("sink unreachable: {source}"));
            return Err(DeliveryError::SinkUnreachable {
                sink: self.sink.name().to_string(),
                source,
            });
        }
        self.state.transition(DeliveryState::Active, None)?;

        let (stop_tx, stop_rx) = watch::channel(false);
        let stream = self.config.name.clone();
        let state = Arc::clone(&self.state);
        let status = self.status.clone();
        let metrics = Arc::clone(&self.metrics);
        let join = tokio::spawn(self.run(producer, stop_rx));

        info!(stream = %stream, "delivery stream started");
        Ok(DeliveryHandle {
            stream,
            stop_tx,
            state,
            status,
            metrics,
            join,
        })
    }

    async fn run<P: Producer>(
        self,
        producer: P,
        stop_rx: watch::Receiver<bool>,
    ) -> Result<DeliveryReport, DeliveryError> {
        let capacity = self.config.queue_capacity.max(1);
        let (batch_tx, batch_rx) = mpsc::channel::<Batch>(capacity);
        let (write_tx, write_rx) = async_channel::bounded::<WriteRequest>(capacity);

        let writer = PartitionedWriter::new(
            Arc::clone(&self.sink),
            Arc::clone(&self.namer),
            self.config.prefix.clone(),
            self.config.writer_retry_policy(),
            Arc::clone(&self.metrics),
        );
        let workers: Vec<JoinHandle<Result<(), DeliveryError>>> = (0..self.config.writer_concurrency.max(1))
            .map(|worker| {
                tokio::spawn(write_loop(
                    worker,
                    writer.clone(),
                    write_rx.clone(),
                    Arc::clone(&self.state),
                    self.status.clone(),
                ))
            })
            .collect();
        drop(write_rx);

        let processor = BatchProcessor {
            stream: self.config.name.clone(),
            stage: TransformStage::new(
                self.config.name.clone(),
                Arc::clone(&self.transform),
                self.config.transform_retries,
                self.config.transform_timeout(),
            ),
            converter: (self.config.output_format == OutputFormat::Columnar).then(|| {
                FormatConverter::new(&self.config.schema, self.config.conversion_error_policy)
            }),
            raw_backup: self.config.raw_backup_enabled,
            status: self.status.clone(),
            metrics: Arc::clone(&self.metrics),
        };
        let transform_task = tokio::spawn(processor.run(batch_rx, write_tx.clone()));

        let ingest = IngestLoop {
            stream: self.config.name.clone(),
            buffer: Buffer::new(
                self.config.name.clone(),
                self.config.buffer_size_bytes,
                self.config.buffer_interval(),
            ),
            poll_max_records: self.poll_max_records,
            state: Arc::clone(&self.state),
            status: self.status.clone(),
            metrics: Arc::clone(&self.metrics),
        };
        let mut first_error = ingest.run(producer, stop_rx, batch_tx, write_tx).await.err();

        let mut tasks = vec![("transform", transform_task)];
        tasks.extend(workers.into_iter().map(|w| ("writer", w)));
        for (stage, task) in tasks {
            let result = match task.await {
                Ok(result) => result,
                Err(e) => Err(DeliveryError::TaskAborted {
                    stream: format!("{}/{stage}", self.config.name),
                    message: e.to_string(),
                }),
            };
            if let Err(e) = result {
                keep_root_cause(&mut first_error, e);
            }
        }

        if let Some(e) = first_error {
            self.state.fail(e.to_string());
            return Err(e);
        }
        self.state.transition(DeliveryState::Stopped, None)?;
        info!(stream = %self.config.name, "delivery stream stopped");
        Ok(DeliveryReport {
            stream: self.config.name.clone(),
            final_state: self.state.get(),
            metrics: self.metrics.snapshot(),
        })
    }
}

/// `StageClosed` is a symptom; prefer any other error as the reported cause.
fn keep_root_cause(slot: &mut Option<DeliveryError>, error: DeliveryError) {
    match slot {
        None => *slot = Some(error),
        Some(DeliveryError::StageClosed { .. }) if !matches!(error, DeliveryError::StageClosed { .. }) => {
            *slot = Some(error)
        }
        Some(_) => {}
    }
}

async fn expiry(deadline: Option<Instant>) {
    match deadline {
        Some(at) => sleep_until(at).await,
        None => std::future::pending().await,
    }
}

struct IngestLoop {
    stream: StreamId,
    buffer: Buffer,
    poll_max_records: usize,
    state: Arc<StateCell>,
    status: broadcast::Sender<StatusEvent>,
    metrics: Arc<WriterMetrics>,
}

impl IngestLoop {
    #[instrument(name = "delivery_ingest", skip_all, fields(stream = %self.stream))]
    async fn run<P: Producer>(
        mut self,
        mut producer: P,
        stop_rx: watch::Receiver<bool>,
        batch_tx: mpsc::Sender<Batch>,
        write_tx: async_channel::Sender<WriteRequest>,
    ) -> Result<(), DeliveryError> {
        let reason = loop {
            if *stop_rx.borrow() {
                break "stop requested";
            }
            if self.state.get() == DeliveryState::Failed {
                debug!(stream = %self.stream, "stream failed, ingest exiting");
                return Ok(());
            }

            // The interval trigger must not wait for a slow poll.
            let deadline = self.buffer.next_deadline();
            let polled = tokio::select! {
                polled = producer.poll(self.poll_max_records) => Some(polled),
                _ = expiry(deadline) => None,
            };

            match polled {
                Some(Ok(Some(records))) => {
                    if !records.is_empty() {
                        self.accept(records, &batch_tx, &write_tx).await?;
                    }
                }
                Some(Ok(None)) => break "end of stream",
                Some(Err(e)) => {
                    warn!(stream = %self.stream, producer = producer.name(), error = %e, "poll failed");
                    sleep(PRODUCER_ERROR_PAUSE).await;
                }
                None => {}
            }

            for batch in self.buffer.flush_expired(Instant::now()) {
                self.dispatch(batch, &batch_tx).await?;
            }
        };

        if self
            .state
            .transition(DeliveryState::Draining, Some(reason.to_string()))
            .is_err()
        {
            // Already failed by a downstream stage.
            return Ok(());
        }
        let pending = self.buffer.pending_records();
        for batch in self.buffer.flush_all() {
            self.dispatch(batch, &batch_tx).await?;
        }
        debug!(stream = %self.stream, pending, "open batches drained");
        Ok(())
    }

    async fn accept(
        &mut self,
        records: Vec<contracts::Record>,
        batch_tx: &mpsc::Sender<Batch>,
        write_tx: &async_channel::Sender<WriteRequest>,
    ) -> Result<(), DeliveryError> {
        self.metrics.add_ingested(records.len());
        observability::record_records_ingested(&self.stream, records.len());

        let mut oversized = Vec::new();
        for record in records {
            if record.size_bytes() > self.buffer.max_bytes() {
                let error = contracts::ContractError::CapacityExceeded {
                    record_bytes: record.size_bytes(),
                    max_bytes: self.buffer.max_bytes(),
                };
                warn!(stream = %self.stream, sequence = %record.sequence, error = %error, "record too large for buffer");
                oversized.push(RejectedRecord::new(
                    record,
                    ErrorOutputType::ProcessingFailed,
                    error.code(),
                    error.to_string(),
                    0,
                ));
                continue;
            }
            if let Some(batch) = self.buffer.append(record, BatchKind::Raw)? {
                self.dispatch(batch, batch_tx).await?;
            }
        }

        if !oversized.is_empty() {
            self.metrics.add_rejected(oversized.len());
            let _ = self.status.send(StatusEvent::RecordsRejected {
                stream: self.stream.clone(),
                error_type: ErrorOutputType::ProcessingFailed,
                count: oversized.len(),
            });
            let body = encode_rejected(&oversized)?;
            let request = WriteRequest::for_rejected(
                self.stream.clone(),
                Utc::now(),
                ErrorOutputType::ProcessingFailed,
                &oversized,
                body,
            );
            write_tx
                .send(request)
                .await
                .map_err(|_| DeliveryError::stage_closed("writer"))?;
        }
        Ok(())
    }

    /// Hand a closed batch to the transform task, waiting for queue space.
    async fn dispatch(&self, batch: Batch, batch_tx: &mpsc::Sender<Batch>) -> Result<(), DeliveryError> {
        self.metrics.inc_batches_flushed();
        observability::record_batch_flushed(&self.stream, batch.trigger, batch.len(), batch.size_bytes);
        let _ = self.status.send(StatusEvent::BatchFlushed {
            stream: self.stream.clone(),
            records: batch.len(),
            bytes: batch.size_bytes,
            trigger: batch.trigger,
        });
        batch_tx
            .send(batch)
            .await
            .map_err(|_| DeliveryError::stage_closed("transform"))
    }
}

struct BatchProcessor<T> {
    stream: StreamId,
    stage: TransformStage<T>,
    converter: Option<FormatConverter>,
    raw_backup: bool,
    status: broadcast::Sender<StatusEvent>,
    metrics: Arc<WriterMetrics>,
}

impl<T: TransformFunction + Sync> BatchProcessor<T> {
    async fn run(
        self,
        mut batch_rx: mpsc::Receiver<Batch>,
        write_tx: async_channel::Sender<WriteRequest>,
    ) -> Result<(), DeliveryError> {
        while let Some(batch) = batch_rx.recv().await {
            for request in self.process(batch).await? {
                write_tx
                    .send(request)
                    .await
                    .map_err(|_| DeliveryError::stage_closed("writer"))?;
            }
        }
        debug!(stream = %self.stream, "transform task finished");
        Ok(())
    }

    /// Transform one batch and encode every resulting object.
    async fn process(&self, batch: Batch) -> Result<Vec<WriteRequest>, DeliveryError> {
        let outcome = self.stage.process(batch, self.raw_backup).await;
        let mut accepted = outcome.accepted();
        let mut requests = Vec::with_capacity(4);

        if let Some(raw) = &outcome.raw {
            requests.push(WriteRequest::for_batch(raw, encode_rows(&raw.records)));
        }

        let processed = outcome.processed;
        if !processed.is_empty() {
            match &self.converter {
                None => requests.push(WriteRequest::for_batch(&processed, encode_rows(&processed.records))),
                Some(converter) => {
                    let conversion = converter.convert(&processed)?;
                    if let Some(block) = &conversion.block {
                        let mut request = WriteRequest::for_batch(&processed, encode_parquet(block)?);
                        request.records = block.num_rows();
                        requests.push(request);
                    }
                    if !conversion.rejected.is_empty() {
                        accepted -= conversion.rejected.len();
                        self.reject(
                            &processed,
                            ErrorOutputType::FormatConversionFailed,
                            &conversion.rejected,
                            &mut requests,
                        )?;
                    }
                }
            }
        }

        if !outcome.rejected.is_empty() {
            self.reject(
                &processed,
                ErrorOutputType::ProcessingFailed,
                &outcome.rejected,
                &mut requests,
            )?;
        }
        self.metrics.add_accepted(accepted);
        Ok(requests)
    }

    fn reject(
        &self,
        batch: &Batch,
        error_type: ErrorOutputType,
        rejected: &[RejectedRecord],
        requests: &mut Vec<WriteRequest>,
    ) -> Result<(), DeliveryError> {
        self.metrics.add_rejected(rejected.len());
        let _ = self.status.send(StatusEvent::RecordsRejected {
            stream: self.stream.clone(),
            error_type,
            count: rejected.len(),
        });
        requests.push(WriteRequest::for_rejected(
            self.stream.clone(),
            batch.created_at,
            error_type,
            rejected,
            encode_rejected(rejected)?,
        ));
        Ok(())
    }
}

#[instrument(name = "delivery_writer", skip_all, fields(worker = worker))]
async fn write_loop<S: ObjectSink + Sync>(
    worker: usize,
    writer: PartitionedWriter<S>,
    write_rx: async_channel::Receiver<WriteRequest>,
    state: Arc<StateCell>,
    status: broadcast::Sender<StatusEvent>,
) -> Result<(), DeliveryError> {
    while let Ok(request) = write_rx.recv().await {
        let stream = request.stream.clone();
        match writer.write(request).await {
            Ok(receipt) => {
                if let Some(original) = &receipt.redirected_from {
                    let _ = status.send(StatusEvent::DeliveryFailure {
                        stream: stream.clone(),
                        path: original.clone(),
                        redirected_to: Some(receipt.path.clone()),
                        message: receipt.failure.clone().unwrap_or_default(),
                    });
                }
                let _ = status.send(StatusEvent::BatchCommitted {
                    stream,
                    kind: receipt.kind,
                    error_type: receipt.error_type,
                    path: receipt.path,
                    records: receipt.records,
                    bytes: receipt.bytes,
                    attempts: receipt.attempts,
                });
            }
            Err(e) => {
                if let DeliveryError::RedirectFailed { path, source } = &e {
                    let _ = status.send(StatusEvent::DeliveryFailure {
                        stream,
                        path: path.clone(),
                        redirected_to: None,
                        message: source.to_string(),
                    });
                }
                state.fail(e.to_string());
                return Err(e);
            }
        }
    }
    debug!(worker, "writer worker finished");
    Ok(())
}

/// Handle to a running delivery stream.
pub struct DeliveryHandle {
    stream: StreamId,
    stop_tx: watch::Sender<bool>,
    state: Arc<StateCell>,
    status: broadcast::Sender<StatusEvent>,
    metrics: Arc<WriterMetrics>,
    join: JoinHandle<Result<DeliveryReport, DeliveryError>>,
}

impl DeliveryHandle {
    pub fn name(&self) -> &StreamId {
        &self.stream
    }

    pub fn state(&self) -> DeliveryState {
        self.state.get()
    }

    pub fn watch_state(&self) -> watch::Receiver<DeliveryState> {
        self.state.watch()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StatusEvent> {
        self.status.subscribe()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Ask the ingest task to stop; it drains at its next poll boundary.
    pub fn request_stop(&self) {
        self.stop_tx.send_replace(true);
    }

    /// Request stop and wait for the drain to complete.
    pub async fn stop(self) -> Result<DeliveryReport, DeliveryError> {
        self.request_stop();
        self.wait().await
    }

    /// Wait for the stream to finish on its own (end of stream or failure).
    pub async fn wait(self) -> Result<DeliveryReport, DeliveryError> {
        match self.join.await {
            Ok(result) => result,
            Err(e) => {
                self.state.fail(format!("delivery task aborted: {e}"));
                Err(DeliveryError::TaskAborted {
                    stream: self.stream.to_string(),
                    message: e.to_string(),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sinks::MemorySink;
    use crate::transforms::{FnTransform, IdentityTransform};
    use bytes::Bytes;
    use contracts::{ColumnSpec, ColumnType, SinkError, TransformError};
    use ingestion::MockProducer;

    fn config(name: &str) -> StreamConfig {
        let mut config = StreamConfig::new(name);
        config.prefix = "out".into();
        config.buffer_size_bytes = 64;
        config.writer_backoff_base_ms = 1;
        config.writer_backoff_max_ms = 2;
        config
    }

    fn stream<T: TransformFunction + Sync + 'static>(
        config: StreamConfig,
        transform: T,
        sink: Arc<MemorySink>,
    ) -> DeliveryStream<T, MemorySink> {
        DeliveryStream::new(config, Arc::new(transform), sink, Arc::new(ObjectNamer::new()))
    }

    fn lines(sink: &MemorySink, prefix: &str) -> usize {
        sink.paths()
            .iter()
            .filter(|p| p.starts_with(prefix))
            .filter_map(|p| sink.get(p))
            .map(|body| body.iter().filter(|b| **b == b'\n').count())
            .sum()
    }

    #[tokio::test]
    async fn test_end_of_stream_drains_and_stops() {
        let sink = Arc::new(MemorySink::new("mem"));
        let payloads: Vec<String> = (0..50).map(|i| format!("{{\"n\":{i}}}")).collect();
        let producer = MockProducer::from_payloads("p", payloads).with_chunk_size(7);

        let delivery = stream(config("web"), IdentityTransform, sink.clone());
        let handle = delivery.start(producer).await.unwrap();
        let report = handle.wait().await.unwrap();

        assert_eq!(report.final_state, DeliveryState::Stopped);
        assert_eq!(report.metrics.records_ingested, 50);
        assert_eq!(report.metrics.records_accepted, 50);
        assert_eq!(lines(&sink, "out/processed/"), 50);
        assert!(sink.paths().iter().all(|p| p.contains("/web-")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_interval_flush_while_producer_idle() {
        let sink = Arc::new(MemorySink::new("mem"));
        let mut cfg = config("web");
        cfg.buffer_size_bytes = 1 << 20;
        cfg.buffer_interval_seconds = 1;

        let source = ingestion::SharedStream::new("src", 100);
        let cursor = source.cursor("web", ingestion::CursorMode::Durable, Duration::from_secs(30));
        let handle = stream(cfg, IdentityTransform, sink.clone())
            .start(cursor)
            .await
            .unwrap();
        source.append("only").await.unwrap();

        sleep(Duration::from_secs(5)).await;
        assert_eq!(handle.metrics().batches_flushed, 1);
        assert_eq!(handle.metrics().objects_committed, 1);
        assert_eq!(lines(&sink, "out/processed/"), 1);

        source.close();
        let report = handle.wait().await.unwrap();
        assert_eq!(report.metrics.batches_flushed, 1);
    }

    #[tokio::test]
    async fn test_state_sequence_published() {
        let sink = Arc::new(MemorySink::new("mem"));
        let delivery = stream(config("web"), IdentityTransform, sink);
        let mut events = delivery.subscribe();
        let handle = delivery
            .start(MockProducer::from_payloads("p", ["a", "b"]))
            .await
            .unwrap();
        handle.wait().await.unwrap();

        let mut states = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let StatusEvent::StateChanged { to, .. } = event {
                states.push(to);
            }
        }
        assert_eq!(
            states,
            vec![DeliveryState::Active, DeliveryState::Draining, DeliveryState::Stopped]
        );
    }

    #[tokio::test]
    async fn test_unreachable_sink_fails_at_start() {
        let sink = Arc::new(MemorySink::new("mem"));
        sink.set_unreachable(Some(SinkError::transient("mem", "connection refused")));
        let delivery = stream(config("web"), IdentityTransform, sink);
        let watch = delivery.watch_state();
        let err = delivery
            .start(MockProducer::from_payloads("p", ["a"]))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, DeliveryError::SinkUnreachable { .. }));
        assert_eq!(*watch.borrow(), DeliveryState::Failed);
    }

    #[tokio::test]
    async fn test_rejected_records_land_in_failed_output() {
        let sink = Arc::new(MemorySink::new("mem"));
        let reject_b = FnTransform::new("no-b", |b: Bytes| {
            if b.as_ref() == b"b" {
                Err(TransformError::permanent("no b"))
            } else {
                Ok(b)
            }
        });
        let handle = stream(config("web"), reject_b, sink.clone())
            .start(MockProducer::from_payloads("p", ["a", "b", "c"]))
            .await
            .unwrap();
        let report = handle.wait().await.unwrap();

        assert_eq!(report.metrics.records_accepted, 2);
        assert_eq!(report.metrics.records_rejected, 1);
        assert_eq!(lines(&sink, "out/processed/"), 2);
        assert_eq!(lines(&sink, "out/failed/processing-failed/"), 1);
    }

    #[tokio::test]
    async fn test_raw_backup_and_columnar_output() {
        let sink = Arc::new(MemorySink::new("mem"));
        let mut cfg = config("web");
        cfg.raw_backup_enabled = true;
        cfg.output_format = OutputFormat::Columnar;
        cfg.schema = vec![ColumnSpec::new("n", ColumnType::Int64, false)];

        let handle = stream(cfg, IdentityTransform, sink.clone())
            .start(MockProducer::from_payloads("p", [r#"{"n":1}"#, r#"{"n":"x"}"#]))
            .await
            .unwrap();
        handle.wait().await.unwrap();

        assert_eq!(lines(&sink, "out/raw/"), 2);
        assert_eq!(lines(&sink, "out/failed/format-conversion-failed/"), 1);
        let parquet: Vec<String> = sink
            .paths()
            .into_iter()
            .filter(|p| p.starts_with("out/processed/"))
            .collect();
        assert_eq!(parquet.len(), 1);
        assert_eq!(&sink.get(&parquet[0]).unwrap()[..4], b"PAR1");
    }

    #[tokio::test]
    async fn test_oversized_record_routed_to_failed() {
        let sink = Arc::new(MemorySink::new("mem"));
        let big = "x".repeat(100);
        let handle = stream(config("web"), IdentityTransform, sink.clone())
            .start(MockProducer::from_payloads("p", [big, "ok".to_string()]))
            .await
            .unwrap();
        let report = handle.wait().await.unwrap();
        assert_eq!(report.metrics.records_rejected, 1);
        assert_eq!(lines(&sink, "out/failed/processing-failed/"), 1);
        assert_eq!(lines(&sink, "out/processed/"), 1);
    }

    #[tokio::test]
    async fn test_redirect_failure_moves_stream_to_failed() {
        let sink = Arc::new(MemorySink::new("mem"));
        for _ in 0..2 {
            sink.inject_put_failure(SinkError::permanent("mem", "denied"));
        }
        let delivery = stream(config("web"), IdentityTransform, sink);
        let watch = delivery.watch_state();
        let handle = delivery
            .start(MockProducer::from_payloads("p", ["a"]))
            .await
            .unwrap();
        let err = handle.wait().await.unwrap_err();
        assert!(matches!(err, DeliveryError::RedirectFailed { .. }));
        assert_eq!(*watch.borrow(), DeliveryState::Failed);
    }

    #[test]
    fn test_cancel_before_start() {
        let sink = Arc::new(MemorySink::new("mem"));
        let report = stream(config("web"), IdentityTransform, sink).cancel().unwrap();
        assert_eq!(report.final_state, DeliveryState::Stopped);
    }
}
