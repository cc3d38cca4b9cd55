//! Pipeline orchestrator - wires the shared stream, delivery streams and alert fan-out.

use std::future::Future;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use alerting::{AlertFanOutBuilder, AlertReport};
use anyhow::{Context, Result};
use contracts::{DeliveryState, ObjectSink, PipelineBlueprint};
use delivery::{ConfiguredSink, ConfiguredTransform, DeliveryHandle, DeliveryStream, ObjectNamer};
use ingestion::{synthetic_payloads, CursorMode, FilePump, SharedStream};
use observability::DeliveryMetricsAggregator;
use parking_lot::Mutex;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::PipelineStats;

/// Where records come from
#[derive(Debug, Clone)]
pub enum InputSource {
    /// Newline-delimited file, `-` for stdin
    File(PathBuf),
    /// Deterministic request-log records
    Synthetic { count: usize, seed: u64 },
}

/// Pipeline configuration
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// The loaded and validated blueprint
    pub blueprint: PipelineBlueprint,

    pub input: InputSource,

    /// Stop and drain after this long (None = until input ends)
    pub timeout: Option<Duration>,

    /// Metrics server port (None = disabled)
    pub metrics_port: Option<u16>,
}

/// Main pipeline orchestrator
pub struct Pipeline {
    config: PipelineConfig,
}

impl Pipeline {
    /// Create a new pipeline with the given configuration
    pub fn new(config: PipelineConfig) -> Self {
        Self { config }
    }

    /// Run every stream until the input ends, the timeout passes, or
    /// `shutdown` resolves; then drain and collect the statistics.
    pub async fn run(self, shutdown: impl Future<Output = ()>) -> Result<PipelineStats> {
        let start_time = Instant::now();
        let blueprint = &self.config.blueprint;

        if let Some(port) = self.config.metrics_port {
            observability::install_prometheus(SocketAddr::from(([0, 0, 0, 0], port)))?;
            info!("Metrics endpoint available on port {}", port);
        }

        let sink = Arc::new(
            ConfiguredSink::from_config(&blueprint.sink)
                .with_context(|| format!("Failed to create sink '{}'", blueprint.sink.name))?,
        );
        let namer = Arc::new(resume_namer(&sink, blueprint).await);
        let source = SharedStream::new(&blueprint.source.name, blueprint.source.retention_records);
        let aggregator = Arc::new(Mutex::new(DeliveryMetricsAggregator::new()));

        let (alert_stop_tx, alert_stop_rx) = watch::channel(false);
        let alert_task = match &blueprint.alerts {
            Some(alert_config) => {
                let cursor = source.cursor("alerts", CursorMode::Lossy, blueprint.source.poll_timeout());
                let fanout = AlertFanOutBuilder::new(alert_config.clone(), cursor)
                    .build()
                    .await
                    .context("Failed to create alert notifiers")?
                    .with_poll_max_records(blueprint.source.poll_max_records);
                Some(fanout.spawn(alert_stop_rx))
            }
            None => None,
        };

        let mut stats = PipelineStats::default();
        let mut handles = Vec::with_capacity(blueprint.streams.len());
        let mut collectors = Vec::with_capacity(blueprint.streams.len());

        for stream_config in &blueprint.streams {
            let cursor = source.cursor(
                stream_config.name.as_str(),
                CursorMode::Durable,
                blueprint.source.poll_timeout(),
            );
            let transform = Arc::new(ConfiguredTransform::from_config(&stream_config.transform));
            let stream = DeliveryStream::new(
                stream_config.clone(),
                transform,
                Arc::clone(&sink),
                Arc::clone(&namer),
            )
            .with_poll_max_records(blueprint.source.poll_max_records);

            collectors.push(spawn_collector(stream.subscribe(), Arc::clone(&aggregator)));

            match stream.start(cursor).await {
                Ok(handle) => {
                    info!(stream = %handle.name(), "Delivery stream started");
                    handles.push(handle);
                }
                Err(e) => {
                    error!(stream = %stream_config.name, error = %e, "Delivery stream failed to start");
                    stats
                        .failed_streams
                        .push((stream_config.name.to_string(), e.to_string()));
                }
            }
        }

        if handles.is_empty() {
            source.close();
            anyhow::bail!("No delivery stream could be started");
        }

        let pump = spawn_input(&self.config.input, source.clone());

        info!(
            streams = handles.len(),
            alerts = alert_task.is_some(),
            "Pipeline running"
        );

        let interrupted = self.wait_for_end(&handles, shutdown).await;

        // No new records from here on; cursors drain what is retained.
        source.close();
        if interrupted {
            for handle in &handles {
                handle.request_stop();
            }
            alert_stop_tx.send_replace(true);
        }

        for handle in handles {
            let name = handle.name().to_string();
            match handle.wait().await {
                Ok(report) => {
                    stats.records_ingested += report.metrics.records_ingested;
                    stats.reports.push(report);
                }
                Err(e) => {
                    error!(stream = %name, error = %e, "Delivery stream failed");
                    stats.failed_streams.push((name, e.to_string()));
                }
            }
        }

        stats.alerts = join_alerts(alert_task).await;

        match pump.await {
            Ok(Ok(count)) => debug!(records = count, "input pump finished"),
            Ok(Err(e)) => debug!(error = %e, "input pump stopped"),
            Err(e) => warn!(error = %e, "input pump task failed"),
        }

        for collector in collectors {
            if let Err(e) = collector.await {
                warn!(error = %e, "status collector failed");
            }
        }

        let source_metrics = source.metrics().snapshot();
        stats.records_appended = source_metrics.records_appended;
        stats.records_skipped = source_metrics.records_skipped;
        stats.delivery = aggregator.lock().summary();
        stats.duration = start_time.elapsed();

        Ok(stats)
    }

    /// Returns true when stopped by the timeout or the shutdown signal.
    async fn wait_for_end(&self, handles: &[DeliveryHandle], shutdown: impl Future<Output = ()>) -> bool {
        let mut watches: Vec<_> = handles.iter().map(DeliveryHandle::watch_state).collect();
        let all_finished = async move {
            for watch in &mut watches {
                let _ = watch.wait_for(|state| state.is_terminal()).await;
            }
        };
        let timeout = self.config.timeout;
        let deadline = async move {
            match timeout {
                Some(after) => tokio::time::sleep(after).await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            _ = all_finished => {
                info!("All delivery streams finished");
                false
            }
            _ = deadline => {
                info!(timeout = ?self.config.timeout, "Timeout reached, draining");
                true
            }
            _ = shutdown => {
                warn!("Received shutdown signal, draining");
                true
            }
        }
    }
}

/// Object sequence numbers continue after whatever earlier runs committed.
async fn resume_namer(sink: &ConfiguredSink, blueprint: &PipelineBlueprint) -> ObjectNamer {
    let mut existing = Vec::new();
    for stream_config in &blueprint.streams {
        match sink.list(&stream_config.prefix).await {
            Ok(paths) => existing.extend(paths),
            // An unreachable sink fails the stream at start.
            Err(e) => debug!(stream = %stream_config.name, error = %e, "listing existing objects failed"),
        }
    }
    let namer = ObjectNamer::resume_after(existing.iter().map(String::as_str));
    debug!(existing = existing.len(), "object namer seeded");
    namer
}

/// Feed one stream's status events into the shared aggregator.
fn spawn_collector(
    mut rx: broadcast::Receiver<contracts::StatusEvent>,
    aggregator: Arc<Mutex<DeliveryMetricsAggregator>>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    if let contracts::StatusEvent::StateChanged {
                        stream,
                        to: DeliveryState::Failed,
                        reason,
                        ..
                    } = &event
                    {
                        warn!(stream = %stream, reason = reason.as_deref(), "stream entered Failed");
                    }
                    aggregator.lock().update(&event);
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "status collector lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

fn spawn_input(input: &InputSource, source: SharedStream) -> JoinHandle<ingestion::Result<u64>> {
    match input {
        InputSource::File(path) => {
            info!(path = %path.display(), "Reading input records");
            FilePump::new(path.clone(), source).spawn()
        }
        InputSource::Synthetic { count, seed } => {
            info!(count, seed, "Generating synthetic records");
            let payloads = synthetic_payloads(*count, *seed);
            tokio::spawn(async move {
                let mut appended = 0u64;
                for payload in payloads {
                    if let Err(e) = source.append(payload).await {
                        source.close();
                        return Err(e);
                    }
                    appended += 1;
                }
                source.close();
                Ok(appended)
            })
        }
    }
}

async fn join_alerts(task: Option<JoinHandle<AlertReport>>) -> Option<AlertReport> {
    match task?.await {
        Ok(report) => Some(report),
        Err(e) => {
            warn!(error = %e, "alert fan-out task failed");
            None
        }
    }
}
