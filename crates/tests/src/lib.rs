//! # Integration Tests
//!
//! 集成测试与端到端测试。
//!
//! 负责：
//! - 合约快照测试
//! - 共享流 → 投递流 → 内存 sink 的端到端测试
//! - 告警分发与投递互不影响

#[cfg(test)]
mod contract_tests {
    use chrono::{TimeZone, Utc};
    use contracts::{BatchKind, ErrorOutputType, PartitionKey};

    #[test]
    fn test_contracts_compile() {
        let _ = contracts::ConfigVersion::V1;
    }

    #[test]
    fn test_partition_key_is_deterministic() {
        let at = Utc.with_ymd_and_hms(2024, 3, 9, 7, 59, 59).unwrap();
        for kind in [BatchKind::Raw, BatchKind::Processed, BatchKind::Failed] {
            assert_eq!(PartitionKey::new(kind, at), PartitionKey::new(kind, at));
        }
        assert_eq!(
            PartitionKey::new(BatchKind::Processed, at).directory("logs"),
            "logs/processed/year=2024/month=03/day=09/hour=07/"
        );
        assert_eq!(
            PartitionKey::failed(ErrorOutputType::DeliveryFailed, at).directory("/logs/"),
            "logs/failed/delivery-failed/year=2024/month=03/day=09/hour=07/"
        );
    }

    #[test]
    fn test_blueprint_from_toml() {
        let blueprint = config_loader::ConfigLoader::load_from_str(
            r#"
[source]
name = "web"
retentionRecords = 2000

[sink]
sinkType = "memory"

[[streams]]
name = "requests"
prefix = "logs"
outputFormat = "columnar"
schema = [
    { name = "id", type = "int64", nullable = false },
    { name = "path", type = "string" },
]

[streams.transform]
kind = "json"
stampField = "deliveredAt"

[alerts]
alertRetries = 3

[[alerts.notifiers]]
name = "ops"
notifierType = "udp"
params = { addr = "127.0.0.1:9999" }
"#,
            config_loader::ConfigFormat::Toml,
        )
        .unwrap();

        assert_eq!(blueprint.source.retention_records, 2000);
        let stream = &blueprint.streams[0];
        assert_eq!(stream.schema.len(), 2);
        assert_eq!(
            stream.transform,
            contracts::TransformConfig::Json {
                stamp_field: Some("deliveredAt".into())
            }
        );
        assert_eq!(blueprint.alerts.unwrap().notifiers[0].name, "ops");
    }
}

#[cfg(test)]
mod e2e_tests {
    use std::sync::Arc;
    use std::time::Duration;

    use alerting::{AlertFanOut, AlertPredicate, NotifierHandle, RecordingNotifier};
    use base64::Engine as _;
    use bytes::Bytes;
    use contracts::{
        AlertPredicateConfig, ColumnSpec, ColumnType, DeliveryState, OutputFormat, RetryPolicy,
        StatusEvent, StreamConfig, TransformError,
    };
    use delivery::{
        DeliveryHandle, DeliveryStream, FnTransform, IdentityTransform, MemorySink, ObjectNamer,
    };
    use ingestion::{CursorMode, SharedStream, StreamCursor};
    use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
    use tokio::sync::watch;

    const POLL_TIMEOUT: Duration = Duration::from_millis(20);

    fn stream_config(name: &str) -> StreamConfig {
        let mut config = StreamConfig::new(name);
        config.prefix = "out".into();
        config.buffer_size_bytes = 4096;
        config.writer_backoff_base_ms = 1;
        config.writer_backoff_max_ms = 4;
        config
    }

    fn cursor(source: &SharedStream, name: &str) -> StreamCursor {
        source.cursor(name, CursorMode::Durable, POLL_TIMEOUT)
    }

    async fn append_all<I>(source: &SharedStream, payloads: I)
    where
        I: IntoIterator<Item = String>,
    {
        for payload in payloads {
            source.append(payload).await.unwrap();
        }
    }

    async fn start_identity(
        config: StreamConfig,
        sink: &Arc<MemorySink>,
        namer: &Arc<ObjectNamer>,
        producer: StreamCursor,
    ) -> DeliveryHandle {
        DeliveryStream::new(
            config,
            Arc::new(IdentityTransform),
            Arc::clone(sink),
            Arc::clone(namer),
        )
        .start(producer)
        .await
        .unwrap()
    }

    /// Every newline-delimited line stored under `prefix`, in path order.
    fn lines_under(sink: &MemorySink, prefix: &str) -> Vec<String> {
        sink.paths()
            .iter()
            .filter(|p| p.starts_with(prefix))
            .filter_map(|p| sink.get(p))
            .flat_map(|body| {
                String::from_utf8_lossy(&body)
                    .lines()
                    .map(str::to_string)
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    fn paths_under(sink: &MemorySink, prefix: &str) -> Vec<String> {
        sink.paths()
            .into_iter()
            .filter(|p| p.starts_with(prefix))
            .collect()
    }

    #[tokio::test]
    async fn test_malformed_integers_split_processed_and_failed() {
        let source = SharedStream::new("src", 10_000);
        let producer = cursor(&source, "orders");
        let payloads: Vec<String> = (0..1000)
            .map(|i| {
                if i % 10 == 0 {
                    serde_json::json!({"id": i, "count": "many"}).to_string()
                } else {
                    serde_json::json!({"id": i, "count": i * 2}).to_string()
                }
            })
            .collect();
        append_all(&source, payloads).await;
        source.close();

        let mut config = stream_config("orders");
        config.output_format = OutputFormat::Columnar;
        config.schema = vec![
            ColumnSpec::new("id", ColumnType::Int64, false),
            ColumnSpec::new("count", ColumnType::Int64, true),
        ];
        let sink = Arc::new(MemorySink::new("mem"));
        let handle = start_identity(config, &sink, &Arc::new(ObjectNamer::new()), producer).await;
        let report = handle.wait().await.unwrap();

        assert_eq!(report.final_state, DeliveryState::Stopped);
        assert_eq!(report.metrics.records_ingested, 1000);
        assert_eq!(report.metrics.records_accepted, 900);
        assert_eq!(report.metrics.records_rejected, 100);

        let processed_rows: i64 = paths_under(&sink, "out/processed/")
            .iter()
            .map(|path| {
                let body = sink.get(path).unwrap();
                ParquetRecordBatchReaderBuilder::try_new(body)
                    .unwrap()
                    .metadata()
                    .file_metadata()
                    .num_rows()
            })
            .sum();
        assert_eq!(processed_rows, 900);

        let failed = lines_under(&sink, "out/failed/format-conversion-failed/");
        assert_eq!(failed.len(), 100);
        let envelope: serde_json::Value = serde_json::from_str(&failed[0]).unwrap();
        assert_eq!(envelope["errorOutputType"], "format-conversion-failed");
        assert_eq!(envelope["errorCode"], "SchemaMismatch");
        assert_eq!(envelope["attemptsMade"], 1);
        let raw = base64::engine::general_purpose::STANDARD
            .decode(envelope["rawData"].as_str().unwrap())
            .unwrap();
        assert!(String::from_utf8(raw).unwrap().contains("many"));
    }

    #[tokio::test]
    async fn test_put_fails_twice_then_one_object() {
        let source = SharedStream::new("src", 100);
        let producer = cursor(&source, "web");
        append_all(&source, (0..20).map(|i| format!("{{\"n\":{i}}}"))).await;
        source.close();

        let sink = Arc::new(MemorySink::new("mem"));
        sink.fail_next_puts(2);
        let delivery = DeliveryStream::new(
            stream_config("web"),
            Arc::new(IdentityTransform),
            Arc::clone(&sink),
            Arc::new(ObjectNamer::new()),
        );
        let mut events = delivery.subscribe();
        let report = delivery.start(producer).await.unwrap().wait().await.unwrap();

        assert_eq!(report.metrics.objects_committed, 1);
        assert_eq!(report.metrics.sink_retries, 2);
        assert_eq!(paths_under(&sink, "out/processed/").len(), 1);
        assert_eq!(lines_under(&sink, "out/processed/").len(), 20);
        assert!(paths_under(&sink, "out/failed/").is_empty());

        let mut committed_attempts = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let StatusEvent::BatchCommitted { attempts, .. } = event {
                committed_attempts.push(attempts);
            }
        }
        assert_eq!(committed_attempts, vec![3]);
    }

    #[tokio::test]
    async fn test_exhausted_retries_redirect_to_delivery_failed() {
        let source = SharedStream::new("src", 100);
        let producer = cursor(&source, "web");
        append_all(&source, ["a".to_string(), "b".to_string()]).await;
        source.close();

        let mut config = stream_config("web");
        config.writer_retries = 1;
        let sink = Arc::new(MemorySink::new("mem"));
        sink.fail_next_puts(2);
        let report = start_identity(config, &sink, &Arc::new(ObjectNamer::new()), producer)
            .await
            .wait()
            .await
            .unwrap();

        assert_eq!(report.final_state, DeliveryState::Stopped);
        assert_eq!(report.metrics.delivery_failures, 1);
        assert!(paths_under(&sink, "out/processed/").is_empty());
        assert_eq!(lines_under(&sink, "out/failed/delivery-failed/"), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_alert_reaches_notifier_once_and_failures_do_not_affect_delivery() {
        let source = SharedStream::new("src", 1000);
        let delivery_cursor = cursor(&source, "web");
        let alert_cursor = source.cursor("alerts", CursorMode::Lossy, POLL_TIMEOUT);

        let ok = RecordingNotifier::new("ok");
        let broken = RecordingNotifier::new("broken").failing_first(u32::MAX);
        let retry = RetryPolicy::new(3, Duration::from_millis(1), Duration::from_millis(4));
        let fanout = AlertFanOut::with_handles(
            AlertPredicate::from_config(&AlertPredicateConfig::default()),
            vec![
                NotifierHandle::spawn(ok.clone(), 16, retry),
                NotifierHandle::spawn(broken.clone(), 16, retry),
            ],
            alert_cursor,
        );
        let (_stop_tx, stop_rx) = watch::channel(false);
        let alerts = fanout.spawn(stop_rx);

        let sink = Arc::new(MemorySink::new("mem"));
        let handle = start_identity(stream_config("web"), &sink, &Arc::new(ObjectNamer::new()), delivery_cursor).await;

        let statuses = [200, 404, 500, 200, 301];
        append_all(
            &source,
            statuses.iter().map(|s| format!("{{\"status\":{s}}}")),
        )
        .await;
        source.close();

        let report = handle.wait().await.unwrap();
        let alert_report = alerts.await.unwrap();

        assert_eq!(report.final_state, DeliveryState::Stopped);
        assert_eq!(report.metrics.records_accepted, 5);
        assert_eq!(lines_under(&sink, "out/processed/").len(), 5);

        assert_eq!(alert_report.alerts_matched, 1);
        let delivered = ok.delivered();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].value, "500");
        assert_eq!(delivered[0].attempts, 1);

        assert_eq!(broken.calls(), 3);
        assert!(broken.delivered().is_empty());
        let (_, broken_metrics) = alert_report
            .notifiers
            .iter()
            .find(|(name, _)| name == "broken")
            .unwrap();
        assert_eq!(broken_metrics.failure_count, 1);
        assert_eq!(broken_metrics.sent_count, 0);
    }

    #[tokio::test]
    async fn test_stop_mid_batch_drains_open_batch() {
        let source = SharedStream::new("src", 1000);
        let producer = cursor(&source, "web");

        let mut config = stream_config("web");
        config.buffer_size_bytes = 1 << 20;
        config.buffer_interval_seconds = 3600;
        let sink = Arc::new(MemorySink::new("mem"));
        let handle = start_identity(config, &sink, &Arc::new(ObjectNamer::new()), producer).await;

        let payloads: Vec<String> = (0..25).map(|i| format!("{{\"n\":{i}}}")).collect();
        append_all(&source, payloads.clone()).await;

        while handle.metrics().records_ingested < 25 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(sink.is_empty());
        assert_eq!(handle.state(), DeliveryState::Active);

        let report = handle.stop().await.unwrap();
        assert_eq!(report.final_state, DeliveryState::Stopped);
        assert_eq!(report.metrics.batches_flushed, 1);
        assert_eq!(lines_under(&sink, "out/processed/"), payloads);
    }

    #[tokio::test]
    async fn test_conservation_with_mixed_rejects() {
        let source = SharedStream::new("src", 1000);
        let producer = cursor(&source, "web");
        let mut payloads: Vec<String> = (0..60).map(|i| format!("{{\"n\":{i}}}")).collect();
        payloads.push("x".repeat(5000));
        append_all(&source, payloads).await;
        source.close();

        let reject_multiples_of_seven = FnTransform::new("sevens", |payload: Bytes| {
            let value: serde_json::Value = serde_json::from_slice(&payload)
                .map_err(|e| TransformError::permanent(e.to_string()))?;
            match value["n"].as_i64() {
                Some(n) if n % 7 == 0 => Err(TransformError::permanent("multiple of seven")),
                _ => Ok(payload),
            }
        });
        let mut config = stream_config("web");
        config.raw_backup_enabled = true;
        let sink = Arc::new(MemorySink::new("mem"));
        let report = DeliveryStream::new(
            config,
            Arc::new(reject_multiples_of_seven),
            Arc::clone(&sink),
            Arc::new(ObjectNamer::new()),
        )
        .start(producer)
        .await
        .unwrap()
        .wait()
        .await
        .unwrap();

        let m = report.metrics;
        assert_eq!(m.records_ingested, 61);
        assert_eq!(m.records_accepted + m.records_rejected, m.records_ingested);
        assert_eq!(m.records_rejected, 10);
        assert_eq!(lines_under(&sink, "out/processed/").len(), 51);
        assert_eq!(lines_under(&sink, "out/failed/processing-failed/").len(), 10);
        assert_eq!(lines_under(&sink, "out/raw/").len(), 60);
    }

    #[tokio::test]
    async fn test_redelivery_never_shares_a_path() {
        let source = SharedStream::new("src", 1000);
        let first = cursor(&source, "web");
        let second = cursor(&source, "web");
        append_all(&source, (0..40).map(|i| format!("{{\"n\":{i}}}"))).await;
        source.close();

        let sink = Arc::new(MemorySink::new("mem"));
        let namer = Arc::new(ObjectNamer::new());
        let a = start_identity(stream_config("web"), &sink, &namer, first).await;
        let b = start_identity(stream_config("web"), &sink, &namer, second).await;
        a.wait().await.unwrap();
        b.wait().await.unwrap();

        assert_eq!(sink.put_calls(), sink.len() as u64);
        assert_eq!(lines_under(&sink, "out/processed/").len(), 80);
    }
}
