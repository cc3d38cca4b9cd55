//! `info` command implementation.

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::info;

use contracts::{PipelineBlueprint, StreamConfig, TransformConfig};

use crate::cli::InfoArgs;

/// Configuration info for JSON output
#[derive(Serialize)]
struct ConfigInfo {
    version: String,
    source: SourceInfo,
    sink: SinkInfo,
    streams: Vec<StreamInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    alerts: Option<AlertInfo>,
}

#[derive(Serialize)]
struct SourceInfo {
    name: String,
    retention_records: usize,
    poll_max_records: usize,
    poll_timeout_ms: u64,
}

#[derive(Serialize)]
struct SinkInfo {
    name: String,
    sink_type: String,
    #[serde(skip_serializing_if = "std::collections::HashMap::is_empty")]
    params: std::collections::HashMap<String, String>,
}

#[derive(Serialize)]
struct StreamInfo {
    name: String,
    prefix: String,
    transform: String,
    output_format: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<StreamDetails>,
}

#[derive(Serialize)]
struct StreamDetails {
    buffer_size_bytes: usize,
    buffer_interval_seconds: u64,
    transform_retries: u32,
    transform_timeout_ms: u64,
    writer_retries: u32,
    writer_backoff_ms: (u64, u64),
    writer_concurrency: usize,
    queue_capacity: usize,
    raw_backup_enabled: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    schema: Vec<String>,
    conversion_error_policy: String,
}

#[derive(Serialize)]
struct AlertInfo {
    field: String,
    values: Vec<String>,
    retries: u32,
    backoff_ms: (u64, u64),
    queue_capacity: usize,
    notifiers: Vec<String>,
}

/// Execute the `info` command
pub fn run_info(args: &InfoArgs) -> Result<()> {
    info!(config = %args.config.display(), "Loading configuration info");

    if !args.config.exists() {
        anyhow::bail!("Configuration file not found: {}", args.config.display());
    }

    let blueprint = config_loader::ConfigLoader::load_from_path(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config.display()))?;

    let info = build_config_info(&blueprint, args);
    if args.json {
        let json =
            serde_json::to_string_pretty(&info).context("Failed to serialize config info")?;
        println!("{}", json);
    } else {
        print_config_info(&info);
    }

    Ok(())
}

fn describe_transform(transform: &TransformConfig) -> String {
    match transform {
        TransformConfig::Identity => "identity".to_string(),
        TransformConfig::Json { stamp_field: None } => "json".to_string(),
        TransformConfig::Json {
            stamp_field: Some(field),
        } => format!("json (stamp {field})"),
        TransformConfig::Command { program, args } if args.is_empty() => {
            format!("command `{program}`")
        }
        TransformConfig::Command { program, args } => {
            format!("command `{} {}`", program, args.join(" "))
        }
    }
}

fn stream_details(stream: &StreamConfig) -> StreamDetails {
    StreamDetails {
        buffer_size_bytes: stream.buffer_size_bytes,
        buffer_interval_seconds: stream.buffer_interval_seconds,
        transform_retries: stream.transform_retries,
        transform_timeout_ms: stream.transform_timeout_ms,
        writer_retries: stream.writer_retries,
        writer_backoff_ms: (stream.writer_backoff_base_ms, stream.writer_backoff_max_ms),
        writer_concurrency: stream.writer_concurrency,
        queue_capacity: stream.queue_capacity,
        raw_backup_enabled: stream.raw_backup_enabled,
        schema: stream
            .schema
            .iter()
            .map(|c| {
                format!(
                    "{}: {:?}{}",
                    c.name,
                    c.column_type,
                    if c.nullable { "?" } else { "" }
                )
            })
            .collect(),
        conversion_error_policy: format!("{:?}", stream.conversion_error_policy),
    }
}

fn build_config_info(blueprint: &PipelineBlueprint, args: &InfoArgs) -> ConfigInfo {
    ConfigInfo {
        version: format!("{:?}", blueprint.version),
        source: SourceInfo {
            name: blueprint.source.name.clone(),
            retention_records: blueprint.source.retention_records,
            poll_max_records: blueprint.source.poll_max_records,
            poll_timeout_ms: blueprint.source.poll_timeout_ms,
        },
        sink: SinkInfo {
            name: blueprint.sink.name.clone(),
            sink_type: format!("{:?}", blueprint.sink.sink_type),
            params: blueprint.sink.params.clone(),
        },
        streams: blueprint
            .streams
            .iter()
            .map(|s| StreamInfo {
                name: s.name.to_string(),
                prefix: s.prefix.clone(),
                transform: describe_transform(&s.transform),
                output_format: format!("{:?}", s.output_format),
                details: args.streams.then(|| stream_details(s)),
            })
            .collect(),
        alerts: blueprint
            .alerts
            .as_ref()
            .filter(|_| args.alerts || args.json)
            .map(|a| AlertInfo {
                field: a.alert_predicate.field.clone(),
                values: a.alert_predicate.values.iter().map(ToString::to_string).collect(),
                retries: a.alert_retries,
                backoff_ms: (a.alert_backoff_base_ms, a.alert_backoff_max_ms),
                queue_capacity: a.alert_queue_capacity,
                notifiers: a
                    .notifiers
                    .iter()
                    .map(|n| format!("{} ({:?})", n.name, n.notifier_type))
                    .collect(),
            }),
    }
}

fn print_config_info(info: &ConfigInfo) {
    println!("\n=== Courier Configuration ===\n");
    println!("Version: {}", info.version);
    println!(
        "Source: {} (retention {}, poll {} records / {}ms)",
        info.source.name,
        info.source.retention_records,
        info.source.poll_max_records,
        info.source.poll_timeout_ms
    );
    println!("Sink: {} ({})", info.sink.name, info.sink.sink_type);
    for (key, value) in &info.sink.params {
        println!("  {key} = {value}");
    }

    println!("\nStreams ({}):", info.streams.len());
    for stream in &info.streams {
        println!(
            "  - {} -> {}/ [{}; {}]",
            stream.name, stream.prefix, stream.transform, stream.output_format
        );
        if let Some(d) = &stream.details {
            println!(
                "      buffer: {} bytes / {}s, queue {}",
                d.buffer_size_bytes, d.buffer_interval_seconds, d.queue_capacity
            );
            println!(
                "      transform: {} retries, {}ms timeout",
                d.transform_retries, d.transform_timeout_ms
            );
            println!(
                "      writer: {} retries, backoff {}..{}ms, {} worker(s)",
                d.writer_retries, d.writer_backoff_ms.0, d.writer_backoff_ms.1, d.writer_concurrency
            );
            if d.raw_backup_enabled {
                println!("      raw backup: enabled");
            }
            if !d.schema.is_empty() {
                println!("      schema: {} ({})", d.schema.join(", "), d.conversion_error_policy);
            }
        }
    }

    if let Some(alerts) = &info.alerts {
        println!("\nAlerts:");
        println!("  {} in [{}]", alerts.field, alerts.values.join(", "));
        println!(
            "  {} attempts, backoff {}..{}ms, queue {}",
            alerts.retries, alerts.backoff_ms.0, alerts.backoff_ms.1, alerts.queue_capacity
        );
        for notifier in &alerts.notifiers {
            println!("  - {notifier}");
        }
    }

    println!();
}
