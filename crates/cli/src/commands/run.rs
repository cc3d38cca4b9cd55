//! `run` command implementation.

use anyhow::{Context, Result};
use std::time::Duration;
use tracing::{info, warn};

use contracts::PipelineBlueprint;

use crate::cli::RunArgs;
use crate::pipeline::{InputSource, Pipeline, PipelineConfig};

/// Execute the `run` command
pub async fn run_pipeline(args: &RunArgs) -> Result<()> {
    info!(config = %args.config.display(), "Loading configuration");

    if !args.config.exists() {
        anyhow::bail!("Configuration file not found: {}", args.config.display());
    }

    let blueprint = config_loader::ConfigLoader::load_from_path(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config.display()))?;

    info!(
        source = %blueprint.source.name,
        sink = %blueprint.sink.name,
        streams = blueprint.streams.len(),
        alerts = blueprint.alerts.is_some(),
        "Configuration loaded"
    );

    if args.dry_run {
        info!("Dry run mode - configuration is valid, exiting");
        print_config_summary(&blueprint);
        return Ok(());
    }

    let input = match (&args.input, args.synthetic) {
        (Some(path), _) => InputSource::File(path.clone()),
        (None, Some(count)) => InputSource::Synthetic {
            count,
            seed: args.seed,
        },
        (None, None) => anyhow::bail!("No input: pass --input <file> (or -) or --synthetic <count>"),
    };

    let pipeline = Pipeline::new(PipelineConfig {
        blueprint,
        input,
        timeout: (args.timeout > 0).then(|| Duration::from_secs(args.timeout)),
        metrics_port: (args.metrics_port > 0).then_some(args.metrics_port),
    });

    info!("Starting pipeline...");

    let stats = pipeline
        .run(shutdown_signal())
        .await
        .context("Pipeline execution failed")?;

    info!(
        records_ingested = stats.records_ingested,
        objects_committed = stats.delivery.objects_committed,
        duration_secs = stats.duration.as_secs_f64(),
        throughput = format!("{:.1}", stats.throughput()),
        "Pipeline finished"
    );

    if args.json {
        println!("{}", stats.to_json().context("Failed to serialize run summary")?);
    } else {
        stats.print_summary();
    }

    if !stats.is_success() {
        anyhow::bail!("{} delivery stream(s) failed", stats.failed_streams.len());
    }
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM. If a handler cannot be installed, that
/// signal is never observed.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

/// Print configuration summary for dry-run mode
fn print_config_summary(blueprint: &PipelineBlueprint) {
    println!("\n=== Configuration Summary ===\n");
    println!("Source: {} (retention {} records)", blueprint.source.name, blueprint.source.retention_records);
    println!("Sink: {} ({:?})", blueprint.sink.name, blueprint.sink.sink_type);

    println!("\nStreams ({}):", blueprint.streams.len());
    for stream in &blueprint.streams {
        println!(
            "  - {} -> {}/ ({:?}, {} bytes / {}s)",
            stream.name,
            stream.prefix,
            stream.output_format,
            stream.buffer_size_bytes,
            stream.buffer_interval_seconds
        );
    }

    if let Some(alerts) = &blueprint.alerts {
        println!("\nAlerts:");
        println!(
            "  Predicate: {} in [{}]",
            alerts.alert_predicate.field,
            alerts
                .alert_predicate
                .values
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", ")
        );
        println!("  Notifiers: {}", alerts.notifiers.len());
    }

    println!();
}
