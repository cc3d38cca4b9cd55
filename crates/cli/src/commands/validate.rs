//! `validate` command implementation.

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::info;

use contracts::{OutputFormat, PipelineBlueprint, SinkType, TransformConfig};

use crate::cli::ValidateArgs;

/// Validation result for JSON output
#[derive(Serialize)]
struct ValidationResult {
    valid: bool,
    config_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    warnings: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    summary: Option<ConfigSummary>,
}

#[derive(Serialize)]
struct ConfigSummary {
    version: String,
    source: String,
    sink: String,
    stream_count: usize,
    columnar_streams: usize,
    notifier_count: usize,
}

/// Execute the `validate` command
pub fn run_validate(args: &ValidateArgs) -> Result<()> {
    info!(config = %args.config.display(), "Validating configuration");

    let result = validate_config(args);

    if args.json {
        let json = serde_json::to_string_pretty(&result)
            .context("Failed to serialize validation result")?;
        println!("{}", json);
    } else {
        print_validation_result(&result);
    }

    if result.valid {
        Ok(())
    } else {
        anyhow::bail!("Configuration validation failed")
    }
}

fn validate_config(args: &ValidateArgs) -> ValidationResult {
    let config_path = args.config.display().to_string();

    if !args.config.exists() {
        return ValidationResult {
            valid: false,
            config_path,
            error: Some(format!("File not found: {}", args.config.display())),
            warnings: None,
            summary: None,
        };
    }

    match config_loader::ConfigLoader::load_from_path(&args.config) {
        Ok(blueprint) => {
            let warnings = collect_warnings(&blueprint);
            ValidationResult {
                valid: true,
                config_path,
                error: None,
                warnings: (!warnings.is_empty()).then_some(warnings),
                summary: Some(ConfigSummary {
                    version: format!("{:?}", blueprint.version),
                    source: blueprint.source.name.clone(),
                    sink: format!("{} ({:?})", blueprint.sink.name, blueprint.sink.sink_type),
                    stream_count: blueprint.streams.len(),
                    columnar_streams: blueprint
                        .streams
                        .iter()
                        .filter(|s| s.output_format == OutputFormat::Columnar)
                        .count(),
                    notifier_count: blueprint
                        .alerts
                        .as_ref()
                        .map_or(0, |a| a.notifiers.len()),
                }),
            }
        }
        Err(e) => ValidationResult {
            valid: false,
            config_path,
            error: Some(e.to_string()),
            warnings: None,
            summary: None,
        },
    }
}

/// Collect configuration warnings (non-fatal issues)
fn collect_warnings(blueprint: &PipelineBlueprint) -> Vec<String> {
    let mut warnings = Vec::new();

    if blueprint.sink.sink_type == SinkType::Memory {
        warnings.push("Memory sink configured - objects are lost when the process exits".to_string());
    }

    for stream in &blueprint.streams {
        if stream.writer_concurrency > 1 {
            warnings.push(format!(
                "Stream '{}' uses {} writer workers - objects may commit out of batch order",
                stream.name, stream.writer_concurrency
            ));
        }
        if stream.raw_backup_enabled && stream.transform == TransformConfig::Identity {
            warnings.push(format!(
                "Stream '{}' backs up raw records but its transform is identity - raw objects duplicate processed ones",
                stream.name
            ));
        }
        if stream.prefix.is_empty() {
            warnings.push(format!(
                "Stream '{}' has no prefix - objects are written at the sink root",
                stream.name
            ));
        }
    }

    match &blueprint.alerts {
        None => warnings.push("No alerts section - alert fan-out disabled".to_string()),
        Some(alerts) if alerts.notifiers.is_empty() => {
            warnings.push("No notifiers configured - alerts go to the log only".to_string());
        }
        Some(_) => {}
    }

    warnings
}

fn print_validation_result(result: &ValidationResult) {
    if result.valid {
        println!("✓ Configuration is valid: {}", result.config_path);

        if let Some(ref summary) = result.summary {
            println!("\n  Version: {}", summary.version);
            println!("  Source: {}", summary.source);
            println!("  Sink: {}", summary.sink);
            println!("  Streams: {} ({} columnar)", summary.stream_count, summary.columnar_streams);
            println!("  Notifiers: {}", summary.notifier_count);
        }

        if let Some(ref warnings) = result.warnings {
            println!("\n⚠ Warnings:");
            for warning in warnings {
                println!("  - {}", warning);
            }
        }
    } else {
        println!("✗ Configuration is invalid: {}", result.config_path);
        if let Some(ref error) = result.error {
            println!("\n  Error: {}", error);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_valid_config_with_warnings() {
        let file = write_config(
            r#"
[sink]
sinkType = "memory"

[[streams]]
name = "web"
writerConcurrency = 2
"#,
        );
        let result = validate_config(&ValidateArgs {
            config: file.path().to_path_buf(),
            json: true,
        });
        assert!(result.valid, "{:?}", result.error);
        let warnings = result.warnings.unwrap();
        assert!(warnings.iter().any(|w| w.contains("Memory sink")));
        assert!(warnings.iter().any(|w| w.contains("2 writer workers")));
        assert!(warnings.iter().any(|w| w.contains("alert fan-out disabled")));
    }

    #[test]
    fn test_missing_file() {
        let result = validate_config(&ValidateArgs {
            config: "/nonexistent/courier.toml".into(),
            json: false,
        });
        assert!(!result.valid);
        assert!(result.error.unwrap().contains("File not found"));
    }

    #[test]
    fn test_invalid_config_reports_error() {
        let file = write_config(
            r#"
[sink]
sinkType = "memory"

[[streams]]
name = "web"
bufferSizeBytes = 0
"#,
        );
        let result = validate_config(&ValidateArgs {
            config: file.path().to_path_buf(),
            json: false,
        });
        assert!(!result.valid);
        assert!(result.error.unwrap().contains("bufferSizeBytes"));
    }
}
