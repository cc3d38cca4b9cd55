//! 配置校验模块
//!
//! 校验规则：
//! - stream 名称唯一、非空、可作为路径
//! - 批次阈值 > 0，重试次数 <= 10，退避 base <= max
//! - columnar 输出必须提供非空且列名唯一的 schema
//! - sink / notifier 必填参数齐全
//! - 告警谓词字段与匹配值非空

use std::collections::HashSet;

use contracts::{
    AlertConfig, ContractError, NotifierType, OutputFormat, PipelineBlueprint, SinkType,
    StreamConfig, TransformConfig,
};

/// 重试次数上限
pub const MAX_RETRIES: u32 = 10;

/// 校验 PipelineBlueprint 配置
///
/// 返回第一个遇到的错误，或 Ok(())。
pub fn validate(blueprint: &PipelineBlueprint) -> Result<(), ContractError> {
    validate_source(blueprint)?;
    validate_sink(blueprint)?;
    validate_stream_names(blueprint)?;
    for stream in &blueprint.streams {
        validate_stream(stream)?;
    }
    if let Some(alerts) = &blueprint.alerts {
        validate_alerts(alerts)?;
    }
    Ok(())
}

fn validate_source(blueprint: &PipelineBlueprint) -> Result<(), ContractError> {
    let source = &blueprint.source;
    if source.retention_records == 0 {
        return Err(ContractError::config_validation(
            "source.retentionRecords",
            "must be > 0",
        ));
    }
    if source.poll_max_records == 0 {
        return Err(ContractError::config_validation(
            "source.pollMaxRecords",
            "must be > 0",
        ));
    }
    Ok(())
}

/// 校验 sink 配置
fn validate_sink(blueprint: &PipelineBlueprint) -> Result<(), ContractError> {
    let sink = &blueprint.sink;
    if sink.name.is_empty() {
        return Err(ContractError::config_validation(
            "sink.name",
            "sink name cannot be empty",
        ));
    }
    if sink.sink_type == SinkType::Fs && !has_param(&sink.params, "root") {
        return Err(ContractError::config_validation(
            "sink.params.root",
            "fs sink requires a 'root' directory",
        ));
    }
    Ok(())
}

/// 校验 stream 名称唯一性
fn validate_stream_names(blueprint: &PipelineBlueprint) -> Result<(), ContractError> {
    if blueprint.streams.is_empty() {
        return Err(ContractError::config_validation(
            "streams",
            "at least one delivery stream is required",
        ));
    }
    let mut seen = HashSet::new();
    for (idx, stream) in blueprint.streams.iter().enumerate() {
        if !stream.name.is_path_safe() {
            return Err(ContractError::config_validation(
                format!("streams[{idx}].name"),
                format!(
                    "'{}' must be non-empty and use only [A-Za-z0-9._-]",
                    stream.name
                ),
            ));
        }
        if !seen.insert(stream.name.as_str()) {
            return Err(ContractError::config_validation(
                format!("streams[name={}]", stream.name),
                "duplicate stream name",
            ));
        }
    }
    Ok(())
}

/// 校验单个投递流
fn validate_stream(stream: &StreamConfig) -> Result<(), ContractError> {
    let field = |name: &str| format!("streams[{}].{}", stream.name, name);

    if stream.buffer_size_bytes == 0 {
        return Err(ContractError::config_validation(
            field("bufferSizeBytes"),
            "must be > 0",
        ));
    }
    if stream.buffer_interval_seconds == 0 {
        return Err(ContractError::config_validation(
            field("bufferIntervalSeconds"),
            "must be > 0",
        ));
    }
    if stream.transform_timeout_ms == 0 {
        return Err(ContractError::config_validation(
            field("transformTimeoutMs"),
            "must be > 0",
        ));
    }
    for (name, value) in [
        ("transformRetries", stream.transform_retries),
        ("writerRetries", stream.writer_retries),
    ] {
        if value > MAX_RETRIES {
            return Err(ContractError::config_validation(
                field(name),
                format!("must be <= {MAX_RETRIES}, got {value}"),
            ));
        }
    }
    if stream.writer_backoff_base_ms > stream.writer_backoff_max_ms {
        return Err(ContractError::config_validation(
            field("writerBackoffBaseMs"),
            format!(
                "base ({}) must be <= max ({})",
                stream.writer_backoff_base_ms, stream.writer_backoff_max_ms
            ),
        ));
    }
    if stream.writer_concurrency == 0 {
        return Err(ContractError::config_validation(
            field("writerConcurrency"),
            "must be >= 1",
        ));
    }
    if stream.queue_capacity == 0 {
        return Err(ContractError::config_validation(
            field("queueCapacity"),
            "must be >= 1",
        ));
    }
    if let TransformConfig::Command { program, .. } = &stream.transform {
        if program.trim().is_empty() {
            return Err(ContractError::config_validation(
                field("transform.program"),
                "command transform requires a program",
            ));
        }
    }
    if stream.output_format == OutputFormat::Columnar {
        validate_schema(stream)?;
    }
    Ok(())
}

/// 校验列式 schema
fn validate_schema(stream: &StreamConfig) -> Result<(), ContractError> {
    if stream.schema.is_empty() {
        return Err(ContractError::config_validation(
            format!("streams[{}].schema", stream.name),
            "columnar output requires a non-empty schema",
        ));
    }
    let mut seen = HashSet::new();
    for (idx, column) in stream.schema.iter().enumerate() {
        if column.name.is_empty() {
            return Err(ContractError::config_validation(
                format!("streams[{}].schema[{idx}].name", stream.name),
                "column name cannot be empty",
            ));
        }
        if !seen.insert(column.name.as_str()) {
            return Err(ContractError::config_validation(
                format!("streams[{}].schema[name={}]", stream.name, column.name),
                "duplicate column name",
            ));
        }
    }
    Ok(())
}

/// 校验告警配置
fn validate_alerts(alerts: &AlertConfig) -> Result<(), ContractError> {
    let predicate = &alerts.alert_predicate;
    if predicate.field.is_empty() || predicate.field.split('.').any(str::is_empty) {
        return Err(ContractError::config_validation(
            "alerts.alertPredicate.field",
            format!("invalid field path '{}'", predicate.field),
        ));
    }
    if predicate.values.is_empty() {
        return Err(ContractError::config_validation(
            "alerts.alertPredicate.values",
            "at least one value is required",
        ));
    }
    if alerts.alert_retries == 0 || alerts.alert_retries > MAX_RETRIES {
        return Err(ContractError::config_validation(
            "alerts.alertRetries",
            format!("must be within 1..={MAX_RETRIES}, got {}", alerts.alert_retries),
        ));
    }
    if alerts.alert_backoff_base_ms > alerts.alert_backoff_max_ms {
        return Err(ContractError::config_validation(
            "alerts.alertBackoffBaseMs",
            "base must be <= max",
        ));
    }
    if alerts.alert_queue_capacity == 0 {
        return Err(ContractError::config_validation(
            "alerts.alertQueueCapacity",
            "must be >= 1",
        ));
    }

    let mut seen = HashSet::new();
    for (idx, notifier) in alerts.notifiers.iter().enumerate() {
        if notifier.name.is_empty() {
            return Err(ContractError::config_validation(
                format!("alerts.notifiers[{idx}].name"),
                "notifier name cannot be empty",
            ));
        }
        if !seen.insert(notifier.name.as_str()) {
            return Err(ContractError::config_validation(
                format!("alerts.notifiers[name={}]", notifier.name),
                "duplicate notifier name",
            ));
        }
        let required = match notifier.notifier_type {
            NotifierType::Log => None,
            NotifierType::Webhook => Some("url"),
            NotifierType::Udp => Some("addr"),
        };
        if let Some(key) = required {
            if !has_param(&notifier.params, key) {
                return Err(ContractError::config_validation(
                    format!("alerts.notifiers[{}].params.{key}", notifier.name),
                    format!("missing required parameter '{key}'"),
                ));
            }
        }
    }
    Ok(())
}

fn has_param(params: &std::collections::HashMap<String, String>, key: &str) -> bool {
    params.get(key).is_some_and(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::{ColumnSpec, ColumnType, NotifierConfig, SinkConfig, SourceConfig};
    use std::collections::HashMap;

    fn blueprint(streams: Vec<StreamConfig>) -> PipelineBlueprint {
        PipelineBlueprint {
            version: Default::default(),
            source: SourceConfig::default(),
            sink: SinkConfig {
                name: "objects".to_string(),
                sink_type: SinkType::Memory,
                params: HashMap::new(),
            },
            streams,
            alerts: None,
        }
    }

    fn field_of(err: ContractError) -> String {
        match err {
            ContractError::ConfigValidation { field, .. } => field,
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_valid_minimal() {
        assert!(validate(&blueprint(vec![StreamConfig::new("orders")])).is_ok());
    }

    #[test]
    fn test_duplicate_stream_names() {
        let bp = blueprint(vec![StreamConfig::new("a"), StreamConfig::new("a")]);
        let err = validate(&bp).unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn test_unsafe_stream_name() {
        let bp = blueprint(vec![StreamConfig::new("a/b")]);
        assert_eq!(field_of(validate(&bp).unwrap_err()), "streams[0].name");
    }

    #[test]
    fn test_empty_streams_rejected() {
        assert_eq!(field_of(validate(&blueprint(vec![])).unwrap_err()), "streams");
    }

    #[test]
    fn test_zero_thresholds() {
        let mut stream = StreamConfig::new("s");
        stream.buffer_size_bytes = 0;
        assert_eq!(
            field_of(validate(&blueprint(vec![stream])).unwrap_err()),
            "streams[s].bufferSizeBytes"
        );

        let mut stream = StreamConfig::new("s");
        stream.buffer_interval_seconds = 0;
        assert_eq!(
            field_of(validate(&blueprint(vec![stream])).unwrap_err()),
            "streams[s].bufferIntervalSeconds"
        );
    }

    #[test]
    fn test_retry_ceiling() {
        let mut stream = StreamConfig::new("s");
        stream.writer_retries = MAX_RETRIES + 1;
        assert_eq!(
            field_of(validate(&blueprint(vec![stream])).unwrap_err()),
            "streams[s].writerRetries"
        );
    }

    #[test]
    fn test_columnar_requires_schema() {
        let mut stream = StreamConfig::new("s");
        stream.output_format = OutputFormat::Columnar;
        assert_eq!(
            field_of(validate(&blueprint(vec![stream.clone()])).unwrap_err()),
            "streams[s].schema"
        );

        stream.schema = vec![
            ColumnSpec::new("id", ColumnType::Int64, false),
            ColumnSpec::new("id", ColumnType::String, true),
        ];
        assert!(validate(&blueprint(vec![stream.clone()]))
            .unwrap_err()
            .to_string()
            .contains("duplicate column"));

        stream.schema.pop();
        assert!(validate(&blueprint(vec![stream])).is_ok());
    }

    #[test]
    fn test_fs_sink_requires_root() {
        let mut bp = blueprint(vec![StreamConfig::new("s")]);
        bp.sink.sink_type = SinkType::Fs;
        assert_eq!(field_of(validate(&bp).unwrap_err()), "sink.params.root");
        bp.sink.params.insert("root".into(), "/var/out".into());
        assert!(validate(&bp).is_ok());
    }

    #[test]
    fn test_alert_rules() {
        let mut bp = blueprint(vec![StreamConfig::new("s")]);
        let mut alerts = AlertConfig::default();
        alerts.alert_predicate.field = "response..status".into();
        bp.alerts = Some(alerts.clone());
        assert_eq!(
            field_of(validate(&bp).unwrap_err()),
            "alerts.alertPredicate.field"
        );

        alerts.alert_predicate.field = "response.status".into();
        alerts.notifiers.push(NotifierConfig {
            name: "hook".into(),
            notifier_type: NotifierType::Webhook,
            params: HashMap::new(),
        });
        bp.alerts = Some(alerts.clone());
        assert_eq!(
            field_of(validate(&bp).unwrap_err()),
            "alerts.notifiers[hook].params.url"
        );

        alerts.notifiers[0]
            .params
            .insert("url".into(), "http://localhost:9/hook".into());
        bp.alerts = Some(alerts);
        assert!(validate(&bp).is_ok());
    }
}
