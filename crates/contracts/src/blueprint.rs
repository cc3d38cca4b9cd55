//! PipelineBlueprint - Config Loader 输出
//!
//! 描述完整的投递管道配置：输入源、对象存储、投递流、告警分发。

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use crate::{RetryPolicy, StreamId};

/// 配置版本
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ConfigVersion {
    #[default]
    V1,
}

/// 完整的管道配置蓝图
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineBlueprint {
    /// 配置版本
    #[serde(default)]
    pub version: ConfigVersion,

    /// 共享输入流
    #[serde(default)]
    pub source: SourceConfig,

    /// 对象存储
    pub sink: SinkConfig,

    /// 投递流列表 (每个流独立消费 source)
    pub streams: Vec<StreamConfig>,

    /// 告警分发 (可选)
    #[serde(default)]
    pub alerts: Option<AlertConfig>,
}

/// 输入流配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceConfig {
    /// 名称，出现在日志与告警中
    #[serde(default = "default_source_name")]
    pub name: String,

    /// 内存中保留的最大记录数；持久游标未读时生产者阻塞
    #[serde(default = "default_retention_records")]
    pub retention_records: usize,

    /// 每次 poll 最多取出的记录数
    #[serde(default = "default_poll_max_records")]
    pub poll_max_records: usize,

    /// poll 无数据时的最长等待时间
    #[serde(default = "default_poll_timeout_ms")]
    pub poll_timeout_ms: u64,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            name: default_source_name(),
            retention_records: default_retention_records(),
            poll_max_records: default_poll_max_records(),
            poll_timeout_ms: default_poll_timeout_ms(),
        }
    }
}

impl SourceConfig {
    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }
}

fn default_source_name() -> String {
    "source".to_string()
}

fn default_retention_records() -> usize {
    10_000
}

fn default_poll_max_records() -> usize {
    500
}

fn default_poll_timeout_ms() -> u64 {
    200
}

/// 对象存储配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SinkConfig {
    /// Sink 名称
    #[serde(default = "default_sink_name")]
    pub name: String,

    /// Sink 类型
    pub sink_type: SinkType,

    /// 类型特定参数 (fs: `root`)
    #[serde(default)]
    pub params: HashMap<String, String>,
}

fn default_sink_name() -> String {
    "objects".to_string()
}

/// Sink 类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SinkType {
    /// 进程内存 (测试/演示)
    Memory,
    /// 本地文件系统
    Fs,
}

/// 输出格式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    /// 换行分隔的记录 (NDJSON)
    #[default]
    Row,
    /// Parquet 列式
    Columnar,
}

/// 列式转换失败时的处理策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversionErrorPolicy {
    /// 仅拒绝出错的记录
    #[default]
    RejectRecord,
    /// 整个批次转入 failed
    FailBatch,
}

/// 列类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    Boolean,
    Int64,
    Float64,
    String,
    /// 毫秒时间戳 (UTC)
    Timestamp,
}

/// 列定义
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub column_type: ColumnType,
    #[serde(default = "default_nullable")]
    pub nullable: bool,
}

impl ColumnSpec {
    pub fn new(name: impl Into<String>, column_type: ColumnType, nullable: bool) -> Self {
        Self {
            name: name.into(),
            column_type,
            nullable,
        }
    }
}

fn default_nullable() -> bool {
    true
}

/// 内置转换函数
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransformConfig {
    /// 原样输出
    #[default]
    Identity,
    /// 校验 JSON 对象，可选写入投递时间字段
    Json {
        #[serde(default, rename = "stampField")]
        stamp_field: Option<String>,
    },
    /// 外部命令：stdin 读入 payload，stdout 输出结果
    Command {
        program: String,
        #[serde(default)]
        args: Vec<String>,
    },
}

/// 单个投递流配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamConfig {
    /// 流名称，唯一且可用作路径
    pub name: StreamId,

    /// 对象路径前缀
    #[serde(default)]
    pub prefix: String,

    /// 批次大小阈值 (字节)
    #[serde(default = "default_buffer_size_bytes")]
    pub buffer_size_bytes: usize,

    /// 批次时间阈值 (秒)
    #[serde(default = "default_buffer_interval_seconds")]
    pub buffer_interval_seconds: u64,

    /// 转换函数
    #[serde(default)]
    pub transform: TransformConfig,

    /// 瞬时失败后的重试次数
    #[serde(default = "default_transform_retries")]
    pub transform_retries: u32,

    /// 单次转换超时
    #[serde(default = "default_transform_timeout_ms")]
    pub transform_timeout_ms: u64,

    /// 写入重试次数 (不含首次)
    #[serde(default = "default_writer_retries")]
    pub writer_retries: u32,

    #[serde(default = "default_writer_backoff_base_ms")]
    pub writer_backoff_base_ms: u64,

    #[serde(default = "default_writer_backoff_max_ms")]
    pub writer_backoff_max_ms: u64,

    /// 并发写入 worker 数
    #[serde(default = "default_writer_concurrency")]
    pub writer_concurrency: usize,

    /// 阶段间队列容量 (批次)
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// 是否备份未转换的原始记录
    #[serde(default)]
    pub raw_backup_enabled: bool,

    #[serde(default)]
    pub output_format: OutputFormat,

    /// 列式输出 schema
    #[serde(default)]
    pub schema: Vec<ColumnSpec>,

    #[serde(default)]
    pub conversion_error_policy: ConversionErrorPolicy,
}

impl StreamConfig {
    /// Config with every option at its default.
    pub fn new(name: impl Into<StreamId>) -> Self {
        Self {
            name: name.into(),
            prefix: String::new(),
            buffer_size_bytes: default_buffer_size_bytes(),
            buffer_interval_seconds: default_buffer_interval_seconds(),
            transform: TransformConfig::default(),
            transform_retries: default_transform_retries(),
            transform_timeout_ms: default_transform_timeout_ms(),
            writer_retries: default_writer_retries(),
            writer_backoff_base_ms: default_writer_backoff_base_ms(),
            writer_backoff_max_ms: default_writer_backoff_max_ms(),
            writer_concurrency: default_writer_concurrency(),
            queue_capacity: default_queue_capacity(),
            raw_backup_enabled: false,
            output_format: OutputFormat::default(),
            schema: Vec::new(),
            conversion_error_policy: ConversionErrorPolicy::default(),
        }
    }

    pub fn buffer_interval(&self) -> Duration {
        Duration::from_secs(self.buffer_interval_seconds)
    }

    pub fn transform_timeout(&self) -> Duration {
        Duration::from_millis(self.transform_timeout_ms)
    }

    pub fn writer_retry_policy(&self) -> RetryPolicy {
        RetryPolicy::with_retries(
            self.writer_retries,
            Duration::from_millis(self.writer_backoff_base_ms),
            Duration::from_millis(self.writer_backoff_max_ms),
        )
    }
}

pub const MIB: usize = 1024 * 1024;

fn default_buffer_size_bytes() -> usize {
    128 * MIB
}

fn default_buffer_interval_seconds() -> u64 {
    60
}

fn default_transform_retries() -> u32 {
    1
}

fn default_transform_timeout_ms() -> u64 {
    3_000
}

fn default_writer_retries() -> u32 {
    3
}

fn default_writer_backoff_base_ms() -> u64 {
    100
}

fn default_writer_backoff_max_ms() -> u64 {
    5_000
}

fn default_writer_concurrency() -> usize {
    1
}

fn default_queue_capacity() -> usize {
    8
}

/// 告警谓词：字段路径 + 匹配值集合
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertPredicateConfig {
    /// 点分路径，如 `response.status`
    #[serde(default = "default_alert_field")]
    pub field: String,

    /// 数字或字符串；数字与数字字符串互相匹配
    #[serde(default = "default_alert_values")]
    pub values: Vec<AlertValue>,
}

impl Default for AlertPredicateConfig {
    fn default() -> Self {
        Self {
            field: default_alert_field(),
            values: default_alert_values(),
        }
    }
}

fn default_alert_field() -> String {
    "status".to_string()
}

fn default_alert_values() -> Vec<AlertValue> {
    [500, 502, 503, 504]
        .into_iter()
        .map(AlertValue::Int)
        .collect()
}

/// 谓词匹配值
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AlertValue {
    Int(i64),
    Float(f64),
    Text(String),
    Bool(bool),
}

impl std::fmt::Display for AlertValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Text(v) => f.write_str(v),
            Self::Bool(v) => write!(f, "{v}"),
        }
    }
}

/// 告警通道配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotifierConfig {
    /// 通道名称
    pub name: String,

    /// 通道类型
    pub notifier_type: NotifierType,

    /// 类型特定参数 (webhook: `url`；udp: `addr`)
    #[serde(default)]
    pub params: HashMap<String, String>,
}

/// 告警通道类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotifierType {
    /// 日志输出
    Log,
    /// HTTP POST JSON
    Webhook,
    /// UDP 数据报
    Udp,
}

/// 告警分发配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertConfig {
    #[serde(default)]
    pub alert_predicate: AlertPredicateConfig,

    /// 每条告警的最大发送次数 (含首次)
    #[serde(default = "default_alert_retries")]
    pub alert_retries: u32,

    #[serde(default = "default_alert_backoff_base_ms")]
    pub alert_backoff_base_ms: u64,

    #[serde(default = "default_alert_backoff_max_ms")]
    pub alert_backoff_max_ms: u64,

    /// 每个通道的待发送队列容量，满时丢弃新告警
    #[serde(default = "default_alert_queue_capacity")]
    pub alert_queue_capacity: usize,

    #[serde(default)]
    pub notifiers: Vec<NotifierConfig>,
}

impl AlertConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.alert_retries,
            Duration::from_millis(self.alert_backoff_base_ms),
            Duration::from_millis(self.alert_backoff_max_ms),
        )
    }
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            alert_predicate: AlertPredicateConfig::default(),
            alert_retries: default_alert_retries(),
            alert_backoff_base_ms: default_alert_backoff_base_ms(),
            alert_backoff_max_ms: default_alert_backoff_max_ms(),
            alert_queue_capacity: default_alert_queue_capacity(),
            notifiers: Vec::new(),
        }
    }
}

fn default_alert_retries() -> u32 {
    3
}

fn default_alert_backoff_base_ms() -> u64 {
    200
}

fn default_alert_backoff_max_ms() -> u64 {
    5_000
}

fn default_alert_queue_capacity() -> usize {
    256
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_defaults_from_json() {
        let cfg: StreamConfig = serde_json::from_str(r#"{ "name": "orders" }"#).unwrap();
        assert_eq!(cfg.buffer_size_bytes, 128 * MIB);
        assert_eq!(cfg.buffer_interval_seconds, 60);
        assert_eq!(cfg.transform_retries, 1);
        assert_eq!(cfg.transform_timeout_ms, 3000);
        assert_eq!(cfg.writer_retries, 3);
        assert_eq!(cfg.output_format, OutputFormat::Row);
        assert_eq!(cfg.transform, TransformConfig::Identity);
        assert!(!cfg.raw_backup_enabled);
    }

    #[test]
    fn test_camel_case_keys() {
        let cfg: StreamConfig = serde_json::from_str(
            r#"{
                "name": "orders",
                "bufferSizeBytes": 1024,
                "rawBackupEnabled": true,
                "outputFormat": "columnar",
                "conversionErrorPolicy": "fail_batch",
                "schema": [{ "name": "id", "type": "int64", "nullable": false }],
                "transform": { "kind": "json", "stampField": "deliveredAt" }
            }"#,
        )
        .unwrap();
        assert_eq!(cfg.buffer_size_bytes, 1024);
        assert!(cfg.raw_backup_enabled);
        assert_eq!(cfg.output_format, OutputFormat::Columnar);
        assert_eq!(cfg.conversion_error_policy, ConversionErrorPolicy::FailBatch);
        assert_eq!(cfg.schema[0], ColumnSpec::new("id", ColumnType::Int64, false));
        assert_eq!(
            cfg.transform,
            TransformConfig::Json {
                stamp_field: Some("deliveredAt".to_string())
            }
        );
    }

    #[test]
    fn test_alert_defaults() {
        let cfg: AlertConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.alert_predicate.field, "status");
        assert_eq!(cfg.alert_predicate.values.len(), 4);
        assert_eq!(cfg.retry_policy().max_attempts, 3);
    }

    #[test]
    fn test_writer_policy_counts_retries() {
        let cfg = StreamConfig::new("s");
        assert_eq!(cfg.writer_retry_policy().max_attempts, 4);
    }
}
