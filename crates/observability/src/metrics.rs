//! Delivery 指标收集模块
//!
//! 指标名统一使用 `courier_` 前缀，标签携带 stream / kind 等维度。

use std::collections::BTreeMap;

use contracts::{BatchKind, DeliveryState, ErrorOutputType, FlushTrigger, StatusEvent};
use metrics::{counter, gauge, histogram};

/// 记录 source 追加的记录
pub fn record_records_appended(source: &str, count: u64) {
    counter!("courier_source_records_total", "source" => source.to_string()).increment(count);
}

/// 记录 source 当前保留深度
pub fn record_source_depth(source: &str, depth: usize) {
    gauge!("courier_source_depth", "source" => source.to_string()).set(depth as f64);
}

/// 记录投递流读取的记录数
pub fn record_records_ingested(stream: &str, count: usize) {
    counter!("courier_records_ingested_total", "stream" => stream.to_string())
        .increment(count as u64);
}

/// 记录批次关闭
pub fn record_batch_flushed(stream: &str, trigger: FlushTrigger, records: usize, bytes: usize) {
    counter!(
        "courier_batches_flushed_total",
        "stream" => stream.to_string(),
        "trigger" => trigger.as_str()
    )
    .increment(1);
    histogram!("courier_batch_records", "stream" => stream.to_string()).record(records as f64);
    histogram!("courier_batch_bytes", "stream" => stream.to_string()).record(bytes as f64);
}

/// 记录转换结果
pub fn record_transform_outcome(stream: &str, accepted: usize, rejected: usize) {
    counter!("courier_records_accepted_total", "stream" => stream.to_string())
        .increment(accepted as u64);
    if rejected > 0 {
        counter!(
            "courier_records_rejected_total",
            "stream" => stream.to_string(),
            "error_type" => ErrorOutputType::ProcessingFailed.as_str()
        )
        .increment(rejected as u64);
    }
}

/// 记录转换阶段的重试
pub fn record_transform_retry(stream: &str) {
    counter!("courier_transform_retries_total", "stream" => stream.to_string()).increment(1);
}

/// 记录列式转换拒绝的记录
pub fn record_conversion_rejects(stream: &str, count: usize) {
    counter!(
        "courier_records_rejected_total",
        "stream" => stream.to_string(),
        "error_type" => ErrorOutputType::FormatConversionFailed.as_str()
    )
    .increment(count as u64);
}

/// 记录对象提交成功
pub fn record_object_committed(stream: &str, kind: BatchKind, bytes: usize, attempts: u32, latency_ms: f64) {
    counter!(
        "courier_objects_committed_total",
        "stream" => stream.to_string(),
        "kind" => kind.as_str()
    )
    .increment(1);
    counter!(
        "courier_bytes_committed_total",
        "stream" => stream.to_string(),
        "kind" => kind.as_str()
    )
    .increment(bytes as u64);
    histogram!("courier_put_attempts", "stream" => stream.to_string()).record(attempts as f64);
    histogram!("courier_put_latency_ms", "stream" => stream.to_string()).record(latency_ms);
}

/// 记录 sink 重试
pub fn record_sink_retry(stream: &str) {
    counter!("courier_sink_retries_total", "stream" => stream.to_string()).increment(1);
}

/// 记录重试耗尽后转入 delivery-failed
pub fn record_delivery_failure(stream: &str, redirected: bool) {
    counter!(
        "courier_delivery_failures_total",
        "stream" => stream.to_string(),
        "redirected" => if redirected { "true" } else { "false" }
    )
    .increment(1);
}

/// 记录状态机迁移
pub fn record_state(stream: &str, state: DeliveryState) {
    counter!(
        "courier_state_transitions_total",
        "stream" => stream.to_string(),
        "to" => state.as_str()
    )
    .increment(1);
}

/// 记录谓词命中
pub fn record_alert_matched(field: &str) {
    counter!("courier_alerts_matched_total", "field" => field.to_string()).increment(1);
}

/// 记录告警发送结果
pub fn record_alert_sent(notifier: &str, success: bool, attempts: u32) {
    let status = if success { "success" } else { "failure" };
    counter!(
        "courier_alerts_sent_total",
        "notifier" => notifier.to_string(),
        "status" => status
    )
    .increment(1);
    histogram!("courier_alert_attempts", "notifier" => notifier.to_string())
        .record(attempts as f64);
}

/// 记录告警队列满丢弃
pub fn record_alert_dropped(notifier: &str) {
    counter!("courier_alerts_dropped_total", "notifier" => notifier.to_string()).increment(1);
}

/// 投递指标聚合器
///
/// 在内存中聚合 `StatusEvent`，便于运行结束时输出摘要。
#[derive(Debug, Clone, Default)]
pub struct DeliveryMetricsAggregator {
    /// 关闭的批次数
    pub batches_flushed: u64,

    /// 提交的对象数 (按 kind)
    pub objects_by_kind: BTreeMap<String, u64>,

    /// 提交的字节数
    pub bytes_committed: u64,

    /// 拒绝的记录数 (按 error type)
    pub rejected_by_type: BTreeMap<String, u64>,

    /// 重试耗尽次数
    pub delivery_failures: u64,

    /// 批次记录数统计
    pub batch_records: RunningStats,

    /// 批次字节数统计
    pub batch_bytes: RunningStats,

    /// 单对象写入尝试次数统计
    pub put_attempts: RunningStats,

    /// 最近一次状态
    pub last_state: BTreeMap<String, DeliveryState>,
}

impl DeliveryMetricsAggregator {
    /// 创建新的聚合器
    pub fn new() -> Self {
        Self::default()
    }

    /// 更新聚合统计
    pub fn update(&mut self, event: &StatusEvent) {
        match event {
            StatusEvent::StateChanged { stream, to, .. } => {
                self.last_state.insert(stream.to_string(), *to);
            }
            StatusEvent::BatchFlushed { records, bytes, .. } => {
                self.batches_flushed += 1;
                self.batch_records.push(*records as f64);
                self.batch_bytes.push(*bytes as f64);
            }
            StatusEvent::BatchCommitted {
                kind,
                bytes,
                attempts,
                ..
            } => {
                *self.objects_by_kind.entry(kind.to_string()).or_insert(0) += 1;
                self.bytes_committed += *bytes as u64;
                self.put_attempts.push(*attempts as f64);
            }
            StatusEvent::RecordsRejected {
                error_type, count, ..
            } => {
                *self
                    .rejected_by_type
                    .entry(error_type.to_string())
                    .or_insert(0) += *count as u64;
            }
            StatusEvent::DeliveryFailure { .. } => {
                self.delivery_failures += 1;
            }
        }
    }

    /// 生成摘要报告
    pub fn summary(&self) -> MetricsSummary {
        MetricsSummary {
            batches_flushed: self.batches_flushed,
            objects_committed: self.objects_by_kind.values().sum(),
            objects_by_kind: self.objects_by_kind.clone(),
            bytes_committed: self.bytes_committed,
            rejected_by_type: self.rejected_by_type.clone(),
            delivery_failures: self.delivery_failures,
            batch_records: StatsSummary::from(&self.batch_records),
            batch_bytes: StatsSummary::from(&self.batch_bytes),
            put_attempts: StatsSummary::from(&self.put_attempts),
        }
    }
}

/// 指标摘要
#[derive(Debug, Clone, Default)]
pub struct MetricsSummary {
    pub batches_flushed: u64,
    pub objects_committed: u64,
    pub objects_by_kind: BTreeMap<String, u64>,
    pub bytes_committed: u64,
    pub rejected_by_type: BTreeMap<String, u64>,
    pub delivery_failures: u64,
    pub batch_records: StatsSummary,
    pub batch_bytes: StatsSummary,
    pub put_attempts: StatsSummary,
}

impl std::fmt::Display for MetricsSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "=== Delivery Metrics Summary ===")?;
        writeln!(f, "Batches flushed: {}", self.batches_flushed)?;
        writeln!(
            f,
            "Objects committed: {} ({} bytes)",
            self.objects_committed, self.bytes_committed
        )?;
        for (kind, count) in &self.objects_by_kind {
            writeln!(f, "  {}: {}", kind, count)?;
        }
        if !self.rejected_by_type.is_empty() {
            writeln!(f, "Rejected records:")?;
            for (error_type, count) in &self.rejected_by_type {
                writeln!(f, "  {}: {}", error_type, count)?;
            }
        }
        writeln!(f, "Delivery failures: {}", self.delivery_failures)?;
        writeln!(f, "Records per batch: {}", self.batch_records)?;
        writeln!(f, "Bytes per batch: {}", self.batch_bytes)?;
        writeln!(f, "Put attempts: {}", self.put_attempts)?;
        Ok(())
    }
}

/// 统计摘要
#[derive(Debug, Clone, Default)]
pub struct StatsSummary {
    pub count: u64,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub std_dev: f64,
}

impl From<&RunningStats> for StatsSummary {
    fn from(stats: &RunningStats) -> Self {
        Self {
            count: stats.count,
            min: stats.min,
            max: stats.max,
            mean: stats.mean(),
            std_dev: stats.std_dev(),
        }
    }
}

impl std::fmt::Display for StatsSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.count == 0 {
            write!(f, "N/A")
        } else {
            write!(
                f,
                "min={:.1}, max={:.1}, mean={:.1}, std={:.1} (n={})",
                self.min, self.max, self.mean, self.std_dev, self.count
            )
        }
    }
}

/// 在线统计计算器 (Welford's algorithm)
#[derive(Debug, Clone, Default)]
pub struct RunningStats {
    count: u64,
    mean: f64,
    m2: f64,
    min: f64,
    max: f64,
}

impl RunningStats {
    /// 添加新值
    pub fn push(&mut self, value: f64) {
        self.count += 1;
        if self.count == 1 {
            self.min = value;
            self.max = value;
            self.mean = value;
            self.m2 = 0.0;
            return;
        }
        self.min = self.min.min(value);
        self.max = self.max.max(value);
        let delta = value - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (value - self.mean);
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.mean
        }
    }

    /// 样本方差
    pub fn variance(&self) -> f64 {
        if self.count < 2 {
            0.0
        } else {
            self.m2 / (self.count - 1) as f64
        }
    }

    pub fn std_dev(&self) -> f64 {
        self.variance().sqrt()
    }
}
