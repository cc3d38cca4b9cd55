//! Pipeline statistics.

use std::time::Duration;

use alerting::AlertReport;
use delivery::DeliveryReport;
use observability::MetricsSummary;
use serde::Serialize;

/// Statistics from a pipeline run
#[derive(Debug, Clone, Default)]
pub struct PipelineStats {
    /// Records appended to the shared stream
    pub records_appended: u64,

    /// Records the alert cursor skipped after falling behind retention
    pub records_skipped: u64,

    /// Records pulled by delivery streams (summed over streams)
    pub records_ingested: u64,

    /// Total duration of the run
    pub duration: Duration,

    /// Reports of streams that reached `Stopped`
    pub reports: Vec<DeliveryReport>,

    /// (stream, error) for streams that failed to start or failed while running
    pub failed_streams: Vec<(String, String)>,

    /// Aggregated status events of every stream
    pub delivery: MetricsSummary,

    pub alerts: Option<AlertReport>,
}

/// JSON form of the run summary
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StatsJson<'a> {
    duration_secs: f64,
    records_appended: u64,
    records_ingested: u64,
    records_per_sec: f64,
    streams: &'a [DeliveryReport],
    failed_streams: Vec<FailedStream<'a>>,
    objects_committed: u64,
    bytes_committed: u64,
    delivery_failures: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    alerts: Option<AlertsJson>,
}

#[derive(Serialize)]
struct FailedStream<'a> {
    stream: &'a str,
    error: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AlertsJson {
    records_scanned: u64,
    records_skipped: u64,
    alerts_matched: u64,
    alerts_sent: u64,
    alerts_dropped: u64,
}

impl PipelineStats {
    /// Records ingested per second
    pub fn throughput(&self) -> f64 {
        if self.duration.as_secs_f64() > 0.0 {
            self.records_ingested as f64 / self.duration.as_secs_f64()
        } else {
            0.0
        }
    }

    pub fn is_success(&self) -> bool {
        self.failed_streams.is_empty()
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        let json = StatsJson {
            duration_secs: self.duration.as_secs_f64(),
            records_appended: self.records_appended,
            records_ingested: self.records_ingested,
            records_per_sec: self.throughput(),
            streams: &self.reports,
            failed_streams: self
                .failed_streams
                .iter()
                .map(|(stream, error)| FailedStream { stream, error })
                .collect(),
            objects_committed: self.delivery.objects_committed,
            bytes_committed: self.delivery.bytes_committed,
            delivery_failures: self.delivery.delivery_failures,
            alerts: self.alerts.as_ref().map(|a| AlertsJson {
                records_scanned: a.records_scanned,
                records_skipped: self.records_skipped,
                alerts_matched: a.alerts_matched,
                alerts_sent: a.total_sent(),
                alerts_dropped: a.total_dropped(),
            }),
        };
        serde_json::to_string_pretty(&json)
    }

    /// Print detailed summary
    pub fn print_summary(&self) {
        println!("\n=== Courier Run Summary ===\n");

        println!("Overview");
        println!("   Duration: {:.2}s", self.duration.as_secs_f64());
        println!("   Records appended: {}", self.records_appended);
        println!("   Records ingested: {}", self.records_ingested);
        println!("   Throughput: {:.1} records/s", self.throughput());

        println!("\nStreams");
        for report in &self.reports {
            let m = &report.metrics;
            println!(
                "   {} [{}]: ingested={} accepted={} rejected={} objects={} retries={} failures={}",
                report.stream,
                report.final_state,
                m.records_ingested,
                m.records_accepted,
                m.records_rejected,
                m.objects_committed,
                m.sink_retries,
                m.delivery_failures
            );
        }
        for (stream, error) in &self.failed_streams {
            println!("   {} [Failed]: {}", stream, error);
        }

        println!("\n{}", self.delivery);

        if let Some(alerts) = &self.alerts {
            println!("Alerts ({})", alerts.source);
            println!("   Records scanned: {}", alerts.records_scanned);
            println!("   Records skipped: {}", self.records_skipped);
            println!("   Matched: {}", alerts.alerts_matched);
            for (name, m) in &alerts.notifiers {
                println!(
                    "   {}: sent={} failed={} dropped={} retries={}",
                    name, m.sent_count, m.failure_count, m.dropped_count, m.retry_count
                );
            }
        }

        println!();
    }
}
