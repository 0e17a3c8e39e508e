use crate::aggregator::{ErrorTally, Snapshot, SnapshotLabel, StatKey};
use crate::handler::MessageType;
use crate::metrics::{latency_distribution, latency_histogram, LatencyBucket, LatencyDistribution};
use serde::Serialize;
use std::borrow::Cow;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

/// Destination for rendered report text
pub type OutputFn = Arc<dyn Fn(&str) + Send + Sync>;

/// Default output: write rendered text to standard output
pub fn stdout_output() -> OutputFn {
    Arc::new(|text: &str| print!("{}", text))
}

/// Display names of message type tags.
///
/// Populated before a run starts and shared read-only with the renderer while
/// the run is in progress.
#[derive(Debug, Clone)]
pub struct MessageTypeRegistry {
    names: HashMap<MessageType, String>,
}

impl Default for MessageTypeRegistry {
    fn default() -> Self {
        let mut registry = Self {
            names: HashMap::new(),
        };
        registry.register(MessageType::GRPC, "grpc");
        registry.register(MessageType::MQ, "mq");
        registry.register(MessageType::HTTP, "http");
        registry.register(MessageType::TCP, "tcp");
        registry.register(MessageType::SIMULATED, "simulated");
        registry
    }
}

impl MessageTypeRegistry {
    /// Add or replace the display name of `message_type`
    pub fn register(&mut self, message_type: MessageType, name: impl Into<String>) {
        self.names.insert(message_type, name.into());
    }

    pub fn name(&self, message_type: MessageType) -> Cow<'_, str> {
        match self.names.get(&message_type) {
            Some(name) => Cow::Borrowed(name.as_str()),
            None => Cow::Owned(format!("unknown({})", message_type.0)),
        }
    }
}

/// Latest derived metrics of one key.
///
/// Each snapshot applied to a report replaces every derived field; reports
/// are never merged.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Report {
    #[serde(flatten)]
    pub key: StatKey,
    pub total_secs: f64,
    pub concurrency: usize,
    pub success_count: u64,
    pub failure_count: u64,
    pub qps: f64,
    pub max_latency_ms: f64,
    pub min_latency_ms: f64,
    pub avg_latency_ms: f64,
    pub received_bytes: u64,
    pub bytes_per_sec: u64,
    /// Ascending latencies in milliseconds
    pub latencies_ms: Vec<f64>,
    pub errors: ErrorTally,
}

impl Report {
    pub fn new(key: StatKey, concurrency: usize) -> Self {
        Self {
            key,
            total_secs: 0.0,
            concurrency,
            success_count: 0,
            failure_count: 0,
            qps: 0.0,
            max_latency_ms: 0.0,
            min_latency_ms: 0.0,
            avg_latency_ms: 0.0,
            received_bytes: 0,
            bytes_per_sec: 0,
            latencies_ms: Vec::new(),
            errors: ErrorTally::default(),
        }
    }

    /// Recompute every derived field from `snapshot`
    pub fn update(&mut self, snapshot: Snapshot) {
        let record = snapshot.record;
        // A zero window would divide by zero; count it as one nanosecond
        let elapsed_ns = snapshot.elapsed.as_nanos().max(1) as f64;

        let mut latencies = record.latencies_ms;
        latencies.sort_by(|a, b| a.total_cmp(b));

        self.success_count = record.success_count;
        self.failure_count = record.failure_count;
        self.qps = record.success_count as f64 * 1e9 / elapsed_ns;
        match (latencies.first(), latencies.last()) {
            (Some(&min), Some(&max)) => {
                self.min_latency_ms = min;
                self.max_latency_ms = max;
                self.avg_latency_ms = latencies.iter().sum::<f64>() / latencies.len() as f64;
            }
            _ => {
                self.min_latency_ms = 0.0;
                self.max_latency_ms = 0.0;
                self.avg_latency_ms = 0.0;
            }
        }
        self.latencies_ms = latencies;

        self.total_secs = elapsed_ns / 1e9;
        self.received_bytes = record.received_bytes;
        self.bytes_per_sec = if self.total_secs > 0.0 {
            (record.received_bytes as f64 / self.total_secs) as u64
        } else {
            0
        };
        self.errors = record.errors;
    }

    pub fn total_count(&self) -> u64 {
        self.success_count + self.failure_count
    }

    pub fn histogram(&self) -> Vec<LatencyBucket> {
        latency_histogram(&self.latencies_ms, self.max_latency_ms, self.min_latency_ms)
    }

    pub fn distribution(&self, omit_zero: bool) -> Vec<LatencyDistribution> {
        latency_distribution(&self.latencies_ms, omit_zero)
    }

    /// Tabular text rendering of this report
    pub fn display<'a>(
        &'a self,
        label: SnapshotLabel,
        registry: &'a MessageTypeRegistry,
        omit_zero_percentiles: bool,
    ) -> ReportDisplay<'a> {
        ReportDisplay {
            report: self,
            label,
            registry,
            omit_zero_percentiles,
        }
    }
}

/// Fixed tabular layout of a report: summary row, histogram, distribution
pub struct ReportDisplay<'a> {
    report: &'a Report,
    label: SnapshotLabel,
    registry: &'a MessageTypeRegistry,
    omit_zero_percentiles: bool,
}

impl<'a> fmt::Display for ReportDisplay<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let r = self.report;
        writeln!(
            f,
            "[{}] ==> message type | method : {} | {}",
            self.label,
            self.registry.name(r.key.message_type),
            r.key.method
        )?;
        writeln!(
            f,
            "──────┬───────┬───────┬───────┬──────────┬──────────┬──────────┬──────────┬──────────┬──────────┬────────"
        )?;
        writeln!(
            f,
            " time │  concy│success│failure│      qps │      max │      min │      avg │    bytes │  bytes/s │ errors"
        )?;
        writeln!(
            f,
            "──────┼───────┼───────┼───────┼──────────┼──────────┼──────────┼──────────┼──────────┼──────────┼────────"
        )?;
        writeln!(
            f,
            "{:>5.0}s│{:>7}│{:>7}│{:>7}│{:>10.2}│{:>8.2}ms│{:>8.2}ms│{:>8.2}ms│{:>10}│{:>10}│ {}",
            r.total_secs,
            r.concurrency,
            r.success_count,
            r.failure_count,
            r.qps,
            r.max_latency_ms,
            r.min_latency_ms,
            r.avg_latency_ms,
            format!("{}B", r.received_bytes),
            format!("{}B/s", r.bytes_per_sec),
            r.errors
        )?;

        writeln!(f, "Latency histogram:")?;
        for bucket in r.histogram() {
            writeln!(
                f,
                "{:>10.2}ms│{:>7}│{:>8.2}%",
                bucket.mark,
                bucket.count,
                bucket.frequency * 100.0
            )?;
        }

        writeln!(f, "Latency distribution:")?;
        for entry in r.distribution(self.omit_zero_percentiles) {
            writeln!(f, "{:>7}%     in {:>8.2}ms", entry.percentage, entry.latency)?;
        }
        Ok(())
    }
}

/// Consumer of the snapshot stream.
///
/// Keeps the latest report per key and writes a rendered table for every
/// snapshot it receives. Runs on its own task so slow output never touches
/// the aggregator's records; a full snapshot queue only delays the aggregator.
pub struct ReportRenderer {
    concurrency: usize,
    omit_zero_percentiles: bool,
    registry: Arc<MessageTypeRegistry>,
    output: OutputFn,
    reports: BTreeMap<StatKey, Report>,
}

impl ReportRenderer {
    pub fn new(
        concurrency: usize,
        omit_zero_percentiles: bool,
        registry: Arc<MessageTypeRegistry>,
        output: OutputFn,
    ) -> Self {
        Self {
            concurrency,
            omit_zero_percentiles,
            registry,
            output,
            reports: BTreeMap::new(),
        }
    }

    /// Fold `snapshot` into its key's report and emit the rendered text
    pub fn apply(&mut self, snapshot: Snapshot) {
        let label = snapshot.label;
        let concurrency = self.concurrency;
        let report = self
            .reports
            .entry(snapshot.key.clone())
            .or_insert_with(|| Report::new(snapshot.key.clone(), concurrency));
        report.update(snapshot);

        let text = report
            .display(label, &self.registry, self.omit_zero_percentiles)
            .to_string();
        (self.output)(&text);
    }

    /// Consume snapshots until the stream closes, then hand back all reports
    /// ordered by key
    pub async fn run(mut self, mut snapshots: mpsc::Receiver<Snapshot>) -> Vec<Report> {
        let mut rendered = 0usize;
        while let Some(snapshot) = snapshots.recv().await {
            self.apply(snapshot);
            rendered += 1;
        }
        debug!(
            "Snapshot stream closed after {} snapshots, {} reports",
            rendered,
            self.reports.len()
        );
        self.into_reports()
    }

    pub fn into_reports(self) -> Vec<Report> {
        self.reports.into_values().collect()
    }
}
