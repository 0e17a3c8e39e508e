//! # Statistics Aggregator
//!
//! The aggregator is the single owner of every [`StatisticRecord`] in a run.
//! It runs as one task that multiplexes two event sources:
//!
//! - **Outcome events** from the bounded stream fed by all workers
//! - **Timer ticks** at the configured snapshot interval (no ticks when the
//!   interval is zero)
//!
//! Both are handled on the same task, never concurrently, so records need no
//! locking. On every tick each record is deep-copied into a [`Snapshot`] and
//! pushed to the report renderer. When the outcome stream closes, one final
//! snapshot per key is emitted, the renderer's input is closed, and the
//! renderer's report set becomes the result of the run.
//!
//! ## Data Flow
//!
//! ```text
//! workers ──OutcomeEvent──▶ Aggregator ──Snapshot──▶ ReportRenderer ──▶ Vec<Report>
//!           (bounded)                    (bounded)
//! ```
//!
//! Records are cumulative and never reset, so every snapshot carries the whole
//! history of its key up to that point, not the delta since the previous tick.

use crate::benchmark::RunConfig;
use crate::handler::{MessageType, OutcomeEvent, OutcomeSink};
use crate::results::{Report, ReportRenderer};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::future::pending;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Interval, MissedTickBehavior};
use tracing::{debug, error, warn};

/// Identity of an independent statistics stream
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StatKey {
    pub message_type: MessageType,
    pub method: String,
}

impl StatKey {
    pub fn new(message_type: MessageType, method: impl Into<String>) -> Self {
        Self {
            message_type,
            method: method.into(),
        }
    }
}

/// Occurrences per error code, ordered by code
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorTally(BTreeMap<i32, u64>);

impl ErrorTally {
    pub fn increment(&mut self, code: i32) {
        *self.0.entry(code).or_insert(0) += 1;
    }

    pub fn get(&self, code: i32) -> u64 {
        self.0.get(&code).copied().unwrap_or(0)
    }

    pub fn total(&self) -> u64 {
        self.0.values().sum()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (i32, u64)> + '_ {
        self.0.iter().map(|(&code, &count)| (code, count))
    }
}

impl fmt::Display for ErrorTally {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (code, count)) in self.iter().enumerate() {
            if i > 0 {
                f.write_str(";")?;
            }
            write!(f, "{}:{}", code, count)?;
        }
        Ok(())
    }
}

/// Cumulative statistics of one key
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatisticRecord {
    pub success_count: u64,
    pub failure_count: u64,
    pub received_bytes: u64,
    /// Latencies in milliseconds, in arrival order
    pub latencies_ms: Vec<f64>,
    pub errors: ErrorTally,
}

impl StatisticRecord {
    fn new() -> Self {
        Self {
            latencies_ms: Vec::with_capacity(256),
            ..Self::default()
        }
    }

    /// Fold one outcome event into the record
    pub fn absorb(&mut self, event: &OutcomeEvent) {
        self.latencies_ms
            .push(event.elapsed.as_nanos() as f64 / 1_000_000.0);
        if event.succeeded {
            self.success_count += 1;
        } else {
            self.failure_count += 1;
        }
        self.errors.increment(event.error_code);
        self.received_bytes += event.received_bytes;
    }

    pub fn total_count(&self) -> u64 {
        self.success_count + self.failure_count
    }
}

/// What triggered a snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotLabel {
    Tick(u64),
    Final,
}

impl fmt::Display for SnapshotLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SnapshotLabel::Tick(n) => write!(f, "tick {}", n),
            SnapshotLabel::Final => write!(f, "final"),
        }
    }
}

/// Point-in-time deep copy of a key's record
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub key: StatKey,
    pub label: SnapshotLabel,
    /// Wall time since the run started
    pub elapsed: Duration,
    pub record: StatisticRecord,
}

/// Source of "time since the run started"
pub trait RunClock: Send + Sync + 'static {
    fn elapsed(&self) -> Duration;
}

/// Monotonic clock anchored at construction time
#[derive(Debug, Clone, Copy)]
pub struct WallClock {
    started: Instant,
}

impl WallClock {
    pub fn start() -> Self {
        Self {
            started: Instant::now(),
        }
    }
}

impl RunClock for WallClock {
    fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

/// Single-writer owner of all statistic records
pub struct Aggregator<C: RunClock> {
    clock: C,
    stat_interval: Option<Duration>,
    records: BTreeMap<StatKey, StatisticRecord>,
    ticks: u64,
    snapshots: mpsc::Sender<Snapshot>,
}

impl<C: RunClock> Aggregator<C> {
    /// `stat_interval_secs == 0` disables periodic snapshots
    pub fn new(clock: C, stat_interval_secs: u64, snapshots: mpsc::Sender<Snapshot>) -> Self {
        Self {
            clock,
            stat_interval: (stat_interval_secs > 0).then(|| Duration::from_secs(stat_interval_secs)),
            records: BTreeMap::new(),
            ticks: 0,
            snapshots,
        }
    }

    /// Record an event against its key, creating the key's record on first use
    pub fn absorb(&mut self, mut event: OutcomeEvent) {
        let key = StatKey::new(event.message_type, std::mem::take(&mut event.method));
        self.records
            .entry(key)
            .or_insert_with(StatisticRecord::new)
            .absorb(&event);
    }

    pub fn records(&self) -> &BTreeMap<StatKey, StatisticRecord> {
        &self.records
    }

    async fn publish(&self, label: SnapshotLabel, elapsed: Duration) {
        for (key, record) in &self.records {
            let snapshot = Snapshot {
                key: key.clone(),
                label,
                elapsed,
                record: record.clone(),
            };
            if self.snapshots.send(snapshot).await.is_err() {
                warn!("Report renderer stopped early; dropping {} snapshots", label);
                return;
            }
        }
    }

    async fn tick(&mut self) {
        self.ticks += 1;
        let elapsed = self.clock.elapsed();
        debug!(
            "Tick {} at {:?}: publishing {} keys",
            self.ticks,
            elapsed,
            self.records.len()
        );
        self.publish(SnapshotLabel::Tick(self.ticks), elapsed).await;
    }

    /// Drive the event loop until the outcome stream closes, then publish the
    /// final snapshots and close the renderer's input
    pub async fn run(mut self, mut outcomes: mpsc::Receiver<OutcomeEvent>) {
        let mut ticker = self.stat_interval.map(|period| {
            let mut ticker = interval_at(tokio::time::Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker
        });

        loop {
            tokio::select! {
                event = outcomes.recv() => match event {
                    Some(event) => self.absorb(event),
                    None => break,
                },
                _ = next_tick(&mut ticker) => self.tick().await,
            }
        }

        drop(ticker);
        let elapsed = self.clock.elapsed();
        debug!(
            "Outcome stream closed after {:?}; publishing final snapshots",
            elapsed
        );
        self.publish(SnapshotLabel::Final, elapsed).await;
    }
}

/// Resolves on the next tick, or never when ticking is disabled
async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => pending::<()>().await,
    }
}

/// Start the aggregator and renderer tasks.
///
/// Returns the write side of the outcome stream and a handle resolving to the
/// final report set. The pipeline drains once every clone of the returned
/// sink has been dropped.
pub fn spawn_pipeline<C: RunClock>(
    config: &RunConfig,
    clock: C,
    renderer: ReportRenderer,
) -> (OutcomeSink, JoinHandle<Vec<Report>>) {
    // Bounded channels need room for at least one item
    let (outcome_tx, outcome_rx) = mpsc::channel(config.results_buffer_size.max(1));
    let (snapshot_tx, snapshot_rx) = mpsc::channel(config.snapshot_buffer_size.max(1));
    let aggregator = Aggregator::new(clock, config.stat_interval_secs, snapshot_tx);

    let handle = tokio::spawn(async move {
        let rendering = tokio::spawn(renderer.run(snapshot_rx));
        // Dropping the aggregator after `run` closes the renderer's input
        aggregator.run(outcome_rx).await;
        match rendering.await {
            Ok(reports) => reports,
            Err(e) => {
                error!("Report renderer task failed: {}", e);
                Vec::new()
            }
        }
    });

    (OutcomeSink::new(outcome_tx), handle)
}
