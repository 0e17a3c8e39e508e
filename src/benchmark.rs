//! # Load Coordinator Module
//!
//! This module contains the engine that drives a load run: it spawns the
//! configured number of workers, hands each one a fresh request handler, and
//! wires the workers to the statistics pipeline.
//!
//! ## Key Components
//!
//! - **RunConfig**: Immutable parameters of a run
//! - **BenchmarkRunner**: Orchestrates workers and the aggregation pipeline
//! - **Workers**: One task per unit of concurrency, each driving one handler
//!   through a fixed number of sequential requests
//!
//! ## Run Lifecycle
//!
//! 1. **Pipeline start**: The aggregator and report renderer tasks are spawned
//! 2. **Worker start**: `concurrency` workers each create and initialize a handler
//! 3. **Load**: Every worker performs `requests_per_worker` attempts, each of
//!    which emits exactly one outcome event into the shared bounded stream
//! 4. **Barrier**: The coordinator waits for every worker to finish
//! 5. **Close**: Dropping the last outcome sink closes the stream, which is the
//!    only termination signal the aggregator acts on
//! 6. **Drain**: Final snapshots are rendered and the report set is returned
//!
//! ## Failure Isolation
//!
//! A handler that fails to initialize aborts only its own worker. Failed
//! requests are recorded as failed outcome events by the handler and never
//! stop a worker. There is no run-level deadline: a stuck request stalls its
//! worker, and with it the end of the run.

use crate::{
    aggregator::{spawn_pipeline, WallClock},
    cli::Args,
    handler::{OutcomeSink, RequestHandler, Target},
    results::{stdout_output, MessageTypeRegistry, OutputFn, Report, ReportRenderer},
    utils::generate_run_id,
};
use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinSet;
use tracing::{debug, error, info, info_span, Instrument};

/// Configuration for a load run
///
/// Fixed for the lifetime of a run. All counts may be zero: a run without
/// workers or without requests still completes and returns an empty (or
/// zero-filled) report set.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RunConfig {
    /// Number of concurrent workers
    pub concurrency: usize,

    /// Sequential request attempts performed by each worker
    pub requests_per_worker: usize,

    /// Seconds between periodic snapshots (0 disables them)
    ///
    /// Every periodic report covers the whole run so far, not just the last
    /// interval.
    pub stat_interval_secs: u64,

    /// Capacity of the outcome event stream
    ///
    /// Workers block when the stream is full. A capacity of 0 is treated as 1.
    pub results_buffer_size: usize,

    /// Capacity of the snapshot stream feeding the report renderer
    pub snapshot_buffer_size: usize,

    /// Leave percentiles whose latency is zero out of the distribution table
    pub omit_zero_percentiles: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            concurrency: crate::defaults::CONCURRENCY,
            requests_per_worker: crate::defaults::REQUESTS_PER_WORKER,
            stat_interval_secs: 0,
            results_buffer_size: crate::defaults::RESULTS_BUFFER_SIZE,
            snapshot_buffer_size: crate::defaults::SNAPSHOT_BUFFER_SIZE,
            omit_zero_percentiles: true,
        }
    }
}

impl RunConfig {
    /// Configuration with default buffering and no periodic snapshots
    pub fn simple(concurrency: usize, requests_per_worker: usize) -> Self {
        Self {
            concurrency,
            requests_per_worker,
            ..Self::default()
        }
    }

    /// Create run configuration from CLI arguments
    pub fn from_args(args: &Args) -> Self {
        Self {
            concurrency: args.concurrency,
            requests_per_worker: args.requests,
            stat_interval_secs: args.stat_interval,
            results_buffer_size: args.buffer_size,
            snapshot_buffer_size: crate::defaults::SNAPSHOT_BUFFER_SIZE,
            omit_zero_percentiles: !args.keep_zero_percentiles,
        }
    }
}

/// Load runner that coordinates workers and statistics collection
///
/// The runner owns the pieces that must be settled before a run starts: the
/// message type registry and the output destination for rendered reports.
///
/// ## Usage Pattern
///
/// ```rust,no_run
/// # use kite_bench::{BenchmarkRunner, RunConfig, SimulatedHandler, Target};
/// # use std::time::Duration;
/// #
/// # #[tokio::main]
/// # async fn main() -> anyhow::Result<()> {
/// let runner = BenchmarkRunner::new();
/// let reports = runner
///     .run(&RunConfig::simple(4, 100), &Target::new("sim"), || {
///         SimulatedHandler::new(Duration::from_millis(2))
///     })
///     .await?;
/// println!("{} keys measured", reports.len());
/// # Ok(())
/// # }
/// ```
pub struct BenchmarkRunner {
    registry: MessageTypeRegistry,
    output: OutputFn,
}

impl Default for BenchmarkRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl BenchmarkRunner {
    /// Create a runner rendering to standard output
    pub fn new() -> Self {
        Self {
            registry: MessageTypeRegistry::default(),
            output: stdout_output(),
        }
    }

    /// Replace the destination of rendered report text
    pub fn redirect_output(&mut self, output: OutputFn) {
        self.output = output;
    }

    pub fn registry(&self) -> &MessageTypeRegistry {
        &self.registry
    }

    /// Give a message type tag a display name for rendered reports
    pub fn register_message_type(
        &mut self,
        message_type: crate::handler::MessageType,
        name: impl Into<String>,
    ) {
        self.registry.register(message_type, name);
    }

    /// Run a load test and return the final report of every key observed
    ///
    /// `new_handler` is called once per worker, on that worker's own task.
    /// Reports are ordered by message type and then method.
    ///
    /// ## Returns
    /// - `Ok(Vec<Report>)`: One report per key, empty when nothing ran
    /// - `Err(anyhow::Error)`: The statistics pipeline itself failed
    pub async fn run<F, H>(
        &self,
        config: &RunConfig,
        target: &Target,
        new_handler: F,
    ) -> Result<Vec<Report>>
    where
        F: Fn() -> H + Send + Sync + 'static,
        H: RequestHandler + 'static,
    {
        let run_id = generate_run_id();
        let span = info_span!("run", id = %run_id);

        async move {
            info!(
                "Starting run against {}: {} workers x {} requests",
                target.url, config.concurrency, config.requests_per_worker
            );
            let started = Instant::now();

            let renderer = ReportRenderer::new(
                config.concurrency,
                config.omit_zero_percentiles,
                Arc::new(self.registry.clone()),
                self.output.clone(),
            );
            let (sink, pipeline) = spawn_pipeline(config, WallClock::start(), renderer);

            let new_handler = Arc::new(new_handler);
            let mut workers = JoinSet::new();
            for worker_id in 0..config.concurrency {
                workers.spawn(
                    run_worker(
                        worker_id,
                        new_handler.clone(),
                        target.clone(),
                        sink.clone(),
                        config.requests_per_worker,
                    )
                    .in_current_span(),
                );
            }

            // Workers hold the only remaining sinks; the stream closes once they exit
            drop(sink);

            while let Some(joined) = workers.join_next().await {
                if let Err(e) = joined {
                    error!("Worker task failed: {}", e);
                }
            }
            debug!("All workers finished after {:?}", started.elapsed());

            let reports = pipeline
                .await
                .context("Statistics pipeline task failed")?;
            info!(
                "Run finished in {:?} with {} report(s)",
                started.elapsed(),
                reports.len()
            );
            Ok(reports)
        }
        .instrument(span)
        .await
    }

    /// Run with default buffering and no periodic snapshots
    pub async fn run_with_simple_args<F, H>(
        &self,
        target_url: &str,
        concurrency: usize,
        requests_per_worker: usize,
        new_handler: F,
    ) -> Result<Vec<Report>>
    where
        F: Fn() -> H + Send + Sync + 'static,
        H: RequestHandler + 'static,
    {
        let config = RunConfig::simple(concurrency, requests_per_worker);
        self.run(&config, &Target::new(target_url), new_handler).await
    }
}

/// Build one handler and drive it through its whole lifecycle
///
/// `release` is called exactly once, whether or not `init` succeeded.
async fn run_worker<F, H>(
    worker_id: usize,
    new_handler: Arc<F>,
    target: Target,
    sink: OutcomeSink,
    requests: usize,
) where
    F: Fn() -> H,
    H: RequestHandler,
{
    let mut handler = new_handler();
    if let Err(e) = handler.init(&target, sink).await {
        error!(
            "Worker {} failed to initialize {} handler for {}: {}",
            worker_id,
            handler.name(),
            target.url,
            e
        );
        handler.release().await;
        return;
    }

    for _ in 0..requests {
        if let Err(e) = handler.on_request().await {
            debug!("Worker {} request to {} failed: {}", worker_id, target.url, e);
        }
    }

    handler.release().await;
    debug!("Worker {} finished {} requests", worker_id, requests);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::SimulatedHandler;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    fn quiet_runner() -> BenchmarkRunner {
        let mut runner = BenchmarkRunner::new();
        runner.redirect_output(Arc::new(|_: &str| {}));
        runner
    }

    #[test]
    fn test_run_config_simple() {
        let config = RunConfig::simple(20, 50);
        assert_eq!(config.concurrency, 20);
        assert_eq!(config.requests_per_worker, 50);
        assert_eq!(config.stat_interval_secs, 0);
        assert_eq!(config.results_buffer_size, 1024);
        assert_eq!(config.snapshot_buffer_size, 256);
        assert!(config.omit_zero_percentiles);
    }

    #[tokio::test]
    async fn test_run_counts_every_attempt() {
        let runner = quiet_runner();
        let reports = runner
            .run(&RunConfig::simple(5, 7), &Target::new("sim"), || {
                SimulatedHandler::scripted(vec![Duration::from_millis(1)])
            })
            .await
            .unwrap();

        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].success_count, 35);
        assert_eq!(reports[0].failure_count, 0);
        assert_eq!(reports[0].concurrency, 5);
    }

    #[tokio::test]
    async fn test_zero_concurrency_returns_no_reports() {
        let runner = quiet_runner();
        let reports = runner
            .run(&RunConfig::simple(0, 10), &Target::new("sim"), || {
                SimulatedHandler::scripted(vec![])
            })
            .await
            .unwrap();
        assert!(reports.is_empty());
    }

    #[tokio::test]
    async fn test_init_failure_isolated_and_released() {
        let runner = quiet_runner();
        let releases = Arc::new(AtomicUsize::new(0));
        let spawned = Arc::new(AtomicUsize::new(0));

        let counter = releases.clone();
        let reports = runner
            .run(&RunConfig::simple(4, 3), &Target::new("sim"), move || {
                let handler = SimulatedHandler::scripted(vec![Duration::from_millis(2)])
                    .track_releases(counter.clone());
                if spawned.fetch_add(1, Ordering::SeqCst) == 0 {
                    handler.failing_init()
                } else {
                    handler
                }
            })
            .await
            .unwrap();

        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].success_count, 9);
        assert_eq!(releases.load(Ordering::SeqCst), 4);
    }

    tokio::task_local! {
        static COORDINATOR: ();
    }

    #[tokio::test]
    async fn test_handlers_are_built_on_worker_tasks() {
        let runner = quiet_runner();
        let built = Arc::new(AtomicUsize::new(0));
        let off_coordinator = Arc::new(AtomicUsize::new(0));

        let (counter, outside) = (built.clone(), off_coordinator.clone());
        let (config, target) = (RunConfig::simple(3, 2), Target::new("sim"));
        let run = runner.run(&config, &target, move || {
            counter.fetch_add(1, Ordering::SeqCst);
            // Spawned tasks do not inherit the coordinator's task-local scope
            if COORDINATOR.try_with(|_| ()).is_err() {
                outside.fetch_add(1, Ordering::SeqCst);
            }
            SimulatedHandler::scripted(vec![Duration::from_millis(1)])
        });
        let reports = COORDINATOR.scope((), run).await.unwrap();

        assert_eq!(reports[0].success_count, 6);
        assert_eq!(built.load(Ordering::SeqCst), 3);
        assert_eq!(off_coordinator.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_redirected_output_receives_final_report() {
        let mut runner = BenchmarkRunner::new();
        let captured = Arc::new(Mutex::new(String::new()));
        let sink = captured.clone();
        runner.redirect_output(Arc::new(move |text: &str| {
            sink.lock().unwrap().push_str(text);
        }));
        runner.register_message_type(crate::handler::MessageType(9), "custom");

        runner
            .run_with_simple_args("sim", 1, 2, || {
                SimulatedHandler::scripted(vec![Duration::from_millis(4)])
                    .with_key(crate::handler::MessageType(9), "op")
            })
            .await
            .unwrap();

        let text = captured.lock().unwrap();
        assert!(text.contains("[final] ==> message type | method : custom | op"));
    }
}
