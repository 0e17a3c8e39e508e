//! # Kite Bench Library
//!
//! A protocol-agnostic load generation and statistics harness. A run drives a
//! configurable number of concurrent workers against a pluggable request
//! handler, collects one outcome record per request attempt, and produces
//! aggregate reports (throughput, latency distribution, error breakdown)
//! periodically during the run and once at the end.
//!
//! ## Architecture Overview
//!
//! Three concurrency domains connected by bounded, one-directional queues:
//!
//! - **Workers** (`benchmark`): one task per unit of concurrency, each driving
//!   its own [`RequestHandler`] through a fixed number of sequential requests
//! - **Aggregator** (`aggregator`): the single owner of all per-key statistics,
//!   consuming outcome events and timer ticks on one task
//! - **Report renderer** (`results`): turns snapshots into reports and rendered
//!   tables without slowing down aggregation
//!
//! Supporting modules:
//!
//! - `handler`: the handler capability plus TCP echo and simulated handlers
//! - `metrics`: latency histogram and percentile computations
//! - `cli`, `logging`, `utils`: command-line front end helpers
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use kite_bench::{BenchmarkRunner, RunConfig, Target, TcpEchoHandler};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = RunConfig {
//!         concurrency: 8,
//!         requests_per_worker: 1000,
//!         stat_interval_secs: 5,
//!         ..RunConfig::default()
//!     };
//!
//!     let runner = BenchmarkRunner::new();
//!     let reports = runner
//!         .run(&config, &Target::new("127.0.0.1:7000"), || {
//!             TcpEchoHandler::new(64, Duration::from_secs(5))
//!         })
//!         .await?;
//!
//!     for report in &reports {
//!         println!("{}: {:.2} qps", report.key.method, report.qps);
//!     }
//!     Ok(())
//! }
//! ```

/// Statistics aggregation: per-key records, snapshots, and the event loop
/// that owns them
pub mod aggregator;

/// Load coordination
///
/// Contains `RunConfig` and `BenchmarkRunner`, which spawn the workers, start
/// the statistics pipeline, and collect the final reports.
pub mod benchmark;

/// Command-line interface and configuration
pub mod cli;

/// Request handler abstraction and built-in handlers
///
/// The `RequestHandler` trait is the seam between the engine and a protocol.
/// Each handler emits one `OutcomeEvent` per request attempt through the
/// `OutcomeSink` it receives on initialization.
pub mod handler;

pub mod logging;

/// Latency histogram and percentile computations
pub mod metrics;

/// Reports, the report renderer, and message type display names
pub mod results;

pub mod utils;

pub use benchmark::{BenchmarkRunner, RunConfig};

pub use cli::Args;

pub use handler::{
    HandlerError, MessageType, OutcomeEvent, OutcomeSink, RequestHandler, SimulatedHandler,
    Target, TcpEchoHandler,
};

pub use metrics::{LatencyBucket, LatencyDistribution};

pub use results::{MessageTypeRegistry, OutputFn, Report};

/// The current version of the harness
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default configuration values
pub mod defaults {
    /// Default target address for the TCP echo handler
    pub const TARGET: &str = "127.0.0.1:8080";

    /// Default number of concurrent workers
    pub const CONCURRENCY: usize = 20;

    /// Default number of requests per worker
    pub const REQUESTS_PER_WORKER: usize = 50;

    /// Default capacity of the outcome event queue
    pub const RESULTS_BUFFER_SIZE: usize = 1024;

    /// Default capacity of the snapshot queue feeding the renderer
    pub const SNAPSHOT_BUFFER_SIZE: usize = 256;

    /// Default echo payload size in bytes
    pub const PAYLOAD_SIZE: usize = 64;
}
