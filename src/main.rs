//! # Kite Bench - Main Entry Point
//!
//! Command-line front end of the load harness:
//!
//! 1. **Initialize logging**: console or file, level from `RUST_LOG`/`--verbose`
//! 2. **Parse arguments**: target, concurrency, request count, intervals
//! 3. **Run**: TCP echo handlers against the target, or simulated handlers
//!    with `--simulate`
//! 4. **Summarize**: extra high-resolution percentiles per key, optional JSON

use anyhow::Result;
use clap::Parser;
use kite_bench::{
    cli::Args,
    metrics::high_resolution_percentiles,
    utils::{format_bytes, format_duration, format_rate, format_request_rate},
    BenchmarkRunner, MessageTypeRegistry, Report, RunConfig, SimulatedHandler, Target,
    TcpEchoHandler,
};
use std::time::Instant;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let _log_guard = kite_bench::logging::init_logging(args.verbose, args.log_file.as_deref())?;

    info!("Starting Kite Bench v{}", kite_bench::VERSION);
    info!("Configuration: {:?}", args);

    let config = RunConfig::from_args(&args);
    let target = Target::new(args.target.as_str());
    let runner = BenchmarkRunner::new();
    let started = Instant::now();

    let reports = match args.simulate {
        Some(latency) => {
            runner
                .run(&config, &target, move || SimulatedHandler::new(latency))
                .await?
        }
        None => {
            let (payload_size, timeout) = (args.payload_size, args.timeout);
            runner
                .run(&config, &target, move || {
                    TcpEchoHandler::new(payload_size, timeout)
                })
                .await?
        }
    };

    if reports.is_empty() {
        warn!("No requests were recorded");
    }
    for report in &reports {
        print_summary(report, runner.registry(), &args.percentiles);
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&reports)?);
    }

    info!("Run completed in {}", format_duration(started.elapsed()));
    Ok(())
}

fn print_summary(report: &Report, registry: &MessageTypeRegistry, percentiles: &[f64]) {
    println!(
        "{} | {}: {} ok, {} failed, {}, {} received ({})",
        registry.name(report.key.message_type),
        report.key.method,
        report.success_count,
        report.failure_count,
        format_request_rate(report.qps),
        format_bytes(report.received_bytes),
        format_rate(report.bytes_per_sec as f64),
    );

    match high_resolution_percentiles(&report.latencies_ms, percentiles) {
        Ok(values) => {
            for value in values {
                println!("  p{:<6} {:>10.3}ms", value.percentile, value.value_ms);
            }
        }
        Err(e) => warn!("Could not compute percentiles for {}: {}", report.key.method, e),
    }
}
