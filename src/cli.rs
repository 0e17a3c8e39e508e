use crate::handler::tcp_echo::MAX_FRAME_LEN;
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

/// Kite Bench - drive concurrent load at a target and report latency statistics
#[derive(Parser, Debug, Clone)]
#[clap(version, about, long_about = None)]
pub struct Args {
    /// Target address (host:port or tcp://host:port)
    #[clap(short = 't', long, default_value = crate::defaults::TARGET, help_heading = "Core Options")]
    pub target: String,

    /// Number of concurrent workers
    #[clap(short = 'c', long, default_value_t = crate::defaults::CONCURRENCY, help_heading = "Core Options")]
    pub concurrency: usize,

    /// Requests performed sequentially by each worker
    #[clap(short = 'n', long, default_value_t = crate::defaults::REQUESTS_PER_WORKER, help_heading = "Core Options")]
    pub requests: usize,

    /// Seconds between periodic reports (0 reports only at the end)
    #[clap(long, default_value_t = 0)]
    pub stat_interval: u64,

    /// Capacity of the outcome event queue
    #[clap(long, default_value_t = crate::defaults::RESULTS_BUFFER_SIZE)]
    pub buffer_size: usize,

    /// Payload size in bytes of each echo request
    #[clap(short = 's', long, default_value_t = crate::defaults::PAYLOAD_SIZE, value_parser = parse_payload_size)]
    pub payload_size: usize,

    /// Connect and request timeout (e.g. "500ms", "5s")
    #[clap(long, default_value = "5s", value_parser = parse_duration)]
    pub timeout: Duration,

    /// Use a simulated handler with this fixed latency instead of the network
    #[clap(long, value_parser = parse_duration)]
    pub simulate: Option<Duration>,

    /// Additional high-resolution percentiles printed after the run
    #[clap(long, num_args = 1.., default_values_t = vec![99.9])]
    pub percentiles: Vec<f64>,

    /// Print the final reports as JSON
    #[clap(long, default_value_t = false)]
    pub json: bool,

    /// Keep percentiles with zero latency in the distribution table
    #[clap(long, default_value_t = false)]
    pub keep_zero_percentiles: bool,

    /// Write logs to this file instead of the console
    #[clap(long)]
    pub log_file: Option<PathBuf>,

    /// Verbose logging
    #[clap(short = 'v', long, default_value_t = false)]
    pub verbose: bool,
}

/// Parse duration from string (e.g., "10s", "5m", "1h")
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();

    if s.is_empty() {
        return Err("Duration cannot be empty".to_string());
    }

    let (num_str, unit) = if let Some(stripped) = s.strip_suffix("ms") {
        (stripped, "ms")
    } else if let Some(stripped) = s.strip_suffix('s') {
        (stripped, "s")
    } else if let Some(stripped) = s.strip_suffix('m') {
        (stripped, "m")
    } else if let Some(stripped) = s.strip_suffix('h') {
        (stripped, "h")
    } else {
        (s, "s") // Default to seconds
    };

    let num: f64 = num_str
        .parse()
        .map_err(|_| format!("Invalid number in duration: {}", num_str))?;
    if !num.is_finite() || num < 0.0 {
        return Err(format!("Duration must be a non-negative number: {}", s));
    }

    let nanos_per_unit = match unit {
        "ms" => 1e6,
        "s" => 1e9,
        "m" => 60.0 * 1e9,
        "h" => 3600.0 * 1e9,
        _ => return Err(format!("Invalid duration unit: {}", unit)),
    };
    let duration = Duration::from_nanos((num * nanos_per_unit).round() as u64);

    Ok(duration)
}

/// Parse a payload size, bounded by the echo frame limit
pub fn parse_payload_size(s: &str) -> Result<usize, String> {
    let size: usize = s
        .trim()
        .parse()
        .map_err(|_| format!("Invalid payload size: {}", s))?;
    if size > MAX_FRAME_LEN {
        return Err(format!(
            "Payload size {} exceeds the {} byte frame limit",
            size, MAX_FRAME_LEN
        ));
    }
    Ok(size)
}
