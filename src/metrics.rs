//! Derived latency metrics
//!
//! Pure functions over an ascending latency sample (milliseconds). Nothing in
//! here keeps state; the renderer calls these on every report it produces.

use anyhow::Result;
use hdrhistogram::Histogram;
use serde::{Deserialize, Serialize};

/// Number of equal-width buckets between the fastest and slowest latency.
/// The slowest latency adds one final mark.
pub const HISTOGRAM_BUCKETS: usize = 10;

/// Percentiles reported in the latency distribution table
pub const DISTRIBUTION_PERCENTILES: [u32; 7] = [10, 25, 50, 75, 90, 95, 99];

/// One histogram mark
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LatencyBucket {
    /// Upper boundary of the bucket in milliseconds
    pub mark: f64,
    /// Samples assigned to this bucket
    pub count: usize,
    /// `count` as a fraction of the whole sample
    pub frequency: f64,
}

/// Latency observed at a given percentile
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LatencyDistribution {
    pub percentage: u32,
    /// Latency in milliseconds
    pub latency: f64,
}

/// Percentile value pair computed from an HDR histogram
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PercentileValue {
    pub percentile: f64,
    pub value_ms: f64,
}

/// Build the latency histogram of an ascending sample.
///
/// `[fastest, slowest]` is split into [`HISTOGRAM_BUCKETS`] equal-width
/// buckets and `slowest` itself is appended as the last mark. Every sample
/// lands on the first mark that is not below it; the last mark takes
/// everything left over. When `fastest == slowest` all samples land in the
/// first bucket. An empty sample yields no buckets.
pub fn latency_histogram(latencies: &[f64], slowest: f64, fastest: f64) -> Vec<LatencyBucket> {
    if latencies.is_empty() {
        return Vec::new();
    }

    let width = (slowest - fastest) / HISTOGRAM_BUCKETS as f64;
    let mut marks: Vec<f64> = (0..HISTOGRAM_BUCKETS)
        .map(|i| fastest + width * i as f64)
        .collect();
    marks.push(slowest);

    let last = marks.len() - 1;
    let mut counts = vec![0usize; marks.len()];
    let mut bucket = 0;
    for &latency in latencies {
        while bucket < last && latency > marks[bucket] {
            bucket += 1;
        }
        counts[bucket] += 1;
    }

    let total = latencies.len() as f64;
    marks
        .into_iter()
        .zip(counts)
        .map(|(mark, count)| LatencyBucket {
            mark,
            count,
            frequency: count as f64 / total,
        })
        .collect()
}

/// Index selected for `percentile` in a sample of `len` values.
///
/// `floor(p * len / 100)`, stepped back by one when the division is exact or
/// runs past the end, and never below zero.
fn percentile_index(percentile: u32, len: usize) -> usize {
    let scaled = percentile as usize * len;
    let index = scaled / 100;
    if scaled % 100 == 0 || index >= len {
        index.saturating_sub(1)
    } else {
        index
    }
}

/// Select the distribution percentiles from an ascending sample.
///
/// With `omit_zero` set, percentiles whose selected latency is not strictly
/// positive are left out of the result.
pub fn latency_distribution(latencies: &[f64], omit_zero: bool) -> Vec<LatencyDistribution> {
    if latencies.is_empty() {
        return Vec::new();
    }

    DISTRIBUTION_PERCENTILES
        .iter()
        .map(|&percentage| LatencyDistribution {
            percentage,
            latency: latencies[percentile_index(percentage, latencies.len())],
        })
        .filter(|entry| !omit_zero || entry.latency > 0.0)
        .collect()
}

/// Arbitrary percentiles (e.g. 99.9) from an HDR histogram at microsecond
/// resolution with 3 significant figures
pub fn high_resolution_percentiles(
    latencies: &[f64],
    percentiles: &[f64],
) -> Result<Vec<PercentileValue>> {
    if latencies.is_empty() {
        return Ok(Vec::new());
    }

    let mut histogram = Histogram::<u64>::new(3)?;
    for &latency in latencies {
        let micros = (latency * 1_000.0).round().max(0.0) as u64;
        histogram.record(micros)?;
    }

    Ok(percentiles
        .iter()
        .map(|&percentile| PercentileValue {
            percentile,
            value_ms: histogram.value_at_percentile(percentile) as f64 / 1_000.0,
        })
        .collect())
}
