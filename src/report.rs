//! Derivation of final statistics and the textual report.
//!
//! Histograms are treated as weighted samples: the mean and standard
//! deviation weight each key by its count, and the count starts at one so the
//! derivations stay defined on an empty histogram. RPS samples may contain
//! non-finite keys (a drained tick of zero width); those are skipped here.

use std::io::{self, Write};
use std::time::Duration;

use serde::Serialize;

use crate::config::{Config, TerminationSpec};
use crate::errors::ErrorAggregator;
use crate::metrics::StatusCounters;

pub const DEFAULT_PERCENTILES: [f64; 4] = [50.0, 75.0, 90.0, 99.0];

/// Everything the printer needs, derived once after a bombardment.
#[derive(Debug, Clone, Serialize)]
pub struct Summary {
    pub rps_mean: f64,
    pub rps_stddev: f64,
    pub rps_max: f64,
    pub latency_mean_us: f64,
    pub latency_stddev_us: f64,
    pub latency_max_us: u64,
    /// `(percentile, latency in microseconds)` for [`DEFAULT_PERCENTILES`].
    pub latency_percentiles: Vec<(f64, u64)>,
    pub req1xx: u64,
    pub req2xx: u64,
    pub req3xx: u64,
    pub req4xx: u64,
    pub req5xx: u64,
    pub others: u64,
    /// Descending by count.
    pub errors: Vec<(String, u64)>,
    pub bytes_read: i64,
    pub bytes_written: i64,
    pub elapsed: Duration,
}

impl Summary {
    pub fn compute(
        latencies: &[(u64, u64)],
        rps: &[(f64, u64)],
        status: &StatusCounters,
        errors: &ErrorAggregator,
        bytes_read: i64,
        bytes_written: i64,
        elapsed: Duration,
    ) -> Self {
        let (rps_mean, rps_stddev, rps_max) = float_stats(rps);
        let (latency_mean_us, latency_stddev_us, latency_max_us) = uint_stats(latencies);
        let latency_percentiles = DEFAULT_PERCENTILES
            .iter()
            .map(|&p| (p, percentile(latencies, p)))
            .collect();

        Self {
            rps_mean,
            rps_stddev,
            rps_max,
            latency_mean_us,
            latency_stddev_us,
            latency_max_us,
            latency_percentiles,
            req1xx: status.get(1),
            req2xx: status.get(2),
            req3xx: status.get(3),
            req4xx: status.get(4),
            req5xx: status.get(5),
            others: status.get(0),
            errors: errors.by_frequency(),
            bytes_read,
            bytes_written,
            elapsed,
        }
    }

    /// Total bytes transferred per second over the whole test.
    pub fn throughput(&self) -> f64 {
        let seconds = self.elapsed.as_secs_f64();
        if seconds == 0.0 {
            return 0.0;
        }
        (self.bytes_read + self.bytes_written) as f64 / seconds
    }
}

/// The latency value at percentile `p`: sort the distinct keys, find the rank
/// `floor(p/100 * total + 0.5)`, and return the first key whose cumulative
/// count reaches it. Zero when the histogram is empty.
pub fn percentile(pairs: &[(u64, u64)], p: f64) -> u64 {
    let mut keys = pairs.to_vec();
    keys.sort_unstable_by_key(|&(k, _)| k);
    let total: u64 = keys.iter().map(|&(_, c)| c).sum();
    let rank = ((p / 100.0) * total as f64 + 0.5) as u64;

    let mut cumulative = 0u64;
    for (key, count) in keys {
        cumulative += count;
        if cumulative >= rank {
            return key;
        }
    }
    0
}

fn uint_stats(pairs: &[(u64, u64)]) -> (f64, f64, u64) {
    let mut sum = 0.0;
    let mut count = 1u64;
    let mut max = 0u64;
    for &(key, c) in pairs {
        sum += key as f64 * c as f64;
        count += c;
        max = max.max(key);
    }
    let mean = sum / count as f64;

    let mut sum_of_squares = 0.0;
    for &(key, c) in pairs {
        sum_of_squares += c as f64 * (key as f64 - mean).powi(2);
    }
    (mean, (sum_of_squares / count as f64).sqrt(), max)
}

fn float_stats(pairs: &[(f64, u64)]) -> (f64, f64, f64) {
    let mut sum = 0.0;
    let mut count = 1u64;
    let mut max = 0.0f64;
    for &(key, c) in pairs {
        if !key.is_finite() {
            continue;
        }
        sum += key * c as f64;
        count += c;
        max = max.max(key);
    }
    let mean = sum / count as f64;

    let mut sum_of_squares = 0.0;
    for &(key, c) in pairs {
        if !key.is_finite() {
            continue;
        }
        sum_of_squares += c as f64 * (key - mean).powi(2);
    }
    (mean, (sum_of_squares / count as f64).sqrt(), max)
}

/// Microseconds with unit scaling: `842.00us`, `1.24ms`, `2.05s`.
pub fn format_time_us(us: f64) -> String {
    if us >= 1_000_000.0 {
        format!("{:.2}s", us / 1_000_000.0)
    } else if us >= 1_000.0 {
        format!("{:.2}ms", us / 1_000.0)
    } else {
        format!("{us:.2}us")
    }
}

/// Binary-prefixed bytes: `512.00B`, `1.50KiB`, `3.22MiB`.
pub fn format_binary(value: f64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = value;
    let mut unit = 0;
    while value.abs() >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{value:.2}{}", UNITS[unit])
}

pub fn print_intro(out: &mut impl Write, config: &Config) -> io::Result<()> {
    match config.termination {
        TerminationSpec::Counted(count) => writeln!(
            out,
            "Bombarding {} with {} request(s) using {} connection(s)",
            config.url, count, config.connections
        ),
        TerminationSpec::Timed(duration) => writeln!(
            out,
            "Bombarding {} for {:?} using {} connection(s)",
            config.url, duration, config.connections
        ),
    }
}

/// Machine-readable rendering of the summary.
pub fn print_json(out: &mut impl Write, summary: &Summary) -> io::Result<()> {
    let rendered = serde_json::to_string_pretty(summary).map_err(io::Error::other)?;
    writeln!(out, "{rendered}")
}

pub fn print(out: &mut impl Write, summary: &Summary, print_latencies: bool) -> io::Result<()> {
    writeln!(
        out,
        "{:>10} {:>10} {:>10} {:>10}",
        "Statistics", "Avg", "Stdev", "Max"
    )?;
    writeln!(
        out,
        "  {:<10} {:>10.2} {:>10.2} {:>10.2}",
        "Reqs/sec", summary.rps_mean, summary.rps_stddev, summary.rps_max
    )?;
    writeln!(
        out,
        "  {:<10} {:>10} {:>10} {:>10}",
        "Latency",
        format_time_us(summary.latency_mean_us),
        format_time_us(summary.latency_stddev_us),
        format_time_us(summary.latency_max_us as f64)
    )?;
    if print_latencies {
        writeln!(out, "  Latency Distribution")?;
        for &(p, value) in &summary.latency_percentiles {
            writeln!(out, "     {:2.0}% {:>10}", p, format_time_us(value as f64))?;
        }
    }
    writeln!(out, "  HTTP codes:")?;
    writeln!(
        out,
        "    1xx - {}, 2xx - {}, 3xx - {}, 4xx - {}, 5xx - {}",
        summary.req1xx, summary.req2xx, summary.req3xx, summary.req4xx, summary.req5xx
    )?;
    writeln!(out, "    others - {}", summary.others)?;
    if !summary.errors.is_empty() {
        writeln!(out, "  Errors:")?;
        for (description, count) in &summary.errors {
            writeln!(out, "    {description:>10} - {count}")?;
        }
    }
    writeln!(
        out,
        "  {:<11} {:>10}/s",
        "Throughput:",
        format_binary(summary.throughput())
    )
}
