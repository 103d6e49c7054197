//! Shared counters maintained on the request hot path.
//!
//! Everything here is written by N workers concurrently and read once at the
//! end of a bombardment (plus the request counter, which the rate meter drains
//! every tick), so all of it is atomics and workers never lock against each
//! other.

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use crate::errors::ErrorAggregator;
use crate::histogram::UintHistogram;

/// Bytes on the wire, split by direction. Clients accumulate into these
/// through shared references; the written side is the client's own estimate
/// of the serialized request, the read side counts response payload bytes.
#[derive(Default)]
pub struct ByteMeters {
    pub written: AtomicI64,
    pub read: AtomicI64,
}

impl ByteMeters {
    pub fn add_written(&self, n: i64) {
        self.written.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_read(&self, n: i64) {
        self.read.fetch_add(n, Ordering::Relaxed);
    }
}

/// One atomic per HTTP status class, plus a bucket for everything else
/// (including status 0, i.e. no response at all).
#[derive(Default)]
pub struct StatusCounters {
    pub req1xx: AtomicU64,
    pub req2xx: AtomicU64,
    pub req3xx: AtomicU64,
    pub req4xx: AtomicU64,
    pub req5xx: AtomicU64,
    pub others: AtomicU64,
}

impl StatusCounters {
    pub fn record(&self, status: u16) {
        let counter = match status / 100 {
            1 => &self.req1xx,
            2 => &self.req2xx,
            3 => &self.req3xx,
            4 => &self.req4xx,
            5 => &self.req5xx,
            _ => &self.others,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get(&self, class: u16) -> u64 {
        let counter = match class {
            1 => &self.req1xx,
            2 => &self.req2xx,
            3 => &self.req3xx,
            4 => &self.req4xx,
            5 => &self.req5xx,
            _ => &self.others,
        };
        counter.load(Ordering::Relaxed)
    }
}

/// Cloneable bundle the workers write each request outcome through.
#[derive(Clone)]
pub struct StatsRecorder {
    pub latencies: Arc<UintHistogram>,
    pub requests: Arc<AtomicU64>,
    pub status: Arc<StatusCounters>,
    pub errors: Arc<ErrorAggregator>,
}

impl StatsRecorder {
    pub fn record(&self, status: u16, elapsed_us: u64, error: Option<&str>) {
        self.latencies.increment(elapsed_us);
        self.requests.fetch_add(1, Ordering::Relaxed);
        self.status.record(status);
        if let Some(description) = error {
            self.errors.add(description);
        }
    }
}
