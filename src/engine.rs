//! The bombardment engine: wiring and orchestration of one run.
//!
//! [`Barrage`] owns everything a run needs: the completion barrier, the rate
//! limiter, one transport per connection slot, and the statistics
//! accumulators. [`Barrage::bombard`] then drives the run:
//!
//! 1. Capture the start instant.
//! 2. Spawn one worker per connection. Each worker loops: reserve a unit of
//!    work on the barrier, let the limiter pace it, perform one request,
//!    record the outcome, report the unit done.
//! 3. Spawn the two observers: the rate meter, which periodically drains the
//!    shared request counter into the RPS histogram, and the progress
//!    reporter, which pulls the barrier's completion ratio.
//! 4. Join all workers, record the elapsed time, then let the observers
//!    drain and join them too.
//!
//! Work distribution is self-scheduled: there is no queue and no stealing,
//! just N workers racing `try_grab_work` on the barrier. Cancellation is
//! cooperative: an external `cancel()` flips the done signal, workers finish
//! at most one in-flight request each, and the observers take one last sample
//! on the way out. Statistics for every completed request are visible by the
//! time `bombard` returns.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use anyhow::Context;
use bytes::Bytes;
use futures::future::join_all;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use crate::barrier::CompletionBarrier;
use crate::client::{Client, PooledClient, build_transport};
use crate::config::{Config, TerminationSpec};
use crate::errors::ErrorAggregator;
use crate::factory::{BodySource, FactorySource, FixedFactory, RequestFactory, RequestPlan};
use crate::histogram::{FloatHistogram, UintHistogram};
use crate::limiter::{Pace, RATE_LIMIT_INTERVAL, RateLimiter, estimate};
use crate::metrics::{ByteMeters, StatsRecorder, StatusCounters};
use crate::progress::ProgressSink;
use crate::report::Summary;
use crate::tls;

const PROGRESS_REFRESH: Duration = Duration::from_millis(200);

pub struct Barrage {
    config: Config,
    barrier: Arc<CompletionBarrier>,
    limiter: Arc<RateLimiter>,
    transports: Vec<reqwest::Client>,
    source: FactorySource,
    progress: ProgressSink,

    meters: Arc<ByteMeters>,
    latencies: Arc<UintHistogram>,
    rps_samples: Arc<FloatHistogram>,
    status: Arc<StatusCounters>,
    errors: Arc<ErrorAggregator>,
    requests: Arc<AtomicU64>,
    calls: Arc<AtomicU64>,
    time_taken: Duration,
}

impl std::fmt::Debug for Barrage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Barrage").finish_non_exhaustive()
    }
}

impl Barrage {
    /// Validates the configuration and acquires every startup resource (TLS
    /// identity, transports). Anything that can fail does so here, before a
    /// single request is issued.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(config: Config) -> anyhow::Result<Self> {
        config.validate().context("invalid configuration")?;

        let identity = match &config.cert_path {
            Some(cert) => Some(tls::load_client_identity(cert, config.key_path.as_deref())?),
            None => None,
        };

        let barrier = match config.termination {
            TerminationSpec::Counted(count) => CompletionBarrier::counted(count),
            TerminationSpec::Timed(duration) => CompletionBarrier::timed(duration),
        };
        let limiter = Arc::new(match config.rate {
            Some(rate) => RateLimiter::bucket(rate, barrier.done()),
            None => RateLimiter::unlimited(),
        });

        let transports = (0..config.connections)
            .map(|_| build_transport(&config, identity.clone()))
            .collect::<anyhow::Result<Vec<_>>>()?;
        let source = fixed_source(&config)?;

        Ok(Self {
            config,
            barrier,
            limiter,
            transports,
            source,
            progress: ProgressSink::hidden(),
            meters: Arc::new(ByteMeters::default()),
            latencies: Arc::new(UintHistogram::new()),
            rps_samples: Arc::new(FloatHistogram::new()),
            status: Arc::new(StatusCounters::default()),
            errors: Arc::new(ErrorAggregator::new()),
            requests: Arc::new(AtomicU64::new(0)),
            calls: Arc::new(AtomicU64::new(0)),
            time_taken: Duration::ZERO,
        })
    }

    /// Replaces the per-worker request factory source, e.g. with one backed
    /// by a scripting runtime binding.
    pub fn with_request_source(mut self, source: FactorySource) -> Self {
        self.source = source;
        self
    }

    pub fn with_progress(mut self, progress: ProgressSink) -> Self {
        self.progress = progress;
        self
    }

    /// Handle for external cancellation (the signal task calls
    /// `barrier().cancel()`).
    pub fn barrier(&self) -> Arc<CompletionBarrier> {
        Arc::clone(&self.barrier)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Runs the bombardment to completion. One-shot: the transports are moved
    /// into their workers.
    pub async fn bombard(&mut self) {
        let requests_interval = match self.config.rate {
            Some(rate) => estimate(rate, RATE_LIMIT_INTERVAL).0,
            None => Duration::from_millis(10),
        } + Duration::from_millis(10);

        tracing::info!(
            url = %self.config.url,
            connections = self.config.connections,
            "starting bombardment"
        );
        let t0 = Instant::now();

        let recorder = StatsRecorder {
            latencies: Arc::clone(&self.latencies),
            requests: Arc::clone(&self.requests),
            status: Arc::clone(&self.status),
            errors: Arc::clone(&self.errors),
        };
        let transports = std::mem::take(&mut self.transports);
        let mut workers = Vec::with_capacity(transports.len());
        for transport in transports {
            let client = PooledClient::new(
                transport,
                (self.source)(),
                self.config.timeout,
                Arc::clone(&self.meters),
                Arc::clone(&self.calls),
            );
            workers.push(tokio::spawn(worker_loop(
                client,
                Arc::clone(&self.barrier),
                Arc::clone(&self.limiter),
                recorder.clone(),
            )));
        }

        let (workers_done_tx, workers_done_rx) = watch::channel(false);
        let meter = tokio::spawn(rate_meter(
            Arc::clone(&self.requests),
            Arc::clone(&self.rps_samples),
            requests_interval,
            self.barrier.done(),
            workers_done_rx,
        ));
        let reporter = tokio::spawn(progress_reporter(
            Arc::clone(&self.barrier),
            self.progress.clone(),
        ));

        for result in join_all(workers).await {
            if let Err(err) = result {
                tracing::error!("worker task failed: {err}");
            }
        }
        self.time_taken = t0.elapsed();
        let _ = workers_done_tx.send(true);

        let _ = meter.await;
        let _ = reporter.await;
        tracing::info!(elapsed = ?self.time_taken, "bombardment finished");
    }

    pub fn time_taken(&self) -> Duration {
        self.time_taken
    }

    pub fn bytes_read(&self) -> i64 {
        self.meters.read.load(Ordering::Relaxed)
    }

    pub fn bytes_written(&self) -> i64 {
        self.meters.written.load(Ordering::Relaxed)
    }

    pub fn status_count(&self, class: u16) -> u64 {
        self.status.get(class)
    }

    pub fn error_sum(&self) -> u64 {
        self.errors.sum()
    }

    pub fn summary(&self) -> Summary {
        Summary::compute(
            &self.latencies.snapshot(),
            &self.rps_samples.snapshot(),
            &self.status,
            &self.errors,
            self.bytes_read(),
            self.bytes_written(),
            self.time_taken,
        )
    }
}

/// Default factory source: every worker gets a factory that repeats the
/// configured request. Resolves the body once here; when streaming is
/// requested, file-backed bodies are instead re-opened per call.
fn fixed_source(config: &Config) -> anyhow::Result<FactorySource> {
    let body = if config.stream_body {
        match (&config.body_file, &config.body) {
            (Some(path), _) => BodySource::File(path.clone()),
            (None, Some(text)) => BodySource::Bytes(Bytes::from(text.clone())),
            (None, None) => BodySource::empty(),
        }
    } else if let Some(path) = &config.body_file {
        let bytes = std::fs::read(path)
            .with_context(|| format!("failed to read body file {}", path.display()))?;
        BodySource::Bytes(Bytes::from(bytes))
    } else {
        BodySource::Bytes(Bytes::from(config.body.clone().unwrap_or_default()))
    };

    let plan = RequestPlan {
        method: config.method.clone(),
        url: config.url.clone(),
        headers: config.headers.clone(),
        body,
    };
    Ok(Arc::new(move || {
        Box::new(FixedFactory::new(plan.clone())) as Box<dyn RequestFactory>
    }))
}

async fn worker_loop<C: Client>(
    mut client: C,
    barrier: Arc<CompletionBarrier>,
    limiter: Arc<RateLimiter>,
    recorder: StatsRecorder,
) {
    let mut done = barrier.done();
    while barrier.try_grab_work() {
        if limiter.pace(&mut done).await == Pace::Break {
            break;
        }
        let outcome = client.execute().await;
        recorder.record(outcome.status, outcome.elapsed_us, outcome.error.as_deref());
        barrier.job_done();
    }
}

/// Samples the shared request counter into the RPS histogram on a fixed
/// cadence. On done it waits for the workers to drain so the final sample
/// covers every recorded request, takes it, and exits.
async fn rate_meter(
    requests: Arc<AtomicU64>,
    samples: Arc<FloatHistogram>,
    period: Duration,
    mut done: crate::barrier::DoneSignal,
    mut workers_done: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await; // the first tick is immediate
    let mut last = Instant::now();
    loop {
        tokio::select! {
            _ = ticker.tick() => record_rps(&requests, &samples, &mut last),
            _ = done.wait() => {
                let _ = workers_done.wait_for(|drained| *drained).await;
                record_rps(&requests, &samples, &mut last);
                return;
            }
        }
    }
}

fn record_rps(requests: &AtomicU64, samples: &FloatHistogram, last: &mut Instant) {
    let count = requests.swap(0, Ordering::AcqRel);
    let elapsed = last.elapsed();
    *last = Instant::now();
    samples.increment(count as f64 / elapsed.as_secs_f64());
}

async fn progress_reporter(barrier: Arc<CompletionBarrier>, sink: ProgressSink) {
    let mut done = barrier.done();
    loop {
        tokio::select! {
            _ = done.wait() => {
                sink.update(1.0);
                sink.finish();
                return;
            }
            _ = tokio::time::sleep(PROGRESS_REFRESH) => sink.update(barrier.completed()),
        }
    }
}
