//! Request pacing: a token bucket, or nothing at all.
//!
//! The bucket variant separates rate generation from work execution: a
//! governor task refills a semaphore on a fixed cadence and workers claim one
//! permit per request. The refill period is chosen by [`estimate`] so it never
//! ticks faster than every 10ms (which would just burn scheduler wakeups) nor
//! slower than every 500ms (which would make issuance visibly lumpy). Because
//! the tokens owed per tick are rarely integral, the governor carries the
//! fractional remainder across ticks; the long-term average converges on the
//! configured rate.
//!
//! Claimed permits are forgotten rather than released, so the governor is the
//! only source of tokens.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::time::Instant;

use crate::barrier::DoneSignal;

/// Shortest and longest admissible refill cadence.
pub const RATE_LIMIT_INTERVAL: Duration = Duration::from_millis(10);
const MAX_REFILL_INTERVAL: Duration = Duration::from_millis(500);

/// The semaphore implementation reserves 3 bits of usize for flags; cap
/// anything larger to avoid panicking the runtime.
const MAX_TOKENS: usize = usize::MAX >> 3;

/// Outcome of one pacing call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Pace {
    Go,
    Break,
}

/// Picks the refill period and per-period batch for a target rate.
///
/// If single tokens would have to be handed out faster than `adjust_to`
/// allows, tokens are batched onto the `adjust_to` cadence instead. The batch
/// doubles as the bucket's burst capacity.
pub fn estimate(rate: u64, adjust_to: Duration) -> (Duration, u64) {
    let per_token = Duration::from_secs_f64(1.0 / rate as f64);
    if per_token < adjust_to {
        let batch = (rate as f64 * adjust_to.as_secs_f64()).ceil() as u64;
        (adjust_to, batch.max(1))
    } else {
        (per_token.min(MAX_REFILL_INTERVAL), 1)
    }
}

/// Tokens to add for one tick, carrying the fractional remainder forward.
///
/// Returns `(tokens_to_add, next_fractional_part)`.
fn refill_amount(rate: u64, period: Duration, fractional: f64) -> (usize, f64) {
    let owed = rate as f64 * period.as_secs_f64() + fractional;
    let whole = owed.floor();
    let fractional = owed - whole;

    let add = if whole >= MAX_TOKENS as f64 {
        MAX_TOKENS
    } else if whole < 0.0 {
        0
    } else {
        whole as usize
    };
    (add, fractional)
}

pub enum RateLimiter {
    /// Admits every request immediately.
    Unlimited,
    Bucket { tokens: Arc<Semaphore> },
}

impl RateLimiter {
    pub fn unlimited() -> Self {
        RateLimiter::Unlimited
    }

    /// Token bucket refilled at `rate` requests per second. The governor task
    /// exits when the done signal fires.
    ///
    /// Must be called from within a tokio runtime.
    pub fn bucket(rate: u64, done: DoneSignal) -> Self {
        let (period, batch) = estimate(rate, RATE_LIMIT_INTERVAL);
        let capacity = batch as usize;
        let tokens = Arc::new(Semaphore::new(capacity));
        tokio::spawn(refill_task(
            Arc::clone(&tokens),
            rate,
            period,
            capacity,
            done,
        ));
        RateLimiter::Bucket { tokens }
    }

    /// Waits until the next request may be issued. Returns [`Pace::Break`] if
    /// the done signal fires first, so the caller exits without issuing.
    pub async fn pace(&self, done: &mut DoneSignal) -> Pace {
        let tokens = match self {
            RateLimiter::Unlimited => return Pace::Go,
            RateLimiter::Bucket { tokens } => tokens,
        };
        tokio::select! {
            biased;
            _ = done.wait() => Pace::Break,
            permit = Arc::clone(tokens).acquire_owned() => match permit {
                Ok(permit) => {
                    permit.forget();
                    Pace::Go
                }
                Err(_) => Pace::Break,
            },
        }
    }
}

async fn refill_task(
    tokens: Arc<Semaphore>,
    rate: u64,
    period: Duration,
    capacity: usize,
    mut done: DoneSignal,
) {
    let mut fractional = 0.0;
    let mut next_tick = Instant::now() + period;
    loop {
        tokio::select! {
            biased;
            _ = done.wait() => {
                tracing::debug!("rate governor exiting");
                return;
            }
            _ = tokio::time::sleep_until(next_tick) => {}
        }
        next_tick += period;

        let (add, carry) = refill_amount(rate, period, fractional);
        fractional = carry;
        if add > 0 {
            let available = tokens.available_permits();
            if available < capacity {
                tokens.add_permits(add.min(capacity - available));
            }
        }
    }
}
