//! Completion barrier: decides whether more work may start and signals done.
//!
//! A bombardment terminates either after a fixed number of requests (counted)
//! or after a deadline (timed); an external cancel ends either variant early.
//! Workers self-schedule against the barrier: each loop iteration reserves one
//! unit of work with [`CompletionBarrier::try_grab_work`] and reports it back
//! with [`CompletionBarrier::job_done`].
//!
//! The done signal is a one-shot broadcast backed by a `watch` channel. Once
//! set it stays set, and any number of workers and observers can wait on their
//! own clone of the receiver.
//!
//! Hot-path notes: `try_grab_work` is a single compare-and-swap on the issued
//! counter in the counted variant and a deadline load in the timed one;
//! neither takes a lock.

use std::sync::{
    Arc,
    atomic::{AtomicBool, AtomicU64, Ordering},
};
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;

/// Cloneable one-shot signal set exactly when the barrier transitions to done.
#[derive(Clone)]
pub struct DoneSignal {
    rx: watch::Receiver<bool>,
}

impl DoneSignal {
    /// Resolves when the barrier is done. Returns immediately if it already is.
    pub async fn wait(&mut self) {
        // A closed channel means the barrier is gone, which only happens after
        // the bombardment has ended. Treat it as done.
        let _ = self.rx.wait_for(|done| *done).await;
    }

    pub fn is_done(&self) -> bool {
        *self.rx.borrow()
    }
}

enum Termination {
    Counted {
        issued: AtomicU64,
        completed: AtomicU64,
        target: u64,
    },
    Timed {
        started: Instant,
        deadline: Instant,
        duration: Duration,
    },
}

pub struct CompletionBarrier {
    termination: Termination,
    cancelled: AtomicBool,
    done_tx: watch::Sender<bool>,
}

impl CompletionBarrier {
    /// Barrier that admits exactly `target` units of work.
    pub fn counted(target: u64) -> Arc<Self> {
        let (done_tx, _) = watch::channel(false);
        Arc::new(Self {
            termination: Termination::Counted {
                issued: AtomicU64::new(0),
                completed: AtomicU64::new(0),
                target,
            },
            cancelled: AtomicBool::new(false),
            done_tx,
        })
    }

    /// Barrier that admits work until `duration` has elapsed. The deadline is
    /// armed immediately; an expiry task fires the done signal when it passes.
    ///
    /// Must be called from within a tokio runtime.
    pub fn timed(duration: Duration) -> Arc<Self> {
        let (done_tx, _) = watch::channel(false);
        let started = Instant::now();
        let barrier = Arc::new(Self {
            termination: Termination::Timed {
                started,
                deadline: started + duration,
                duration,
            },
            cancelled: AtomicBool::new(false),
            done_tx,
        });

        let expiry = Arc::clone(&barrier);
        tokio::spawn(async move {
            tokio::time::sleep_until(started + duration).await;
            expiry.done_tx.send_replace(true);
        });

        barrier
    }

    /// Atomically reserves one unit of work. Returns false once the barrier is
    /// done; no new request may start after that.
    pub fn try_grab_work(&self) -> bool {
        if self.cancelled.load(Ordering::Acquire) {
            return false;
        }
        match &self.termination {
            Termination::Counted { issued, target, .. } => issued
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                    (n < *target).then_some(n + 1)
                })
                .is_ok(),
            Termination::Timed { deadline, .. } => Instant::now() < *deadline,
        }
    }

    /// Reports one reserved unit of work as finished.
    pub fn job_done(&self) {
        if let Termination::Counted {
            completed, target, ..
        } = &self.termination
        {
            if completed.fetch_add(1, Ordering::AcqRel) + 1 == *target {
                self.done_tx.send_replace(true);
            }
        }
    }

    /// Ends the bombardment immediately. Idempotent, and safe to call from
    /// any task, including the signal handler.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
        self.done_tx.send_replace(true);
    }

    pub fn done(&self) -> DoneSignal {
        DoneSignal {
            rx: self.done_tx.subscribe(),
        }
    }

    /// Completion ratio in `[0, 1]`, monotonically non-decreasing.
    pub fn completed(&self) -> f64 {
        match &self.termination {
            Termination::Counted {
                completed, target, ..
            } => {
                if *target == 0 {
                    return 1.0;
                }
                completed.load(Ordering::Acquire) as f64 / *target as f64
            }
            Termination::Timed {
                started, duration, ..
            } => (started.elapsed().as_secs_f64() / duration.as_secs_f64()).min(1.0),
        }
    }
}
