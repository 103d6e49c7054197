//! Progress display, fed by completion-ratio pulls.
//!
//! The reporter task never touches workers; it only reads the barrier's
//! completion ratio and forwards it here. The hidden variant exists so tests
//! and piped output stay silent.

use indicatif::{ProgressBar, ProgressStyle};

const TICKS: u64 = 1000;

#[derive(Clone)]
pub enum ProgressSink {
    Bar(ProgressBar),
    Hidden,
}

impl ProgressSink {
    pub fn bar() -> Self {
        let bar = ProgressBar::new(TICKS);
        if let Ok(style) = ProgressStyle::with_template("{wide_bar} {percent:>3}%") {
            bar.set_style(style);
        }
        ProgressSink::Bar(bar)
    }

    pub fn hidden() -> Self {
        ProgressSink::Hidden
    }

    pub fn update(&self, ratio: f64) {
        if let ProgressSink::Bar(bar) = self {
            bar.set_position((ratio.clamp(0.0, 1.0) * TICKS as f64) as u64);
        }
    }

    pub fn finish(&self) {
        if let ProgressSink::Bar(bar) = self {
            bar.finish_and_clear();
        }
    }
}
