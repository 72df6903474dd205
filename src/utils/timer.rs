//! Scoped wall-clock timer for long-running ensemble calls

use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Logs when a labelled block starts and how long it took when dropped.
///
/// With `verbose` set the messages go out at info level, otherwise at debug.
pub struct TickTock {
    label: String,
    verbose: bool,
    start: Instant,
}

impl TickTock {
    pub fn start(label: impl Into<String>, verbose: bool) -> Self {
        let label = label.into();
        if verbose {
            info!(task = %label, "started");
        } else {
            debug!(task = %label, "started");
        }
        Self {
            label,
            verbose,
            start: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

impl Drop for TickTock {
    fn drop(&mut self) {
        let secs = self.start.elapsed().as_secs_f64();
        if self.verbose {
            info!(task = %self.label, elapsed_secs = secs, "finished");
        } else {
            debug!(task = %self.label, elapsed_secs = secs, "finished");
        }
    }
}
