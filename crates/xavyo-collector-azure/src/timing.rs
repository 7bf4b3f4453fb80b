//! Start/end logging for collections and batches.

use std::time::{Duration, Instant};

use tracing::info;

/// Logs when a named collection starts and how long it took once finished.
#[derive(Debug)]
pub struct CollectionTimer {
    name: String,
    started: Instant,
}

impl CollectionTimer {
    /// Logs the start line and begins timing.
    pub fn start(name: impl Into<String>) -> Self {
        let name = name.into();
        info!(collection = %name, "Starting collection");
        Self {
            name,
            started: Instant::now(),
        }
    }

    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Logs the end line with the number of items collected.
    pub fn finish(self, item_count: usize) -> Duration {
        let elapsed = self.elapsed();
        info!(
            collection = %self.name,
            item_count,
            duration_ms = elapsed.as_millis() as u64,
            "Completed collection"
        );
        elapsed
    }
}
