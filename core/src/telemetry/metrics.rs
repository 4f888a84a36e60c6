use serde::{Deserialize, Serialize};
use std::sync::Mutex;

/// Point-in-time copy of the engine counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub scans_processed: u64,
    pub scans_aborted: u64,
    pub births: u64,
    pub terminations: u64,
    pub merges: u64,
    pub splits: u64,
}

/// Counters shared between station workers.
pub struct MetricsRecorder {
    inner: Mutex<MetricsSnapshot>,
}

impl MetricsRecorder {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(MetricsSnapshot::default()),
        }
    }

    pub fn record_processed(&self) {
        self.update(|metrics| metrics.scans_processed += 1);
    }

    pub fn record_aborted(&self) {
        self.update(|metrics| metrics.scans_aborted += 1);
    }

    pub fn record_lifecycle(&self, births: u64, terminations: u64, merges: u64, splits: u64) {
        self.update(|metrics| {
            metrics.births += births;
            metrics.terminations += terminations;
            metrics.merges += merges;
            metrics.splits += splits;
        });
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        match self.inner.lock() {
            Ok(metrics) => *metrics,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    fn update(&self, apply: impl FnOnce(&mut MetricsSnapshot)) {
        if let Ok(mut metrics) = self.inner.lock() {
            apply(&mut metrics);
        }
    }
}

impl Default for MetricsRecorder {
    fn default() -> Self {
        Self::new()
    }
}
