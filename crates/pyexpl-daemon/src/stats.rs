//! Execution counters reported by `Status`

use parking_lot::Mutex;

/// Snapshot of the counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Stats {
    pub in_flight: u64,
    pub completed: u64,
    pub failed: u64,
}

/// Counters shared by all connections
#[derive(Debug, Default)]
pub struct ExecutionStats {
    inner: Mutex<Stats>,
}

impl ExecutionStats {
    /// Record an execution starting
    pub fn begin(&self) {
        self.inner.lock().in_flight += 1;
    }

    /// Record an execution ending; `ok` is false for orchestration failures
    pub fn end(&self, ok: bool) {
        let mut stats = self.inner.lock();
        stats.in_flight = stats.in_flight.saturating_sub(1);
        if ok {
            stats.completed += 1;
        } else {
            stats.failed += 1;
        }
    }

    pub fn snapshot(&self) -> Stats {
        *self.inner.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_track_outcomes() {
        let stats = ExecutionStats::default();
        stats.begin();
        stats.begin();
        stats.end(true);

        assert_eq!(
            stats.snapshot(),
            Stats {
                in_flight: 1,
                completed: 1,
                failed: 0,
            }
        );

        stats.end(false);
        assert_eq!(stats.snapshot().in_flight, 0);
        assert_eq!(stats.snapshot().failed, 1);
    }
}
