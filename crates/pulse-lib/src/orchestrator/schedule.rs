//! Due-time bookkeeping for the periodic jobs

use std::time::Duration;
use tokio::time::Instant;

/// Longest gap between two runs of a job
pub const MAX_DELAY: Duration = Duration::from_secs(365 * 24 * 60 * 60);

fn due_after(from: Instant, interval: Duration) -> Instant {
    from.checked_add(interval.min(MAX_DELAY)).unwrap_or(from)
}

/// When a periodic job should next run
#[derive(Debug, Clone, Copy)]
pub struct JobSchedule {
    next_due: Instant,
}

impl JobSchedule {
    /// Due on the first tick
    pub fn immediately() -> Self {
        Self {
            next_due: Instant::now(),
        }
    }

    /// Due one interval from now
    pub fn after(interval: Duration) -> Self {
        Self {
            next_due: due_after(Instant::now(), interval),
        }
    }

    pub fn is_due(&self, now: Instant) -> bool {
        now >= self.next_due
    }

    /// Next run is one interval after the job finished
    pub fn completed_at(&mut self, finished: Instant, interval: Duration) {
        self.next_due = due_after(finished, interval);
    }
}
