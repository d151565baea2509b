use fleet_queue::StatusCounts;

/// A point-in-time read of a team's queue, as the scaling monitor samples it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkloadSample {
    pub pending: usize,
    pub running: usize,
    pub done: usize,
    pub failed: usize,
}

impl From<StatusCounts> for WorkloadSample {
    fn from(status: StatusCounts) -> Self {
        Self {
            pending: status.pending + status.claimed,
            running: status.running,
            done: status.completed,
            failed: status.failed,
        }
    }
}

/// Workload observer: reads a team's queue status and suggests a scaling
/// delta. It never resizes anything itself — the phase executor's
/// scaling-decision callback is the one component allowed to touch a
/// Bridge's semaphore, so that budget exhaustion and min/max clamping stay
/// in one place (see `ScalingMonitor`).
#[derive(Debug, Default)]
pub struct AdaptiveLead {
    budget_exhausted: std::sync::atomic::AtomicBool,
}

impl AdaptiveLead {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_budget_exhausted(&self, exhausted: bool) {
        self.budget_exhausted.store(exhausted, std::sync::atomic::Ordering::SeqCst);
    }

    pub fn is_budget_exhausted(&self) -> bool {
        self.budget_exhausted.load(std::sync::atomic::Ordering::SeqCst)
    }

    /// Suggests scaling up when there is more than twice as much pending
    /// work as in-flight work and the team is not budget-exhausted; suggests
    /// scaling down to zero delta once the queue is fully drained. Anything
    /// in between recommends no change.
    pub fn recommended_delta(&self, sample: WorkloadSample) -> i32 {
        if sample.pending == 0 && sample.running == 0 {
            return 0;
        }
        if !self.is_budget_exhausted() && sample.pending > sample.running * 2 {
            return 1;
        }
        if sample.running == 0 && sample.pending == 0 {
            return 0;
        }
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recommends_scale_up_when_pending_backs_up() {
        let lead = AdaptiveLead::new();
        let sample = WorkloadSample { pending: 10, running: 2, done: 0, failed: 0 };
        assert_eq!(lead.recommended_delta(sample), 1);
    }

    #[test]
    fn suppresses_scale_up_when_budget_exhausted() {
        let lead = AdaptiveLead::new();
        lead.set_budget_exhausted(true);
        let sample = WorkloadSample { pending: 10, running: 1, done: 0, failed: 0 };
        assert_eq!(lead.recommended_delta(sample), 0);
    }

    #[test]
    fn recommends_no_change_on_a_drained_queue() {
        let lead = AdaptiveLead::new();
        let sample = WorkloadSample { pending: 0, running: 0, done: 5, failed: 0 };
        assert_eq!(lead.recommended_delta(sample), 0);
    }
}
