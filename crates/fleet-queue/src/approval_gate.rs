use std::collections::HashSet;

use fleet_types::{PlannedTask, QueuedTask};

use crate::event_queue::EventQueue;
use crate::task_queue::{QueueError, StatusCounts};
use fleet_eventbus::EventBus;

/// Caller-supplied check for whether a task needs approval and, if so,
/// whether it already has it. Kept as a trait rather than a bare closure so
/// a caller can back it by a database, a config file, or a human-in-the-loop
/// prompt without the Gate knowing which.
pub trait ApprovalLookup: Send + Sync {
    fn check(&self, task_id: &str) -> (bool, bool);
}

impl<F> ApprovalLookup for F
where
    F: Fn(&str) -> (bool, bool) + Send + Sync,
{
    fn check(&self, task_id: &str) -> (bool, bool) {
        self(task_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateError {
    Queue(QueueError),
    NeedsApproval,
}

impl std::fmt::Display for GateError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GateError::Queue(e) => write!(f, "{e}"),
            GateError::NeedsApproval => write!(f, "task requires approval before it can run"),
        }
    }
}

impl std::error::Error for GateError {}

/// Decorator on `EventQueue` that withholds gated-but-unapproved tasks from
/// `claim_next` and refuses to start them via `mark_running`. This is the
/// sole handle every other component uses for task operations, so approval
/// policy stays orthogonal to queue mechanics.
pub struct ApprovalGate {
    queue: EventQueue,
    lookup: Box<dyn ApprovalLookup>,
}

impl ApprovalGate {
    pub fn new(
        team_id: impl Into<String>,
        tasks: Vec<PlannedTask>,
        bus: EventBus,
        lookup: impl ApprovalLookup + 'static,
    ) -> Self {
        Self {
            queue: EventQueue::new(team_id, tasks, bus),
            lookup: Box::new(lookup),
        }
    }

    fn is_gated(&self, task_id: &str) -> bool {
        let (needs_approval, approved) = self.lookup.check(task_id);
        needs_approval && !approved
    }

    /// Claims the highest-priority task that is both dependency-eligible and
    /// not gated. Passes over gated-but-unapproved candidates, trying the
    /// next-best until either an approved one is found or none remain.
    pub async fn claim_next(&self, worker_id: impl Into<String>) -> Option<QueuedTask> {
        let worker_id = worker_id.into();
        let mut excluded: HashSet<String> = HashSet::new();
        loop {
            let candidate = self.queue.claim_next_excluding(worker_id.clone(), &excluded).await?;
            if self.is_gated(candidate.id()) {
                excluded.insert(candidate.id().to_string());
                let _ = self.queue.release_claim(candidate.id()).await;
                continue;
            }
            return Some(candidate);
        }
    }

    /// Fails with `GateError::NeedsApproval` rather than starting a task
    /// that is still gated, instead of the usual transition error.
    pub async fn mark_running(&self, task_id: &str) -> Result<(), GateError> {
        if self.is_gated(task_id) {
            return Err(GateError::NeedsApproval);
        }
        self.queue.mark_running(task_id).await.map_err(GateError::Queue)
    }

    pub async fn complete(&self, task_id: &str) -> Result<(), GateError> {
        self.queue.complete(task_id).await.map_err(GateError::Queue)
    }

    pub async fn fail(&self, task_id: &str, reason: impl Into<String>) -> Result<(), GateError> {
        self.queue.fail(task_id, reason).await.map_err(GateError::Queue)
    }

    pub async fn set_max_retries(&self, task_id: &str, n: u32) -> Result<(), GateError> {
        self.queue.set_max_retries(task_id, n).await.map_err(GateError::Queue)
    }

    pub async fn is_complete(&self) -> bool {
        self.queue.is_complete().await
    }

    pub async fn status(&self) -> StatusCounts {
        self.queue.status().await
    }

    pub async fn task(&self, task_id: &str) -> Option<QueuedTask> {
        self.queue.task(task_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleet_types::EstComplexity;
    use std::collections::HashMap;
    use std::sync::Mutex;

    fn task(id: &str, priority: i32) -> PlannedTask {
        PlannedTask {
            id: id.to_string(),
            title: id.to_string(),
            description: String::new(),
            files: Vec::new(),
            depends_on: Vec::new(),
            priority,
            est_complexity: EstComplexity::Medium,
            no_code: false,
            issue_url: None,
        }
    }

    struct MapLookup(Mutex<HashMap<String, (bool, bool)>>);

    impl ApprovalLookup for MapLookup {
        fn check(&self, task_id: &str) -> (bool, bool) {
            self.0.lock().unwrap().get(task_id).copied().unwrap_or((false, false))
        }
    }

    #[tokio::test]
    async fn claim_next_skips_gated_unapproved_task_and_returns_next_best() {
        let mut gated = HashMap::new();
        gated.insert("a".to_string(), (true, false));
        let lookup = MapLookup(Mutex::new(gated));
        let gate = ApprovalGate::new("exec-0", vec![task("a", 1), task("b", 2)], EventBus::new(), lookup);

        let claimed = gate.claim_next("w1").await.unwrap();
        assert_eq!(claimed.id(), "b");
    }

    #[tokio::test]
    async fn claim_next_returns_none_when_only_gated_tasks_remain() {
        let mut gated = HashMap::new();
        gated.insert("a".to_string(), (true, false));
        let lookup = MapLookup(Mutex::new(gated));
        let gate = ApprovalGate::new("exec-0", vec![task("a", 1)], EventBus::new(), lookup);

        assert!(gate.claim_next("w1").await.is_none());
        let status = gate.status().await;
        assert_eq!(status.pending, 1);
    }

    #[tokio::test]
    async fn mark_running_on_gated_unapproved_task_fails_distinctly() {
        let mut gated = HashMap::new();
        gated.insert("a".to_string(), (true, false));
        let lookup = MapLookup(Mutex::new(gated));
        let gate = ApprovalGate::new("exec-0", vec![task("a", 1)], EventBus::new(), lookup);

        assert_eq!(gate.mark_running("a").await.unwrap_err(), GateError::NeedsApproval);
    }

    #[tokio::test]
    async fn approved_task_claims_and_runs_normally() {
        let mut approved = HashMap::new();
        approved.insert("a".to_string(), (true, true));
        let lookup = MapLookup(Mutex::new(approved));
        let gate = ApprovalGate::new("exec-0", vec![task("a", 1)], EventBus::new(), lookup);

        let claimed = gate.claim_next("w1").await.unwrap();
        assert_eq!(claimed.id(), "a");
        gate.mark_running("a").await.unwrap();
        gate.complete("a").await.unwrap();
        assert!(gate.is_complete().await);
    }
}
