use std::collections::{HashMap, HashSet};

use chrono::Utc;
use fleet_types::{PlannedTask, QueuedTask, TaskStatus};
use tokio::sync::Mutex;

/// Counts of tasks in each lifecycle status, as returned by `TaskQueue::status`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusCounts {
    pub pending: usize,
    pub claimed: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
}

impl StatusCounts {
    pub fn total(&self) -> usize {
        self.pending + self.claimed + self.running + self.completed + self.failed
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueError {
    NotFound,
    InvalidTransition,
}

impl std::fmt::Display for QueueError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QueueError::NotFound => write!(f, "task not found in queue"),
            QueueError::InvalidTransition => write!(f, "task is not in the required status for this transition"),
        }
    }
}

impl std::error::Error for QueueError {}

struct Inner {
    tasks: Vec<QueuedTask>,
    index: HashMap<String, usize>,
}

impl Inner {
    fn dep_statuses(&self, task: &QueuedTask) -> Vec<TaskStatus> {
        task.task
            .depends_on
            .iter()
            .filter_map(|dep_id| self.index.get(dep_id))
            .map(|&i| self.tasks[i].status)
            .collect()
    }

    fn deps_satisfied(&self, task: &QueuedTask) -> bool {
        self.dep_statuses(task).iter().all(|s| *s == TaskStatus::Completed)
    }

    fn permanently_blocked(&self, task: &QueuedTask) -> bool {
        self.dep_statuses(task).iter().any(|s| *s == TaskStatus::Failed)
    }

    fn status_counts(&self) -> StatusCounts {
        let mut counts = StatusCounts::default();
        for task in &self.tasks {
            match task.status {
                TaskStatus::Pending => counts.pending += 1,
                TaskStatus::Claimed => counts.claimed += 1,
                TaskStatus::Running => counts.running += 1,
                TaskStatus::Completed => counts.completed += 1,
                TaskStatus::Failed => counts.failed += 1,
            }
        }
        counts
    }
}

/// Holds every task in a team's plan plus its mutable lifecycle state.
///
/// State machine: `Pending -> Claimed -> Running -> {Completed, Failed, Pending}`.
/// A single mutex guards every public method; there is no nested locking.
pub struct TaskQueue {
    inner: Mutex<Inner>,
}

impl TaskQueue {
    pub fn new(tasks: Vec<PlannedTask>) -> Self {
        let mut index = HashMap::with_capacity(tasks.len());
        let queued: Vec<QueuedTask> = tasks
            .into_iter()
            .enumerate()
            .map(|(i, task)| {
                index.insert(task.id.clone(), i);
                QueuedTask::new(task)
            })
            .collect();
        Self {
            inner: Mutex::new(Inner { tasks: queued, index }),
        }
    }

    /// Returns the highest-priority eligible task (lower `priority` wins,
    /// ties broken by insertion order), marking it `Claimed`. Returns `None`
    /// rather than an error when nothing is eligible right now.
    pub async fn claim_next(&self, worker_id: impl Into<String>) -> Option<QueuedTask> {
        self.claim_next_excluding(worker_id, &HashSet::new()).await
    }

    /// Same as `claim_next` but skips task IDs present in `excluded`. Used by
    /// `ApprovalGate` to look past a gated-but-unapproved candidate without
    /// losing track of which ones it has already passed over this round.
    pub async fn claim_next_excluding(
        &self,
        worker_id: impl Into<String>,
        excluded: &HashSet<String>,
    ) -> Option<QueuedTask> {
        let mut inner = self.inner.lock().await;
        let mut best: Option<usize> = None;
        for i in 0..inner.tasks.len() {
            let task = &inner.tasks[i];
            if task.status != TaskStatus::Pending {
                continue;
            }
            if excluded.contains(&task.task.id) {
                continue;
            }
            if !inner.deps_satisfied(task) {
                continue;
            }
            match best {
                None => best = Some(i),
                Some(b) if task.task.priority < inner.tasks[b].task.priority => best = Some(i),
                _ => {}
            }
        }
        let idx = best?;
        let worker_id = worker_id.into();
        let task = &mut inner.tasks[idx];
        task.status = TaskStatus::Claimed;
        task.assigned_instance = Some(worker_id);
        task.claimed_at = Some(Utc::now());
        Some(task.clone())
    }

    /// Reverts a `Claimed` task back to `Pending` without counting it as an
    /// attempt. Used by `ApprovalGate` to put back a task it decided not to
    /// hand out after all.
    pub async fn release_claim(&self, task_id: &str) -> Result<(), QueueError> {
        let mut inner = self.inner.lock().await;
        let idx = *inner.index.get(task_id).ok_or(QueueError::NotFound)?;
        let task = &mut inner.tasks[idx];
        if task.status != TaskStatus::Claimed {
            return Err(QueueError::InvalidTransition);
        }
        task.status = TaskStatus::Pending;
        task.assigned_instance = None;
        task.claimed_at = None;
        Ok(())
    }

    pub async fn mark_running(&self, task_id: &str) -> Result<(), QueueError> {
        let mut inner = self.inner.lock().await;
        let idx = *inner.index.get(task_id).ok_or(QueueError::NotFound)?;
        let task = &mut inner.tasks[idx];
        if task.status != TaskStatus::Claimed {
            return Err(QueueError::InvalidTransition);
        }
        task.status = TaskStatus::Running;
        Ok(())
    }

    pub async fn complete(&self, task_id: &str) -> Result<(), QueueError> {
        let mut inner = self.inner.lock().await;
        let idx = *inner.index.get(task_id).ok_or(QueueError::NotFound)?;
        let task = &mut inner.tasks[idx];
        if task.status != TaskStatus::Running {
            return Err(QueueError::InvalidTransition);
        }
        task.status = TaskStatus::Completed;
        task.completed_at = Some(Utc::now());
        Ok(())
    }

    /// `Running -> Failed`, unless the task still has retry budget, in which
    /// case it resets to `Pending` with `attempt_count` incremented and the
    /// failure reason kept for telemetry. Idempotent w.r.t. terminal state:
    /// calling `fail` again on an already-`Pending` retry just retries again.
    pub async fn fail(&self, task_id: &str, reason: impl Into<String>) -> Result<(), QueueError> {
        let mut inner = self.inner.lock().await;
        let idx = *inner.index.get(task_id).ok_or(QueueError::NotFound)?;
        let task = &mut inner.tasks[idx];
        if task.status != TaskStatus::Running {
            return Err(QueueError::InvalidTransition);
        }
        task.failure_reason = Some(reason.into());
        if task.attempt_count < task.max_retries {
            task.attempt_count += 1;
            task.status = TaskStatus::Pending;
            task.assigned_instance = None;
            task.claimed_at = None;
        } else {
            task.status = TaskStatus::Failed;
        }
        Ok(())
    }

    pub async fn set_max_retries(&self, task_id: &str, n: u32) -> Result<(), QueueError> {
        let mut inner = self.inner.lock().await;
        let idx = *inner.index.get(task_id).ok_or(QueueError::NotFound)?;
        inner.tasks[idx].max_retries = n;
        Ok(())
    }

    /// True once every task is terminal, or once every remaining `Pending`
    /// task is permanently unclaimable because a dependency reached `Failed`.
    pub async fn is_complete(&self) -> bool {
        let inner = self.inner.lock().await;
        let in_flight = inner
            .tasks
            .iter()
            .any(|t| matches!(t.status, TaskStatus::Claimed | TaskStatus::Running));
        if in_flight {
            return false;
        }
        inner
            .tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Pending)
            .all(|t| inner.permanently_blocked(t))
    }

    pub async fn status(&self) -> StatusCounts {
        self.inner.lock().await.status_counts()
    }

    pub async fn task(&self, task_id: &str) -> Option<QueuedTask> {
        let inner = self.inner.lock().await;
        inner.index.get(task_id).map(|&i| inner.tasks[i].clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleet_types::EstComplexity;

    fn task(id: &str, priority: i32, depends_on: &[&str]) -> PlannedTask {
        PlannedTask {
            id: id.to_string(),
            title: id.to_string(),
            description: String::new(),
            files: Vec::new(),
            depends_on: depends_on.iter().map(|s| s.to_string()).collect(),
            priority,
            est_complexity: EstComplexity::Medium,
            no_code: false,
            issue_url: None,
        }
    }

    #[tokio::test]
    async fn claim_next_prefers_lower_priority_and_unblocked_tasks() {
        let queue = TaskQueue::new(vec![task("a", 5, &[]), task("b", 1, &[]), task("c", 1, &["b"])]);
        let claimed = queue.claim_next("w1").await.unwrap();
        assert_eq!(claimed.id(), "b");
    }

    #[tokio::test]
    async fn claim_next_skips_tasks_with_unmet_dependencies() {
        let queue = TaskQueue::new(vec![task("a", 1, &["b"]), task("b", 5, &[])]);
        let claimed = queue.claim_next("w1").await.unwrap();
        assert_eq!(claimed.id(), "b");
    }

    #[tokio::test]
    async fn full_lifecycle_completes_a_task() {
        let queue = TaskQueue::new(vec![task("a", 1, &[])]);
        queue.claim_next("w1").await.unwrap();
        queue.mark_running("a").await.unwrap();
        queue.complete("a").await.unwrap();
        let status = queue.status().await;
        assert_eq!(status.completed, 1);
        assert!(queue.is_complete().await);
    }

    #[tokio::test]
    async fn mark_running_fails_unless_claimed() {
        let queue = TaskQueue::new(vec![task("a", 1, &[])]);
        assert_eq!(queue.mark_running("a").await.unwrap_err(), QueueError::InvalidTransition);
    }

    #[tokio::test]
    async fn fail_retries_until_budget_exhausted_then_terminates() {
        let queue = TaskQueue::new(vec![task("a", 1, &[])]);
        for _ in 0..2 {
            queue.claim_next("w1").await.unwrap();
            queue.mark_running("a").await.unwrap();
            queue.fail("a", "boom").await.unwrap();
            let status = queue.status().await;
            assert_eq!(status.pending, 1);
        }
        queue.claim_next("w1").await.unwrap();
        queue.mark_running("a").await.unwrap();
        queue.fail("a", "boom again").await.unwrap();
        let status = queue.status().await;
        assert_eq!(status.failed, 1);
        assert!(queue.is_complete().await);
    }

    #[tokio::test]
    async fn dependent_of_a_permanently_failed_task_is_unclaimable_and_counts_as_complete() {
        let queue = TaskQueue::new(vec![task("a", 1, &[]), task("b", 1, &["a"])]);
        queue.set_max_retries("a", 0).await.unwrap();
        queue.claim_next("w1").await.unwrap();
        queue.mark_running("a").await.unwrap();
        queue.fail("a", "unrecoverable").await.unwrap();
        assert!(queue.claim_next("w2").await.is_none());
        assert!(queue.is_complete().await);
    }

    #[tokio::test]
    async fn invariant_counts_always_sum_to_total_tasks() {
        let queue = TaskQueue::new(vec![task("a", 1, &[]), task("b", 2, &[])]);
        queue.claim_next("w1").await.unwrap();
        let status = queue.status().await;
        assert_eq!(status.total(), 2);
    }
}
