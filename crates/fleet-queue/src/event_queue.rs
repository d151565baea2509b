use std::collections::HashSet;

use fleet_eventbus::{topics, Event, EventBus};
use fleet_types::{PlannedTask, QueuedTask};
use serde_json::json;

use crate::task_queue::{QueueError, StatusCounts, TaskQueue};

/// Forwards every call to an underlying `TaskQueue` and, on any
/// state-changing call, publishes `queue.depth_changed` with the queue's
/// current status summary. Consumers subscribe once to the event bus rather
/// than polling `status()`.
pub struct EventQueue {
    team_id: String,
    queue: TaskQueue,
    bus: EventBus,
}

impl EventQueue {
    pub fn new(team_id: impl Into<String>, tasks: Vec<PlannedTask>, bus: EventBus) -> Self {
        Self {
            team_id: team_id.into(),
            queue: TaskQueue::new(tasks),
            bus,
        }
    }

    fn publish_depth_changed(&self, status: StatusCounts) {
        self.bus.publish(Event::new(
            topics::QUEUE_DEPTH_CHANGED,
            json!({
                "teamID": self.team_id,
                "pending": status.pending,
                "claimed": status.claimed,
                "running": status.running,
                "completed": status.completed,
                "failed": status.failed,
            }),
        ));
    }

    pub async fn claim_next(&self, worker_id: impl Into<String>) -> Option<QueuedTask> {
        let claimed = self.queue.claim_next(worker_id).await;
        if claimed.is_some() {
            self.publish_depth_changed(self.queue.status().await);
        }
        claimed
    }

    pub async fn claim_next_excluding(
        &self,
        worker_id: impl Into<String>,
        excluded: &HashSet<String>,
    ) -> Option<QueuedTask> {
        let claimed = self.queue.claim_next_excluding(worker_id, excluded).await;
        if claimed.is_some() {
            self.publish_depth_changed(self.queue.status().await);
        }
        claimed
    }

    pub async fn release_claim(&self, task_id: &str) -> Result<(), QueueError> {
        let result = self.queue.release_claim(task_id).await;
        if result.is_ok() {
            self.publish_depth_changed(self.queue.status().await);
        }
        result
    }

    pub async fn mark_running(&self, task_id: &str) -> Result<(), QueueError> {
        let result = self.queue.mark_running(task_id).await;
        if result.is_ok() {
            self.publish_depth_changed(self.queue.status().await);
        }
        result
    }

    pub async fn complete(&self, task_id: &str) -> Result<(), QueueError> {
        let result = self.queue.complete(task_id).await;
        if result.is_ok() {
            self.publish_depth_changed(self.queue.status().await);
        }
        result
    }

    pub async fn fail(&self, task_id: &str, reason: impl Into<String>) -> Result<(), QueueError> {
        let result = self.queue.fail(task_id, reason).await;
        if result.is_ok() {
            self.publish_depth_changed(self.queue.status().await);
        }
        result
    }

    pub async fn set_max_retries(&self, task_id: &str, n: u32) -> Result<(), QueueError> {
        self.queue.set_max_retries(task_id, n).await
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

    fn task(id: &str) -> PlannedTask {
        PlannedTask {
            id: id.to_string(),
            title: id.to_string(),
            description: String::new(),
            files: Vec::new(),
            depends_on: Vec::new(),
            priority: 1,
            est_complexity: EstComplexity::Medium,
            no_code: false,
            issue_url: None,
        }
    }

    #[tokio::test]
    async fn claim_next_publishes_depth_changed() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        let queue = EventQueue::new("exec-0", vec![task("a")], bus);
        queue.claim_next("w1").await.unwrap();
        let event = rx.recv().await.unwrap();
        assert_eq!(event.topic, topics::QUEUE_DEPTH_CHANGED);
        assert_eq!(event.payload["claimed"], 1);
    }

    #[tokio::test]
    async fn claim_next_with_nothing_eligible_publishes_nothing() {
        let bus = EventBus::new();
        let rx = bus.subscribe();
        let queue = EventQueue::new("exec-0", vec![], bus);
        assert!(queue.claim_next("w1").await.is_none());
        drop(rx);
    }
}
