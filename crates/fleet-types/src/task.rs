use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Rough sizing hint a planner attaches to a task; informs no scheduling
/// decision directly but is carried through for telemetry and prompts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EstComplexity {
    Low,
    Medium,
    High,
}

/// An immutable unit of work as authored in a `PlanSpec`.
///
/// Invariant: `depends_on` references only task IDs within the same plan,
/// and never contains the task's own ID.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlannedTask {
    pub id: String,
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub files: Vec<String>,
    #[serde(default)]
    pub depends_on: Vec<String>,
    pub priority: i32,
    pub est_complexity: EstComplexity,
    #[serde(default)]
    pub no_code: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issue_url: Option<String>,
}

impl PlannedTask {
    pub fn new(id: impl Into<String>, title: impl Into<String>, priority: i32) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            description: String::new(),
            files: Vec::new(),
            depends_on: Vec::new(),
            priority,
            est_complexity: EstComplexity::Medium,
            no_code: false,
            issue_url: None,
        }
    }
}

/// Mutable lifecycle state for a task once it has entered a team's queue.
///
/// Transitions: `Pending -> Claimed -> Running -> {Completed, Failed, Pending}`.
/// See `fleet-queue::TaskQueue` for the state machine that drives these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Claimed,
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedTask {
    #[serde(flatten)]
    pub task: PlannedTask,
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assigned_instance: Option<String>,
    #[serde(default)]
    pub attempt_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claimed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Per-task retry budget; defaults to 2 and can be overridden via
    /// `TaskQueue::set_max_retries`.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_max_retries() -> u32 {
    2
}

impl QueuedTask {
    pub fn new(task: PlannedTask) -> Self {
        Self {
            task,
            status: TaskStatus::Pending,
            assigned_instance: None,
            attempt_count: 0,
            failure_reason: None,
            claimed_at: None,
            completed_at: None,
            max_retries: default_max_retries(),
        }
    }

    pub fn id(&self) -> &str {
        &self.task.id
    }
}
