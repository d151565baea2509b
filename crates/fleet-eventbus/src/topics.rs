//! Topic name constants published by the core. Every payload carries at
//! least the IDs relevant to its scope plus a timestamp (see `Event::new`).

pub const QUEUE_DEPTH_CHANGED: &str = "queue.depth_changed";
pub const TEAM_CREATED: &str = "team.created";
pub const TEAM_PHASE_CHANGED: &str = "team.phase_changed";
pub const TEAM_COMPLETED: &str = "team.completed";
pub const TEAM_DYNAMIC_ADDED: &str = "team.dynamic_added";
pub const TEAM_MESSAGE: &str = "team.message";
pub const TEAM_BUDGET_EXHAUSTED: &str = "team.budget_exhausted";
pub const TEAM_SCALED: &str = "team.scaled";
pub const PIPELINE_PHASE_CHANGED: &str = "pipeline.phase_changed";
pub const PIPELINE_COMPLETED: &str = "pipeline.completed";
pub const BRIDGE_TASK_STARTED: &str = "bridge.task_started";
pub const BRIDGE_TASK_COMPLETED: &str = "bridge.task_completed";
pub const DEBATE_STARTED: &str = "debate.started";
pub const DEBATE_RESOLVED: &str = "debate.resolved";
