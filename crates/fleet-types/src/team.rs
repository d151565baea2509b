use serde::{Deserialize, Serialize};

use crate::budget::{Budget, Usage};
use crate::task::PlannedTask;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TeamRole {
    Execution,
    Planning,
    Review,
    Consolidation,
}

/// Declarative spec for one team, as emitted by the Decomposer or authored
/// directly for planning/review/consolidation roles.
///
/// Invariant: `min_instances <= max_instances` when both are nonzero;
/// `depends_on` references peer `TeamSpec` IDs only, never itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TeamSpec {
    pub id: String,
    pub name: String,
    pub role: TeamRole,
    pub tasks: Vec<PlannedTask>,
    pub team_size: u32,
    /// 0 means "default to `team_size`".
    #[serde(default)]
    pub min_instances: u32,
    /// 0 means "unlimited".
    #[serde(default)]
    pub max_instances: u32,
    #[serde(default)]
    pub budget: Budget,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub lead_prompt: String,
}

impl TeamSpec {
    /// `min_instances` resolved per the "0 = default to team_size" rule.
    pub fn effective_min_instances(&self) -> u32 {
        if self.min_instances == 0 {
            self.team_size
        } else {
            self.min_instances
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.id.trim().is_empty() {
            return Err("team spec id must not be empty".to_string());
        }
        if self.name.trim().is_empty() {
            return Err("team spec name must not be empty".to_string());
        }
        if self.tasks.is_empty() {
            return Err(format!("team spec {} must have at least one task", self.id));
        }
        if self.team_size < 1 {
            return Err(format!("team spec {} team_size must be >= 1", self.id));
        }
        if self.min_instances > 0 && self.max_instances > 0 && self.min_instances > self.max_instances
        {
            return Err(format!(
                "team spec {} has min_instances ({}) > max_instances ({})",
                self.id, self.min_instances, self.max_instances
            ));
        }
        if self.depends_on.iter().any(|dep| dep == &self.id) {
            return Err(format!("team spec {} cannot depend on itself", self.id));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TeamPhase {
    Forming,
    Blocked,
    Working,
    Reporting,
    Done,
    Failed,
}

impl TeamPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, TeamPhase::Done | TeamPhase::Failed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelinePhase {
    Planning,
    Execution,
    Review,
    Consolidation,
    Done,
    Failed,
}

impl PipelinePhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, PipelinePhase::Done | PipelinePhase::Failed)
    }

    pub fn label(self) -> &'static str {
        match self {
            PipelinePhase::Planning => "planning",
            PipelinePhase::Execution => "execution",
            PipelinePhase::Review => "review",
            PipelinePhase::Consolidation => "consolidation",
            PipelinePhase::Done => "done",
            PipelinePhase::Failed => "failed",
        }
    }
}

/// Read-only snapshot of a team's live state, composed from queue counts and
/// budget usage under a read lock by the owning `Team`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TeamStatus {
    pub id: String,
    pub name: String,
    pub role: TeamRole,
    pub phase: TeamPhase,
    pub tasks_total: usize,
    pub tasks_done: usize,
    pub tasks_failed: usize,
    pub budget_used: Usage,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> TeamSpec {
        TeamSpec {
            id: "exec-0".to_string(),
            name: "exec-0".to_string(),
            role: TeamRole::Execution,
            tasks: vec![PlannedTask::new("t1", "t1", 0)],
            team_size: 2,
            min_instances: 0,
            max_instances: 0,
            budget: Budget::default(),
            depends_on: Vec::new(),
            lead_prompt: String::new(),
        }
    }

    #[test]
    fn effective_min_instances_defaults_to_team_size() {
        assert_eq!(spec().effective_min_instances(), 2);
    }

    #[test]
    fn validate_rejects_min_over_max() {
        let mut s = spec();
        s.min_instances = 5;
        s.max_instances = 2;
        assert!(s.validate().is_err());
    }

    #[test]
    fn validate_rejects_self_dependency() {
        let mut s = spec();
        s.depends_on.push("exec-0".to_string());
        assert!(s.validate().is_err());
    }

    #[test]
    fn validate_accepts_well_formed_spec() {
        assert!(spec().validate().is_ok());
    }
}
