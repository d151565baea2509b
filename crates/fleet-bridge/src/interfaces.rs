use async_trait::async_trait;

/// A running external worker, opaque to the core beyond these three fields.
#[derive(Debug, Clone)]
pub struct Instance {
    pub id: String,
    pub worktree_path: String,
    pub branch: String,
}

/// Result of `CompletionChecker::verify_work`. `message` carries the
/// verifier's own account of why it failed (e.g. `"no commits"`) — `None`
/// when `success` is true, since there is nothing to report.
#[derive(Debug, Clone)]
pub struct VerifyOutcome {
    pub success: bool,
    pub commit_count: u32,
    pub message: Option<String>,
}

/// Creates and launches external workers. Implementations must tolerate
/// concurrent calls from a single Bridge's claim loop.
#[async_trait]
pub trait InstanceFactory: Send + Sync {
    async fn create_instance(&self, prompt: String) -> anyhow::Result<Instance>;
    async fn start_instance(&self, instance: &Instance) -> anyhow::Result<()>;
}

/// Polls a worker's worktree for completion and verifies its work once done.
#[async_trait]
pub trait CompletionChecker: Send + Sync {
    async fn check_completion(&self, worktree_path: &str) -> anyhow::Result<bool>;
    async fn verify_work(
        &self,
        task_id: &str,
        instance_id: &str,
        worktree_path: &str,
        base_branch: &str,
    ) -> anyhow::Result<VerifyOutcome>;
}

/// Sink for bridge-observed lifecycle events. All methods must be
/// idempotent: the Bridge does not track whether it already called one.
#[async_trait]
pub trait SessionRecorder: Send + Sync {
    async fn assign_task(&self, task_id: &str, instance_id: &str);
    async fn record_completion(&self, task_id: &str, commit_count: u32);
    async fn record_failure(&self, task_id: &str, reason: &str);
}

/// Builds the prompt handed to `InstanceFactory::create_instance`, prefixing
/// the team's lead prompt and the plan's objective as context ahead of the
/// task's own title/description/files.
///
/// Concrete task format: `"# Task: <title>\n\n<description>"`, followed by
/// `"\n\n## Files\n- <f1>\n- <f2>\n"` when `files` is non-empty. No trailing
/// blank line when there are no files.
pub struct ContextPropagator {
    plan_objective: String,
    lead_prompt: String,
}

impl ContextPropagator {
    pub fn new(plan_objective: impl Into<String>, lead_prompt: impl Into<String>) -> Self {
        Self {
            plan_objective: plan_objective.into(),
            lead_prompt: lead_prompt.into(),
        }
    }

    pub fn build_prompt(&self, task: &fleet_types::QueuedTask) -> String {
        let mut prompt = String::new();
        if !self.plan_objective.is_empty() {
            prompt.push_str(&format!("# Objective\n\n{}\n\n", self.plan_objective));
        }
        if !self.lead_prompt.is_empty() {
            prompt.push_str(&format!("# Lead guidance\n\n{}\n\n", self.lead_prompt));
        }
        prompt.push_str(&format!("# Task: {}\n\n{}", task.task.title, task.task.description));
        if !task.task.files.is_empty() {
            prompt.push_str("\n\n## Files\n");
            for file in &task.task.files {
                prompt.push_str(&format!("- {file}\n"));
            }
        }
        prompt
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleet_types::{EstComplexity, PlannedTask, QueuedTask};

    fn task(files: Vec<&str>) -> QueuedTask {
        QueuedTask::new(PlannedTask {
            id: "t1".into(),
            title: "Add retry logic".into(),
            description: "Wrap the call in a bounded retry loop.".into(),
            files: files.into_iter().map(String::from).collect(),
            depends_on: Vec::new(),
            priority: 1,
            est_complexity: EstComplexity::Medium,
            no_code: false,
            issue_url: None,
        })
    }

    #[test]
    fn prompt_has_no_trailing_blank_line_when_files_is_empty() {
        let propagator = ContextPropagator::new("", "");
        let prompt = propagator.build_prompt(&task(vec![]));
        assert_eq!(prompt, "# Task: Add retry logic\n\nWrap the call in a bounded retry loop.");
    }

    #[test]
    fn prompt_lists_files_section_when_non_empty() {
        let propagator = ContextPropagator::new("", "");
        let prompt = propagator.build_prompt(&task(vec!["a.go", "b.go"]));
        assert!(prompt.ends_with("## Files\n- a.go\n- b.go\n"));
    }

    #[test]
    fn prompt_prefixes_objective_and_lead_guidance() {
        let propagator = ContextPropagator::new("Ship the v2 API", "Favor small diffs.");
        let prompt = propagator.build_prompt(&task(vec![]));
        assert!(prompt.starts_with("# Objective\n\nShip the v2 API\n\n"));
        assert!(prompt.contains("# Lead guidance\n\nFavor small diffs.\n\n"));
    }
}
