//! `DebateCoordinator`: inspects completed tasks from the execution phase,
//! finds every pair sharing at least one file, and records a synthetic
//! debate (positions drawn from the tasks' own descriptions, a resolution
//! naming the overlap) into the mailbox and onto the event bus. Called
//! between the execution and review phases; errors here are logged and
//! non-blocking, never fail the pipeline.

use std::collections::HashSet;

use fleet_eventbus::{topics, Event, EventBus, Mailbox};
use fleet_types::{InterTeamMessage, MessagePriority, MessageType, PlannedTask, BROADCAST};
use serde_json::json;

/// One resolved conflict between two completed tasks.
#[derive(Debug, Clone)]
pub struct DebateResolution {
    pub task_a: String,
    pub task_b: String,
    pub files: Vec<String>,
    pub resolution: String,
}

impl DebateResolution {
    fn render(&self) -> String {
        format!(
            "Conflict between `{}` and `{}` over {}: {}",
            self.task_a,
            self.task_b,
            self.files.join(", "),
            self.resolution
        )
    }
}

pub struct DebateCoordinator {
    bus: EventBus,
}

impl DebateCoordinator {
    pub fn new(bus: EventBus) -> Self {
        Self { bus }
    }

    /// Finds every pair of `completed` tasks sharing at least one file (`k`
    /// tasks on one file yield `C(k,2)` pairs), records a debate per pair
    /// into `mailbox`, and returns the concatenated resolution text meant
    /// to be appended to the review team's `LeadPrompt`.
    pub fn run(&self, mailbox: &Mailbox, from_team: &str, completed: &[PlannedTask]) -> String {
        let resolutions = self.find_conflicts(completed);
        let mut rendered = Vec::with_capacity(resolutions.len());

        for resolution in &resolutions {
            self.bus.publish(Event::new(
                topics::DEBATE_STARTED,
                json!({"taskA": resolution.task_a, "taskB": resolution.task_b, "files": resolution.files}),
            ));

            let message = InterTeamMessage::new(
                from_team,
                BROADCAST,
                MessageType::Warning,
                MessagePriority::Important,
                resolution.render(),
            );
            let _ = mailbox.send(format!("team:{from_team}"), message);

            self.bus.publish(Event::new(
                topics::DEBATE_RESOLVED,
                json!({"taskA": resolution.task_a, "taskB": resolution.task_b, "resolution": resolution.resolution}),
            ));

            rendered.push(resolution.render());
        }

        rendered.join("\n\n")
    }

    fn find_conflicts(&self, completed: &[PlannedTask]) -> Vec<DebateResolution> {
        let mut resolutions = Vec::new();
        for i in 0..completed.len() {
            for j in (i + 1)..completed.len() {
                let a = &completed[i];
                let b = &completed[j];
                let files_a: HashSet<&str> = a.files.iter().map(String::as_str).collect();
                let overlap: Vec<String> = b
                    .files
                    .iter()
                    .filter(|f| files_a.contains(f.as_str()))
                    .cloned()
                    .collect();
                if overlap.is_empty() {
                    continue;
                }
                let resolution = format!(
                    "`{}` ({}) and `{}` ({}) both touched {} — review the merged result for consistency.",
                    a.id,
                    a.title,
                    b.id,
                    b.title,
                    overlap.join(", ")
                );
                resolutions.push(DebateResolution {
                    task_a: a.id.clone(),
                    task_b: b.id.clone(),
                    files: overlap,
                    resolution,
                });
            }
        }
        resolutions
    }
}
