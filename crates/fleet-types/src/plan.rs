use std::collections::{HashMap, HashSet, VecDeque};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::task::PlannedTask;

/// An immutable plan handed to the core once decomposition begins.
///
/// `dependency_graph` and `execution_order` are not stored fields — both are
/// cheap to derive from `tasks` and storing them would risk drift.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanSpec {
    pub id: String,
    pub objective: String,
    #[serde(default)]
    pub summary: String,
    pub tasks: Vec<PlannedTask>,
    pub created_at: DateTime<Utc>,
}

impl PlanSpec {
    pub fn new(id: impl Into<String>, objective: impl Into<String>, tasks: Vec<PlannedTask>) -> Self {
        Self {
            id: id.into(),
            objective: objective.into(),
            summary: String::new(),
            tasks,
            created_at: Utc::now(),
        }
    }

    /// Task ID -> its declared dependency IDs, derived from `tasks`.
    pub fn dependency_graph(&self) -> HashMap<String, Vec<String>> {
        self.tasks
            .iter()
            .map(|t| (t.id.clone(), t.depends_on.clone()))
            .collect()
    }

    /// Topological groups: group 0 has no dependencies, group 1 depends only
    /// on group 0, and so on. Tasks within a group are sorted by ID for
    /// determinism. Tasks that form a cycle (impossible under this spec's
    /// invariants but handled defensively) are appended as a trailing group.
    pub fn execution_order(&self) -> Vec<Vec<String>> {
        let graph = self.dependency_graph();
        let mut remaining: HashSet<String> = graph.keys().cloned().collect();
        let mut groups = Vec::new();

        while !remaining.is_empty() {
            let mut ready: Vec<String> = remaining
                .iter()
                .filter(|id| {
                    graph
                        .get(*id)
                        .map(|deps| deps.iter().all(|d| !remaining.contains(d)))
                        .unwrap_or(true)
                })
                .cloned()
                .collect();

            if ready.is_empty() {
                // Cycle guard: emit whatever remains as one final group rather
                // than looping forever.
                let mut rest: Vec<String> = remaining.into_iter().collect();
                rest.sort();
                groups.push(rest);
                break;
            }

            ready.sort();
            for id in &ready {
                remaining.remove(id);
            }
            groups.push(ready);
        }

        groups
    }

    pub fn task(&self, id: &str) -> Option<&PlannedTask> {
        self.tasks.iter().find(|t| t.id == id)
    }

    /// BFS-reachable set of task IDs from `start` following `depends_on`
    /// edges backwards (i.e. tasks that transitively depend on `start`).
    pub fn dependents_of(&self, start: &str) -> Vec<String> {
        let graph = self.dependency_graph();
        let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();
        for (id, deps) in &graph {
            for dep in deps {
                dependents.entry(dep.as_str()).or_default().push(id.as_str());
            }
        }

        let mut seen = HashSet::new();
        let mut queue = VecDeque::from([start]);
        let mut out = Vec::new();
        while let Some(id) = queue.pop_front() {
            if let Some(children) = dependents.get(id) {
                for child in children {
                    if seen.insert(*child) {
                        out.push((*child).to_string());
                        queue.push_back(child);
                    }
                }
            }
        }
        out
    }
}
