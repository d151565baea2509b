use std::collections::{HashMap, HashSet};

use anyhow::{bail, Result};
use fleet_types::{EstComplexity, PlanSpec, PlannedTask, TeamRole, TeamSpec};

use crate::union_find::UnionFind;

/// Configuration for `decompose`. `min_team_size` of `0` or `1` disables the
/// undersized-group merge pass (a group of one task with no shared files
/// has nothing to merge into anyway).
#[derive(Debug, Clone)]
pub struct DecomposeConfig {
    pub max_team_size: usize,
    pub min_team_size: usize,
    pub default_team_size: u32,
    pub min_team_instances: u32,
    pub max_team_instances: u32,
    pub planning_team: bool,
    pub review_team: bool,
    pub consolidation_team: bool,
}

impl Default for DecomposeConfig {
    fn default() -> Self {
        Self {
            max_team_size: 0,
            min_team_size: 1,
            default_team_size: 2,
            min_team_instances: 0,
            max_team_instances: 0,
            planning_team: false,
            review_team: false,
            consolidation_team: false,
        }
    }
}

/// A group of task IDs produced by union-find, carried through splitting
/// and merging before being turned into a `TeamSpec`.
#[derive(Debug, Clone)]
struct Group {
    task_ids: Vec<String>,
}

impl Group {
    fn files<'a>(&self, files_by_task: &'a HashMap<String, Vec<String>>) -> HashSet<&'a str> {
        self.task_ids
            .iter()
            .filter_map(|id| files_by_task.get(id))
            .flat_map(|files| files.iter().map(String::as_str))
            .collect()
    }
}

/// Groups a `PlanSpec`'s tasks into execution `TeamSpec`s by file affinity
/// (transitive sharing of at least one file), then optionally synthesizes
/// planning/review/consolidation teams. Pure: no side effects, deterministic
/// for a given plan and config.
pub fn decompose(plan: &PlanSpec, cfg: &DecomposeConfig) -> Result<Vec<TeamSpec>> {
    if plan.tasks.is_empty() {
        bail!("cannot decompose a plan with no tasks");
    }

    let tasks_by_id: HashMap<String, &PlannedTask> = plan.tasks.iter().map(|t| (t.id.clone(), t)).collect();
    let files_by_task: HashMap<String, Vec<String>> =
        plan.tasks.iter().map(|t| (t.id.clone(), t.files.clone())).collect();

    let ids: Vec<String> = plan.tasks.iter().map(|t| t.id.clone()).collect();
    let index_of: HashMap<&str, usize> = ids.iter().enumerate().map(|(i, id)| (id.as_str(), i)).collect();

    let mut uf = UnionFind::new(ids.len());
    let mut tasks_by_file: HashMap<&str, Vec<usize>> = HashMap::new();
    for task in &plan.tasks {
        let idx = index_of[task.id.as_str()];
        for file in &task.files {
            tasks_by_file.entry(file.as_str()).or_default().push(idx);
        }
    }
    for indices in tasks_by_file.values() {
        for window in indices.windows(2) {
            uf.union(window[0], window[1]);
        }
    }

    let mut components: HashMap<usize, Vec<String>> = HashMap::new();
    for i in 0..ids.len() {
        let root = uf.find(i);
        components.entry(root).or_default().push(ids[i].clone());
    }

    let mut groups: Vec<Group> = components
        .into_values()
        .map(|mut task_ids| {
            task_ids.sort();
            Group { task_ids }
        })
        .collect();
    groups.sort_by(|a, b| a.task_ids[0].cmp(&b.task_ids[0]));

    if cfg.max_team_size > 0 {
        groups = split_oversized(groups, cfg.max_team_size);
    }
    if cfg.min_team_size > 1 {
        groups = merge_undersized(groups, cfg.min_team_size, &files_by_task);
    }

    let mut specs = Vec::with_capacity(groups.len() + 3);
    for (i, group) in groups.into_iter().enumerate() {
        let tasks: Vec<PlannedTask> = group
            .task_ids
            .iter()
            .filter_map(|id| tasks_by_id.get(id.as_str()).map(|t| (*t).clone()))
            .collect();
        let team_size = cfg.default_team_size.max(1).min(tasks.len() as u32);
        specs.push(TeamSpec {
            id: format!("exec-{i}"),
            name: format!("exec-{i}"),
            role: TeamRole::Execution,
            tasks,
            team_size,
            min_instances: cfg.min_team_instances,
            max_instances: cfg.max_team_instances,
            budget: fleet_types::Budget::default(),
            depends_on: Vec::new(),
            lead_prompt: String::new(),
        });
    }

    if cfg.planning_team {
        specs.insert(0, meta_team("planning-0", TeamRole::Planning, plan, "Plan"));
    }
    if cfg.review_team {
        specs.push(meta_team("review-0", TeamRole::Review, plan, "Review"));
    }
    if cfg.consolidation_team {
        specs.push(meta_team("consolidation-0", TeamRole::Consolidation, plan, "Consolidate"));
    }

    Ok(specs)
}

fn split_oversized(groups: Vec<Group>, max_team_size: usize) -> Vec<Group> {
    let mut out = Vec::with_capacity(groups.len());
    for group in groups {
        if group.task_ids.len() <= max_team_size {
            out.push(group);
            continue;
        }
        for chunk in group.task_ids.chunks(max_team_size) {
            out.push(Group { task_ids: chunk.to_vec() });
        }
    }
    out
}

/// Iteratively merges any group smaller than `min_team_size` into the OTHER
/// group with which it shares the most files, until no more merges are
/// possible (either every group meets the floor, or the remaining
/// undersized groups share no files with anyone).
fn merge_undersized(mut groups: Vec<Group>, min_team_size: usize, files_by_task: &HashMap<String, Vec<String>>) -> Vec<Group> {
    loop {
        let file_sets: Vec<HashSet<&str>> = groups.iter().map(|g| g.files(files_by_task)).collect();

        let mut best_merge: Option<(usize, usize, usize)> = None; // (from, into, overlap)
        for (i, group) in groups.iter().enumerate() {
            if group.task_ids.len() >= min_team_size {
                continue;
            }
            for (j, _) in groups.iter().enumerate() {
                if i == j {
                    continue;
                }
                let overlap = file_sets[i].intersection(&file_sets[j]).count();
                if overlap == 0 {
                    continue;
                }
                let better = match best_merge {
                    None => true,
                    Some((_, _, best_overlap)) => overlap > best_overlap,
                };
                if better {
                    best_merge = Some((i, j, overlap));
                }
            }
        }

        let Some((from, into, _)) = best_merge else { break };
        let merged_ids = groups[from].task_ids.clone();
        groups[into].task_ids.extend(merged_ids);
        groups[into].task_ids.sort();
        groups.remove(from);
    }
    groups
}

fn meta_team(id: &str, role: TeamRole, plan: &PlanSpec, verb: &str) -> TeamSpec {
    let meta_task = PlannedTask {
        id: format!("{id}-meta"),
        title: format!("{verb} plan {}", plan.id),
        description: format!("{verb} the overall plan: {}", plan.objective),
        files: Vec::new(),
        depends_on: Vec::new(),
        priority: 0,
        est_complexity: EstComplexity::Low,
        no_code: true,
        issue_url: None,
    };
    TeamSpec {
        id: id.to_string(),
        name: id.to_string(),
        role,
        tasks: vec![meta_task],
        team_size: 1,
        min_instances: 0,
        max_instances: 0,
        budget: fleet_types::Budget::default(),
        depends_on: Vec::new(),
        lead_prompt: String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleet_types::PlanSpec;

    fn task(id: &str, files: &[&str]) -> PlannedTask {
        PlannedTask {
            id: id.to_string(),
            title: id.to_string(),
            description: String::new(),
            files: files.iter().map(|s| s.to_string()).collect(),
            depends_on: Vec::new(),
            priority: 1,
            est_complexity: EstComplexity::Medium,
            no_code: false,
            issue_url: None,
        }
    }

    #[test]
    fn empty_plan_is_rejected() {
        let plan = PlanSpec::new("p1", "ship it", vec![]);
        assert!(decompose(&plan, &DecomposeConfig::default()).is_err());
    }

    #[test]
    fn tasks_sharing_a_file_land_in_the_same_team() {
        let plan = PlanSpec::new(
            "p1",
            "ship it",
            vec![
                task("t1", &["shared.rs", "a.rs"]),
                task("t2", &["shared.rs", "b.rs"]),
                task("t3", &["c.rs"]),
            ],
        );
        let specs = decompose(&plan, &DecomposeConfig::default()).unwrap();
        assert_eq!(specs.len(), 2);

        let with_two = specs.iter().find(|s| s.tasks.len() == 2).unwrap();
        let ids: HashSet<&str> = with_two.tasks.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, HashSet::from(["t1", "t2"]));

        let with_one = specs.iter().find(|s| s.tasks.len() == 1).unwrap();
        assert_eq!(with_one.tasks[0].id, "t3");
    }

    #[test]
    fn transitive_file_sharing_collapses_into_one_team() {
        let plan = PlanSpec::new(
            "p1",
            "ship it",
            vec![
                task("a", &["file1.rs"]),
                task("b", &["file1.rs", "file2.rs"]),
                task("c", &["file2.rs"]),
            ],
        );
        let specs = decompose(&plan, &DecomposeConfig::default()).unwrap();
        assert_eq!(specs.len(), 1);
        assert_eq!(specs[0].tasks.len(), 3);
    }

    #[test]
    fn oversized_components_are_split_into_consecutive_chunks() {
        let plan = PlanSpec::new(
            "p1",
            "ship it",
            vec![
                task("a", &["shared.rs"]),
                task("b", &["shared.rs"]),
                task("c", &["shared.rs"]),
            ],
        );
        let cfg = DecomposeConfig { max_team_size: 2, ..DecomposeConfig::default() };
        let specs = decompose(&plan, &cfg).unwrap();
        assert_eq!(specs.len(), 2);
        assert_eq!(specs[0].tasks.len(), 2);
        assert_eq!(specs[1].tasks.len(), 1);
    }

    #[test]
    fn undersized_groups_merge_into_the_best_file_sharing_partner() {
        let plan = PlanSpec::new(
            "p1",
            "ship it",
            vec![
                task("a", &["x.rs", "y.rs"]),
                task("b", &["x.rs"]),
                task("c", &["z.rs"]),
            ],
        );
        // a,b share x.rs -> {a,b}; c alone -> {c}; with min_team_size=2, {c} has
        // no overlap with anyone so it stays on its own.
        let cfg = DecomposeConfig { min_team_size: 2, ..DecomposeConfig::default() };
        let specs = decompose(&plan, &cfg).unwrap();
        assert_eq!(specs.len(), 2);
    }

    #[test]
    fn synthesized_teams_carry_a_single_meta_task() {
        let plan = PlanSpec::new("p1", "ship it", vec![task("a", &[])]);
        let cfg = DecomposeConfig {
            planning_team: true,
            review_team: true,
            consolidation_team: true,
            ..DecomposeConfig::default()
        };
        let specs = decompose(&plan, &cfg).unwrap();
        assert!(specs.iter().any(|s| s.role == TeamRole::Planning && s.tasks.len() == 1));
        assert!(specs.iter().any(|s| s.role == TeamRole::Review));
        assert!(specs.iter().any(|s| s.role == TeamRole::Consolidation));
    }
}
