use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use anyhow::{bail, Result};
use fleet_eventbus::{topics, Event, EventBus};
use fleet_team::Team;
use fleet_types::{TeamPhase, TeamSpec, TeamStatus};
use serde_json::json;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

struct ManagerState {
    teams: HashMap<String, Arc<Team>>,
    order: Vec<String>,
}

/// A pending publish collected while `onTeamCompleted` holds the Manager's
/// lock; published only after the lock is dropped so handlers never
/// re-enter the bus while this Manager is mid-mutation.
enum PendingPublish {
    PhaseChanged { team_id: String, phase: TeamPhase },
    Completed { team_id: String, success: bool, completed: usize, failed: usize },
}

/// Owns a set of Teams sharing one `EventBus` and one base directory (each
/// team gets a subdirectory named after its ID, used by out-of-scope
/// collaborators for worktrees — the Manager itself never touches the
/// filesystem). Drives the dependency cascade: a Blocked team starts once
/// every team it `DependsOn` reaches `Done`, and fails once any of them
/// reaches `Failed`.
pub struct Manager {
    bus: EventBus,
    base_dir: PathBuf,
    plan_objective: String,
    state: Arc<Mutex<ManagerState>>,
    started: Arc<AtomicBool>,
    cancel: CancellationToken,
    team_monitors: Arc<StdMutex<HashMap<String, JoinHandle<()>>>>,
    completion_listener: StdMutex<Option<JoinHandle<()>>>,
}

impl Manager {
    pub fn new(bus: EventBus, base_dir: impl Into<PathBuf>, plan_objective: impl Into<String>) -> Self {
        Self {
            bus,
            base_dir: base_dir.into(),
            plan_objective: plan_objective.into(),
            state: Arc::new(Mutex::new(ManagerState { teams: HashMap::new(), order: Vec::new() })),
            started: Arc::new(AtomicBool::new(false)),
            cancel: CancellationToken::new(),
            team_monitors: Arc::new(StdMutex::new(HashMap::new())),
            completion_listener: StdMutex::new(None),
        }
    }

    pub fn base_dir_for(&self, team_id: &str) -> PathBuf {
        self.base_dir.join(team_id)
    }

    fn validate_spec(&self, spec: &TeamSpec) -> Result<()> {
        spec.validate().map_err(anyhow::Error::msg)
    }

    /// Adds a team before `Start`. Validates the spec, rejects a duplicate
    /// ID, and publishes `team.created`.
    pub async fn add_team(&self, spec: TeamSpec) -> Result<()> {
        self.validate_spec(&spec)?;
        let mut state = self.state.lock().await;
        if state.teams.contains_key(&spec.id) {
            bail!("team {} already exists", spec.id);
        }
        let team_id = spec.id.clone();
        let team = Arc::new(Team::new(spec, self.bus.clone(), |_: &str| (false, false), self.plan_objective.clone()));
        state.teams.insert(team_id.clone(), team);
        state.order.push(team_id.clone());
        drop(state);

        self.bus.publish(Event::new(topics::TEAM_CREATED, json!({"teamID": team_id})));
        Ok(())
    }

    /// Adds a team after `Start`. Resolves `DependsOn` against existing
    /// teams, registers it under the lock, then releases the lock BEFORE
    /// starting the team or flipping it to Blocked — `startTeamLocked`
    /// spawns a monitor that publishes events which can re-enter this same
    /// lock via `onTeamCompleted`.
    pub async fn add_team_dynamic(&self, spec: TeamSpec) -> Result<()> {
        self.validate_spec(&spec)?;

        let mut state = self.state.lock().await;
        if state.teams.contains_key(&spec.id) {
            bail!("team {} already exists", spec.id);
        }
        for dep in &spec.depends_on {
            if !state.teams.contains_key(dep) {
                bail!("team {} depends on unknown team {}", spec.id, dep);
            }
        }

        let team_id = spec.id.clone();
        let depends_on = spec.depends_on.clone();
        let team = Arc::new(Team::new(spec, self.bus.clone(), |_: &str| (false, false), self.plan_objective.clone()));
        state.teams.insert(team_id.clone(), team);
        state.order.push(team_id.clone());

        let mut deps_done = true;
        for dep in &depends_on {
            if let Some(dep_team) = state.teams.get(dep) {
                if dep_team.phase().await != TeamPhase::Done {
                    deps_done = false;
                    break;
                }
            }
        }
        drop(state);

        let initial_phase = if depends_on.is_empty() || deps_done {
            self.start_team(&team_id).await;
            TeamPhase::Working
        } else {
            self.block_team(&team_id).await;
            TeamPhase::Blocked
        };

        self.bus.publish(Event::new(
            topics::TEAM_DYNAMIC_ADDED,
            json!({"teamID": team_id, "phase": phase_label(initial_phase)}),
        ));
        Ok(())
    }

    /// Subscribes to `team.completed`, then starts every team whose
    /// `DependsOn` are already Done; the rest become Blocked.
    pub async fn start(&self) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }

        let state_for_listener = self.state.clone();
        let started_for_listener = self.started.clone();
        let bus = self.bus.clone();
        let cancel = self.cancel.clone();
        let monitors = self.team_monitors.clone();
        let manager_bus = self.bus.clone();
        let handle = tokio::spawn(async move {
            let mut rx = bus.subscribe();
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    event = rx.recv() => {
                        let Ok(event) = event else { return };
                        if event.topic != topics::TEAM_COMPLETED {
                            continue;
                        }
                        on_team_completed(&state_for_listener, &started_for_listener, &manager_bus, &monitors, &cancel).await;
                    }
                }
            }
        });
        *self.completion_listener.lock().unwrap() = Some(handle);

        let order: Vec<String> = {
            let state = self.state.lock().await;
            state.order.clone()
        };
        for team_id in order {
            let depends_on = {
                let state = self.state.lock().await;
                state.teams.get(&team_id).map(|t| t.spec().depends_on.clone()).unwrap_or_default()
            };
            let all_done = {
                let state = self.state.lock().await;
                let mut done = true;
                for dep in &depends_on {
                    if let Some(dep_team) = state.teams.get(dep) {
                        if dep_team.phase().await != TeamPhase::Done {
                            done = false;
                            break;
                        }
                    }
                }
                done
            };
            if depends_on.is_empty() || all_done {
                self.start_team(&team_id).await;
            } else {
                self.block_team(&team_id).await;
            }
        }
    }

    async fn block_team(&self, team_id: &str) {
        let team = {
            let state = self.state.lock().await;
            state.teams.get(team_id).cloned()
        };
        let Some(team) = team else { return };
        team.set_phase(TeamPhase::Blocked).await;
        self.bus.publish(Event::new(
            topics::TEAM_PHASE_CHANGED,
            json!({"teamID": team_id, "phase": phase_label(TeamPhase::Blocked)}),
        ));
    }

    /// Transitions a team to Working and starts its Hub, then spawns the
    /// background task that watches its queue for completion.
    async fn start_team(&self, team_id: &str) {
        let team = {
            let state = self.state.lock().await;
            state.teams.get(team_id).cloned()
        };
        let Some(team) = team else { return };

        team.set_phase(TeamPhase::Working).await;
        team.start().await;
        self.bus.publish(Event::new(
            topics::TEAM_PHASE_CHANGED,
            json!({"teamID": team_id, "phase": phase_label(TeamPhase::Working)}),
        ));

        let team_id_owned = team_id.to_string();
        let team_for_monitor = team.clone();
        let bus = self.bus.clone();
        let cancel = self.cancel.clone();
        let handle = tokio::spawn(async move {
            monitor_team_completion(team_id_owned, team_for_monitor, bus, cancel).await;
        });
        self.team_monitors.lock().unwrap().insert(team_id.to_string(), handle);
    }

    pub async fn team(&self, team_id: &str) -> Option<Arc<Team>> {
        self.state.lock().await.teams.get(team_id).cloned()
    }

    /// All teams in insertion order. Used by the phase executor to find the
    /// execution-role teams it needs to attach a Bridge to.
    pub async fn teams(&self) -> Vec<Arc<Team>> {
        let state = self.state.lock().await;
        state.order.iter().filter_map(|id| state.teams.get(id).cloned()).collect()
    }

    pub async fn all_statuses(&self) -> Vec<TeamStatus> {
        let state = self.state.lock().await;
        let mut statuses = Vec::with_capacity(state.order.len());
        for id in &state.order {
            if let Some(team) = state.teams.get(id) {
                statuses.push(team.status().await);
            }
        }
        statuses
    }

    /// Every task across every team that has reached `Completed`. Used by
    /// the debate hook between the execution and review phases.
    pub async fn completed_tasks(&self) -> Vec<fleet_types::PlannedTask> {
        let state = self.state.lock().await;
        let mut out = Vec::new();
        for id in &state.order {
            let Some(team) = state.teams.get(id) else { continue };
            for task in &team.spec().tasks {
                if let Some(queued) = team.hub().gate().task(&task.id).await {
                    if queued.status == fleet_types::TaskStatus::Completed {
                        out.push(queued.task.clone());
                    }
                }
            }
        }
        out
    }

    /// Idempotent. Unsubscribes from `team.completed`, cancels the
    /// Manager's context, stops every Hub, flips `started` false, RELEASES
    /// the lock, and only then waits for the monitor tasks — holding the
    /// lock through that wait would deadlock with an inflight
    /// `team.completed` handler.
    pub async fn stop(&self) {
        if !self.started.swap(false, Ordering::SeqCst) {
            return;
        }
        self.cancel.cancel();

        let teams: Vec<Arc<Team>> = {
            let state = self.state.lock().await;
            state.order.iter().filter_map(|id| state.teams.get(id).cloned()).collect()
        };
        for team in &teams {
            team.stop().await;
        }

        let listener = self.completion_listener.lock().unwrap().take();
        if let Some(handle) = listener {
            let _ = handle.await;
        }
        let monitor_handles: Vec<JoinHandle<()>> = {
            let mut monitors = self.team_monitors.lock().unwrap();
            monitors.drain().map(|(_, h)| h).collect()
        };
        for handle in monitor_handles {
            let _ = handle.await;
        }
    }
}

async fn monitor_team_completion(team_id: String, team: Arc<Team>, bus: EventBus, cancel: CancellationToken) {
    let mut rx = bus.subscribe();

    if publish_if_complete(&team_id, &team, &bus).await {
        return;
    }

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            event = rx.recv() => {
                let Ok(event) = event else { return };
                if event.topic != topics::QUEUE_DEPTH_CHANGED {
                    continue;
                }
                if event.payload.get("teamID").and_then(|v| v.as_str()) != Some(team_id.as_str()) {
                    continue;
                }
                if publish_if_complete(&team_id, &team, &bus).await {
                    return;
                }
            }
        }
    }
}

async fn publish_if_complete(team_id: &str, team: &Arc<Team>, bus: &EventBus) -> bool {
    if !team.hub().gate().is_complete().await {
        return false;
    }
    let counts = team.hub().gate().status().await;
    let success = counts.failed == 0;
    team.set_phase(if success { TeamPhase::Done } else { TeamPhase::Failed }).await;
    bus.publish(Event::new(
        topics::TEAM_COMPLETED,
        json!({
            "teamID": team_id,
            "success": success,
            "completed": counts.completed,
            "failed": counts.failed,
        }),
    ));
    true
}

async fn on_team_completed(
    state: &Arc<Mutex<ManagerState>>,
    started: &Arc<AtomicBool>,
    bus: &EventBus,
    monitors: &Arc<StdMutex<HashMap<String, JoinHandle<()>>>>,
    cancel: &CancellationToken,
) {
    if !started.load(Ordering::SeqCst) {
        return;
    }

    let mut pending: Vec<PendingPublish> = Vec::new();
    let mut to_start: Vec<String> = Vec::new();

    {
        let state_guard = state.lock().await;
        loop {
            let mut changed = false;
            for id in &state_guard.order {
                let Some(team) = state_guard.teams.get(id) else { continue };
                if team.phase().await != TeamPhase::Blocked {
                    continue;
                }
                let deps = &team.spec().depends_on;
                let mut any_failed = false;
                let mut all_done = true;
                for dep in deps {
                    if let Some(dep_team) = state_guard.teams.get(dep) {
                        match dep_team.phase().await {
                            TeamPhase::Failed => any_failed = true,
                            TeamPhase::Done => {}
                            _ => all_done = false,
                        }
                    }
                }
                if any_failed {
                    team.set_phase(TeamPhase::Failed).await;
                    let counts = team.hub().gate().status().await;
                    pending.push(PendingPublish::PhaseChanged { team_id: id.clone(), phase: TeamPhase::Failed });
                    pending.push(PendingPublish::Completed {
                        team_id: id.clone(),
                        success: false,
                        completed: counts.completed,
                        failed: counts.failed,
                    });
                    changed = true;
                } else if all_done && !deps.is_empty() {
                    to_start.push(id.clone());
                    changed = true;
                }
            }
            if !changed {
                break;
            }
        }
    }

    for team_id in to_start {
        let team = { state.lock().await.teams.get(&team_id).cloned() };
        let Some(team) = team else { continue };
        team.set_phase(TeamPhase::Working).await;
        team.start().await;
        pending.push(PendingPublish::PhaseChanged { team_id: team_id.clone(), phase: TeamPhase::Working });

        let bus_for_monitor = bus.clone();
        let cancel_for_monitor = cancel.clone();
        let team_id_owned = team_id.clone();
        let team_for_monitor = team.clone();
        let handle = tokio::spawn(async move {
            monitor_team_completion(team_id_owned, team_for_monitor, bus_for_monitor, cancel_for_monitor).await;
        });
        monitors.lock().unwrap().insert(team_id, handle);
    }

    for publish in pending {
        match publish {
            PendingPublish::PhaseChanged { team_id, phase } => {
                bus.publish(Event::new(topics::TEAM_PHASE_CHANGED, json!({"teamID": team_id, "phase": phase_label(phase)})));
            }
            PendingPublish::Completed { team_id, success, completed, failed } => {
                bus.publish(Event::new(
                    topics::TEAM_COMPLETED,
                    json!({"teamID": team_id, "success": success, "completed": completed, "failed": failed}),
                ));
            }
        }
    }
}

fn phase_label(phase: TeamPhase) -> &'static str {
    match phase {
        TeamPhase::Forming => "forming",
        TeamPhase::Blocked => "blocked",
        TeamPhase::Working => "working",
        TeamPhase::Reporting => "reporting",
        TeamPhase::Done => "done",
        TeamPhase::Failed => "failed",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleet_types::{Budget, EstComplexity, PlannedTask, TeamRole};
    use std::time::Duration;

    fn spec(id: &str, depends_on: &[&str]) -> TeamSpec {
        TeamSpec {
            id: id.to_string(),
            name: id.to_string(),
            role: TeamRole::Execution,
            tasks: vec![PlannedTask {
                id: format!("{id}-t1"),
                title: "t1".to_string(),
                description: String::new(),
                files: Vec::new(),
                depends_on: Vec::new(),
                priority: 1,
                est_complexity: EstComplexity::Medium,
                no_code: false,
                issue_url: None,
            }],
            team_size: 1,
            min_instances: 0,
            max_instances: 0,
            budget: Budget::default(),
            depends_on: depends_on.iter().map(|s| s.to_string()).collect(),
            lead_prompt: String::new(),
        }
    }

    #[tokio::test]
    async fn add_team_rejects_duplicate_ids() {
        let manager = Manager::new(EventBus::new(), "/tmp/fleet", "ship it");
        manager.add_team(spec("exec-0", &[])).await.unwrap();
        assert!(manager.add_team(spec("exec-0", &[])).await.is_err());
    }

    #[tokio::test]
    async fn team_with_no_dependencies_starts_immediately() {
        let manager = Manager::new(EventBus::new(), "/tmp/fleet", "ship it");
        manager.add_team(spec("exec-0", &[])).await.unwrap();
        manager.start().await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        let team = manager.team("exec-0").await.unwrap();
        assert_eq!(team.phase().await, TeamPhase::Working);
        manager.stop().await;
    }

    #[tokio::test]
    async fn dependent_team_starts_blocked_and_is_released_when_dependency_completes() {
        let manager = Manager::new(EventBus::new(), "/tmp/fleet", "ship it");
        manager.add_team(spec("exec-0", &[])).await.unwrap();
        manager.add_team(spec("exec-1", &["exec-0"])).await.unwrap();
        manager.start().await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        let dependent = manager.team("exec-1").await.unwrap();
        assert_eq!(dependent.phase().await, TeamPhase::Blocked);

        let upstream = manager.team("exec-0").await.unwrap();
        let claimed = upstream.hub().gate().claim_next("w1").await.unwrap();
        upstream.hub().gate().mark_running(claimed.id()).await.unwrap();
        upstream.hub().gate().complete(claimed.id()).await.unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(upstream.phase().await, TeamPhase::Done);
        assert_eq!(dependent.phase().await, TeamPhase::Working);

        manager.stop().await;
    }

    #[tokio::test]
    async fn a_failed_dependency_cascades_failure_to_its_dependent() {
        let manager = Manager::new(EventBus::new(), "/tmp/fleet", "ship it");
        manager.add_team(spec("exec-0", &[])).await.unwrap();
        manager.add_team(spec("exec-1", &["exec-0"])).await.unwrap();
        manager.start().await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        let upstream = manager.team("exec-0").await.unwrap();
        upstream.hub().gate().set_max_retries("exec-0-t1", 0).await.unwrap();
        let claimed = upstream.hub().gate().claim_next("w1").await.unwrap();
        upstream.hub().gate().mark_running(claimed.id()).await.unwrap();
        upstream.hub().gate().fail(claimed.id(), "boom").await.unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(upstream.phase().await, TeamPhase::Failed);
        let dependent = manager.team("exec-1").await.unwrap();
        assert_eq!(dependent.phase().await, TeamPhase::Failed);

        manager.stop().await;
    }

    #[tokio::test]
    async fn stop_is_idempotent() {
        let manager = Manager::new(EventBus::new(), "/tmp/fleet", "ship it");
        manager.add_team(spec("exec-0", &[])).await.unwrap();
        manager.start().await;
        manager.stop().await;
        manager.stop().await;
    }
}
