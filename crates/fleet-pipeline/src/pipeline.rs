use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use anyhow::{bail, Result};
use fleet_debate::DebateCoordinator;
use fleet_decompose::{decompose, DecomposeConfig};
use fleet_eventbus::{topics, Event, EventBus, Mailbox};
use fleet_manager::Manager;
use fleet_types::{PipelinePhase, PlanSpec, TeamRole, TeamSpec};
use serde_json::json;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Phase-partitioned output of `fleet_decompose::decompose`, built once by
/// `Pipeline::decompose` and consumed by `Pipeline::start`.
#[derive(Debug, Clone, Default)]
struct PhaseSpecs {
    planning: Option<TeamSpec>,
    execution: Vec<TeamSpec>,
    review: Option<TeamSpec>,
    consolidation: Option<TeamSpec>,
}

fn partition(specs: Vec<TeamSpec>) -> PhaseSpecs {
    let mut out = PhaseSpecs::default();
    for spec in specs {
        match spec.role {
            TeamRole::Planning => out.planning = Some(spec),
            TeamRole::Review => out.review = Some(spec),
            TeamRole::Consolidation => out.consolidation = Some(spec),
            TeamRole::Execution => out.execution.push(spec),
        }
    }
    out
}

enum PhaseOutcome {
    Success,
    Failed,
    Cancelled,
}

/// Multi-phase sequencer: creates one `Manager` per phase (planning ->
/// execution -> [debate] -> review -> consolidation) and runs them one at a
/// time, cascading a failure in any phase into the whole pipeline failing.
pub struct Pipeline {
    bus: EventBus,
    base_dir: PathBuf,
    plan: PlanSpec,
    phase_specs: StdMutex<Option<PhaseSpecs>>,
    debate_enabled: AtomicBool,
    debate_mailbox: Mailbox,
    phase: RwLock<Option<PipelinePhase>>,
    managers: Mutex<HashMap<&'static str, Arc<Manager>>>,
    cancel: CancellationToken,
    run_handle: StdMutex<Option<JoinHandle<()>>>,
    started: AtomicBool,
}

impl Pipeline {
    pub fn new(bus: EventBus, base_dir: impl Into<PathBuf>, plan: PlanSpec) -> Result<Arc<Self>> {
        if plan.id.trim().is_empty() {
            bail!("plan id must not be empty");
        }
        Ok(Arc::new(Self {
            bus,
            base_dir: base_dir.into(),
            plan,
            phase_specs: StdMutex::new(None),
            debate_enabled: AtomicBool::new(true),
            debate_mailbox: Mailbox::new(),
            phase: RwLock::new(None),
            managers: Mutex::new(HashMap::new()),
            cancel: CancellationToken::new(),
            run_handle: StdMutex::new(None),
            started: AtomicBool::new(false),
        }))
    }

    pub fn set_debate_enabled(&self, enabled: bool) {
        self.debate_enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn plan(&self) -> &PlanSpec {
        &self.plan
    }

    pub fn debate_mailbox(&self) -> &Mailbox {
        &self.debate_mailbox
    }

    /// Must run before `start`. Errors if called a second time or after
    /// `start` has already been invoked.
    pub fn decompose(&self, cfg: DecomposeConfig) -> Result<()> {
        if self.started.load(Ordering::SeqCst) {
            bail!("cannot decompose after the pipeline has started");
        }
        let mut slot = self.phase_specs.lock().unwrap();
        if slot.is_some() {
            bail!("decompose has already run for this pipeline");
        }
        let specs = decompose(&self.plan, &cfg)?;
        *slot = Some(partition(specs));
        Ok(())
    }

    pub async fn phase(&self) -> Option<PipelinePhase> {
        *self.phase.read().await
    }

    pub async fn manager(&self, phase: PipelinePhase) -> Option<Arc<Manager>> {
        self.managers.lock().await.get(phase.label()).cloned()
    }

    /// Spawns the single `run` task and returns immediately. Idempotent.
    pub fn start(self: &Arc<Self>) -> Result<()> {
        let phase_specs = {
            let slot = self.phase_specs.lock().unwrap();
            slot.clone()
        };
        let Some(phase_specs) = phase_specs else {
            bail!("must call decompose before start");
        };
        if self.started.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let this = self.clone();
        let handle = tokio::spawn(async move {
            this.run(phase_specs).await;
        });
        *self.run_handle.lock().unwrap() = Some(handle);
        Ok(())
    }

    async fn run(self: Arc<Self>, phase_specs: PhaseSpecs) {
        let mut phases_run = 0usize;
        let mut review_specs: Vec<TeamSpec> = phase_specs.review.into_iter().collect();
        let planning_specs: Vec<TeamSpec> = phase_specs.planning.into_iter().collect();
        let consolidation_specs: Vec<TeamSpec> = phase_specs.consolidation.into_iter().collect();
        let execution_specs = phase_specs.execution;

        if !planning_specs.is_empty() {
            match self.run_phase(PipelinePhase::Planning, planning_specs).await {
                PhaseOutcome::Success => phases_run += 1,
                PhaseOutcome::Failed => return self.fail(phases_run).await,
                PhaseOutcome::Cancelled => return,
            }
        }

        if !execution_specs.is_empty() {
            match self.run_phase(PipelinePhase::Execution, execution_specs).await {
                PhaseOutcome::Success => {
                    phases_run += 1;
                    if self.debate_enabled.load(Ordering::SeqCst) && !review_specs.is_empty() {
                        let manager = self.managers.lock().await.get(PipelinePhase::Execution.label()).cloned();
                        if let Some(manager) = manager {
                            self.run_debate(&manager, &mut review_specs).await;
                        }
                    }
                }
                PhaseOutcome::Failed => return self.fail(phases_run).await,
                PhaseOutcome::Cancelled => return,
            }
        }

        if !review_specs.is_empty() {
            match self.run_phase(PipelinePhase::Review, review_specs).await {
                PhaseOutcome::Success => phases_run += 1,
                PhaseOutcome::Failed => return self.fail(phases_run).await,
                PhaseOutcome::Cancelled => return,
            }
        }

        if !consolidation_specs.is_empty() {
            match self.run_phase(PipelinePhase::Consolidation, consolidation_specs).await {
                PhaseOutcome::Success => phases_run += 1,
                PhaseOutcome::Failed => return self.fail(phases_run).await,
                PhaseOutcome::Cancelled => return,
            }
        }

        *self.phase.write().await = Some(PipelinePhase::Done);
        self.bus.publish(Event::new(topics::PIPELINE_COMPLETED, json!({"success": true, "phasesRun": phases_run})));
    }

    async fn run_debate(&self, execution_manager: &Arc<Manager>, review_specs: &mut [TeamSpec]) {
        let completed = execution_manager.completed_tasks().await;
        let coordinator = DebateCoordinator::new(self.bus.clone());
        let resolutions = coordinator.run(&self.debate_mailbox, "execution", &completed);
        if resolutions.is_empty() {
            return;
        }
        for spec in review_specs.iter_mut() {
            if spec.lead_prompt.is_empty() {
                spec.lead_prompt = resolutions.clone();
            } else {
                spec.lead_prompt = format!("{}\n\n{}", spec.lead_prompt, resolutions);
            }
        }
    }

    async fn run_phase(&self, phase: PipelinePhase, specs: Vec<TeamSpec>) -> PhaseOutcome {
        if self.cancel.is_cancelled() {
            return PhaseOutcome::Cancelled;
        }

        let manager = Arc::new(Manager::new(self.bus.clone(), self.base_dir.join(phase.label()), self.plan.objective.clone()));
        self.managers.lock().await.insert(phase.label(), manager.clone());
        *self.phase.write().await = Some(phase);
        self.bus.publish(Event::new(topics::PIPELINE_PHASE_CHANGED, json!({"phase": phase.label()})));

        for spec in specs {
            if let Err(err) = manager.add_team(spec).await {
                tracing::error!(phase = phase.label(), error = %err, "failed to add team to phase manager");
                manager.stop().await;
                return PhaseOutcome::Failed;
            }
        }

        manager.start().await;
        let outcome = self.wait_for_completion(&manager).await;
        manager.stop().await;
        outcome
    }

    async fn wait_for_completion(&self, manager: &Arc<Manager>) -> PhaseOutcome {
        let mut rx = self.bus.subscribe();
        loop {
            let statuses = manager.all_statuses().await;
            if !statuses.is_empty()
                && statuses.iter().all(|s| matches!(s.phase, fleet_types::TeamPhase::Done | fleet_types::TeamPhase::Failed))
            {
                let any_failed = statuses.iter().any(|s| s.phase == fleet_types::TeamPhase::Failed);
                return if any_failed { PhaseOutcome::Failed } else { PhaseOutcome::Success };
            }
            tokio::select! {
                _ = self.cancel.cancelled() => return PhaseOutcome::Cancelled,
                event = rx.recv() => {
                    if event.is_err() {
                        return PhaseOutcome::Cancelled;
                    }
                }
            }
        }
    }

    async fn fail(&self, phases_run: usize) {
        *self.phase.write().await = Some(PipelinePhase::Failed);
        self.bus.publish(Event::new(topics::PIPELINE_PHASE_CHANGED, json!({"phase": PipelinePhase::Failed.label()})));
        self.bus.publish(Event::new(topics::PIPELINE_COMPLETED, json!({"success": false, "phasesRun": phases_run})));
    }

    /// Cancels the run task and awaits it via a join handle tracked
    /// separately from any per-phase Manager goroutine, so `stop`
    /// deterministically completes regardless of which phase is in flight.
    pub async fn stop(&self) {
        if !self.started.load(Ordering::SeqCst) {
            return;
        }
        self.cancel.cancel();
        let handle = self.run_handle.lock().unwrap().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleet_types::{EstComplexity, PlannedTask};
    use std::time::Duration;

    fn single_task_plan() -> PlanSpec {
        PlanSpec::new(
            "plan-1",
            "ship it",
            vec![PlannedTask {
                id: "t1".to_string(),
                title: "t1".to_string(),
                description: String::new(),
                files: vec!["a.rs".to_string()],
                depends_on: Vec::new(),
                priority: 1,
                est_complexity: EstComplexity::Medium,
                no_code: false,
                issue_url: None,
            }],
        )
    }

    #[tokio::test]
    async fn single_task_plan_completes_the_pipeline() {
        let bus = EventBus::new();
        let mut events = bus.subscribe();
        let pipeline = Pipeline::new(bus, "/tmp/fleet-pipeline-test", single_task_plan()).unwrap();
        pipeline.decompose(DecomposeConfig::default()).unwrap();
        pipeline.start().unwrap();

        let execution_manager = loop {
            if let Some(manager) = pipeline.manager(PipelinePhase::Execution).await {
                break manager;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        };
        let team = loop {
            let teams = execution_manager.teams().await;
            if let Some(team) = teams.into_iter().next() {
                break team;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        };
        let claimed = team.hub().gate().claim_next("w1").await.unwrap();
        team.hub().gate().mark_running(claimed.id()).await.unwrap();
        team.hub().gate().complete(claimed.id()).await.unwrap();

        let completed = loop {
            let event = events.recv().await.unwrap();
            if event.topic == topics::PIPELINE_COMPLETED {
                break event;
            }
        };
        assert_eq!(completed.payload["success"], true);
        assert_eq!(completed.payload["phasesRun"], 1);

        pipeline.stop().await;
    }

    #[tokio::test]
    async fn decompose_cannot_run_twice() {
        let pipeline = Pipeline::new(EventBus::new(), "/tmp/fleet-pipeline-test2", single_task_plan()).unwrap();
        pipeline.decompose(DecomposeConfig::default()).unwrap();
        assert!(pipeline.decompose(DecomposeConfig::default()).is_err());
    }

    #[tokio::test]
    async fn start_without_decompose_errors() {
        let pipeline = Pipeline::new(EventBus::new(), "/tmp/fleet-pipeline-test3", single_task_plan()).unwrap();
        assert!(pipeline.start().is_err());
    }

    #[tokio::test]
    async fn stop_is_idempotent() {
        let pipeline = Pipeline::new(EventBus::new(), "/tmp/fleet-pipeline-test4", single_task_plan()).unwrap();
        pipeline.decompose(DecomposeConfig::default()).unwrap();
        pipeline.start().unwrap();
        pipeline.stop().await;
        pipeline.stop().await;
    }
}
