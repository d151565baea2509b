use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use fleet_bridge::{Bridge, CompletionChecker, InstanceFactory, SessionRecorder};
use fleet_eventbus::{topics, Event, EventBus};
use fleet_hub::ScalingCallback;
use fleet_types::TeamRole;
use serde_json::json;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::pipeline::Pipeline;

const WIRING_POLL_INTERVAL: Duration = Duration::from_millis(50);
const WIRING_TIMEOUT: Duration = Duration::from_secs(5);

/// Clamps a `ScalingMonitor` recommendation to a team's declared instance
/// bounds, suppresses scale-ups once the team's budget is exhausted, and
/// applies the result to the bridge's semaphore.
struct ClampingCallback {
    team_id: String,
    bus: EventBus,
    semaphore: fleet_concurrency::DynamicSemaphore,
    min_instances: i64,
    max_instances: i64,
    team: Arc<fleet_team::Team>,
}

impl ScalingCallback for ClampingCallback {
    fn on_delta(&self, delta: i32) {
        let current = self.semaphore.limit();
        if delta > 0 && self.team.budget_tracker().is_exhausted() {
            return;
        }
        let mut new_limit = current + delta as i64;
        if self.min_instances > 0 {
            new_limit = new_limit.max(self.min_instances);
        }
        if self.max_instances > 0 {
            new_limit = new_limit.min(self.max_instances);
        }
        if new_limit == current {
            return;
        }
        self.semaphore.set_limit(new_limit);
        self.bus.publish(Event::new(
            topics::TEAM_SCALED,
            json!({"teamID": self.team_id, "from": current, "to": new_limit}),
        ));
    }
}

/// Watches the pipeline's `pipeline.phase_changed` events and, once the
/// execution phase's teams reach `Working`, attaches one `Bridge` per
/// execution team — wiring the externally-hosted instance factory,
/// completion checker, and session recorder that the pipeline itself never
/// touches.
pub struct PhaseExecutor {
    bus: EventBus,
    pipeline: Arc<Pipeline>,
    instance_factory: Arc<dyn InstanceFactory>,
    completion_checker: Arc<dyn CompletionChecker>,
    session_recorder: Arc<dyn SessionRecorder>,
    bridge_poll_interval: Duration,
    bridges: StdMutex<HashMap<String, Arc<Bridge>>>,
    cancel: CancellationToken,
    handle: StdMutex<Option<JoinHandle<()>>>,
    started: AtomicBool,
}

impl PhaseExecutor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        bus: EventBus,
        pipeline: Arc<Pipeline>,
        instance_factory: Arc<dyn InstanceFactory>,
        completion_checker: Arc<dyn CompletionChecker>,
        session_recorder: Arc<dyn SessionRecorder>,
        bridge_poll_interval: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            bus,
            pipeline,
            instance_factory,
            completion_checker,
            session_recorder,
            bridge_poll_interval,
            bridges: StdMutex::new(HashMap::new()),
            cancel: CancellationToken::new(),
            handle: StdMutex::new(None),
            started: AtomicBool::new(false),
        })
    }

    pub fn bridge(&self, team_id: &str) -> Option<Arc<Bridge>> {
        self.bridges.lock().unwrap().get(team_id).cloned()
    }

    pub fn start(self: &Arc<Self>) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }
        let this = self.clone();
        let handle = tokio::spawn(async move {
            this.watch().await;
        });
        *self.handle.lock().unwrap() = Some(handle);
    }

    async fn watch(self: Arc<Self>) {
        let mut rx = self.bus.subscribe();
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return,
                event = rx.recv() => {
                    let Ok(event) = event else { return };
                    if event.topic != topics::PIPELINE_PHASE_CHANGED {
                        continue;
                    }
                    if event.payload.get("phase").and_then(|v| v.as_str()) != Some("execution") {
                        continue;
                    }
                    self.wire_execution_phase().await;
                }
            }
        }
    }

    async fn wire_execution_phase(&self) {
        let Some(manager) = self.wait_for(|| async {
            self.pipeline.manager(fleet_types::PipelinePhase::Execution).await
        }).await else {
            tracing::warn!("execution phase manager did not appear within the wiring timeout");
            return;
        };

        let teams = manager.teams().await;
        for team in teams {
            if team.spec().role != TeamRole::Execution {
                continue;
            }
            let team_id = team.spec().id.clone();
            if self.bridges.lock().unwrap().contains_key(&team_id) {
                continue;
            }

            let team_for_wait = team.clone();
            let reached_working = self
                .wait_for(|| {
                    let team = team_for_wait.clone();
                    async move {
                        if team.phase().await == fleet_types::TeamPhase::Working {
                            Some(())
                        } else {
                            None
                        }
                    }
                })
                .await
                .is_some();
            if !reached_working {
                tracing::warn!(team_id, "team did not reach Working within the wiring timeout");
                continue;
            }

            let spec = team.spec().clone();
            let bridge = Arc::new(Bridge::new(
                team_id.clone(),
                team.hub().gate(),
                self.instance_factory.clone(),
                self.completion_checker.clone(),
                self.session_recorder.clone(),
                team.hub().context(),
                self.bus.clone(),
                spec.team_size as i64,
                self.bridge_poll_interval,
            ));
            bridge.start();

            let callback = Arc::new(ClampingCallback {
                team_id: team_id.clone(),
                bus: self.bus.clone(),
                semaphore: bridge.semaphore().clone(),
                min_instances: spec.effective_min_instances() as i64,
                max_instances: spec.max_instances as i64,
                team: team.clone(),
            });
            team.hub().scaling_monitor().set_callback(callback);

            self.bridges.lock().unwrap().insert(team_id, bridge);
        }
    }

    /// Polls `check` every `WIRING_POLL_INTERVAL` until it returns `Some`,
    /// the overall `WIRING_TIMEOUT` elapses, or the executor is cancelled.
    async fn wait_for<F, Fut, T>(&self, mut check: F) -> Option<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Option<T>>,
    {
        let deadline = tokio::time::Instant::now() + WIRING_TIMEOUT;
        loop {
            if let Some(value) = check().await {
                return Some(value);
            }
            if tokio::time::Instant::now() >= deadline {
                return None;
            }
            tokio::select! {
                _ = self.cancel.cancelled() => return None,
                _ = tokio::time::sleep(WIRING_POLL_INTERVAL) => {}
            }
        }
    }

    /// Idempotent. Cancels the watch task, then stops every wired bridge.
    pub async fn stop(&self) {
        if !self.started.swap(false, Ordering::SeqCst) {
            return;
        }
        self.cancel.cancel();
        let handle = self.handle.lock().unwrap().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }

        let bridges: Vec<Arc<Bridge>> = {
            let map = self.bridges.lock().unwrap();
            map.values().cloned().collect()
        };
        for bridge in bridges {
            bridge.stop().await;
        }
    }
}
