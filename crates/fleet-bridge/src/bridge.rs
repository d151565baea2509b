use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use fleet_concurrency::DynamicSemaphore;
use fleet_eventbus::{topics, Event, EventBus};
use fleet_queue::ApprovalGate;
use serde_json::json;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::interfaces::{CompletionChecker, ContextPropagator, Instance, InstanceFactory, SessionRecorder};

struct Inner {
    team_id: String,
    gate: Arc<ApprovalGate>,
    instance_factory: Arc<dyn InstanceFactory>,
    completion_checker: Arc<dyn CompletionChecker>,
    session_recorder: Arc<dyn SessionRecorder>,
    context: Arc<ContextPropagator>,
    bus: EventBus,
    semaphore: DynamicSemaphore,
    poll_interval: Duration,
    running: StdMutex<HashMap<String, String>>,
    claim_counter: AtomicU64,
}

impl Inner {
    fn next_claim_id(&self) -> String {
        let n = self.claim_counter.fetch_add(1, Ordering::Relaxed);
        format!("{}-claim-{n}", self.team_id)
    }
}

/// Couples one execution-role team's `ApprovalGate` to an externally-hosted
/// worker factory. One Bridge per team: a long-lived claim loop hands tasks
/// out as slots free up, and a short-lived monitor tracks each one through
/// to completion.
pub struct Bridge {
    inner: Arc<Inner>,
    cancel: CancellationToken,
    claim_loop: StdMutex<Option<JoinHandle<()>>>,
    monitors: Arc<StdMutex<Vec<JoinHandle<()>>>>,
    started: Arc<AtomicBool>,
}

impl Bridge {
    /// `max_concurrency` of `0` means unlimited. All three collaborators are
    /// required, owned trait objects — there is no "nil" Bridge to reject,
    /// Rust's ownership model rejects it at the type level instead.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        team_id: impl Into<String>,
        gate: Arc<ApprovalGate>,
        instance_factory: Arc<dyn InstanceFactory>,
        completion_checker: Arc<dyn CompletionChecker>,
        session_recorder: Arc<dyn SessionRecorder>,
        context: Arc<ContextPropagator>,
        bus: EventBus,
        max_concurrency: i64,
        poll_interval: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                team_id: team_id.into(),
                gate,
                instance_factory,
                completion_checker,
                session_recorder,
                context,
                bus,
                semaphore: DynamicSemaphore::new(max_concurrency),
                poll_interval,
                running: StdMutex::new(HashMap::new()),
                claim_counter: AtomicU64::new(0),
            }),
            cancel: CancellationToken::new(),
            claim_loop: StdMutex::new(None),
            monitors: Arc::new(StdMutex::new(Vec::new())),
            started: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn semaphore(&self) -> &DynamicSemaphore {
        &self.inner.semaphore
    }

    /// Snapshot of task IDs currently believed to be running. Omits tasks in
    /// the brief window between a successful claim and the Running-map
    /// insert.
    pub fn running(&self) -> Vec<String> {
        self.inner.running.lock().unwrap().keys().cloned().collect()
    }

    /// Spawns the claim loop and returns immediately. No-op if already started.
    pub fn start(&self) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }
        let inner = self.inner.clone();
        let cancel = self.cancel.clone();
        let monitors = self.monitors.clone();
        let handle = tokio::spawn(async move {
            claim_loop(inner, cancel, monitors).await;
        });
        *self.claim_loop.lock().unwrap() = Some(handle);
    }

    /// Cancels the internal context, waits for the claim loop and every
    /// monitor to finish, then flips the started flag. Idempotent.
    pub async fn stop(&self) {
        if !self.started.load(Ordering::SeqCst) {
            return;
        }
        self.cancel.cancel();

        let claim_handle = self.claim_loop.lock().unwrap().take();
        if let Some(handle) = claim_handle {
            let _ = handle.await;
        }

        let monitor_handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.monitors.lock().unwrap());
        for handle in monitor_handles {
            let _ = handle.await;
        }

        self.started.store(false, Ordering::SeqCst);
    }
}

async fn claim_loop(inner: Arc<Inner>, cancel: CancellationToken, monitors: Arc<StdMutex<Vec<JoinHandle<()>>>>) {
    let mut wake_rx = inner.bus.subscribe();
    loop {
        if cancel.is_cancelled() {
            return;
        }

        let permit = match inner.semaphore.acquire(&cancel).await {
            Ok(permit) => permit,
            Err(_) => return,
        };

        let claim_id = inner.next_claim_id();
        let task = match inner.gate.claim_next(claim_id).await {
            Some(task) => task,
            None => {
                drop(permit);
                if inner.gate.is_complete().await {
                    return;
                }
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = wake_rx.recv() => {}
                }
                continue;
            }
        };

        let task_id = task.id().to_string();
        let prompt = inner.context.build_prompt(&task);

        let instance = match inner.instance_factory.create_instance(prompt).await {
            Ok(instance) => instance,
            Err(err) => {
                fail_and_log(&inner, &task_id, &err.to_string()).await;
                drop(permit);
                continue;
            }
        };

        if let Err(err) = inner.instance_factory.start_instance(&instance).await {
            fail_and_log(&inner, &task_id, &err.to_string()).await;
            drop(permit);
            continue;
        }

        if let Err(err) = inner.gate.mark_running(&task_id).await {
            fail_and_log(&inner, &task_id, &err.to_string()).await;
            drop(permit);
            continue;
        }

        inner.session_recorder.assign_task(&task_id, &instance.id).await;
        inner
            .running
            .lock()
            .unwrap()
            .insert(task_id.clone(), instance.id.clone());
        inner.bus.publish(Event::new(
            topics::BRIDGE_TASK_STARTED,
            json!({"teamID": inner.team_id, "taskID": task_id, "instanceID": instance.id}),
        ));

        let monitor_inner = inner.clone();
        let monitor_cancel = cancel.clone();
        let handle = tokio::spawn(async move {
            monitor_task(monitor_inner, task_id, instance, permit, monitor_cancel).await;
        });
        monitors.lock().unwrap().push(handle);
    }
}

async fn fail_and_log(inner: &Arc<Inner>, task_id: &str, reason: &str) {
    if let Err(gate_err) = inner.gate.fail(task_id, reason.to_string()).await {
        fleet_observability::emit(
            tracing::Level::WARN,
            fleet_observability::FleetEvent {
                event: "bridge.gate_fail_error",
                component: "bridge",
                team_id: Some(&inner.team_id),
                task_id: Some(task_id),
                detail: Some(&format!("reason={reason}, gate_error={gate_err}")),
                ..Default::default()
            },
        );
    }
}

async fn monitor_task(
    inner: Arc<Inner>,
    task_id: String,
    instance: Instance,
    permit: fleet_concurrency::SemaphorePermit,
    cancel: CancellationToken,
) {
    let mut consecutive_errors = 0u32;
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                inner.running.lock().unwrap().remove(&task_id);
                return;
            }
            _ = tokio::time::sleep(inner.poll_interval) => {}
        }

        match inner.completion_checker.check_completion(&instance.worktree_path).await {
            Ok(false) => {
                consecutive_errors = 0;
                continue;
            }
            Ok(true) => {
                let outcome = inner
                    .completion_checker
                    .verify_work(&task_id, &instance.id, &instance.worktree_path, &instance.branch)
                    .await;
                inner.running.lock().unwrap().remove(&task_id);
                report_outcome(&inner, &task_id, outcome).await;
                break;
            }
            Err(err) => {
                consecutive_errors += 1;
                fleet_observability::emit(
                    tracing::Level::WARN,
                    fleet_observability::FleetEvent {
                        event: "bridge.completion_check_failed",
                        component: "bridge",
                        team_id: Some(&inner.team_id),
                        task_id: Some(&task_id),
                        detail: Some(&format!("error={err}, consecutive_errors={consecutive_errors}")),
                        ..Default::default()
                    },
                );
                if consecutive_errors >= 10 {
                    inner.running.lock().unwrap().remove(&task_id);
                    let _ = inner.gate.fail(&task_id, "completion check failed 10 times consecutively").await;
                    inner
                        .session_recorder
                        .record_failure(&task_id, "completion check failed 10 times consecutively")
                        .await;
                    break;
                }
            }
        }
    }
    drop(permit);
}

async fn report_outcome(inner: &Arc<Inner>, task_id: &str, outcome: anyhow::Result<crate::interfaces::VerifyOutcome>) {
    match outcome {
        Ok(verified) if verified.success => {
            let _ = inner.gate.complete(task_id).await;
            inner.session_recorder.record_completion(task_id, verified.commit_count).await;
            inner.bus.publish(Event::new(
                topics::BRIDGE_TASK_COMPLETED,
                json!({"teamID": inner.team_id, "taskID": task_id, "success": true, "commitCount": verified.commit_count}),
            ));
        }
        Ok(unsuccessful) => {
            let reason = unsuccessful.message.unwrap_or_else(|| "verification failed".to_string());
            let _ = inner.gate.fail(task_id, reason.clone()).await;
            inner.session_recorder.record_failure(task_id, &reason).await;
            fleet_observability::emit(
                tracing::Level::WARN,
                fleet_observability::FleetEvent {
                    event: "bridge.verify_failed",
                    component: "bridge",
                    team_id: Some(&inner.team_id),
                    task_id: Some(task_id),
                    detail: Some(&reason),
                    ..Default::default()
                },
            );
            inner.bus.publish(Event::new(
                topics::BRIDGE_TASK_COMPLETED,
                json!({"teamID": inner.team_id, "taskID": task_id, "success": false, "error": reason}),
            ));
        }
        Err(err) => {
            let reason = err.to_string();
            let _ = inner.gate.fail(task_id, reason.clone()).await;
            inner.session_recorder.record_failure(task_id, &reason).await;
            fleet_observability::emit(
                tracing::Level::WARN,
                fleet_observability::FleetEvent {
                    event: "bridge.verify_error",
                    component: "bridge",
                    team_id: Some(&inner.team_id),
                    task_id: Some(task_id),
                    detail: Some(&reason),
                    ..Default::default()
                },
            );
            inner.bus.publish(Event::new(
                topics::BRIDGE_TASK_COMPLETED,
                json!({"teamID": inner.team_id, "taskID": task_id, "success": false, "error": reason}),
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interfaces::VerifyOutcome;
    use async_trait::async_trait;
    use fleet_types::{EstComplexity, PlannedTask};
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::Mutex as AsyncMutex;

    struct ScriptedFactory {
        should_fail: bool,
    }

    #[async_trait]
    impl InstanceFactory for ScriptedFactory {
        async fn create_instance(&self, _prompt: String) -> anyhow::Result<Instance> {
            if self.should_fail {
                anyhow::bail!("could not allocate worker");
            }
            Ok(Instance {
                id: "instance-1".into(),
                worktree_path: "/tmp/worktree-1".into(),
                branch: "task/t1".into(),
            })
        }

        async fn start_instance(&self, _instance: &Instance) -> anyhow::Result<()> {
            Ok(())
        }
    }

    struct StepDrivenChecker {
        verify_success: bool,
    }

    #[async_trait]
    impl CompletionChecker for StepDrivenChecker {
        async fn check_completion(&self, _worktree_path: &str) -> anyhow::Result<bool> {
            Ok(true)
        }

        async fn verify_work(
            &self,
            _task_id: &str,
            _instance_id: &str,
            _worktree_path: &str,
            _base_branch: &str,
        ) -> anyhow::Result<VerifyOutcome> {
            Ok(VerifyOutcome {
                success: self.verify_success,
                commit_count: if self.verify_success { 1 } else { 0 },
                message: if self.verify_success { None } else { Some("no commits".to_string()) },
            })
        }
    }

    #[derive(Default)]
    struct RecordingSessionRecorder {
        completed: AsyncMutex<HashMap<String, u32>>,
        failed: AsyncMutex<HashMap<String, String>>,
        assigned: AtomicUsize,
    }

    #[async_trait]
    impl SessionRecorder for RecordingSessionRecorder {
        async fn assign_task(&self, _task_id: &str, _instance_id: &str) {
            self.assigned.fetch_add(1, Ordering::SeqCst);
        }

        async fn record_completion(&self, task_id: &str, commit_count: u32) {
            self.completed.lock().await.insert(task_id.to_string(), commit_count);
        }

        async fn record_failure(&self, task_id: &str, reason: &str) {
            self.failed.lock().await.insert(task_id.to_string(), reason.to_string());
        }
    }

    fn single_task_gate(bus: EventBus) -> Arc<ApprovalGate> {
        let task = PlannedTask {
            id: "t1".into(),
            title: "Add a.go".into(),
            description: "".into(),
            files: vec!["a.go".into()],
            depends_on: Vec::new(),
            priority: 1,
            est_complexity: EstComplexity::Medium,
            no_code: false,
            issue_url: None,
        };
        Arc::new(ApprovalGate::new("exec-0", vec![task], bus, |_: &str| (false, false)))
    }

    #[tokio::test]
    async fn single_task_happy_path_completes_and_clears_running() {
        let bus = EventBus::new();
        let mut events = bus.subscribe();
        let gate = single_task_gate(bus.clone());
        let recorder = Arc::new(RecordingSessionRecorder::default());

        let bridge = Bridge::new(
            "exec-0",
            gate.clone(),
            Arc::new(ScriptedFactory { should_fail: false }),
            Arc::new(StepDrivenChecker { verify_success: true }),
            recorder.clone(),
            Arc::new(ContextPropagator::new("", "")),
            bus,
            1,
            Duration::from_millis(5),
        );

        bridge.start();

        let started = events.recv().await.unwrap();
        assert_eq!(started.topic, topics::BRIDGE_TASK_STARTED);
        let completed = events.recv().await.unwrap();
        assert_eq!(completed.topic, topics::BRIDGE_TASK_COMPLETED);
        assert_eq!(completed.payload["success"], true);
        assert_eq!(completed.payload["commitCount"], 1);

        bridge.stop().await;

        assert!(bridge.running().is_empty());
        assert_eq!(recorder.completed.lock().await.get("t1"), Some(&1));
        assert!(gate.is_complete().await);
    }

    #[tokio::test]
    async fn verification_failure_records_failure_and_retries() {
        let bus = EventBus::new();
        let mut events = bus.subscribe();
        let gate = single_task_gate(bus.clone());
        let recorder = Arc::new(RecordingSessionRecorder::default());

        let bridge = Bridge::new(
            "exec-0",
            gate.clone(),
            Arc::new(ScriptedFactory { should_fail: false }),
            Arc::new(StepDrivenChecker { verify_success: false }),
            recorder.clone(),
            Arc::new(ContextPropagator::new("", "")),
            bus,
            1,
            Duration::from_millis(5),
        );

        bridge.start();

        let _started = events.recv().await.unwrap();
        let completed = events.recv().await.unwrap();
        assert_eq!(completed.topic, topics::BRIDGE_TASK_COMPLETED);
        assert_eq!(completed.payload["success"], false);
        assert_eq!(completed.payload["error"], "no commits");

        bridge.stop().await;

        assert_eq!(recorder.failed.lock().await.get("t1").map(String::as_str), Some("no commits"));
    }
}
