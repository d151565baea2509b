use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use fleet_bridge::ContextPropagator;
use fleet_eventbus::{EventBus, Mailbox};
use fleet_queue::{ApprovalGate, ApprovalLookup};
use fleet_types::PlannedTask;

use crate::adaptive_lead::AdaptiveLead;
use crate::file_lock_registry::FileLockRegistry;
use crate::scaling_monitor::ScalingMonitor;

/// Default interval on which the `ScalingMonitor` resamples a team's queue.
pub const DEFAULT_SCALING_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Per-team composite: mailbox, queue/gate, workload observer, scaling
/// monitor, context propagator, and file-lock registry. Every accessor is
/// lock-free because the owned pointers are set once at construction.
pub struct Hub {
    mailbox: Mailbox,
    gate: Arc<ApprovalGate>,
    lead: Arc<AdaptiveLead>,
    scaling_monitor: Arc<ScalingMonitor>,
    context: Arc<ContextPropagator>,
    file_locks: Arc<FileLockRegistry>,
    started: AtomicBool,
}

impl Hub {
    pub fn new(
        team_id: impl Into<String>,
        tasks: Vec<PlannedTask>,
        bus: EventBus,
        lookup: impl ApprovalLookup + 'static,
        plan_objective: impl Into<String>,
        lead_prompt: impl Into<String>,
    ) -> Self {
        let gate = Arc::new(ApprovalGate::new(team_id, tasks, bus, lookup));
        let lead = Arc::new(AdaptiveLead::new());
        let scaling_monitor = Arc::new(ScalingMonitor::new(gate.clone(), lead.clone(), DEFAULT_SCALING_POLL_INTERVAL));
        Self {
            mailbox: Mailbox::new(),
            gate,
            lead,
            scaling_monitor,
            context: Arc::new(ContextPropagator::new(plan_objective, lead_prompt)),
            file_locks: Arc::new(FileLockRegistry::new()),
            started: AtomicBool::new(false),
        }
    }

    pub fn mailbox(&self) -> &Mailbox {
        &self.mailbox
    }

    pub fn gate(&self) -> Arc<ApprovalGate> {
        self.gate.clone()
    }

    pub fn lead(&self) -> Arc<AdaptiveLead> {
        self.lead.clone()
    }

    pub fn scaling_monitor(&self) -> Arc<ScalingMonitor> {
        self.scaling_monitor.clone()
    }

    pub fn context(&self) -> Arc<ContextPropagator> {
        self.context.clone()
    }

    pub fn file_locks(&self) -> Arc<FileLockRegistry> {
        self.file_locks.clone()
    }

    /// Activates the lead and starts the scaling monitor. Idempotent.
    pub fn start(&self) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }
        self.scaling_monitor.start();
    }

    /// Tears the Hub down in reverse start order: stop the scaling monitor
    /// and wait for its goroutine before deactivating the lead. Violating
    /// this order risks deadlock because the monitor task blocks on its own
    /// cancellation token, not the lead's state.
    pub async fn stop(&self) {
        if !self.started.swap(false, Ordering::SeqCst) {
            return;
        }
        self.scaling_monitor.stop().await;
    }
}
