use fleet_hub::Hub;
use fleet_queue::ApprovalLookup;
use fleet_types::{Budget, TeamPhase, TeamSpec, TeamStatus};

use fleet_eventbus::EventBus;

use crate::budget_tracker::BudgetTracker;

/// Bundle of {Spec, Hub, BudgetTracker, current Phase} — one per team. The
/// Hub supplies the queue/gate the Manager and Bridge operate through; the
/// Team itself is the unit the Manager owns and cascades phase transitions
/// over.
pub struct Team {
    spec: TeamSpec,
    hub: Hub,
    budget: BudgetTracker,
    phase: tokio::sync::RwLock<TeamPhase>,
}

impl Team {
    pub fn new(
        spec: TeamSpec,
        bus: EventBus,
        lookup: impl ApprovalLookup + 'static,
        plan_objective: impl Into<String>,
    ) -> Self {
        let hub = Hub::new(
            spec.id.clone(),
            spec.tasks.clone(),
            bus.clone(),
            lookup,
            plan_objective,
            spec.lead_prompt.clone(),
        );
        let budget = BudgetTracker::new(spec.id.clone(), spec.budget, bus);
        Self {
            spec,
            hub,
            budget,
            phase: tokio::sync::RwLock::new(TeamPhase::Forming),
        }
    }

    pub fn spec(&self) -> &TeamSpec {
        &self.spec
    }

    pub fn hub(&self) -> &Hub {
        &self.hub
    }

    pub fn budget_tracker(&self) -> &BudgetTracker {
        &self.budget
    }

    pub fn budget(&self) -> Budget {
        self.budget.budget()
    }

    pub async fn phase(&self) -> TeamPhase {
        *self.phase.read().await
    }

    /// Swaps in `new_phase`, returning the prior value so the caller can
    /// publish the transition event after dropping the lock.
    pub async fn set_phase(&self, new_phase: TeamPhase) -> TeamPhase {
        let mut phase = self.phase.write().await;
        std::mem::replace(&mut *phase, new_phase)
    }

    /// Composes live queue counts and budget usage with the cached spec and
    /// phase. Each piece is read under its own lock; there is no single lock
    /// spanning the whole snapshot, so a caller can observe a phase and
    /// counts from slightly different instants under heavy concurrency.
    pub async fn status(&self) -> TeamStatus {
        let counts = self.hub.gate().status().await;
        let budget_used = self.budget.usage().await;
        let phase = self.phase().await;
        TeamStatus {
            id: self.spec.id.clone(),
            name: self.spec.name.clone(),
            role: self.spec.role,
            phase,
            tasks_total: counts.total(),
            tasks_done: counts.completed,
            tasks_failed: counts.failed,
            budget_used,
        }
    }

    pub async fn start(&self) {
        self.hub.start();
    }

    pub async fn stop(&self) {
        self.hub.stop().await;
    }
}
