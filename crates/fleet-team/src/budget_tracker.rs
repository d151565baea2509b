use std::sync::atomic::{AtomicBool, Ordering};

use fleet_eventbus::{topics, Event, EventBus};
use fleet_types::{Budget, Usage};
use serde_json::json;
use tokio::sync::Mutex;

/// Per-team resource accumulator. `record` adds to `Usage` and, the first
/// time any axis crosses from below-limit to at-or-over, publishes
/// `team.budget_exhausted` exactly once. Exhaustion is advisory: it blocks
/// scale-ups in the phase executor's scaling-decision callback but does not
/// itself fail the team.
pub struct BudgetTracker {
    team_id: String,
    budget: Budget,
    usage: Mutex<Usage>,
    bus: EventBus,
    exhausted_published: AtomicBool,
}

impl BudgetTracker {
    pub fn new(team_id: impl Into<String>, budget: Budget, bus: EventBus) -> Self {
        Self {
            team_id: team_id.into(),
            budget,
            usage: Mutex::new(Usage::default()),
            bus,
            exhausted_published: AtomicBool::new(false),
        }
    }

    pub async fn record(&self, input_tokens: u64, output_tokens: u64, cost: f64) {
        let mut usage = self.usage.lock().await;
        usage.add(input_tokens, output_tokens, cost);
        let now_exceeds = usage.exceeds(&self.budget);
        let usage_snapshot = *usage;
        drop(usage);

        if now_exceeds && !self.exhausted_published.swap(true, Ordering::SeqCst) {
            self.bus.publish(Event::new(
                topics::TEAM_BUDGET_EXHAUSTED,
                json!({
                    "teamID": self.team_id,
                    "inputTokens": usage_snapshot.input_tokens,
                    "outputTokens": usage_snapshot.output_tokens,
                    "totalCost": usage_snapshot.total_cost,
                }),
            ));
        }
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted_published.load(Ordering::SeqCst)
    }

    pub async fn usage(&self) -> Usage {
        *self.usage.lock().await
    }

    pub fn budget(&self) -> Budget {
        self.budget
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn crossing_the_limit_publishes_exactly_once() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        let budget = Budget { max_input_tokens: 0, max_output_tokens: 0, max_total_cost: 100.0 };
        let tracker = BudgetTracker::new("exec-0", budget, bus);

        tracker.record(0, 0, 60.0).await;
        assert!(!tracker.is_exhausted());

        tracker.record(0, 0, 90.0).await;
        assert!(tracker.is_exhausted());
        let event = rx.recv().await.unwrap();
        assert_eq!(event.topic, topics::TEAM_BUDGET_EXHAUSTED);

        tracker.record(0, 0, 10.0).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn zero_budget_never_exhausts() {
        let tracker = BudgetTracker::new("exec-0", Budget::default(), EventBus::new());
        tracker.record(1_000_000, 1_000_000, 1_000_000.0).await;
        assert!(!tracker.is_exhausted());
    }
}
