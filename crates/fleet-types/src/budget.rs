use serde::{Deserialize, Serialize};

/// A team's resource ceiling. Zero in any field means that axis is
/// unbounded.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Budget {
    #[serde(default)]
    pub max_input_tokens: u64,
    #[serde(default)]
    pub max_output_tokens: u64,
    #[serde(default)]
    pub max_total_cost: f64,
}

/// Accumulated resource consumption. Monotonically non-decreasing by
/// construction: every field is only ever added to, never reset, for the
/// lifetime of a team.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Usage {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
    #[serde(default)]
    pub total_cost: f64,
}

impl Usage {
    pub fn add(&mut self, input_tokens: u64, output_tokens: u64, cost: f64) {
        self.input_tokens = self.input_tokens.saturating_add(input_tokens);
        self.output_tokens = self.output_tokens.saturating_add(output_tokens);
        self.total_cost += cost;
    }

    /// Whether any axis of `budget` is currently at or over its limit.
    /// Axes with a zero limit are treated as unbounded and never exhausted.
    pub fn exceeds(&self, budget: &Budget) -> bool {
        (budget.max_input_tokens > 0 && self.input_tokens >= budget.max_input_tokens)
            || (budget.max_output_tokens > 0 && self.output_tokens >= budget.max_output_tokens)
            || (budget.max_total_cost > 0.0 && self.total_cost >= budget.max_total_cost)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_limits_are_unbounded() {
        let usage = Usage {
            input_tokens: 1_000_000,
            output_tokens: 1_000_000,
            total_cost: 1_000_000.0,
        };
        assert!(!usage.exceeds(&Budget::default()));
    }

    #[test]
    fn crossing_any_single_axis_counts_as_exceeded() {
        let budget = Budget {
            max_input_tokens: 0,
            max_output_tokens: 0,
            max_total_cost: 100.0,
        };
        let mut usage = Usage::default();
        assert!(!usage.exceeds(&budget));
        usage.add(0, 0, 150.0);
        assert!(usage.exceeds(&budget));
    }
}
