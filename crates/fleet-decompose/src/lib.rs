//! Pure file-affinity decomposition of a `PlanSpec` into execution
//! `TeamSpec`s, with optional synthesized planning/review/consolidation
//! teams.

mod decomposer;
mod union_find;

pub use decomposer::{decompose, DecomposeConfig};
