//! Per-team composite (`Hub`) bundling a mailbox, task queue/gate, workload
//! observer, scaling monitor, context propagator, and file-lock registry.

mod adaptive_lead;
mod file_lock_registry;
mod hub;
mod scaling_monitor;

pub use adaptive_lead::{AdaptiveLead, WorkloadSample};
pub use file_lock_registry::FileLockRegistry;
pub use hub::{Hub, DEFAULT_SCALING_POLL_INTERVAL};
pub use scaling_monitor::{ScalingCallback, ScalingMonitor};
