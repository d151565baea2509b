//! A team's task queue and the two decorators layered over it: `EventQueue`
//! (publishes depth-change events) and `ApprovalGate` (withholds gated
//! tasks). `ApprovalGate` is the handle every other component should hold.

mod approval_gate;
mod event_queue;
mod task_queue;

pub use approval_gate::{ApprovalGate, ApprovalLookup, GateError};
pub use event_queue::EventQueue;
pub use task_queue::{QueueError, StatusCounts, TaskQueue};
