//! Couples one team's `ApprovalGate` to an externally-hosted AI coding
//! worker factory: the `Bridge` claim loop and per-task monitor, the
//! external-interface traits a host implements, and the prompt builder.

mod bridge;
mod interfaces;

pub use bridge::Bridge;
pub use interfaces::{
    CompletionChecker, ContextPropagator, Instance, InstanceFactory, SessionRecorder, VerifyOutcome,
};
