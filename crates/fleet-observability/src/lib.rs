//! Structured logging for the fleet core, following the same shape the
//! embedding application already uses for its own observability: one
//! `tracing` event per notable transition, with the IDs relevant to its
//! scope as structured fields rather than baked into a formatted string.

use tracing::Level;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// A single structured log record. All fields are optional except `event`
/// and `component`; callers fill in whichever IDs are in scope.
#[derive(Debug, Clone, Default)]
pub struct FleetEvent<'a> {
    pub event: &'a str,
    pub component: &'a str,
    pub plan_id: Option<&'a str>,
    pub team_id: Option<&'a str>,
    pub task_id: Option<&'a str>,
    pub instance_id: Option<&'a str>,
    pub status: Option<&'a str>,
    pub detail: Option<&'a str>,
}

pub fn emit(level: Level, event: FleetEvent<'_>) {
    match level {
        Level::ERROR => tracing::error!(
            target: "fleet.obs",
            component = event.component,
            event = event.event,
            plan_id = event.plan_id.unwrap_or(""),
            team_id = event.team_id.unwrap_or(""),
            task_id = event.task_id.unwrap_or(""),
            instance_id = event.instance_id.unwrap_or(""),
            status = event.status.unwrap_or(""),
            detail = event.detail.unwrap_or(""),
            "fleet_event"
        ),
        Level::WARN => tracing::warn!(
            target: "fleet.obs",
            component = event.component,
            event = event.event,
            plan_id = event.plan_id.unwrap_or(""),
            team_id = event.team_id.unwrap_or(""),
            task_id = event.task_id.unwrap_or(""),
            instance_id = event.instance_id.unwrap_or(""),
            status = event.status.unwrap_or(""),
            detail = event.detail.unwrap_or(""),
            "fleet_event"
        ),
        _ => tracing::info!(
            target: "fleet.obs",
            component = event.component,
            event = event.event,
            plan_id = event.plan_id.unwrap_or(""),
            team_id = event.team_id.unwrap_or(""),
            task_id = event.task_id.unwrap_or(""),
            instance_id = event.instance_id.unwrap_or(""),
            status = event.status.unwrap_or(""),
            detail = event.detail.unwrap_or(""),
            "fleet_event"
        ),
    }
}

/// Installs a compact console subscriber honoring `RUST_LOG`. Intended for
/// the embedding binary's startup path, not called by library code.
pub fn init_console_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let console_layer = tracing_subscriber::fmt::layer()
        .compact()
        .with_target(true)
        .with_ansi(true);

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .try_init();
}
