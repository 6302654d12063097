//! Structured reconcile lifecycle events.
//!
//! Every event carries an `event` field (`agent.reconciled`,
//! `object.applied`, ...) so log pipelines can filter on it. Emit through
//! these helpers rather than ad-hoc `info!` calls.

use tracing::{info, info_span, warn, Span};

/// Span tagged with the object being reconciled. Attach it to the reconcile
/// future with `Instrument::instrument`.
///
/// ```ignore
/// async { /* events carry kind = Agent, object = default/helper */ }
///     .instrument(reconcile_span("Agent", "default/helper"))
///     .await
/// ```
pub fn reconcile_span(kind: &str, object: &str) -> Span {
    info_span!("dockhand.reconcile", kind = %kind, object = %object)
}

pub fn emit_reconcile_started(kind: &str, object: &str, generation: i64) {
    info!(event = "reconcile.started", kind = %kind, object = %object, generation = generation);
}

/// A desired object was created, updated or left alone.
pub fn emit_object_applied(object: &dyn std::fmt::Display, outcome: &str) {
    info!(event = "object.applied", object = %object, outcome = %outcome);
}

pub fn emit_object_pruned(object: &dyn std::fmt::Display) {
    info!(event = "object.pruned", object = %object);
}

pub fn emit_status_updated(kind: &str, object: &str, accepted: bool) {
    info!(event = "status.updated", kind = %kind, object = %object, accepted = accepted);
}

pub fn emit_reconcile_finished(kind: &str, object: &str, duration_ms: u64, changed: usize) {
    info!(
        event = "reconcile.finished",
        kind = %kind,
        object = %object,
        duration_ms = duration_ms,
        changed = changed,
    );
}

/// Reconcile failed; the error is also recorded in status.
pub fn emit_reconcile_failed(kind: &str, object: &str, error: &dyn std::fmt::Display) {
    warn!(event = "reconcile.failed", kind = %kind, object = %object, error = %error);
}

pub fn emit_conflict_retry(object: &dyn std::fmt::Display, attempt: u32, delay_ms: u64) {
    warn!(
        event = "object.conflict_retry",
        object = %object,
        attempt = attempt,
        delay_ms = delay_ms
    );
}

pub fn emit_tools_discovered(server: &str, count: usize) {
    info!(event = "tools.discovered", server = %server, count = count);
}

pub fn emit_agent_forgotten(agent: &str) {
    info!(event = "agent.forgotten", agent = %agent);
}
