//! Structured audit events
//!
//! Every security-relevant transition emits one structured `tracing` event
//! with a stable `audit` field, so embedders can route them to their sink of
//! choice with an `EnvFilter`. No state is kept here.

use crate::error::FailureKind;

/// Install a global JSON subscriber honoring `RUST_LOG` / `ENCLAVE_LOG`.
/// Embedders with their own subscriber skip this.
pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_env("ENCLAVE_LOG")
        .or_else(|_| tracing_subscriber::EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .json()
        .with_env_filter(filter)
        .try_init();
}

/// Emit when validation rejects a program.
pub fn audit_validation_rejected(session_id: &str, program_sha256: &str, rule: &str, line: usize) {
    tracing::warn!(
        audit = "validation_rejected",
        session_id,
        program_sha256,
        rule,
        line,
        at = %chrono::Utc::now().to_rfc3339(),
        "program rejected by validator"
    );
}

/// Emit when validation accepts a program.
pub fn audit_validation_passed(session_id: &str, program_sha256: &str) {
    tracing::debug!(
        audit = "validation_passed",
        session_id,
        program_sha256,
        "program accepted by validator"
    );
}

/// Emit when a tool call is dispatched to the host handler.
pub fn audit_tool_call(session_id: &str, call_id: &str, tool: &str, payload_bytes: usize) {
    tracing::info!(
        audit = "tool_call",
        session_id,
        call_id,
        tool,
        payload_bytes,
        "tool call dispatched"
    );
}

/// Emit when a tool call completes (either direction).
pub fn audit_tool_result(session_id: &str, call_id: &str, ok: bool, payload_bytes: usize) {
    tracing::info!(
        audit = "tool_result",
        session_id,
        call_id,
        ok,
        payload_bytes,
        "tool call completed"
    );
}

/// Emit when a resource budget terminates the run.
pub fn audit_budget_exceeded(session_id: &str, kind: FailureKind, detail: &str) {
    tracing::warn!(
        audit = "budget_exceeded",
        session_id,
        kind = kind.as_str(),
        detail,
        "resource budget exceeded"
    );
}

/// Emit when the membrane blocks a property access at runtime.
pub fn audit_membrane_blocked(session_id: &str, property: &str) {
    tracing::debug!(
        audit = "membrane_blocked",
        session_id,
        property,
        "blocked property access"
    );
}

/// Emit once per run at termination.
pub fn audit_run_completed(
    session_id: &str,
    program_sha256: &str,
    outcome: &str,
    elapsed_ms: u64,
    iterations: u64,
    tool_calls: u64,
) {
    tracing::info!(
        audit = "run_completed",
        session_id,
        program_sha256,
        outcome,
        elapsed_ms,
        iterations,
        tool_calls,
        at = %chrono::Utc::now().to_rfc3339(),
        "run completed"
    );
}

/// Emit when an external cancel signal lands.
pub fn audit_cancelled(session_id: &str, hard: bool) {
    tracing::warn!(audit = "cancelled", session_id, hard, "run cancelled");
}

/// Fresh session id for audit correlation.
pub fn new_session_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
