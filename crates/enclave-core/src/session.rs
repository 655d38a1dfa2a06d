//! Session results and the execution state machine
//!
//! These types are the "currency" between the sandbox engine and its
//! embedders: a [`SessionResult`] is everything a caller learns about one
//! run. Once constructed it is never mutated.

use crate::error::{EnclaveError, FailureKind};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Execution lifecycle:
/// `Created → Validating → Rejected | Instrumented → Running →
/// (Suspended ⇄ Running)* → Completed | Failed | Cancelled | TimedOut`.
///
/// Terminal states release the realm; reuse requires a new enclave.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Created,
    Validating,
    Rejected,
    Instrumented,
    Running,
    Suspended,
    Completed,
    Failed,
    Cancelled,
    TimedOut,
}

impl ExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionStatus::Rejected
                | ExecutionStatus::Completed
                | ExecutionStatus::Failed
                | ExecutionStatus::Cancelled
                | ExecutionStatus::TimedOut
        )
    }

    /// Whether `self → next` is a legal transition.
    pub fn can_transition_to(&self, next: ExecutionStatus) -> bool {
        use ExecutionStatus::*;
        matches!(
            (self, next),
            (Created, Validating)
                | (Validating, Rejected)
                | (Validating, Instrumented)
                | (Instrumented, Running)
                | (Running, Suspended)
                | (Suspended, Running)
                | (Running, Completed)
                | (Running, Failed)
                | (Running, Cancelled)
                | (Running, TimedOut)
                | (Suspended, Cancelled)
                | (Suspended, TimedOut)
                | (Suspended, Failed)
        )
    }
}

/// Final resource-counter snapshot plus run metadata.
///
/// Counter fields mirror the governor's live record at termination; the
/// counters themselves are monotonic within a run except `alloc_bytes`,
/// which may decrease on release (`peak_alloc_bytes` keeps the maximum).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionStats {
    pub iterations: u64,
    pub console_bytes: u64,
    pub console_calls: u64,
    pub tool_calls: u64,
    pub alloc_bytes: u64,
    pub peak_alloc_bytes: u64,
    /// Epoch milliseconds at enclave start
    pub start_wall_time_ms: u64,
    /// Wall-clock duration of the run
    pub elapsed_ms: u64,
    /// SHA-256 of the source, for audit correlation
    pub program_sha256: String,
    pub status: ExecutionStatus,
    /// Set when the watchdog abandoned the run instead of a cooperative stop
    pub hard_terminated: bool,
    /// Captured console lines (bounded by the console budgets)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub console: Vec<String>,
}

impl ExecutionStats {
    pub fn empty(program_sha256: String, start_wall_time_ms: u64) -> Self {
        Self {
            iterations: 0,
            console_bytes: 0,
            console_calls: 0,
            tool_calls: 0,
            alloc_bytes: 0,
            peak_alloc_bytes: 0,
            start_wall_time_ms,
            elapsed_ms: 0,
            program_sha256,
            status: ExecutionStatus::Created,
            hard_terminated: false,
            console: Vec::new(),
        }
    }
}

/// Everything one `run` yields. Created by the governor at termination and
/// immutable thereafter; nothing user-visible throws past the run boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "lowercase")]
pub enum SessionResult {
    Success {
        value: serde_json::Value,
        stats: ExecutionStats,
    },
    Failure {
        kind: FailureKind,
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        data: Option<serde_json::Value>,
        stats: ExecutionStats,
    },
}

impl SessionResult {
    pub fn success(value: serde_json::Value, stats: ExecutionStats) -> Self {
        SessionResult::Success { value, stats }
    }

    pub fn failure(err: EnclaveError, stats: ExecutionStats) -> Self {
        SessionResult::Failure {
            kind: err.kind,
            message: err.message,
            data: err.data,
            stats,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, SessionResult::Success { .. })
    }

    pub fn stats(&self) -> &ExecutionStats {
        match self {
            SessionResult::Success { stats, .. } => stats,
            SessionResult::Failure { stats, .. } => stats,
        }
    }

    /// Failure kind, if any.
    pub fn kind(&self) -> Option<FailureKind> {
        match self {
            SessionResult::Success { .. } => None,
            SessionResult::Failure { kind, .. } => Some(*kind),
        }
    }

    /// Success value, if any.
    pub fn value(&self) -> Option<&serde_json::Value> {
        match self {
            SessionResult::Success { value, .. } => Some(value),
            SessionResult::Failure { .. } => None,
        }
    }
}

/// SHA-256 hex digest of a source program, used as the stats/audit
/// correlation id and the validation-cache key.
pub fn program_hash(source: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source.as_bytes());
    hex::encode(hasher.finalize())
}
