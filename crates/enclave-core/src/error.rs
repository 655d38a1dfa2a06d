//! Failure taxonomy exposed to callers
//!
//! Every failure a `run` can produce is one of [`FailureKind`]; the kind plus
//! a sanitized message and optional structured data is all the caller sees.
//! Construction-time problems are [`ConfigError`] and are the only errors
//! that surface outside a `SessionResult`.

use serde::{Deserialize, Serialize};

/// Failure kinds folded into a `SessionResult`.
///
/// `Internal` marks a bug in the engine itself and is never reachable from
/// sandboxed code under the documented invariants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureKind {
    /// The validator rejected the program before execution
    ValidationFailed,
    /// A free identifier was not in the level's allow-list
    UnknownGlobal,
    /// The membrane blocked a runtime access, or a cross-realm escape was caught
    SecurityViolation,
    /// Iteration, loop, or recursion cap reached
    ResourceExhausted,
    /// Wall-clock budget exceeded
    Timeout,
    /// Tracked-allocation budget exceeded
    MemoryLimitExceeded,
    /// Console output or call cap reached
    IoFlood,
    /// Tool-call count cap reached
    ToolLimit,
    /// Tool-call request or response exceeded the payload size cap
    ToolPayloadTooLarge,
    /// The host tool handler threw or rejected
    ToolError,
    /// The sandboxed program threw an exception it did not catch
    RuntimeError,
    /// External cancellation
    Cancelled,
    /// Bug in the engine
    Internal,
}

impl FailureKind {
    /// Wire name of the kind (matches the serde representation).
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::ValidationFailed => "VALIDATION_FAILED",
            FailureKind::UnknownGlobal => "UNKNOWN_GLOBAL",
            FailureKind::SecurityViolation => "SECURITY_VIOLATION",
            FailureKind::ResourceExhausted => "RESOURCE_EXHAUSTED",
            FailureKind::Timeout => "TIMEOUT",
            FailureKind::MemoryLimitExceeded => "MEMORY_LIMIT_EXCEEDED",
            FailureKind::IoFlood => "IO_FLOOD",
            FailureKind::ToolLimit => "TOOL_LIMIT",
            FailureKind::ToolPayloadTooLarge => "TOOL_PAYLOAD_TOO_LARGE",
            FailureKind::ToolError => "TOOL_ERROR",
            FailureKind::RuntimeError => "RUNTIME_ERROR",
            FailureKind::Cancelled => "CANCELLED",
            FailureKind::Internal => "INTERNAL",
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A terminal failure raised by any layer of the engine.
///
/// Layers construct these directly; the enclave driver folds them into the
/// `SessionResult` and nothing propagates past the `run` boundary.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct EnclaveError {
    pub kind: FailureKind,
    pub message: String,
    /// Structured detail (e.g. `{rule, location}` or `{usedBytes, limitBytes}`)
    pub data: Option<serde_json::Value>,
}

impl EnclaveError {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Internal, message)
    }
}

/// Errors raised while constructing an enclave. These are the only errors a
/// caller sees outside a `SessionResult`.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// `toolBridge.mode = direct` selected without the acknowledgment flag
    #[error("direct tool bridge requires acknowledge_insecure_direct = true")]
    DirectBridgeNotAcknowledged,

    /// An injected global failed validation
    #[error("invalid global '{name}': {reason}")]
    InvalidGlobal { name: String, reason: String },

    /// Worker pool bounds are inconsistent
    #[error("invalid worker pool config: {0}")]
    InvalidWorkerPool(String),

    /// A rules-config file could not be read or parsed
    #[error("invalid rules config: {0}")]
    InvalidRulesConfig(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_wire_names_round_trip() {
        for kind in [
            FailureKind::ValidationFailed,
            FailureKind::MemoryLimitExceeded,
            FailureKind::ToolPayloadTooLarge,
            FailureKind::Internal,
        ] {
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json, format!("\"{}\"", kind.as_str()));
            let back: FailureKind = serde_json::from_str(&json).unwrap();
            assert_eq!(back, kind);
        }
    }

    #[test]
    fn test_error_display_includes_kind() {
        let err = EnclaveError::new(FailureKind::Timeout, "wall clock exceeded");
        assert_eq!(err.to_string(), "TIMEOUT: wall clock exceeded");
    }
}
