//! Hardened execution of agent-supplied code.
//!
//! An [`Enclave`] runs one untrusted program through a layered pipeline:
//! syntactic validation, instrumentation, a dual-context interpreter whose
//! host boundary is a membrane of secure proxies, a resource governor
//! (iterations, wall clock, tracked memory, console I/O, tool calls), and
//! a mediated `callTool` bridge for external effects. Every outcome folds
//! into a [`SessionResult`]; nothing throws past `run`.
//!
//! ```no_run
//! use enclave::{Enclave, EnclaveOptions, SecurityLevel};
//!
//! # async fn demo() {
//! let options = EnclaveOptions {
//!     security_level: SecurityLevel::Secure,
//!     timeout_ms: 2_000,
//!     ..Default::default()
//! };
//! let enclave = Enclave::new(options).unwrap();
//! let result = enclave.run("return 1 + 2;").await;
//! assert_eq!(result.value(), Some(&serde_json::json!(3)));
//! # }
//! ```

pub use enclave_core::config::{
    BridgeMode, DoubleVmConfig, EnclaveOptions, ExecAdapter, HostFunction, PropertyCategory,
    SecureProxyConfig, SecurityLevel, ToolBridgeConfig, ValidatorLimits, WorkerPoolConfig,
};
pub use enclave_core::error::{ConfigError, EnclaveError, FailureKind};
pub use enclave_core::observability;
pub use enclave_core::session::{ExecutionStats, ExecutionStatus, SessionResult};
pub use enclave_sandbox::bridge::{ToolHandler, ToolResponse};
pub use enclave_sandbox::enclave::{CancelHandle, Enclave};
pub use enclave_sandbox::security::ValidatorRulesConfig;

/// Language front-end, exposed for embedders that pre-parse or inspect
/// programs (the validator operates on this AST).
pub mod lang {
    pub use enclave_lang::{parse_program, ParseError, Program, Span};
}
