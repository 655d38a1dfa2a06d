//! The enclave driver: one instance, one program, one result.
//!
//! Drives the pipeline `Validating → Instrumented → Running → terminal`
//! and folds every outcome into a [`SessionResult`]; nothing escapes the
//! `run` boundary. The interpreter occupies a blocking thread chosen by
//! the execution adapter; this driver owns the watchdog, the bridge task,
//! and the cancel flag. Terminal states release the realm — running again
//! requires a new instance, which is why `run` consumes the enclave.

use crate::bridge::{call_tool_native, failure_kind_of_throw, serve_bridge, ToolHandler, ToolPort};
use crate::governor::{Budgets, Governor};
use crate::instrument::instrument_program;
use crate::membrane::{value_to_json, BlockedPropertySet, Membrane};
use crate::realm::interpreter::{run_program, Interp};
use crate::realm::intrinsics::seed_globals;
use crate::realm::value::{to_display_string, Control};
use crate::sanitize::Sanitizer;
use crate::security::{validate_program, ValidatorRulesConfig};
use crate::worker::{ExecHost, WorkerPool};
use enclave_core::config::{EnclaveOptions, ExecAdapter};
use enclave_core::error::{ConfigError, EnclaveError, FailureKind};
use enclave_core::limits::{DEFAULT_PROXY_MAX_DEPTH, WATCHDOG_GRACE_MS};
use enclave_core::observability;
use enclave_core::session::{program_hash, ExecutionStats, ExecutionStatus, SessionResult};
use enclave_lang::parse_program;
use enclave_lang::span::line_col;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Cloneable cancel signal. Cancellation lands at the next cooperative
/// checkpoint or tool boundary, whichever comes first.
#[derive(Clone)]
pub struct CancelHandle {
    flag: Arc<AtomicBool>,
    session_id: String,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
        observability::audit_cancelled(&self.session_id, false);
    }
}

pub struct Enclave {
    options: EnclaveOptions,
    handler: Option<Arc<dyn ToolHandler>>,
    rules_config: ValidatorRulesConfig,
    cancel: Arc<AtomicBool>,
    session_id: String,
    status: ExecutionStatus,
    host: ExecHost,
}

impl Enclave {
    pub fn new(options: EnclaveOptions) -> Result<Self, ConfigError> {
        options.check()?;
        let host = match options.adapter {
            ExecAdapter::InProcess => ExecHost::InProcess,
            ExecAdapter::WorkerPool => {
                ExecHost::Pool(WorkerPool::new(options.worker_pool.clone())?)
            }
        };
        Ok(Self {
            options,
            handler: None,
            rules_config: ValidatorRulesConfig::default(),
            cancel: Arc::new(AtomicBool::new(false)),
            session_id: observability::new_session_id(),
            status: ExecutionStatus::Created,
            host,
        })
    }

    /// Attach the host tool handler. Without one, in-sandbox `callTool`
    /// fails as a tool error.
    pub fn with_tool_handler(mut self, handler: Arc<dyn ToolHandler>) -> Self {
        self.handler = Some(handler);
        self
    }

    /// Override the validator rules configuration (custom denylist
    /// entries, disabled optional rules, literal bounds).
    pub fn with_rules_config(mut self, config: ValidatorRulesConfig) -> Self {
        self.rules_config = config;
        self
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            flag: self.cancel.clone(),
            session_id: self.session_id.clone(),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn status(&self) -> ExecutionStatus {
        self.status
    }

    /// Explicit teardown; also happens on drop. Releases worker slots.
    pub fn dispose(self) {
        if let ExecHost::Pool(pool) = &self.host {
            pool.dispose();
        }
    }

    fn transition(&mut self, next: ExecutionStatus) {
        debug_assert!(
            self.status.can_transition_to(next),
            "illegal transition {:?} -> {:?}",
            self.status,
            next
        );
        self.status = next;
    }

    /// Execute one source program to completion. Consumes the enclave:
    /// terminal states release the realm.
    pub async fn run(mut self, source: &str) -> SessionResult {
        let hash = program_hash(source);
        let start_wall_ms = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        let started = std::time::Instant::now();
        self.transition(ExecutionStatus::Validating);

        // Parse. Syntax failures are validation failures.
        let mut program = match parse_program(source) {
            Ok(program) => program,
            Err(e) => {
                self.transition(ExecutionStatus::Rejected);
                let (line, column) = line_col(source, e.offset);
                observability::audit_validation_rejected(&self.session_id, &hash, "syntax", line);
                let mut stats = ExecutionStats::empty(hash, start_wall_ms);
                stats.status = ExecutionStatus::Rejected;
                return SessionResult::failure(
                    EnclaveError::new(
                        FailureKind::ValidationFailed,
                        format!("syntax error: {}", e.message),
                    )
                    .with_data(serde_json::json!({
                        "rule": "syntax",
                        "location": { "line": line, "column": column },
                    })),
                    stats,
                );
            }
        };

        // Validate, unless explicitly bypassed for runtime-layer testing.
        if self.options.validate {
            let mut extra_globals: Vec<String> = self.options.globals.keys().cloned().collect();
            extra_globals.extend(self.options.global_functions.keys().cloned());
            let limits = self
                .rules_config
                .limits
                .unwrap_or(self.options.validator_limits);
            if let Err(violation) = validate_program(
                source,
                &program,
                self.options.security_level,
                &extra_globals,
                limits,
                &self.rules_config,
            ) {
                self.transition(ExecutionStatus::Rejected);
                observability::audit_validation_rejected(
                    &self.session_id,
                    &hash,
                    &violation.rule,
                    violation.line,
                );
                let kind = if violation.unknown_global {
                    FailureKind::UnknownGlobal
                } else {
                    FailureKind::ValidationFailed
                };
                let mut stats = ExecutionStats::empty(hash, start_wall_ms);
                stats.status = ExecutionStatus::Rejected;
                return SessionResult::failure(
                    EnclaveError::new(kind, violation.message.clone()).with_data(
                        serde_json::json!({
                            "rule": violation.rule,
                            "location": { "line": violation.line, "column": violation.column },
                            "snippet": violation.snippet,
                        }),
                    ),
                    stats,
                );
            }
            observability::audit_validation_passed(&self.session_id, &hash);
        }

        instrument_program(&mut program);
        self.transition(ExecutionStatus::Instrumented);

        // Resolve budgets; a worker-pool memory cap tightens the limit.
        let mut budgets = Budgets {
            max_iterations: self.options.max_iterations,
            timeout_ms: self.options.timeout_ms,
            memory_limit_bytes: self.options.memory_limit_bytes,
            max_console_bytes: self.options.max_console_output_bytes,
            max_console_calls: self.options.max_console_calls,
            max_tool_calls: self.options.max_tool_calls,
            max_call_depth: self.options.max_call_depth,
        };
        if matches!(self.options.adapter, ExecAdapter::WorkerPool)
            && self.options.worker_pool.memory_limit_per_worker > 0
        {
            let per_worker = self.options.worker_pool.memory_limit_per_worker;
            budgets.memory_limit_bytes = if budgets.memory_limit_bytes == 0 {
                per_worker
            } else {
                budgets.memory_limit_bytes.min(per_worker)
            };
        }

        // Bridge task, when a handler is attached.
        let (port, bridge_handle) = match &self.handler {
            Some(handler) => {
                let (tx, rx) = tokio::sync::mpsc::channel(1);
                let bridge = tokio::spawn(serve_bridge(
                    rx,
                    handler.clone(),
                    self.options.tool_bridge.max_payload_bytes,
                ));
                let port = ToolPort::new(
                    tx,
                    self.options.tool_bridge.clone(),
                    self.options.double_vm.enabled,
                    self.session_id.clone(),
                );
                (Some(port), Some(bridge))
            }
            None => (None, None),
        };

        // Everything the interpreter thread needs, moved in as plain data.
        let level_config = self.options.security_level.config();
        let proxy_config = self.options.secure_proxy.clone();
        let proxy_depth = proxy_config
            .proxy_max_depth
            .unwrap_or(DEFAULT_PROXY_MAX_DEPTH);
        let redact = self.options.redact_stacks();
        let json_globals = self.options.globals.clone();
        let fn_globals = self.options.global_functions.clone();
        let cancel = self.cancel.clone();
        let session_id = self.session_id.clone();

        self.transition(ExecutionStatus::Running);
        let work = move || -> (Governor, Result<serde_json::Value, EnclaveError>) {
            let mut governor = Governor::new(budgets, cancel);
            let blocked = Rc::new({
                let sid = session_id.clone();
                BlockedPropertySet::from_config(&level_config, &proxy_config)
                    .with_on_blocked(move |name| observability::audit_membrane_blocked(&sid, name))
            });
            let membrane = Membrane::new(blocked.clone(), proxy_depth);
            let sanitizer = Rc::new(Sanitizer::new(redact));

            let mut globals = seed_globals(level_config.expose_console);
            for (name, json) in json_globals {
                globals.push((name, membrane.wrap_json(Rc::new(json), 0)));
            }
            for (name, f) in fn_globals {
                globals.push((name.clone(), membrane.wrap_function(name, f)));
            }
            globals.push(("callTool".to_string(), call_tool_native(sanitizer.clone())));

            let mut interp = Interp::new(
                &mut governor,
                blocked,
                membrane,
                port,
                session_id.clone(),
            );
            let outcome = run_program(&program, &mut interp, globals);
            drop(interp);

            let result = match outcome {
                Ok(value) => value_to_json(&value, 64, true).map_err(|e| {
                    EnclaveError::new(
                        FailureKind::RuntimeError,
                        format!("result is not structurally clonable: {}", e),
                    )
                }),
                Err(Control::Throw(thrown)) => {
                    let kind = failure_kind_of_throw(&thrown);
                    let message = sanitizer.sanitize_message(&to_display_string(&thrown));
                    Err(EnclaveError::new(kind, format!("uncaught error: {}", message)))
                }
                Err(Control::Terminate(e)) => Err(e),
                Err(_) => Err(EnclaveError::internal("loop control escaped the program")),
            };
            (governor, result)
        };

        let deadline = Duration::from_millis(self.options.timeout_ms + WATCHDOG_GRACE_MS);
        let outcome = tokio::time::timeout(deadline, self.host.run(work)).await;
        if let Some(bridge) = bridge_handle {
            bridge.abort();
        }

        let result = match outcome {
            // Watchdog fired: a suspended or native operation overran the
            // budget past the grace period. The worker is abandoned; the
            // cancel flag stops it at its next cooperative checkpoint.
            Err(_) => {
                self.cancel.store(true, Ordering::Relaxed);
                self.transition(ExecutionStatus::TimedOut);
                observability::audit_budget_exceeded(
                    &self.session_id,
                    FailureKind::Timeout,
                    "watchdog hard termination",
                );
                let mut stats = ExecutionStats::empty(hash.clone(), start_wall_ms);
                stats.status = ExecutionStatus::TimedOut;
                stats.hard_terminated = true;
                stats.elapsed_ms = started.elapsed().as_millis() as u64;
                SessionResult::failure(
                    EnclaveError::new(
                        FailureKind::Timeout,
                        format!(
                            "wall-clock budget of {} ms exceeded (hard termination)",
                            self.options.timeout_ms
                        ),
                    ),
                    stats,
                )
            }
            Ok(Err(join_error)) => {
                self.transition(ExecutionStatus::Failed);
                let mut stats = ExecutionStats::empty(hash.clone(), start_wall_ms);
                stats.status = ExecutionStatus::Failed;
                stats.elapsed_ms = started.elapsed().as_millis() as u64;
                SessionResult::failure(join_error, stats)
            }
            Ok(Ok((governor, result))) => match result {
                Ok(value) => {
                    self.transition(ExecutionStatus::Completed);
                    let stats =
                        governor.snapshot(hash.clone(), ExecutionStatus::Completed, false);
                    SessionResult::success(value, stats)
                }
                Err(error) => {
                    let status = match error.kind {
                        FailureKind::Timeout => ExecutionStatus::TimedOut,
                        FailureKind::Cancelled => ExecutionStatus::Cancelled,
                        _ => ExecutionStatus::Failed,
                    };
                    if matches!(
                        error.kind,
                        FailureKind::ResourceExhausted
                            | FailureKind::Timeout
                            | FailureKind::MemoryLimitExceeded
                            | FailureKind::IoFlood
                            | FailureKind::ToolLimit
                    ) {
                        observability::audit_budget_exceeded(
                            &self.session_id,
                            error.kind,
                            &error.message,
                        );
                    }
                    self.transition(status);
                    let stats = governor.snapshot(hash.clone(), status, false);
                    SessionResult::failure(error, stats)
                }
            },
        };

        let stats = result.stats();
        observability::audit_run_completed(
            &self.session_id,
            &hash,
            if result.is_success() {
                "success"
            } else {
                "failure"
            },
            stats.elapsed_ms,
            stats.iterations,
            stats.tool_calls,
        );
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use enclave_core::config::SecurityLevel;

    fn options(level: SecurityLevel) -> EnclaveOptions {
        EnclaveOptions {
            security_level: level,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_baseline_success() {
        let enclave = Enclave::new(options(SecurityLevel::Secure)).unwrap();
        let result = enclave.run("return 1 + 2;").await;
        assert!(result.is_success());
        assert_eq!(result.value(), Some(&serde_json::json!(3)));
        assert_eq!(result.stats().status, ExecutionStatus::Completed);
    }

    #[tokio::test]
    async fn test_validation_rejection_short_circuits() {
        let enclave = Enclave::new(options(SecurityLevel::Secure)).unwrap();
        let result = enclave.run("return eval('1');").await;
        assert_eq!(result.kind(), Some(FailureKind::ValidationFailed));
        assert_eq!(result.stats().status, ExecutionStatus::Rejected);
        assert_eq!(result.stats().iterations, 0);
    }

    #[tokio::test]
    async fn test_syntax_error_is_validation_failure() {
        let enclave = Enclave::new(options(SecurityLevel::Secure)).unwrap();
        let result = enclave.run("let = ;").await;
        assert_eq!(result.kind(), Some(FailureKind::ValidationFailed));
        match &result {
            SessionResult::Failure { data: Some(data), .. } => {
                assert_eq!(data["rule"], "syntax");
            }
            other => panic!("expected failure with data, got success={}", other.is_success()),
        }
    }

    #[tokio::test]
    async fn test_iteration_overflow() {
        let mut opts = options(SecurityLevel::Secure);
        opts.max_iterations = 100;
        let enclave = Enclave::new(opts).unwrap();
        let result = enclave
            .run("let s=0; for (let i=0;i<1000;i++) s+=i; return s;")
            .await;
        assert_eq!(result.kind(), Some(FailureKind::ResourceExhausted));
        assert!(result.stats().iterations >= 100);
    }

    #[tokio::test]
    async fn test_uncaught_throw_is_runtime_error() {
        let enclave = Enclave::new(options(SecurityLevel::Secure)).unwrap();
        let result = enclave.run("throw { message: 'kaput' };").await;
        assert_eq!(result.kind(), Some(FailureKind::RuntimeError));
    }

    #[tokio::test]
    async fn test_validate_bypass_reaches_runtime() {
        let mut opts = options(SecurityLevel::Secure);
        opts.validate = false;
        let enclave = Enclave::new(opts).unwrap();
        // Would be rejected by the validator; the membrane still blocks.
        let result = enclave.run("return ({}).constructor === undefined;").await;
        assert!(result.is_success());
        assert_eq!(result.value(), Some(&serde_json::json!(true)));
    }

    #[tokio::test]
    async fn test_cancel_handle() {
        let mut opts = options(SecurityLevel::Secure);
        opts.max_iterations = u64::MAX;
        opts.timeout_ms = 10_000;
        let enclave = Enclave::new(opts).unwrap();
        let handle = enclave.cancel_handle();
        handle.cancel();
        let result = enclave
            .run("let i = 0; while (i < 100000000) { i++; } return i;")
            .await;
        assert_eq!(result.kind(), Some(FailureKind::Cancelled));
        assert_eq!(result.stats().status, ExecutionStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_injected_globals_visible_and_wrapped() {
        let mut opts = options(SecurityLevel::Secure);
        opts.globals.insert(
            "config".to_string(),
            serde_json::json!({ "retries": 3, "tags": ["a", "b"] }),
        );
        let enclave = Enclave::new(opts).unwrap();
        let result = enclave
            .run("return config.retries + config.tags.length;")
            .await;
        assert_eq!(result.value(), Some(&serde_json::json!(5)));
    }

    #[tokio::test]
    async fn test_console_only_in_permissive() {
        let enclave = Enclave::new(options(SecurityLevel::Permissive)).unwrap();
        let result = enclave.run("console.log('hi'); return 1;").await;
        assert!(result.is_success());
        assert_eq!(result.stats().console, vec!["hi".to_string()]);
        assert_eq!(result.stats().console_calls, 1);
    }
}
