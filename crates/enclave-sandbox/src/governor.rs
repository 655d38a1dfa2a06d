//! Resource governor: budgets, counters, checkpoints.
//!
//! One `Governor` per run, mutated only by the executing interpreter
//! thread. Counters are monotonic within a run except `alloc_bytes`
//! (explicit release may decrease it; `peak_alloc_bytes` keeps the
//! maximum). Memory accounting is an estimate bounding programmatically
//! controllable growth, not a heap probe — the worker-level OS limit is
//! the hard backstop.

use enclave_core::error::{EnclaveError, FailureKind};
use enclave_core::limits::{self, CLOCK_CHECK_INTERVAL};
use enclave_core::session::{ExecutionStats, ExecutionStatus};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Budget set resolved from the construction options.
#[derive(Debug, Clone, Copy)]
pub struct Budgets {
    pub max_iterations: u64,
    pub timeout_ms: u64,
    /// 0 disables tracked-allocation enforcement
    pub memory_limit_bytes: u64,
    pub max_console_bytes: u64,
    pub max_console_calls: u64,
    pub max_tool_calls: u64,
    pub max_call_depth: u64,
}

impl Default for Budgets {
    fn default() -> Self {
        Self {
            max_iterations: limits::DEFAULT_MAX_ITERATIONS,
            timeout_ms: limits::DEFAULT_TIMEOUT_MS,
            memory_limit_bytes: limits::DEFAULT_MEMORY_LIMIT_BYTES,
            max_console_bytes: limits::DEFAULT_MAX_CONSOLE_BYTES,
            max_console_calls: limits::DEFAULT_MAX_CONSOLE_CALLS,
            max_tool_calls: limits::DEFAULT_MAX_TOOL_CALLS,
            max_call_depth: limits::DEFAULT_MAX_CALL_DEPTH,
        }
    }
}

pub struct Governor {
    budgets: Budgets,
    iterations: u64,
    console_bytes: u64,
    console_calls: u64,
    tool_calls: u64,
    alloc_bytes: u64,
    peak_alloc_bytes: u64,
    checkpoints: u64,
    start: Instant,
    start_wall_ms: u64,
    cancel: Arc<AtomicBool>,
    console: Vec<String>,
}

impl Governor {
    pub fn new(budgets: Budgets, cancel: Arc<AtomicBool>) -> Self {
        let start_wall_ms = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        Self {
            budgets,
            iterations: 0,
            console_bytes: 0,
            console_calls: 0,
            tool_calls: 0,
            alloc_bytes: 0,
            peak_alloc_bytes: 0,
            checkpoints: 0,
            start: Instant::now(),
            start_wall_ms,
            cancel,
            console: Vec::new(),
        }
    }

    pub fn budgets(&self) -> &Budgets {
        &self.budgets
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }

    /// Cancel + (periodically) wall-clock check. Runs at every loop
    /// iteration, function entry, and tool boundary.
    pub fn checkpoint(&mut self) -> Result<(), EnclaveError> {
        self.checkpoints += 1;
        if self.cancel.load(Ordering::Relaxed) {
            return Err(EnclaveError::new(
                FailureKind::Cancelled,
                "execution cancelled",
            ));
        }
        if self.checkpoints % CLOCK_CHECK_INTERVAL == 0 {
            self.check_clock()?;
        }
        Ok(())
    }

    /// Unconditional wall-clock check; used at suspension boundaries.
    pub fn check_clock(&self) -> Result<(), EnclaveError> {
        let elapsed = self.elapsed_ms();
        if elapsed > self.budgets.timeout_ms {
            return Err(EnclaveError::new(
                FailureKind::Timeout,
                format!(
                    "wall-clock budget of {} ms exceeded ({} ms elapsed)",
                    self.budgets.timeout_ms, elapsed
                ),
            ));
        }
        Ok(())
    }

    /// One loop iteration (or instrumented callback invocation).
    pub fn tick_iteration(&mut self) -> Result<(), EnclaveError> {
        self.iterations += 1;
        if self.iterations > self.budgets.max_iterations {
            return Err(EnclaveError::new(
                FailureKind::ResourceExhausted,
                format!(
                    "iteration budget of {} exceeded",
                    self.budgets.max_iterations
                ),
            )
            .with_data(serde_json::json!({ "iterations": self.iterations })));
        }
        self.checkpoint()
    }

    pub fn check_call_depth(&self, depth: u64) -> Result<(), EnclaveError> {
        if depth > self.budgets.max_call_depth {
            return Err(EnclaveError::new(
                FailureKind::ResourceExhausted,
                format!("call depth budget of {} exceeded", self.budgets.max_call_depth),
            ));
        }
        Ok(())
    }

    fn memory_error(&self, used: u64) -> EnclaveError {
        EnclaveError::new(
            FailureKind::MemoryLimitExceeded,
            format!(
                "tracked allocations of {} bytes exceed limit of {} bytes",
                used, self.budgets.memory_limit_bytes
            ),
        )
        .with_data(serde_json::json!({
            "usedBytes": used,
            "limitBytes": self.budgets.memory_limit_bytes,
        }))
    }

    /// Debit a completed allocation.
    pub fn debit_alloc(&mut self, bytes: u64) -> Result<(), EnclaveError> {
        self.alloc_bytes = self.alloc_bytes.saturating_add(bytes);
        self.peak_alloc_bytes = self.peak_alloc_bytes.max(self.alloc_bytes);
        if self.budgets.memory_limit_bytes > 0 && self.alloc_bytes > self.budgets.memory_limit_bytes
        {
            return Err(self.memory_error(self.alloc_bytes));
        }
        Ok(())
    }

    /// Refuse an allocation before materializing it. Guards natives that
    /// would otherwise build the value first (`repeat`, `fill`, `new Array`).
    pub fn precheck_alloc(&self, bytes: u64) -> Result<(), EnclaveError> {
        if self.budgets.memory_limit_bytes == 0 {
            return Ok(());
        }
        let would_use = self.alloc_bytes.saturating_add(bytes);
        if would_use > self.budgets.memory_limit_bytes {
            return Err(self.memory_error(would_use));
        }
        Ok(())
    }

    /// Explicit release (the one non-monotonic counter).
    pub fn release_alloc(&mut self, bytes: u64) {
        self.alloc_bytes = self.alloc_bytes.saturating_sub(bytes);
    }

    /// One console call carrying `line`.
    pub fn console_write(&mut self, line: String) -> Result<(), EnclaveError> {
        self.console_calls += 1;
        if self.console_calls > self.budgets.max_console_calls {
            return Err(EnclaveError::new(
                FailureKind::IoFlood,
                format!(
                    "console call budget of {} exceeded",
                    self.budgets.max_console_calls
                ),
            ));
        }
        self.console_bytes = self.console_bytes.saturating_add(line.len() as u64);
        if self.console_bytes > self.budgets.max_console_bytes {
            return Err(EnclaveError::new(
                FailureKind::IoFlood,
                format!(
                    "console output budget of {} bytes exceeded",
                    self.budgets.max_console_bytes
                ),
            ));
        }
        self.console.push(line);
        Ok(())
    }

    /// One tool call about to dispatch.
    pub fn tick_tool_call(&mut self) -> Result<(), EnclaveError> {
        self.tool_calls += 1;
        if self.tool_calls > self.budgets.max_tool_calls {
            return Err(EnclaveError::new(
                FailureKind::ToolLimit,
                format!("tool-call budget of {} exceeded", self.budgets.max_tool_calls),
            ));
        }
        Ok(())
    }

    pub fn tool_calls(&self) -> u64 {
        self.tool_calls
    }

    /// Final snapshot folded into the SessionResult.
    pub fn snapshot(
        &self,
        program_sha256: String,
        status: ExecutionStatus,
        hard_terminated: bool,
    ) -> ExecutionStats {
        ExecutionStats {
            iterations: self.iterations,
            console_bytes: self.console_bytes,
            console_calls: self.console_calls,
            tool_calls: self.tool_calls,
            alloc_bytes: self.alloc_bytes,
            peak_alloc_bytes: self.peak_alloc_bytes,
            start_wall_time_ms: self.start_wall_ms,
            elapsed_ms: self.elapsed_ms(),
            program_sha256,
            status,
            hard_terminated,
            console: self.console.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn governor(budgets: Budgets) -> Governor {
        Governor::new(budgets, Arc::new(AtomicBool::new(false)))
    }

    #[test]
    fn test_iteration_budget() {
        let mut g = governor(Budgets {
            max_iterations: 3,
            ..Default::default()
        });
        assert!(g.tick_iteration().is_ok());
        assert!(g.tick_iteration().is_ok());
        assert!(g.tick_iteration().is_ok());
        let err = g.tick_iteration().unwrap_err();
        assert_eq!(err.kind, FailureKind::ResourceExhausted);
    }

    #[test]
    fn test_memory_budget_reports_usage() {
        let mut g = governor(Budgets {
            memory_limit_bytes: 100,
            ..Default::default()
        });
        assert!(g.debit_alloc(60).is_ok());
        let err = g.debit_alloc(60).unwrap_err();
        assert_eq!(err.kind, FailureKind::MemoryLimitExceeded);
        let data = err.data.unwrap();
        assert_eq!(data["usedBytes"], 120);
        assert_eq!(data["limitBytes"], 100);
    }

    #[test]
    fn test_memory_limit_zero_disables_tracking() {
        let mut g = governor(Budgets {
            memory_limit_bytes: 0,
            ..Default::default()
        });
        assert!(g.debit_alloc(u64::MAX / 2).is_ok());
        assert!(g.precheck_alloc(u64::MAX / 2).is_ok());
    }

    #[test]
    fn test_precheck_refuses_without_debiting() {
        let mut g = governor(Budgets {
            memory_limit_bytes: 100,
            ..Default::default()
        });
        g.debit_alloc(50).unwrap();
        assert!(g.precheck_alloc(60).is_err());
        // No debit happened.
        assert!(g.debit_alloc(40).is_ok());
    }

    #[test]
    fn test_peak_tracks_release() {
        let mut g = governor(Budgets::default());
        g.debit_alloc(500).unwrap();
        g.release_alloc(400);
        g.debit_alloc(100).unwrap();
        let stats = g.snapshot("h".into(), ExecutionStatus::Completed, false);
        assert_eq!(stats.alloc_bytes, 200);
        assert_eq!(stats.peak_alloc_bytes, 500);
    }

    #[test]
    fn test_console_budgets() {
        let mut g = governor(Budgets {
            max_console_calls: 2,
            max_console_bytes: 10,
            ..Default::default()
        });
        assert!(g.console_write("12345".into()).is_ok());
        let err = g.console_write("123456789".into()).unwrap_err();
        assert_eq!(err.kind, FailureKind::IoFlood);
    }

    #[test]
    fn test_tool_call_budget() {
        let mut g = governor(Budgets {
            max_tool_calls: 1,
            ..Default::default()
        });
        assert!(g.tick_tool_call().is_ok());
        assert_eq!(g.tick_tool_call().unwrap_err().kind, FailureKind::ToolLimit);
    }

    #[test]
    fn test_cancel_lands_at_checkpoint() {
        let cancel = Arc::new(AtomicBool::new(false));
        let mut g = Governor::new(Budgets::default(), cancel.clone());
        assert!(g.checkpoint().is_ok());
        cancel.store(true, Ordering::Relaxed);
        assert_eq!(g.checkpoint().unwrap_err().kind, FailureKind::Cancelled);
    }
}
