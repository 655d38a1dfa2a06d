//! Budget enforcement, tool-call round trips, and lifecycle scenarios.

use enclave::{
    BridgeMode, Enclave, EnclaveOptions, ExecAdapter, ExecutionStatus, FailureKind, SecurityLevel,
    SessionResult, ToolHandler,
};
use std::sync::Arc;

fn options(level: SecurityLevel) -> EnclaveOptions {
    EnclaveOptions {
        security_level: level,
        timeout_ms: 2_000,
        ..Default::default()
    }
}

fn echo_handler() -> Arc<dyn ToolHandler> {
    Arc::new(|name: &str, args: serde_json::Value| {
        Ok(serde_json::json!({ "tool": name, "args": args }))
    })
}

// ─── Scenarios S1–S3, S6 ─────────────────────────────────────────────────

#[tokio::test]
async fn s1_baseline_success() {
    let enclave = Enclave::new(options(SecurityLevel::Secure)).unwrap();
    let result = enclave.run("return 1 + 2;").await;
    assert_eq!(result.value(), Some(&serde_json::json!(3)));
    assert_eq!(result.stats().status, ExecutionStatus::Completed);
}

#[tokio::test]
async fn s2_iteration_overflow() {
    let mut opts = options(SecurityLevel::Secure);
    opts.max_iterations = 100;
    let enclave = Enclave::new(opts).unwrap();
    let result = enclave
        .run("let s=0; for (let i=0;i<1000;i++) s+=i; return s;")
        .await;
    assert_eq!(result.kind(), Some(FailureKind::ResourceExhausted));
    // Reported measurement is at or past the limit (property 5).
    assert!(result.stats().iterations >= 100);
}

#[tokio::test]
async fn s3_memory_bomb() {
    let mut opts = options(SecurityLevel::Secure);
    opts.memory_limit_bytes = 1024 * 1024;
    let enclave = Enclave::new(opts).unwrap();
    let result = enclave
        .run("let s=\"a\"; for (let i=0;i<25;i++) s = s+s; return s.length;")
        .await;
    assert_eq!(result.kind(), Some(FailureKind::MemoryLimitExceeded));
    match &result {
        SessionResult::Failure { data: Some(data), .. } => {
            assert!(data["usedBytes"].as_u64().unwrap() > 1024 * 1024);
            assert_eq!(data["limitBytes"], 1024 * 1024);
        }
        other => panic!("expected data on failure, success={}", other.is_success()),
    }
}

#[tokio::test]
async fn s6_tool_round_trip() {
    let handler: Arc<dyn ToolHandler> =
        Arc::new(|_: &str, _: serde_json::Value| Ok(serde_json::json!({ "count": 42 })));
    let enclave = Enclave::new(options(SecurityLevel::Secure))
        .unwrap()
        .with_tool_handler(handler);
    let result = enclave
        .run("const r = await callTool('t', {}); return r.count;")
        .await;
    assert_eq!(result.value(), Some(&serde_json::json!(42)));
    assert_eq!(result.stats().tool_calls, 1);
}

// ─── Tool-call round-trip structural equality (property 7) ───────────────

#[tokio::test]
async fn tool_result_structurally_equal_under_json() {
    let payload = serde_json::json!({
        "list": [1, 2.5, "three", null, true],
        "nested": { "deep": { "value": "ok" } },
    });
    let expected = payload.clone();
    let handler: Arc<dyn ToolHandler> =
        Arc::new(move |_: &str, _: serde_json::Value| Ok(payload.clone()));
    let enclave = Enclave::new(options(SecurityLevel::Secure))
        .unwrap()
        .with_tool_handler(handler);
    let result = enclave.run("return await callTool('t', {});").await;
    assert_eq!(result.value(), Some(&expected));
}

#[tokio::test]
async fn tool_args_cross_as_json() {
    let handler: Arc<dyn ToolHandler> = Arc::new(|_: &str, args: serde_json::Value| {
        assert_eq!(args, serde_json::json!({ "q": "abc", "n": 7 }));
        Ok(serde_json::json!("seen"))
    });
    let enclave = Enclave::new(options(SecurityLevel::Secure))
        .unwrap()
        .with_tool_handler(handler);
    let result = enclave
        .run("return await callTool('t', { q: 'abc', n: 7 });")
        .await;
    assert_eq!(result.value(), Some(&serde_json::json!("seen")));
}

#[tokio::test]
async fn tool_calls_complete_in_fifo_order() {
    let handler: Arc<dyn ToolHandler> =
        Arc::new(|_: &str, args: serde_json::Value| Ok(args["i"].clone()));
    let enclave = Enclave::new(options(SecurityLevel::Secure))
        .unwrap()
        .with_tool_handler(handler);
    let result = enclave
        .run(
            "const out = []; \
             for (const i of [1, 2, 3, 4]) { out.push(await callTool('t', {i})); } \
             return out.join('');",
        )
        .await;
    assert_eq!(result.value(), Some(&serde_json::json!("1234")));
    assert_eq!(result.stats().tool_calls, 4);
}

// ─── Tool budgets and failure modes ──────────────────────────────────────

#[tokio::test]
async fn tool_call_budget_enforced() {
    let mut opts = options(SecurityLevel::Secure);
    opts.max_tool_calls = 2;
    let enclave = Enclave::new(opts).unwrap().with_tool_handler(echo_handler());
    let result = enclave
        .run("for (const i of [1,2,3,4]) { await callTool('t', {}); } return 'done';")
        .await;
    assert_eq!(result.kind(), Some(FailureKind::ToolLimit));
}

#[tokio::test]
async fn oversized_request_rejected() {
    let mut opts = options(SecurityLevel::Secure);
    opts.tool_bridge.max_payload_bytes = 64;
    let enclave = Enclave::new(opts).unwrap().with_tool_handler(echo_handler());
    let result = enclave
        .run("return await callTool('t', { blob: 'x'.repeat(500) });")
        .await;
    assert_eq!(result.kind(), Some(FailureKind::ToolPayloadTooLarge));
}

#[tokio::test]
async fn oversized_response_rejected() {
    let mut opts = options(SecurityLevel::Secure);
    opts.tool_bridge.max_payload_bytes = 64;
    let handler: Arc<dyn ToolHandler> = Arc::new(|_: &str, _: serde_json::Value| {
        Ok(serde_json::json!({ "blob": "y".repeat(500) }))
    });
    let enclave = Enclave::new(opts).unwrap().with_tool_handler(handler);
    let result = enclave.run("return await callTool('t', {});").await;
    assert_eq!(result.kind(), Some(FailureKind::ToolPayloadTooLarge));
}

#[tokio::test]
async fn handler_error_becomes_tool_error_when_uncaught() {
    let handler: Arc<dyn ToolHandler> =
        Arc::new(|_: &str, _: serde_json::Value| Err("backend exploded".to_string()));
    let enclave = Enclave::new(options(SecurityLevel::Secure))
        .unwrap()
        .with_tool_handler(handler);
    let result = enclave.run("return await callTool('t', {});").await;
    assert_eq!(result.kind(), Some(FailureKind::ToolError));
}

#[tokio::test]
async fn handler_error_catchable_in_sandbox() {
    let handler: Arc<dyn ToolHandler> =
        Arc::new(|_: &str, _: serde_json::Value| Err("nope".to_string()));
    let enclave = Enclave::new(options(SecurityLevel::Secure))
        .unwrap()
        .with_tool_handler(handler);
    let result = enclave
        .run("try { await callTool('t', {}); return 'unreachable'; } catch (e) { return e.message; }")
        .await;
    assert_eq!(result.value(), Some(&serde_json::json!("nope")));
}

#[tokio::test]
async fn function_arguments_refused() {
    let enclave = Enclave::new(options(SecurityLevel::Secure))
        .unwrap()
        .with_tool_handler(echo_handler());
    let result = enclave
        .run("return await callTool('t', { cb: () => 1 });")
        .await;
    assert_eq!(result.kind(), Some(FailureKind::RuntimeError));
}

#[tokio::test]
async fn dangerous_keys_refused_in_args() {
    // The literal key is caught statically at SECURE; at PERMISSIVE the
    // clone validation refuses it instead.
    let enclave = Enclave::new(options(SecurityLevel::Permissive))
        .unwrap()
        .with_tool_handler(echo_handler());
    let result = enclave
        .run("const k = 'proto' + 'type'; const o = {}; o[k] = 1; return await callTool('t', o);")
        .await;
    assert!(!result.is_success());
}

// ─── Console budgets ─────────────────────────────────────────────────────

#[tokio::test]
async fn console_flood_by_calls() {
    let mut opts = options(SecurityLevel::Permissive);
    opts.max_console_calls = 3;
    let enclave = Enclave::new(opts).unwrap();
    let result = enclave
        .run("for (const i of [1,2,3,4,5]) { console.log(i); } return 1;")
        .await;
    assert_eq!(result.kind(), Some(FailureKind::IoFlood));
}

#[tokio::test]
async fn console_flood_by_bytes() {
    let mut opts = options(SecurityLevel::Permissive);
    opts.max_console_output_bytes = 32;
    let enclave = Enclave::new(opts).unwrap();
    let result = enclave
        .run("console.log('aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa'); return 1;")
        .await;
    assert_eq!(result.kind(), Some(FailureKind::IoFlood));
}

#[tokio::test]
async fn console_output_captured_in_stats() {
    let enclave = Enclave::new(options(SecurityLevel::Permissive)).unwrap();
    let result = enclave
        .run("console.log('hello', 1); console.warn('careful'); return 0;")
        .await;
    assert_eq!(
        result.stats().console,
        vec!["hello 1".to_string(), "careful".to_string()]
    );
    assert_eq!(result.stats().console_calls, 2);
    assert!(result.stats().console_bytes >= "hello 1careful".len() as u64);
}

// ─── Timeouts ────────────────────────────────────────────────────────────

#[tokio::test]
async fn cooperative_timeout() {
    let mut opts = options(SecurityLevel::Secure);
    opts.timeout_ms = 100;
    opts.max_iterations = u64::MAX;
    let enclave = Enclave::new(opts).unwrap();
    let result = enclave
        .run("let i = 0; for (let j = 0; j < 1000000000; j++) { i += 1; } return i;")
        .await;
    assert_eq!(result.kind(), Some(FailureKind::Timeout));
    assert!(!result.stats().hard_terminated);
    assert_eq!(result.stats().status, ExecutionStatus::TimedOut);
}

struct SleepyHandler;

#[async_trait::async_trait]
impl ToolHandler for SleepyHandler {
    async fn handle(
        &self,
        _name: &str,
        _args: serde_json::Value,
    ) -> Result<serde_json::Value, String> {
        tokio::time::sleep(std::time::Duration::from_secs(5)).await;
        Ok(serde_json::json!(null))
    }
}

#[tokio::test]
async fn watchdog_hard_terminates_suspended_run() {
    // The clock keeps running during suspension; a handler that outlives
    // timeout + grace is hard-terminated by the watchdog.
    let mut opts = options(SecurityLevel::Secure);
    opts.timeout_ms = 100;
    let enclave = Enclave::new(opts)
        .unwrap()
        .with_tool_handler(Arc::new(SleepyHandler));
    let result = enclave.run("return await callTool('slow', {});").await;
    assert_eq!(result.kind(), Some(FailureKind::Timeout));
    assert!(result.stats().hard_terminated);
}

// ─── Cancellation ────────────────────────────────────────────────────────

#[tokio::test]
async fn external_cancel_lands_at_checkpoint() {
    let mut opts = options(SecurityLevel::Secure);
    opts.timeout_ms = 10_000;
    opts.max_iterations = u64::MAX;
    let enclave = Enclave::new(opts).unwrap();
    let handle = enclave.cancel_handle();
    let run = tokio::spawn(async move {
        enclave
            .run("let i = 0; for (let j = 0; j < 1000000000; j++) { i += 1; } return i;")
            .await
    });
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    handle.cancel();
    let result = run.await.unwrap();
    assert_eq!(result.kind(), Some(FailureKind::Cancelled));
    assert_eq!(result.stats().status, ExecutionStatus::Cancelled);
}

// ─── Stack redaction (property 6) ────────────────────────────────────────

#[tokio::test]
async fn strict_redacts_host_paths_from_errors() {
    let handler: Arc<dyn ToolHandler> = Arc::new(|_: &str, _: serde_json::Value| {
        Err("io failure at /srv/runtime/handlers/tool.rs line 7".to_string())
    });
    let mut opts = options(SecurityLevel::Strict);
    opts.validate = false; // keep the catch clause simple at STRICT
    let enclave = Enclave::new(opts).unwrap().with_tool_handler(handler);
    let result = enclave
        .run(
            "try { await callTool('t', {}); return 'no'; } \
             catch (e) { return (e.stack || '') + '|' + e.message; }",
        )
        .await;
    let value = result.value().cloned().unwrap_or_default();
    let text = value.as_str().unwrap_or_default();
    assert!(!text.contains("/srv/"), "host path leaked: {}", text);
    assert!(text.contains("<redacted>") || text.contains("<sandboxed>"));
}

// ─── Modes and adapters ──────────────────────────────────────────────────

#[tokio::test]
async fn direct_bridge_requires_acknowledgment() {
    let mut opts = options(SecurityLevel::Secure);
    opts.tool_bridge.mode = BridgeMode::Direct;
    assert!(Enclave::new(opts.clone()).is_err());
    opts.tool_bridge.acknowledge_insecure_direct = true;
    let enclave = Enclave::new(opts).unwrap().with_tool_handler(echo_handler());
    let result = enclave
        .run("const r = await callTool('t', {}); return r.tool;")
        .await;
    assert_eq!(result.value(), Some(&serde_json::json!("t")));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn worker_pool_adapter_runs() {
    let mut opts = options(SecurityLevel::Secure);
    opts.adapter = ExecAdapter::WorkerPool;
    opts.worker_pool.max_workers = 2;
    opts.worker_pool.warm_on_init = true;
    let enclave = Enclave::new(opts).unwrap();
    let result = enclave.run("return [1,2,3].map(x => x * 2).join(',');").await;
    assert_eq!(result.value(), Some(&serde_json::json!("2,4,6")));
}

#[tokio::test]
async fn per_worker_memory_cap_tightens_budget() {
    let mut opts = options(SecurityLevel::Secure);
    opts.adapter = ExecAdapter::WorkerPool;
    opts.worker_pool.memory_limit_per_worker = 64 * 1024;
    let enclave = Enclave::new(opts).unwrap();
    let result = enclave
        .run("let s = 'a'; for (let i = 0; i < 20; i++) s = s + s; return s.length;")
        .await;
    assert_eq!(result.kind(), Some(FailureKind::MemoryLimitExceeded));
}

#[tokio::test]
async fn double_vm_off_still_isolates() {
    let mut opts = options(SecurityLevel::Secure);
    opts.double_vm.enabled = false;
    let enclave = Enclave::new(opts).unwrap().with_tool_handler(echo_handler());
    let result = enclave
        .run("const r = await callTool('t', {}); return r.constructor === undefined;")
        .await;
    assert_eq!(result.value(), Some(&serde_json::json!(true)));
}

// ─── Host function globals ───────────────────────────────────────────────

#[tokio::test]
async fn host_function_global_round_trip() {
    let mut opts = options(SecurityLevel::Secure);
    opts.allow_functions_in_globals = true;
    opts.global_functions.insert(
        "double".to_string(),
        Arc::new(|args: Vec<serde_json::Value>| {
            let n = args.first().and_then(|v| v.as_f64()).unwrap_or(0.0);
            Ok(serde_json::json!(n * 2.0))
        }),
    );
    let enclave = Enclave::new(opts).unwrap();
    let result = enclave.run("return double(21);").await;
    assert_eq!(result.value(), Some(&serde_json::json!(42.0)));
}

// ─── Counters are monotone within a run (property 4) ─────────────────────

#[tokio::test]
async fn stats_reflect_all_activity() {
    let mut opts = options(SecurityLevel::Permissive);
    opts.max_console_calls = 100;
    let enclave = Enclave::new(opts).unwrap().with_tool_handler(echo_handler());
    let result = enclave
        .run(
            "let s = ''; \
             for (const i of [1, 2, 3]) { s = s + i; console.log(i); await callTool('t', {}); } \
             return s;",
        )
        .await;
    assert_eq!(result.value(), Some(&serde_json::json!("123")));
    let stats = result.stats();
    assert!(stats.iterations >= 3);
    assert_eq!(stats.console_calls, 3);
    assert_eq!(stats.tool_calls, 3);
    assert!(stats.alloc_bytes > 0);
    assert!(stats.peak_alloc_bytes >= stats.alloc_bytes);
    assert_eq!(stats.program_sha256.len(), 64);
}
