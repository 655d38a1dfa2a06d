//! Attack-vector corpus: every program here attempts to reach host
//! intrinsics or host data. A run may fail, but it must never succeed
//! with a value equal to the host-side sentinel, and forbidden tokens
//! must be rejected statically at SECURE and above.

use enclave::{Enclave, EnclaveOptions, FailureKind, SecurityLevel, SessionResult};
use std::sync::Arc;

const SENTINEL: &str = "X-HOST-SENTINEL";

fn options(level: SecurityLevel) -> EnclaveOptions {
    EnclaveOptions {
        security_level: level,
        timeout_ms: 2_000,
        ..Default::default()
    }
}

/// A handler that holds host-sensitive state the sandbox must never see.
fn sentinel_handler() -> Arc<dyn enclave::ToolHandler> {
    let secret = SENTINEL.to_string();
    Arc::new(move |name: &str, _args: serde_json::Value| {
        let _ = &secret; // host-side only
        Err(format!("unknown tool '{}'", name))
    })
}

async fn run_attack(level: SecurityLevel, source: &str) -> SessionResult {
    let enclave = Enclave::new(options(level))
        .unwrap()
        .with_tool_handler(sentinel_handler());
    enclave.run(source).await
}

fn assert_no_escape(result: &SessionResult) {
    if let Some(value) = result.value() {
        assert_ne!(
            value,
            &serde_json::json!(SENTINEL),
            "sandbox value must never equal the host sentinel"
        );
    }
}

// ─── Forbidden-token soundness (property 2) ──────────────────────────────

#[tokio::test]
async fn forbidden_identifiers_rejected_at_secure() {
    for token in [
        "eval",
        "Function",
        "Reflect",
        "process",
        "require",
        "module",
        "__dirname",
        "__filename",
        "global",
        "globalThis",
        "import",
        "constructor",
        "prototype",
        "__proto__",
    ] {
        let source = format!("return {};", token);
        let result = run_attack(SecurityLevel::Secure, &source).await;
        assert!(
            matches!(
                result.kind(),
                Some(FailureKind::ValidationFailed) | Some(FailureKind::UnknownGlobal)
            ),
            "identifier '{}' must be rejected, got {:?}",
            token,
            result.kind()
        );
    }
}

#[tokio::test]
async fn forbidden_string_literals_rejected_at_secure() {
    for token in ["constructor", "prototype", "__proto__"] {
        let source = format!("const k = '{}'; return k;", token);
        let result = run_attack(SecurityLevel::Secure, &source).await;
        assert_eq!(
            result.kind(),
            Some(FailureKind::ValidationFailed),
            "literal '{}' must be rejected",
            token
        );
    }
}

#[tokio::test]
async fn constant_folded_tokens_rejected_at_secure() {
    for source in [
        // S4 verbatim.
        "const k='con'+'structor'; return Array[k] ? 1 : 0;",
        "const k = `pro${'to'}type`; return k;",
        "const k = 'rotcurtsnoc'.split('').reverse().join(''); return k;",
        "const k = String.fromCharCode(95,95,112,114,111,116,111,95,95); return k;",
        "const k = atob('Y29uc3RydWN0b3I='); return k;",
        "const a = 'con'; const b = a + 'structor'; return b;",
        "const k = 'xconstructorx'.slice(1, -1); return k;",
    ] {
        let result = run_attack(SecurityLevel::Secure, source).await;
        assert_eq!(
            result.kind(),
            Some(FailureKind::ValidationFailed),
            "obfuscated program must be rejected: {}",
            source
        );
        assert_no_escape(&result);
    }
}

#[tokio::test]
async fn escaped_spellings_are_decoded_before_matching() {
    for source in [
        r#"const k = '\x63onstructor'; return k;"#,
        r#"const k = 'constructor'; return k;"#,
        r#"const k = '__pro' + 'to__'; return k;"#,
    ] {
        let result = run_attack(SecurityLevel::Secure, source).await;
        assert_eq!(
            result.kind(),
            Some(FailureKind::ValidationFailed),
            "escaped spelling must be rejected: {}",
            source
        );
    }
}

// ─── Dynamic code and meta-programming ───────────────────────────────────

#[tokio::test]
async fn dynamic_code_rejected_at_every_level() {
    for level in [
        SecurityLevel::Permissive,
        SecurityLevel::Standard,
        SecurityLevel::Secure,
        SecurityLevel::Strict,
    ] {
        for source in [
            "return eval('1 + 1');",
            "return new Function('return 1')();",
            "const f = Function; return f('return 1')();",
        ] {
            let result = run_attack(level, source).await;
            assert!(
                !result.is_success(),
                "dynamic code must fail at {:?}: {}",
                level,
                source
            );
            assert_no_escape(&result);
        }
    }
}

#[tokio::test]
async fn meta_programming_rejected_at_standard() {
    for source in [
        "return Object.getPrototypeOf({});",
        "return Object.getOwnPropertyDescriptor({}, 'a');",
        "Object.setPrototypeOf({}, null); return 1;",
        "return Reflect.get({}, 'a');",
    ] {
        let result = run_attack(SecurityLevel::Standard, source).await;
        assert_eq!(
            result.kind(),
            Some(FailureKind::ValidationFailed),
            "meta-programming must be rejected: {}",
            source
        );
    }
}

// ─── Runtime membrane (levels below SECURE let these reach execution) ────

#[tokio::test]
async fn constructor_climb_blocked_at_runtime() {
    // PERMISSIVE lets the tokens through the validator; the membrane and
    // the realm's blocked set stop the climb at runtime.
    let result = run_attack(
        SecurityLevel::Permissive,
        "const o = {}; const c = o.constructor; return c === undefined ? 'blocked' : 'leak';",
    )
    .await;
    assert_eq!(result.value(), Some(&serde_json::json!("blocked")));
}

#[tokio::test]
async fn host_error_climb_yields_no_host_reference() {
    // S5: climb from a caught tool error toward a code-evaluating
    // intrinsic. Either the run fails or the value is not the sentinel.
    let source = r#"
        try {
            await callTool('nope', {});
        } catch (e) {
            return e.constructor.constructor("return SECRET")();
        }
    "#;
    for level in [SecurityLevel::Permissive, SecurityLevel::Standard] {
        let result = run_attack(level, source).await;
        assert!(!result.is_success(), "climb must fail at {:?}", level);
        assert_no_escape(&result);
    }
    // SECURE rejects the tokens before execution.
    let result = run_attack(SecurityLevel::Secure, source).await;
    assert_eq!(result.kind(), Some(FailureKind::ValidationFailed));
}

#[tokio::test]
async fn proto_pollution_write_blocked() {
    let result = run_attack(
        SecurityLevel::Permissive,
        "const o = {}; o['__pro' + 'to__'] = { polluted: 1 }; return 'wrote';",
    )
    .await;
    assert!(!result.is_success(), "prototype write must fail");
    assert_no_escape(&result);
}

#[tokio::test]
async fn legacy_accessors_absent_at_all_levels() {
    let result = run_attack(
        SecurityLevel::Permissive,
        "const o = {a: 1}; return o['__defineGe' + 'tter__'] === undefined;",
    )
    .await;
    assert_eq!(result.value(), Some(&serde_json::json!(true)));
}

#[tokio::test]
async fn blocked_reads_uniform_across_access_forms() {
    // Dot, bracket-literal, computed, optional chain, destructuring with a
    // provable key — all must yield the same absent result (property 3).
    let source = r#"
        const o = {x: 1};
        const key = ['construc', 'tor'].join('');
        const viaComputed = o[key];
        const viaOptional = o?.['cons' + 'tructor'];
        return viaComputed === undefined && viaOptional === undefined;
    "#;
    let result = run_attack(SecurityLevel::Permissive, source).await;
    assert_eq!(result.value(), Some(&serde_json::json!(true)));
}

#[tokio::test]
async fn strict_level_throws_security_violation() {
    let mut opts = options(SecurityLevel::Strict);
    opts.validate = false; // reach the runtime layer
    let enclave = Enclave::new(opts).unwrap();
    let result = enclave
        .run("const o = {}; return o.constructor;")
        .await;
    assert_eq!(result.kind(), Some(FailureKind::SecurityViolation));
}

// ─── Resource bombs (always-on) ──────────────────────────────────────────

#[tokio::test]
async fn resource_bomb_literals_rejected() {
    for source in [
        "return new Array(100000000);",
        "return 'x'.repeat(100000000);",
        "let a = []; a.length = 100000000; return a.length;",
        "return 2n ** 100000n;",
        "while (true) {}",
        "for (;;) {}",
        "while (1) {}",
    ] {
        let result = run_attack(SecurityLevel::Permissive, source).await;
        assert_eq!(
            result.kind(),
            Some(FailureKind::ValidationFailed),
            "bomb literal must be rejected: {}",
            source
        );
    }
}

#[tokio::test]
async fn redos_shapes_rejected() {
    let result = run_attack(SecurityLevel::Permissive, "return /(a+)+$/.test('aaa!');").await;
    assert_eq!(result.kind(), Some(FailureKind::ValidationFailed));
    // SECURE refuses every regex literal.
    let result = run_attack(SecurityLevel::Secure, "let s = 'x'; return /a/.test(s);").await;
    assert_eq!(result.kind(), Some(FailureKind::ValidationFailed));
}

// ─── Globals enumeration ─────────────────────────────────────────────────

#[tokio::test]
async fn unknown_globals_flagged_at_secure() {
    let result = run_attack(SecurityLevel::Secure, "return mystery;").await;
    assert_eq!(result.kind(), Some(FailureKind::UnknownGlobal));

    // The curated namespace itself is fine.
    let result = run_attack(
        SecurityLevel::Secure,
        "return Math.floor(parseFloat('2.9')) + Number('1');",
    )
    .await;
    assert_eq!(result.value(), Some(&serde_json::json!(3)));
}

#[tokio::test]
async fn function_forms_restricted_at_secure() {
    let result = run_attack(SecurityLevel::Secure, "function f() { return 1; } return f();").await;
    assert_eq!(result.kind(), Some(FailureKind::ValidationFailed));

    let result = run_attack(
        SecurityLevel::Secure,
        "const f = () => 1; return f();",
    )
    .await;
    assert_eq!(result.value(), Some(&serde_json::json!(1)));
}

#[tokio::test]
async fn computed_destructuring_rejected_at_secure() {
    let result = run_attack(
        SecurityLevel::Secure,
        "const pick = k => { const {[k]: v} = {a: 1}; return v; }; return pick('a');",
    )
    .await;
    assert_eq!(result.kind(), Some(FailureKind::ValidationFailed));
}

// ─── Realm separation ────────────────────────────────────────────────────

#[tokio::test]
async fn injected_globals_are_immutable_views() {
    let mut opts = options(SecurityLevel::Secure);
    opts.globals
        .insert("config".to_string(), serde_json::json!({ "mode": "ro" }));
    let enclave = Enclave::new(opts).unwrap();
    let result = enclave.run("config.mode = 'rw'; return config.mode;").await;
    assert!(!result.is_success(), "writes to injected globals must fail");
}

#[tokio::test]
async fn intrinsics_are_frozen() {
    let result = run_attack(
        SecurityLevel::Permissive,
        "Math.floor = () => 'patched'; return 1;",
    )
    .await;
    assert!(!result.is_success(), "intrinsic patching must fail");
}

#[tokio::test]
async fn symbol_is_inert() {
    // No Symbol intrinsic is seeded: at SECURE it is an unknown global,
    // below SECURE it resolves to nothing usable.
    let result = run_attack(SecurityLevel::Secure, "return Symbol.for('x');").await;
    assert_eq!(result.kind(), Some(FailureKind::UnknownGlobal));
}
