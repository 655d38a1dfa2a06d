//! Enclave construction options and the security-level lattice
//!
//! A [`SecurityLevel`] selects a [`LevelConfig`]: which validator rule
//! groups run, which membrane categories are blocked, which globals the
//! inner realm may reference, and how errors are redacted. Levels form a
//! strict lattice — every restriction active at a level is active at all
//! higher levels.
//!
//! [`EnclaveOptions`] is the single construction surface. Defaults come
//! from [`crate::limits`]; everything is overridable per instance.

use crate::error::ConfigError;
use crate::limits;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Security levels, ordered from least to most restrictive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SecurityLevel {
    Permissive,
    Standard,
    Secure,
    Strict,
}

impl Default for SecurityLevel {
    fn default() -> Self {
        Self::Secure
    }
}

/// Membrane blocked-property categories. Membership lists live beside the
/// membrane; the level config only toggles whole categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropertyCategory {
    Prototype,
    LegacyAccessors,
    IteratorHelpers,
    Reflection,
    Timing,
}

/// Validator rule groups toggled per level. Rule *semantics* live in the
/// sandbox crate; this record only says which groups run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuleSet {
    /// `eval(...)`, `new Function(...)`, dynamic `import(...)`, tagged templates
    pub dynamic_code: bool,
    /// `new Array(n)`, `.length = n`, `.repeat(n)`, `BigInt ** BigInt`, infinite loops
    pub resource_bombs: bool,
    /// Regex literals with nested / duplicated quantifiers
    pub redos_nested: bool,
    /// All regex literals, unconditionally
    pub redos_all_regex: bool,
    /// Denylisted identifiers in any position (read, write, member, destructure)
    pub forbidden_identifiers: bool,
    /// String literals equal to a forbidden token
    pub forbidden_string_literals: bool,
    /// Constant-folded expressions evaluating to a forbidden token
    pub constant_folding: bool,
    /// `Object.getPrototypeOf` / `Reflect.*` / descriptor access patterns
    pub meta_programming: bool,
    /// `{[expr]: x} = obj` with non-literal `expr`
    pub computed_destructuring: bool,
    /// Arrow-only functions; generator forms rejected
    pub function_forms: bool,
    /// Free identifiers outside the allow-list
    pub unknown_globals: bool,
}

/// Resolved per-level configuration record.
#[derive(Debug, Clone)]
pub struct LevelConfig {
    pub rules: RuleSet,
    pub blocked_categories: Vec<PropertyCategory>,
    /// Names the program may reference freely (intrinsics + helpers)
    pub allowed_globals: &'static [&'static str],
    /// Whether a bounded `console` is seeded into the inner realm
    pub expose_console: bool,
    /// Membrane block policy: `true` throws SecurityViolation, `false` yields undefined
    pub strict_throw: bool,
    /// Replace sanitized stacks with a redacted placeholder instead of omitting them
    pub redact_stacks: bool,
}

/// The curated inner-realm namespace. `callTool` and (level permitting)
/// `console` are added on top of this list at realm seeding.
pub const ALLOWED_GLOBALS: &[&str] = &[
    "Math",
    "JSON",
    "Array",
    "Object",
    "String",
    "Number",
    "Boolean",
    "Date",
    "parseInt",
    "parseFloat",
    "isNaN",
    "isFinite",
    "encodeURI",
    "decodeURI",
    "encodeURIComponent",
    "decodeURIComponent",
    "undefined",
    "NaN",
    "Infinity",
    "callTool",
    "console",
];

impl SecurityLevel {
    /// Resolve the level's configuration record.
    ///
    /// The lattice invariant (STRICT strictly more restrictive than SECURE,
    /// and so on down) is asserted by tests, not here.
    pub fn config(&self) -> LevelConfig {
        use PropertyCategory::*;
        match self {
            SecurityLevel::Permissive => LevelConfig {
                rules: RuleSet {
                    dynamic_code: true,
                    resource_bombs: true,
                    redos_nested: true,
                    redos_all_regex: false,
                    forbidden_identifiers: false,
                    forbidden_string_literals: false,
                    constant_folding: false,
                    meta_programming: false,
                    computed_destructuring: false,
                    function_forms: false,
                    unknown_globals: false,
                },
                blocked_categories: vec![Prototype, LegacyAccessors],
                allowed_globals: ALLOWED_GLOBALS,
                expose_console: true,
                strict_throw: false,
                redact_stacks: false,
            },
            SecurityLevel::Standard => LevelConfig {
                rules: RuleSet {
                    dynamic_code: true,
                    resource_bombs: true,
                    redos_nested: true,
                    redos_all_regex: false,
                    forbidden_identifiers: true,
                    forbidden_string_literals: false,
                    constant_folding: false,
                    meta_programming: true,
                    computed_destructuring: true,
                    function_forms: false,
                    unknown_globals: false,
                },
                blocked_categories: vec![Prototype, LegacyAccessors],
                allowed_globals: ALLOWED_GLOBALS,
                expose_console: false,
                strict_throw: false,
                redact_stacks: false,
            },
            SecurityLevel::Secure => LevelConfig {
                rules: RuleSet {
                    dynamic_code: true,
                    resource_bombs: true,
                    redos_nested: true,
                    redos_all_regex: true,
                    forbidden_identifiers: true,
                    forbidden_string_literals: true,
                    constant_folding: true,
                    meta_programming: true,
                    computed_destructuring: true,
                    function_forms: true,
                    unknown_globals: true,
                },
                blocked_categories: vec![Prototype, LegacyAccessors, IteratorHelpers],
                allowed_globals: ALLOWED_GLOBALS,
                expose_console: false,
                strict_throw: false,
                redact_stacks: false,
            },
            SecurityLevel::Strict => LevelConfig {
                rules: RuleSet {
                    dynamic_code: true,
                    resource_bombs: true,
                    redos_nested: true,
                    redos_all_regex: true,
                    forbidden_identifiers: true,
                    forbidden_string_literals: true,
                    constant_folding: true,
                    meta_programming: true,
                    computed_destructuring: true,
                    function_forms: true,
                    unknown_globals: true,
                },
                blocked_categories: vec![
                    Prototype,
                    LegacyAccessors,
                    IteratorHelpers,
                    Reflection,
                    Timing,
                ],
                allowed_globals: ALLOWED_GLOBALS,
                expose_console: false,
                strict_throw: true,
                redact_stacks: true,
            },
        }
    }
}

/// Tool bridge operating mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BridgeMode {
    /// Requests and responses stage through the outer realm (default)
    Isolated,
    /// Responses enter the inner realm without the outer staging pass
    Direct,
}

impl Default for BridgeMode {
    fn default() -> Self {
        Self::Isolated
    }
}

/// Tool bridge configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolBridgeConfig {
    pub mode: BridgeMode,
    /// Must be set to select `Direct`; construction fails otherwise
    pub acknowledge_insecure_direct: bool,
    /// Size cap on request and response payloads (serialized bytes)
    pub max_payload_bytes: usize,
    /// Nesting cap on tool-call arguments
    pub max_value_depth: usize,
}

impl Default for ToolBridgeConfig {
    fn default() -> Self {
        Self {
            mode: BridgeMode::Isolated,
            acknowledge_insecure_direct: false,
            max_payload_bytes: limits::DEFAULT_MAX_PAYLOAD_BYTES,
            max_value_depth: limits::DEFAULT_MAX_VALUE_DEPTH,
        }
    }
}

/// Double-VM (outer realm) configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DoubleVmConfig {
    /// Stage tool responses through a separate outer-realm clone pass.
    /// Security-recommended to keep on.
    pub enabled: bool,
}

impl Default for DoubleVmConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// Execution host selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecAdapter {
    /// Run the interpreter on an ad-hoc blocking thread
    InProcess,
    /// Run through the bounded worker pool
    WorkerPool,
}

impl Default for ExecAdapter {
    fn default() -> Self {
        Self::InProcess
    }
}

/// Worker pool governance.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerPoolConfig {
    pub min_workers: usize,
    pub max_workers: usize,
    /// Per-worker tracked-allocation cap; 0 inherits the enclave memory limit
    pub memory_limit_per_worker: u64,
    /// Spawn `min_workers` threads eagerly at pool creation
    pub warm_on_init: bool,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            min_workers: 1,
            max_workers: 4,
            memory_limit_per_worker: 0,
            warm_on_init: false,
        }
    }
}

/// Explicit membrane overrides layered on top of the level defaults.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct SecureProxyConfig {
    pub block_constructor: Option<bool>,
    pub block_prototype: Option<bool>,
    pub block_legacy_accessors: Option<bool>,
    pub proxy_max_depth: Option<u8>,
}

/// Tunable literal bounds for the resource-bomb rules.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidatorLimits {
    pub max_array_alloc: u64,
    pub max_repeat_count: u64,
    pub max_bigint_exponent: u64,
}

impl Default for ValidatorLimits {
    fn default() -> Self {
        Self {
            max_array_alloc: limits::DEFAULT_MAX_ARRAY_ALLOC,
            max_repeat_count: limits::DEFAULT_MAX_REPEAT_COUNT,
            max_bigint_exponent: limits::DEFAULT_MAX_BIGINT_EXPONENT,
        }
    }
}

/// A host-native function injected as a global. Arguments arrive as the
/// membrane's host-side JSON; the return value re-enters through the
/// membrane like a tool result.
pub type HostFunction =
    Arc<dyn Fn(Vec<serde_json::Value>) -> Result<serde_json::Value, String> + Send + Sync>;

/// Enclave construction options.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EnclaveOptions {
    pub security_level: SecurityLevel,
    /// Wall-clock budget in milliseconds
    pub timeout_ms: u64,
    /// Loop-iteration budget
    pub max_iterations: u64,
    /// Tracked-allocation budget in bytes; 0 disables tracking
    pub memory_limit_bytes: u64,
    pub max_console_output_bytes: u64,
    pub max_console_calls: u64,
    pub max_tool_calls: u64,
    /// Interpreter call-stack depth cap
    pub max_call_depth: u64,
    /// JSON values injected into the inner scope (validated, then immutable)
    pub globals: serde_json::Map<String, serde_json::Value>,
    /// Host functions injected as globals; requires `allow_functions_in_globals`
    #[serde(skip)]
    pub global_functions: HashMap<String, HostFunction>,
    pub allow_functions_in_globals: bool,
    /// When set, only these names may carry host functions
    pub global_function_allowlist: Option<Vec<String>>,
    pub tool_bridge: ToolBridgeConfig,
    pub double_vm: DoubleVmConfig,
    pub adapter: ExecAdapter,
    pub worker_pool: WorkerPoolConfig,
    pub secure_proxy: SecureProxyConfig,
    /// Overrides the level's stack redaction flag when set
    pub sanitize_stack_traces: Option<bool>,
    /// Bypass the validator. Intended only for testing the runtime layers.
    pub validate: bool,
    pub validator_limits: ValidatorLimits,
}

impl Default for EnclaveOptions {
    fn default() -> Self {
        Self {
            security_level: SecurityLevel::default(),
            timeout_ms: limits::DEFAULT_TIMEOUT_MS,
            max_iterations: limits::DEFAULT_MAX_ITERATIONS,
            memory_limit_bytes: limits::DEFAULT_MEMORY_LIMIT_BYTES,
            max_console_output_bytes: limits::DEFAULT_MAX_CONSOLE_BYTES,
            max_console_calls: limits::DEFAULT_MAX_CONSOLE_CALLS,
            max_tool_calls: limits::DEFAULT_MAX_TOOL_CALLS,
            max_call_depth: limits::DEFAULT_MAX_CALL_DEPTH,
            globals: serde_json::Map::new(),
            global_functions: HashMap::new(),
            allow_functions_in_globals: false,
            global_function_allowlist: None,
            tool_bridge: ToolBridgeConfig::default(),
            double_vm: DoubleVmConfig::default(),
            adapter: ExecAdapter::default(),
            worker_pool: WorkerPoolConfig::default(),
            secure_proxy: SecureProxyConfig::default(),
            sanitize_stack_traces: None,
            validate: true,
            validator_limits: ValidatorLimits::default(),
        }
    }
}

impl std::fmt::Debug for EnclaveOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnclaveOptions")
            .field("security_level", &self.security_level)
            .field("timeout_ms", &self.timeout_ms)
            .field("max_iterations", &self.max_iterations)
            .field("memory_limit_bytes", &self.memory_limit_bytes)
            .field("max_tool_calls", &self.max_tool_calls)
            .field("adapter", &self.adapter)
            .field("globals", &self.globals.keys().collect::<Vec<_>>())
            .field("global_functions", &self.global_functions.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

/// Keys that must never appear in values crossing into the inner realm.
pub const DANGEROUS_KEYS: &[&str] = &["constructor", "prototype", "__proto__"];

/// Validate a single injected global value: JSON-structural (so no
/// functions, no symbols, no getters by construction), bounded depth, no
/// dangerous keys anywhere.
pub fn validate_global_value(name: &str, value: &serde_json::Value) -> Result<(), ConfigError> {
    fn walk(name: &str, value: &serde_json::Value, depth: usize) -> Result<(), ConfigError> {
        if depth > limits::DEFAULT_MAX_VALUE_DEPTH {
            return Err(ConfigError::InvalidGlobal {
                name: name.to_string(),
                reason: format!("nesting deeper than {}", limits::DEFAULT_MAX_VALUE_DEPTH),
            });
        }
        match value {
            serde_json::Value::Object(map) => {
                for (key, inner) in map {
                    if DANGEROUS_KEYS.contains(&key.as_str()) {
                        return Err(ConfigError::InvalidGlobal {
                            name: name.to_string(),
                            reason: format!("dangerous key '{}'", key),
                        });
                    }
                    walk(name, inner, depth + 1)?;
                }
            }
            serde_json::Value::Array(items) => {
                for inner in items {
                    walk(name, inner, depth + 1)?;
                }
            }
            _ => {}
        }
        Ok(())
    }

    if DANGEROUS_KEYS.contains(&name) {
        return Err(ConfigError::InvalidGlobal {
            name: name.to_string(),
            reason: "dangerous global name".to_string(),
        });
    }
    walk(name, value, 0)
}

impl EnclaveOptions {
    /// Check cross-field option consistency. Called by the enclave
    /// constructor; kept here so embedders can pre-flight configs.
    pub fn check(&self) -> Result<(), ConfigError> {
        if self.tool_bridge.mode == BridgeMode::Direct && !self.tool_bridge.acknowledge_insecure_direct
        {
            return Err(ConfigError::DirectBridgeNotAcknowledged);
        }
        if self.worker_pool.max_workers == 0 || self.worker_pool.min_workers > self.worker_pool.max_workers
        {
            return Err(ConfigError::InvalidWorkerPool(format!(
                "min_workers {} / max_workers {}",
                self.worker_pool.min_workers, self.worker_pool.max_workers
            )));
        }
        for (name, value) in &self.globals {
            validate_global_value(name, value)?;
        }
        for name in self.global_functions.keys() {
            if !self.allow_functions_in_globals {
                return Err(ConfigError::InvalidGlobal {
                    name: name.clone(),
                    reason: "functions in globals require allow_functions_in_globals".to_string(),
                });
            }
            if let Some(allow) = &self.global_function_allowlist {
                if !allow.contains(name) {
                    return Err(ConfigError::InvalidGlobal {
                        name: name.clone(),
                        reason: "function name not in allow-list".to_string(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Effective stack-redaction flag: explicit option wins over the level.
    pub fn redact_stacks(&self) -> bool {
        self.sanitize_stack_traces
            .unwrap_or_else(|| self.security_level.config().redact_stacks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn restriction_count(cfg: &LevelConfig) -> usize {
        let r = &cfg.rules;
        [
            r.dynamic_code,
            r.resource_bombs,
            r.redos_nested,
            r.redos_all_regex,
            r.forbidden_identifiers,
            r.forbidden_string_literals,
            r.constant_folding,
            r.meta_programming,
            r.computed_destructuring,
            r.function_forms,
            r.unknown_globals,
        ]
        .iter()
        .filter(|b| **b)
        .count()
            + cfg.blocked_categories.len()
    }

    #[test]
    fn test_levels_form_a_strict_lattice() {
        let levels = [
            SecurityLevel::Permissive,
            SecurityLevel::Standard,
            SecurityLevel::Secure,
            SecurityLevel::Strict,
        ];
        for pair in levels.windows(2) {
            let lower = pair[0].config();
            let upper = pair[1].config();
            assert!(
                restriction_count(&upper) > restriction_count(&lower),
                "{:?} must be strictly more restrictive than {:?}",
                pair[1],
                pair[0]
            );
            // Everything blocked below stays blocked above.
            for cat in &lower.blocked_categories {
                assert!(upper.blocked_categories.contains(cat));
            }
        }
    }

    #[test]
    fn test_console_only_in_permissive() {
        assert!(SecurityLevel::Permissive.config().expose_console);
        assert!(!SecurityLevel::Standard.config().expose_console);
        assert!(!SecurityLevel::Secure.config().expose_console);
        assert!(!SecurityLevel::Strict.config().expose_console);
    }

    #[test]
    fn test_direct_bridge_requires_acknowledgment() {
        let mut opts = EnclaveOptions::default();
        opts.tool_bridge.mode = BridgeMode::Direct;
        assert!(matches!(
            opts.check(),
            Err(ConfigError::DirectBridgeNotAcknowledged)
        ));
        opts.tool_bridge.acknowledge_insecure_direct = true;
        assert!(opts.check().is_ok());
    }

    #[test]
    fn test_global_validation_rejects_dangerous_keys() {
        let value = serde_json::json!({ "nested": { "__proto__": 1 } });
        assert!(validate_global_value("cfg", &value).is_err());
        assert!(validate_global_value("cfg", &serde_json::json!({ "ok": [1, 2] })).is_ok());
    }

    #[test]
    fn test_global_validation_rejects_deep_nesting() {
        let mut value = serde_json::json!(1);
        for _ in 0..12 {
            value = serde_json::json!({ "v": value });
        }
        assert!(validate_global_value("deep", &value).is_err());
    }

    #[test]
    fn test_function_globals_gated() {
        let mut opts = EnclaveOptions::default();
        let helper: HostFunction =
            Arc::new(|_: Vec<serde_json::Value>| Ok(serde_json::json!(1)));
        opts.global_functions.insert("helper".to_string(), helper);
        assert!(opts.check().is_err());
        opts.allow_functions_in_globals = true;
        assert!(opts.check().is_ok());
        opts.global_function_allowlist = Some(vec!["other".to_string()]);
        assert!(opts.check().is_err());
    }
}
