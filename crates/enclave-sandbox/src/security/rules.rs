//! Validator rules configuration.
//!
//! Embedders may tune the validator per deployment through a YAML file:
//! extra denylisted identifiers, disabled rule IDs, and the literal bounds
//! for the resource-bomb rules. Core rules required by SECURE and above
//! cannot be disabled — a disable request for them is ignored with a
//! warning.
//!
//! ```yaml
//! # enclave-rules.yaml
//! disabled_rules:
//!   - redos-regex
//! extra_forbidden_identifiers:
//!   - fetch
//! limits:
//!   max_repeat_count: 50000
//! ```

use enclave_core::config::ValidatorLimits;
use enclave_core::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Rule IDs the engine's security posture depends on; never disableable.
pub const CORE_RULES: &[&str] = &[
    "dynamic-code",
    "disallowed-identifier",
    "constructor-obfuscation",
    "forbidden-string-literal",
];

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ValidatorRulesConfig {
    /// Rule IDs to skip (core rules excepted)
    pub disabled_rules: Vec<String>,
    /// Additional identifiers treated like the built-in denylist
    pub extra_forbidden_identifiers: Vec<String>,
    /// Overrides for the resource-bomb literal bounds
    pub limits: Option<ValidatorLimits>,
}

impl ValidatorRulesConfig {
    /// Load from a YAML file.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::InvalidRulesConfig(format!("{}: {}", path.display(), e)))?;
        let config: Self = serde_yaml::from_str(&content)
            .map_err(|e| ConfigError::InvalidRulesConfig(format!("{}: {}", path.display(), e)))?;
        for rule in &config.disabled_rules {
            if CORE_RULES.contains(&rule.as_str()) {
                tracing::warn!(rule, "core rule cannot be disabled; ignoring");
            }
        }
        Ok(config)
    }

    /// Whether `rule` is disabled (core rules never are).
    pub fn is_disabled(&self, rule: &str) -> bool {
        !CORE_RULES.contains(&rule) && self.disabled_rules.iter().any(|r| r == rule)
    }
}
