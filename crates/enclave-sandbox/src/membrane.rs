//! The membrane: secure proxies over host-supplied values.
//!
//! Every value crossing host → inner realm passes through here. The
//! wrapper is the tagged-variant port of a universal proxy: a compact
//! blocked-property set consulted on every read, a null prototype, depth-
//! bounded recursive wrapping (raw pass-through beyond the bound), and
//! idempotent wrapping. The same `BlockedPropertySet` is consulted by the
//! interpreter's member-access path for inner values, so the read-blocking
//! invariant holds for every access form on every value.

use crate::realm::value::{new_error_value, Control, ErrorTag, ObjectData, Value};
use enclave_core::config::{
    HostFunction, LevelConfig, PropertyCategory, SecureProxyConfig, DANGEROUS_KEYS,
};
use crate::security::props_for_category;
use std::collections::HashSet;
use std::rc::Rc;

/// What a blocked read yields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockPolicy {
    /// Yield `undefined` (the canonical "absent" sentinel)
    Absent,
    /// Throw a catchable `SecurityViolation` error
    Throw,
}

/// Property names blocked for one execution; derived from the level's
/// category mask plus explicit overrides at membrane creation, immutable
/// thereafter.
pub struct BlockedPropertySet {
    set: HashSet<&'static str>,
    policy: BlockPolicy,
    on_blocked: Option<Box<dyn Fn(&str)>>,
}

impl BlockedPropertySet {
    pub fn from_config(level_config: &LevelConfig, proxy_config: &SecureProxyConfig) -> Self {
        let mut set: HashSet<&'static str> = HashSet::new();
        for category in &level_config.blocked_categories {
            set.extend(props_for_category(*category));
        }
        // Explicit overrides win over the category mask.
        match proxy_config.block_constructor {
            Some(true) => {
                set.insert("constructor");
            }
            Some(false) => {
                set.remove("constructor");
            }
            None => {}
        }
        match proxy_config.block_prototype {
            Some(true) => {
                set.extend(["prototype", "__proto__"]);
            }
            Some(false) => {
                set.remove("prototype");
                set.remove("__proto__");
            }
            None => {}
        }
        match proxy_config.block_legacy_accessors {
            Some(true) => {
                set.extend(props_for_category(PropertyCategory::LegacyAccessors));
            }
            Some(false) => {
                for p in props_for_category(PropertyCategory::LegacyAccessors) {
                    set.remove(p);
                }
            }
            None => {}
        }
        let policy = if level_config.strict_throw {
            BlockPolicy::Throw
        } else {
            BlockPolicy::Absent
        };
        Self {
            set,
            policy,
            on_blocked: None,
        }
    }

    pub fn with_on_blocked(mut self, f: impl Fn(&str) + 'static) -> Self {
        self.on_blocked = Some(Box::new(f));
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.set.contains(name)
    }

    pub fn policy(&self) -> BlockPolicy {
        self.policy
    }

    /// Apply the block policy for a read of `name`.
    pub fn blocked_read(&self, name: &str) -> Result<Value, Control> {
        if let Some(f) = &self.on_blocked {
            f(name);
        }
        match self.policy {
            BlockPolicy::Absent => Ok(Value::Undefined),
            BlockPolicy::Throw => Err(Control::Throw(new_error_value(
                "SecurityViolation",
                &format!("access to blocked property '{}'", name),
                ErrorTag::Security,
            ))),
        }
    }

    /// Apply the block policy for a write of `name`; writes never succeed.
    pub fn blocked_write(&self, name: &str) -> Control {
        if let Some(f) = &self.on_blocked {
            f(name);
        }
        Control::Throw(new_error_value(
            "SecurityViolation",
            &format!("write to blocked property '{}'", name),
            ErrorTag::Security,
        ))
    }
}

/// The host-side target of a proxy.
pub enum HostTarget {
    Json(Rc<serde_json::Value>),
    Func { name: String, f: HostFunction },
}

/// Membrane state shared by every proxy of one execution.
pub struct Membrane {
    pub blocked: Rc<BlockedPropertySet>,
    pub max_depth: u8,
}

impl Membrane {
    pub fn new(blocked: Rc<BlockedPropertySet>, max_depth: u8) -> Rc<Self> {
        Rc::new(Self { blocked, max_depth })
    }

    /// Wrap a host JSON value for the inner realm. Primitives pass through;
    /// containers become proxies until `max_depth`, raw clones beyond it.
    pub fn wrap_json(self: &Rc<Self>, json: Rc<serde_json::Value>, depth: u8) -> Value {
        match json.as_ref() {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(*b),
            serde_json::Value::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
            serde_json::Value::String(s) => Value::str(s.clone()),
            serde_json::Value::Array(_) | serde_json::Value::Object(_) => {
                if depth >= self.max_depth {
                    json_to_value(&json)
                } else {
                    Value::Proxy(Rc::new(MembraneProxy {
                        target: HostTarget::Json(json),
                        depth,
                        membrane: self.clone(),
                    }))
                }
            }
        }
    }

    /// Wrap a host function capability.
    pub fn wrap_function(self: &Rc<Self>, name: String, f: HostFunction) -> Value {
        Value::Proxy(Rc::new(MembraneProxy {
            target: HostTarget::Func { name, f },
            depth: 0,
            membrane: self.clone(),
        }))
    }

    /// Wrapping is idempotent: an already-wrapped value is returned as is.
    pub fn wrap_existing(self: &Rc<Self>, value: Value) -> Value {
        value
    }
}

/// One wrapped host value. The polymorphic wrapper surface is
/// {get, set, invoke, prototype_of}.
pub struct MembraneProxy {
    target: HostTarget,
    depth: u8,
    membrane: Rc<Membrane>,
}

impl MembraneProxy {
    /// Read trap.
    pub fn get(&self, name: &str) -> Result<Value, Control> {
        if self.membrane.blocked.contains(name) {
            return self.membrane.blocked.blocked_read(name);
        }
        match &self.target {
            HostTarget::Json(json) => match json.as_ref() {
                serde_json::Value::Object(map) => match map.get(name) {
                    Some(child) => Ok(self
                        .membrane
                        .wrap_json(Rc::new(child.clone()), self.depth + 1)),
                    None => Ok(Value::Undefined),
                },
                serde_json::Value::Array(items) => {
                    if name == "length" {
                        return Ok(Value::Number(items.len() as f64));
                    }
                    if let Ok(index) = name.parse::<usize>() {
                        return Ok(self.get_index(index));
                    }
                    Ok(Value::Undefined)
                }
                _ => Ok(Value::Undefined),
            },
            HostTarget::Func { name: fname, .. } => {
                if name == "name" {
                    Ok(Value::str(fname.clone()))
                } else {
                    Ok(Value::Undefined)
                }
            }
        }
    }

    /// Write trap: host values are immutable for the run.
    pub fn set(&self, name: &str, _value: Value) -> Control {
        if self.membrane.blocked.contains(name) {
            return self.membrane.blocked.blocked_write(name);
        }
        Control::Throw(new_error_value(
            "TypeError",
            &format!("cannot assign to property '{}' of a host value", name),
            ErrorTag::None,
        ))
    }

    /// Prototype trap: always null.
    pub fn prototype_of(&self) -> Value {
        Value::Null
    }

    /// Invoke trap for wrapped host functions: arguments cross inner→host
    /// as JSON, the result re-enters through the membrane at full depth.
    pub fn invoke(&self, args: Vec<serde_json::Value>) -> Result<Rc<serde_json::Value>, String> {
        match &self.target {
            HostTarget::Func { f, .. } => f(args).map(Rc::new),
            HostTarget::Json(_) => Err("host value is not callable".to_string()),
        }
    }

    pub fn wrap_result(&self, json: Rc<serde_json::Value>) -> Value {
        self.membrane.wrap_json(json, 0)
    }

    pub fn get_index(&self, index: usize) -> Value {
        match &self.target {
            HostTarget::Json(json) => match json.as_ref() {
                serde_json::Value::Array(items) => match items.get(index) {
                    Some(child) => self
                        .membrane
                        .wrap_json(Rc::new(child.clone()), self.depth + 1),
                    None => Value::Undefined,
                },
                _ => Value::Undefined,
            },
            HostTarget::Func { .. } => Value::Undefined,
        }
    }

    /// Array length when the target is a host array.
    pub fn array_len(&self) -> Option<usize> {
        match &self.target {
            HostTarget::Json(json) => match json.as_ref() {
                serde_json::Value::Array(items) => Some(items.len()),
                _ => None,
            },
            HostTarget::Func { .. } => None,
        }
    }

    /// Own enumerable keys (for-in support).
    pub fn keys(&self) -> Vec<String> {
        match &self.target {
            HostTarget::Json(json) => match json.as_ref() {
                serde_json::Value::Object(map) => map.keys().cloned().collect(),
                serde_json::Value::Array(items) => {
                    (0..items.len()).map(|i| i.to_string()).collect()
                }
                _ => Vec::new(),
            },
            HostTarget::Func { .. } => Vec::new(),
        }
    }

    pub fn is_callable(&self) -> bool {
        matches!(self.target, HostTarget::Func { .. })
    }

    pub fn type_of(&self) -> &'static str {
        match &self.target {
            HostTarget::Func { .. } => "function",
            HostTarget::Json(_) => "object",
        }
    }

    pub fn truthy(&self) -> bool {
        true
    }

    pub fn display(&self) -> String {
        match &self.target {
            HostTarget::Func { .. } => "function".to_string(),
            HostTarget::Json(json) => match json.as_ref() {
                serde_json::Value::Array(_) => "[host array]".to_string(),
                _ => "[object Object]".to_string(),
            },
        }
    }

    /// Raw deep conversion of the target (used for structural equality in
    /// tests and for pass-through past the depth bound).
    pub fn to_json(&self) -> Option<serde_json::Value> {
        match &self.target {
            HostTarget::Json(json) => Some(json.as_ref().clone()),
            HostTarget::Func { .. } => None,
        }
    }
}

/// Deep conversion host JSON → inner values. Dangerous keys are dropped.
pub fn json_to_value(json: &serde_json::Value) -> Value {
    match json {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Bool(*b),
        serde_json::Value::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
        serde_json::Value::String(s) => Value::str(s.clone()),
        serde_json::Value::Array(items) => {
            Value::array(items.iter().map(json_to_value).collect())
        }
        serde_json::Value::Object(map) => {
            let mut data = ObjectData::new();
            for (k, v) in map {
                if DANGEROUS_KEYS.contains(&k.as_str()) {
                    continue;
                }
                data.set(k, json_to_value(v));
            }
            Value::object(data)
        }
    }
}

/// Why an inner value refused to cross inner → host.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CloneError {
    #[error("functions are not structurally clonable")]
    Function,
    #[error("value nesting exceeds depth {0}")]
    Depth(usize),
    #[error("dangerous key '{0}'")]
    DangerousKey(String),
}

/// Structural clone inner → host. `lossy` converts functions to null
/// (result extraction); strict mode refuses them (tool-call arguments).
pub fn value_to_json(
    value: &Value,
    max_depth: usize,
    lossy: bool,
) -> Result<serde_json::Value, CloneError> {
    fn walk(
        value: &Value,
        depth: usize,
        max_depth: usize,
        lossy: bool,
    ) -> Result<serde_json::Value, CloneError> {
        if depth > max_depth {
            return Err(CloneError::Depth(max_depth));
        }
        match value {
            Value::Undefined | Value::Null => Ok(serde_json::Value::Null),
            Value::Bool(b) => Ok(serde_json::Value::Bool(*b)),
            Value::Number(n) => Ok(serde_json::Number::from_f64(*n)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null)),
            Value::BigInt(n) => Ok(serde_json::Value::String(n.to_string())),
            Value::Str(s) => Ok(serde_json::Value::String(s.to_string())),
            Value::Array(items) => {
                let items = items.borrow();
                let mut out = Vec::with_capacity(items.len());
                for item in items.iter() {
                    out.push(walk(item, depth + 1, max_depth, lossy)?);
                }
                Ok(serde_json::Value::Array(out))
            }
            Value::Object(obj) => {
                let obj = obj.borrow();
                let mut map = serde_json::Map::new();
                for (k, v) in &obj.props {
                    if DANGEROUS_KEYS.contains(&k.as_str()) {
                        return Err(CloneError::DangerousKey(k.clone()));
                    }
                    map.insert(k.clone(), walk(v, depth + 1, max_depth, lossy)?);
                }
                Ok(serde_json::Value::Object(map))
            }
            Value::Function(_) | Value::Native(_) => {
                if lossy {
                    Ok(serde_json::Value::Null)
                } else {
                    Err(CloneError::Function)
                }
            }
            Value::Proxy(p) => match p.to_json() {
                Some(json) => Ok(json),
                None => {
                    if lossy {
                        Ok(serde_json::Value::Null)
                    } else {
                        Err(CloneError::Function)
                    }
                }
            },
        }
    }
    walk(value, 0, max_depth, lossy)
}
