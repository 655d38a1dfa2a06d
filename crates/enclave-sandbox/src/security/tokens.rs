//! Canonical denylists — single source of truth.
//!
//! Grouped constants consumed by both the static validator and the runtime
//! membrane; platform-independent and immutable. The membrane derives its
//! `BlockedPropertySet` from the category groups at creation time.

use enclave_core::config::PropertyCategory;

/// Identifiers that escape attempts reach for. Referencing one — read,
/// write, member access, or destructuring — is a violation at STANDARD and
/// above; the prototype trio is additionally treated as a forbidden token
/// in literal and folded form at SECURE and above.
pub const HARD_FORBIDDEN_IDENTIFIERS: &[&str] = &[
    "eval",
    "Function",
    "Reflect",
    "Proxy",
    "process",
    "require",
    "module",
    "__dirname",
    "__filename",
    "global",
    "globalThis",
    "import",
];

/// The prototype-traversal trio.
pub const PROTO_TOKENS: &[&str] = &["constructor", "prototype", "__proto__"];

/// All forbidden tokens (identifier, string-literal, and folded forms).
pub fn is_forbidden_token(name: &str) -> bool {
    HARD_FORBIDDEN_IDENTIFIERS.contains(&name) || PROTO_TOKENS.contains(&name)
}

/// `Object.<method>` / `Reflect.<anything>` patterns rejected by the
/// meta-programming rule.
pub const META_PROGRAMMING_MEMBERS: &[&str] = &[
    "getPrototypeOf",
    "setPrototypeOf",
    "getOwnPropertyDescriptor",
    "getOwnPropertyDescriptors",
    "defineProperty",
    "defineProperties",
    "create",
];

// ============================================================================
// Membrane category membership
// ============================================================================

/// PROTOTYPE: constructor / prototype chain traversal
pub const PROTOTYPE_PROPS: &[&str] = &["constructor", "prototype", "__proto__"];

/// LEGACY_ACCESSORS: pre-ES5 accessor installation
pub const LEGACY_ACCESSOR_PROPS: &[&str] = &[
    "__defineGetter__",
    "__defineSetter__",
    "__lookupGetter__",
    "__lookupSetter__",
];

/// ITERATOR_HELPERS: iterator-helper escape classes
pub const ITERATOR_HELPER_PROPS: &[&str] = &["toArray", "forEach", "drop", "take", "flatMap"];

/// REFLECTION: descriptor / key enumeration surfaces
pub const REFLECTION_PROPS: &[&str] = &[
    "getPrototypeOf",
    "getOwnPropertyDescriptor",
    "getOwnPropertyDescriptors",
    "ownKeys",
    "keys",
];

/// TIMING: high-resolution clocks
pub const TIMING_PROPS: &[&str] = &["hrtime", "now"];

/// Membership list for a category.
pub fn props_for_category(category: PropertyCategory) -> &'static [&'static str] {
    match category {
        PropertyCategory::Prototype => PROTOTYPE_PROPS,
        PropertyCategory::LegacyAccessors => LEGACY_ACCESSOR_PROPS,
        PropertyCategory::IteratorHelpers => ITERATOR_HELPER_PROPS,
        PropertyCategory::Reflection => REFLECTION_PROPS,
        PropertyCategory::Timing => TIMING_PROPS,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_proto_trio_is_forbidden() {
        for t in ["constructor", "prototype", "__proto__"] {
            assert!(is_forbidden_token(t));
        }
        assert!(is_forbidden_token("eval"));
        assert!(!is_forbidden_token("toString"));
    }

    #[test]
    fn test_categories_are_disjoint_from_legacy() {
        for p in LEGACY_ACCESSOR_PROPS {
            assert!(!PROTOTYPE_PROPS.contains(p));
        }
    }
}
