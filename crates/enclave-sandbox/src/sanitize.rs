//! Error sanitizer.
//!
//! Exception objects are the most fruitful escape surface — the classic
//! climbs walk `err.__proto__.constructor.constructor` from a leaked host
//! error to a code-evaluating intrinsic. Nothing host-shaped crosses into
//! the inner realm as-is: every surfaced error is re-materialized as a
//! fresh inner value with an allow-listed name, a truncated path-free
//! message, and no stack (or a redacted placeholder when stack redaction
//! is on). Inner errors have no prototype chain at all, so the climb has
//! nowhere to start.

use crate::realm::value::{new_error_value, ErrorTag, Value};
use enclave_core::limits::MAX_SANITIZED_MESSAGE_BYTES;
use regex::Regex;

/// Names an error may carry into the sandbox; anything else becomes
/// plain "Error".
pub const ALLOWED_ERROR_NAMES: &[&str] = &[
    "Error",
    "TypeError",
    "RangeError",
    "SyntaxError",
    "ReferenceError",
    "EvalError",
    "URIError",
];

/// Placeholder used instead of a stack when redaction is on.
pub const REDACTED_STACK: &str = "    at <sandboxed>";

pub struct Sanitizer {
    redact_stacks: bool,
    max_message_bytes: usize,
    unix_path: Regex,
    windows_path: Regex,
}

impl Sanitizer {
    pub fn new(redact_stacks: bool) -> Self {
        Self {
            redact_stacks,
            max_message_bytes: MAX_SANITIZED_MESSAGE_BYTES,
            // Absolute filesystem paths, both flavors. Deliberately eager:
            // over-redacting a message is fine, leaking a host path is not.
            unix_path: Regex::new(r"(?:/[\w@.\-]+){2,}").expect("static pattern"),
            windows_path: Regex::new(r"[A-Za-z]:\\[^\s'\x22]+").expect("static pattern"),
        }
    }

    /// Clamp an error name to the allow-list.
    pub fn sanitize_name<'a>(&self, name: &'a str) -> &'a str {
        if ALLOWED_ERROR_NAMES.contains(&name) {
            name
        } else {
            "Error"
        }
    }

    /// Strip host paths and truncate.
    pub fn sanitize_message(&self, message: &str) -> String {
        let message = self.unix_path.replace_all(message, "<redacted>");
        let message = self.windows_path.replace_all(&message, "<redacted>");
        let mut out = message.into_owned();
        if out.len() > self.max_message_bytes {
            let mut cut = self.max_message_bytes;
            while !out.is_char_boundary(cut) {
                cut -= 1;
            }
            out.truncate(cut);
            out.push_str("…");
        }
        out
    }

    /// The stack surfaced to the sandbox: omitted, or a redacted
    /// placeholder when redaction is on.
    pub fn sanitized_stack(&self) -> Option<String> {
        if self.redact_stacks {
            Some(REDACTED_STACK.to_string())
        } else {
            None
        }
    }

    /// Re-materialize a host-surfaced error as a fresh inner error value.
    pub fn host_error_value(&self, name: &str, message: &str, tag: ErrorTag) -> Value {
        let value = new_error_value(self.sanitize_name(name), &self.sanitize_message(message), tag);
        if let (Some(stack), Value::Object(obj)) = (self.sanitized_stack(), &value) {
            obj.borrow_mut().set("stack", Value::str(stack));
        }
        value
    }

    /// A failed tool-handler call, as seen from inside the sandbox.
    pub fn tool_error_value(&self, message: &str) -> Value {
        self.host_error_value("Error", message, ErrorTag::ToolError)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_clamped_to_allowlist() {
        let s = Sanitizer::new(false);
        assert_eq!(s.sanitize_name("TypeError"), "TypeError");
        assert_eq!(s.sanitize_name("HostInternalError"), "Error");
        assert_eq!(s.sanitize_name("AggregateError"), "Error");
    }

    #[test]
    fn test_unix_paths_redacted() {
        let s = Sanitizer::new(false);
        let out = s.sanitize_message("ENOENT: open /home/svc/app/secrets.txt failed");
        assert!(!out.contains("/home/svc"));
        assert!(out.contains("<redacted>"));
    }

    #[test]
    fn test_windows_paths_redacted() {
        let s = Sanitizer::new(false);
        let out = s.sanitize_message(r"cannot load C:\Users\svc\node_modules\tool.js");
        assert!(!out.contains(r"C:\Users"));
        assert!(out.contains("<redacted>"));
    }

    #[test]
    fn test_message_truncated() {
        let s = Sanitizer::new(false);
        let out = s.sanitize_message(&"x".repeat(5000));
        assert!(out.len() <= MAX_SANITIZED_MESSAGE_BYTES + "…".len());
    }

    #[test]
    fn test_stack_omitted_by_default() {
        let s = Sanitizer::new(false);
        assert!(s.sanitized_stack().is_none());
        let Value::Object(obj) = s.host_error_value("TypeError", "m", ErrorTag::None) else {
            panic!("expected object");
        };
        assert!(!obj.borrow().has("stack"));
    }

    #[test]
    fn test_redacted_stack_has_no_paths() {
        let s = Sanitizer::new(true);
        let stack = s.sanitized_stack().expect("stack placeholder expected");
        assert!(!stack.contains('/'));
        assert!(!stack.contains('\\'));
        let Value::Object(obj) = s.host_error_value("Error", "m", ErrorTag::None) else {
            panic!("expected object");
        };
        assert!(obj.borrow().has("stack"));
    }

    #[test]
    fn test_tool_error_is_tagged() {
        let s = Sanitizer::new(false);
        let Value::Object(obj) = s.tool_error_value("backend exploded at /srv/api/main.rs") else {
            panic!("expected object");
        };
        assert_eq!(obj.borrow().error_tag, ErrorTag::ToolError);
        let message = obj.borrow().get("message");
        match message {
            Some(Value::Str(m)) => assert!(!m.contains("/srv/api")),
            other => panic!("expected message, got {:?}", other),
        }
    }
}
