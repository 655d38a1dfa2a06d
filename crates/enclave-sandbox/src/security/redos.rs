//! Regex literal prescan for catastrophic-backtracking shapes.
//!
//! A syntactic heuristic, not a full automaton analysis: it flags the
//! classic ReDoS families — a quantified group that is itself quantified
//! (`(a+)+`, `([a-z]+)*`), and alternations with duplicate branches under a
//! quantifier (`(a|a)+`). SECURE and above reject every regex literal
//! outright, so this prescan only gates the lower levels.

pub const REDOS_RULE: &str = "redos-regex";

/// Whether `pattern` exhibits a nested- or duplicated-quantifier shape.
pub fn regex_is_suspicious(pattern: &str) -> bool {
    has_nested_quantifier(pattern) || has_duplicate_alternation(pattern)
}

fn is_quantifier(b: Option<u8>) -> bool {
    matches!(b, Some(b'+') | Some(b'*') | Some(b'{'))
}

/// A group closing with a quantifier applied, where the group body itself
/// contains a quantified atom.
fn has_nested_quantifier(pattern: &str) -> bool {
    let bytes = pattern.as_bytes();
    let mut stack: Vec<bool> = Vec::new(); // per-group: saw a quantifier inside
    let mut i = 0;
    let mut in_class = false;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 1,
            b'[' if !in_class => in_class = true,
            b']' if in_class => in_class = false,
            _ if in_class => {}
            b'(' => stack.push(false),
            b')' => {
                let inner_quantified = stack.pop().unwrap_or(false);
                let quantified_group = is_quantifier(bytes.get(i + 1).copied());
                if inner_quantified && quantified_group {
                    return true;
                }
                // A quantified group counts as a quantified atom for its parent.
                if quantified_group {
                    if let Some(parent) = stack.last_mut() {
                        *parent = true;
                    }
                }
            }
            b'+' | b'*' => {
                if let Some(top) = stack.last_mut() {
                    *top = true;
                }
            }
            b'{' => {
                if let Some(top) = stack.last_mut() {
                    *top = true;
                }
            }
            _ => {}
        }
        i += 1;
    }
    false
}

/// `(x|x)` with a quantifier behind it: duplicate alternation branches.
fn has_duplicate_alternation(pattern: &str) -> bool {
    let bytes = pattern.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' {
            i += 2;
            continue;
        }
        if bytes[i] == b'(' {
            if let Some(close) = matching_paren(bytes, i) {
                if is_quantifier(bytes.get(close + 1).copied()) {
                    let body = &pattern[i + 1..close];
                    let body = body.strip_prefix("?:").unwrap_or(body);
                    let branches: Vec<&str> = body.split('|').collect();
                    if branches.len() > 1 {
                        for (bi, b) in branches.iter().enumerate() {
                            if branches[bi + 1..].contains(b) {
                                return true;
                            }
                        }
                    }
                }
            }
        }
        i += 1;
    }
    false
}

fn matching_paren(bytes: &[u8], open: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut i = open;
    let mut in_class = false;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 1,
            b'[' if !in_class => in_class = true,
            b']' if in_class => in_class = false,
            b'(' if !in_class => depth += 1,
            b')' if !in_class => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
        i += 1;
    }
    None
}
