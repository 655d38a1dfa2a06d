//! Conservative constant folder.
//!
//! Answers one question for the obfuscation rule: does this expression
//! provably evaluate to a given string? It folds only over literals,
//! template literals, identifiers the caller proves constant, and a small
//! set of string/array methods applied to folded constants
//! (`split`/`join`/`reverse`/`slice`/`concat`/`repeat`, case changes,
//! `String.fromCharCode`, base64 via `atob`). Anything else refuses to
//! fold — false negatives here are caught by the runtime membrane, false
//! positives are not acceptable.

use base64::Engine;
use enclave_lang::ast::{Arg, ArrayElem, BinaryOp, Expr, MemberProp};

/// Values the folder can produce.
#[derive(Debug, Clone, PartialEq)]
enum Folded {
    Str(String),
    Num(f64),
    Arr(Vec<Folded>),
}

/// Fold `expr` to a string constant if provable. `resolve` maps an
/// identifier to its known-constant folded string, when the surrounding
/// scope proves one.
pub fn fold_to_string(expr: &Expr, resolve: &dyn Fn(&str) -> Option<String>) -> Option<String> {
    match fold(expr, resolve)? {
        Folded::Str(s) => Some(s),
        _ => None,
    }
}

fn fold(expr: &Expr, resolve: &dyn Fn(&str) -> Option<String>) -> Option<Folded> {
    match expr {
        Expr::Str { value, .. } => Some(Folded::Str(value.clone())),
        Expr::Number { value, .. } => Some(Folded::Num(*value)),
        Expr::Ident { name, .. } => resolve(name).map(Folded::Str),
        Expr::Template { quasis, exprs, .. } => {
            let mut out = String::new();
            let mut parts = exprs.iter();
            for (i, quasi) in quasis.iter().enumerate() {
                out.push_str(quasi);
                if i < quasis.len() - 1 {
                    match fold(parts.next()?, resolve)? {
                        Folded::Str(s) => out.push_str(&s),
                        Folded::Num(n) => out.push_str(&num_to_string(n)),
                        Folded::Arr(_) => return None,
                    }
                }
            }
            Some(Folded::Str(out))
        }
        Expr::Binary {
            op: BinaryOp::Add,
            left,
            right,
            ..
        } => {
            let l = fold(left, resolve)?;
            let r = fold(right, resolve)?;
            match (l, r) {
                (Folded::Str(a), Folded::Str(b)) => Some(Folded::Str(a + &b)),
                (Folded::Str(a), Folded::Num(b)) => Some(Folded::Str(a + &num_to_string(b))),
                (Folded::Num(a), Folded::Str(b)) => Some(Folded::Str(num_to_string(a) + &b)),
                (Folded::Num(a), Folded::Num(b)) => Some(Folded::Num(a + b)),
                _ => None,
            }
        }
        Expr::Array { elements, .. } => {
            let mut out = Vec::new();
            for elem in elements {
                match elem {
                    ArrayElem::Expr(e) => out.push(fold(e, resolve)?),
                    _ => return None,
                }
            }
            Some(Folded::Arr(out))
        }
        Expr::Call {
            callee,
            args,
            optional: false,
            ..
        } => fold_call(callee, args, resolve),
        _ => None,
    }
}

fn fold_call(
    callee: &Expr,
    args: &[Arg],
    resolve: &dyn Fn(&str) -> Option<String>,
) -> Option<Folded> {
    let plain_args: Option<Vec<&Expr>> = args
        .iter()
        .map(|a| match a {
            Arg::Expr(e) => Some(e),
            Arg::Spread(_) => None,
        })
        .collect();
    let plain_args = plain_args?;

    let Expr::Member {
        object,
        property: MemberProp::Ident(method),
        optional: false,
        ..
    } = callee
    else {
        // Free calls: atob("...") over a constant.
        if let Expr::Ident { name, .. } = callee {
            if name == "atob" && plain_args.len() == 1 {
                if let Folded::Str(s) = fold(plain_args[0], resolve)? {
                    let bytes = base64::engine::general_purpose::STANDARD
                        .decode(s.as_bytes())
                        .ok()?;
                    return Some(Folded::Str(String::from_utf8(bytes).ok()?));
                }
            }
        }
        return None;
    };

    // String.fromCharCode(99, 111, ...)
    if let Expr::Ident { name, .. } = object.as_ref() {
        if name == "String" && method == "fromCharCode" {
            let mut out = String::new();
            for arg in &plain_args {
                match fold(arg, resolve)? {
                    Folded::Num(n) => out.push(char::from_u32(n as u32)?),
                    _ => return None,
                }
            }
            return Some(Folded::Str(out));
        }
    }

    let receiver = fold(object, resolve)?;
    match (receiver, method.as_str()) {
        (Folded::Str(s), "split") => {
            let sep = match plain_args.first() {
                Some(e) => match fold(e, resolve)? {
                    Folded::Str(sep) => sep,
                    _ => return None,
                },
                None => return Some(Folded::Arr(vec![Folded::Str(s)])),
            };
            let parts: Vec<Folded> = if sep.is_empty() {
                s.chars().map(|c| Folded::Str(c.to_string())).collect()
            } else {
                s.split(&sep).map(|p| Folded::Str(p.to_string())).collect()
            };
            Some(Folded::Arr(parts))
        }
        (Folded::Str(s), "slice") => {
            let chars: Vec<char> = s.chars().collect();
            let (start, end) = fold_slice_bounds(&plain_args, chars.len(), resolve)?;
            Some(Folded::Str(chars[start..end].iter().collect()))
        }
        (Folded::Str(s), "concat") => {
            let mut out = s;
            for arg in &plain_args {
                match fold(arg, resolve)? {
                    Folded::Str(p) => out.push_str(&p),
                    Folded::Num(n) => out.push_str(&num_to_string(n)),
                    _ => return None,
                }
            }
            Some(Folded::Str(out))
        }
        (Folded::Str(s), "repeat") => {
            if let Folded::Num(n) = fold(plain_args.first()?, resolve)? {
                if !(0.0..=1024.0).contains(&n) {
                    return None;
                }
                return Some(Folded::Str(s.repeat(n as usize)));
            }
            None
        }
        (Folded::Str(s), "toLowerCase") => Some(Folded::Str(s.to_lowercase())),
        (Folded::Str(s), "toUpperCase") => Some(Folded::Str(s.to_uppercase())),
        (Folded::Arr(items), "reverse") => {
            let mut items = items;
            items.reverse();
            Some(Folded::Arr(items))
        }
        (Folded::Arr(items), "join") => {
            let sep = match plain_args.first() {
                Some(e) => match fold(e, resolve)? {
                    Folded::Str(sep) => sep,
                    _ => return None,
                },
                None => ",".to_string(),
            };
            let mut parts = Vec::new();
            for item in items {
                match item {
                    Folded::Str(s) => parts.push(s),
                    Folded::Num(n) => parts.push(num_to_string(n)),
                    Folded::Arr(_) => return None,
                }
            }
            Some(Folded::Str(parts.join(&sep)))
        }
        (Folded::Arr(items), "slice") => {
            let (start, end) = fold_slice_bounds(&plain_args, items.len(), resolve)?;
            Some(Folded::Arr(items[start..end].to_vec()))
        }
        _ => None,
    }
}

fn fold_slice_bounds(
    args: &[&Expr],
    len: usize,
    resolve: &dyn Fn(&str) -> Option<String>,
) -> Option<(usize, usize)> {
    let index = |e: &Expr| -> Option<i64> {
        match fold(e, resolve)? {
            Folded::Num(n) => Some(n as i64),
            _ => None,
        }
    };
    let clamp = |i: i64| -> usize {
        if i < 0 {
            len.saturating_sub(i.unsigned_abs() as usize)
        } else {
            (i as usize).min(len)
        }
    };
    let start = match args.first() {
        Some(e) => clamp(index(e)?),
        None => 0,
    };
    let end = match args.get(1) {
        Some(e) => clamp(index(e)?),
        None => len,
    };
    if start > end {
        return Some((0, 0));
    }
    Some((start, end))
}

fn num_to_string(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e21 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}
