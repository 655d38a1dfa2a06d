//! Inner-realm intrinsics: the curated global namespace and the method
//! tables for primitives.
//!
//! Everything here is realm-private. Namespace objects are frozen; method
//! lookups return fresh bound natives capturing their receiver. Natives
//! that iterate call back through the interpreter so callbacks are
//! governed like any other sandboxed code, and natives that allocate
//! pre-check the allocation with the governor before materializing.

use super::interpreter::Interp;
use super::value::{
    fmt_number, new_error_value, to_display_string, to_number, Control, ErrorTag, NativeFunction,
    ObjectData, Value,
};
use crate::membrane::{json_to_value, value_to_json};
use enclave_core::limits::{array_alloc_estimate, string_alloc_estimate};
use std::cell::Cell;
use std::rc::Rc;

pub fn throw_error(name: &str, message: impl Into<String>) -> Control {
    Control::Throw(new_error_value(name, &message.into(), ErrorTag::None))
}

pub fn type_error(message: impl Into<String>) -> Control {
    throw_error("TypeError", message)
}

pub fn range_error(message: impl Into<String>) -> Control {
    throw_error("RangeError", message)
}

pub fn native(
    name: &str,
    f: impl Fn(&mut Interp<'_>, Vec<Value>) -> Result<Value, Control> + 'static,
) -> Value {
    Value::Native(Rc::new(NativeFunction {
        name: name.to_string(),
        f: Box::new(f),
    }))
}

fn frozen_object(props: Vec<(&str, Value)>) -> Value {
    let mut data = ObjectData::new();
    for (k, v) in props {
        data.set(k, v);
    }
    data.frozen = true;
    Value::object(data)
}

fn arg(args: &[Value], i: usize) -> Value {
    args.get(i).cloned().unwrap_or(Value::Undefined)
}

// ─── Global namespace ────────────────────────────────────────────────────

/// Build the curated globals. `expose_console` follows the level config;
/// `callTool` is appended by the enclave driver because it closes over the
/// bridge port.
pub fn seed_globals(expose_console: bool) -> Vec<(String, Value)> {
    let mut globals: Vec<(String, Value)> = vec![
        ("Math".to_string(), math_object()),
        ("JSON".to_string(), json_object()),
        ("Array".to_string(), native("Array", array_constructor)),
        ("Object".to_string(), object_namespace()),
        ("String".to_string(), native("String", string_constructor)),
        ("Number".to_string(), native("Number", number_constructor)),
        ("Boolean".to_string(), native("Boolean", |_, args| {
            Ok(Value::Bool(arg(&args, 0).truthy()))
        })),
        ("Date".to_string(), date_object()),
        ("parseInt".to_string(), native("parseInt", parse_int)),
        ("parseFloat".to_string(), native("parseFloat", parse_float)),
        ("isNaN".to_string(), native("isNaN", |_, args| {
            Ok(Value::Bool(to_number(&arg(&args, 0)).is_nan()))
        })),
        ("isFinite".to_string(), native("isFinite", |_, args| {
            Ok(Value::Bool(to_number(&arg(&args, 0)).is_finite()))
        })),
        ("encodeURI".to_string(), native("encodeURI", |_, args| {
            Ok(Value::str(percent_encode(
                &to_display_string(&arg(&args, 0)),
                true,
            )))
        })),
        ("decodeURI".to_string(), native("decodeURI", |_, args| {
            percent_decode(&to_display_string(&arg(&args, 0))).map(Value::str)
        })),
        (
            "encodeURIComponent".to_string(),
            native("encodeURIComponent", |_, args| {
                Ok(Value::str(percent_encode(
                    &to_display_string(&arg(&args, 0)),
                    false,
                )))
            }),
        ),
        (
            "decodeURIComponent".to_string(),
            native("decodeURIComponent", |_, args| {
                percent_decode(&to_display_string(&arg(&args, 0))).map(Value::str)
            }),
        ),
        ("NaN".to_string(), Value::Number(f64::NAN)),
        ("Infinity".to_string(), Value::Number(f64::INFINITY)),
        ("undefined".to_string(), Value::Undefined),
    ];
    if expose_console {
        globals.push(("console".to_string(), console_object()));
    }
    globals
}

fn math_object() -> Value {
    let unary = |name: &str, f: fn(f64) -> f64| {
        native(name, move |_, args| {
            Ok(Value::Number(f(to_number(&arg(&args, 0)))))
        })
    };
    frozen_object(vec![
        ("PI", Value::Number(std::f64::consts::PI)),
        ("E", Value::Number(std::f64::consts::E)),
        ("abs", unary("abs", f64::abs)),
        ("floor", unary("floor", f64::floor)),
        ("ceil", unary("ceil", f64::ceil)),
        ("round", unary("round", f64::round)),
        ("trunc", unary("trunc", f64::trunc)),
        ("sqrt", unary("sqrt", f64::sqrt)),
        ("cbrt", unary("cbrt", f64::cbrt)),
        ("sign", unary("sign", |n| {
            if n.is_nan() {
                f64::NAN
            } else if n > 0.0 {
                1.0
            } else if n < 0.0 {
                -1.0
            } else {
                n
            }
        })),
        ("log", unary("log", f64::ln)),
        ("log2", unary("log2", f64::log2)),
        ("log10", unary("log10", f64::log10)),
        ("exp", unary("exp", f64::exp)),
        ("sin", unary("sin", f64::sin)),
        ("cos", unary("cos", f64::cos)),
        ("tan", unary("tan", f64::tan)),
        ("atan", unary("atan", f64::atan)),
        ("pow", native("pow", |_, args| {
            Ok(Value::Number(
                to_number(&arg(&args, 0)).powf(to_number(&arg(&args, 1))),
            ))
        })),
        ("atan2", native("atan2", |_, args| {
            Ok(Value::Number(
                to_number(&arg(&args, 0)).atan2(to_number(&arg(&args, 1))),
            ))
        })),
        ("hypot", native("hypot", |_, args| {
            let mut sum = 0.0;
            for a in &args {
                let n = to_number(a);
                sum += n * n;
            }
            Ok(Value::Number(sum.sqrt()))
        })),
        ("min", native("min", |_, args| {
            let mut best = f64::INFINITY;
            for a in &args {
                let n = to_number(a);
                if n.is_nan() {
                    return Ok(Value::Number(f64::NAN));
                }
                best = best.min(n);
            }
            Ok(Value::Number(best))
        })),
        ("max", native("max", |_, args| {
            let mut best = f64::NEG_INFINITY;
            for a in &args {
                let n = to_number(a);
                if n.is_nan() {
                    return Ok(Value::Number(f64::NAN));
                }
                best = best.max(n);
            }
            Ok(Value::Number(best))
        })),
        ("random", math_random()),
    ])
}

/// xorshift64*, seeded from the wall clock. Statistical quality only; the
/// sandbox offers no cryptographic randomness by design.
fn math_random() -> Value {
    let state = Cell::new(
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0x9E3779B97F4A7C15)
            | 1,
    );
    native("random", move |_, _| {
        let mut x = state.get();
        x ^= x >> 12;
        x ^= x << 25;
        x ^= x >> 27;
        state.set(x);
        let bits = x.wrapping_mul(0x2545F4914F6CDD1D) >> 11;
        Ok(Value::Number(bits as f64 / (1u64 << 53) as f64))
    })
}

fn json_object() -> Value {
    frozen_object(vec![
        ("parse", native("parse", |_, args| {
            let text = to_display_string(&arg(&args, 0));
            match serde_json::from_str::<serde_json::Value>(&text) {
                Ok(json) => Ok(json_to_value(&json)),
                Err(e) => Err(throw_error("SyntaxError", format!("invalid JSON: {}", e))),
            }
        })),
        ("stringify", native("stringify", |interp, args| {
            let value = arg(&args, 0);
            if matches!(value, Value::Undefined | Value::Function(_) | Value::Native(_)) {
                return Ok(Value::Undefined);
            }
            let json = value_to_json(&value, 64, true)
                .map_err(|e| type_error(format!("cannot stringify: {}", e)))?;
            let pretty = matches!(args.get(2), Some(v) if to_number(v) > 0.0);
            let text = if pretty {
                serde_json::to_string_pretty(&json)
            } else {
                serde_json::to_string(&json)
            }
            .map_err(|e| type_error(format!("cannot stringify: {}", e)))?;
            interp.governor.debit_alloc(string_alloc_estimate(text.len()))?;
            Ok(Value::str(text))
        })),
    ])
}

fn object_namespace() -> Value {
    frozen_object(vec![
        ("keys", native("keys", |_, args| {
            Ok(Value::array(
                own_keys(&arg(&args, 0))?.into_iter().map(Value::str).collect(),
            ))
        })),
        ("values", native("values", |interp, args| {
            let value = arg(&args, 0);
            let mut out = Vec::new();
            for key in own_keys(&value)? {
                out.push(interp.member_get(&value, &key)?);
            }
            Ok(Value::array(out))
        })),
        ("entries", native("entries", |interp, args| {
            let value = arg(&args, 0);
            let mut out = Vec::new();
            for key in own_keys(&value)? {
                let v = interp.member_get(&value, &key)?;
                out.push(Value::array(vec![Value::str(key), v]));
            }
            Ok(Value::array(out))
        })),
        ("assign", native("assign", |interp, args| {
            let target = arg(&args, 0);
            for source in args.iter().skip(1) {
                for key in own_keys(source)? {
                    let v = interp.member_get(source, &key)?;
                    interp.member_set(&target, &key, v)?;
                }
            }
            Ok(target)
        })),
        ("freeze", native("freeze", |_, args| {
            let value = arg(&args, 0);
            if let Value::Object(obj) = &value {
                obj.borrow_mut().frozen = true;
            }
            Ok(value)
        })),
        ("fromEntries", native("fromEntries", |interp, args| {
            let entries = arg(&args, 0);
            let mut data = ObjectData::new();
            for entry in interp.iter_values(&entries)? {
                let key = interp.member_get(&entry, "0")?;
                let val = interp.member_get(&entry, "1")?;
                data.set(&to_display_string(&key), val);
            }
            Ok(Value::object(data))
        })),
        // The prototype of every sandbox value is null by construction.
        ("getPrototypeOf", native("getPrototypeOf", |_, _| Ok(Value::Null))),
    ])
}

fn own_keys(value: &Value) -> Result<Vec<String>, Control> {
    match value {
        Value::Object(obj) => Ok(obj.borrow().keys()),
        Value::Array(items) => Ok((0..items.borrow().len()).map(|i| i.to_string()).collect()),
        Value::Proxy(p) => Ok(p.keys()),
        Value::Str(s) => Ok((0..s.chars().count()).map(|i| i.to_string()).collect()),
        _ => Err(type_error("argument is not an object")),
    }
}

fn date_object() -> Value {
    frozen_object(vec![(
        "now",
        native("now", |_, _| {
            let ms = std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_millis() as f64)
                .unwrap_or(f64::NAN);
            Ok(Value::Number(ms))
        }),
    )])
}

fn console_object() -> Value {
    let method = |name: &'static str| {
        native(name, move |interp, args| {
            let line = args
                .iter()
                .map(to_display_string)
                .collect::<Vec<_>>()
                .join(" ");
            tracing::debug!(target: "enclave::console", method = name, "{}", line);
            interp.governor.console_write(line)?;
            Ok(Value::Undefined)
        })
    };
    frozen_object(vec![
        ("log", method("log")),
        ("info", method("info")),
        ("warn", method("warn")),
        ("error", method("error")),
    ])
}

// ─── Constructors / callable intrinsics ──────────────────────────────────

pub fn array_constructor(interp: &mut Interp<'_>, args: Vec<Value>) -> Result<Value, Control> {
    if args.len() == 1 {
        if let Value::Number(n) = args[0] {
            if n < 0.0 || n.fract() != 0.0 || n > u32::MAX as f64 {
                return Err(range_error("invalid array length"));
            }
            let len = n as usize;
            interp.governor.precheck_alloc(array_alloc_estimate(len))?;
            interp.governor.debit_alloc(array_alloc_estimate(len))?;
            return Ok(Value::array(vec![Value::Undefined; len]));
        }
    }
    interp
        .governor
        .debit_alloc(array_alloc_estimate(args.len()))?;
    Ok(Value::array(args))
}

fn string_constructor(_: &mut Interp<'_>, args: Vec<Value>) -> Result<Value, Control> {
    Ok(Value::str(match args.first() {
        Some(v) => to_display_string(v),
        None => String::new(),
    }))
}

fn number_constructor(_: &mut Interp<'_>, args: Vec<Value>) -> Result<Value, Control> {
    Ok(Value::Number(match args.first() {
        Some(v) => to_number(v),
        None => 0.0,
    }))
}

/// Static members of the callable intrinsics (`Array.isArray`,
/// `String.fromCharCode`, `Number.isInteger`, …), resolved by name from
/// the interpreter's member chokepoint.
pub fn intrinsic_static_member(intrinsic: &str, key: &str) -> Option<Value> {
    match (intrinsic, key) {
        ("Array", "isArray") => Some(native("isArray", |_, args| {
            Ok(Value::Bool(matches!(arg(&args, 0), Value::Array(_))))
        })),
        ("Array", "of") => Some(native("of", |interp, args| {
            interp
                .governor
                .debit_alloc(array_alloc_estimate(args.len()))?;
            Ok(Value::array(args))
        })),
        ("Array", "from") => Some(native("from", |interp, args| {
            let source = arg(&args, 0);
            let map_fn = args.get(1).cloned();
            let items = interp.iter_values(&source)?;
            interp
                .governor
                .debit_alloc(array_alloc_estimate(items.len()))?;
            let mut out = Vec::with_capacity(items.len());
            for (i, item) in items.into_iter().enumerate() {
                interp.governor.tick_iteration()?;
                match &map_fn {
                    Some(f) if !matches!(f, Value::Undefined) => {
                        out.push(interp.call_value(f.clone(), vec![item, Value::Number(i as f64)])?)
                    }
                    _ => out.push(item),
                }
            }
            Ok(Value::array(out))
        })),
        ("String", "fromCharCode") => Some(native("fromCharCode", |_, args| {
            let mut out = String::new();
            for a in &args {
                let code = to_number(a) as u32;
                out.push(char::from_u32(code).unwrap_or('\u{FFFD}'));
            }
            Ok(Value::str(out))
        })),
        ("Number", "isInteger") => Some(native("isInteger", |_, args| {
            Ok(Value::Bool(
                matches!(arg(&args, 0), Value::Number(n) if n.fract() == 0.0 && n.is_finite()),
            ))
        })),
        ("Number", "isFinite") => Some(native("isFinite", |_, args| {
            Ok(Value::Bool(matches!(arg(&args, 0), Value::Number(n) if n.is_finite())))
        })),
        ("Number", "isNaN") => Some(native("isNaN", |_, args| {
            Ok(Value::Bool(matches!(arg(&args, 0), Value::Number(n) if n.is_nan())))
        })),
        ("Number", "parseFloat") => Some(native("parseFloat", parse_float)),
        ("Number", "parseInt") => Some(native("parseInt", parse_int)),
        ("Number", "MAX_SAFE_INTEGER") => Some(Value::Number(9007199254740991.0)),
        ("Number", "MIN_SAFE_INTEGER") => Some(Value::Number(-9007199254740991.0)),
        ("Number", "EPSILON") => Some(Value::Number(f64::EPSILON)),
        _ => None,
    }
}

fn parse_int(_: &mut Interp<'_>, args: Vec<Value>) -> Result<Value, Control> {
    let text = to_display_string(&arg(&args, 0));
    let text = text.trim();
    let radix = match args.get(1) {
        Some(v) if !matches!(v, Value::Undefined) => to_number(v) as u32,
        _ => 10,
    };
    if !(2..=36).contains(&radix) {
        return Ok(Value::Number(f64::NAN));
    }
    let (neg, digits) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text.strip_prefix('+').unwrap_or(text)),
    };
    let digits = if radix == 16 {
        digits
            .strip_prefix("0x")
            .or_else(|| digits.strip_prefix("0X"))
            .unwrap_or(digits)
    } else {
        digits
    };
    let mut value: f64 = 0.0;
    let mut any = false;
    for ch in digits.chars() {
        match ch.to_digit(radix) {
            Some(d) => {
                value = value * radix as f64 + d as f64;
                any = true;
            }
            None => break,
        }
    }
    if !any {
        return Ok(Value::Number(f64::NAN));
    }
    Ok(Value::Number(if neg { -value } else { value }))
}

fn parse_float(_: &mut Interp<'_>, args: Vec<Value>) -> Result<Value, Control> {
    let text = to_display_string(&arg(&args, 0));
    let text = text.trim();
    let mut end = 0;
    let bytes = text.as_bytes();
    let mut seen_dot = false;
    let mut seen_exp = false;
    while end < bytes.len() {
        let b = bytes[end];
        let ok = b.is_ascii_digit()
            || (end == 0 && (b == b'-' || b == b'+'))
            || (b == b'.' && !seen_dot && !seen_exp)
            || ((b == b'e' || b == b'E') && !seen_exp && end > 0)
            || ((b == b'-' || b == b'+') && end > 0 && (bytes[end - 1] == b'e' || bytes[end - 1] == b'E'));
        if !ok {
            break;
        }
        if b == b'.' {
            seen_dot = true;
        }
        if b == b'e' || b == b'E' {
            seen_exp = true;
        }
        end += 1;
    }
    Ok(Value::Number(
        text[..end].parse::<f64>().unwrap_or(f64::NAN),
    ))
}

// ─── Percent encoding ────────────────────────────────────────────────────

fn percent_encode(input: &str, uri_mode: bool) -> String {
    const UNRESERVED: &str = "-_.!~*'()";
    const URI_EXTRA: &str = ";,/?:@&=+$#";
    let mut out = String::with_capacity(input.len());
    for ch in input.chars() {
        let keep = ch.is_ascii_alphanumeric()
            || UNRESERVED.contains(ch)
            || (uri_mode && URI_EXTRA.contains(ch));
        if keep {
            out.push(ch);
        } else {
            let mut buf = [0u8; 4];
            for b in ch.encode_utf8(&mut buf).as_bytes() {
                out.push_str(&format!("%{:02X}", b));
            }
        }
    }
    out
}

fn percent_decode(input: &str) -> Result<String, Control> {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            if i + 2 >= bytes.len() + 1 {
                return Err(throw_error("URIError", "malformed URI sequence"));
            }
            let hex = input
                .get(i + 1..i + 3)
                .ok_or_else(|| throw_error("URIError", "malformed URI sequence"))?;
            let byte = u8::from_str_radix(hex, 16)
                .map_err(|_| throw_error("URIError", "malformed URI sequence"))?;
            out.push(byte);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).map_err(|_| throw_error("URIError", "malformed URI sequence"))
}

// ─── Primitive method tables ─────────────────────────────────────────────

/// Methods on string receivers. Allocating methods pre-check with the
/// governor before materializing.
pub fn string_member(s: &Rc<str>, key: &str) -> Option<Value> {
    let recv = s.clone();
    Some(match key {
        "length" => Value::Number(s.chars().count() as f64),
        "charAt" => native("charAt", move |_, args| {
            let i = to_number(&arg(&args, 0)) as i64;
            Ok(match usize::try_from(i).ok().and_then(|i| recv.chars().nth(i)) {
                Some(c) => Value::str(c.to_string()),
                None => Value::str(""),
            })
        }),
        "charCodeAt" => native("charCodeAt", move |_, args| {
            let i = to_number(&arg(&args, 0)) as i64;
            Ok(match usize::try_from(i).ok().and_then(|i| recv.chars().nth(i)) {
                Some(c) => Value::Number(c as u32 as f64),
                None => Value::Number(f64::NAN),
            })
        }),
        "at" => native("at", move |_, args| {
            let len = recv.chars().count() as i64;
            let mut i = to_number(&arg(&args, 0)) as i64;
            if i < 0 {
                i += len;
            }
            Ok(match usize::try_from(i).ok().filter(|i| (*i as i64) < len) {
                Some(i) => recv
                    .chars()
                    .nth(i)
                    .map(|c| Value::str(c.to_string()))
                    .unwrap_or(Value::Undefined),
                None => Value::Undefined,
            })
        }),
        "indexOf" => native("indexOf", move |_, args| {
            let needle = to_display_string(&arg(&args, 0));
            Ok(Value::Number(match recv.find(&needle) {
                Some(byte_idx) => recv[..byte_idx].chars().count() as f64,
                None => -1.0,
            }))
        }),
        "lastIndexOf" => native("lastIndexOf", move |_, args| {
            let needle = to_display_string(&arg(&args, 0));
            Ok(Value::Number(match recv.rfind(&needle) {
                Some(byte_idx) => recv[..byte_idx].chars().count() as f64,
                None => -1.0,
            }))
        }),
        "includes" => native("includes", move |_, args| {
            let needle = to_display_string(&arg(&args, 0));
            Ok(Value::Bool(recv.contains(&needle)))
        }),
        "startsWith" => native("startsWith", move |_, args| {
            let needle = to_display_string(&arg(&args, 0));
            Ok(Value::Bool(recv.starts_with(&needle)))
        }),
        "endsWith" => native("endsWith", move |_, args| {
            let needle = to_display_string(&arg(&args, 0));
            Ok(Value::Bool(recv.ends_with(&needle)))
        }),
        "slice" => native("slice", move |_, args| {
            let chars: Vec<char> = recv.chars().collect();
            let (start, end) = slice_bounds(&args, chars.len());
            Ok(Value::str(chars[start..end].iter().collect::<String>()))
        }),
        "substring" => native("substring", move |_, args| {
            let chars: Vec<char> = recv.chars().collect();
            let len = chars.len();
            let a = (to_number(&arg(&args, 0)).max(0.0) as usize).min(len);
            let b = match args.get(1) {
                Some(v) if !matches!(v, Value::Undefined) => {
                    (to_number(v).max(0.0) as usize).min(len)
                }
                _ => len,
            };
            let (start, end) = if a <= b { (a, b) } else { (b, a) };
            Ok(Value::str(chars[start..end].iter().collect::<String>()))
        }),
        "toUpperCase" => native("toUpperCase", move |_, _| {
            Ok(Value::str(recv.to_uppercase()))
        }),
        "toLowerCase" => native("toLowerCase", move |_, _| {
            Ok(Value::str(recv.to_lowercase()))
        }),
        "trim" => native("trim", move |_, _| Ok(Value::str(recv.trim().to_string()))),
        "split" => native("split", move |interp, args| {
            let parts: Vec<Value> = match args.first() {
                None | Some(Value::Undefined) => vec![Value::str(recv.to_string())],
                Some(sep) => {
                    let sep = to_display_string(sep);
                    if sep.is_empty() {
                        recv.chars().map(|c| Value::str(c.to_string())).collect()
                    } else {
                        recv.split(&sep).map(|p| Value::str(p.to_string())).collect()
                    }
                }
            };
            interp
                .governor
                .debit_alloc(array_alloc_estimate(parts.len()))?;
            Ok(Value::array(parts))
        }),
        "repeat" => native("repeat", move |interp, args| {
            let n = to_number(&arg(&args, 0));
            if n < 0.0 || !n.is_finite() {
                return Err(range_error("invalid repeat count"));
            }
            let n = n as usize;
            let estimated = string_alloc_estimate(recv.len().saturating_mul(n));
            interp.governor.precheck_alloc(estimated)?;
            Ok(Value::str(recv.repeat(n)))
        }),
        "padStart" => native("padStart", move |interp, args| {
            pad(interp, &recv, &args, true)
        }),
        "padEnd" => native("padEnd", move |interp, args| {
            pad(interp, &recv, &args, false)
        }),
        "concat" => native("concat", move |interp, args| {
            let mut out = recv.to_string();
            for a in &args {
                out.push_str(&to_display_string(a));
            }
            interp.governor.precheck_alloc(string_alloc_estimate(out.len()))?;
            Ok(Value::str(out))
        }),
        "replace" => native("replace", move |_, args| {
            let pattern = to_display_string(&arg(&args, 0));
            let replacement = to_display_string(&arg(&args, 1));
            Ok(Value::str(recv.replacen(&pattern, &replacement, 1)))
        }),
        "replaceAll" => native("replaceAll", move |_, args| {
            let pattern = to_display_string(&arg(&args, 0));
            let replacement = to_display_string(&arg(&args, 1));
            if pattern.is_empty() {
                return Ok(Value::str(recv.to_string()));
            }
            Ok(Value::str(recv.replace(&pattern, &replacement)))
        }),
        "toString" => native("toString", move |_, _| Ok(Value::str(recv.to_string()))),
        _ => {
            // Numeric index access: "abc"[1]
            if let Ok(i) = key.parse::<usize>() {
                return s
                    .chars()
                    .nth(i)
                    .map(|c| Value::str(c.to_string()))
                    .or(Some(Value::Undefined));
            }
            return None;
        }
    })
}

fn pad(
    interp: &mut Interp<'_>,
    recv: &Rc<str>,
    args: &[Value],
    at_start: bool,
) -> Result<Value, Control> {
    let target = to_number(&arg(args, 0));
    if !target.is_finite() || target < 0.0 {
        return Ok(Value::str(recv.to_string()));
    }
    let target = target as usize;
    let filler = match args.get(1) {
        Some(v) if !matches!(v, Value::Undefined) => to_display_string(v),
        _ => " ".to_string(),
    };
    let len = recv.chars().count();
    if target <= len || filler.is_empty() {
        return Ok(Value::str(recv.to_string()));
    }
    interp
        .governor
        .precheck_alloc(string_alloc_estimate(target * 2))?;
    let mut padding = String::new();
    let fill_chars: Vec<char> = filler.chars().collect();
    for i in 0..(target - len) {
        padding.push(fill_chars[i % fill_chars.len()]);
    }
    Ok(Value::str(if at_start {
        format!("{}{}", padding, recv)
    } else {
        format!("{}{}", recv, padding)
    }))
}

fn slice_bounds(args: &[Value], len: usize) -> (usize, usize) {
    let clamp = |v: &Value| -> Option<i64> {
        match v {
            Value::Undefined => None,
            other => Some(to_number(other) as i64),
        }
    };
    let resolve = |i: i64| -> usize {
        if i < 0 {
            len.saturating_sub(i.unsigned_abs() as usize)
        } else {
            (i as usize).min(len)
        }
    };
    let start = args.first().and_then(clamp).map(resolve).unwrap_or(0);
    let end = args.get(1).and_then(clamp).map(resolve).unwrap_or(len);
    if start > end {
        (0, 0)
    } else {
        (start, end)
    }
}

/// Methods on array receivers. Iterating methods tick the governor per
/// element, so a hostile callback or comparator is bounded by the
/// iteration budget like any loop.
pub fn array_member(items: &super::value::Arr, key: &str) -> Option<Value> {
    let recv = items.clone();
    Some(match key {
        "length" => Value::Number(items.borrow().len() as f64),
        "push" => native("push", move |interp, args| {
            interp
                .governor
                .debit_alloc(enclave_core::limits::ARRAY_BYTES_PER_SLOT * args.len() as u64)?;
            let mut items = recv.borrow_mut();
            items.extend(args);
            Ok(Value::Number(items.len() as f64))
        }),
        "pop" => native("pop", move |_, _| {
            Ok(recv.borrow_mut().pop().unwrap_or(Value::Undefined))
        }),
        "shift" => native("shift", move |_, _| {
            let mut items = recv.borrow_mut();
            if items.is_empty() {
                Ok(Value::Undefined)
            } else {
                Ok(items.remove(0))
            }
        }),
        "unshift" => native("unshift", move |interp, args| {
            interp
                .governor
                .debit_alloc(enclave_core::limits::ARRAY_BYTES_PER_SLOT * args.len() as u64)?;
            let mut items = recv.borrow_mut();
            for (i, v) in args.into_iter().enumerate() {
                items.insert(i, v);
            }
            Ok(Value::Number(items.len() as f64))
        }),
        "indexOf" => native("indexOf", move |_, args| {
            let needle = arg(&args, 0);
            let items = recv.borrow();
            Ok(Value::Number(
                items
                    .iter()
                    .position(|v| super::value::strict_eq(v, &needle))
                    .map(|i| i as f64)
                    .unwrap_or(-1.0),
            ))
        }),
        "includes" => native("includes", move |_, args| {
            let needle = arg(&args, 0);
            Ok(Value::Bool(
                recv.borrow().iter().any(|v| super::value::strict_eq(v, &needle)),
            ))
        }),
        "join" => native("join", move |interp, args| {
            let sep = match args.first() {
                Some(v) if !matches!(v, Value::Undefined) => to_display_string(v),
                _ => ",".to_string(),
            };
            let parts: Vec<String> = recv
                .borrow()
                .iter()
                .map(|v| match v {
                    Value::Undefined | Value::Null => String::new(),
                    other => to_display_string(other),
                })
                .collect();
            let out = parts.join(&sep);
            interp.governor.precheck_alloc(string_alloc_estimate(out.len()))?;
            Ok(Value::str(out))
        }),
        "slice" => native("slice", move |interp, args| {
            let items = recv.borrow();
            let (start, end) = slice_bounds(&args, items.len());
            let out: Vec<Value> = items[start..end].to_vec();
            interp.governor.debit_alloc(array_alloc_estimate(out.len()))?;
            Ok(Value::array(out))
        }),
        "concat" => native("concat", move |interp, args| {
            let mut out: Vec<Value> = recv.borrow().clone();
            for a in args {
                match a {
                    Value::Array(other) => out.extend(other.borrow().iter().cloned()),
                    other => out.push(other),
                }
            }
            interp.governor.debit_alloc(array_alloc_estimate(out.len()))?;
            Ok(Value::array(out))
        }),
        "reverse" => native("reverse", move |_, _| {
            recv.borrow_mut().reverse();
            Ok(Value::Array(recv.clone()))
        }),
        "fill" => native("fill", move |_, args| {
            let value = arg(&args, 0);
            let len = recv.borrow().len();
            let (start, end) = match (args.get(1), args.get(2)) {
                (None, _) => (0, len),
                _ => slice_bounds(&args[1..], len),
            };
            let mut items = recv.borrow_mut();
            for slot in &mut items[start..end] {
                *slot = value.clone();
            }
            Ok(Value::Array(recv.clone()))
        }),
        "flat" => native("flat", move |interp, _| {
            let mut out = Vec::new();
            for item in recv.borrow().iter() {
                interp.governor.tick_iteration()?;
                match item {
                    Value::Array(inner) => out.extend(inner.borrow().iter().cloned()),
                    other => out.push(other.clone()),
                }
            }
            interp.governor.debit_alloc(array_alloc_estimate(out.len()))?;
            Ok(Value::array(out))
        }),
        "map" => native("map", move |interp, args| {
            let f = arg(&args, 0);
            let snapshot: Vec<Value> = recv.borrow().clone();
            interp
                .governor
                .debit_alloc(array_alloc_estimate(snapshot.len()))?;
            let mut out = Vec::with_capacity(snapshot.len());
            for (i, item) in snapshot.into_iter().enumerate() {
                interp.governor.tick_iteration()?;
                out.push(interp.call_value(f.clone(), vec![item, Value::Number(i as f64)])?);
            }
            Ok(Value::array(out))
        }),
        "filter" => native("filter", move |interp, args| {
            let f = arg(&args, 0);
            let snapshot: Vec<Value> = recv.borrow().clone();
            let mut out = Vec::new();
            for (i, item) in snapshot.into_iter().enumerate() {
                interp.governor.tick_iteration()?;
                let keep = interp
                    .call_value(f.clone(), vec![item.clone(), Value::Number(i as f64)])?
                    .truthy();
                if keep {
                    out.push(item);
                }
            }
            interp.governor.debit_alloc(array_alloc_estimate(out.len()))?;
            Ok(Value::array(out))
        }),
        "forEach" => native("forEach", move |interp, args| {
            let f = arg(&args, 0);
            let snapshot: Vec<Value> = recv.borrow().clone();
            for (i, item) in snapshot.into_iter().enumerate() {
                interp.governor.tick_iteration()?;
                interp.call_value(f.clone(), vec![item, Value::Number(i as f64)])?;
            }
            Ok(Value::Undefined)
        }),
        "reduce" => native("reduce", move |interp, args| {
            let f = arg(&args, 0);
            let snapshot: Vec<Value> = recv.borrow().clone();
            let mut iter = snapshot.into_iter().enumerate();
            let mut acc = match args.get(1) {
                Some(init) => init.clone(),
                None => match iter.next() {
                    Some((_, first)) => first,
                    None => return Err(type_error("reduce of empty array with no initial value")),
                },
            };
            for (i, item) in iter {
                interp.governor.tick_iteration()?;
                acc = interp.call_value(
                    f.clone(),
                    vec![acc, item, Value::Number(i as f64)],
                )?;
            }
            Ok(acc)
        }),
        "some" => native("some", move |interp, args| {
            let f = arg(&args, 0);
            let snapshot: Vec<Value> = recv.borrow().clone();
            for (i, item) in snapshot.into_iter().enumerate() {
                interp.governor.tick_iteration()?;
                if interp
                    .call_value(f.clone(), vec![item, Value::Number(i as f64)])?
                    .truthy()
                {
                    return Ok(Value::Bool(true));
                }
            }
            Ok(Value::Bool(false))
        }),
        "every" => native("every", move |interp, args| {
            let f = arg(&args, 0);
            let snapshot: Vec<Value> = recv.borrow().clone();
            for (i, item) in snapshot.into_iter().enumerate() {
                interp.governor.tick_iteration()?;
                if !interp
                    .call_value(f.clone(), vec![item, Value::Number(i as f64)])?
                    .truthy()
                {
                    return Ok(Value::Bool(false));
                }
            }
            Ok(Value::Bool(true))
        }),
        "find" => native("find", move |interp, args| {
            let f = arg(&args, 0);
            let snapshot: Vec<Value> = recv.borrow().clone();
            for (i, item) in snapshot.into_iter().enumerate() {
                interp.governor.tick_iteration()?;
                if interp
                    .call_value(f.clone(), vec![item.clone(), Value::Number(i as f64)])?
                    .truthy()
                {
                    return Ok(item);
                }
            }
            Ok(Value::Undefined)
        }),
        "findIndex" => native("findIndex", move |interp, args| {
            let f = arg(&args, 0);
            let snapshot: Vec<Value> = recv.borrow().clone();
            for (i, item) in snapshot.into_iter().enumerate() {
                interp.governor.tick_iteration()?;
                if interp
                    .call_value(f.clone(), vec![item, Value::Number(i as f64)])?
                    .truthy()
                {
                    return Ok(Value::Number(i as f64));
                }
            }
            Ok(Value::Number(-1.0))
        }),
        "at" => native("at", move |_, args| {
            let items = recv.borrow();
            let len = items.len() as i64;
            let mut i = to_number(&arg(&args, 0)) as i64;
            if i < 0 {
                i += len;
            }
            Ok(match usize::try_from(i).ok().filter(|i| (*i as i64) < len) {
                Some(i) => items[i].clone(),
                None => Value::Undefined,
            })
        }),
        // Insertion sort rather than std's sort: a hostile comparator
        // returning inconsistent answers must not be able to trip the
        // standard library's total-order check. The comparator is sandboxed
        // code, so every invocation ticks the iteration counter.
        "sort" => native("sort", move |interp, args| {
            let comparator = args.first().cloned().filter(|f| f.is_callable());
            let mut items: Vec<Value> = recv.borrow().clone();
            for i in 1..items.len() {
                let mut j = i;
                while j > 0 {
                    let in_order = match &comparator {
                        Some(f) => {
                            interp.governor.tick_iteration()?;
                            let v = interp.call_value(
                                f.clone(),
                                vec![items[j - 1].clone(), items[j].clone()],
                            )?;
                            to_number(&v) <= 0.0
                        }
                        None => {
                            interp.governor.tick_iteration()?;
                            to_display_string(&items[j - 1]) <= to_display_string(&items[j])
                        }
                    };
                    if in_order {
                        break;
                    }
                    items.swap(j - 1, j);
                    j -= 1;
                }
            }
            *recv.borrow_mut() = items;
            Ok(Value::Array(recv.clone()))
        }),
        "keys" => native("keys", move |interp, _| {
            let len = recv.borrow().len();
            interp.governor.debit_alloc(array_alloc_estimate(len))?;
            Ok(Value::array(
                (0..len).map(|i| Value::Number(i as f64)).collect(),
            ))
        }),
        "toString" => native("toString", move |_, _| {
            Ok(Value::str(to_display_string(&Value::Array(recv.clone()))))
        }),
        _ => return None,
    })
}

/// Methods on number receivers.
pub fn number_member(n: f64, key: &str) -> Option<Value> {
    Some(match key {
        "toFixed" => native("toFixed", move |_, args| {
            let digits = to_number(&arg(&args, 0)) as usize;
            if digits > 100 {
                return Err(range_error("toFixed digits out of range"));
            }
            Ok(Value::str(format!("{:.*}", digits, n)))
        }),
        "toString" => native("toString", move |_, args| {
            let radix = match args.first() {
                Some(v) if !matches!(v, Value::Undefined) => to_number(v) as u32,
                _ => 10,
            };
            if radix == 10 {
                return Ok(Value::str(fmt_number(n)));
            }
            if !(2..=36).contains(&radix) {
                return Err(range_error("toString radix out of range"));
            }
            Ok(Value::str(format_radix(n, radix)))
        }),
        _ => return None,
    })
}

fn format_radix(n: f64, radix: u32) -> String {
    if n.is_nan() {
        return "NaN".to_string();
    }
    if !n.is_finite() {
        return if n > 0.0 { "Infinity" } else { "-Infinity" }.to_string();
    }
    let neg = n < 0.0;
    let mut int = n.abs().trunc() as u64;
    let mut digits = Vec::new();
    if int == 0 {
        digits.push('0');
    }
    while int > 0 {
        let d = (int % radix as u64) as u32;
        digits.push(std::char::from_digit(d, radix).unwrap_or('0'));
        int /= radix as u64;
    }
    if neg {
        digits.push('-');
    }
    digits.iter().rev().collect()
}

/// Build a sandbox regex object (PERMISSIVE/STANDARD only; SECURE rejects
/// regex literals statically). JS syntax is translated loosely — the
/// `regex` crate has no backtracking, so the ReDoS families the prescan
/// admits cannot blow up here either.
pub fn regex_object(pattern: &str, flags: &str) -> Result<Value, Control> {
    let mut builder = regex::RegexBuilder::new(pattern);
    builder.case_insensitive(flags.contains('i'));
    builder.multi_line(flags.contains('m'));
    builder.dot_matches_new_line(flags.contains('s'));
    let compiled = builder
        .build()
        .map_err(|e| throw_error("SyntaxError", format!("invalid regular expression: {}", e)))?;
    let compiled = Rc::new(compiled);

    let mut data = ObjectData::new();
    data.set("source", Value::str(pattern.to_string()));
    data.set("flags", Value::str(flags.to_string()));
    let re = compiled.clone();
    data.set(
        "test",
        native("test", move |_, args| {
            let text = to_display_string(&arg(&args, 0));
            Ok(Value::Bool(re.is_match(&text)))
        }),
    );
    let re = compiled;
    data.set(
        "exec",
        native("exec", move |_, args| {
            let text = to_display_string(&arg(&args, 0));
            Ok(match re.captures(&text) {
                Some(caps) => Value::array(
                    caps.iter()
                        .map(|m| match m {
                            Some(m) => Value::str(m.as_str().to_string()),
                            None => Value::Undefined,
                        })
                        .collect(),
                ),
                None => Value::Null,
            })
        }),
    );
    data.frozen = true;
    Ok(Value::object(data))
}
