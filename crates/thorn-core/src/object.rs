//! Value rendering and string/number conversion.

use crate::gc::{GcHeap, GcIdx};
use crate::string::StringInterner;
use crate::table::Table;
use crate::value::Value;
use std::collections::HashSet;
use std::fmt::Write;

/// Render a number the way scripts see it.
///
/// Whole values print without a fraction; everything else uses the shortest
/// form that reads back to the same single-precision value.
pub fn format_number(n: f32) -> String {
    if n.is_nan() {
        return "nan".to_string();
    }
    if n.is_infinite() {
        return if n > 0.0 { "inf" } else { "-inf" }.to_string();
    }
    if n.fract() == 0.0 && n.abs() < 1e15 {
        return format!("{}", n as i64);
    }
    format!("{n}")
}

/// Parse a number from script text: optional surrounding whitespace, decimal
/// digits with optional fraction and exponent.
pub fn str_to_number(bytes: &[u8]) -> Option<f32> {
    let s = std::str::from_utf8(bytes).ok()?.trim();
    if s.is_empty() {
        return None;
    }
    // Rust's float parser also accepts "inf" and "nan"; scripts do not.
    let first = s.trim_start_matches(['+', '-']).chars().next()?;
    if !(first.is_ascii_digit() || first == '.') {
        return None;
    }
    s.parse::<f64>().ok().map(|d| d as f32)
}

/// Display form used by `tostring`, `print` and concatenation of non-strings.
pub fn tostring(v: Value, strings: &StringInterner) -> String {
    match v {
        Value::Nil => "nil".to_string(),
        Value::Number(n) => format_number(n),
        Value::String(id) => strings.get_lossy(id).into_owned(),
        Value::Table(t) => format!("table: {:#010x}", t.index()),
        Value::Closure(c) => format!("function: {:#010x}", c.index()),
        Value::Native(n) => format!("function: builtin {:#010x}", n.index()),
    }
}

/// Pretty-print a value, descending into tables.
///
/// A table that is already being printed further up renders as `<cycle>`, so
/// self-referencing structures terminate.
pub fn dump_value(v: Value, gc: &GcHeap, strings: &StringInterner, single_line: bool) -> String {
    let mut out = String::new();
    let mut visiting = HashSet::new();
    dump_into(&mut out, v, gc, strings, single_line, 0, &mut visiting);
    out
}

fn dump_into(
    out: &mut String,
    v: Value,
    gc: &GcHeap,
    strings: &StringInterner,
    single_line: bool,
    depth: usize,
    visiting: &mut HashSet<GcIdx<Table>>,
) {
    match v {
        Value::String(id) => {
            write!(out, "\"{}\"", strings.get_lossy(id)).unwrap();
        }
        Value::Table(t) => {
            if !visiting.insert(t) {
                out.push_str("<cycle>");
                return;
            }
            let entries: Vec<(Value, Value)> = gc.get_table(t).iter().collect();
            if entries.is_empty() {
                out.push_str("{}");
            } else {
                out.push('{');
                let pad = "  ".repeat(depth + 1);
                for (i, (k, val)) in entries.into_iter().enumerate() {
                    if single_line {
                        out.push_str(if i == 0 { " " } else { ", " });
                    } else {
                        out.push('\n');
                        out.push_str(&pad);
                    }
                    match k {
                        Value::String(id) => out.push_str(&strings.get_lossy(id)),
                        other => {
                            out.push('[');
                            dump_into(out, other, gc, strings, single_line, depth + 1, visiting);
                            out.push(']');
                        }
                    }
                    out.push_str(" = ");
                    dump_into(out, val, gc, strings, single_line, depth + 1, visiting);
                    if !single_line {
                        out.push(',');
                    }
                }
                if single_line {
                    out.push_str(" }");
                } else {
                    out.push('\n');
                    out.push_str(&"  ".repeat(depth));
                    out.push('}');
                }
            }
            visiting.remove(&t);
        }
        other => out.push_str(&tostring(other, strings)),
    }
}
