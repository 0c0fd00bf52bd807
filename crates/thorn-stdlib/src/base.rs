//! Base functions: output, conversion, errors and traversal.

use crate::register_fn;
use thorn_core::gc::{GcHeap, GcIdx, NativeContext, NativeError, NativeResult};
use thorn_core::object::{str_to_number, tostring};
use thorn_core::string::StringInterner;
use thorn_core::table::Table;
use thorn_core::value::Value;

pub fn register(env: GcIdx<Table>, gc: &mut GcHeap, strings: &mut StringInterner) {
    register_fn(gc, env, strings, "print", native_print);
    register_fn(gc, env, strings, "write", native_write);
    register_fn(gc, env, strings, "tostring", native_tostring);
    register_fn(gc, env, strings, "tonumber", native_tonumber);
    register_fn(gc, env, strings, "type", native_type);
    register_fn(gc, env, strings, "error", native_error);
    register_fn(gc, env, strings, "assert", native_assert);
    register_fn(gc, env, strings, "next", native_next);
}

fn native_print(ctx: &mut NativeContext) -> NativeResult {
    let mut line = String::new();
    for (i, &v) in ctx.args.iter().enumerate() {
        if i > 0 {
            line.push('\t');
        }
        line.push_str(&tostring(v, ctx.strings));
    }
    line.push('\n');
    ctx.output.write(&line);
    Ok(vec![])
}

fn native_write(ctx: &mut NativeContext) -> NativeResult {
    let mut text = String::new();
    for n in 0..ctx.args.len() {
        let bytes = ctx.check_bytes(n, "write")?;
        text.push_str(&String::from_utf8_lossy(&bytes));
    }
    ctx.output.write(&text);
    Ok(vec![Value::truth()])
}

fn native_tostring(ctx: &mut NativeContext) -> NativeResult {
    let text = ctx.to_display(ctx.arg(0));
    Ok(vec![ctx.new_string(text.as_bytes())])
}

fn native_tonumber(ctx: &mut NativeContext) -> NativeResult {
    let v = ctx.arg(0);
    let base = ctx.opt_number(1, "tonumber", 10.0)?;
    if !(2.0..=36.0).contains(&base) || base.fract() != 0.0 {
        return Err(NativeError::Message(
            "bad argument #2 to 'tonumber' (base out of range)".to_string(),
        ));
    }
    let n = match v {
        Value::Number(n) if base == 10.0 => Some(n),
        Value::String(id) if base == 10.0 => str_to_number(ctx.strings.get_bytes(id)),
        Value::String(id) => parse_radix(ctx.strings.get_bytes(id), base as u32),
        _ => None,
    };
    Ok(vec![n.map(Value::Number).unwrap_or(Value::Nil)])
}

fn parse_radix(bytes: &[u8], radix: u32) -> Option<f32> {
    let s = std::str::from_utf8(bytes).ok()?.trim();
    let (neg, digits) = match s.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, s),
    };
    if digits.is_empty() {
        return None;
    }
    let mut n: f64 = 0.0;
    for c in digits.chars() {
        n = n * radix as f64 + c.to_digit(radix)? as f64;
    }
    Some(if neg { -n } else { n } as f32)
}

fn native_type(ctx: &mut NativeContext) -> NativeResult {
    if ctx.args.is_empty() {
        return Err(NativeError::Type(
            "bad argument #1 to 'type' (value expected)".to_string(),
        ));
    }
    let name = ctx.arg(0).type_name();
    Ok(vec![ctx.new_string(name.as_bytes())])
}

fn native_error(ctx: &mut NativeContext) -> NativeResult {
    let v = ctx.arg(0);
    let message = if v.is_nil() {
        "unknown error".to_string()
    } else {
        ctx.to_display(v)
    };
    Err(NativeError::Message(message))
}

fn native_assert(ctx: &mut NativeContext) -> NativeResult {
    if ctx.arg(0).is_falsy() {
        let message = match ctx.arg(1) {
            Value::Nil => "assertion failed!".to_string(),
            m => ctx.to_display(m),
        };
        return Err(NativeError::Message(message));
    }
    Ok(ctx.args.to_vec())
}

fn native_next(ctx: &mut NativeContext) -> NativeResult {
    let t = ctx.check_table(0, "next")?;
    match ctx.gc.get_table(t).next(ctx.arg(1)) {
        Ok(Some((k, v))) => Ok(vec![k, v]),
        Ok(None) => Ok(vec![Value::Nil]),
        Err(e) => Err(NativeError::Message(e.to_string())),
    }
}
