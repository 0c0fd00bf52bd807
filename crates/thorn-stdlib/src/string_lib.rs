//! String functions. Positions are 1-based; negative positions count from
//! the end of the string.

use crate::format::native_format;
use crate::register_fn;
use thorn_core::gc::{GcHeap, GcIdx, NativeContext, NativeError, NativeResult};
use thorn_core::string::StringInterner;
use thorn_core::table::Table;
use thorn_core::value::Value;

pub fn register(env: GcIdx<Table>, gc: &mut GcHeap, strings: &mut StringInterner) {
    register_fn(gc, env, strings, "strlen", native_strlen);
    register_fn(gc, env, strings, "strsub", native_strsub);
    register_fn(gc, env, strings, "strlower", native_strlower);
    register_fn(gc, env, strings, "strupper", native_strupper);
    register_fn(gc, env, strings, "strrep", native_strrep);
    register_fn(gc, env, strings, "strbyte", native_strbyte);
    register_fn(gc, env, strings, "strchar", native_strchar);
    register_fn(gc, env, strings, "strfind", native_strfind);
    register_fn(gc, env, strings, "format", native_format);
}

/// Resolve a possibly negative 1-based position against `len`.
fn position(i: f32, len: usize) -> i64 {
    let i = i as i64;
    if i < 0 {
        len as i64 + i + 1
    } else {
        i
    }
}

fn native_strlen(ctx: &mut NativeContext) -> NativeResult {
    let s = ctx.check_bytes(0, "strlen")?;
    Ok(vec![Value::Number(s.len() as f32)])
}

fn native_strsub(ctx: &mut NativeContext) -> NativeResult {
    let s = ctx.check_bytes(0, "strsub")?;
    let len = s.len();
    let start = position(ctx.opt_number(1, "strsub", 1.0)?, len).max(1);
    let end = position(ctx.opt_number(2, "strsub", -1.0)?, len).min(len as i64);
    let sub = if start <= end {
        &s[(start - 1) as usize..end as usize]
    } else {
        &[][..]
    };
    Ok(vec![ctx.new_string(sub)])
}

fn native_strlower(ctx: &mut NativeContext) -> NativeResult {
    let s = ctx.check_bytes(0, "strlower")?;
    Ok(vec![ctx.new_string(&s.to_ascii_lowercase())])
}

fn native_strupper(ctx: &mut NativeContext) -> NativeResult {
    let s = ctx.check_bytes(0, "strupper")?;
    Ok(vec![ctx.new_string(&s.to_ascii_uppercase())])
}

fn native_strrep(ctx: &mut NativeContext) -> NativeResult {
    let s = ctx.check_bytes(0, "strrep")?;
    let n = ctx.check_number(1, "strrep")?;
    let n = if n > 0.0 { n as usize } else { 0 };
    if s.len().saturating_mul(n) > u32::MAX as usize {
        return Err(NativeError::Message("resulting string too large".to_string()));
    }
    Ok(vec![ctx.new_string(&s.repeat(n))])
}

fn native_strbyte(ctx: &mut NativeContext) -> NativeResult {
    let s = ctx.check_bytes(0, "strbyte")?;
    let i = position(ctx.opt_number(1, "strbyte", 1.0)?, s.len());
    if i < 1 || i as usize > s.len() {
        return Ok(vec![Value::Nil]);
    }
    Ok(vec![Value::Number(s[(i - 1) as usize] as f32)])
}

fn native_strchar(ctx: &mut NativeContext) -> NativeResult {
    let mut bytes = Vec::with_capacity(ctx.args.len());
    for n in 0..ctx.args.len() {
        let c = ctx.check_number(n, "strchar")?;
        if !(0.0..=255.0).contains(&c) {
            return Err(NativeError::Message(format!(
                "bad argument #{} to 'strchar' (invalid value)",
                n + 1
            )));
        }
        bytes.push(c as u8);
    }
    Ok(vec![ctx.new_string(&bytes)])
}

/// `strfind(s, pattern [, init])`: plain substring search.
fn native_strfind(ctx: &mut NativeContext) -> NativeResult {
    let s = ctx.check_bytes(0, "strfind")?;
    let pat = ctx.check_bytes(1, "strfind")?;
    let init = position(ctx.opt_number(2, "strfind", 1.0)?, s.len()).max(1) as usize;
    if init > s.len() + 1 {
        return Ok(vec![Value::Nil]);
    }
    match find_plain(&s, &pat, init - 1) {
        Some(pos) => Ok(vec![
            Value::Number((pos + 1) as f32),
            Value::Number((pos + pat.len()) as f32),
        ]),
        None => Ok(vec![Value::Nil]),
    }
}

fn find_plain(subject: &[u8], pat: &[u8], start: usize) -> Option<usize> {
    if pat.is_empty() {
        return Some(start);
    }
    subject
        .get(start..)?
        .windows(pat.len())
        .position(|w| w == pat)
        .map(|p| p + start)
}
