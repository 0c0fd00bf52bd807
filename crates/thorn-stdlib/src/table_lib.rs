//! Sequence helpers over tables.
//!
//! `foreach`, `foreachi` and `sort` call back into script closures, so the
//! functions registered here only mark their slots; the engine recognizes
//! the returned indices and runs them itself.

use crate::{register_fn, vm_dispatched, StdlibIndices};
use thorn_core::gc::{GcHeap, GcIdx, NativeContext, NativeError, NativeResult};
use thorn_core::string::StringInterner;
use thorn_core::table::Table;
use thorn_core::value::Value;

pub fn register(
    env: GcIdx<Table>,
    gc: &mut GcHeap,
    strings: &mut StringInterner,
) -> StdlibIndices {
    register_fn(gc, env, strings, "getn", native_getn);
    register_fn(gc, env, strings, "tinsert", native_tinsert);
    register_fn(gc, env, strings, "tremove", native_tremove);
    StdlibIndices {
        sort_idx: register_fn(gc, env, strings, "sort", |_| vm_dispatched("sort")),
        foreach_idx: register_fn(gc, env, strings, "foreach", |_| vm_dispatched("foreach")),
        foreachi_idx: register_fn(gc, env, strings, "foreachi", |_| vm_dispatched("foreachi")),
    }
}

/// Size of a sequence: field `n` when it holds a number, else the length of
/// the contiguous prefix.
pub fn getn(gc: &GcHeap, strings: &StringInterner, t: GcIdx<Table>) -> usize {
    let table = gc.get_table(t);
    let n = strings
        .find(b"n")
        .map(|id| table.get_str(id))
        .and_then(Value::as_number);
    match n {
        Some(n) if n >= 0.0 => n as usize,
        _ => table.length(),
    }
}

/// Bump field `n` by `delta` if the table carries one.
fn adjust_n(ctx: &mut NativeContext, t: GcIdx<Table>, delta: f32) {
    let Some(id) = ctx.strings.find(b"n") else {
        return;
    };
    let table = ctx.gc.get_table_mut(t);
    if let Value::Number(n) = table.get_str(id) {
        table.set_str(id, Value::Number(n + delta));
    }
}

fn native_getn(ctx: &mut NativeContext) -> NativeResult {
    let t = ctx.check_table(0, "getn")?;
    Ok(vec![Value::Number(getn(ctx.gc, ctx.strings, t) as f32)])
}

/// `tinsert(t, v)` appends; `tinsert(t, pos, v)` shifts `pos..n` up.
fn native_tinsert(ctx: &mut NativeContext) -> NativeResult {
    let t = ctx.check_table(0, "tinsert")?;
    let n = getn(ctx.gc, ctx.strings, t);
    let (pos, value) = match ctx.args.len() {
        0 | 1 => {
            return Err(NativeError::Message(
                "wrong number of arguments to 'tinsert'".to_string(),
            ))
        }
        2 => (n + 1, ctx.arg(1)),
        _ => {
            let pos = ctx.check_number(1, "tinsert")?;
            if pos < 1.0 {
                return Err(NativeError::Message(
                    "bad argument #2 to 'tinsert' (position out of bounds)".to_string(),
                ));
            }
            (pos as usize, ctx.arg(2))
        }
    };
    ctx.gc.get_table_mut(t).insert_seq(pos, value);
    adjust_n(ctx, t, 1.0);
    Ok(vec![])
}

/// `tremove(t [, pos])`: removes and returns element `pos` (default last).
fn native_tremove(ctx: &mut NativeContext) -> NativeResult {
    let t = ctx.check_table(0, "tremove")?;
    let n = getn(ctx.gc, ctx.strings, t);
    if n == 0 {
        return Ok(vec![Value::Nil]);
    }
    let pos = ctx.opt_number(1, "tremove", n as f32)?;
    if pos < 1.0 || pos as usize > n {
        return Ok(vec![Value::Nil]);
    }
    let removed = ctx.gc.get_table_mut(t).remove_seq(pos as usize);
    adjust_n(ctx, t, -1.0);
    Ok(vec![removed])
}
