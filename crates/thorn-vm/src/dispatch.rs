//! Main bytecode dispatch loop.
//!
//! Every frame's locals and temporaries live on one value stack. The top of
//! the stack is `vm.stack.len()`. A `CALL` with `MULT_RET` leaves an open
//! result list and records where it starts in `CallInfo::open_results`; the
//! instruction right after it (`CALL`, `TAILCALL` or `SETLIST`) counts those
//! values in place of its last operand.

use crate::arith::{self, ArithOp};
use crate::callinfo::CallInfo;
use crate::compare::{self, CompareOp};
use crate::error::{Limit, Location, VmError};
use crate::vm::Runtime;
use std::rc::Rc;
use thorn_bytecode::disasm::jump_target;
use thorn_bytecode::opcode::{decode, Instruction, OpCode, CODE_START, LFIELDS_PER_FLUSH, MULT_RET};
use thorn_core::gc::{bad_argument, GcIdx, NativeContext, NativeFunction};
use thorn_core::table::Table;
use thorn_core::value::Value;
use thorn_stdlib::table_lib::getn;

/// Values the stack may hold before the invocation fails.
pub const STACK_LIMIT: usize = 1 << 20;
/// Upper bound on the table pre-allocation `CREATEARRAY` may request.
const MAX_ARRAY_HINT: usize = 1 << 12;

/// Helper macro to get the current proto without borrowing all of vm.
macro_rules! proto {
    ($vm:expr, $ci_idx:expr) => {
        &$vm.protos[$vm.call_stack[$ci_idx].proto_idx].proto
    };
}

// ---- errors ----

/// Source, line and opcode of the innermost running frame.
pub(crate) fn location(vm: &Runtime, op: Option<OpCode>) -> Location {
    match vm.call_stack.last() {
        Some(ci) => Location {
            source: vm.protos[ci.proto_idx].proto.source.clone(),
            line: ci.line,
            op: op.map(OpCode::name),
        },
        None => Location {
            op: op.map(OpCode::name),
            ..Location::default()
        },
    }
}

fn type_error(vm: &Runtime, op: Option<OpCode>, message: impl Into<String>) -> VmError {
    VmError::Type {
        message: message.into(),
        location: location(vm, op),
    }
}

fn runtime_error(vm: &Runtime, op: Option<OpCode>, message: impl Into<String>) -> VmError {
    VmError::Runtime {
        message: message.into(),
        location: location(vm, op),
    }
}

fn bytecode_error(vm: &Runtime, op: Option<OpCode>, message: impl Into<String>) -> VmError {
    VmError::Bytecode {
        message: message.into(),
        location: location(vm, op),
    }
}

// ---- stack helpers ----

#[inline]
fn pop(vm: &mut Runtime, base: usize, op: OpCode) -> Result<Value, VmError> {
    if vm.stack.len() <= base {
        return Err(bytecode_error(vm, Some(op), "stack underflow"));
    }
    Ok(vm.stack.pop().unwrap_or_default())
}

/// Remove the top `n` values, which must all belong to the current frame.
fn pop_n(vm: &mut Runtime, base: usize, n: usize, op: OpCode) -> Result<Vec<Value>, VmError> {
    match vm.stack.len().checked_sub(n) {
        Some(start) if start >= base => Ok(vm.stack.split_off(start)),
        _ => Err(bytecode_error(vm, Some(op), "stack underflow")),
    }
}

/// Operand count, widened by an open result list left by the previous call.
fn adjusted_count(vm: &Runtime, n: usize, open: Option<usize>) -> usize {
    match open {
        Some(start) if n > 0 => n - 1 + vm.stack.len().saturating_sub(start),
        _ => n,
    }
}

/// Slot of the function value below `nargs` arguments.
fn callee_slot(vm: &Runtime, base: usize, nargs: usize, op: OpCode) -> Result<usize, VmError> {
    match vm.stack.len().checked_sub(nargs + 1) {
        Some(idx) if idx >= base => Ok(idx),
        _ => Err(bytecode_error(vm, Some(op), "stack underflow")),
    }
}

fn constant(vm: &Runtime, ci_idx: usize, k: u32, op: OpCode) -> Result<Value, VmError> {
    let loaded = &vm.protos[vm.call_stack[ci_idx].proto_idx];
    loaded
        .constants
        .get(k as usize)
        .copied()
        .ok_or_else(|| bytecode_error(vm, Some(op), format!("constant {k} out of range")))
}

/// Prototype index behind constant `k`, if it is a nested function.
fn nested_proto(vm: &Runtime, ci_idx: usize, k: u32, op: OpCode) -> Result<usize, VmError> {
    let loaded = &vm.protos[vm.call_stack[ci_idx].proto_idx];
    loaded
        .nested
        .get(k as usize)
        .copied()
        .flatten()
        .ok_or_else(|| bytecode_error(vm, Some(op), format!("constant {k} is not a function")))
}

fn take_jump(vm: &mut Runtime, ci_idx: usize, inst: &Instruction) -> Result<(), VmError> {
    let code_len = proto!(vm, ci_idx).code.len();
    match jump_target(inst) {
        Some(to) if (CODE_START..=code_len).contains(&to) => {
            vm.call_stack[ci_idx].pc = to;
            Ok(())
        }
        _ => Err(bytecode_error(vm, Some(inst.op), "jump out of range")),
    }
}

// ---- tables ----

fn index(vm: &Runtime, t: Value, key: Value, op: OpCode) -> Result<Value, VmError> {
    match t {
        Value::Table(idx) => Ok(vm.gc.get_table(idx).get(key)),
        other => Err(type_error(
            vm,
            Some(op),
            format!("attempt to index a {} value", other.type_name()),
        )),
    }
}

fn set_index(vm: &mut Runtime, t: Value, key: Value, value: Value, op: OpCode) -> Result<(), VmError> {
    match t {
        Value::Table(idx) => vm
            .gc
            .get_table_mut(idx)
            .set(key, value)
            .map_err(|e| runtime_error(vm, Some(op), e.to_string())),
        other => Err(type_error(
            vm,
            Some(op),
            format!("attempt to index a {} value", other.type_name()),
        )),
    }
}

fn table_below(vm: &Runtime, base: usize, op: OpCode) -> Result<GcIdx<Table>, VmError> {
    match vm.stack.last() {
        Some(Value::Table(t)) if vm.stack.len() > base => Ok(*t),
        _ => Err(bytecode_error(vm, Some(op), "constructor target is not a table")),
    }
}

// ---- calls ----

/// Push a frame for the closure at `func_idx` with `nargs` arguments above it.
pub(crate) fn enter_closure(
    vm: &mut Runtime,
    func_idx: usize,
    nargs: usize,
    num_results: Option<usize>,
) -> Result<(), VmError> {
    let Some(closure) = vm.stack[func_idx].as_closure() else {
        return Err(type_error(vm, None, "attempt to call a non-function value"));
    };
    let max_depth = vm.config.max_call_depth;
    if vm.call_stack.len() >= max_depth {
        tracing::warn!(max_depth, "call depth limit exceeded");
        return Err(VmError::LimitsExceeded(Limit::CallDepth(max_depth)));
    }
    vm.governor.check_budget()?;

    let proto_idx = vm.gc.get_closure(closure).proto_idx;
    let proto = &vm.protos[proto_idx].proto;
    let nparams = proto.num_params();
    let vararg = proto.is_vararg();
    let line = proto.line_defined.max(0) as u32;

    let base = func_idx + 1;
    let extra: Vec<Value> = if nargs > nparams {
        vm.stack.drain(base + nparams..).collect()
    } else {
        Vec::new()
    };
    vm.stack.resize(base + nparams, Value::Nil);
    if vararg {
        let arg = vm.gc.alloc_table(extra.len(), 1);
        for (i, v) in extra.iter().enumerate() {
            vm.gc.get_table_mut(arg).set_int(i + 1, *v);
        }
        vm.gc
            .set_field(&mut vm.strings, arg, "n", Value::Number(extra.len() as f32));
        vm.stack.push(Value::Table(arg));
    }

    let mut ci = CallInfo::new(closure, proto_idx, func_idx, num_results);
    ci.line = line;
    vm.call_stack.push(ci);
    tracing::trace!(depth = vm.call_stack.len(), proto_idx, nargs, "frame push");
    Ok(())
}

/// Put `results` where the caller expects them.
fn place_results(vm: &mut Runtime, mut results: Vec<Value>, num_results: Option<usize>) {
    match num_results {
        Some(n) => {
            results.resize(n, Value::Nil);
            vm.stack.extend(results);
        }
        None => {
            let start = vm.stack.len();
            vm.stack.extend(results);
            if let Some(caller) = vm.call_stack.last_mut() {
                caller.open_results = Some(start);
            }
        }
    }
}

/// Pop the current frame. Returns the results when it was the entry frame
/// of this `execute_from`; otherwise hands them to the caller frame.
fn return_from_call(vm: &mut Runtime, entry_depth: usize, results: Vec<Value>) -> Option<Vec<Value>> {
    let ci = vm.call_stack.pop()?;
    vm.stack.truncate(ci.func_idx);
    tracing::trace!(depth = vm.call_stack.len(), nresults = results.len(), "frame pop");
    if vm.call_stack.len() < entry_depth {
        return Some(results);
    }
    place_results(vm, results, ci.num_results);
    None
}

/// Call the value at `func_idx`. Closures get a new frame that the loop
/// picks up; natives run to completion here.
fn call_value(
    vm: &mut Runtime,
    func_idx: usize,
    num_results: Option<usize>,
    op: OpCode,
) -> Result<(), VmError> {
    match vm.stack[func_idx] {
        Value::Closure(_) => {
            let nargs = vm.stack.len() - func_idx - 1;
            enter_closure(vm, func_idx, nargs, num_results)
        }
        Value::Native(idx) => {
            let args = vm.stack.split_off(func_idx + 1);
            vm.stack.truncate(func_idx);
            let results = call_native(vm, idx, &args, Some(op))?;
            place_results(vm, results, num_results);
            Ok(())
        }
        other => Err(type_error(
            vm,
            Some(op),
            format!("attempt to call a {} value", other.type_name()),
        )),
    }
}

/// Run a native. `sort`, `foreach` and `foreachi` are handled here because
/// they call back into script code.
pub(crate) fn call_native(
    vm: &mut Runtime,
    idx: GcIdx<NativeFunction>,
    args: &[Value],
    op: Option<OpCode>,
) -> Result<Vec<Value>, VmError> {
    vm.governor.check_budget()?;
    if Some(idx) == vm.sort_idx {
        return do_sort(vm, args, op);
    }
    if Some(idx) == vm.foreach_idx {
        return do_foreach(vm, args, op);
    }
    if Some(idx) == vm.foreachi_idx {
        return do_foreachi(vm, args, op);
    }
    let func = Rc::clone(&vm.gc.get_native(idx).func);
    let mut ctx = NativeContext {
        args,
        gc: &mut vm.gc,
        strings: &mut vm.strings,
        output: &mut vm.output,
    };
    func(&mut ctx).map_err(|e| VmError::from_native(e, location(vm, op)))
}

/// Call any function value and run it to completion. Used by hosts and by
/// natives that call back into scripts. On failure the stacks are restored
/// to where they were.
///
/// Nesting of these entries is capped at `max_call_depth`, independently of
/// the frame stack.
pub fn call_function(vm: &mut Runtime, func: Value, args: &[Value]) -> Result<Vec<Value>, VmError> {
    let max_depth = vm.config.max_call_depth;
    if vm.reentry_depth >= max_depth {
        tracing::warn!(max_depth, "native re-entry depth limit exceeded");
        return Err(VmError::LimitsExceeded(Limit::CallDepth(max_depth)));
    }
    vm.reentry_depth += 1;
    let result = call_function_inner(vm, func, args);
    vm.reentry_depth -= 1;
    result
}

fn call_function_inner(vm: &mut Runtime, func: Value, args: &[Value]) -> Result<Vec<Value>, VmError> {
    let saved_depth = vm.call_stack.len();
    let saved_top = vm.stack.len();
    let result = match func {
        Value::Closure(_) => {
            vm.stack.push(func);
            vm.stack.extend_from_slice(args);
            enter_closure(vm, saved_top, args.len(), None)
                .and_then(|()| execute_from(vm, saved_depth + 1))
        }
        Value::Native(idx) => call_native(vm, idx, args, None),
        other => Err(type_error(
            vm,
            None,
            format!("attempt to call a {} value", other.type_name()),
        )),
    };
    if result.is_err() {
        vm.call_stack.truncate(saved_depth);
        vm.stack.truncate(saved_top);
    }
    result
}

fn check_table_arg(vm: &Runtime, args: &[Value], fname: &str, op: Option<OpCode>) -> Result<GcIdx<Table>, VmError> {
    let v = args.first().copied().unwrap_or_default();
    v.as_table()
        .ok_or_else(|| VmError::from_native(bad_argument(0, fname, "table", v), location(vm, op)))
}

fn check_function_arg(vm: &Runtime, args: &[Value], n: usize, fname: &str, op: Option<OpCode>) -> Result<Value, VmError> {
    let v = args.get(n).copied().unwrap_or_default();
    if v.is_function() {
        Ok(v)
    } else {
        Err(VmError::from_native(bad_argument(n, fname, "function", v), location(vm, op)))
    }
}

/// `foreach(t, f)`: calls `f(k, v)` per entry; stops at the first non-nil result.
fn do_foreach(vm: &mut Runtime, args: &[Value], op: Option<OpCode>) -> Result<Vec<Value>, VmError> {
    let t = check_table_arg(vm, args, "foreach", op)?;
    let f = check_function_arg(vm, args, 1, "foreach", op)?;
    let mut key = Value::Nil;
    loop {
        let entry = vm
            .gc
            .get_table(t)
            .next(key)
            .map_err(|e| runtime_error(vm, op, e.to_string()))?;
        let Some((k, v)) = entry else {
            return Ok(vec![]);
        };
        let r = call_function(vm, f, &[k, v])?;
        if let Some(&first) = r.first().filter(|v| !v.is_nil()) {
            return Ok(vec![first]);
        }
        key = k;
    }
}

/// `foreachi(t, f)`: calls `f(i, t[i])` for `i = 1..getn(t)`.
fn do_foreachi(vm: &mut Runtime, args: &[Value], op: Option<OpCode>) -> Result<Vec<Value>, VmError> {
    let t = check_table_arg(vm, args, "foreachi", op)?;
    let f = check_function_arg(vm, args, 1, "foreachi", op)?;
    let n = getn(&vm.gc, &vm.strings, t);
    for i in 1..=n {
        let v = vm.gc.get_table(t).get_int(i);
        let r = call_function(vm, f, &[Value::Number(i as f32), v])?;
        if let Some(&first) = r.first().filter(|v| !v.is_nil()) {
            return Ok(vec![first]);
        }
    }
    Ok(vec![])
}

/// `sort(t [, comp])`: in-place insertion sort of `t[1..getn(t)]`.
///
/// A script-supplied `n` may not exceed the number of slots the table
/// actually holds. Every element read and every builtin comparison is
/// charged to the instruction budget.
fn do_sort(vm: &mut Runtime, args: &[Value], op: Option<OpCode>) -> Result<Vec<Value>, VmError> {
    let t = check_table_arg(vm, args, "sort", op)?;
    let comp = match args.get(1).copied().unwrap_or_default() {
        Value::Nil => None,
        _ => Some(check_function_arg(vm, args, 1, "sort", op)?),
    };
    let n = getn(&vm.gc, &vm.strings, t);
    let slots = {
        let table = vm.gc.get_table(t);
        table.array_len() + table.map_len()
    };
    if n > slots {
        return Err(runtime_error(
            vm,
            op,
            format!("invalid size {n} for 'sort' (table holds {slots} entries)"),
        ));
    }
    vm.governor.charge(n as u64)?;
    let mut items: Vec<Value> = Vec::new();
    items
        .try_reserve_exact(n)
        .map_err(|e| runtime_error(vm, op, format!("not enough memory for 'sort': {e}")))?;
    {
        let table = vm.gc.get_table(t);
        items.extend((1..=n).map(|i| table.get_int(i)));
    }
    for i in 1..items.len() {
        let mut j = i;
        while j > 0 && sort_less(vm, comp, items[j], items[j - 1], op)? {
            items.swap(j, j - 1);
            j -= 1;
        }
    }
    let table = vm.gc.get_table_mut(t);
    for (i, v) in items.into_iter().enumerate() {
        table.set_int(i + 1, v);
    }
    Ok(vec![])
}

fn sort_less(vm: &mut Runtime, comp: Option<Value>, a: Value, b: Value, op: Option<OpCode>) -> Result<bool, VmError> {
    match comp {
        Some(f) => {
            let r = call_function(vm, f, &[a, b])?;
            Ok(r.first().is_some_and(|v| v.is_truthy()))
        }
        None => {
            vm.governor.check_budget()?;
            compare::less_than(a, b, &vm.strings).map_err(|m| type_error(vm, op, m))
        }
    }
}

// ---- the loop ----

/// Execute until the call stack drops below `entry_depth`, returning the
/// results of the frame that was at that depth.
pub fn execute_from(vm: &mut Runtime, entry_depth: usize) -> Result<Vec<Value>, VmError> {
    loop {
        let Some(ci_idx) = vm.call_stack.len().checked_sub(1) else {
            return Ok(vec![]);
        };
        let (base, pc, open) = {
            let ci = &mut vm.call_stack[ci_idx];
            (ci.base, ci.pc, ci.open_results.take())
        };

        if pc >= proto!(vm, ci_idx).code.len() {
            // Ran off the end of the code: return nothing.
            if let Some(results) = return_from_call(vm, entry_depth, vec![]) {
                return Ok(results);
            }
            continue;
        }

        vm.governor.check_budget()?;
        let inst = decode(&proto!(vm, ci_idx).code, pc)
            .map_err(|e| bytecode_error(vm, None, e.to_string()))?;
        vm.call_stack[ci_idx].pc = inst.next_pc;
        if vm.stack.len() > STACK_LIMIT {
            return Err(runtime_error(vm, Some(inst.op), "stack overflow"));
        }
        let op = inst.op;
        let a = inst.a;

        match op {
            OpCode::EndCode => {
                if let Some(results) = return_from_call(vm, entry_depth, vec![]) {
                    return Ok(results);
                }
            }

            OpCode::RetCode => {
                let start = base + a as usize;
                if start > vm.stack.len() {
                    return Err(bytecode_error(vm, Some(op), "return base above stack top"));
                }
                let results = vm.stack.split_off(start);
                if let Some(results) = return_from_call(vm, entry_depth, results) {
                    return Ok(results);
                }
            }

            OpCode::Call => {
                let num_results = if a == MULT_RET as u32 {
                    None
                } else {
                    Some(a as usize)
                };
                let nargs = adjusted_count(vm, inst.b as usize, open);
                let func_idx = callee_slot(vm, base, nargs, op)?;
                call_value(vm, func_idx, num_results, op)?;
            }

            OpCode::TailCall => {
                let nargs = adjusted_count(vm, inst.b as usize, open);
                let func_idx = callee_slot(vm, base, nargs, op)?;
                let (frame_func, num_results) = {
                    let ci = &vm.call_stack[ci_idx];
                    (ci.func_idx, ci.num_results)
                };
                match vm.stack[func_idx] {
                    Value::Closure(_) => {
                        // Reuse this frame: slide callee and arguments down.
                        let moved = vm.stack.split_off(func_idx);
                        vm.stack.truncate(frame_func);
                        vm.stack.extend(moved);
                        vm.call_stack.pop();
                        tracing::trace!(depth = vm.call_stack.len(), "tail call");
                        enter_closure(vm, frame_func, nargs, num_results)?;
                    }
                    Value::Native(idx) => {
                        let args = vm.stack.split_off(func_idx + 1);
                        vm.stack.truncate(func_idx);
                        let results = call_native(vm, idx, &args, Some(op))?;
                        if let Some(results) = return_from_call(vm, entry_depth, results) {
                            return Ok(results);
                        }
                    }
                    other => {
                        return Err(type_error(
                            vm,
                            Some(op),
                            format!("attempt to call a {} value", other.type_name()),
                        ));
                    }
                }
            }

            OpCode::PushNil => {
                let count = a as usize + 1;
                if count > STACK_LIMIT - vm.stack.len().min(STACK_LIMIT) {
                    return Err(runtime_error(vm, Some(op), "stack overflow"));
                }
                let top = vm.stack.len();
                vm.stack.resize(top + count, Value::Nil);
            }

            OpCode::Pop => {
                pop_n(vm, base, a as usize, op)?;
            }

            OpCode::PushNumber => vm.stack.push(Value::Number(a as f32)),
            OpCode::PushNumberNeg => vm.stack.push(Value::Number(-(a as f32))),

            OpCode::PushConstant => {
                let v = match vm.protos[vm.call_stack[ci_idx].proto_idx]
                    .nested
                    .get(a as usize)
                    .copied()
                    .flatten()
                {
                    Some(proto_idx) => Value::Closure(vm.gc.alloc_closure(proto_idx, Vec::new())),
                    None => constant(vm, ci_idx, a, op)?,
                };
                vm.stack.push(v);
            }

            OpCode::PushUpvalue => {
                let closure = vm.call_stack[ci_idx].closure;
                let cell = vm.gc.get_closure(closure).upvalues.get(a as usize).copied();
                let Some(cell) = cell else {
                    return Err(bytecode_error(vm, Some(op), format!("upvalue {a} out of range")));
                };
                let v = vm.gc.get_upval(cell);
                vm.stack.push(v);
            }

            OpCode::PushLocal => {
                let slot = base + a as usize;
                let Some(&v) = vm.stack.get(slot) else {
                    return Err(bytecode_error(vm, Some(op), format!("local {a} out of range")));
                };
                vm.stack.push(v);
            }

            OpCode::GetGlobal => {
                let key = constant(vm, ci_idx, a, op)?;
                let v = vm.gc.get_table(vm.active_env).get(key);
                vm.stack.push(v);
            }

            OpCode::GetTable => {
                let key = pop(vm, base, op)?;
                let t = pop(vm, base, op)?;
                let v = index(vm, t, key, op)?;
                vm.stack.push(v);
            }

            OpCode::GetDotted => {
                let key = constant(vm, ci_idx, a, op)?;
                let t = pop(vm, base, op)?;
                let v = index(vm, t, key, op)?;
                vm.stack.push(v);
            }

            OpCode::PushSelf => {
                let key = constant(vm, ci_idx, a, op)?;
                let t = pop(vm, base, op)?;
                let method = index(vm, t, key, op)?;
                vm.stack.push(method);
                vm.stack.push(t);
            }

            OpCode::CreateArray => {
                let t = vm.gc.alloc_table((a as usize).min(MAX_ARRAY_HINT), 0);
                vm.stack.push(Value::Table(t));
            }

            OpCode::SetLocal => {
                let v = pop(vm, base, op)?;
                let slot = base + a as usize;
                match vm.stack.get_mut(slot) {
                    Some(s) => *s = v,
                    None => {
                        return Err(bytecode_error(vm, Some(op), format!("local {a} out of range")));
                    }
                }
            }

            OpCode::SetGlobal => {
                let key = constant(vm, ci_idx, a, op)?;
                let v = pop(vm, base, op)?;
                let env = Value::Table(vm.active_env);
                set_index(vm, env, key, v, op)?;
            }

            OpCode::SetTablePop => {
                let v = pop(vm, base, op)?;
                let key = pop(vm, base, op)?;
                let t = pop(vm, base, op)?;
                set_index(vm, t, key, v, op)?;
            }

            OpCode::SetTable => {
                let len = vm.stack.len();
                let Some(t_slot) = len.checked_sub(3 + a as usize).filter(|&s| s >= base) else {
                    return Err(bytecode_error(vm, Some(op), "stack underflow"));
                };
                let t = vm.stack[t_slot];
                let key = vm.stack[t_slot + 1];
                let v = pop(vm, base, op)?;
                set_index(vm, t, key, v, op)?;
            }

            OpCode::SetList => {
                let count = adjusted_count(vm, inst.b as usize, open);
                let values = pop_n(vm, base, count, op)?;
                let t = table_below(vm, base, op)?;
                let offset = a as usize * LFIELDS_PER_FLUSH as usize;
                let table = vm.gc.get_table_mut(t);
                for (i, v) in values.into_iter().enumerate() {
                    table.set_int(offset + i + 1, v);
                }
            }

            OpCode::SetMap => {
                let pairs = a as usize + 1;
                let values = pop_n(vm, base, pairs * 2, op)?;
                let t = table_below(vm, base, op)?;
                for kv in values.chunks_exact(2) {
                    set_index(vm, Value::Table(t), kv[0], kv[1], op)?;
                }
            }

            OpCode::EqOp | OpCode::NeqOp => {
                let b = pop(vm, base, op)?;
                let x = pop(vm, base, op)?;
                let eq = x == b;
                vm.stack.push(Value::from_bool(if op == OpCode::EqOp { eq } else { !eq }));
            }

            OpCode::LtOp | OpCode::LeOp | OpCode::GtOp | OpCode::GeOp => {
                let cmp = match op {
                    OpCode::LtOp => CompareOp::Lt,
                    OpCode::LeOp => CompareOp::Le,
                    OpCode::GtOp => CompareOp::Gt,
                    _ => CompareOp::Ge,
                };
                let b = pop(vm, base, op)?;
                let x = pop(vm, base, op)?;
                let r = compare::compare(cmp, x, b, &vm.strings)
                    .map_err(|m| type_error(vm, Some(op), m))?;
                vm.stack.push(Value::from_bool(r));
            }

            OpCode::AddOp | OpCode::SubOp | OpCode::MultOp | OpCode::DivOp | OpCode::PowOp => {
                let arith_op = match op {
                    OpCode::AddOp => ArithOp::Add,
                    OpCode::SubOp => ArithOp::Sub,
                    OpCode::MultOp => ArithOp::Mul,
                    OpCode::DivOp => ArithOp::Div,
                    _ => ArithOp::Pow,
                };
                let b = pop(vm, base, op)?;
                let x = pop(vm, base, op)?;
                let r = arith::arith_op(arith_op, x, b, &vm.strings)
                    .map_err(|m| type_error(vm, Some(op), m))?;
                vm.stack.push(r);
            }

            OpCode::ConcOp => {
                let b = pop(vm, base, op)?;
                let x = pop(vm, base, op)?;
                let r = arith::concat(x, b, &mut vm.strings)
                    .map_err(|m| type_error(vm, Some(op), m))?;
                vm.stack.push(r);
            }

            OpCode::MinusOp => {
                let x = pop(vm, base, op)?;
                let r = arith::negate(x, &vm.strings).map_err(|m| type_error(vm, Some(op), m))?;
                vm.stack.push(r);
            }

            OpCode::NotOp => {
                let x = pop(vm, base, op)?;
                vm.stack.push(Value::from_bool(x.is_nil()));
            }

            OpCode::OnTJmp | OpCode::OnFJmp => {
                let top = match vm.stack.last() {
                    Some(v) if vm.stack.len() > base => *v,
                    _ => return Err(bytecode_error(vm, Some(op), "stack underflow")),
                };
                if top.is_truthy() == (op == OpCode::OnTJmp) {
                    take_jump(vm, ci_idx, &inst)?;
                } else {
                    vm.stack.pop();
                }
            }

            OpCode::Jmp => take_jump(vm, ci_idx, &inst)?,

            OpCode::IfFJmp | OpCode::IfFUpJmp => {
                if pop(vm, base, op)?.is_nil() {
                    take_jump(vm, ci_idx, &inst)?;
                }
            }

            OpCode::IfTUpJmp => {
                if pop(vm, base, op)?.is_truthy() {
                    take_jump(vm, ci_idx, &inst)?;
                }
            }

            OpCode::Closure => {
                let proto_idx = nested_proto(vm, ci_idx, a, op)?;
                let values = pop_n(vm, base, inst.b as usize, op)?;
                let cells = values.into_iter().map(|v| vm.gc.alloc_upval(v)).collect();
                let closure = vm.gc.alloc_closure(proto_idx, cells);
                vm.stack.push(Value::Closure(closure));
            }

            OpCode::SetLine => vm.call_stack[ci_idx].line = a,

            OpCode::CheckStack => {
                let depth = vm.stack.len() - base;
                if depth != a as usize {
                    tracing::warn!(
                        expected = a,
                        actual = depth,
                        source = %proto!(vm, ci_idx).source,
                        pc,
                        "stack check mismatch"
                    );
                }
            }

            _ => {
                return Err(bytecode_error(
                    vm,
                    Some(op),
                    format!("unexpected opcode {}", inst.raw),
                ));
            }
        }
    }
}
