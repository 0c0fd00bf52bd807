//! Thorn builtin library: the global functions scripts expect to find in
//! their environment.

pub mod base;
pub mod format;
pub mod math;
pub mod string_lib;
pub mod table_lib;

use thorn_core::gc::{GcHeap, GcIdx, NativeContext, NativeFunction, NativeResult};
use thorn_core::string::StringInterner;
use thorn_core::table::Table;
use thorn_core::value::Value;

/// Indices of natives that call back into script code and are therefore
/// dispatched by the VM instead of through their function pointer.
#[derive(Clone, Copy, Debug)]
pub struct StdlibIndices {
    pub sort_idx: GcIdx<NativeFunction>,
    pub foreach_idx: GcIdx<NativeFunction>,
    pub foreachi_idx: GcIdx<NativeFunction>,
}

/// Register every builtin into `env`.
pub fn register_all(
    env: GcIdx<Table>,
    gc: &mut GcHeap,
    strings: &mut StringInterner,
) -> StdlibIndices {
    base::register(env, gc, strings);
    string_lib::register(env, gc, strings);
    math::register(env, gc, strings);
    table_lib::register(env, gc, strings)
}

/// Install `func` as global `name`.
pub(crate) fn register_fn(
    gc: &mut GcHeap,
    env: GcIdx<Table>,
    strings: &mut StringInterner,
    name: &'static str,
    func: fn(&mut NativeContext) -> NativeResult,
) -> GcIdx<NativeFunction> {
    let idx = gc.alloc_native(func, name);
    gc.set_field(strings, env, name, Value::Native(idx));
    idx
}

/// Error for natives that only run through VM dispatch.
pub(crate) fn vm_dispatched(name: &str) -> NativeResult {
    Err(thorn_core::gc::NativeError::Message(format!(
        "'{name}' must be called from a running script"
    )))
}
