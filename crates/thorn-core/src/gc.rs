//! Object arena with typed indices and a mark-sweep collector.
//!
//! Tables, closures, natives and upvalue cells live in per-kind arenas and are
//! referenced by [`GcIdx`]. [`GcHeap::collect`] frees everything not reachable
//! from the roots it is given, strings included; freed slots are reused by
//! later allocations. Cycles are collected like anything else.

use crate::string::{StringId, StringInterner};
use crate::table::Table;
use crate::value::Value;
use std::fmt;
use std::marker::PhantomData;
use std::rc::Rc;
use thiserror::Error;

/// A typed index into an arena in the [`GcHeap`].
pub struct GcIdx<T>(pub u32, pub PhantomData<T>);

impl<T> GcIdx<T> {
    pub fn new(idx: u32) -> Self {
        GcIdx(idx, PhantomData)
    }

    pub fn index(self) -> u32 {
        self.0
    }
}

impl<T> Clone for GcIdx<T> {
    fn clone(&self) -> Self {
        *self
    }
}
impl<T> Copy for GcIdx<T> {}

impl<T> PartialEq for GcIdx<T> {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}
impl<T> Eq for GcIdx<T> {}

impl<T> std::hash::Hash for GcIdx<T> {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.0.hash(state);
    }
}

impl<T> fmt::Debug for GcIdx<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A script function: a prototype plus the upvalue cells it captured.
#[derive(Debug)]
pub struct Closure {
    /// Index of the prototype in the runtime's prototype registry.
    pub proto_idx: usize,
    pub upvalues: Vec<GcIdx<UpVal>>,
}

/// A shared mutable single-value cell.
#[derive(Debug)]
pub struct UpVal {
    pub value: Value,
}

/// Error raised by a native function.
#[derive(Clone, Debug, Error)]
pub enum NativeError {
    /// Argument of the wrong kind.
    #[error("{0}")]
    Type(String),
    /// Any other failure, including script `error()` calls.
    #[error("{0}")]
    Message(String),
}

pub type NativeResult = Result<Vec<Value>, NativeError>;

/// Signature shared by builtins and host callables.
pub type NativeFn = Rc<dyn Fn(&mut NativeContext) -> NativeResult>;

/// A host-provided callable.
pub struct NativeFunction {
    pub func: NativeFn,
    pub name: String,
}

impl fmt::Debug for NativeFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NativeFunction({})", self.name)
    }
}

/// Destination for script-originated text.
///
/// Everything written is captured for the current invocation and, if a host
/// sink is installed, forwarded to it as it is written.
#[derive(Default)]
pub struct Output {
    captured: String,
    sink: Option<Box<dyn FnMut(&str)>>,
}

impl Output {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_sink(&mut self, sink: impl FnMut(&str) + 'static) {
        self.sink = Some(Box::new(sink));
    }

    pub fn clear_sink(&mut self) {
        self.sink = None;
    }

    pub fn write(&mut self, text: &str) {
        self.captured.push_str(text);
        if let Some(sink) = self.sink.as_mut() {
            sink(text);
        }
    }

    pub fn captured(&self) -> &str {
        &self.captured
    }

    /// Take the captured text, leaving the buffer empty.
    pub fn take(&mut self) -> String {
        std::mem::take(&mut self.captured)
    }
}

impl fmt::Debug for Output {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Output")
            .field("captured", &self.captured.len())
            .field("sink", &self.sink.is_some())
            .finish()
    }
}

/// Context passed to native functions.
pub struct NativeContext<'a> {
    pub args: &'a [Value],
    pub gc: &'a mut GcHeap,
    pub strings: &'a mut StringInterner,
    pub output: &'a mut Output,
}

impl NativeContext<'_> {
    /// Argument `n` (0-based), nil when absent.
    pub fn arg(&self, n: usize) -> Value {
        self.args.get(n).copied().unwrap_or(Value::Nil)
    }

    pub fn new_string(&mut self, s: &[u8]) -> Value {
        Value::String(self.strings.intern(s))
    }

    /// Numeric argument; numeric strings are accepted.
    pub fn check_number(&self, n: usize, fname: &str) -> Result<f32, NativeError> {
        let v = self.arg(n);
        match v {
            Value::Number(x) => Ok(x),
            Value::String(id) => crate::object::str_to_number(self.strings.get_bytes(id))
                .ok_or_else(|| bad_argument(n, fname, "number", v)),
            _ => Err(bad_argument(n, fname, "number", v)),
        }
    }

    pub fn opt_number(&self, n: usize, fname: &str, default: f32) -> Result<f32, NativeError> {
        if self.arg(n).is_nil() {
            Ok(default)
        } else {
            self.check_number(n, fname)
        }
    }

    /// String argument as bytes; numbers are converted.
    pub fn check_bytes(&self, n: usize, fname: &str) -> Result<Vec<u8>, NativeError> {
        let v = self.arg(n);
        match v {
            Value::String(id) => Ok(self.strings.get_bytes(id).to_vec()),
            Value::Number(x) => Ok(crate::object::format_number(x).into_bytes()),
            _ => Err(bad_argument(n, fname, "string", v)),
        }
    }

    pub fn check_table(&self, n: usize, fname: &str) -> Result<GcIdx<Table>, NativeError> {
        let v = self.arg(n);
        v.as_table()
            .ok_or_else(|| bad_argument(n, fname, "table", v))
    }

    pub fn check_function(&self, n: usize, fname: &str) -> Result<Value, NativeError> {
        let v = self.arg(n);
        if v.is_function() {
            Ok(v)
        } else {
            Err(bad_argument(n, fname, "function", v))
        }
    }

    /// Display form of a value, as `tostring` renders it.
    pub fn to_display(&self, v: Value) -> String {
        crate::object::tostring(v, self.strings)
    }
}

/// Standard "bad argument" error (1-based argument numbers in the message).
pub fn bad_argument(n: usize, fname: &str, expected: &str, got: Value) -> NativeError {
    NativeError::Type(format!(
        "bad argument #{} to '{}' ({} expected, got {})",
        n + 1,
        fname,
        expected,
        if got.is_nil() { "no value" } else { got.type_name() }
    ))
}

/// Arena-based object heap.
#[derive(Debug, Default)]
pub struct GcHeap {
    tables: Vec<Option<Table>>,
    table_free: Vec<u32>,
    closures: Vec<Option<Closure>>,
    closure_free: Vec<u32>,
    natives: Vec<Option<NativeFunction>>,
    native_free: Vec<u32>,
    upvals: Vec<Option<UpVal>>,
    upval_free: Vec<u32>,
    /// Objects allocated since the last collection.
    allocated: usize,
}

/// Put `value` in a free slot of `arena` or append it.
fn alloc_in<T>(arena: &mut Vec<Option<T>>, free: &mut Vec<u32>, value: T) -> u32 {
    match free.pop() {
        Some(idx) => {
            arena[idx as usize] = Some(value);
            idx
        }
        None => {
            arena.push(Some(value));
            (arena.len() - 1) as u32
        }
    }
}

/// Free every unmarked slot of `arena`.
fn sweep_arena<T>(arena: &mut [Option<T>], free: &mut Vec<u32>, marks: &[bool]) -> usize {
    let mut freed = 0;
    for (i, slot) in arena.iter_mut().enumerate() {
        if slot.is_some() && !marks[i] {
            *slot = None;
            free.push(i as u32);
            freed += 1;
        }
    }
    freed
}

/// Set mark `i`; true when it was not set before.
fn mark(bits: &mut [bool], i: u32) -> bool {
    match bits.get_mut(i as usize) {
        Some(bit) if !*bit => {
            *bit = true;
            true
        }
        _ => false,
    }
}

/// Outcome of one collection.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CollectStats {
    pub freed_objects: usize,
    pub freed_strings: usize,
    pub live_objects: usize,
    pub live_strings: usize,
}

impl GcHeap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alloc_table(&mut self, array_hint: usize, map_hint: usize) -> GcIdx<Table> {
        self.allocated += 1;
        let table = Table::new(array_hint, map_hint);
        GcIdx::new(alloc_in(&mut self.tables, &mut self.table_free, table))
    }

    pub fn get_table(&self, idx: GcIdx<Table>) -> &Table {
        self.tables[idx.0 as usize].as_ref().expect("table was freed")
    }

    pub fn get_table_mut(&mut self, idx: GcIdx<Table>) -> &mut Table {
        self.tables[idx.0 as usize].as_mut().expect("table was freed")
    }

    pub fn alloc_closure(&mut self, proto_idx: usize, upvalues: Vec<GcIdx<UpVal>>) -> GcIdx<Closure> {
        self.allocated += 1;
        let closure = Closure { proto_idx, upvalues };
        GcIdx::new(alloc_in(&mut self.closures, &mut self.closure_free, closure))
    }

    pub fn get_closure(&self, idx: GcIdx<Closure>) -> &Closure {
        self.closures[idx.0 as usize].as_ref().expect("closure was freed")
    }

    pub fn alloc_native(
        &mut self,
        func: impl Fn(&mut NativeContext) -> NativeResult + 'static,
        name: &str,
    ) -> GcIdx<NativeFunction> {
        self.allocated += 1;
        let native = NativeFunction {
            func: Rc::new(func),
            name: name.to_string(),
        };
        GcIdx::new(alloc_in(&mut self.natives, &mut self.native_free, native))
    }

    pub fn get_native(&self, idx: GcIdx<NativeFunction>) -> &NativeFunction {
        self.natives[idx.0 as usize].as_ref().expect("native fn was freed")
    }

    pub fn alloc_upval(&mut self, value: Value) -> GcIdx<UpVal> {
        self.allocated += 1;
        GcIdx::new(alloc_in(&mut self.upvals, &mut self.upval_free, UpVal { value }))
    }

    pub fn get_upval(&self, idx: GcIdx<UpVal>) -> Value {
        self.upvals[idx.0 as usize].as_ref().expect("upval was freed").value
    }

    pub fn set_upval(&mut self, idx: GcIdx<UpVal>, value: Value) {
        self.upvals[idx.0 as usize].as_mut().expect("upval was freed").value = value;
    }

    /// Set `name = value` in a table, interning the key.
    pub fn set_field(
        &mut self,
        strings: &mut StringInterner,
        table: GcIdx<Table>,
        name: &str,
        value: Value,
    ) {
        let key: StringId = strings.intern(name.as_bytes());
        self.get_table_mut(table).set_str(key, value);
    }

    /// Objects currently allocated, of every kind.
    pub fn live_objects(&self) -> usize {
        self.tables.len() - self.table_free.len()
            + self.closures.len() - self.closure_free.len()
            + self.natives.len() - self.native_free.len()
            + self.upvals.len() - self.upval_free.len()
    }

    pub fn allocated_since_collect(&self) -> usize {
        self.allocated
    }

    /// Mark everything reachable from `roots`, then free every unmarked
    /// object and string.
    ///
    /// Any value not reachable from `roots` is invalid afterwards. Only call
    /// this while no native or frame holds values outside the roots.
    pub fn collect(
        &mut self,
        strings: &mut StringInterner,
        roots: impl IntoIterator<Item = Value>,
    ) -> CollectStats {
        let mut tables = vec![false; self.tables.len()];
        let mut closures = vec![false; self.closures.len()];
        let mut natives = vec![false; self.natives.len()];
        let mut upvals = vec![false; self.upvals.len()];
        let mut live_strings = vec![false; strings.capacity()];

        let mut gray: Vec<Value> = roots.into_iter().collect();
        while let Some(v) = gray.pop() {
            match v {
                Value::Nil | Value::Number(_) => {}
                Value::String(id) => {
                    mark(&mut live_strings, id.0);
                }
                Value::Native(f) => {
                    mark(&mut natives, f.0);
                }
                Value::Table(t) => {
                    if mark(&mut tables, t.0) {
                        if let Some(table) = &self.tables[t.0 as usize] {
                            for (k, v) in table.iter() {
                                gray.push(k);
                                gray.push(v);
                            }
                        }
                    }
                }
                Value::Closure(c) => {
                    if mark(&mut closures, c.0) {
                        if let Some(closure) = &self.closures[c.0 as usize] {
                            for cell in &closure.upvalues {
                                if mark(&mut upvals, cell.0) {
                                    if let Some(up) = &self.upvals[cell.0 as usize] {
                                        gray.push(up.value);
                                    }
                                }
                            }
                        }
                    }
                }
            }
        }

        let freed_objects = sweep_arena(&mut self.tables, &mut self.table_free, &tables)
            + sweep_arena(&mut self.closures, &mut self.closure_free, &closures)
            + sweep_arena(&mut self.natives, &mut self.native_free, &natives)
            + sweep_arena(&mut self.upvals, &mut self.upval_free, &upvals);
        let freed_strings = strings.sweep(&live_strings);
        self.allocated = 0;
        CollectStats {
            freed_objects,
            freed_strings,
            live_objects: self.live_objects(),
            live_strings: strings.len(),
        }
    }
}
