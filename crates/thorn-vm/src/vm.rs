//! Runtime state and the host-facing API.

use crate::binary_chunk;
use crate::callinfo::CallInfo;
use crate::config::RuntimeConfig;
use crate::dispatch;
use crate::error::VmError;
use crate::governor::Governor;
use std::collections::HashMap;
use std::rc::Rc;
use thorn_bytecode::proto::{Constant, Proto};
use thorn_core::gc::{CollectStats, GcHeap, GcIdx, NativeContext, NativeFunction, NativeResult, Output};
use thorn_core::object;
use thorn_core::string::StringInterner;
use thorn_core::table::Table;
use thorn_core::value::{ScriptEnum, Value};

/// Turns source text into a prototype. Hosts that accept source install one
/// with [`Runtime::set_compiler`]; the runtime itself only executes bytecode.
pub trait Compiler {
    fn compile(&self, source: &str, name: &str) -> Result<Proto, String>;
}

/// A prototype registered with the runtime, with its constants converted to
/// values once up front.
#[derive(Debug)]
pub struct LoadedProto {
    pub proto: Rc<Proto>,
    /// Constant pool as values. Function constants hold `Nil`; see `nested`.
    pub constants: Vec<Value>,
    /// For each constant, the registry index of the nested prototype it holds.
    pub nested: Vec<Option<usize>>,
}

/// Result of one top-level invocation.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Execution {
    /// Values returned by the main function.
    pub values: Vec<Value>,
    /// Everything the script wrote through the output sink.
    pub output: String,
}

impl Execution {
    /// The primary result, `Nil` if nothing was returned.
    pub fn first(&self) -> Value {
        self.values.first().copied().unwrap_or_default()
    }
}

/// The Thorn virtual machine.
///
/// One instance owns its heap, strings, frame stack and instruction counter.
/// Instances share nothing, so separate instances may run on separate threads.
pub struct Runtime {
    /// Value stack: locals and temporaries of every active frame.
    pub(crate) stack: Vec<Value>,
    /// Call stack (frames).
    pub(crate) call_stack: Vec<CallInfo>,
    pub(crate) gc: GcHeap,
    pub(crate) strings: StringInterner,
    pub(crate) output: Output,
    /// Every prototype loaded so far, flattened from the nested trees.
    pub(crate) protos: Vec<LoadedProto>,
    proto_index: HashMap<*const Proto, usize>,
    /// Default environment for invocations.
    env: GcIdx<Table>,
    /// Environment of the running invocation.
    pub(crate) active_env: GcIdx<Table>,
    /// Pristine copy of the builtins used to seed new environments.
    builtins: Option<GcIdx<Table>>,
    /// Environments handed out by `new_env`; collection roots.
    envs: Vec<GcIdx<Table>>,
    /// Results of the latest invocation, kept alive across one collection.
    last_results: Vec<Value>,
    pub(crate) config: RuntimeConfig,
    pub(crate) governor: Governor,
    /// Nested `call_function` entries (hosts, natives calling back).
    pub(crate) reentry_depth: usize,
    /// Natives that need VM dispatch because they call script functions.
    pub(crate) sort_idx: Option<GcIdx<NativeFunction>>,
    pub(crate) foreach_idx: Option<GcIdx<NativeFunction>>,
    pub(crate) foreachi_idx: Option<GcIdx<NativeFunction>>,
    compiler: Option<Box<dyn Compiler>>,
}

impl Runtime {
    pub fn new() -> Self {
        Self::with_config(RuntimeConfig::default())
    }

    pub fn with_config(config: RuntimeConfig) -> Self {
        let mut gc = GcHeap::new();
        let mut strings = StringInterner::new();
        let (builtins, indices) = if config.stdlib {
            let builtins = gc.alloc_table(0, 64);
            let indices = thorn_stdlib::register_all(builtins, &mut gc, &mut strings);
            (Some(builtins), Some(indices))
        } else {
            (None, None)
        };
        let env = gc.alloc_table(0, 64);
        let mut rt = Runtime {
            stack: Vec::with_capacity(256),
            call_stack: Vec::with_capacity(16),
            gc,
            strings,
            output: Output::new(),
            protos: Vec::new(),
            proto_index: HashMap::new(),
            env,
            active_env: env,
            builtins,
            envs: Vec::new(),
            last_results: Vec::new(),
            governor: Governor::new(config.max_instructions),
            config,
            reentry_depth: 0,
            sort_idx: indices.map(|i| i.sort_idx),
            foreach_idx: indices.map(|i| i.foreach_idx),
            foreachi_idx: indices.map(|i| i.foreachi_idx),
            compiler: None,
        };
        rt.copy_builtins(env);
        rt
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// The default environment table.
    pub fn env(&self) -> GcIdx<Table> {
        self.env
    }

    /// A fresh environment holding only the builtins.
    pub fn new_env(&mut self) -> GcIdx<Table> {
        let env = self.gc.alloc_table(0, 64);
        self.copy_builtins(env);
        self.envs.push(env);
        env
    }

    fn copy_builtins(&mut self, env: GcIdx<Table>) {
        let Some(builtins) = self.builtins else {
            return;
        };
        let entries: Vec<(Value, Value)> = self.gc.get_table(builtins).iter().collect();
        let table = self.gc.get_table_mut(env);
        for (k, v) in entries {
            if let Value::String(id) = k {
                table.set_str(id, v);
            }
        }
    }

    pub fn set_compiler(&mut self, compiler: Box<dyn Compiler>) {
        self.compiler = Some(compiler);
    }

    /// Install a callback that receives script output as it is written.
    pub fn set_output(&mut self, sink: impl FnMut(&str) + 'static) {
        self.output.set_sink(sink);
    }

    /// Output captured since the last invocation started.
    pub fn take_output(&mut self) -> String {
        self.output.take()
    }

    // ---- host bindings ----

    pub fn set_global(&mut self, name: &str, value: Value) {
        self.gc.set_field(&mut self.strings, self.env, name, value);
    }

    pub fn get_global(&self, name: &str) -> Value {
        self.get_field(Value::Table(self.env), name)
    }

    /// `table.name`, or `Nil` when `table` is not a table.
    pub fn get_field(&self, table: Value, name: &str) -> Value {
        match (table, self.strings.find(name.as_bytes())) {
            (Value::Table(t), Some(key)) => self.gc.get_table(t).get_str(key),
            _ => Value::Nil,
        }
    }

    /// Expose a host callable as global `name`.
    pub fn register_native(
        &mut self,
        name: &str,
        func: impl Fn(&mut NativeContext) -> NativeResult + 'static,
    ) -> Value {
        let idx = self.gc.alloc_native(func, name);
        let v = Value::Native(idx);
        self.set_global(name, v);
        v
    }

    /// Expose a host enum constant as global `name`.
    pub fn set_enum<E: ScriptEnum>(&mut self, name: &str, value: E) {
        self.set_global(name, Value::from_enum(value));
    }

    pub fn new_string(&mut self, s: &str) -> Value {
        Value::String(self.strings.intern(s.as_bytes()))
    }

    pub fn new_table(&mut self) -> Value {
        Value::Table(self.gc.alloc_table(0, 0))
    }

    pub fn heap(&self) -> &GcHeap {
        &self.gc
    }

    pub fn heap_mut(&mut self) -> &mut GcHeap {
        &mut self.gc
    }

    pub fn strings(&self) -> &StringInterner {
        &self.strings
    }

    /// Display form of a value, as `tostring` renders it.
    pub fn tostring(&self, v: Value) -> String {
        object::tostring(v, &self.strings)
    }

    /// Pretty-print a value, expanding tables; cycles are cut.
    pub fn dump_value(&self, v: Value, single_line: bool) -> String {
        object::dump_value(v, &self.gc, &self.strings, single_line)
    }

    /// Free every object and string not reachable from the environments,
    /// the loaded prototypes or the latest invocation's results.
    ///
    /// Values the host holds outside those roots are invalid afterwards.
    pub fn collect_garbage(&mut self) -> CollectStats {
        let mut roots: Vec<Value> = Vec::with_capacity(self.stack.len() + self.envs.len() + 8);
        roots.push(Value::Table(self.env));
        roots.push(Value::Table(self.active_env));
        roots.extend(self.builtins.map(Value::Table));
        roots.extend(self.envs.iter().map(|&e| Value::Table(e)));
        roots.extend(
            [self.sort_idx, self.foreach_idx, self.foreachi_idx]
                .into_iter()
                .flatten()
                .map(Value::Native),
        );
        roots.extend(self.stack.iter().copied());
        roots.extend(self.call_stack.iter().map(|ci| Value::Closure(ci.closure)));
        for loaded in &self.protos {
            roots.extend(loaded.constants.iter().copied());
        }
        roots.extend(self.last_results.iter().copied());

        let stats = self.gc.collect(&mut self.strings, roots);
        tracing::debug!(
            freed_objects = stats.freed_objects,
            freed_strings = stats.freed_strings,
            live_objects = stats.live_objects,
            live_strings = stats.live_strings,
            "garbage collected"
        );
        stats
    }

    /// Collect if enough was allocated since the last collection.
    fn maybe_collect(&mut self) {
        let threshold = self.config.gc_threshold;
        if threshold == 0 || !self.call_stack.is_empty() {
            return;
        }
        if self.gc.allocated_since_collect() + self.strings.created_since_sweep() >= threshold {
            self.collect_garbage();
        }
    }

    pub fn instructions_used(&self) -> u64 {
        self.governor.used()
    }

    pub fn call_depth(&self) -> usize {
        self.call_stack.len()
    }

    pub fn stack_len(&self) -> usize {
        self.stack.len()
    }

    // ---- loading ----

    /// Load a single binary chunk.
    pub fn load_chunk(&mut self, data: &[u8], name: &str) -> Result<Rc<Proto>, VmError> {
        let proto = Rc::new(binary_chunk::undump(data, name)?);
        self.register_proto(&proto);
        Ok(proto)
    }

    /// Load every chunk in a stream of concatenated chunks.
    pub fn load_chunks(&mut self, data: &[u8], name: &str) -> Result<Vec<Rc<Proto>>, VmError> {
        let protos: Vec<Rc<Proto>> = binary_chunk::load_chunks(data, name)?
            .into_iter()
            .map(Rc::new)
            .collect();
        for p in &protos {
            self.register_proto(p);
        }
        Ok(protos)
    }

    /// Add a prototype tree to the registry, returning the root's index.
    fn register_proto(&mut self, proto: &Rc<Proto>) -> usize {
        let key = Rc::as_ptr(proto);
        if let Some(&idx) = self.proto_index.get(&key) {
            return idx;
        }
        let idx = self.protos.len();
        self.protos.push(LoadedProto {
            proto: Rc::clone(proto),
            constants: Vec::new(),
            nested: Vec::new(),
        });
        self.proto_index.insert(key, idx);

        let mut constants = Vec::with_capacity(proto.constants.len());
        let mut nested = Vec::with_capacity(proto.constants.len());
        for k in &proto.constants {
            let (v, child) = match k {
                Constant::Nil => (Value::Nil, None),
                Constant::Number(n) => (Value::Number(*n), None),
                Constant::String(bytes) => (Value::String(self.strings.intern(bytes)), None),
                Constant::Proto(p) => (Value::Nil, Some(self.register_proto(p))),
            };
            constants.push(v);
            nested.push(child);
        }
        let loaded = &mut self.protos[idx];
        loaded.constants = constants;
        loaded.nested = nested;
        idx
    }

    // ---- execution ----

    /// Run a prototype's main function in the default environment with the
    /// configured budget.
    pub fn execute(&mut self, proto: &Rc<Proto>) -> Result<Execution, VmError> {
        let (env, budget) = (self.env, self.config.max_instructions);
        self.execute_with(proto, env, budget)
    }

    /// Run a prototype's main function against `env` with an explicit
    /// instruction budget.
    pub fn execute_with(
        &mut self,
        proto: &Rc<Proto>,
        env: GcIdx<Table>,
        budget: u64,
    ) -> Result<Execution, VmError> {
        let proto_idx = self.register_proto(proto);
        self.invoke(env, budget, |rt| rt.run_proto(proto_idx))
    }

    /// Call a function value (typically one a script stored in the
    /// environment) as a new top-level invocation.
    pub fn call(&mut self, func: Value, args: &[Value]) -> Result<Execution, VmError> {
        let (env, budget) = (self.env, self.config.max_instructions);
        self.invoke(env, budget, |rt| dispatch::call_function(rt, func, args))
    }

    /// Load and run every chunk in `data`, returning the last one's results.
    pub fn do_chunk(&mut self, data: &[u8], name: &str) -> Result<Execution, VmError> {
        let protos = self.load_chunks(data, name)?;
        let indices: Vec<usize> = protos.iter().map(|p| self.register_proto(p)).collect();
        let (env, budget) = (self.env, self.config.max_instructions);
        self.invoke(env, budget, |rt| {
            let mut last = Vec::new();
            for idx in indices {
                last = rt.run_proto(idx)?;
            }
            Ok(last)
        })
    }

    /// Run `data` as a binary chunk if it looks like one, else as source text.
    pub fn do_stream(&mut self, data: &[u8], name: &str) -> Result<Execution, VmError> {
        if binary_chunk::is_chunk(data) {
            self.do_chunk(data, name)
        } else {
            self.do_string(&String::from_utf8_lossy(data), name)
        }
    }

    /// Compile `source` with the installed compiler and run it.
    pub fn do_string(&mut self, source: &str, name: &str) -> Result<Execution, VmError> {
        let compiler = self.compiler.as_ref().ok_or(VmError::NoCompiler)?;
        let proto = Rc::new(compiler.compile(source, name).map_err(VmError::Compile)?);
        self.execute(&proto)
    }

    fn run_proto(&mut self, proto_idx: usize) -> Result<Vec<Value>, VmError> {
        let closure = self.gc.alloc_closure(proto_idx, Vec::new());
        dispatch::call_function(self, Value::Closure(closure), &[])
    }

    /// Wrap one top-level invocation: fresh budget, fresh output capture,
    /// and a clean frame stack afterwards whatever the outcome.
    fn invoke<F>(&mut self, env: GcIdx<Table>, budget: u64, f: F) -> Result<Execution, VmError>
    where
        F: FnOnce(&mut Runtime) -> Result<Vec<Value>, VmError>,
    {
        self.governor.reset(budget);
        self.output.take();
        let saved_env = std::mem::replace(&mut self.active_env, env);
        tracing::debug!(budget, "invocation start");

        let result = f(self);

        self.active_env = saved_env;
        match result {
            Ok(values) => {
                tracing::debug!(
                    instructions = self.governor.used(),
                    results = values.len(),
                    "invocation finished"
                );
                self.last_results.clone_from(&values);
                self.maybe_collect();
                Ok(Execution {
                    values,
                    output: self.output.take(),
                })
            }
            Err(e) => {
                tracing::debug!(instructions = self.governor.used(), error = %e, "invocation failed");
                self.call_stack.clear();
                self.stack.clear();
                self.last_results.clear();
                self.maybe_collect();
                Err(e)
            }
        }
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}
