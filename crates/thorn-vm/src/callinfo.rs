//! Call frame information for the VM.

use thorn_bytecode::opcode::CODE_START;
use thorn_core::gc::{Closure, GcIdx};

/// A call frame on the VM call stack.
#[derive(Clone, Debug)]
pub struct CallInfo {
    /// The closure being executed.
    pub closure: GcIdx<Closure>,
    /// Index into `Runtime::protos`.
    pub proto_idx: usize,
    /// Stack slot of local 0.
    pub base: usize,
    /// Offset of the next instruction in the code array.
    pub pc: usize,
    /// Stack slot holding the function value; results are placed here.
    pub func_idx: usize,
    /// Results the caller wants (`None` = all of them).
    pub num_results: Option<usize>,
    /// Last line recorded by `SETLINE`.
    pub line: u32,
    /// Set when the previous instruction left an open result list starting
    /// at this slot; consumed by the next instruction.
    pub open_results: Option<usize>,
}

impl CallInfo {
    pub fn new(
        closure: GcIdx<Closure>,
        proto_idx: usize,
        func_idx: usize,
        num_results: Option<usize>,
    ) -> Self {
        CallInfo {
            closure,
            proto_idx,
            base: func_idx + 1,
            pc: CODE_START,
            func_idx,
            num_results,
            line: 0,
            open_results: None,
        }
    }
}
