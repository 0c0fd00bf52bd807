/// Assembler for prototypes.
///
/// Hosts use it to build small functions without a compiler, and tests use it
/// to produce exact instruction streams. Operands are encoded in the narrowest
/// form that fits: narrow, `W`, or `LONGARG` + `W`. Forward jumps are always
/// emitted in `W` form and patched when the label is placed.
use crate::opcode::{OpCode, Operands, ZEROVARARG};
use crate::proto::{Constant, LocalVar, Proto};
use std::rc::Rc;
use thiserror::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Label(usize);

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum BuildError {
    #[error("operand {value} out of range for {op}")]
    OperandOutOfRange { op: OpCode, value: u32 },
    #[error("{0} is not a jump")]
    NotAJump(OpCode),
    #[error("{op} cannot reach its label in that direction")]
    WrongDirection { op: OpCode },
    #[error("{op} cannot jump {distance} bytes")]
    JumpTooFar { op: OpCode, distance: usize },
    #[error("label {0} was never placed")]
    UnboundLabel(usize),
}

struct Fixup {
    /// Offset of the 16-bit operand to patch.
    operand_at: usize,
    /// Offset just past the jump instruction.
    next_pc: usize,
    label: Label,
    op: OpCode,
}

pub struct ProtoBuilder {
    source: String,
    line_defined: i32,
    params: u8,
    vararg: bool,
    max_stack: u8,
    code: Vec<u8>,
    constants: Vec<Constant>,
    locals: Vec<LocalVar>,
    labels: Vec<Option<usize>>,
    fixups: Vec<Fixup>,
    error: Option<BuildError>,
}

impl ProtoBuilder {
    pub fn new(source: &str) -> Self {
        ProtoBuilder {
            source: source.to_string(),
            line_defined: 0,
            params: 0,
            vararg: false,
            max_stack: 32,
            code: vec![0, 0],
            constants: Vec::new(),
            locals: Vec::new(),
            labels: Vec::new(),
            fixups: Vec::new(),
            error: None,
        }
    }

    pub fn params(mut self, n: u8) -> Self {
        self.params = n;
        self
    }

    /// Collect surplus arguments into the `arg` table.
    pub fn vararg(mut self) -> Self {
        self.vararg = true;
        self
    }

    pub fn max_stack(mut self, n: u8) -> Self {
        self.max_stack = n;
        self
    }

    pub fn line_defined(mut self, line: i32) -> Self {
        self.line_defined = line;
        self
    }

    /// Record a local variable debug entry.
    pub fn local(&mut self, name: &str, line: i32) -> &mut Self {
        self.locals.push(LocalVar {
            name: Some(name.to_string()),
            line,
        });
        self
    }

    /// Add a constant, reusing an equal number or string entry.
    pub fn constant(&mut self, k: Constant) -> u32 {
        let existing = self.constants.iter().position(|c| match (c, &k) {
            (Constant::Number(a), Constant::Number(b)) => a.to_bits() == b.to_bits(),
            (Constant::String(a), Constant::String(b)) => a == b,
            _ => false,
        });
        let idx = existing.unwrap_or_else(|| {
            self.constants.push(k);
            self.constants.len() - 1
        });
        idx as u32
    }

    pub fn string_constant(&mut self, s: &str) -> u32 {
        self.constant(Constant::string(s))
    }

    /// Current code offset.
    pub fn pc(&self) -> usize {
        self.code.len()
    }

    /// Emit `op` with operand `a`, choosing the narrowest encoding.
    pub fn emit(&mut self, op: OpCode, a: u32) -> &mut Self {
        self.encode(op, a, None);
        self
    }

    /// Emit a two-operand instruction.
    pub fn emit2(&mut self, op: OpCode, a: u32, b: u8) -> &mut Self {
        self.encode(op, a, Some(b));
        self
    }

    /// Emit an operand-less instruction (operators, `GETTABLE`, `ENDCODE`, ...).
    pub fn op(&mut self, op: OpCode) -> &mut Self {
        if op.operands() != Operands::None {
            self.fail(BuildError::OperandOutOfRange { op, value: 0 });
        } else {
            self.code.push(op as u8);
        }
        self
    }

    fn encode(&mut self, op: OpCode, a: u32, b: Option<u8>) {
        let op = op.base();
        if op.operands() == Operands::None {
            self.code.push(op as u8);
            return;
        }
        if a <= 0xFF {
            self.code.push(op as u8);
            self.code.push(a as u8);
        } else if let Some(wide) = op.wide() {
            if a > 0xFFFF {
                self.encode(OpCode::LongArg, a >> 16, None);
            }
            let lo = a & 0xFFFF;
            self.code.push(wide as u8);
            self.code.push((lo >> 8) as u8);
            self.code.push(lo as u8);
        } else {
            self.fail(BuildError::OperandOutOfRange { op, value: a });
            return;
        }
        if matches!(op.operands(), Operands::ByteByte) {
            self.code.push(b.unwrap_or(0));
        }
    }

    fn fail(&mut self, e: BuildError) {
        if self.error.is_none() {
            self.error = Some(e);
        }
    }

    // ---- stack ----

    /// Push `count` nils (`count >= 1`).
    pub fn push_nil(&mut self, count: u32) -> &mut Self {
        self.emit(OpCode::PushNil, count.saturating_sub(1))
    }

    pub fn pop(&mut self, count: u32) -> &mut Self {
        self.emit(OpCode::Pop, count)
    }

    /// Push a number: inline when it is a small whole value, else via the constant pool.
    pub fn push_number(&mut self, n: f32) -> &mut Self {
        if n.fract() == 0.0 && n.abs() <= 65535.0 && !(n == 0.0 && n.is_sign_negative()) {
            if n >= 0.0 {
                return self.emit(OpCode::PushNumber, n as u32);
            }
            return self.emit(OpCode::PushNumberNeg, (-n) as u32);
        }
        let k = self.constant(Constant::Number(n));
        self.emit(OpCode::PushConstant, k)
    }

    pub fn push_string(&mut self, s: &str) -> &mut Self {
        let k = self.string_constant(s);
        self.emit(OpCode::PushConstant, k)
    }

    pub fn push_constant(&mut self, k: u32) -> &mut Self {
        self.emit(OpCode::PushConstant, k)
    }

    pub fn push_local(&mut self, slot: u32) -> &mut Self {
        self.emit(OpCode::PushLocal, slot)
    }

    pub fn set_local(&mut self, slot: u32) -> &mut Self {
        self.emit(OpCode::SetLocal, slot)
    }

    pub fn push_upvalue(&mut self, idx: u32) -> &mut Self {
        self.emit(OpCode::PushUpvalue, idx)
    }

    // ---- globals and tables ----

    pub fn get_global(&mut self, name: &str) -> &mut Self {
        let k = self.string_constant(name);
        self.emit(OpCode::GetGlobal, k)
    }

    pub fn set_global(&mut self, name: &str) -> &mut Self {
        let k = self.string_constant(name);
        self.emit(OpCode::SetGlobal, k)
    }

    pub fn get_table(&mut self) -> &mut Self {
        self.op(OpCode::GetTable)
    }

    pub fn get_dotted(&mut self, name: &str) -> &mut Self {
        let k = self.string_constant(name);
        self.emit(OpCode::GetDotted, k)
    }

    /// `t:name`: leaves `t.name` and `t` on the stack.
    pub fn push_self(&mut self, name: &str) -> &mut Self {
        let k = self.string_constant(name);
        self.emit(OpCode::PushSelf, k)
    }

    pub fn create_array(&mut self, size_hint: u32) -> &mut Self {
        self.emit(OpCode::CreateArray, size_hint)
    }

    /// `t[i] = v` with `t i v` on top; pops all three.
    pub fn set_table_pop(&mut self) -> &mut Self {
        self.op(OpCode::SetTablePop)
    }

    /// `t[i] = v` where `t i` sit `depth` slots below `v`; pops only `v`.
    pub fn set_table(&mut self, depth: u32) -> &mut Self {
        self.emit(OpCode::SetTable, depth)
    }

    /// Store the top `count` values into the table below them at
    /// `block * 64 + 1 ..`.
    pub fn set_list(&mut self, block: u32, count: u8) -> &mut Self {
        self.emit2(OpCode::SetList, block, count)
    }

    /// Store `pairs` key/value pairs (`pairs >= 1`) into the table below them.
    pub fn set_map(&mut self, pairs: u32) -> &mut Self {
        self.emit(OpCode::SetMap, pairs.saturating_sub(1))
    }

    // ---- calls ----

    /// `CALL nresults nargs`; use [`MULT_RET`](crate::opcode::MULT_RET) for all results.
    pub fn call(&mut self, nresults: u8, nargs: u8) -> &mut Self {
        self.emit2(OpCode::Call, nresults as u32, nargs)
    }

    pub fn tail_call(&mut self, base: u8, nargs: u8) -> &mut Self {
        self.emit2(OpCode::TailCall, base as u32, nargs)
    }

    /// Return the values from local slot `base` to the top.
    pub fn ret(&mut self, base: u32) -> &mut Self {
        self.emit(OpCode::RetCode, base)
    }

    pub fn end_code(&mut self) -> &mut Self {
        self.op(OpCode::EndCode)
    }

    /// Add `proto` as a constant and instantiate it, capturing the top
    /// `upvalues` stack values.
    pub fn closure(&mut self, proto: Proto, upvalues: u8) -> &mut Self {
        self.constants.push(Constant::Proto(Rc::new(proto)));
        let k = (self.constants.len() - 1) as u32;
        self.emit2(OpCode::Closure, k, upvalues)
    }

    pub fn set_line(&mut self, line: u32) -> &mut Self {
        self.emit(OpCode::SetLine, line)
    }

    pub fn check_stack(&mut self, depth: u32) -> &mut Self {
        self.emit(OpCode::CheckStack, depth)
    }

    // ---- jumps ----

    pub fn new_label(&mut self) -> Label {
        self.labels.push(None);
        Label(self.labels.len() - 1)
    }

    /// Bind `label` to the current offset.
    pub fn place(&mut self, label: Label) -> &mut Self {
        self.labels[label.0] = Some(self.code.len());
        self
    }

    /// Emit a jump to `label`. Forward jumps need an unplaced label; the
    /// backward forms (`IFTUPJMP`, `IFFUPJMP`) need a placed one.
    pub fn jump(&mut self, op: OpCode, label: Label) -> &mut Self {
        if !op.is_jump() {
            self.fail(BuildError::NotAJump(op));
            return self;
        }
        let op = op.base();
        match (self.labels[label.0], op.is_backward_jump()) {
            (Some(target), true) => {
                let here = self.code.len();
                let narrow = here + 2 - target;
                if narrow <= 0xFF {
                    self.code.extend_from_slice(&[op as u8, narrow as u8]);
                } else {
                    let distance = here + 3 - target;
                    if distance > 0xFFFF {
                        self.fail(BuildError::JumpTooFar { op, distance });
                        return self;
                    }
                    let wide = op.wide().unwrap_or(op);
                    self.code
                        .extend_from_slice(&[wide as u8, (distance >> 8) as u8, distance as u8]);
                }
            }
            (None, false) => {
                let wide = op.wide().unwrap_or(op);
                self.code.push(wide as u8);
                let operand_at = self.code.len();
                self.code.extend_from_slice(&[0, 0]);
                self.fixups.push(Fixup {
                    operand_at,
                    next_pc: self.code.len(),
                    label,
                    op,
                });
            }
            _ => self.fail(BuildError::WrongDirection { op }),
        }
        self
    }

    pub fn build(mut self) -> Result<Proto, BuildError> {
        if let Some(e) = self.error.take() {
            return Err(e);
        }
        for fixup in &self.fixups {
            let target = self.labels[fixup.label.0].ok_or(BuildError::UnboundLabel(fixup.label.0))?;
            let distance = target - fixup.next_pc;
            if distance > 0xFFFF {
                return Err(BuildError::JumpTooFar {
                    op: fixup.op,
                    distance,
                });
            }
            self.code[fixup.operand_at] = (distance >> 8) as u8;
            self.code[fixup.operand_at + 1] = distance as u8;
        }
        self.code[0] = self.max_stack;
        self.code[1] = if self.vararg {
            ZEROVARARG + self.params
        } else {
            self.params
        };
        Ok(Proto {
            source: self.source,
            line_defined: self.line_defined,
            code: self.code,
            constants: self.constants,
            locals: self.locals,
        })
    }
}
