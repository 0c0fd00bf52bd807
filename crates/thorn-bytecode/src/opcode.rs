/// Opcodes and instruction stream decoding.
///
/// Code is a byte stream. Each instruction is an opcode byte followed by its
/// operands: a byte (`b`), a big-endian 16-bit word (`w`), or a pair. Most
/// instructions come in a narrow form with a byte operand and a `W` form with a
/// word operand. `LONGARG` prefixes extend the next instruction's first operand
/// by 16 bits each.
///
/// The first two bytes of every prototype's code are not instructions: byte 0
/// is the maximum stack size and byte 1 the parameter count (values of
/// [`ZEROVARARG`] and above mark a vararg function).
use std::fmt;
use thiserror::Error;

/// Parameter-count values at or above this mark a vararg function.
pub const ZEROVARARG: u8 = 64;
/// "All results" marker for `CALL`.
pub const MULT_RET: u8 = 255;
/// List constructor elements flushed per `SETLIST`.
pub const LFIELDS_PER_FLUSH: u32 = 64;
/// Offset of the first instruction in a code array.
pub const CODE_START: usize = 2;

/// Operand layout of an opcode.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Operands {
    None,
    Byte,
    Word,
    ByteByte,
    WordByte,
}

impl Operands {
    /// Encoded size of the operands in bytes.
    pub fn size(self) -> usize {
        match self {
            Operands::None => 0,
            Operands::Byte => 1,
            Operands::Word | Operands::ByteByte => 2,
            Operands::WordByte => 3,
        }
    }
}

/// All 64 opcodes, in encoding order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum OpCode {
    EndCode = 0,
    RetCode,
    Call,
    TailCall,
    PushNil,
    Pop,
    PushNumberW,
    PushNumber,
    PushNumberNegW,
    PushNumberNeg,
    PushConstantW,
    PushConstant,
    PushUpvalue,
    PushLocal,
    GetGlobalW,
    GetGlobal,
    GetTable,
    GetDottedW,
    GetDotted,
    PushSelfW,
    PushSelf,
    CreateArrayW,
    CreateArray,
    SetLocal,
    SetGlobalW,
    SetGlobal,
    SetTablePop,
    SetTable,
    SetListW,
    SetList,
    SetMap,
    NeqOp,
    EqOp,
    LtOp,
    LeOp,
    GtOp,
    GeOp,
    AddOp,
    SubOp,
    MultOp,
    DivOp,
    PowOp,
    ConcOp,
    MinusOp,
    NotOp,
    OnTJmpW,
    OnTJmp,
    OnFJmpW,
    OnFJmp,
    JmpW,
    Jmp,
    IfFJmpW,
    IfFJmp,
    IfTUpJmpW,
    IfTUpJmp,
    IfFUpJmpW,
    IfFUpJmp,
    ClosureW,
    Closure,
    SetLineW,
    SetLine,
    LongArgW,
    LongArg,
    CheckStack,
}

const ALL: [OpCode; 64] = {
    use OpCode::*;
    [
        EndCode, RetCode, Call, TailCall, PushNil, Pop, PushNumberW, PushNumber,
        PushNumberNegW, PushNumberNeg, PushConstantW, PushConstant, PushUpvalue, PushLocal,
        GetGlobalW, GetGlobal, GetTable, GetDottedW, GetDotted, PushSelfW, PushSelf,
        CreateArrayW, CreateArray, SetLocal, SetGlobalW, SetGlobal, SetTablePop, SetTable,
        SetListW, SetList, SetMap, NeqOp, EqOp, LtOp, LeOp, GtOp, GeOp, AddOp, SubOp, MultOp,
        DivOp, PowOp, ConcOp, MinusOp, NotOp, OnTJmpW, OnTJmp, OnFJmpW, OnFJmp, JmpW, Jmp,
        IfFJmpW, IfFJmp, IfTUpJmpW, IfTUpJmp, IfFUpJmpW, IfFUpJmp, ClosureW, Closure, SetLineW,
        SetLine, LongArgW, LongArg, CheckStack,
    ]
};

impl OpCode {
    pub fn from_u8(byte: u8) -> Option<OpCode> {
        ALL.get(byte as usize).copied()
    }

    pub fn operands(self) -> Operands {
        use OpCode::*;
        match self {
            EndCode | GetTable | SetTablePop | NeqOp | EqOp | LtOp | LeOp | GtOp | GeOp
            | AddOp | SubOp | MultOp | DivOp | PowOp | ConcOp | MinusOp | NotOp => Operands::None,
            Call | TailCall | SetList | Closure => Operands::ByteByte,
            SetListW | ClosureW => Operands::WordByte,
            PushNumberW | PushNumberNegW | PushConstantW | GetGlobalW | GetDottedW | PushSelfW
            | CreateArrayW | SetGlobalW | OnTJmpW | OnFJmpW | JmpW | IfFJmpW | IfTUpJmpW
            | IfFUpJmpW | SetLineW | LongArgW => Operands::Word,
            _ => Operands::Byte,
        }
    }

    /// The narrow form of a `W` opcode; other opcodes map to themselves.
    pub fn base(self) -> OpCode {
        use OpCode::*;
        match self {
            PushNumberW => PushNumber,
            PushNumberNegW => PushNumberNeg,
            PushConstantW => PushConstant,
            GetGlobalW => GetGlobal,
            GetDottedW => GetDotted,
            PushSelfW => PushSelf,
            CreateArrayW => CreateArray,
            SetGlobalW => SetGlobal,
            SetListW => SetList,
            OnTJmpW => OnTJmp,
            OnFJmpW => OnFJmp,
            JmpW => Jmp,
            IfFJmpW => IfFJmp,
            IfTUpJmpW => IfTUpJmp,
            IfFUpJmpW => IfFUpJmp,
            ClosureW => Closure,
            SetLineW => SetLine,
            LongArgW => LongArg,
            other => other,
        }
    }

    /// The `W` form of a narrow opcode, if it has one.
    pub fn wide(self) -> Option<OpCode> {
        use OpCode::*;
        Some(match self.base() {
            PushNumber => PushNumberW,
            PushNumberNeg => PushNumberNegW,
            PushConstant => PushConstantW,
            GetGlobal => GetGlobalW,
            GetDotted => GetDottedW,
            PushSelf => PushSelfW,
            CreateArray => CreateArrayW,
            SetGlobal => SetGlobalW,
            SetList => SetListW,
            OnTJmp => OnTJmpW,
            OnFJmp => OnFJmpW,
            Jmp => JmpW,
            IfFJmp => IfFJmpW,
            IfTUpJmp => IfTUpJmpW,
            IfFUpJmp => IfFUpJmpW,
            Closure => ClosureW,
            SetLine => SetLineW,
            LongArg => LongArgW,
            _ => return None,
        })
    }

    pub fn is_wide(self) -> bool {
        self.base() != self
    }

    /// Jumps whose offset is subtracted from the pc.
    pub fn is_backward_jump(self) -> bool {
        matches!(self.base(), OpCode::IfTUpJmp | OpCode::IfFUpJmp)
    }

    pub fn is_jump(self) -> bool {
        use OpCode::*;
        matches!(
            self.base(),
            OnTJmp | OnFJmp | Jmp | IfFJmp | IfTUpJmp | IfFUpJmp
        )
    }

    pub fn name(self) -> &'static str {
        use OpCode::*;
        match self {
            EndCode => "ENDCODE",
            RetCode => "RETCODE",
            Call => "CALL",
            TailCall => "TAILCALL",
            PushNil => "PUSHNIL",
            Pop => "POP",
            PushNumberW => "PUSHNUMBERW",
            PushNumber => "PUSHNUMBER",
            PushNumberNegW => "PUSHNUMBERNEGW",
            PushNumberNeg => "PUSHNUMBERNEG",
            PushConstantW => "PUSHCONSTANTW",
            PushConstant => "PUSHCONSTANT",
            PushUpvalue => "PUSHUPVALUE",
            PushLocal => "PUSHLOCAL",
            GetGlobalW => "GETGLOBALW",
            GetGlobal => "GETGLOBAL",
            GetTable => "GETTABLE",
            GetDottedW => "GETDOTTEDW",
            GetDotted => "GETDOTTED",
            PushSelfW => "PUSHSELFW",
            PushSelf => "PUSHSELF",
            CreateArrayW => "CREATEARRAYW",
            CreateArray => "CREATEARRAY",
            SetLocal => "SETLOCAL",
            SetGlobalW => "SETGLOBALW",
            SetGlobal => "SETGLOBAL",
            SetTablePop => "SETTABLEPOP",
            SetTable => "SETTABLE",
            SetListW => "SETLISTW",
            SetList => "SETLIST",
            SetMap => "SETMAP",
            NeqOp => "NEQOP",
            EqOp => "EQOP",
            LtOp => "LTOP",
            LeOp => "LEOP",
            GtOp => "GTOP",
            GeOp => "GEOP",
            AddOp => "ADDOP",
            SubOp => "SUBOP",
            MultOp => "MULTOP",
            DivOp => "DIVOP",
            PowOp => "POWOP",
            ConcOp => "CONCOP",
            MinusOp => "MINUSOP",
            NotOp => "NOTOP",
            OnTJmpW => "ONTJMPW",
            OnTJmp => "ONTJMP",
            OnFJmpW => "ONFJMPW",
            OnFJmp => "ONFJMP",
            JmpW => "JMPW",
            Jmp => "JMP",
            IfFJmpW => "IFFJMPW",
            IfFJmp => "IFFJMP",
            IfTUpJmpW => "IFTUPJMPW",
            IfTUpJmp => "IFTUPJMP",
            IfFUpJmpW => "IFFUPJMPW",
            IfFUpJmp => "IFFUPJMP",
            ClosureW => "CLOSUREW",
            Closure => "CLOSURE",
            SetLineW => "SETLINEW",
            SetLine => "SETLINE",
            LongArgW => "LONGARGW",
            LongArg => "LONGARG",
            CheckStack => "CHECKSTACK",
        }
    }
}

impl fmt::Display for OpCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A decoded instruction. `LONGARG` prefixes are folded into `a`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Instruction {
    /// Opcode as encoded (may be a `W` form).
    pub raw: OpCode,
    /// Narrow form of `raw`; what the interpreter dispatches on.
    pub op: OpCode,
    /// First operand.
    pub a: u32,
    /// Second operand (`ByteByte` / `WordByte` layouts only).
    pub b: u8,
    /// Offset of the first byte (including prefixes).
    pub pc: usize,
    /// Offset just past the instruction; jump offsets are relative to this.
    pub next_pc: usize,
}

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("unknown opcode {byte} at pc {pc}")]
    UnknownOpcode { byte: u8, pc: usize },
    #[error("instruction truncated at pc {pc}")]
    Truncated { pc: usize },
    #[error("operand overflow at pc {pc}")]
    OperandOverflow { pc: usize },
}

/// Decode the instruction at `pc`.
pub fn decode(code: &[u8], pc: usize) -> Result<Instruction, DecodeError> {
    let mut at = pc;
    let mut prefix: u32 = 0;
    loop {
        let byte = *code.get(at).ok_or(DecodeError::Truncated { pc: at })?;
        let raw = OpCode::from_u8(byte).ok_or(DecodeError::UnknownOpcode { byte, pc: at })?;
        let operands = raw.operands();
        let start = at + 1;
        let end = start + operands.size();
        let bytes = code.get(start..end).ok_or(DecodeError::Truncated { pc: at })?;
        let (a, b) = match operands {
            Operands::None => (0, 0),
            Operands::Byte => (bytes[0] as u32, 0),
            Operands::Word => (word(bytes[0], bytes[1]), 0),
            Operands::ByteByte => (bytes[0] as u32, bytes[1]),
            Operands::WordByte => (word(bytes[0], bytes[1]), bytes[2]),
        };
        let a = prefix
            .checked_add(a)
            .ok_or(DecodeError::OperandOverflow { pc: at })?;
        if raw.base() == OpCode::LongArg {
            prefix = a
                .checked_mul(1 << 16)
                .ok_or(DecodeError::OperandOverflow { pc: at })?;
            at = end;
            continue;
        }
        return Ok(Instruction {
            raw,
            op: raw.base(),
            a,
            b,
            pc,
            next_pc: end,
        });
    }
}

#[inline]
fn word(hi: u8, lo: u8) -> u32 {
    ((hi as u32) << 8) | lo as u32
}

/// Iterate the instructions of a code array (after the two header bytes).
pub fn instructions(code: &[u8]) -> impl Iterator<Item = Result<Instruction, DecodeError>> + '_ {
    let mut pc = CODE_START.min(code.len());
    let mut failed = false;
    std::iter::from_fn(move || {
        if failed || pc >= code.len() {
            return None;
        }
        let r = decode(code, pc);
        match &r {
            Ok(inst) => pc = inst.next_pc,
            Err(_) => failed = true,
        }
        Some(r)
    })
}
