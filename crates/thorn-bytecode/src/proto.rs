/// Function prototypes: code, constants and debug locals.
use crate::opcode::{CODE_START, ZEROVARARG};
use std::rc::Rc;

/// A constant-pool entry. Nested functions are constants too.
#[derive(Clone, Debug, PartialEq)]
pub enum Constant {
    Nil,
    Number(f32),
    String(Vec<u8>),
    Proto(Rc<Proto>),
}

impl Constant {
    pub fn string(s: &str) -> Self {
        Constant::String(s.as_bytes().to_vec())
    }
}

/// A local variable debug entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LocalVar {
    /// `None` for an unnamed entry.
    pub name: Option<String>,
    /// Line the variable was declared on.
    pub line: i32,
}

/// A compiled function. Immutable once built; closures share it via `Rc`.
#[derive(Clone, Debug, PartialEq)]
pub struct Proto {
    /// Source name (for error messages).
    pub source: String,
    pub line_defined: i32,
    /// Raw code: stack size byte, parameter byte, then instructions.
    pub code: Vec<u8>,
    pub constants: Vec<Constant>,
    pub locals: Vec<LocalVar>,
}

impl Proto {
    pub fn new(source: impl Into<String>) -> Self {
        Proto {
            source: source.into(),
            line_defined: 0,
            code: vec![0, 0],
            constants: Vec::new(),
            locals: Vec::new(),
        }
    }

    /// Declared maximum stack size.
    pub fn max_stack(&self) -> usize {
        self.code.first().copied().unwrap_or(0) as usize
    }

    fn param_byte(&self) -> u8 {
        self.code.get(1).copied().unwrap_or(0)
    }

    pub fn num_params(&self) -> usize {
        let p = self.param_byte();
        if p >= ZEROVARARG {
            (p - ZEROVARARG) as usize
        } else {
            p as usize
        }
    }

    pub fn is_vararg(&self) -> bool {
        self.param_byte() >= ZEROVARARG
    }

    /// Instruction bytes (without the two header bytes).
    pub fn instructions(&self) -> &[u8] {
        self.code.get(CODE_START..).unwrap_or(&[])
    }

    /// Nested prototypes with their constant indices.
    pub fn nested(&self) -> impl Iterator<Item = (usize, &Rc<Proto>)> {
        self.constants.iter().enumerate().filter_map(|(i, k)| match k {
            Constant::Proto(p) => Some((i, p)),
            _ => None,
        })
    }

    /// Name of the local declared at `slot`, if the debug table has one.
    pub fn local_name(&self, slot: usize) -> Option<&str> {
        self.locals.get(slot).and_then(|l| l.name.as_deref())
    }
}
