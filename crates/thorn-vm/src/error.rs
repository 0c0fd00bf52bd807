//! Runtime error types.

use crate::binary_chunk::ChunkError;
use std::fmt;
use thiserror::Error;
use thorn_core::gc::NativeError;

/// Which resource ceiling was hit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Limit {
    /// Instruction budget (dispatched opcodes plus calls).
    Instructions(u64),
    /// Nested call frames.
    CallDepth(usize),
}

impl fmt::Display for Limit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Limit::Instructions(max) => write!(f, "instruction budget of {max} exhausted"),
            Limit::CallDepth(max) => write!(f, "call depth limit of {max} exceeded"),
        }
    }
}

/// Where an error was raised: source name, current line and opcode.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Location {
    pub source: String,
    pub line: u32,
    pub op: Option<&'static str>,
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:", self.source, self.line)?;
        if let Some(op) = self.op {
            write!(f, " ({op})")?;
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Error)]
pub enum VmError {
    #[error("bad chunk: {0}")]
    Chunk(#[from] ChunkError),
    #[error("{location} {message}")]
    Type { message: String, location: Location },
    #[error("{location} {message}")]
    Runtime { message: String, location: Location },
    #[error("{location} malformed bytecode: {message}")]
    Bytecode { message: String, location: Location },
    #[error("limits exceeded: {0}")]
    LimitsExceeded(Limit),
    #[error("source text given but no compiler is installed")]
    NoCompiler,
    #[error("compile error: {0}")]
    Compile(String),
}

impl VmError {
    /// The message without its location prefix.
    pub fn message(&self) -> String {
        match self {
            VmError::Type { message, .. }
            | VmError::Runtime { message, .. }
            | VmError::Bytecode { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }

    pub fn location(&self) -> Option<&Location> {
        match self {
            VmError::Type { location, .. }
            | VmError::Runtime { location, .. }
            | VmError::Bytecode { location, .. } => Some(location),
            _ => None,
        }
    }

    pub fn is_limit(&self) -> bool {
        matches!(self, VmError::LimitsExceeded(_))
    }

    pub(crate) fn from_native(e: NativeError, location: Location) -> Self {
        match e {
            NativeError::Type(message) => VmError::Type { message, location },
            NativeError::Message(message) => VmError::Runtime { message, location },
        }
    }
}
