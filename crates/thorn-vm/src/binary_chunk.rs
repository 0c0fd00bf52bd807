//! Binary chunk serialization (dump) and deserialization (undump).
//!
//! Layout: a chunk marker byte, the `"Lua"` signature, a version byte and a
//! number-size byte, then the root function. Integers are big-endian 16-bit
//! words; a "long" is a high word followed by a low word. Numbers are either
//! length-prefixed decimal text (number size 0) or little-endian floats of
//! the stated width. Several chunks may follow each other in one stream.

use thiserror::Error;
use thorn_bytecode::proto::{Constant, LocalVar, Proto};
use thorn_core::object::str_to_number;
use std::rc::Rc;

pub const ID_CHUNK: u8 = 27;
pub const SIGNATURE: &[u8; 3] = b"Lua";
pub const VERSION_MIN: u8 = 0x31;
pub const VERSION_MAX: u8 = 0x32;
/// Written after the header of native-number chunks to detect format skew.
pub const TEST_NUMBER: f64 = 3.14159265358979323846E8;

const TAG_NUMBER: u8 = 1;
const TAG_STRING: u8 = 2;
const TAG_PROTO: u8 = 4;
const TAG_NIL: u8 = 6;

/// Nested prototypes deeper than this are rejected.
const MAX_NESTING: u32 = 200;

/// How numeric constants are stored in a written chunk.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum NumberFormat {
    /// Length byte followed by ASCII decimal text.
    Text,
    /// 4-byte little-endian IEEE float.
    #[default]
    Float32,
    /// 8-byte little-endian IEEE double.
    Float64,
}

impl NumberFormat {
    fn size_byte(self) -> u8 {
        match self {
            NumberFormat::Text => 0,
            NumberFormat::Float32 => 4,
            NumberFormat::Float64 => 8,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Error)]
pub enum ChunkError {
    #[error("not a binary chunk (first byte {found:#04x})")]
    NotAChunk { found: u8 },
    #[error("bad signature {found:?}")]
    BadSignature { found: Vec<u8> },
    #[error("unsupported version {found:#04x}; expected {min:#04x}..={max:#04x}")]
    UnsupportedVersion { found: u8, min: u8, max: u8 },
    #[error("unknown number size {found}")]
    UnknownNumberSize { found: u8 },
    #[error("bad number format: read {found}, expected {expected}")]
    BadNumberFormat { found: f64, expected: f64 },
    #[error("bad number {text:?}")]
    BadNumber { text: String },
    #[error("bad constant tag {tag}")]
    BadConstantTag { tag: u8 },
    #[error("truncated chunk at offset {offset}")]
    Truncated { offset: usize },
    #[error("{what} too large ({value})")]
    Oversized { what: &'static str, value: u64 },
}

// ---- Undump ----

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Reader { data, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn at_end(&self) -> bool {
        self.pos >= self.data.len()
    }

    fn read_byte(&mut self) -> Result<u8, ChunkError> {
        let b = *self
            .data
            .get(self.pos)
            .ok_or(ChunkError::Truncated { offset: self.pos })?;
        self.pos += 1;
        Ok(b)
    }

    fn read_bytes(&mut self, n: usize) -> Result<&'a [u8], ChunkError> {
        if n > self.remaining() {
            return Err(ChunkError::Truncated {
                offset: self.data.len(),
            });
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn read_word(&mut self) -> Result<u32, ChunkError> {
        let hi = self.read_byte()? as u32;
        let lo = self.read_byte()? as u32;
        Ok((hi << 8) | lo)
    }

    fn read_long(&mut self) -> Result<u32, ChunkError> {
        let hi = self.read_word()?;
        let lo = self.read_word()?;
        Ok((hi << 16) | lo)
    }

    /// A length or count that must fit in what is left of the input.
    fn read_len(&mut self, what: &'static str) -> Result<usize, ChunkError> {
        let n = self.read_long()? as usize;
        if n > self.remaining() {
            return Err(ChunkError::Oversized {
                what,
                value: n as u64,
            });
        }
        Ok(n)
    }

    /// Length-prefixed string; the length counts a trailing NUL. Zero means absent.
    fn read_string(&mut self) -> Result<Option<Vec<u8>>, ChunkError> {
        let size = self.read_len("string")?;
        if size == 0 {
            return Ok(None);
        }
        let bytes = self.read_bytes(size)?;
        Ok(Some(bytes[..size - 1].to_vec()))
    }

    fn read_number(&mut self, size: u8) -> Result<f32, ChunkError> {
        match size {
            0 => {
                let len = self.read_byte()? as usize;
                let bytes = self.read_bytes(len)?;
                str_to_number(bytes).ok_or_else(|| ChunkError::BadNumber {
                    text: String::from_utf8_lossy(bytes).into_owned(),
                })
            }
            4 => {
                let b = self.read_bytes(4)?;
                Ok(f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            }
            8 => {
                let b = self.read_bytes(8)?;
                let d = f64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]);
                Ok(d as f32)
            }
            found => Err(ChunkError::UnknownNumberSize { found }),
        }
    }
}

/// True when `data` starts with the chunk marker.
pub fn is_chunk(data: &[u8]) -> bool {
    data.first() == Some(&ID_CHUNK)
}

/// Load the first chunk in `data`. `name` becomes the source of functions
/// that do not carry one.
pub fn undump(data: &[u8], name: &str) -> Result<Proto, ChunkError> {
    let mut reader = Reader::new(data);
    let marker = reader.read_byte()?;
    if marker != ID_CHUNK {
        return Err(ChunkError::NotAChunk { found: marker });
    }
    load_chunk(&mut reader, name)
}

/// Load every chunk in `data`, in order.
pub fn load_chunks(data: &[u8], name: &str) -> Result<Vec<Proto>, ChunkError> {
    let mut reader = Reader::new(data);
    let mut chunks = Vec::new();
    loop {
        let marker = reader.read_byte()?;
        if marker != ID_CHUNK {
            return Err(ChunkError::NotAChunk { found: marker });
        }
        chunks.push(load_chunk(&mut reader, name)?);
        if reader.at_end() {
            return Ok(chunks);
        }
    }
}

fn load_chunk(reader: &mut Reader, name: &str) -> Result<Proto, ChunkError> {
    let number_size = load_header(reader)?;
    let proto = load_function(reader, name, number_size, 0)?;
    tracing::debug!(
        chunk = name,
        code_bytes = proto.code.len(),
        constants = proto.constants.len(),
        "loaded chunk"
    );
    Ok(proto)
}

fn load_header(reader: &mut Reader) -> Result<u8, ChunkError> {
    let sig = reader.read_bytes(SIGNATURE.len())?;
    if sig != SIGNATURE {
        return Err(ChunkError::BadSignature { found: sig.to_vec() });
    }
    let version = reader.read_byte()?;
    if !(VERSION_MIN..=VERSION_MAX).contains(&version) {
        return Err(ChunkError::UnsupportedVersion {
            found: version,
            min: VERSION_MIN,
            max: VERSION_MAX,
        });
    }
    let number_size = reader.read_byte()?;
    match number_size {
        0 => {}
        4 => {
            let b = reader.read_bytes(4)?;
            let found = f32::from_le_bytes([b[0], b[1], b[2], b[3]]);
            if found != TEST_NUMBER as f32 {
                return Err(ChunkError::BadNumberFormat {
                    found: found as f64,
                    expected: TEST_NUMBER as f32 as f64,
                });
            }
        }
        8 => {
            let b = reader.read_bytes(8)?;
            let found = f64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]);
            if found != TEST_NUMBER {
                return Err(ChunkError::BadNumberFormat {
                    found,
                    expected: TEST_NUMBER,
                });
            }
        }
        found => return Err(ChunkError::UnknownNumberSize { found }),
    }
    Ok(number_size)
}

fn load_function(
    reader: &mut Reader,
    name: &str,
    number_size: u8,
    depth: u32,
) -> Result<Proto, ChunkError> {
    if depth > MAX_NESTING {
        return Err(ChunkError::Oversized {
            what: "function nesting",
            value: depth as u64,
        });
    }
    let line_defined = reader.read_long()? as i32;
    let source = match reader.read_string()? {
        Some(s) if !s.is_empty() => String::from_utf8_lossy(&s).into_owned(),
        _ => name.to_string(),
    };

    let code_len = reader.read_len("code")?;
    let code = reader.read_bytes(code_len)?.to_vec();

    let num_locals = reader.read_len("locals")?;
    let mut locals = Vec::with_capacity(num_locals);
    for _ in 0..num_locals {
        let line = reader.read_long()? as i32;
        let name = reader
            .read_string()?
            .filter(|n| !n.is_empty())
            .map(|n| String::from_utf8_lossy(&n).into_owned());
        locals.push(LocalVar { name, line });
    }

    let num_constants = reader.read_len("constants")?;
    let mut constants = Vec::with_capacity(num_constants);
    for _ in 0..num_constants {
        let tag = reader.read_byte()?;
        let k = match tag {
            TAG_NUMBER => Constant::Number(reader.read_number(number_size)?),
            TAG_STRING => Constant::String(reader.read_string()?.unwrap_or_default()),
            TAG_PROTO => Constant::Proto(Rc::new(load_function(
                reader,
                name,
                number_size,
                depth + 1,
            )?)),
            TAG_NIL => Constant::Nil,
            tag => return Err(ChunkError::BadConstantTag { tag }),
        };
        constants.push(k);
    }

    Ok(Proto {
        source,
        line_defined,
        code,
        constants,
        locals,
    })
}

// ---- Dump ----

/// Serialize `proto` and its nested functions as one chunk.
pub fn dump(proto: &Proto, format: NumberFormat) -> Result<Vec<u8>, ChunkError> {
    let mut out = Vec::new();
    out.push(ID_CHUNK);
    out.extend_from_slice(SIGNATURE);
    out.push(VERSION_MAX);
    out.push(format.size_byte());
    match format {
        NumberFormat::Text => {}
        NumberFormat::Float32 => out.extend_from_slice(&(TEST_NUMBER as f32).to_le_bytes()),
        NumberFormat::Float64 => out.extend_from_slice(&TEST_NUMBER.to_le_bytes()),
    }
    write_function(&mut out, proto, format)?;
    Ok(out)
}

fn write_word(out: &mut Vec<u8>, w: u16) {
    out.extend_from_slice(&w.to_be_bytes());
}

fn write_long(out: &mut Vec<u8>, n: u32) {
    write_word(out, (n >> 16) as u16);
    write_word(out, n as u16);
}

fn write_len(out: &mut Vec<u8>, what: &'static str, n: usize) -> Result<(), ChunkError> {
    let n = u32::try_from(n).map_err(|_| ChunkError::Oversized {
        what,
        value: n as u64,
    })?;
    write_long(out, n);
    Ok(())
}

fn write_string(out: &mut Vec<u8>, s: Option<&[u8]>) -> Result<(), ChunkError> {
    match s {
        None => write_long(out, 0),
        Some(bytes) => {
            write_len(out, "string", bytes.len() + 1)?;
            out.extend_from_slice(bytes);
            out.push(0);
        }
    }
    Ok(())
}

fn write_number(out: &mut Vec<u8>, n: f32, format: NumberFormat) -> Result<(), ChunkError> {
    match format {
        NumberFormat::Text => {
            let text = format!("{n:e}");
            if !n.is_finite() {
                return Err(ChunkError::BadNumber { text });
            }
            out.push(text.len() as u8);
            out.extend_from_slice(text.as_bytes());
        }
        NumberFormat::Float32 => out.extend_from_slice(&n.to_le_bytes()),
        NumberFormat::Float64 => out.extend_from_slice(&(n as f64).to_le_bytes()),
    }
    Ok(())
}

fn write_function(out: &mut Vec<u8>, proto: &Proto, format: NumberFormat) -> Result<(), ChunkError> {
    write_long(out, proto.line_defined as u32);
    if proto.source.is_empty() {
        write_string(out, None)?;
    } else {
        write_string(out, Some(proto.source.as_bytes()))?;
    }

    write_len(out, "code", proto.code.len())?;
    out.extend_from_slice(&proto.code);

    write_len(out, "locals", proto.locals.len())?;
    for local in &proto.locals {
        write_long(out, local.line as u32);
        write_string(out, local.name.as_deref().map(str::as_bytes))?;
    }

    write_len(out, "constants", proto.constants.len())?;
    for k in &proto.constants {
        match k {
            Constant::Number(n) => {
                out.push(TAG_NUMBER);
                write_number(out, *n, format)?;
            }
            Constant::String(s) => {
                out.push(TAG_STRING);
                write_string(out, Some(s))?;
            }
            Constant::Proto(p) => {
                out.push(TAG_PROTO);
                write_function(out, p, format)?;
            }
            Constant::Nil => out.push(TAG_NIL),
        }
    }
    Ok(())
}
