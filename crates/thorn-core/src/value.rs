//! Script values.
//!
//! The dialect has exactly six kinds of value. Numbers are single-precision
//! floats (there is no integer subtype); strings are interned, so two string
//! values are equal iff their ids are equal. Tables, closures and natives are
//! handles into the [`GcHeap`](crate::gc::GcHeap) arena and compare by identity.

use crate::gc::{Closure, GcIdx, NativeFunction};
use crate::string::StringId;
use crate::table::Table;

/// A script value.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub enum Value {
    #[default]
    Nil,
    Number(f32),
    String(StringId),
    Table(GcIdx<Table>),
    Closure(GcIdx<Closure>),
    Native(GcIdx<NativeFunction>),
}

/// A host enumeration that can be exposed to scripts.
///
/// Scripts only see numbers: each variant is coerced to its integral
/// discriminant.
pub trait ScriptEnum: Copy {
    fn discriminant(self) -> i64;
}

impl Value {
    #[inline]
    pub fn nil() -> Self {
        Value::Nil
    }

    #[inline]
    pub fn number(n: f32) -> Self {
        Value::Number(n)
    }

    /// Coerce a host enum variant to its numeric representation.
    pub fn from_enum<E: ScriptEnum>(e: E) -> Self {
        Value::Number(e.discriminant() as f32)
    }

    /// The canonical "true" produced by comparisons and `not nil`.
    #[inline]
    pub fn truth() -> Self {
        Value::Number(1.0)
    }

    /// `1` for true, `nil` for false.
    #[inline]
    pub fn from_bool(b: bool) -> Self {
        if b {
            Value::truth()
        } else {
            Value::Nil
        }
    }

    #[inline]
    pub fn is_nil(self) -> bool {
        matches!(self, Value::Nil)
    }

    /// Only nil is false.
    #[inline]
    pub fn is_falsy(self) -> bool {
        self.is_nil()
    }

    #[inline]
    pub fn is_truthy(self) -> bool {
        !self.is_nil()
    }

    #[inline]
    pub fn is_function(self) -> bool {
        matches!(self, Value::Closure(_) | Value::Native(_))
    }

    #[inline]
    pub fn as_number(self) -> Option<f32> {
        match self {
            Value::Number(n) => Some(n),
            _ => None,
        }
    }

    #[inline]
    pub fn as_string_id(self) -> Option<StringId> {
        match self {
            Value::String(id) => Some(id),
            _ => None,
        }
    }

    #[inline]
    pub fn as_table(self) -> Option<GcIdx<Table>> {
        match self {
            Value::Table(t) => Some(t),
            _ => None,
        }
    }

    #[inline]
    pub fn as_closure(self) -> Option<GcIdx<Closure>> {
        match self {
            Value::Closure(c) => Some(c),
            _ => None,
        }
    }

    #[inline]
    pub fn as_native(self) -> Option<GcIdx<NativeFunction>> {
        match self {
            Value::Native(n) => Some(n),
            _ => None,
        }
    }

    /// If this number is a whole value in `1..=u32::MAX`, return it as a sequence index.
    pub fn as_sequence_index(self) -> Option<usize> {
        match self {
            Value::Number(n) if n >= 1.0 && n.fract() == 0.0 && n <= u32::MAX as f32 => {
                Some(n as usize)
            }
            _ => None,
        }
    }

    /// The dialect's type name for this value.
    pub fn type_name(self) -> &'static str {
        match self {
            Value::Nil => "nil",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Table(_) => "table",
            Value::Closure(_) | Value::Native(_) => "function",
        }
    }
}

impl From<f32> for Value {
    fn from(n: f32) -> Self {
        Value::Number(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Number(n as f32)
    }
}

impl From<StringId> for Value {
    fn from(id: StringId) -> Self {
        Value::String(id)
    }
}

impl From<GcIdx<Table>> for Value {
    fn from(t: GcIdx<Table>) -> Self {
        Value::Table(t)
    }
}
