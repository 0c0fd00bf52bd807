//! Automatic conversions between numbers and strings.

use thorn_core::object::{format_number, str_to_number};
use thorn_core::string::StringInterner;
use thorn_core::value::Value;

/// Numeric value of `v`: numbers as-is, numeric strings parsed.
pub fn to_number(v: Value, strings: &StringInterner) -> Option<f32> {
    match v {
        Value::Number(n) => Some(n),
        Value::String(id) => str_to_number(strings.get_bytes(id)),
        _ => None,
    }
}

/// Bytes of `v` for concatenation: strings as-is, numbers formatted.
pub fn to_concat_bytes(v: Value, strings: &StringInterner) -> Option<Vec<u8>> {
    match v {
        Value::String(id) => Some(strings.get_bytes(id).to_vec()),
        Value::Number(n) => Some(format_number(n).into_bytes()),
        _ => None,
    }
}
