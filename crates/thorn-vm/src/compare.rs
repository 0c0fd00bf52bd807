//! Ordering comparisons. Equality is plain `Value` equality.

use thorn_core::string::StringInterner;
use thorn_core::value::Value;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompareOp {
    Lt,
    Le,
    Gt,
    Ge,
}

/// Numbers compare numerically, strings bytewise; any other pairing is an
/// error.
pub fn compare(op: CompareOp, a: Value, b: Value, strings: &StringInterner) -> Result<bool, String> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => Ok(match op {
            CompareOp::Lt => x < y,
            CompareOp::Le => x <= y,
            CompareOp::Gt => x > y,
            CompareOp::Ge => x >= y,
        }),
        (Value::String(x), Value::String(y)) => {
            let (x, y) = (strings.get_bytes(x), strings.get_bytes(y));
            Ok(match op {
                CompareOp::Lt => x < y,
                CompareOp::Le => x <= y,
                CompareOp::Gt => x > y,
                CompareOp::Ge => x >= y,
            })
        }
        _ => Err(format!(
            "attempt to compare {} with {}",
            a.type_name(),
            b.type_name()
        )),
    }
}

pub fn less_than(a: Value, b: Value, strings: &StringInterner) -> Result<bool, String> {
    compare(CompareOp::Lt, a, b, strings)
}
