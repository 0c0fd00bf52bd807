//! Arithmetic, negation and concatenation.
//!
//! Errors are returned as bare messages; the dispatch loop attaches the
//! location.

use crate::coerce;
use thorn_core::string::StringInterner;
use thorn_core::value::Value;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
}

fn arith_error(a: Value, b: Value, strings: &StringInterner) -> String {
    let culprit = if coerce::to_number(a, strings).is_none() { a } else { b };
    format!("attempt to perform arithmetic on a {} value", culprit.type_name())
}

/// Binary arithmetic on numbers and numeric strings.
pub fn arith_op(op: ArithOp, a: Value, b: Value, strings: &StringInterner) -> Result<Value, String> {
    let (Some(x), Some(y)) = (coerce::to_number(a, strings), coerce::to_number(b, strings)) else {
        return Err(arith_error(a, b, strings));
    };
    let r = match op {
        ArithOp::Add => x + y,
        ArithOp::Sub => x - y,
        ArithOp::Mul => x * y,
        ArithOp::Div => x / y,
        ArithOp::Pow => x.powf(y),
    };
    Ok(Value::Number(r))
}

pub fn negate(v: Value, strings: &StringInterner) -> Result<Value, String> {
    match coerce::to_number(v, strings) {
        Some(n) => Ok(Value::Number(-n)),
        None => Err(arith_error(v, v, strings)),
    }
}

/// `a .. b`; numbers are formatted, anything else is an error.
pub fn concat(a: Value, b: Value, strings: &mut StringInterner) -> Result<Value, String> {
    match (
        coerce::to_concat_bytes(a, strings),
        coerce::to_concat_bytes(b, strings),
    ) {
        (Some(mut x), Some(y)) => {
            x.extend_from_slice(&y);
            Ok(Value::String(strings.intern(&x)))
        }
        (None, _) => Err(format!("attempt to concatenate a {} value", a.type_name())),
        (_, None) => Err(format!("attempt to concatenate a {} value", b.type_name())),
    }
}
