use super::helpers::*;
use thorn_bytecode::opcode::OpCode;
use thorn_vm::{Runtime, VmError};

// ---- Basic operators ----

#[test]
fn test_binary_operators() {
    run_check_nums(
        |b| {
            b.push_number(7.0).push_number(2.0).op(OpCode::AddOp);
            b.push_number(7.0).push_number(2.0).op(OpCode::SubOp);
            b.push_number(7.0).push_number(2.0).op(OpCode::MultOp);
            b.push_number(7.0).push_number(2.0).op(OpCode::DivOp);
            b.push_number(2.0).push_number(10.0).op(OpCode::PowOp);
            b.ret(0);
        },
        &[9.0, 5.0, 14.0, 3.5, 1024.0],
    );
}

#[test]
fn test_unary_minus_and_not() {
    let r = run(|b| {
        b.push_number(4.0).op(OpCode::MinusOp);
        b.push_nil(1).op(OpCode::NotOp);
        b.push_number(0.0).op(OpCode::NotOp);
        b.ret(0);
    });
    assert_num(&r, 0, -4.0);
    assert_num(&r, 1, 1.0);
    // Zero is a true value; only nil is false.
    assert_nil(&r, 2);
}

#[test]
fn test_fractional_constants() {
    run_check_nums(
        |b| {
            b.push_number(0.5).push_number(0.25).op(OpCode::AddOp).ret(0);
        },
        &[0.75],
    );
}

#[test]
fn test_large_and_negative_literals() {
    run_check_nums(
        |b| {
            b.push_number(70000.0).push_number(-3.0).push_number(-1e10).ret(0);
        },
        &[70000.0, -3.0, -1e10],
    );
}

#[test]
fn test_division_by_zero() {
    let r = run(|b| {
        b.push_number(1.0).push_number(0.0).op(OpCode::DivOp).ret(0);
    });
    assert_num(&r, 0, f32::INFINITY);
}

// ---- Coercion ----

#[test]
fn test_numeric_string_arithmetic() {
    run_check_nums(
        |b| {
            b.push_string("10").push_number(5.0).op(OpCode::MultOp).ret(0);
        },
        &[50.0],
    );
}

#[test]
fn test_concat_numbers_and_strings() {
    let mut rt = Runtime::new();
    let r = run_in(&mut rt, |b| {
        b.push_string("n=").push_number(3.0).op(OpCode::ConcOp);
        b.push_number(1.5).push_number(2.0).op(OpCode::ConcOp);
        b.ret(0);
    });
    assert_str(&r, 0, "n=3", &rt);
    assert_str(&r, 1, "1.52", &rt);
}

#[test]
fn test_arithmetic_on_nil_fails() {
    let err = run_err(|b| {
        b.push_number(1.0).get_global("undefined").op(OpCode::AddOp).end_code();
    });
    assert!(matches!(err, VmError::Type { .. }), "{err:?}");
    assert_eq!(err.message(), "attempt to perform arithmetic on a nil value");
}

#[test]
fn test_arithmetic_on_word_fails() {
    let err = run_err(|b| {
        b.push_string("ten").push_number(1.0).op(OpCode::SubOp).end_code();
    });
    assert_eq!(err.message(), "attempt to perform arithmetic on a string value");
}

#[test]
fn test_concat_table_fails() {
    let err = run_err(|b| {
        b.push_string("x").create_array(0).op(OpCode::ConcOp).end_code();
    });
    assert_eq!(err.message(), "attempt to concatenate a table value");
}

// ---- Comparison ----

#[test]
fn test_comparisons_yield_one_or_nil() {
    let r = run(|b| {
        b.push_number(1.0).push_number(2.0).op(OpCode::LtOp);
        b.push_number(2.0).push_number(2.0).op(OpCode::LeOp);
        b.push_number(1.0).push_number(2.0).op(OpCode::GtOp);
        b.push_number(3.0).push_number(2.0).op(OpCode::GeOp);
        b.ret(0);
    });
    assert_num(&r, 0, 1.0);
    assert_num(&r, 1, 1.0);
    assert_nil(&r, 2);
    assert_num(&r, 3, 1.0);
}

#[test]
fn test_string_ordering() {
    let r = run(|b| {
        b.push_string("abc").push_string("abd").op(OpCode::LtOp);
        b.push_string("b").push_string("abc").op(OpCode::LtOp);
        b.ret(0);
    });
    assert_num(&r, 0, 1.0);
    assert_nil(&r, 1);
}

#[test]
fn test_equality_does_not_coerce() {
    let r = run(|b| {
        b.push_string("1").push_number(1.0).op(OpCode::EqOp);
        b.push_string("1").push_number(1.0).op(OpCode::NeqOp);
        b.push_string("a").push_string("a").op(OpCode::EqOp);
        b.ret(0);
    });
    assert_nil(&r, 0);
    assert_num(&r, 1, 1.0);
    assert_num(&r, 2, 1.0);
}

#[test]
fn test_tables_compare_by_identity() {
    let r = run(|b| {
        b.create_array(0).set_global("t");
        b.get_global("t").get_global("t").op(OpCode::EqOp);
        b.create_array(0).create_array(0).op(OpCode::EqOp);
        b.ret(0);
    });
    assert_num(&r, 0, 1.0);
    assert_nil(&r, 1);
}

#[test]
fn test_mixed_ordering_fails() {
    let err = run_err(|b| {
        b.push_number(1.0).push_string("2").op(OpCode::LtOp).end_code();
    });
    assert!(matches!(err, VmError::Type { .. }));
    assert_eq!(err.message(), "attempt to compare number with string");
}
