use super::helpers::*;
use thorn_bytecode::builder::ProtoBuilder;
use thorn_bytecode::opcode::OpCode;

/// `if local0 < 0 then return "neg" elseif local0 == 0 then return "zero" else return "pos" end`
fn classify(b: &mut ProtoBuilder) {
    let not_neg = b.new_label();
    let not_zero = b.new_label();
    b.push_local(0).push_number(0.0).op(OpCode::LtOp);
    b.jump(OpCode::IfFJmp, not_neg);
    b.push_string("neg").ret(1);
    b.place(not_neg);
    b.push_local(0).push_number(0.0).op(OpCode::EqOp);
    b.jump(OpCode::IfFJmp, not_zero);
    b.push_string("zero").ret(1);
    b.place(not_zero);
    b.push_string("pos").ret(1);
}

#[test]
fn test_if_elseif_else() {
    let f = function("=classify", 1, classify);
    let mut rt = thorn_vm::Runtime::new();
    let r = run_in(&mut rt, |b| {
        b.closure(f, 0).set_global("classify");
        for n in [-3.0, 0.0, 8.0] {
            b.get_global("classify").push_number(n).call(1, 1);
        }
        b.ret(0);
    });
    assert_str(&r, 0, "neg", &rt);
    assert_str(&r, 1, "zero", &rt);
    assert_str(&r, 2, "pos", &rt);
}

#[test]
fn test_while_loop_sum() {
    // local i, s = 1, 0; while i <= 10 do s = s + i; i = i + 1 end; return s
    run_check_nums(
        |b| {
            b.push_number(1.0).push_number(0.0);
            let body = b.new_label();
            let cond = b.new_label();
            b.jump(OpCode::Jmp, cond);
            b.place(body);
            b.push_local(1).push_local(0).op(OpCode::AddOp).set_local(1);
            b.push_local(0).push_number(1.0).op(OpCode::AddOp).set_local(0);
            b.place(cond);
            b.push_local(0).push_number(10.0).op(OpCode::LeOp);
            b.jump(OpCode::IfTUpJmp, body);
            b.push_local(1).ret(2);
        },
        &[55.0],
    );
}

#[test]
fn test_repeat_until() {
    // local n = 0; repeat n = n + 3 until n > 10; return n
    run_check_nums(
        |b| {
            b.push_number(0.0);
            let top = b.new_label();
            b.place(top);
            b.push_local(0).push_number(3.0).op(OpCode::AddOp).set_local(0);
            b.push_local(0).push_number(10.0).op(OpCode::GtOp);
            b.jump(OpCode::IfFUpJmp, top);
            b.push_local(0).ret(1);
        },
        &[12.0],
    );
}

#[test]
fn test_and_short_circuits() {
    // return nil and undefined(), 1 and 2
    let r = run(|b| {
        let skip = b.new_label();
        b.push_nil(1).jump(OpCode::OnFJmp, skip);
        b.get_global("undefined").call(1, 0);
        b.place(skip);
        let skip2 = b.new_label();
        b.push_number(1.0).jump(OpCode::OnFJmp, skip2);
        b.push_number(2.0);
        b.place(skip2);
        b.ret(0);
    });
    assert_nil(&r, 0);
    assert_num(&r, 1, 2.0);
}

#[test]
fn test_or_short_circuits() {
    // return 5 or undefined(), nil or 6
    run_check_nums(
        |b| {
            let skip = b.new_label();
            b.push_number(5.0).jump(OpCode::OnTJmp, skip);
            b.get_global("undefined").call(1, 0);
            b.place(skip);
            let skip2 = b.new_label();
            b.push_nil(1).jump(OpCode::OnTJmp, skip2);
            b.push_number(6.0);
            b.place(skip2);
            b.ret(0);
        },
        &[5.0, 6.0],
    );
}

#[test]
fn test_long_jump_uses_wide_form() {
    // if nil then <many pushes/pops> end; return 1
    run_check_nums(
        |b| {
            let end = b.new_label();
            b.push_nil(1).jump(OpCode::IfFJmp, end);
            for _ in 0..200 {
                b.push_number(300.0).pop(1);
            }
            b.place(end);
            b.push_number(1.0).ret(0);
        },
        &[1.0],
    );
}

#[test]
fn test_pop_discards_values() {
    run_check_nums(
        |b| {
            b.push_number(1.0).push_number(2.0).push_number(3.0).pop(2).ret(0);
        },
        &[1.0],
    );
}

#[test]
fn test_push_nil_many() {
    let r = run(|b| {
        b.push_nil(4).ret(0);
    });
    assert_eq!(r.len(), 4);
    assert!(r.iter().all(|v| v.is_nil()));
}

#[test]
fn test_end_code_returns_nothing() {
    let r = run(|b| {
        b.push_number(1.0).end_code();
    });
    assert!(r.is_empty());
}
