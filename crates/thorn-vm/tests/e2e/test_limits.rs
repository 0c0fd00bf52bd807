use super::helpers::*;
use proptest::prelude::*;
use std::rc::Rc;
use thorn_bytecode::builder::ProtoBuilder;
use thorn_bytecode::opcode::OpCode;
use thorn_bytecode::proto::Proto;
use thorn_vm::{Limit, Runtime, Value, VmError};

/// `while 1 do end`
fn infinite_loop() -> Proto {
    assemble(|b| {
        let body = b.new_label();
        let cond = b.new_label();
        b.jump(OpCode::Jmp, cond);
        b.place(body);
        b.place(cond);
        b.push_number(1.0);
        b.jump(OpCode::IfTUpJmp, body);
        b.end_code();
    })
}

/// `function down(n) return down(n - 1) + 0 end` with a base case at 0.
fn plain_recursion(b: &mut ProtoBuilder) {
    let f = function("=down", 1, |f| {
        let recurse = f.new_label();
        f.push_local(0).push_number(0.0).op(OpCode::EqOp);
        f.jump(OpCode::IfFJmp, recurse);
        f.push_number(0.0).ret(1);
        f.place(recurse);
        f.get_global("down")
            .push_local(0)
            .push_number(1.0)
            .op(OpCode::SubOp)
            .call(1, 1)
            .push_number(1.0)
            .op(OpCode::AddOp)
            .ret(1);
    });
    b.closure(f, 0).set_global("down");
}

/// `function loop(n) if n == 0 then return 0 end return loop(n - 1) end`
fn tail_recursion(b: &mut ProtoBuilder) {
    let f = function("=loop", 1, |f| {
        let recurse = f.new_label();
        f.push_local(0).push_number(0.0).op(OpCode::EqOp);
        f.jump(OpCode::IfFJmp, recurse);
        f.push_number(0.0).ret(1);
        f.place(recurse);
        f.get_global("loop")
            .push_local(0)
            .push_number(1.0)
            .op(OpCode::SubOp)
            .tail_call(1, 1);
    });
    b.closure(f, 0).set_global("loop");
}

// ---- Instruction budget ----

#[test]
fn test_infinite_loop_trips_budget() {
    let proto = Rc::new(infinite_loop());
    let mut rt = limited(10_000, 200);
    let err = rt.execute(&proto).unwrap_err();
    assert_eq!(err, VmError::LimitsExceeded(Limit::Instructions(10_000)));
    assert!(err.is_limit());
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_infinite_loop_always_terminates(budget in 1u64..20_000) {
        let proto = Rc::new(infinite_loop());
        let mut rt = Runtime::new();
        let env = rt.env();
        let err = rt.execute_with(&proto, env, budget).unwrap_err();
        prop_assert_eq!(err, VmError::LimitsExceeded(Limit::Instructions(budget)));
        prop_assert!(rt.instructions_used() > budget);
    }
}

#[test]
fn test_runtime_usable_after_limit() {
    let looping = Rc::new(infinite_loop());
    let mut rt = limited(500, 200);
    assert!(rt.execute(&looping).is_err());
    assert_eq!(rt.call_depth(), 0);
    let ok = Rc::new(assemble(|b| {
        b.push_number(3.0).ret(0);
    }));
    assert_eq!(rt.execute(&ok).unwrap().first(), Value::Number(3.0));
}

#[test]
fn test_native_calls_count_against_budget() {
    // Four instructions, the entry frame and the native call.
    let mut rt = limited(6, 200);
    let r = run_in(&mut rt, |b| {
        b.get_global("abs").push_number(-1.0).call(1, 1).ret(0);
    });
    assert_num(&r, 0, 1.0);
    assert_eq!(rt.instructions_used(), 6);

    let mut rt = limited(5, 200);
    let err = run_err_in(&mut rt, |b| {
        b.get_global("abs").push_number(-1.0).call(1, 1).ret(0);
    });
    assert!(err.is_limit());
}

// ---- Call depth ----

#[test]
fn test_deep_recursion_hits_call_depth() {
    let mut rt = limited(1_000_000, 100);
    let err = run_err_in(&mut rt, |b| {
        plain_recursion(b);
        b.get_global("down").push_number(500.0).call(1, 1).ret(0);
    });
    assert_eq!(err, VmError::LimitsExceeded(Limit::CallDepth(100)));
}

#[test]
fn test_shallow_recursion_completes() {
    let mut rt = limited(1_000_000, 100);
    let r = run_in(&mut rt, |b| {
        plain_recursion(b);
        b.get_global("down").push_number(50.0).call(1, 1).ret(0);
    });
    assert_num(&r, 0, 50.0);
}

#[test]
fn test_tail_recursion_reuses_frames() {
    // Far deeper than the frame limit allows for plain calls.
    let mut rt = limited(1_000_000, 10);
    let r = run_in(&mut rt, |b| {
        tail_recursion(b);
        b.get_global("loop").push_number(5_000.0).call(1, 1).ret(0);
    });
    assert_num(&r, 0, 0.0);
}

#[test]
fn test_tail_recursion_still_bounded_by_budget() {
    let mut rt = limited(2_000, 10);
    let err = run_err_in(&mut rt, |b| {
        tail_recursion(b);
        b.get_global("loop").push_number(1_000_000.0).call(1, 1).ret(0);
    });
    assert_eq!(err, VmError::LimitsExceeded(Limit::Instructions(2_000)));
}

#[test]
fn test_natives_calling_natives_hit_call_depth() {
    // t = {}; t[t] = foreach; foreach(t, foreach)
    let mut rt = limited(1_000_000, 50);
    let err = run_err_in(&mut rt, |b| {
        b.create_array(0).set_global("t");
        b.get_global("t").get_global("t").get_global("foreach").set_table_pop();
        b.get_global("foreach")
            .get_global("t")
            .get_global("foreach")
            .call(0, 2)
            .end_code();
    });
    assert_eq!(err, VmError::LimitsExceeded(Limit::CallDepth(50)));
    assert_eq!(rt.call_depth(), 0);
    assert_eq!(rt.stack_len(), 0);

    let r = run_in(&mut rt, |b| {
        b.push_number(1.0).ret(0);
    });
    assert_num(&r, 0, 1.0);
}

#[test]
fn test_callbacks_within_depth_complete() {
    // foreach(t, function(k, v) foreach(u, g) end) stays well inside the limit.
    let inner = function("=inner", 2, |f| {
        f.get_global("total")
            .push_local(1)
            .op(OpCode::AddOp)
            .set_global("total")
            .end_code();
    });
    let outer = function("=outer", 2, |f| {
        f.get_global("foreach").get_global("u").closure(inner, 0).call(0, 2).end_code();
    });
    let mut rt = limited(1_000_000, 5);
    let r = run_in(&mut rt, |b| {
        b.push_number(0.0).set_global("total");
        b.create_array(2).push_number(1.0).push_number(2.0).set_list(0, 2).set_global("t");
        b.create_array(2).push_number(10.0).push_number(20.0).set_list(0, 2).set_global("u");
        b.get_global("foreach").get_global("t").closure(outer, 0).call(0, 2);
        b.get_global("total").ret(0);
    });
    assert_num(&r, 0, 60.0);
}
