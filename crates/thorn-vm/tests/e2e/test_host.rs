use super::helpers::*;
use std::cell::RefCell;
use std::rc::Rc;
use thorn_bytecode::opcode::{OpCode, MULT_RET};
use thorn_core::gc::NativeError;
use thorn_vm::{Runtime, ScriptEnum, Value, VmError};

#[derive(Clone, Copy)]
enum Weekday {
    Monday = 1,
    Wednesday = 3,
    Friday = 5,
}

impl ScriptEnum for Weekday {
    fn discriminant(self) -> i64 {
        self as i64
    }
}

/// Host table `M` with a native `pow`.
fn install_pow(rt: &mut Runtime) {
    let m = rt.new_table();
    let pow = rt.register_native("pow", |ctx| {
        let base = ctx.check_number(0, "pow")?;
        let exp = ctx.check_number(1, "pow")?;
        Ok(vec![Value::Number(base.powf(exp))])
    });
    let t = m.as_table().unwrap();
    let key = rt.new_string("pow");
    rt.heap_mut().get_table_mut(t).set(key, pow).unwrap();
    rt.set_global("M", m);
}

#[test]
fn test_pow_dotted_and_dynamic() {
    // return M.pow(2, 4), M["pow"](2, 4)
    let mut rt = Runtime::new();
    install_pow(&mut rt);
    let r = run_in(&mut rt, |b| {
        b.get_global("M").get_dotted("pow").push_number(2.0).push_number(4.0).call(1, 2);
        b.get_global("M")
            .push_string("pow")
            .get_table()
            .push_number(2.0)
            .push_number(4.0)
            .call(1, 2);
        b.ret(0);
    });
    assert_num(&r, 0, 16.0);
    assert_num(&r, 1, 16.0);
}

#[test]
fn test_enum_constants_add() {
    let mut rt = Runtime::new();
    rt.set_enum("MONDAY", Weekday::Monday);
    rt.set_enum("WEDNESDAY", Weekday::Wednesday);
    rt.set_enum("FRIDAY", Weekday::Friday);
    let r = run_in(&mut rt, |b| {
        b.get_global("WEDNESDAY").get_global("FRIDAY").op(OpCode::AddOp);
        b.get_global("MONDAY").ret(0);
    });
    assert_num(&r, 0, 8.0);
    assert_eq!(r[1], Value::from_enum(Weekday::Monday));
}

#[test]
fn test_script_globals_visible_to_host() {
    let mut rt = Runtime::new();
    let r = run_in(&mut rt, |b| {
        b.push_string("done").set_global("status");
        b.create_array(0).set_global("results").end_code();
    });
    assert!(r.is_empty());
    assert_eq!(rt.tostring(rt.get_global("status")), "done");
    assert!(rt.get_global("results").as_table().is_some());
}

#[test]
fn test_host_calls_script_function() {
    // function on_event(x) return x * 2 end
    let handler = function("=on_event", 1, |f| {
        f.push_local(0).push_number(2.0).op(OpCode::MultOp).ret(1);
    });
    let mut rt = Runtime::new();
    run_in(&mut rt, |b| {
        b.closure(handler, 0).set_global("on_event").end_code();
    });
    let f = rt.get_global("on_event");
    let exec = rt.call(f, &[Value::Number(21.0)]).unwrap();
    assert_eq!(exec.values, vec![Value::Number(42.0)]);
}

#[test]
fn test_host_calls_native() {
    let mut rt = Runtime::new();
    let abs = rt.get_global("abs");
    let exec = rt.call(abs, &[Value::Number(-2.5)]).unwrap();
    assert_eq!(exec.first(), Value::Number(2.5));
    let err = rt.call(Value::Number(1.0), &[]).unwrap_err();
    assert_eq!(err.message(), "attempt to call a number value");
}

#[test]
fn test_native_sees_arguments_in_order() {
    let seen = Rc::new(RefCell::new(Vec::new()));
    let log = Rc::clone(&seen);
    let mut rt = Runtime::new();
    rt.register_native("record", move |ctx| {
        log.borrow_mut().extend(ctx.args.iter().map(|v| v.as_number()));
        Ok(vec![])
    });
    run_in(&mut rt, |b| {
        b.get_global("record")
            .push_number(1.0)
            .push_number(2.0)
            .push_nil(1)
            .call(0, 3)
            .end_code();
    });
    assert_eq!(*seen.borrow(), vec![Some(1.0), Some(2.0), None]);
}

#[test]
fn test_native_errors_propagate() {
    let mut rt = Runtime::new();
    rt.register_native("fail", |_| Err(NativeError::Message("host said no".into())));
    rt.register_native("picky", |_| Err(NativeError::Type("wrong kind".into())));
    let err = run_err_in(&mut rt, |b| {
        b.set_line(12).get_global("fail").call(0, 0).end_code();
    });
    assert!(matches!(err, VmError::Runtime { .. }));
    assert_eq!(err.message(), "host said no");
    assert_eq!(err.location().unwrap().line, 12);
    assert_eq!(err.to_string(), "=test:12: (CALL) host said no");

    let err = run_err_in(&mut rt, |b| {
        b.get_global("picky").call(0, 0).end_code();
    });
    assert!(matches!(err, VmError::Type { .. }));
}

#[test]
fn test_output_sink_receives_fragments() {
    let fragments = Rc::new(RefCell::new(Vec::<String>::new()));
    let sink = Rc::clone(&fragments);
    let mut rt = Runtime::new();
    rt.set_output(move |s| sink.borrow_mut().push(s.to_string()));
    let exec = {
        let proto = Rc::new(assemble(|b| {
            b.get_global("write").push_string("a").call(0, 1);
            b.get_global("print").push_string("b").push_number(1.0).call(0, 2);
            b.end_code();
        }));
        rt.execute(&proto).unwrap()
    };
    assert_eq!(exec.output, "ab\t1\n");
    assert_eq!(fragments.borrow().concat(), "ab\t1\n");
}

#[test]
fn test_output_before_failure_is_kept() {
    let mut rt = Runtime::new();
    let err = run_err_in(&mut rt, |b| {
        b.get_global("print").push_string("partial").call(0, 1);
        b.get_global("error").push_string("stop").call(0, 1);
        b.end_code();
    });
    assert_eq!(err.message(), "stop");
    assert_eq!(rt.take_output(), "partial\n");
}

#[test]
fn test_separate_envs_do_not_leak() {
    let mut rt = Runtime::new();
    let proto = Rc::new(assemble(|b| {
        b.get_global("counter")
            .push_number(1.0)
            .op(OpCode::AddOp)
            .set_global("counter");
        b.get_global("counter").ret(0);
    }));
    let a = rt.new_env();
    let b = rt.new_env();
    let zero = Value::Number(0.0);
    for env in [a, b] {
        let key = rt.new_string("counter");
        rt.heap_mut().get_table_mut(env).set(key, zero).unwrap();
    }
    rt.execute_with(&proto, a, 1_000).unwrap();
    let exec = rt.execute_with(&proto, a, 1_000).unwrap();
    assert_eq!(exec.first(), Value::Number(2.0));
    let exec = rt.execute_with(&proto, b, 1_000).unwrap();
    assert_eq!(exec.first(), Value::Number(1.0));
}

#[test]
fn test_independent_runtimes_on_threads() {
    let handles: Vec<_> = (0..4)
        .map(|i| {
            std::thread::spawn(move || {
                let proto = Rc::new(assemble(|b| {
                    b.push_number(i as f32).push_number(10.0).op(OpCode::MultOp).ret(0);
                }));
                let mut rt = Runtime::new();
                rt.execute(&proto).unwrap().first().as_number()
            })
        })
        .collect();
    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert_eq!(results, vec![Some(0.0), Some(10.0), Some(20.0), Some(30.0)]);
}

#[test]
fn test_dump_value_renders_nested_tables() {
    // cfg = {k = {1}}
    let mut rt = Runtime::new();
    run_in(&mut rt, |b| {
        b.create_array(0)
            .push_string("k")
            .create_array(1)
            .push_number(1.0)
            .set_list(0, 1)
            .set_map(1)
            .set_global("cfg")
            .end_code();
    });
    let cfg = rt.get_global("cfg");
    assert_eq!(rt.dump_value(cfg, true), "{ k = { [1] = 1 } }");
    assert_eq!(rt.dump_value(cfg, false), "{\n  k = {\n    [1] = 1,\n  },\n}");
}

#[test]
fn test_result_of_call_multret_from_host_native() {
    let mut rt = Runtime::new();
    rt.register_native("pair", |ctx| {
        let a = ctx.new_string(b"left");
        Ok(vec![a, Value::Number(2.0)])
    });
    let r = run_in(&mut rt, |b| {
        b.get_global("pair").call(MULT_RET, 0).ret(0);
    });
    assert_str(&r, 0, "left", &rt);
    assert_num(&r, 1, 2.0);
}
