use super::helpers::*;
use std::rc::Rc;
use thorn_bytecode::opcode::OpCode;
use thorn_bytecode::proto::Proto;
use thorn_vm::{Runtime, RuntimeConfig, Value};

fn with_threshold(gc_threshold: usize) -> Runtime {
    Runtime::with_config(RuntimeConfig {
        gc_threshold,
        ..RuntimeConfig::default()
    })
}

/// `last = {}; last[1] = "item" .. i; return last`
fn replace_last() -> Rc<Proto> {
    Rc::new(assemble(|b| {
        b.create_array(0).set_global("last");
        b.get_global("last")
            .push_number(1.0)
            .push_string("item")
            .get_global("i")
            .op(OpCode::ConcOp)
            .set_table_pop();
        b.get_global("last").ret(0);
    }))
}

#[test]
fn test_repeated_invocations_keep_heap_flat() {
    let mut rt = with_threshold(16);
    let proto = replace_last();
    let mut baseline = None;
    let mut peak = 0;
    for i in 0..500 {
        rt.set_global("i", Value::Number(i as f32));
        rt.execute(&proto).unwrap();
        if i == 50 {
            rt.collect_garbage();
            baseline = Some((rt.heap().live_objects(), rt.strings().len()));
        }
        peak = peak.max(rt.heap().live_objects());
    }
    let (objects, strings) = baseline.unwrap();
    assert!(peak < objects + 64, "heap grew to {peak} from {objects}");

    let stats = rt.collect_garbage();
    assert_eq!(stats.live_objects, objects);
    assert_eq!(stats.live_strings, strings);
}

#[test]
fn test_latest_results_and_globals_survive_collection() {
    let mut rt = with_threshold(0);
    let proto = replace_last();
    rt.set_global("i", Value::Number(7.0));
    let t = rt.execute(&proto).unwrap().first().as_table().unwrap();
    rt.collect_garbage();

    assert_eq!(rt.get_global("last"), Value::Table(t));
    let item = rt.heap().get_table(t).get_int(1);
    assert_eq!(rt.tostring(item), "item7");
    assert!(rt.get_global("print").is_function());
}

#[test]
fn test_host_envs_and_natives_survive_collection() {
    let mut rt = with_threshold(0);
    let env = rt.new_env();
    let twice = rt.register_native("twice", |ctx| {
        let x = ctx.check_number(0, "twice")?;
        Ok(vec![Value::Number(x * 2.0)])
    });
    let name = rt.new_string("scratch");
    rt.heap_mut().get_table_mut(env).set(name, Value::Number(3.0)).unwrap();
    rt.collect_garbage();

    assert_eq!(rt.get_field(Value::Table(env), "scratch"), Value::Number(3.0));
    let exec = rt.call(twice, &[Value::Number(4.0)]).unwrap();
    assert_eq!(exec.first(), Value::Number(8.0));
}

#[test]
fn test_unreachable_cycle_is_freed() {
    let mut rt = with_threshold(0);
    let before = rt.collect_garbage().live_objects;
    let a = rt.new_table().as_table().unwrap();
    let b = rt.new_table().as_table().unwrap();
    rt.heap_mut().get_table_mut(a).set_int(1, Value::Table(b));
    rt.heap_mut().get_table_mut(b).set_int(1, Value::Table(a));

    let stats = rt.collect_garbage();
    assert_eq!(stats.freed_objects, 2);
    assert_eq!(stats.live_objects, before);
}

#[test]
fn test_zero_threshold_leaves_collection_to_host() {
    let mut rt = with_threshold(0);
    let proto = replace_last();
    let before = rt.heap().live_objects();
    for i in 0..100 {
        rt.set_global("i", Value::Number(i as f32));
        rt.execute(&proto).unwrap();
    }
    assert!(rt.heap().live_objects() >= before + 200);
    assert!(rt.collect_garbage().freed_objects >= 198);
}
