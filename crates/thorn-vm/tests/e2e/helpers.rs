use std::rc::Rc;
use thorn_bytecode::builder::ProtoBuilder;
use thorn_bytecode::proto::Proto;
use thorn_vm::binary_chunk::{dump, NumberFormat};
use thorn_vm::{Runtime, RuntimeConfig, Value, VmError};

/// Assemble a main function named `=test`.
pub fn assemble(f: impl FnOnce(&mut ProtoBuilder)) -> Proto {
    let mut b = ProtoBuilder::new("=test");
    f(&mut b);
    b.build().unwrap_or_else(|e| panic!("assembly failed: {e}"))
}

/// Assemble a function with `params` fixed parameters.
pub fn function(name: &str, params: u8, f: impl FnOnce(&mut ProtoBuilder)) -> Proto {
    let mut b = ProtoBuilder::new(name).params(params);
    f(&mut b);
    b.build().unwrap_or_else(|e| panic!("assembly failed: {e}"))
}

/// Assemble and execute on a fresh runtime, returning the main function's results.
pub fn run(f: impl FnOnce(&mut ProtoBuilder)) -> Vec<Value> {
    let mut rt = Runtime::new();
    run_in(&mut rt, f)
}

/// Assemble and execute on `rt`.
pub fn run_in(rt: &mut Runtime, f: impl FnOnce(&mut ProtoBuilder)) -> Vec<Value> {
    let proto = Rc::new(assemble(f));
    rt.execute(&proto)
        .unwrap_or_else(|e| panic!("runtime error: {e}"))
        .values
}

/// Assemble and execute, expecting a failure.
pub fn run_err(f: impl FnOnce(&mut ProtoBuilder)) -> VmError {
    let mut rt = Runtime::new();
    run_err_in(&mut rt, f)
}

pub fn run_err_in(rt: &mut Runtime, f: impl FnOnce(&mut ProtoBuilder)) -> VmError {
    let proto = Rc::new(assemble(f));
    match rt.execute(&proto) {
        Err(e) => e,
        Ok(exec) => panic!("expected error, got {:?}", exec.values),
    }
}

/// A runtime with the given limits and the builtin library.
pub fn limited(max_instructions: u64, max_call_depth: usize) -> Runtime {
    Runtime::with_config(RuntimeConfig {
        max_instructions,
        max_call_depth,
        ..RuntimeConfig::default()
    })
}

/// Serialize `proto` and load it back through `do_chunk`.
pub fn run_dumped(proto: &Proto, format: NumberFormat) -> Vec<Value> {
    let bytes = dump(proto, format).unwrap_or_else(|e| panic!("dump failed: {e}"));
    let mut rt = Runtime::new();
    rt.do_chunk(&bytes, "=dumped")
        .unwrap_or_else(|e| panic!("runtime error: {e}"))
        .values
}

/// Check that results[idx] is the expected number.
pub fn assert_num(results: &[Value], idx: usize, expected: f32) {
    let val = results[idx];
    let got = val
        .as_number()
        .unwrap_or_else(|| panic!("result[{idx}] = {val:?}, expected number {expected}"));
    assert_eq!(got, expected, "result[{idx}] = {got}, expected {expected}");
}

/// Check that results[idx] is nil.
pub fn assert_nil(results: &[Value], idx: usize) {
    let val = results[idx];
    assert!(val.is_nil(), "result[{idx}] = {val:?}, expected nil");
}

/// Check that results[idx] is a string with the expected contents.
pub fn assert_str(results: &[Value], idx: usize, expected: &str, rt: &Runtime) {
    let val = results[idx];
    let sid = val
        .as_string_id()
        .unwrap_or_else(|| panic!("result[{idx}] = {val:?}, expected string \"{expected}\""));
    let got = rt.strings().get_lossy(sid);
    assert_eq!(got, expected, "result[{idx}] = \"{got}\", expected \"{expected}\"");
}

/// Run and compare every result against the expected numbers.
pub fn run_check_nums(f: impl FnOnce(&mut ProtoBuilder), expected: &[f32]) {
    let results = run(f);
    assert_eq!(
        results.len(),
        expected.len(),
        "expected {} results, got {}: {results:?}",
        expected.len(),
        results.len()
    );
    for (i, &exp) in expected.iter().enumerate() {
        assert_num(&results, i, exp);
    }
}

/// Run and return the script's captured output.
pub fn run_output(f: impl FnOnce(&mut ProtoBuilder)) -> String {
    let mut rt = Runtime::new();
    let proto = Rc::new(assemble(f));
    rt.execute(&proto)
        .unwrap_or_else(|e| panic!("runtime error: {e}"))
        .output
}
