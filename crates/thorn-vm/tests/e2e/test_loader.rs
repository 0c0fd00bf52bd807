use super::helpers::*;
use proptest::prelude::*;
use std::rc::Rc;
use thorn_bytecode::opcode::OpCode;
use thorn_bytecode::proto::Proto;
use thorn_vm::binary_chunk::{dump, ChunkError, NumberFormat};
use thorn_vm::{Runtime, Value, VmError};

/// Main function using fractional and large constants plus a nested function.
fn sample() -> Proto {
    let scale = function("=scale", 1, |f| {
        f.push_local(0).push_number(0.125).op(OpCode::MultOp).ret(1);
    });
    assemble(|b| {
        b.closure(scale, 0).set_global("scale");
        b.push_number(0.1).push_number(2.5).op(OpCode::AddOp);
        b.push_number(1e10);
        b.push_number(-123456.75);
        b.get_global("scale").push_number(3.0).call(1, 1);
        b.push_string("text");
        b.ret(0);
    })
}

#[test]
fn test_number_formats_give_identical_results() {
    let proto = sample();
    let text = run_dumped(&proto, NumberFormat::Text);
    let single = run_dumped(&proto, NumberFormat::Float32);
    let double = run_dumped(&proto, NumberFormat::Float64);
    assert_eq!(text.len(), 5);
    // Strings are interned per runtime, so compare the numbers only.
    assert_eq!(&text[..4], &single[..4]);
    assert_eq!(&single[..4], &double[..4]);
    assert_num(&single, 0, 0.1f32 + 2.5);
    assert_num(&single, 3, 0.375);
}

#[test]
fn test_dumped_chunk_matches_direct_execution() {
    let proto = sample();
    let mut rt = Runtime::new();
    let direct = rt.execute(&Rc::new(proto.clone())).unwrap().values;
    let loaded = run_dumped(&proto, NumberFormat::Float32);
    assert_eq!(&direct[..4], &loaded[..4]);
    assert_num(&loaded, 1, 1e10);
    assert_num(&loaded, 2, -123456.75);
}

#[test]
fn test_chunk_keeps_source_name_in_errors() {
    let proto = assemble(|b| {
        b.set_line(3).push_nil(1).call(0, 0).end_code();
    });
    let bytes = dump(&proto, NumberFormat::Float32).unwrap();
    let mut rt = Runtime::new();
    let err = rt.do_chunk(&bytes, "=ignored").unwrap_err();
    let loc = err.location().unwrap();
    assert_eq!(loc.source, "=test");
    assert_eq!(loc.line, 3);
    assert_eq!(loc.op, Some("CALL"));
    assert_eq!(err.message(), "attempt to call a nil value");
}

#[test]
fn test_multiple_chunks_run_in_order() {
    let first = assemble(|b| {
        b.push_number(20.0).set_global("x").end_code();
    });
    let second = assemble(|b| {
        b.get_global("x").push_number(2.0).op(OpCode::AddOp).ret(0);
    });
    let mut bytes = dump(&first, NumberFormat::Text).unwrap();
    bytes.extend(dump(&second, NumberFormat::Float64).unwrap());

    let mut rt = Runtime::new();
    let exec = rt.do_chunk(&bytes, "=pair").unwrap();
    assert_eq!(exec.values, vec![Value::Number(22.0)]);
    assert_eq!(rt.get_global("x"), Value::Number(20.0));
}

#[test]
fn test_do_stream_detects_binary() {
    let proto = assemble(|b| {
        b.push_number(9.0).ret(0);
    });
    let bytes = dump(&proto, NumberFormat::Float32).unwrap();
    let mut rt = Runtime::new();
    assert_eq!(rt.do_stream(&bytes, "=s").unwrap().first(), Value::Number(9.0));
}

#[test]
fn test_load_chunk_then_execute_twice() {
    let proto = assemble(|b| {
        b.get_global("n").push_number(1.0).op(OpCode::AddOp).set_global("n").end_code();
    });
    let bytes = dump(&proto, NumberFormat::Float32).unwrap();
    let mut rt = Runtime::new();
    rt.set_global("n", Value::Number(0.0));
    let loaded = rt.load_chunk(&bytes, "=inc").unwrap();
    rt.execute(&loaded).unwrap();
    rt.execute(&loaded).unwrap();
    assert_eq!(rt.get_global("n"), Value::Number(2.0));
}

#[test]
fn test_bad_marker_is_chunk_error() {
    let mut rt = Runtime::new();
    let err = rt.load_chunk(b"\x1bLub\x32\x04", "=bad").unwrap_err();
    assert!(matches!(
        err,
        VmError::Chunk(ChunkError::BadSignature { .. })
    ));
    let err = rt.load_chunk(b"print(1)", "=bad").unwrap_err();
    assert!(matches!(err, VmError::Chunk(ChunkError::NotAChunk { found: b'p' })));
}

#[test]
fn test_bad_version_is_chunk_error() {
    let mut rt = Runtime::new();
    let err = rt.load_chunk(b"\x1bLua\x40\x04", "=bad").unwrap_err();
    assert!(matches!(
        err,
        VmError::Chunk(ChunkError::UnsupportedVersion { found: 0x40, .. })
    ));
}

#[test]
fn test_truncated_chunk_is_rejected() {
    let bytes = dump(&sample(), NumberFormat::Float32).unwrap();
    let mut rt = Runtime::new();
    let err = rt.load_chunk(&bytes[..bytes.len() - 3], "=cut").unwrap_err();
    assert!(matches!(err, VmError::Chunk(ChunkError::Truncated { .. })), "{err:?}");
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_truncation_never_panics(cut in 0usize..400) {
        let bytes = dump(&sample(), NumberFormat::Text).unwrap();
        let cut = cut.min(bytes.len());
        let mut rt = Runtime::new();
        let result = rt.load_chunks(&bytes[..cut], "=cut");
        if cut < bytes.len() {
            prop_assert!(result.is_err());
        }
    }

    #[test]
    fn prop_garbage_never_panics(data in proptest::collection::vec(any::<u8>(), 0..256)) {
        let mut rt = limited(1_000, 50);
        let _ = rt.do_chunk(&data, "=fuzz");
    }
}
