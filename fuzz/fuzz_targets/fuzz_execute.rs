#![no_main]

use libfuzzer_sys::fuzz_target;
use thorn_vm::{Runtime, RuntimeConfig};

fuzz_target!(|data: &[u8]| {
    // Whatever loads must run to completion or fail cleanly inside the limits.
    let mut rt = Runtime::with_config(RuntimeConfig {
        max_instructions: 10_000,
        max_call_depth: 32,
        stdlib: true,
        gc_threshold: 64,
    });
    let _ = rt.do_stream(data, "=fuzz");
    assert_eq!(rt.call_depth(), 0);
});
