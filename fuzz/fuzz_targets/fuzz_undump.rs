#![no_main]

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Malformed chunks must come back as errors, never panics.
    let _ = thorn_vm::binary_chunk::load_chunks(data, "=fuzz");
});
