#![no_main]

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let _ = popcorn_core::faiss::fuzz_read_flat_bytes(data);
});
