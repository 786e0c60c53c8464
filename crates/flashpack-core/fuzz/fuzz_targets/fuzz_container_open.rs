//! Fuzz test for the container reader
//!
//! Arbitrary bytes must be rejected with an error, never a panic. Anything
//! that opens must also survive verification.

#![no_main]

use flashpack_core::ContainerReader;
use libfuzzer_sys::fuzz_target;
use std::io::Cursor;

fuzz_target!(|data: &[u8]| {
    if let Ok(mut reader) = ContainerReader::open(Cursor::new(data)) {
        let _ = reader.summary();
        let _ = reader.verify_quiet();
    }
});
