//! Fuzz test for size string parsing
//!
//! Tests that the size parser handles arbitrary input without panicking.

#![no_main]

use flashpack_core::parse_size;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &str| {
    if let Ok(size) = parse_size(data) {
        // A bare number parses to itself
        if let Ok(n) = data.trim().parse::<u64>() {
            assert_eq!(size, n);
        }
    }
});
