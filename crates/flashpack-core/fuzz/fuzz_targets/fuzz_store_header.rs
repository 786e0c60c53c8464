//! Fuzz test for store header decoding
//!
//! A header that decodes must re-encode to the bytes it consumed.

#![no_main]

use flashpack_core::StoreHeader;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok((header, consumed)) = StoreHeader::decode(data) {
        if header.validate().is_ok() {
            let encoded = header.encode().expect("valid header encodes");
            assert_eq!(encoded.len(), consumed);
        }
    }
});
