//! Fuzz test for manifest parsing
//!
//! Parsed manifests must render back to text that parses to the same value.

#![no_main]

use flashpack_core::{parse_device_targets, Manifest};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &str| {
    let _ = parse_device_targets(data);

    if let Ok(manifest) = Manifest::parse(data) {
        let rendered = manifest.render();
        let reparsed = Manifest::parse(&rendered).expect("rendered manifest parses");
        assert_eq!(manifest, reparsed);
    }
});
