//! Fuzz target for network configuration parsing and filter patching.
//!
//! Arbitrary UTF-8 text is parsed as a configuration document, then the
//! anchor count and filter rewrite run over whatever sections came out.

#![no_main]

use libfuzzer_sys::fuzz_target;
use yoloprep::cfg::fuzz_parse_config;

fuzz_target!(|data: &[u8]| {
    if data.len() > 1024 * 1024 {
        return;
    }

    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };

    let _ = fuzz_parse_config(text);
});
