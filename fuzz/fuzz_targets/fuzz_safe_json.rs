//! Fuzz testing for the bounded JSON decoder.
//!
//! Checks that [`safe_json::parse_bytes`] never panics and that anything it
//! accepts really is within the configured size and depth.
//!
//! # Running
//!
//! ```bash
//! cargo +nightly fuzz run fuzz_safe_json -- -max_total_time=60
//! ```

#![no_main]

use libfuzzer_sys::fuzz_target;
use tokenscan_api::safe_json::{self, JsonLimits, max_nesting_depth};

const LIMITS: JsonLimits = JsonLimits {
    max_size: 4096,
    max_depth: 8,
};

fuzz_target!(|data: &[u8]| {
    if safe_json::parse_bytes(data, &LIMITS).is_ok() {
        assert!(data.len() <= LIMITS.max_size);
        if let Ok(text) = std::str::from_utf8(data) {
            assert!(max_nesting_depth(text) <= LIMITS.max_depth);
        }
    }
});
