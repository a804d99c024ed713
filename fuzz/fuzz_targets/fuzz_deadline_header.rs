//! Fuzz testing for deadline header parsing.
//!
//! Inbound deadline headers come straight from untrusted clients. This target
//! checks that `parse_deadline`:
//!
//! - Never panics on any input
//! - Only accepts values that survive a format/parse cycle unchanged
//!
//! # Running the Fuzz Tests
//!
//! ```bash
//! cargo +nightly install cargo-fuzz
//! cargo +nightly fuzz run fuzz_deadline_header -- -max_total_time=60
//! ```

#![no_main]

use edge_middleware::middleware::{format_deadline, parse_deadline};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(s) = std::str::from_utf8(data)
        && let Some(deadline) = parse_deadline(s)
    {
        // Years outside 0000-9999 after offset conversion have no RFC 3339 form
        let formatted = format_deadline(deadline);
        if !formatted.starts_with(['+', '-']) {
            assert_eq!(parse_deadline(&formatted), Some(deadline));
        }
    }
});
