//! Fuzz connection string parsing.

#![no_main]

use libfuzzer_sys::fuzz_target;
use tabula_client::ConnectParams;

fuzz_target!(|data: &[u8]| {
    if let Ok(s) = std::str::from_utf8(data) {
        // Must never panic, only return Ok or Err.
        let _ = ConnectParams::from_connection_string(s);
    }
});
