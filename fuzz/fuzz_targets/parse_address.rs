//! Fuzz the server address parser.

#![no_main]

use libfuzzer_sys::fuzz_target;
use tabula_client::parse_address;

fuzz_target!(|data: &[u8]| {
    let Ok(spec) = std::str::from_utf8(data) else {
        return;
    };

    if let Ok((host, _port)) = parse_address(spec, 3306) {
        assert!(spec.contains(host.as_str()));
        assert!(!host.contains(['[', ']']));
    }
});
