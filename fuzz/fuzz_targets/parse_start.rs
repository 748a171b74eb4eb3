#![no_main]

use chrono::{TimeZone, Utc};
use libfuzzer_sys::fuzz_target;
use pubguard_core::source::parse_start;

fuzz_target!(|data: &[u8]| {
    let Ok(expr) = std::str::from_utf8(data) else {
        return;
    };
    let Some(now) = Utc.timestamp_opt(1_709_251_200, 0).single() else {
        return;
    };
    let _ = parse_start(expr, now);
});
