#![no_main]

use std::io::Cursor;

use libfuzzer_sys::fuzz_target;
use pubguard_core::source::{CampaignSource, EventSource, split_row};

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };

    for line in text.lines() {
        if let Ok(fields) = split_row(line) {
            assert!(!fields.is_empty());
        }
    }

    // Iteration must stop at the first error.
    let mut errors = 0;
    for row in CampaignSource::from_reader("fuzz.csv", Cursor::new(data)) {
        if row.is_err() {
            errors += 1;
        }
    }
    assert!(errors <= 1);

    for event in EventSource::from_reader("fuzz.csv", Cursor::new(data), 0).flatten() {
        assert!(event.timestamp >= 0);
    }
});
