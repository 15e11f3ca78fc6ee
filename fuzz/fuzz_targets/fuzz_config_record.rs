#![no_main]

use libfuzzer_sys::fuzz_target;
use vendorkey_core::{ConfigRecord, VendorKeyConfig};

fuzz_target!(|data: &[u8]| {
    let Ok(record) = serde_json::from_slice::<ConfigRecord>(data) else {
        return;
    };

    // Any record that parses must survive a render/parse cycle unchanged
    if let Ok(config) = VendorKeyConfig::from_record(&record) {
        let rendered = config.to_record();
        let reparsed = VendorKeyConfig::from_record(&rendered).unwrap();
        assert_eq!(config, reparsed);

        // Summaries should not panic
        let _ = config.active_summary();
        let _ = config.candidate_summary();
        let _ = config.key_state.clone().promote();
    }
});
