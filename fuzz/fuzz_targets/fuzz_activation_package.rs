#![no_main]

use libfuzzer_sys::fuzz_target;
use vendorkey_core::{validate_activation_package, ActivationPackage, RotatingKey, VendorId};

fuzz_target!(|data: &[u8]| {
    let Ok(json) = std::str::from_utf8(data) else {
        return;
    };

    if let Ok(pkg) = ActivationPackage::parse(json) {
        // Validation without pending state should not panic
        if let Ok(validated) = validate_activation_package(&pkg, None, None) {
            // The accepted package must also match itself as pending state
            let key = RotatingKey::from_hex(validated.rotating_key.as_hex());
            let id = VendorId::new(validated.license_id.as_str());
            assert!(validate_activation_package(&pkg, Some(&key), Some(&id)).is_ok());
            assert!(!validated.session_id.is_empty());
        }
    }
});
