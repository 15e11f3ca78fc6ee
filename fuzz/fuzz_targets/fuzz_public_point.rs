#![no_main]

use libfuzzer_sys::fuzz_target;
use vendorkey_core::{PublicPoint, Secp256k1Primitives, SigningPrimitives};

fuzz_target!(|data: &[u8]| {
    let primitives = Secp256k1Primitives::new();

    // Decompression must reject bad input without panicking
    if let Ok(point) = primitives.decompress_point(data) {
        let hex = point.to_hex();
        assert_eq!(PublicPoint::from_hex(&hex).unwrap(), point);
        let _ = point.to_base64();
    }

    // Hashing to the curve accepts any input
    let _ = primitives.hash_to_point(data);
});
