#![no_main]
use libfuzzer_sys::fuzz_target;
use rootio::Header;

// Decoding arbitrary bytes must fail cleanly; a valid header re-encodes to
// bytes that decode to the same version and begin.
fuzz_target!(|data: &[u8]| {
    let Ok(header) = Header::decode(data) else {
        return;
    };
    if header.validate().is_err() {
        return;
    }

    let bytes = header.to_bytes().expect("encode decoded header");
    let again = Header::decode(&bytes).expect("decode re-encoded header");
    assert_eq!(again.normalized_version(), header.normalized_version());
    assert_eq!(again.begin, header.begin);
});
