#![no_main]
#[macro_use]
extern crate libfuzzer_sys;
extern crate rdns;

fuzz_target!(|data: &[u8]| {
    if let Ok(m) = rdns::Message::from_slice(data) {
        let _ = m.to_vec();
    }
});
