#![no_main]
#[macro_use]
extern crate libfuzzer_sys;
extern crate rdns;

fuzz_target!(|data: &[u8]| {
    if let Ok(s) = std::str::from_utf8(data) {
        let _ = rdns::zones::Zone::parse(s, "example.com");
    }
});
