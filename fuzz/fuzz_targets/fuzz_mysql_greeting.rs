#![no_main]

use libfuzzer_sys::fuzz_target;
use protocol_probe::catalog::mysql::ServerGreeting;

fuzz_target!(|data: &[u8]| {
    // Greeting parsing must reject or accept, never panic
    if let Ok(greeting) = ServerGreeting::parse(data) {
        assert!(greeting.scramble.len() <= 20);
    }
});
