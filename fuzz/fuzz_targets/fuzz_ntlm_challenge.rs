#![no_main]

use libfuzzer_sys::fuzz_target;
use protocol_probe::auth::ntlm;
use protocol_probe::catalog::rdp;

fuzz_target!(|data: &[u8]| {
    let _ = ntlm::parse_challenge(data);
    let _ = rdp::parse_ts_request(data);
    if let Ok(Some(len)) = rdp::der_frame_len(data) {
        assert!(len <= data.len());
    }
});
