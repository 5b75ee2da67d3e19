#![no_main]

use bytes::BytesMut;
use libfuzzer_sys::fuzz_target;
use protocol_probe::catalog::rip::{self, RipAuth};
use protocol_probe::core::codec::{MySqlPacketCodec, TpktCodec};
use protocol_probe::core::lenenc::PacketCursor;
use tokio_util::codec::Decoder;

fuzz_target!(|data: &[u8]| {
    // Drain every frame the codecs can find; errors are fine, panics are not
    let mut buf = BytesMut::from(data);
    let mut codec = MySqlPacketCodec::new(64 * 1024);
    while let Ok(Some(_)) = codec.decode(&mut buf) {}

    let mut buf = BytesMut::from(data);
    while let Ok(Some(_)) = TpktCodec.decode(&mut buf) {}

    let mut cur = PacketCursor::new(data);
    while let Ok(Some(_)) = cur.lenenc_bytes("fuzz") {}

    let _ = rip::parse_response(data, &RipAuth::None);
});
