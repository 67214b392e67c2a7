#![no_main]

//! Fuzz target for the ADTS to AudioSpecificConfig filter.

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use recmux::create_filter;
use recmux_containers::StreamInfo;
use recmux_core::format::CodecId;
use recmux_core::packet::Packet;
use recmux_core::rational::Rational;

#[derive(Arbitrary, Debug)]
struct AdtsInput {
    frames: Vec<Vec<u8>>,
    configured: bool,
}

fuzz_target!(|input: AdtsInput| {
    let time_base = Rational::new(1, 48000);
    let mut stream = StreamInfo::audio(0, CodecId::Aac, time_base, 48000, 2);
    if input.configured {
        stream.extra_data = Some(vec![0x11, 0x90]);
    }

    let Ok(mut filter) = create_filter("aac_adtstoasc", &stream, time_base) else {
        return;
    };

    for (i, frame) in input.frames.into_iter().take(256).enumerate() {
        let packet = Packet::new(frame).with_timestamps(i as i64 * 1024, i as i64 * 1024);
        if let Ok(out) = filter.push(packet) {
            for packet in out {
                let _ = packet.size();
            }
        }
    }
});
