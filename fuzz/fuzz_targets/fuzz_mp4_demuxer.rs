#![no_main]

use libfuzzer_sys::fuzz_target;
use recmux_containers::{Demuxer, Mp4Demuxer};
use std::io::Cursor;

fuzz_target!(|data: &[u8]| {
    let mut demuxer = Mp4Demuxer::new();
    if demuxer.open(Cursor::new(data.to_vec())).is_err() {
        return;
    }

    let _ = demuxer.duration();
    for stream in demuxer.streams() {
        let _ = stream.rotation();
    }

    // sample tables may claim far more samples than the input holds
    for _ in 0..4096 {
        match demuxer.read_packet() {
            Ok(Some(_)) => {}
            Ok(None) | Err(_) => break,
        }
    }
});
