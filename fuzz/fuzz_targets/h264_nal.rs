#![no_main]

//! Fuzz target for NAL unit splitting and conversion.

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use recmux_core::bitstream;

#[derive(Arbitrary, Debug)]
struct NalInput {
    data: Vec<u8>,
    format: NalFormat,
}

#[derive(Arbitrary, Debug)]
enum NalFormat {
    /// Start code delimited
    AnnexB,
    /// 1-byte length prefix
    Length1,
    /// 2-byte length prefix
    Length2,
    /// 4-byte length prefix
    Length4,
}

fuzz_target!(|input: NalInput| {
    if input.data.len() > 1024 * 1024 {
        return;
    }

    match input.format {
        NalFormat::AnnexB => {
            let _ = bitstream::is_annex_b(&input.data);
            for nal in bitstream::split_annexb(&input.data) {
                let _ = bitstream::h264_nal_type(nal);
                let _ = bitstream::hevc_nal_type(nal);
            }

            // every unit survives conversion to length prefixes
            let converted = bitstream::annexb_to_length_prefixed(&input.data);
            let units = bitstream::split_annexb(&input.data).filter(|n| !n.is_empty()).count();
            let back = bitstream::split_length_prefixed(&converted, 4).count();
            assert_eq!(units, back);
        }
        NalFormat::Length1 => bitstream::split_length_prefixed(&input.data, 1).for_each(drop),
        NalFormat::Length2 => bitstream::split_length_prefixed(&input.data, 2).for_each(drop),
        NalFormat::Length4 => bitstream::split_length_prefixed(&input.data, 4).for_each(drop),
    }
});
