//! H.264/H.265 NAL unit framing helpers.
//!
//! Live sources hand over Annex-B byte streams (start code delimited) while
//! MP4 stores NAL units with a big-endian length prefix.

/// Find the next start code in a byte slice.
///
/// Returns the offset of the start code and its length (3 or 4 bytes).
pub fn find_start_code(data: &[u8]) -> Option<(usize, usize)> {
    let len = data.len();
    if len < 3 {
        return None;
    }

    for i in 0..len - 2 {
        if data[i] == 0 && data[i + 1] == 0 {
            if data[i + 2] == 1 {
                return Some((i, 3));
            } else if i + 3 < len && data[i + 2] == 0 && data[i + 3] == 1 {
                return Some((i, 4));
            }
        }
    }

    None
}

/// Check whether a payload starts with an Annex-B start code.
pub fn is_annex_b(data: &[u8]) -> bool {
    data.starts_with(&[0, 0, 1]) || data.starts_with(&[0, 0, 0, 1])
}

/// Iterator over the NAL units of an Annex-B byte stream.
///
/// Yields NAL payloads without start codes. Trailing zero bytes before the
/// next start code are dropped.
#[derive(Debug, Clone)]
pub struct AnnexBNalUnits<'a> {
    rest: &'a [u8],
}

impl<'a> Iterator for AnnexBNalUnits<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.rest.is_empty() {
                return None;
            }
            let body = match find_start_code(self.rest) {
                Some((pos, len)) if pos == 0 => &self.rest[len..],
                Some(_) | None => self.rest,
            };
            let (nal, rest) = match find_start_code(body) {
                Some((pos, _)) => body.split_at(pos),
                None => (body, &[][..]),
            };
            self.rest = rest;

            let end = nal.iter().rposition(|&b| b != 0).map_or(0, |p| p + 1);
            if end > 0 {
                return Some(&nal[..end]);
            }
        }
    }
}

/// Split an Annex-B byte stream into NAL units.
pub fn split_annexb(data: &[u8]) -> AnnexBNalUnits<'_> {
    AnnexBNalUnits { rest: data }
}

/// Convert an Annex-B byte stream into 4-byte length-prefixed NAL units.
pub fn annexb_to_length_prefixed(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() + 8);
    for nal in split_annexb(data) {
        out.extend_from_slice(&(nal.len() as u32).to_be_bytes());
        out.extend_from_slice(nal);
    }
    out
}

/// Iterate the NAL units of a length-prefixed payload.
///
/// Stops at the first truncated unit.
pub fn split_length_prefixed(data: &[u8], length_size: usize) -> impl Iterator<Item = &[u8]> {
    let mut rest = data;
    std::iter::from_fn(move || {
        if length_size == 0 || length_size > 4 || rest.len() < length_size {
            return None;
        }
        let len = rest[..length_size]
            .iter()
            .fold(0usize, |acc, &b| (acc << 8) | b as usize);
        let body = &rest[length_size..];
        if body.len() < len {
            return None;
        }
        let (nal, tail) = body.split_at(len);
        rest = tail;
        Some(nal)
    })
}

/// H.264 NAL unit type (low five bits of the header byte).
#[inline]
pub fn h264_nal_type(nal: &[u8]) -> Option<u8> {
    nal.first().map(|b| b & 0x1F)
}

/// H.265 NAL unit type (bits 1..7 of the first header byte).
#[inline]
pub fn hevc_nal_type(nal: &[u8]) -> Option<u8> {
    nal.first().map(|b| (b >> 1) & 0x3F)
}

/// H.264 NAL unit types used by the muxing path.
pub mod h264 {
    /// Coded slice of an IDR picture.
    pub const IDR: u8 = 5;
    /// Sequence parameter set.
    pub const SPS: u8 = 7;
    /// Picture parameter set.
    pub const PPS: u8 = 8;
}

/// H.265 NAL unit types used by the muxing path.
pub mod hevc {
    /// Video parameter set.
    pub const VPS: u8 = 32;
    /// Sequence parameter set.
    pub const SPS: u8 = 33;
    /// Picture parameter set.
    pub const PPS: u8 = 34;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_start_code() {
        assert_eq!(find_start_code(&[0, 0, 1, 0x67]), Some((0, 3)));
        assert_eq!(find_start_code(&[0xAA, 0, 0, 0, 1, 0x67]), Some((1, 4)));
        assert_eq!(find_start_code(&[0, 0, 2]), None);
    }

    #[test]
    fn test_split_annexb_mixed_start_codes() {
        let data = [0, 0, 0, 1, 0x67, 1, 2, 0, 0, 1, 0x68, 3, 0, 0, 0, 1, 0x65, 4, 5];
        let nals: Vec<&[u8]> = split_annexb(&data).collect();
        assert_eq!(nals, vec![&[0x67, 1, 2][..], &[0x68, 3][..], &[0x65, 4, 5][..]]);
    }

    #[test]
    fn test_split_annexb_without_leading_start_code() {
        let data = [0x65, 9, 0, 0, 1, 0x41, 7];
        let nals: Vec<&[u8]> = split_annexb(&data).collect();
        assert_eq!(nals, vec![&[0x65, 9][..], &[0x41, 7][..]]);
    }

    #[test]
    fn test_annexb_to_length_prefixed() {
        let data = [0, 0, 0, 1, 0x67, 0xAA, 0, 0, 1, 0x68];
        let out = annexb_to_length_prefixed(&data);
        assert_eq!(out, vec![0, 0, 0, 2, 0x67, 0xAA, 0, 0, 0, 1, 0x68]);

        let back: Vec<&[u8]> = split_length_prefixed(&out, 4).collect();
        assert_eq!(back, vec![&[0x67, 0xAA][..], &[0x68][..]]);
    }

    #[test]
    fn test_nal_types() {
        assert_eq!(h264_nal_type(&[0x67]), Some(h264::SPS));
        assert_eq!(hevc_nal_type(&[0x40, 0x01]), Some(hevc::VPS));
        assert_eq!(h264_nal_type(&[]), None);
    }

    #[test]
    fn test_is_annex_b() {
        assert!(is_annex_b(&[0, 0, 1, 0x65]));
        assert!(is_annex_b(&[0, 0, 0, 1, 0x65]));
        assert!(!is_annex_b(&[0, 0, 0, 5, 0x65]));
    }
}
