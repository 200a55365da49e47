/// Internet checksum (RFC 1071) over `data`.
///
/// Bytes are summed as big-endian 16-bit words into a 32-bit accumulator. A
/// trailing odd byte is padded with a zero low byte, so `[a]` and `[a, 0]`
/// produce the same checksum. Carries above bit 15 are folded back once before
/// taking the one's complement.
pub fn checksum(data: &[u8]) -> u16 {
    let mut sum: u32 = 0;

    let mut words = data.chunks_exact(2);
    for word in &mut words {
        sum = sum.wrapping_add(u32::from(u16::from_be_bytes([word[0], word[1]])));
    }
    if let [last] = words.remainder() {
        sum = sum.wrapping_add(u32::from(*last) << 8);
    }

    sum = sum.wrapping_add(sum >> 16);
    !(sum as u16)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_is_all_ones() {
        assert_eq!(checksum(&[]), 0xffff);
    }

    #[test]
    fn echo_request_header_vector() {
        // type=8, everything else zero
        let header = [8u8, 0, 0, 0, 0, 0, 0, 0];
        assert_eq!(checksum(&header), 0xf7ff);
    }

    #[test]
    fn odd_length_matches_zero_padding() {
        assert_eq!(checksum(&[0x01]), 0xfeff);
        assert_eq!(checksum(&[0x01]), checksum(&[0x01, 0x00]));
        let data = [0x45, 0x00, 0x1c, 0xab, 0x7f];
        assert_eq!(checksum(&data), checksum(&[0x45, 0x00, 0x1c, 0xab, 0x7f, 0x00]));
    }

    #[test]
    fn rfc1071_sample_words() {
        // Sample from RFC 1071 section 3: sum 0x2ddf0 folds to 0xddf2.
        let data = [0x00, 0x01, 0xf2, 0x03, 0xf4, 0xf5, 0xf6, 0xf7];
        assert_eq!(checksum(&data), !0xddf2);
    }

    #[test]
    fn embedded_checksum_verifies_to_zero() {
        let mut packet = [8u8, 0, 0, 0, 0x12, 0x34, 0x00, 0x07];
        let sum = checksum(&packet);
        packet[2..4].copy_from_slice(&sum.to_be_bytes());
        assert_eq!(checksum(&packet), 0);
    }
}
