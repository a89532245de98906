use crate::constants::frame::{MAX_ASCII_ADU_CHARS, MIN_ASCII_ADU_CHARS};
use crate::error::{FrameParseError, InvalidRequest, RequestError};
use crate::types::UnitId;

pub(crate) const COLON: u8 = b':';
pub(crate) const CRLF: &[u8] = b"\r\n";

const HEX_TABLE: &[u8; 16] = b"0123456789ABCDEF";

/// longitudinal redundancy check: two's complement of the 8-bit sum
pub(crate) fn lrc(bytes: &[u8]) -> u8 {
    let sum = bytes.iter().fold(0u8, |acc, b| acc.wrapping_add(*b));
    sum.wrapping_neg()
}

fn push_hex(buffer: &mut Vec<u8>, byte: u8) {
    buffer.push(HEX_TABLE[(byte >> 4) as usize]);
    buffer.push(HEX_TABLE[(byte & 0x0F) as usize]);
}

fn hex_value(ch: u8) -> Result<u8, FrameParseError> {
    match ch {
        b'0'..=b'9' => Ok(ch - b'0'),
        b'A'..=b'F' => Ok(ch - b'A' + 10),
        b'a'..=b'f' => Ok(ch - b'a' + 10),
        _ => Err(FrameParseError::InvalidHexCharacter(ch)),
    }
}

/// encode a complete ASCII ADU into the supplied buffer
///
/// The buffer is cleared first; on success it holds `:` + uppercase hex of
/// (unit id + function code + data + LRC) + CRLF.
pub(crate) fn encode_request(
    buffer: &mut Vec<u8>,
    unit_id: UnitId,
    function_code: u8,
    data: &[u8],
) -> Result<(), RequestError> {
    // one colon, two chars per binary byte (unit + fc + data + lrc), CRLF
    let total = 1 + 2 * (3 + data.len()) + 2;
    if total > MAX_ASCII_ADU_CHARS {
        return Err(InvalidRequest::FrameTooLarge(total, MAX_ASCII_ADU_CHARS).into());
    }

    let mut sum = unit_id.value.wrapping_add(function_code);
    for byte in data {
        sum = sum.wrapping_add(*byte);
    }
    let checksum = sum.wrapping_neg();

    buffer.clear();
    buffer.push(COLON);
    push_hex(buffer, unit_id.value);
    push_hex(buffer, function_code);
    for byte in data {
        push_hex(buffer, *byte);
    }
    push_hex(buffer, checksum);
    buffer.extend_from_slice(CRLF);
    Ok(())
}

/// decode a complete ASCII ADU, returning the unit id and the PDU bytes
/// (function code followed by data)
pub(crate) fn decode_response(adu: &[u8]) -> Result<(UnitId, Vec<u8>), RequestError> {
    if adu.len() < MIN_ASCII_ADU_CHARS {
        return Err(FrameParseError::FrameTooShort(adu.len(), MIN_ASCII_ADU_CHARS).into());
    }
    // the hex body must come in pairs, so the total length including the
    // colon is odd
    if adu.len() % 2 != 1 {
        return Err(FrameParseError::OddCharacterCount(adu.len() - 1).into());
    }
    if adu[0] != COLON {
        return Err(FrameParseError::MissingColonDelimiter.into());
    }
    if &adu[adu.len() - CRLF.len()..] != CRLF {
        return Err(FrameParseError::MissingCrLfTerminator.into());
    }

    let hex = &adu[1..adu.len() - CRLF.len()];
    let mut binary = Vec::with_capacity(hex.len() / 2);
    for pair in hex.chunks_exact(2) {
        binary.push((hex_value(pair[0])? << 4) | hex_value(pair[1])?);
    }

    let (body, checksum) = binary.split_at(binary.len() - 1);
    let expected = lrc(body);
    if checksum[0] != expected {
        return Err(FrameParseError::LrcMismatch(checksum[0], expected).into());
    }

    Ok((UnitId::new(body[0]), body[1..].to_vec()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lrc_matches_the_reference_vector() {
        assert_eq!(lrc(&[0x01, 0x03, 0x01, 0x0A]), 0xF1);
    }

    #[test]
    fn lrc_is_stable_across_invocations() {
        let input = [0x08, 0x01, 0x02, 0x42, 0x01, 0x05];
        assert_eq!(lrc(&input), lrc(&input));
        assert_eq!(lrc(&input), 0xAD);
    }

    #[test]
    fn encodes_the_reference_frame() {
        // unit 8, fc 1, data [2, 66, 1, 5] -> ":080102420105AD\r\n"
        let mut buffer = Vec::new();
        encode_request(&mut buffer, UnitId::new(8), 0x01, &[2, 66, 1, 5]).unwrap();
        assert_eq!(buffer, b":080102420105AD\r\n");
    }

    #[test]
    fn decodes_the_reference_frame() {
        // ":010308640A0D79\r\n" -> unit 1, fc 3, data [8, 100, 10, 13]
        let (unit, pdu) = decode_response(b":010308640A0D79\r\n").unwrap();
        assert_eq!(unit, UnitId::new(1));
        assert_eq!(pdu, &[0x03, 8, 100, 10, 13]);
    }

    #[test]
    fn encode_then_decode_round_trips() {
        let mut buffer = Vec::new();
        encode_request(&mut buffer, UnitId::new(0x11), 0x06, &[0x00, 0x01, 0xAB, 0xCD]).unwrap();
        let (unit, pdu) = decode_response(&buffer).unwrap();
        assert_eq!(unit, UnitId::new(0x11));
        assert_eq!(pdu, &[0x06, 0x00, 0x01, 0xAB, 0xCD]);
    }

    #[test]
    fn rejects_frames_below_the_minimum() {
        assert_eq!(
            decode_response(b":0101\r\n").unwrap_err(),
            FrameParseError::FrameTooShort(7, 9).into()
        );
    }

    #[test]
    fn rejects_odd_hex_counts() {
        assert_eq!(
            decode_response(b":010308640A0D7\r\n").unwrap_err(),
            FrameParseError::OddCharacterCount(15).into()
        );
    }

    #[test]
    fn rejects_missing_delimiters() {
        assert_eq!(
            decode_response(b"?010308640A0D79\r\n").unwrap_err(),
            FrameParseError::MissingColonDelimiter.into()
        );
        assert_eq!(
            decode_response(b":010308640A0D79\r\r").unwrap_err(),
            FrameParseError::MissingCrLfTerminator.into()
        );
    }

    #[test]
    fn rejects_bad_lrc() {
        assert_eq!(
            decode_response(b":010308640A0D78\r\n").unwrap_err(),
            FrameParseError::LrcMismatch(0x78, 0x79).into()
        );
    }

    #[test]
    fn rejects_non_hex_characters() {
        assert_eq!(
            decode_response(b":01030g640A0D79\r\n").unwrap_err(),
            FrameParseError::InvalidHexCharacter(b'g').into()
        );
    }
}
