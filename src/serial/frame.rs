use std::time::Duration;

use crate::constants::frame::{MAX_RTU_ADU_SIZE, MIN_RTU_ADU_SIZE, RTU_EXCEPTION_ADU_SIZE};
use crate::error::{FrameParseError, InvalidRequest, RequestError};
use crate::function::constants as fc;
use crate::types::UnitId;

pub(crate) const CRC_LENGTH: usize = 2;

fn crc16(bytes: &[u8]) -> u16 {
    crc::Crc::<u16>::new(&crc::CRC_16_MODBUS).checksum(bytes)
}

/// encode a complete RTU ADU into the supplied buffer
///
/// The buffer is cleared first; on success it holds unit id + function code +
/// data + CRC (little-endian).
pub(crate) fn encode_request(
    buffer: &mut Vec<u8>,
    unit_id: UnitId,
    function_code: u8,
    data: &[u8],
) -> Result<(), RequestError> {
    let total = 2 + data.len() + CRC_LENGTH;
    if total > MAX_RTU_ADU_SIZE {
        return Err(InvalidRequest::FrameTooLarge(total, MAX_RTU_ADU_SIZE).into());
    }

    buffer.clear();
    buffer.push(unit_id.value);
    buffer.push(function_code);
    buffer.extend_from_slice(data);
    let crc = crc16(buffer);
    buffer.extend_from_slice(&crc.to_le_bytes());
    Ok(())
}

/// decode a complete RTU ADU, returning the unit id and the PDU bytes
/// (function code followed by data)
pub(crate) fn decode_response(adu: &[u8]) -> Result<(UnitId, &[u8]), RequestError> {
    if adu.len() < MIN_RTU_ADU_SIZE {
        return Err(FrameParseError::FrameTooShort(adu.len(), MIN_RTU_ADU_SIZE).into());
    }

    let (body, trailer) = adu.split_at(adu.len() - CRC_LENGTH);
    let received = u16::from_le_bytes([trailer[0], trailer[1]]);
    let expected = crc16(body);
    if received != expected {
        return Err(FrameParseError::CrcMismatch(received, expected).into());
    }

    Ok((UnitId::new(body[0]), &body[1..]))
}

/// expected total response ADU length for a request, per function code
///
/// `None` means the length cannot be determined up front (FC 24); the reader
/// must rely on the read deadline and CRC validation instead.
pub(crate) fn expected_response_len(request_adu: &[u8]) -> Option<usize> {
    let mut length = MIN_RTU_ADU_SIZE;
    match request_adu.get(1)? {
        &fc::READ_COILS | &fc::READ_DISCRETE_INPUTS => {
            let count = u16::from_be_bytes([*request_adu.get(4)?, *request_adu.get(5)?]) as usize;
            length += 1 + count / 8 + usize::from(count % 8 != 0);
        }
        &fc::READ_HOLDING_REGISTERS
        | &fc::READ_INPUT_REGISTERS
        | &fc::READ_WRITE_MULTIPLE_REGISTERS => {
            let count = u16::from_be_bytes([*request_adu.get(4)?, *request_adu.get(5)?]) as usize;
            length += 1 + count * 2;
        }
        &fc::WRITE_SINGLE_COIL
        | &fc::WRITE_SINGLE_REGISTER
        | &fc::WRITE_MULTIPLE_COILS
        | &fc::WRITE_MULTIPLE_REGISTERS => length += 4,
        &fc::MASK_WRITE_REGISTER => length += 6,
        _ => return None, // FC 24 and unknown codes are undetermined
    }
    Some(length)
}

/// length of an exception response ADU
pub(crate) fn exception_response_len() -> usize {
    RTU_EXCEPTION_ADU_SIZE
}

/// inter-frame turnaround for `chars` characters on the wire
///
/// MODBUS over Serial Line - Specification and Implementation Guide, page 13:
/// 1.5 character times between characters, 3.5 between frames. Above 19200
/// baud the fixed values 750 us / 1750 us are recommended.
pub(crate) fn turnaround_delay(chars: usize, baud_rate: u32) -> Duration {
    let (character_delay, frame_delay) = if baud_rate == 0 || baud_rate > 19_200 {
        (750u64, 1750u64)
    } else {
        (15_000_000 / baud_rate as u64, 35_000_000 / baud_rate as u64)
    };
    Duration::from_micros(character_delay * chars as u64 + frame_delay)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crc16_matches_the_reference_vector() {
        assert_eq!(crc16(&[0x01, 0x02, 0x03, 0x04, 0x05]), 0xBB2A);
    }

    #[test]
    fn crc16_is_stable_across_invocations() {
        let input = [0xDE, 0xAD, 0xBE, 0xEF];
        assert_eq!(crc16(&input), crc16(&input));
    }

    #[test]
    fn encodes_the_reference_frame() {
        // unit 0x01, fc 0x03, data 01 02 03 04 05 -> trailing CRC 0x4805 little-endian
        let mut buffer = Vec::new();
        encode_request(&mut buffer, UnitId::new(0x01), 0x03, &[1, 2, 3, 4, 5]).unwrap();
        assert_eq!(buffer, &[0x01, 0x03, 0x01, 0x02, 0x03, 0x04, 0x05, 0x05, 0x48]);
    }

    #[test]
    fn encode_then_decode_round_trips() {
        let mut buffer = Vec::new();
        encode_request(&mut buffer, UnitId::new(0x11), 0x10, &[0x00, 0x01, 0x00, 0x02]).unwrap();
        let (unit, pdu) = decode_response(&buffer).unwrap();
        assert_eq!(unit, UnitId::new(0x11));
        assert_eq!(pdu, &[0x10, 0x00, 0x01, 0x00, 0x02]);
    }

    #[test]
    fn rejects_short_frames() {
        assert_eq!(
            decode_response(&[0x01, 0x03, 0x4B]).unwrap_err(),
            FrameParseError::FrameTooShort(3, 4).into()
        );
    }

    #[test]
    fn rejects_bad_crc() {
        let mut buffer = Vec::new();
        encode_request(&mut buffer, UnitId::new(0x01), 0x03, &[0x02]).unwrap();
        let last = buffer.len() - 1;
        buffer[last] ^= 0xFF;
        assert!(matches!(
            decode_response(&buffer).unwrap_err(),
            RequestError::BadFrame(FrameParseError::CrcMismatch(_, _))
        ));
    }

    #[test]
    fn sizes_read_bit_responses() {
        // read coils, start 0, quantity 19 -> 1 (count) + 3 (bytes) + 4 = 8
        let adu = [0x01, 0x01, 0x00, 0x00, 0x00, 0x13, 0x00, 0x00];
        assert_eq!(expected_response_len(&adu), Some(8));
    }

    #[test]
    fn sizes_read_register_responses() {
        // read holding registers, quantity 10 -> 1 + 20 + 4 = 25
        let adu = [0x01, 0x03, 0x00, 0x00, 0x00, 0x0A, 0x00, 0x00];
        assert_eq!(expected_response_len(&adu), Some(25));
    }

    #[test]
    fn sizes_fixed_length_responses() {
        for code in [0x05u8, 0x06, 0x0F, 0x10] {
            let adu = [0x01, code, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00];
            assert_eq!(expected_response_len(&adu), Some(8));
        }
        let mask = [0x01, 0x16, 0x00, 0x00, 0x00, 0xF2, 0x00, 0x25];
        assert_eq!(expected_response_len(&mask), Some(10));
    }

    #[test]
    fn fifo_reads_are_undetermined() {
        let adu = [0x01, 0x18, 0x00, 0x00, 0x00, 0x00];
        assert_eq!(expected_response_len(&adu), None);
    }

    #[test]
    fn turnaround_tracks_the_baud_rate() {
        assert_eq!(
            turnaround_delay(0, 9600),
            Duration::from_micros(35_000_000 / 9600)
        );
        assert_eq!(
            turnaround_delay(10, 9600),
            Duration::from_micros(10 * (15_000_000 / 9600) + 35_000_000 / 9600)
        );
        // above 19200 baud the fixed values apply
        assert_eq!(turnaround_delay(10, 115_200), Duration::from_micros(9_250));
    }
}
