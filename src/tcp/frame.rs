use crate::common::buffer::ReadBuffer;
use crate::common::frame::{Frame, FrameHeader, TxId};
use crate::common::phys::PhysLayer;
use crate::constants::frame::{
    MAX_MBAP_LENGTH_FIELD, MAX_TCP_ADU_SIZE, MBAP_HEADER_LENGTH, MIN_TCP_ADU_SIZE,
};
use crate::decode::FrameDecodeLevel;
use crate::error::{AduParseError, FrameParseError, InvalidRequest, RequestError};
use crate::types::UnitId;

pub(crate) const MODBUS_PROTOCOL_ID: u16 = 0x0000;

/// MBAP header fields, kept around for response correlation
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct MbapHeader {
    pub(crate) tx_id: TxId,
    pub(crate) protocol_id: u16,
    pub(crate) length: u16,
    pub(crate) unit_id: UnitId,
}

/// encode a complete request ADU into the supplied buffer
///
/// The buffer is cleared first; on success it holds MBAP header + function code + data.
pub(crate) fn encode_request(
    buffer: &mut Vec<u8>,
    header: FrameHeader,
    function_code: u8,
    data: &[u8],
) -> Result<MbapHeader, RequestError> {
    let total = MBAP_HEADER_LENGTH + 1 + data.len();
    if total > MAX_TCP_ADU_SIZE {
        return Err(InvalidRequest::FrameTooLarge(total, MAX_TCP_ADU_SIZE).into());
    }

    // the length field counts the unit id, the function code and the data
    let length_field = (2 + data.len()) as u16;

    buffer.clear();
    buffer.extend_from_slice(&header.tx_id.to_u16().to_be_bytes());
    buffer.extend_from_slice(&MODBUS_PROTOCOL_ID.to_be_bytes());
    buffer.extend_from_slice(&length_field.to_be_bytes());
    buffer.push(header.unit_id.value);
    buffer.push(function_code);
    buffer.extend_from_slice(data);

    Ok(MbapHeader {
        tx_id: header.tx_id,
        protocol_id: MODBUS_PROTOCOL_ID,
        length: length_field,
        unit_id: header.unit_id,
    })
}

/// decode a complete response ADU, returning the header and the PDU bytes
/// (function code followed by data)
pub(crate) fn decode_response(adu: &[u8]) -> Result<(MbapHeader, &[u8]), RequestError> {
    if adu.len() < MIN_TCP_ADU_SIZE {
        return Err(FrameParseError::FrameTooShort(adu.len(), MIN_TCP_ADU_SIZE).into());
    }

    let mut cursor = scursor::ReadCursor::new(adu);
    let header = MbapHeader {
        tx_id: TxId::new(cursor.read_u16_be()?),
        protocol_id: cursor.read_u16_be()?,
        length: cursor.read_u16_be()?,
        unit_id: UnitId::new(cursor.read_u8()?),
    };

    let pdu_length = adu.len() - MBAP_HEADER_LENGTH;
    let declared = header.length as usize;
    if declared == 0 {
        return Err(FrameParseError::MbapLengthZero.into());
    }
    if pdu_length != declared - 1 {
        return Err(AduParseError::MbapLengthMismatch(pdu_length, declared - 1).into());
    }

    Ok((header, &adu[MBAP_HEADER_LENGTH..]))
}

#[derive(Clone, Copy)]
enum ParseState {
    Begin,
    // parsed header and the remaining ADU length (function code + data)
    Header(MbapHeader, usize),
}

/// Incremental MBAP parser for server sessions reading off a stream
pub(crate) struct MbapParser {
    state: ParseState,
    decode: FrameDecodeLevel,
}

impl MbapParser {
    pub(crate) fn new(decode: FrameDecodeLevel) -> Self {
        Self {
            state: ParseState::Begin,
            decode,
        }
    }

    fn parse_header(cursor: &mut ReadBuffer) -> Result<Option<(MbapHeader, usize)>, RequestError> {
        let header = MbapHeader {
            tx_id: TxId::new(cursor.read_u16_be()?),
            protocol_id: cursor.read_u16_be()?,
            length: cursor.read_u16_be()?,
            unit_id: UnitId::new(cursor.read_u8()?),
        };

        // a foreign protocol id discards the header and resynchronizes on
        // the next seven bytes
        if header.protocol_id != MODBUS_PROTOCOL_ID {
            tracing::warn!(
                "ignoring frame with non-MODBUS protocol id: {:#06X}",
                header.protocol_id
            );
            return Ok(None);
        }

        let length = header.length as usize;
        if length > MAX_MBAP_LENGTH_FIELD {
            return Err(FrameParseError::FrameLengthTooBig(length, MAX_MBAP_LENGTH_FIELD).into());
        }

        // the length field must be > 0 since the unit id counts towards it
        let adu_length = length
            .checked_sub(1)
            .ok_or(FrameParseError::MbapLengthZero)?;

        Ok(Some((header, adu_length)))
    }

    pub(crate) fn parse(&mut self, cursor: &mut ReadBuffer) -> Result<Option<Frame>, RequestError> {
        loop {
            match self.state {
                ParseState::Begin => {
                    if cursor.len() < MBAP_HEADER_LENGTH {
                        return Ok(None);
                    }
                    match Self::parse_header(cursor)? {
                        Some((header, adu_length)) => {
                            self.state = ParseState::Header(header, adu_length);
                        }
                        None => continue, // resynchronize
                    }
                }
                ParseState::Header(header, adu_length) => {
                    if cursor.len() < adu_length {
                        return Ok(None);
                    }

                    let mut frame =
                        Frame::new(FrameHeader::new(header.unit_id, header.tx_id));
                    frame.set(cursor.read(adu_length)?);
                    self.state = ParseState::Begin;

                    if self.decode.enabled() {
                        tracing::info!(
                            "MBAP RX - {}",
                            MbapDisplay::new(self.decode, header, frame.payload())
                        );
                    }

                    return Ok(Some(frame));
                }
            }
        }
    }
}

/// Reads MBAP frames off a physical layer, one at a time
pub(crate) struct FramedReader {
    parser: MbapParser,
    buffer: ReadBuffer,
}

impl FramedReader {
    pub(crate) fn new(decode: FrameDecodeLevel) -> Self {
        Self {
            parser: MbapParser::new(decode),
            buffer: ReadBuffer::new(MAX_TCP_ADU_SIZE),
        }
    }

    pub(crate) async fn next_frame(&mut self, io: &mut PhysLayer) -> Result<Frame, RequestError> {
        loop {
            match self.parser.parse(&mut self.buffer)? {
                Some(frame) => return Ok(frame),
                None => {
                    self.buffer.read_some_phys(io).await?;
                }
            }
        }
    }
}

pub(crate) struct MbapDisplay<'a> {
    level: FrameDecodeLevel,
    header: MbapHeader,
    bytes: &'a [u8],
}

impl<'a> MbapDisplay<'a> {
    pub(crate) fn new(level: FrameDecodeLevel, header: MbapHeader, bytes: &'a [u8]) -> Self {
        MbapDisplay {
            level,
            header,
            bytes,
        }
    }
}

impl std::fmt::Display for MbapDisplay<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "tx_id: {} unit: {} len: {}",
            self.header.tx_id, self.header.unit_id, self.header.length
        )?;
        if self.level.payload_enabled() {
            crate::common::phys::format_bytes(f, self.bytes)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::PhysDecodeLevel;
    use tokio_test::block_on;

    //                            |   tx id  |  proto id |  length  | unit | fc | body      |
    const SIMPLE_FRAME: &[u8] = &[0x00, 0x07, 0x00, 0x00, 0x00, 0x04, 0x2A, 0x01, 0xCA, 0xFE];

    fn reader_over(chunks: &[&[u8]]) -> (FramedReader, PhysLayer) {
        let mut builder = tokio_test::io::Builder::new();
        for chunk in chunks {
            builder.read(chunk);
        }
        (
            FramedReader::new(FrameDecodeLevel::Nothing),
            PhysLayer::new_mock(builder.build(), PhysDecodeLevel::Nothing),
        )
    }

    fn assert_simple_frame(frame: &Frame) {
        assert_eq!(frame.header.tx_id, TxId::new(0x0007));
        assert_eq!(frame.header.unit_id, UnitId::new(0x2A));
        assert_eq!(frame.payload(), &[0x01, 0xCA, 0xFE]);
    }

    #[test]
    fn encodes_the_spec_example_frame() {
        // tid = 0, unit = 0, fc = 1, nine data bytes
        let mut buffer = Vec::new();
        let header = FrameHeader::new(UnitId::new(0), TxId::new(0));
        encode_request(&mut buffer, header, 0x01, &[1, 2, 3, 4, 5, 6, 7, 8, 9]).unwrap();
        assert_eq!(
            buffer,
            &[
                0x00, 0x00, 0x00, 0x00, 0x00, 0x0B, 0x00, 0x01, 0x01, 0x02, 0x03, 0x04, 0x05,
                0x06, 0x07, 0x08, 0x09
            ]
        );
    }

    #[test]
    fn encode_then_decode_round_trips() {
        let mut buffer = Vec::new();
        let header = FrameHeader::new(UnitId::new(0x2A), TxId::new(7));
        encode_request(&mut buffer, header, 0x01, &[0xCA, 0xFE]).unwrap();
        assert_eq!(buffer, SIMPLE_FRAME);

        let (decoded, pdu) = decode_response(&buffer).unwrap();
        assert_eq!(decoded.tx_id, TxId::new(7));
        assert_eq!(decoded.unit_id, UnitId::new(0x2A));
        assert_eq!(pdu, &[0x01, 0xCA, 0xFE]);
    }

    #[test]
    fn decode_rejects_short_frames() {
        assert_eq!(
            decode_response(&[0x00; 7]),
            Err(FrameParseError::FrameTooShort(7, 8).into())
        );
    }

    #[test]
    fn decode_rejects_length_mismatch() {
        // header says length 5 (4 PDU bytes) but only 3 PDU bytes follow
        let adu = [0x00, 0x01, 0x00, 0x00, 0x00, 0x05, 0x01, 0x03, 0x02, 0x00];
        assert_eq!(
            decode_response(&adu),
            Err(AduParseError::MbapLengthMismatch(3, 4).into())
        );
    }

    #[test]
    fn parses_frame_from_a_stream() {
        let (mut reader, mut io) = reader_over(&[SIMPLE_FRAME]);
        let frame = block_on(reader.next_frame(&mut io)).unwrap();
        assert_simple_frame(&frame);
    }

    #[test]
    fn parses_frame_segmented_in_header() {
        let (f1, f2) = SIMPLE_FRAME.split_at(4);
        let (mut reader, mut io) = reader_over(&[f1, f2]);
        let frame = block_on(reader.next_frame(&mut io)).unwrap();
        assert_simple_frame(&frame);
    }

    #[test]
    fn parses_frame_segmented_in_payload() {
        let (f1, f2) = SIMPLE_FRAME.split_at(8);
        let (mut reader, mut io) = reader_over(&[f1, f2]);
        let frame = block_on(reader.next_frame(&mut io)).unwrap();
        assert_simple_frame(&frame);
    }

    #[test]
    fn resynchronizes_past_foreign_protocol_id() {
        let foreign = [0x00, 0x01, 0xCA, 0xFE, 0x00, 0x01, 0x2A];
        let (mut reader, mut io) = reader_over(&[&foreign, SIMPLE_FRAME]);
        let frame = block_on(reader.next_frame(&mut io)).unwrap();
        assert_simple_frame(&frame);
    }

    #[test]
    fn errors_on_zero_length_field() {
        let frame = [0x00, 0x07, 0x00, 0x00, 0x00, 0x00, 0x2A];
        let (mut reader, mut io) = reader_over(&[&frame]);
        let err = block_on(reader.next_frame(&mut io)).err().unwrap();
        assert_eq!(err, FrameParseError::MbapLengthZero.into());
    }

    #[test]
    fn errors_when_mbap_length_too_big() {
        let frame = [0x00, 0x07, 0x00, 0x00, 0x00, 0xFF, 0x2A];
        let (mut reader, mut io) = reader_over(&[&frame]);
        let err = block_on(reader.next_frame(&mut io)).err().unwrap();
        assert_eq!(
            err,
            FrameParseError::FrameLengthTooBig(0xFF, MAX_MBAP_LENGTH_FIELD).into()
        );
    }
}
