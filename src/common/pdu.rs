use crate::constants::frame::{MAX_PDU_SIZE, MIN_PDU_SIZE};
use crate::error::InvalidRequest;

/// Protocol data unit, independent of the underlying transport
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProtocolDataUnit {
    /// function code
    pub function_code: u8,
    /// data bytes, 0 to 252 of them
    pub data: Vec<u8>,
}

impl ProtocolDataUnit {
    /// create a new PDU from a function code and data bytes
    pub fn new(function_code: u8, data: Vec<u8>) -> Self {
        Self {
            function_code,
            data,
        }
    }

    /// interpret raw PDU bytes (function code followed by data) as a PDU
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, InvalidRequest> {
        if bytes.len() < MIN_PDU_SIZE || bytes.len() > MAX_PDU_SIZE {
            return Err(InvalidRequest::PduSizeOutOfRange(bytes.len()));
        }
        Ok(Self {
            function_code: bytes[0],
            data: bytes[1..].to_vec(),
        })
    }

    /// the encoded length of the PDU, function code included
    pub fn encoded_len(&self) -> usize {
        1 + self.data.len()
    }

    /// flatten back into raw bytes, function code first
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.encoded_len());
        out.push(self.function_code);
        out.extend_from_slice(&self.data);
        out
    }
}

pub(crate) struct PduDisplay<'a> {
    level: crate::decode::AppDecodeLevel,
    function_code: u8,
    data: &'a [u8],
}

impl<'a> PduDisplay<'a> {
    pub(crate) fn new(
        level: crate::decode::AppDecodeLevel,
        function_code: u8,
        data: &'a [u8],
    ) -> Self {
        Self {
            level,
            function_code,
            data,
        }
    }
}

impl std::fmt::Display for PduDisplay<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match crate::function::FunctionCode::get(self.function_code) {
            Some(code) => write!(f, "{code}")?,
            None => write!(f, "UNKNOWN ({:#04X})", self.function_code)?,
        }
        if self.level.data_values() {
            crate::common::phys::format_bytes(f, self.data)?;
        }
        Ok(())
    }
}

/// build a data block out of big-endian u16 words
pub(crate) fn data_block(words: &[u16]) -> Vec<u8> {
    let mut data = Vec::with_capacity(2 * words.len());
    for word in words {
        data.extend_from_slice(&word.to_be_bytes());
    }
    data
}

/// build a data block out of big-endian u16 words followed by a byte count and a value suffix
pub(crate) fn data_block_suffixed(words: &[u16], suffix: &[u8]) -> Vec<u8> {
    let mut data = Vec::with_capacity(2 * words.len() + 1 + suffix.len());
    for word in words {
        data.extend_from_slice(&word.to_be_bytes());
    }
    data.push(suffix.len() as u8);
    data.extend_from_slice(suffix);
    data
}

/// reinterpret big-endian register bytes as native u16 values
pub(crate) fn bytes_to_registers(bytes: &[u8]) -> Vec<u16> {
    bytes
        .chunks_exact(2)
        .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
        .collect()
}

/// flatten native u16 values into big-endian register bytes
pub(crate) fn registers_to_bytes(values: &[u16]) -> Vec<u8> {
    data_block(values)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_out_of_range_pdu_sizes() {
        assert_eq!(
            ProtocolDataUnit::from_bytes(&[]),
            Err(InvalidRequest::PduSizeOutOfRange(0))
        );
        let oversize = vec![0u8; 254];
        assert_eq!(
            ProtocolDataUnit::from_bytes(&oversize),
            Err(InvalidRequest::PduSizeOutOfRange(254))
        );
    }

    #[test]
    fn round_trips_through_bytes() {
        let pdu = ProtocolDataUnit::new(0x03, vec![0x00, 0x0A, 0x00, 0x02]);
        let bytes = pdu.to_bytes();
        assert_eq!(ProtocolDataUnit::from_bytes(&bytes).unwrap(), pdu);
    }

    #[test]
    fn builds_big_endian_data_blocks() {
        assert_eq!(data_block(&[0x0102, 0x0304]), vec![0x01, 0x02, 0x03, 0x04]);
        assert_eq!(
            data_block_suffixed(&[0x0001, 0x0002], &[0xAB, 0xCD]),
            vec![0x00, 0x01, 0x00, 0x02, 0x02, 0xAB, 0xCD]
        );
    }

    #[test]
    fn converts_register_bytes_both_ways() {
        let values = [0x1234u16, 0xABCD];
        let bytes = registers_to_bytes(&values);
        assert_eq!(bytes, vec![0x12, 0x34, 0xAB, 0xCD]);
        assert_eq!(bytes_to_registers(&bytes), values);
    }
}
