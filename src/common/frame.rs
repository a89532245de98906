use crate::constants::frame::MAX_PDU_SIZE;
use crate::types::UnitId;

/// Transaction identifier used to correlate TCP requests and responses
#[derive(PartialEq, Eq, Copy, Clone, Debug)]
pub(crate) struct TxId {
    value: u16,
}

impl TxId {
    pub(crate) fn new(value: u16) -> Self {
        TxId { value }
    }

    pub(crate) fn to_u16(self) -> u16 {
        self.value
    }
}

impl std::fmt::Display for TxId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#06X}", self.value)
    }
}

#[derive(Copy, Clone, Debug)]
pub(crate) struct FrameHeader {
    pub(crate) unit_id: UnitId,
    pub(crate) tx_id: TxId,
}

impl FrameHeader {
    pub(crate) fn new(unit_id: UnitId, tx_id: TxId) -> Self {
        FrameHeader { unit_id, tx_id }
    }
}

/// A fully framed PDU (function code + data) and the envelope it arrived in
pub(crate) struct Frame {
    pub(crate) header: FrameHeader,
    length: usize,
    pdu: [u8; MAX_PDU_SIZE],
}

impl Frame {
    pub(crate) fn new(header: FrameHeader) -> Frame {
        Frame {
            header,
            length: 0,
            pdu: [0; MAX_PDU_SIZE],
        }
    }

    pub(crate) fn set(&mut self, src: &[u8]) -> bool {
        if src.len() > self.pdu.len() {
            return false;
        }
        self.pdu[0..src.len()].copy_from_slice(src);
        self.length = src.len();
        true
    }

    /// function code followed by the PDU data
    pub(crate) fn payload(&self) -> &[u8] {
        &self.pdu[0..self.length]
    }
}
