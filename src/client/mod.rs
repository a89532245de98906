pub(crate) mod serial;

mod ascii;
mod rtu;
mod tcp;

pub use self::ascii::AsciiClientProvider;
pub use self::rtu::RtuClientProvider;
pub use self::serial::{SERIAL_DEFAULT_AUTO_RECONNECT, SERIAL_MAX_AUTO_RECONNECT};
pub use self::tcp::{TcpClientProvider, TCP_DEFAULT_TIMEOUT};

use async_trait::async_trait;

use crate::common::pdu::{self, ProtocolDataUnit};
use crate::constants::limits;
use crate::error::{AduParseError, InvalidRequest, RequestError};
use crate::exception::ExceptionCode;
use crate::function::{constants as fc, FunctionCode};
use crate::types::{AddressRange, UnitId};

/// The contract implemented by the three transports (TCP, RTU, ASCII)
///
/// A provider owns a single transport resource. Each request/response
/// round-trip holds the transport exclusively, so a provider serializes
/// concurrent callers.
#[async_trait]
pub trait ClientProvider: Send + Sync {
    /// open the transport, or reuse it if it is already open
    async fn connect(&self) -> Result<(), RequestError>;

    /// true if the transport is currently open
    async fn is_connected(&self) -> bool;

    /// close the transport
    async fn close(&self) -> Result<(), RequestError>;

    /// encode the request, perform the wire round-trip, decode and verify
    /// the matched response
    async fn send(
        &self,
        unit_id: UnitId,
        request: ProtocolDataUnit,
    ) -> Result<ProtocolDataUnit, RequestError>;

    /// like [`ClientProvider::send`], but operating on raw PDU bytes
    /// (function code followed by data) in both directions
    async fn send_pdu(&self, unit_id: UnitId, request: &[u8]) -> Result<Vec<u8>, RequestError> {
        let request = ProtocolDataUnit::from_bytes(request)?;
        let response = self.send(unit_id, request).await?;
        Ok(response.to_bytes())
    }

    /// transport-level round-trip on the wire: the request must be a fully
    /// encoded ADU, the response is returned undecoded
    async fn send_raw(&self, request: &[u8]) -> Result<Vec<u8>, RequestError>;
}

/// verify the response function code and data against the request
///
/// An exception reply (request code with the 0x80 bit set) surfaces as
/// [`RequestError::Exception`]; any other mismatch is a correlation error.
pub(crate) fn verify_function_and_data(
    request_fc: u8,
    response_fc: u8,
    data: &[u8],
) -> Result<(), RequestError> {
    if response_fc == request_fc | fc::ERROR_DELIMITER {
        let code = data
            .first()
            .copied()
            .map(ExceptionCode::from)
            .unwrap_or(ExceptionCode::Unknown(0));
        return Err(RequestError::Exception(code));
    }
    if response_fc != request_fc {
        return Err(AduParseError::FunctionCodeMismatch(response_fc, request_fc).into());
    }
    if data.is_empty() {
        return Err(AduParseError::EmptyResponseData.into());
    }
    Ok(())
}

/// A MODBUS client: typed operations implemented once over any [`ClientProvider`]
pub struct Client {
    provider: Box<dyn ClientProvider>,
}

impl Client {
    /// wrap a transport provider
    pub fn new(provider: impl ClientProvider + 'static) -> Self {
        Self {
            provider: Box::new(provider),
        }
    }

    /// access the underlying provider, e.g. for raw PDU or raw ADU calls
    pub fn provider(&self) -> &dyn ClientProvider {
        self.provider.as_ref()
    }

    /// open the transport, or reuse it if it is already open
    pub async fn connect(&self) -> Result<(), RequestError> {
        self.provider.connect().await
    }

    /// true if the transport is currently open
    pub async fn is_connected(&self) -> bool {
        self.provider.is_connected().await
    }

    /// close the transport
    pub async fn close(&self) -> Result<(), RequestError> {
        self.provider.close().await
    }

    /// send one PDU and return the verified response PDU
    pub async fn send(
        &self,
        unit_id: UnitId,
        request: ProtocolDataUnit,
    ) -> Result<ProtocolDataUnit, RequestError> {
        self.provider.send(unit_id, request).await
    }

    /// send raw PDU bytes (function code first) and return the response bytes
    pub async fn send_pdu(&self, unit_id: UnitId, request: &[u8]) -> Result<Vec<u8>, RequestError> {
        self.provider.send_pdu(unit_id, request).await
    }

    /// send a fully encoded ADU and return the raw response ADU
    pub async fn send_raw(&self, request: &[u8]) -> Result<Vec<u8>, RequestError> {
        self.provider.send_raw(request).await
    }

    async fn read_bits(
        &self,
        unit_id: UnitId,
        range: AddressRange,
        function: FunctionCode,
    ) -> Result<Vec<u8>, RequestError> {
        unit_id.check_read_target()?;
        let range = range.limited_to(limits::MAX_READ_BITS_COUNT)?;

        let request = ProtocolDataUnit::new(
            function.get_value(),
            pdu::data_block(&[range.start, range.count]),
        );
        let response = self.provider.send(unit_id, request).await?;

        let declared = *response
            .data
            .first()
            .ok_or(AduParseError::EmptyResponseData)? as usize;
        let actual = response.data.len() - 1;
        if actual != declared {
            return Err(AduParseError::ByteCountMismatch(actual, declared).into());
        }
        let expected = range.byte_count_for_bits();
        if declared != expected {
            return Err(AduParseError::ByteCountMismatch(declared, expected).into());
        }
        Ok(response.data[1..].to_vec())
    }

    /// read from 1 to 2000 contiguous coils, returned LSB-first packed
    pub async fn read_coils(
        &self,
        unit_id: UnitId,
        range: AddressRange,
    ) -> Result<Vec<u8>, RequestError> {
        self.read_bits(unit_id, range, FunctionCode::ReadCoils).await
    }

    /// read from 1 to 2000 contiguous discrete inputs, returned LSB-first packed
    pub async fn read_discrete_inputs(
        &self,
        unit_id: UnitId,
        range: AddressRange,
    ) -> Result<Vec<u8>, RequestError> {
        self.read_bits(unit_id, range, FunctionCode::ReadDiscreteInputs)
            .await
    }

    async fn read_registers_bytes(
        &self,
        unit_id: UnitId,
        range: AddressRange,
        function: FunctionCode,
    ) -> Result<Vec<u8>, RequestError> {
        unit_id.check_read_target()?;
        let range = range.limited_to(limits::MAX_READ_REGISTERS_COUNT)?;

        let request = ProtocolDataUnit::new(
            function.get_value(),
            pdu::data_block(&[range.start, range.count]),
        );
        let response = self.provider.send(unit_id, request).await?;

        let declared = *response
            .data
            .first()
            .ok_or(AduParseError::EmptyResponseData)? as usize;
        let actual = response.data.len() - 1;
        if actual != declared {
            return Err(AduParseError::ByteCountMismatch(actual, declared).into());
        }
        let expected = range.byte_count_for_registers();
        if declared != expected {
            return Err(AduParseError::ByteCountMismatch(declared, expected).into());
        }
        Ok(response.data[1..].to_vec())
    }

    /// read from 1 to 125 contiguous holding registers as big-endian bytes
    pub async fn read_holding_registers_bytes(
        &self,
        unit_id: UnitId,
        range: AddressRange,
    ) -> Result<Vec<u8>, RequestError> {
        self.read_registers_bytes(unit_id, range, FunctionCode::ReadHoldingRegisters)
            .await
    }

    /// read from 1 to 125 contiguous holding registers
    pub async fn read_holding_registers(
        &self,
        unit_id: UnitId,
        range: AddressRange,
    ) -> Result<Vec<u16>, RequestError> {
        let bytes = self.read_holding_registers_bytes(unit_id, range).await?;
        Ok(pdu::bytes_to_registers(&bytes))
    }

    /// read from 1 to 125 contiguous input registers as big-endian bytes
    pub async fn read_input_registers_bytes(
        &self,
        unit_id: UnitId,
        range: AddressRange,
    ) -> Result<Vec<u8>, RequestError> {
        self.read_registers_bytes(unit_id, range, FunctionCode::ReadInputRegisters)
            .await
    }

    /// read from 1 to 125 contiguous input registers
    pub async fn read_input_registers(
        &self,
        unit_id: UnitId,
        range: AddressRange,
    ) -> Result<Vec<u16>, RequestError> {
        let bytes = self.read_input_registers_bytes(unit_id, range).await?;
        Ok(pdu::bytes_to_registers(&bytes))
    }

    /// force a single coil ON or OFF; broadcast (unit id 0) is accepted
    pub async fn write_single_coil(
        &self,
        unit_id: UnitId,
        address: u16,
        value: bool,
    ) -> Result<(), RequestError> {
        unit_id.check_write_target()?;
        let raw_value = if value {
            crate::constants::coil::ON
        } else {
            crate::constants::coil::OFF
        };

        let request = ProtocolDataUnit::new(
            fc::WRITE_SINGLE_COIL,
            pdu::data_block(&[address, raw_value]),
        );
        let response = self.provider.send(unit_id, request).await?;
        Self::check_write_echo(&response.data, &[address, raw_value])
    }

    /// write a single holding register; broadcast (unit id 0) is accepted
    pub async fn write_single_register(
        &self,
        unit_id: UnitId,
        address: u16,
        value: u16,
    ) -> Result<(), RequestError> {
        unit_id.check_write_target()?;
        let request = ProtocolDataUnit::new(
            fc::WRITE_SINGLE_REGISTER,
            pdu::data_block(&[address, value]),
        );
        let response = self.provider.send(unit_id, request).await?;
        Self::check_write_echo(&response.data, &[address, value])
    }

    /// force a sequence of 1 to 1968 coils, values packed LSB-first
    pub async fn write_multiple_coils(
        &self,
        unit_id: UnitId,
        range: AddressRange,
        values: &[u8],
    ) -> Result<(), RequestError> {
        unit_id.check_write_target()?;
        let range = range.limited_to(limits::MAX_WRITE_BITS_COUNT)?;
        let expected = range.byte_count_for_bits();
        if values.len() != expected {
            return Err(InvalidRequest::ValueLengthMismatch(values.len(), expected).into());
        }

        let request = ProtocolDataUnit::new(
            fc::WRITE_MULTIPLE_COILS,
            pdu::data_block_suffixed(&[range.start, range.count], values),
        );
        let response = self.provider.send(unit_id, request).await?;
        Self::check_write_echo(&response.data, &[range.start, range.count])
    }

    /// write a block of 1 to 123 holding registers given as big-endian bytes
    pub async fn write_multiple_registers_bytes(
        &self,
        unit_id: UnitId,
        range: AddressRange,
        values: &[u8],
    ) -> Result<(), RequestError> {
        unit_id.check_write_target()?;
        let range = range.limited_to(limits::MAX_WRITE_REGISTERS_COUNT)?;
        let expected = range.byte_count_for_registers();
        if values.len() != expected {
            return Err(InvalidRequest::ValueLengthMismatch(values.len(), expected).into());
        }

        let request = ProtocolDataUnit::new(
            fc::WRITE_MULTIPLE_REGISTERS,
            pdu::data_block_suffixed(&[range.start, range.count], values),
        );
        let response = self.provider.send(unit_id, request).await?;
        Self::check_write_echo(&response.data, &[range.start, range.count])
    }

    /// write a block of 1 to 123 holding registers
    pub async fn write_multiple_registers(
        &self,
        unit_id: UnitId,
        start: u16,
        values: &[u16],
    ) -> Result<(), RequestError> {
        if values.len() > limits::MAX_WRITE_REGISTERS_COUNT as usize {
            return Err(InvalidRequest::CountTooBigForType(
                values.len().min(u16::MAX as usize) as u16,
                limits::MAX_WRITE_REGISTERS_COUNT,
            )
            .into());
        }
        let range = AddressRange::try_from(start, values.len() as u16)?;
        self.write_multiple_registers_bytes(unit_id, range, &pdu::registers_to_bytes(values))
            .await
    }

    /// modify a holding register with an AND mask and an OR mask:
    /// `value := (value AND and_mask) OR (or_mask AND NOT and_mask)`
    pub async fn mask_write_register(
        &self,
        unit_id: UnitId,
        address: u16,
        and_mask: u16,
        or_mask: u16,
    ) -> Result<(), RequestError> {
        unit_id.check_write_target()?;
        let request = ProtocolDataUnit::new(
            fc::MASK_WRITE_REGISTER,
            pdu::data_block(&[address, and_mask, or_mask]),
        );
        let response = self.provider.send(unit_id, request).await?;
        Self::check_write_echo(&response.data, &[address, and_mask, or_mask])
    }

    /// write then read holding registers in a single transaction, byte form
    pub async fn read_write_multiple_registers_bytes(
        &self,
        unit_id: UnitId,
        read_range: AddressRange,
        write_range: AddressRange,
        values: &[u8],
    ) -> Result<Vec<u8>, RequestError> {
        unit_id.check_read_target()?;
        let read_range = read_range.limited_to(limits::MAX_READ_WRITE_READ_COUNT)?;
        let write_range = write_range.limited_to(limits::MAX_READ_WRITE_WRITE_COUNT)?;
        let expected_write = write_range.byte_count_for_registers();
        if values.len() != expected_write {
            return Err(InvalidRequest::ValueLengthMismatch(values.len(), expected_write).into());
        }

        let request = ProtocolDataUnit::new(
            fc::READ_WRITE_MULTIPLE_REGISTERS,
            pdu::data_block_suffixed(
                &[
                    read_range.start,
                    read_range.count,
                    write_range.start,
                    write_range.count,
                ],
                values,
            ),
        );
        let response = self.provider.send(unit_id, request).await?;

        let declared = *response
            .data
            .first()
            .ok_or(AduParseError::EmptyResponseData)? as usize;
        let actual = response.data.len() - 1;
        if actual != declared {
            return Err(AduParseError::ByteCountMismatch(actual, declared).into());
        }
        let expected_read = read_range.byte_count_for_registers();
        if declared != expected_read {
            return Err(AduParseError::ByteCountMismatch(declared, expected_read).into());
        }
        Ok(response.data[1..].to_vec())
    }

    /// write then read holding registers in a single transaction
    pub async fn read_write_multiple_registers(
        &self,
        unit_id: UnitId,
        read_range: AddressRange,
        write_start: u16,
        values: &[u16],
    ) -> Result<Vec<u16>, RequestError> {
        if values.len() > limits::MAX_READ_WRITE_WRITE_COUNT as usize {
            return Err(InvalidRequest::CountTooBigForType(
                values.len().min(u16::MAX as usize) as u16,
                limits::MAX_READ_WRITE_WRITE_COUNT,
            )
            .into());
        }
        let write_range = AddressRange::try_from(write_start, values.len() as u16)?;
        let bytes = self
            .read_write_multiple_registers_bytes(
                unit_id,
                read_range,
                write_range,
                &pdu::registers_to_bytes(values),
            )
            .await?;
        Ok(pdu::bytes_to_registers(&bytes))
    }

    /// read the contents of a FIFO queue of registers, returned as
    /// big-endian register bytes
    pub async fn read_fifo_queue(
        &self,
        unit_id: UnitId,
        address: u16,
    ) -> Result<Vec<u8>, RequestError> {
        unit_id.check_read_target()?;
        let request = ProtocolDataUnit::new(fc::READ_FIFO_QUEUE, pdu::data_block(&[address]));
        let response = self.provider.send(unit_id, request).await?;

        let data = &response.data;
        if data.len() < 4 {
            return Err(AduParseError::ByteCountMismatch(data.len(), 4).into());
        }
        let declared = u16::from_be_bytes([data[0], data[1]]) as usize;
        if data.len() - 2 != declared {
            return Err(AduParseError::ByteCountMismatch(data.len() - 2, declared).into());
        }
        let fifo_count = u16::from_be_bytes([data[2], data[3]]);
        if fifo_count > limits::MAX_FIFO_COUNT {
            return Err(AduParseError::FifoCountTooBig(fifo_count).into());
        }
        Ok(data[4..].to_vec())
    }

    /// echoed write responses carry fixed big-endian words that must match the request
    fn check_write_echo(data: &[u8], words: &[u16]) -> Result<(), RequestError> {
        let expected = 2 * words.len();
        if data.len() != expected {
            return Err(AduParseError::ByteCountMismatch(data.len(), expected).into());
        }
        for (chunk, word) in data.chunks_exact(2).zip(words) {
            if u16::from_be_bytes([chunk[0], chunk[1]]) != *word {
                return Err(AduParseError::EchoMismatch.into());
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exception_replies_become_typed_errors() {
        assert_eq!(
            verify_function_and_data(0x01, 0x81, &[0x02]),
            Err(RequestError::Exception(ExceptionCode::IllegalDataAddress))
        );
    }

    #[test]
    fn function_code_mismatch_is_a_correlation_error() {
        assert_eq!(
            verify_function_and_data(0x01, 0x03, &[0x02]),
            Err(AduParseError::FunctionCodeMismatch(0x03, 0x01).into())
        );
    }

    #[test]
    fn empty_response_data_is_rejected() {
        assert_eq!(
            verify_function_and_data(0x01, 0x01, &[]),
            Err(AduParseError::EmptyResponseData.into())
        );
    }

    #[test]
    fn matching_response_passes() {
        assert_eq!(verify_function_and_data(0x01, 0x01, &[0x01, 0x00]), Ok(()));
    }

    #[test]
    fn write_echo_checks_length_and_values() {
        assert_eq!(Client::check_write_echo(&[0x00, 0x01, 0xFF, 0x00], &[1, 0xFF00]), Ok(()));
        assert_eq!(
            Client::check_write_echo(&[0x00, 0x01], &[1, 0xFF00]),
            Err(AduParseError::ByteCountMismatch(2, 4).into())
        );
        assert_eq!(
            Client::check_write_echo(&[0x00, 0x01, 0x00, 0x00], &[1, 0xFF00]),
            Err(AduParseError::EchoMismatch.into())
        );
    }
}
