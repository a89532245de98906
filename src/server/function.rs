use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use scursor::ReadCursor;

use crate::common::bits::num_bytes_for_bits;
use crate::constants::limits;
use crate::exception::ExceptionCode;
use crate::function::constants as fc;
use crate::server::node::NodeRegister;

/// A server-side function handler: takes the register bank and the request
/// PDU data (function code excluded), returns the response PDU data
/// (function code excluded) or an exception
pub type FunctionHandler =
    Arc<dyn Fn(&NodeRegister, &[u8]) -> Result<Vec<u8>, ExceptionCode> + Send + Sync>;

/// Dispatch table mapping function codes to handlers
///
/// Pre-populated with the standard handlers for FCs 1-6, 15, 16, 22 and 23.
/// User handlers may replace or extend the table.
pub(crate) struct FunctionTable {
    handlers: RwLock<HashMap<u8, FunctionHandler>>,
}

impl Default for FunctionTable {
    fn default() -> Self {
        let mut handlers: HashMap<u8, FunctionHandler> = HashMap::new();
        handlers.insert(fc::READ_COILS, Arc::new(read_coils));
        handlers.insert(fc::READ_DISCRETE_INPUTS, Arc::new(read_discrete_inputs));
        handlers.insert(fc::READ_HOLDING_REGISTERS, Arc::new(read_holding_registers));
        handlers.insert(fc::READ_INPUT_REGISTERS, Arc::new(read_input_registers));
        handlers.insert(fc::WRITE_SINGLE_COIL, Arc::new(write_single_coil));
        handlers.insert(fc::WRITE_SINGLE_REGISTER, Arc::new(write_single_register));
        handlers.insert(fc::WRITE_MULTIPLE_COILS, Arc::new(write_multiple_coils));
        handlers.insert(
            fc::WRITE_MULTIPLE_REGISTERS,
            Arc::new(write_multiple_registers),
        );
        handlers.insert(fc::MASK_WRITE_REGISTER, Arc::new(mask_write_register));
        handlers.insert(
            fc::READ_WRITE_MULTIPLE_REGISTERS,
            Arc::new(read_write_multiple_registers),
        );
        Self {
            handlers: RwLock::new(handlers),
        }
    }
}

impl FunctionTable {
    pub(crate) fn get(&self, function_code: u8) -> Option<FunctionHandler> {
        self.handlers.read().unwrap().get(&function_code).cloned()
    }

    pub(crate) fn register(&self, function_code: u8, handler: FunctionHandler) {
        self.handlers.write().unwrap().insert(function_code, handler);
    }
}

fn parse_range(data: &[u8]) -> Result<(u16, u16), ExceptionCode> {
    if data.len() != 4 {
        return Err(ExceptionCode::IllegalDataValue);
    }
    let mut cursor = ReadCursor::new(data);
    let address = cursor.read_u16_be().map_err(|_| ExceptionCode::IllegalDataValue)?;
    let quantity = cursor.read_u16_be().map_err(|_| ExceptionCode::IllegalDataValue)?;
    Ok((address, quantity))
}

fn read_bits(
    node: &NodeRegister,
    data: &[u8],
    coils: bool,
) -> Result<Vec<u8>, ExceptionCode> {
    let (address, quantity) = parse_range(data)?;
    if quantity < 1 || quantity > limits::MAX_READ_BITS_COUNT {
        return Err(ExceptionCode::IllegalDataValue);
    }
    let values = if coils {
        node.read_coils(address, quantity)?
    } else {
        node.read_discrete_inputs(address, quantity)?
    };

    let mut response = Vec::with_capacity(1 + values.len());
    response.push(values.len() as u8);
    response.extend_from_slice(&values);
    Ok(response)
}

/// FC 0x01: request = {start, quantity}, response = {byte count, packed bits}
fn read_coils(node: &NodeRegister, data: &[u8]) -> Result<Vec<u8>, ExceptionCode> {
    read_bits(node, data, true)
}

/// FC 0x02: request = {start, quantity}, response = {byte count, packed bits}
fn read_discrete_inputs(node: &NodeRegister, data: &[u8]) -> Result<Vec<u8>, ExceptionCode> {
    read_bits(node, data, false)
}

fn read_registers(
    node: &NodeRegister,
    data: &[u8],
    holding: bool,
) -> Result<Vec<u8>, ExceptionCode> {
    let (address, quantity) = parse_range(data)?;
    if quantity < 1 || quantity > limits::MAX_READ_REGISTERS_COUNT {
        return Err(ExceptionCode::IllegalDataValue);
    }
    let values = if holding {
        node.read_holdings_bytes(address, quantity)?
    } else {
        node.read_inputs_bytes(address, quantity)?
    };

    let mut response = Vec::with_capacity(1 + values.len());
    response.push((2 * quantity) as u8);
    response.extend_from_slice(&values);
    Ok(response)
}

/// FC 0x03: request = {start, quantity}, response = {byte count, values}
fn read_holding_registers(node: &NodeRegister, data: &[u8]) -> Result<Vec<u8>, ExceptionCode> {
    read_registers(node, data, true)
}

/// FC 0x04: request = {start, quantity}, response = {byte count, values}
fn read_input_registers(node: &NodeRegister, data: &[u8]) -> Result<Vec<u8>, ExceptionCode> {
    read_registers(node, data, false)
}

/// FC 0x05: request = {address, 0xFF00 | 0x0000}, response echoes the request
fn write_single_coil(node: &NodeRegister, data: &[u8]) -> Result<Vec<u8>, ExceptionCode> {
    let (address, value) = parse_range(data)?;
    if value != crate::constants::coil::ON && value != crate::constants::coil::OFF {
        return Err(ExceptionCode::IllegalDataValue);
    }
    node.write_coil(address, value == crate::constants::coil::ON)?;
    Ok(data.to_vec())
}

/// FC 0x06: request = {address, value}, response echoes the request
fn write_single_register(node: &NodeRegister, data: &[u8]) -> Result<Vec<u8>, ExceptionCode> {
    let (address, value) = parse_range(data)?;
    node.write_holdings(address, &[value])?;
    Ok(data.to_vec())
}

/// FC 0x0F: request = {start, quantity, byte count, packed bits},
/// response = {start, quantity}
fn write_multiple_coils(node: &NodeRegister, data: &[u8]) -> Result<Vec<u8>, ExceptionCode> {
    if data.len() < 5 {
        return Err(ExceptionCode::IllegalDataValue);
    }
    let mut cursor = ReadCursor::new(data);
    let address = cursor.read_u16_be().map_err(|_| ExceptionCode::IllegalDataValue)?;
    let quantity = cursor.read_u16_be().map_err(|_| ExceptionCode::IllegalDataValue)?;
    let byte_count = cursor.read_u8().map_err(|_| ExceptionCode::IllegalDataValue)?;

    if quantity < 1
        || quantity > limits::MAX_WRITE_BITS_COUNT
        || byte_count as usize != num_bytes_for_bits(quantity)
        || cursor.remaining() != byte_count as usize
    {
        return Err(ExceptionCode::IllegalDataValue);
    }

    node.write_coils(address, quantity, &data[5..])?;
    Ok(data[..4].to_vec())
}

/// FC 0x10: request = {start, quantity, byte count, values},
/// response = {start, quantity}
fn write_multiple_registers(node: &NodeRegister, data: &[u8]) -> Result<Vec<u8>, ExceptionCode> {
    if data.len() < 5 {
        return Err(ExceptionCode::IllegalDataValue);
    }
    let mut cursor = ReadCursor::new(data);
    let address = cursor.read_u16_be().map_err(|_| ExceptionCode::IllegalDataValue)?;
    let quantity = cursor.read_u16_be().map_err(|_| ExceptionCode::IllegalDataValue)?;
    let byte_count = cursor.read_u8().map_err(|_| ExceptionCode::IllegalDataValue)?;

    if quantity < 1
        || quantity > limits::MAX_WRITE_REGISTERS_COUNT
        || byte_count as usize != 2 * quantity as usize
        || cursor.remaining() != byte_count as usize
    {
        return Err(ExceptionCode::IllegalDataValue);
    }

    node.write_holdings_bytes(address, quantity, &data[5..])?;
    Ok(data[..4].to_vec())
}

/// FC 0x16: request = {address, AND mask, OR mask}, response echoes the request
fn mask_write_register(node: &NodeRegister, data: &[u8]) -> Result<Vec<u8>, ExceptionCode> {
    if data.len() != 6 {
        return Err(ExceptionCode::IllegalDataValue);
    }
    let mut cursor = ReadCursor::new(data);
    let address = cursor.read_u16_be().map_err(|_| ExceptionCode::IllegalDataValue)?;
    let and_mask = cursor.read_u16_be().map_err(|_| ExceptionCode::IllegalDataValue)?;
    let or_mask = cursor.read_u16_be().map_err(|_| ExceptionCode::IllegalDataValue)?;

    node.mask_write_holding(address, and_mask, or_mask)?;
    Ok(data.to_vec())
}

/// FC 0x17: request = {read start, read qty, write start, write qty,
/// write byte count, write values}; the write happens first, then the read;
/// response = {byte count, read values}
fn read_write_multiple_registers(
    node: &NodeRegister,
    data: &[u8],
) -> Result<Vec<u8>, ExceptionCode> {
    if data.len() < 9 {
        return Err(ExceptionCode::IllegalDataValue);
    }
    let mut cursor = ReadCursor::new(data);
    let read_address = cursor.read_u16_be().map_err(|_| ExceptionCode::IllegalDataValue)?;
    let read_quantity = cursor.read_u16_be().map_err(|_| ExceptionCode::IllegalDataValue)?;
    let write_address = cursor.read_u16_be().map_err(|_| ExceptionCode::IllegalDataValue)?;
    let write_quantity = cursor.read_u16_be().map_err(|_| ExceptionCode::IllegalDataValue)?;
    let write_byte_count = cursor.read_u8().map_err(|_| ExceptionCode::IllegalDataValue)?;

    if read_quantity < 1
        || read_quantity > limits::MAX_READ_WRITE_READ_COUNT
        || write_quantity < 1
        || write_quantity > limits::MAX_READ_WRITE_WRITE_COUNT
        || write_byte_count as usize != 2 * write_quantity as usize
        || cursor.remaining() != write_byte_count as usize
    {
        return Err(ExceptionCode::IllegalDataValue);
    }

    node.write_holdings_bytes(write_address, write_quantity, &data[9..])?;
    let values = node.read_holdings_bytes(read_address, read_quantity)?;

    let mut response = Vec::with_capacity(1 + values.len());
    response.push((2 * read_quantity) as u8);
    response.extend_from_slice(&values);
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::node::{RegisterLayout, RegisterSpan};
    use crate::types::UnitId;

    fn node() -> NodeRegister {
        NodeRegister::new(
            UnitId::new(1),
            RegisterLayout {
                coils: RegisterSpan::new(0, 16),
                discrete_inputs: RegisterSpan::new(0, 16),
                input_registers: RegisterSpan::new(0, 8),
                holding_registers: RegisterSpan::new(0, 8),
            },
        )
    }

    #[test]
    fn read_coils_packs_bits_with_zero_tail() {
        let node = node();
        node.write_coil(0, true).unwrap();
        node.write_coil(2, true).unwrap();
        let response = read_coils(&node, &[0x00, 0x00, 0x00, 0x0A]).unwrap();
        assert_eq!(response, vec![0x02, 0b0000_0101, 0x00]);
    }

    #[test]
    fn read_handlers_validate_the_body_length() {
        let node = node();
        assert_eq!(
            read_coils(&node, &[0x00, 0x00, 0x00]),
            Err(ExceptionCode::IllegalDataValue)
        );
        assert_eq!(
            read_holding_registers(&node, &[0x00, 0x00, 0x00, 0x01, 0xFF]),
            Err(ExceptionCode::IllegalDataValue)
        );
    }

    #[test]
    fn read_handlers_validate_the_quantity() {
        let node = node();
        assert_eq!(
            read_coils(&node, &[0x00, 0x00, 0x00, 0x00]),
            Err(ExceptionCode::IllegalDataValue)
        );
        assert_eq!(
            read_coils(&node, &[0x00, 0x00, 0x07, 0xD1]),
            Err(ExceptionCode::IllegalDataValue)
        );
        assert_eq!(
            read_holding_registers(&node, &[0x00, 0x00, 0x00, 0x7E]),
            Err(ExceptionCode::IllegalDataValue)
        );
    }

    #[test]
    fn out_of_range_reads_are_illegal_addresses() {
        let node = node();
        assert_eq!(
            read_holding_registers(&node, &[0x00, 0x07, 0x00, 0x02]),
            Err(ExceptionCode::IllegalDataAddress)
        );
    }

    #[test]
    fn write_single_coil_requires_the_two_magic_values() {
        let node = node();
        let echoed = write_single_coil(&node, &[0x00, 0x01, 0xFF, 0x00]).unwrap();
        assert_eq!(echoed, vec![0x00, 0x01, 0xFF, 0x00]);
        assert!(node.read_coil(1).unwrap());

        assert_eq!(
            write_single_coil(&node, &[0x00, 0x01, 0x12, 0x34]),
            Err(ExceptionCode::IllegalDataValue)
        );
    }

    #[test]
    fn write_multiple_coils_checks_the_byte_count() {
        let node = node();
        // quantity 10 requires 2 bytes, only 1 supplied
        assert_eq!(
            write_multiple_coils(&node, &[0x00, 0x00, 0x00, 0x0A, 0x01, 0xFF]),
            Err(ExceptionCode::IllegalDataValue)
        );
        let response =
            write_multiple_coils(&node, &[0x00, 0x00, 0x00, 0x0A, 0x02, 0xFF, 0x03]).unwrap();
        assert_eq!(response, vec![0x00, 0x00, 0x00, 0x0A]);
        assert_eq!(node.read_coils(0, 10).unwrap(), vec![0xFF, 0x03]);
    }

    #[test]
    fn write_multiple_registers_round_trips() {
        let node = node();
        let response = write_multiple_registers(
            &node,
            &[0x00, 0x01, 0x00, 0x02, 0x04, 0x12, 0x34, 0x56, 0x78],
        )
        .unwrap();
        assert_eq!(response, vec![0x00, 0x01, 0x00, 0x02]);
        assert_eq!(node.read_holdings(1, 2).unwrap(), vec![0x1234, 0x5678]);
    }

    #[test]
    fn mask_write_applies_the_documented_formula() {
        let node = node();
        node.write_holdings(1, &[0x0012]).unwrap();
        let response = mask_write_register(&node, &[0x00, 0x01, 0x00, 0xF2, 0x00, 0x25]).unwrap();
        assert_eq!(response, vec![0x00, 0x01, 0x00, 0xF2, 0x00, 0x25]);
        assert_eq!(node.read_holdings(1, 1).unwrap(), vec![0x0017]);
    }

    #[test]
    fn read_write_multiple_registers_writes_before_reading() {
        let node = node();
        // write 0xABCD at address 2, read two registers starting at address 2
        let response = read_write_multiple_registers(
            &node,
            &[0x00, 0x02, 0x00, 0x02, 0x00, 0x02, 0x00, 0x01, 0x02, 0xAB, 0xCD],
        )
        .unwrap();
        assert_eq!(response, vec![0x04, 0xAB, 0xCD, 0x00, 0x00]);
    }

    #[test]
    fn dispatch_table_resolves_and_extends() {
        let table = FunctionTable::default();
        assert!(table.get(fc::READ_COILS).is_some());
        assert!(table.get(0x18).is_none());

        table.register(0x41, Arc::new(|_, _| Ok(vec![0x01])));
        let handler = table.get(0x41).unwrap();
        assert_eq!(handler(&node(), &[]), Ok(vec![0x01]));
    }
}
