use std::sync::RwLock;

use crate::common::bits;
use crate::common::pdu::{bytes_to_registers, registers_to_bytes};
use crate::exception::ExceptionCode;
use crate::types::UnitId;

/// Start address and quantity of one register table
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RegisterSpan {
    /// first valid address of the table
    pub start: u16,
    /// number of addressable elements
    pub quantity: u16,
}

impl RegisterSpan {
    /// create a span
    pub fn new(start: u16, quantity: u16) -> Self {
        Self { start, quantity }
    }
}

/// Address layout of the four tables of a [`NodeRegister`]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RegisterLayout {
    /// coils, 1 bit each, writable
    pub coils: RegisterSpan,
    /// discrete inputs, 1 bit each, read-only from the protocol perspective
    pub discrete_inputs: RegisterSpan,
    /// input registers, 16 bits each, read-only from the protocol perspective
    pub input_registers: RegisterSpan,
    /// holding registers, 16 bits each, writable
    pub holding_registers: RegisterSpan,
}

struct BitTable {
    start: u16,
    quantity: u16,
    bytes: Vec<u8>,
}

impl BitTable {
    fn new(span: RegisterSpan) -> Self {
        Self {
            start: span.start,
            quantity: span.quantity,
            bytes: vec![0; bits::num_bytes_for_bits(span.quantity)],
        }
    }

    fn offset_of(&self, address: u16, quantity: u16) -> Result<usize, ExceptionCode> {
        let start = self.start as u32;
        let end = start + self.quantity as u32;
        let first = address as u32;
        if first < start || first + quantity as u32 > end {
            return Err(ExceptionCode::IllegalDataAddress);
        }
        Ok((first - start) as usize)
    }

    fn read(&self, address: u16, quantity: u16) -> Result<Vec<u8>, ExceptionCode> {
        let offset = self.offset_of(address, quantity)?;
        Ok(bits::extract_bits(&self.bytes, offset, quantity as usize))
    }

    fn write(&mut self, address: u16, quantity: u16, values: &[u8]) -> Result<(), ExceptionCode> {
        if values.len() * 8 < quantity as usize {
            return Err(ExceptionCode::IllegalDataValue);
        }
        let offset = self.offset_of(address, quantity)?;
        bits::store_bits(&mut self.bytes, offset, quantity as usize, values);
        Ok(())
    }
}

struct WordTable {
    start: u16,
    values: Vec<u16>,
}

impl WordTable {
    fn new(span: RegisterSpan) -> Self {
        Self {
            start: span.start,
            values: vec![0; span.quantity as usize],
        }
    }

    fn range_of(&self, address: u16, quantity: u16) -> Result<std::ops::Range<usize>, ExceptionCode> {
        let start = self.start as u32;
        let end = start + self.values.len() as u32;
        let first = address as u32;
        if first < start || first + quantity as u32 > end {
            return Err(ExceptionCode::IllegalDataAddress);
        }
        let offset = (first - start) as usize;
        Ok(offset..offset + quantity as usize)
    }

    fn read(&self, address: u16, quantity: u16) -> Result<Vec<u16>, ExceptionCode> {
        let range = self.range_of(address, quantity)?;
        Ok(self.values[range].to_vec())
    }

    fn write(&mut self, address: u16, values: &[u16]) -> Result<(), ExceptionCode> {
        let range = self.range_of(address, values.len() as u16)?;
        self.values[range].copy_from_slice(values);
        Ok(())
    }
}

struct Tables {
    coils: BitTable,
    discrete_inputs: BitTable,
    input_registers: WordTable,
    holding_registers: WordTable,
}

/// Per-slave register bank: coils, discrete inputs, input registers and
/// holding registers, each over a configurable address span
///
/// Reads may proceed in parallel; a write excludes all other access to the
/// same node.
pub struct NodeRegister {
    unit_id: UnitId,
    tables: RwLock<Tables>,
}

impl NodeRegister {
    /// create a bank with every table zero-initialized
    pub fn new(unit_id: UnitId, layout: RegisterLayout) -> Self {
        Self {
            unit_id,
            tables: RwLock::new(Tables {
                coils: BitTable::new(layout.coils),
                discrete_inputs: BitTable::new(layout.discrete_inputs),
                input_registers: WordTable::new(layout.input_registers),
                holding_registers: WordTable::new(layout.holding_registers),
            }),
        }
    }

    /// the slave id this bank answers for
    pub fn unit_id(&self) -> UnitId {
        self.unit_id
    }

    /// read `quantity` coils starting at `address`, packed LSB-first
    pub fn read_coils(&self, address: u16, quantity: u16) -> Result<Vec<u8>, ExceptionCode> {
        self.tables.read().unwrap().coils.read(address, quantity)
    }

    /// write `quantity` coils starting at `address` from LSB-first packed bytes
    pub fn write_coils(
        &self,
        address: u16,
        quantity: u16,
        values: &[u8],
    ) -> Result<(), ExceptionCode> {
        self.tables
            .write()
            .unwrap()
            .coils
            .write(address, quantity, values)
    }

    /// read one coil
    pub fn read_coil(&self, address: u16) -> Result<bool, ExceptionCode> {
        Ok(self.read_coils(address, 1)?[0] & 0x01 != 0)
    }

    /// write one coil
    pub fn write_coil(&self, address: u16, value: bool) -> Result<(), ExceptionCode> {
        self.write_coils(address, 1, &[u8::from(value)])
    }

    /// read `quantity` discrete inputs starting at `address`, packed LSB-first
    pub fn read_discrete_inputs(
        &self,
        address: u16,
        quantity: u16,
    ) -> Result<Vec<u8>, ExceptionCode> {
        self.tables
            .read()
            .unwrap()
            .discrete_inputs
            .read(address, quantity)
    }

    /// write `quantity` discrete inputs; the protocol cannot do this, the
    /// owning application uses it to publish state
    pub fn write_discrete_inputs(
        &self,
        address: u16,
        quantity: u16,
        values: &[u8],
    ) -> Result<(), ExceptionCode> {
        self.tables
            .write()
            .unwrap()
            .discrete_inputs
            .write(address, quantity, values)
    }

    /// read one discrete input
    pub fn read_discrete_input(&self, address: u16) -> Result<bool, ExceptionCode> {
        Ok(self.read_discrete_inputs(address, 1)?[0] & 0x01 != 0)
    }

    /// write one discrete input
    pub fn write_discrete_input(&self, address: u16, value: bool) -> Result<(), ExceptionCode> {
        self.write_discrete_inputs(address, 1, &[u8::from(value)])
    }

    /// read holding registers as big-endian bytes
    pub fn read_holdings_bytes(
        &self,
        address: u16,
        quantity: u16,
    ) -> Result<Vec<u8>, ExceptionCode> {
        Ok(registers_to_bytes(&self.read_holdings(address, quantity)?))
    }

    /// read holding registers
    pub fn read_holdings(&self, address: u16, quantity: u16) -> Result<Vec<u16>, ExceptionCode> {
        self.tables
            .read()
            .unwrap()
            .holding_registers
            .read(address, quantity)
    }

    /// write holding registers from big-endian bytes; the byte length must be
    /// exactly twice the quantity
    pub fn write_holdings_bytes(
        &self,
        address: u16,
        quantity: u16,
        values: &[u8],
    ) -> Result<(), ExceptionCode> {
        if values.len() != 2 * quantity as usize {
            return Err(ExceptionCode::IllegalDataValue);
        }
        self.write_holdings(address, &bytes_to_registers(values))
    }

    /// write holding registers
    pub fn write_holdings(&self, address: u16, values: &[u16]) -> Result<(), ExceptionCode> {
        self.tables
            .write()
            .unwrap()
            .holding_registers
            .write(address, values)
    }

    /// read input registers as big-endian bytes
    pub fn read_inputs_bytes(
        &self,
        address: u16,
        quantity: u16,
    ) -> Result<Vec<u8>, ExceptionCode> {
        Ok(registers_to_bytes(&self.read_inputs(address, quantity)?))
    }

    /// read input registers
    pub fn read_inputs(&self, address: u16, quantity: u16) -> Result<Vec<u16>, ExceptionCode> {
        self.tables
            .read()
            .unwrap()
            .input_registers
            .read(address, quantity)
    }

    /// write input registers from big-endian bytes; the protocol cannot do
    /// this, the owning application uses it to publish measurements
    pub fn write_inputs_bytes(
        &self,
        address: u16,
        quantity: u16,
        values: &[u8],
    ) -> Result<(), ExceptionCode> {
        if values.len() != 2 * quantity as usize {
            return Err(ExceptionCode::IllegalDataValue);
        }
        self.write_inputs(address, &bytes_to_registers(values))
    }

    /// write input registers
    pub fn write_inputs(&self, address: u16, values: &[u16]) -> Result<(), ExceptionCode> {
        self.tables
            .write()
            .unwrap()
            .input_registers
            .write(address, values)
    }

    /// apply `value := (value AND and_mask) OR (or_mask AND NOT and_mask)`
    /// to one holding register
    pub fn mask_write_holding(
        &self,
        address: u16,
        and_mask: u16,
        or_mask: u16,
    ) -> Result<(), ExceptionCode> {
        let mut tables = self.tables.write().unwrap();
        let range = tables.holding_registers.range_of(address, 1)?;
        let value = &mut tables.holding_registers.values[range.start];
        *value = (*value & and_mask) | (or_mask & !and_mask);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node() -> NodeRegister {
        NodeRegister::new(
            UnitId::new(1),
            RegisterLayout {
                coils: RegisterSpan::new(0, 24),
                discrete_inputs: RegisterSpan::new(100, 16),
                input_registers: RegisterSpan::new(0, 8),
                holding_registers: RegisterSpan::new(0, 8),
            },
        )
    }

    #[test]
    fn coil_round_trip_preserves_the_bit_pattern() {
        let node = node();
        node.write_coils(3, 10, &[0b1010_1100, 0b0000_0011]).unwrap();
        assert_eq!(node.read_coils(3, 10).unwrap(), vec![0b1010_1100, 0b0000_0011]);
        assert!(node.read_coil(5).unwrap());
        assert!(!node.read_coil(4).unwrap());
    }

    #[test]
    fn out_of_span_access_is_an_illegal_address() {
        let node = node();
        assert_eq!(node.read_coils(20, 5), Err(ExceptionCode::IllegalDataAddress));
        assert_eq!(node.read_coils(24, 1), Err(ExceptionCode::IllegalDataAddress));
        assert_eq!(
            node.read_discrete_inputs(99, 1),
            Err(ExceptionCode::IllegalDataAddress)
        );
        assert_eq!(
            node.write_holdings(7, &[1, 2]),
            Err(ExceptionCode::IllegalDataAddress)
        );
        assert_eq!(node.read_inputs(8, 1), Err(ExceptionCode::IllegalDataAddress));
    }

    #[test]
    fn offset_spans_honor_the_start_address() {
        let node = node();
        node.write_discrete_inputs(100, 3, &[0b0000_0101]).unwrap();
        assert_eq!(node.read_discrete_inputs(100, 3).unwrap(), vec![0b0000_0101]);
        assert!(node.read_discrete_input(102).unwrap());
    }

    #[test]
    fn holding_round_trip_is_bit_exact() {
        let node = node();
        let values = [0x1234, 0xFFFF, 0x0001];
        node.write_holdings(2, &values).unwrap();
        assert_eq!(node.read_holdings(2, 3).unwrap(), values);
        assert_eq!(
            node.read_holdings_bytes(2, 3).unwrap(),
            vec![0x12, 0x34, 0xFF, 0xFF, 0x00, 0x01]
        );
    }

    #[test]
    fn byte_form_writes_validate_their_length() {
        let node = node();
        assert_eq!(
            node.write_holdings_bytes(0, 2, &[0x00, 0x01, 0x00]),
            Err(ExceptionCode::IllegalDataValue)
        );
        node.write_holdings_bytes(0, 2, &[0x00, 0x01, 0x00, 0x02]).unwrap();
        assert_eq!(node.read_holdings(0, 2).unwrap(), vec![1, 2]);
    }

    #[test]
    fn mask_write_combines_the_masks() {
        let node = node();
        node.write_holdings(1, &[0x0012]).unwrap();
        node.mask_write_holding(1, 0x00F2, 0x0025).unwrap();
        assert_eq!(node.read_holdings(1, 1).unwrap(), vec![0x0017]);
    }

    #[test]
    fn mask_write_respects_the_table_span() {
        let node = NodeRegister::new(
            UnitId::new(1),
            RegisterLayout {
                holding_registers: RegisterSpan::new(10, 2),
                ..RegisterLayout::default()
            },
        );
        node.write_holdings(11, &[0x00FF]).unwrap();
        node.mask_write_holding(11, 0x0F0F, 0x1111).unwrap();
        assert_eq!(node.read_holdings(11, 1).unwrap(), vec![(0x00FF & 0x0F0F) | (0x1111 & !0x0F0F)]);
        assert_eq!(
            node.mask_write_holding(12, 0, 0),
            Err(ExceptionCode::IllegalDataAddress)
        );
    }

    #[test]
    fn input_registers_round_trip() {
        let node = node();
        node.write_inputs_bytes(0, 2, &[0xCA, 0xFE, 0xBE, 0xEF]).unwrap();
        assert_eq!(node.read_inputs(0, 2).unwrap(), vec![0xCAFE, 0xBEEF]);
        assert_eq!(node.read_inputs_bytes(0, 2).unwrap(), vec![0xCA, 0xFE, 0xBE, 0xEF]);
    }
}
