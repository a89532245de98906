pub(crate) mod constants {
    pub(crate) const READ_COILS: u8 = 1;
    pub(crate) const READ_DISCRETE_INPUTS: u8 = 2;
    pub(crate) const READ_HOLDING_REGISTERS: u8 = 3;
    pub(crate) const READ_INPUT_REGISTERS: u8 = 4;
    pub(crate) const WRITE_SINGLE_COIL: u8 = 5;
    pub(crate) const WRITE_SINGLE_REGISTER: u8 = 6;
    pub(crate) const WRITE_MULTIPLE_COILS: u8 = 15;
    pub(crate) const WRITE_MULTIPLE_REGISTERS: u8 = 16;
    pub(crate) const MASK_WRITE_REGISTER: u8 = 22;
    pub(crate) const READ_WRITE_MULTIPLE_REGISTERS: u8 = 23;
    pub(crate) const READ_FIFO_QUEUE: u8 = 24;

    pub(crate) const ERROR_DELIMITER: u8 = 0x80;
}

/// Function codes supported by this library
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum FunctionCode {
    /// Read coils (0x01)
    ReadCoils,
    /// Read discrete inputs (0x02)
    ReadDiscreteInputs,
    /// Read holding registers (0x03)
    ReadHoldingRegisters,
    /// Read input registers (0x04)
    ReadInputRegisters,
    /// Write single coil (0x05)
    WriteSingleCoil,
    /// Write single register (0x06)
    WriteSingleRegister,
    /// Write multiple coils (0x0F)
    WriteMultipleCoils,
    /// Write multiple registers (0x10)
    WriteMultipleRegisters,
    /// Mask write register (0x16)
    MaskWriteRegister,
    /// Read and write multiple registers in one transaction (0x17)
    ReadWriteMultipleRegisters,
    /// Read FIFO queue (0x18), request side only
    ReadFifoQueue,
}

impl FunctionCode {
    /// try to obtain a function code from its numeric value
    pub fn get(value: u8) -> Option<Self> {
        match value {
            constants::READ_COILS => Some(FunctionCode::ReadCoils),
            constants::READ_DISCRETE_INPUTS => Some(FunctionCode::ReadDiscreteInputs),
            constants::READ_HOLDING_REGISTERS => Some(FunctionCode::ReadHoldingRegisters),
            constants::READ_INPUT_REGISTERS => Some(FunctionCode::ReadInputRegisters),
            constants::WRITE_SINGLE_COIL => Some(FunctionCode::WriteSingleCoil),
            constants::WRITE_SINGLE_REGISTER => Some(FunctionCode::WriteSingleRegister),
            constants::WRITE_MULTIPLE_COILS => Some(FunctionCode::WriteMultipleCoils),
            constants::WRITE_MULTIPLE_REGISTERS => Some(FunctionCode::WriteMultipleRegisters),
            constants::MASK_WRITE_REGISTER => Some(FunctionCode::MaskWriteRegister),
            constants::READ_WRITE_MULTIPLE_REGISTERS => {
                Some(FunctionCode::ReadWriteMultipleRegisters)
            }
            constants::READ_FIFO_QUEUE => Some(FunctionCode::ReadFifoQueue),
            _ => None,
        }
    }

    /// the numeric value of the function code
    pub const fn get_value(self) -> u8 {
        match self {
            FunctionCode::ReadCoils => constants::READ_COILS,
            FunctionCode::ReadDiscreteInputs => constants::READ_DISCRETE_INPUTS,
            FunctionCode::ReadHoldingRegisters => constants::READ_HOLDING_REGISTERS,
            FunctionCode::ReadInputRegisters => constants::READ_INPUT_REGISTERS,
            FunctionCode::WriteSingleCoil => constants::WRITE_SINGLE_COIL,
            FunctionCode::WriteSingleRegister => constants::WRITE_SINGLE_REGISTER,
            FunctionCode::WriteMultipleCoils => constants::WRITE_MULTIPLE_COILS,
            FunctionCode::WriteMultipleRegisters => constants::WRITE_MULTIPLE_REGISTERS,
            FunctionCode::MaskWriteRegister => constants::MASK_WRITE_REGISTER,
            FunctionCode::ReadWriteMultipleRegisters => constants::READ_WRITE_MULTIPLE_REGISTERS,
            FunctionCode::ReadFifoQueue => constants::READ_FIFO_QUEUE,
        }
    }

    /// true for the four read functions the polling engine may schedule
    pub(crate) const fn is_periodic_read(self) -> bool {
        matches!(
            self,
            FunctionCode::ReadCoils
                | FunctionCode::ReadDiscreteInputs
                | FunctionCode::ReadHoldingRegisters
                | FunctionCode::ReadInputRegisters
        )
    }
}

impl std::fmt::Display for FunctionCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FunctionCode::ReadCoils => write!(f, "READ COILS ({:#04X})", self.get_value()),
            FunctionCode::ReadDiscreteInputs => {
                write!(f, "READ DISCRETE INPUTS ({:#04X})", self.get_value())
            }
            FunctionCode::ReadHoldingRegisters => {
                write!(f, "READ HOLDING REGISTERS ({:#04X})", self.get_value())
            }
            FunctionCode::ReadInputRegisters => {
                write!(f, "READ INPUT REGISTERS ({:#04X})", self.get_value())
            }
            FunctionCode::WriteSingleCoil => {
                write!(f, "WRITE SINGLE COIL ({:#04X})", self.get_value())
            }
            FunctionCode::WriteSingleRegister => {
                write!(f, "WRITE SINGLE REGISTER ({:#04X})", self.get_value())
            }
            FunctionCode::WriteMultipleCoils => {
                write!(f, "WRITE MULTIPLE COILS ({:#04X})", self.get_value())
            }
            FunctionCode::WriteMultipleRegisters => {
                write!(f, "WRITE MULTIPLE REGISTERS ({:#04X})", self.get_value())
            }
            FunctionCode::MaskWriteRegister => {
                write!(f, "MASK WRITE REGISTER ({:#04X})", self.get_value())
            }
            FunctionCode::ReadWriteMultipleRegisters => {
                write!(f, "READ WRITE MULTIPLE REGISTERS ({:#04X})", self.get_value())
            }
            FunctionCode::ReadFifoQueue => {
                write!(f, "READ FIFO QUEUE ({:#04X})", self.get_value())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_all_known_codes() {
        for value in [1u8, 2, 3, 4, 5, 6, 15, 16, 22, 23, 24] {
            assert_eq!(FunctionCode::get(value).unwrap().get_value(), value);
        }
    }

    #[test]
    fn rejects_unknown_codes() {
        assert_eq!(FunctionCode::get(0), None);
        assert_eq!(FunctionCode::get(7), None);
        assert_eq!(FunctionCode::get(0x81), None);
    }
}
