/// values used when reading/writing single coils
pub mod coil {
    /// u16 representation of COIL == ON when performing write single coil
    pub const ON: u16 = 0xFF00;
    /// u16 representation of COIL == OFF when performing write single coil
    pub const OFF: u16 = 0x0000;
}

/// limits of the MODBUS addressing model
pub mod address {
    /// broadcast address, accepted for writes only, never answered
    pub const BROADCAST: u8 = 0;
    /// smallest individually addressable slave id
    pub const MIN: u8 = 1;
    /// largest individually addressable slave id
    pub const MAX: u8 = 247;
}

/// per-function quantity limits
pub mod limits {
    /// Maximum count allowed in a read coils/discrete inputs request
    pub const MAX_READ_BITS_COUNT: u16 = 0x07D0;
    /// Maximum count allowed in a read holding/input registers request
    pub const MAX_READ_REGISTERS_COUNT: u16 = 0x007D;
    /// Maximum count allowed in a `write multiple coils` request
    pub const MAX_WRITE_BITS_COUNT: u16 = 0x07B0;
    /// Maximum count allowed in a `write multiple registers` request
    pub const MAX_WRITE_REGISTERS_COUNT: u16 = 0x007B;
    /// Maximum read count allowed in a `read/write multiple registers` request
    pub const MAX_READ_WRITE_READ_COUNT: u16 = 0x007D;
    /// Maximum write count allowed in a `read/write multiple registers` request
    pub const MAX_READ_WRITE_WRITE_COUNT: u16 = 0x0079;
    /// Maximum FIFO count allowed in a `read FIFO queue` response
    pub const MAX_FIFO_COUNT: u16 = 31;
}

/// sizes of the protocol data unit and the three ADU envelopes
pub mod frame {
    /// minimum encoded PDU: function code only
    pub const MIN_PDU_SIZE: usize = 1;
    /// maximum encoded PDU: function code + 252 data bytes
    pub const MAX_PDU_SIZE: usize = 253;

    /// MBAP header length in bytes
    pub const MBAP_HEADER_LENGTH: usize = 7;
    /// minimum TCP ADU: MBAP header + function code
    pub const MIN_TCP_ADU_SIZE: usize = 8;
    /// maximum TCP ADU: MBAP header + PDU
    pub const MAX_TCP_ADU_SIZE: usize = 260;
    /// largest value allowed in the MBAP length field (unit id + PDU)
    pub const MAX_MBAP_LENGTH_FIELD: usize = MAX_PDU_SIZE + 1;

    /// minimum RTU ADU: address + function code + CRC
    pub const MIN_RTU_ADU_SIZE: usize = 4;
    /// maximum RTU ADU: address + PDU + CRC
    pub const MAX_RTU_ADU_SIZE: usize = 256;
    /// length of an RTU exception frame: address + fc + code + CRC
    pub const RTU_EXCEPTION_ADU_SIZE: usize = 5;

    /// binary payload of the smallest ASCII frame: address + function + LRC
    pub const MIN_ASCII_BINARY_SIZE: usize = 3;
    /// minimum encoded ASCII ADU: `:` + 6 hex chars + CRLF
    pub const MIN_ASCII_ADU_CHARS: usize = 9;
    /// maximum encoded ASCII ADU in characters
    pub const MAX_ASCII_ADU_CHARS: usize = 513;
}

/// exception code constants defined in the MODBUS specification
pub mod exceptions {
    pub const ILLEGAL_FUNCTION: u8 = 0x01;
    pub const ILLEGAL_DATA_ADDRESS: u8 = 0x02;
    pub const ILLEGAL_DATA_VALUE: u8 = 0x03;
    pub const SERVER_DEVICE_FAILURE: u8 = 0x04;
    pub const ACKNOWLEDGE: u8 = 0x05;
    pub const SERVER_DEVICE_BUSY: u8 = 0x06;
    pub const NEGATIVE_ACKNOWLEDGE: u8 = 0x07;
    pub const MEMORY_PARITY_ERROR: u8 = 0x08;
    pub const GATEWAY_PATH_UNAVAILABLE: u8 = 0x0A;
    pub const GATEWAY_TARGET_DEVICE_FAILED_TO_RESPOND: u8 = 0x0B;
}
