/// Controls the decoding of transmitted and received data at the application, frame, and physical layer
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serialization", derive(serde::Serialize, serde::Deserialize))]
pub struct DecodeLevel {
    /// Controls decoding of the application layer (PDU)
    #[cfg_attr(feature = "serialization", serde(default))]
    pub app: AppDecodeLevel,
    /// Controls decoding of frames (MBAP / serial ADU)
    #[cfg_attr(feature = "serialization", serde(default))]
    pub frame: FrameDecodeLevel,
    /// Controls the logging of physical layer read/write
    #[cfg_attr(feature = "serialization", serde(default))]
    pub physical: PhysDecodeLevel,
}

/// Controls how transmitted and received messages at the application layer are decoded at the INFO log level
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serialization", derive(serde::Serialize, serde::Deserialize))]
pub enum AppDecodeLevel {
    /// Decode nothing
    #[default]
    Nothing,
    /// Decode the function code only
    FunctionCode,
    /// Decode the function code and the actual data values
    DataValues,
}

/// Controls how the transmitted and received frames are decoded at the INFO log level
///
/// Transport-specific framing wraps the application-layer traffic. On TCP this is
/// the MBAP header, on serial the address + checksum envelope.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serialization", derive(serde::Serialize, serde::Deserialize))]
pub enum FrameDecodeLevel {
    /// Decode nothing
    #[default]
    Nothing,
    /// Decode the header
    Header,
    /// Decode the header and the raw payload as hexadecimal
    Payload,
}

/// Controls how data transmitted at the physical layer (TCP, serial, etc) is logged
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serialization", derive(serde::Serialize, serde::Deserialize))]
pub enum PhysDecodeLevel {
    /// Log nothing
    #[default]
    Nothing,
    /// Log only the length of data that is sent and received
    Length,
    /// Log the length and the actual data that is sent and received
    Data,
}

impl DecodeLevel {
    /// construct a `DecodeLevel` with nothing enabled
    pub fn nothing() -> Self {
        Self::default()
    }

    /// construct a `DecodeLevel` from its fields
    pub fn new(app: AppDecodeLevel, frame: FrameDecodeLevel, physical: PhysDecodeLevel) -> Self {
        DecodeLevel {
            app,
            frame,
            physical,
        }
    }

    /// change the application decode level
    pub fn application(mut self, level: AppDecodeLevel) -> Self {
        self.app = level;
        self
    }

    /// change the frame decode level
    pub fn frame(mut self, level: FrameDecodeLevel) -> Self {
        self.frame = level;
        self
    }

    /// change the physical layer decode level
    pub fn physical(mut self, level: PhysDecodeLevel) -> Self {
        self.physical = level;
        self
    }
}

impl From<AppDecodeLevel> for DecodeLevel {
    fn from(app: AppDecodeLevel) -> Self {
        Self {
            app,
            frame: FrameDecodeLevel::Nothing,
            physical: PhysDecodeLevel::Nothing,
        }
    }
}

impl AppDecodeLevel {
    pub(crate) fn enabled(&self) -> bool {
        !matches!(self, AppDecodeLevel::Nothing)
    }

    pub(crate) fn data_values(&self) -> bool {
        matches!(self, AppDecodeLevel::DataValues)
    }
}

impl FrameDecodeLevel {
    pub(crate) fn enabled(&self) -> bool {
        !matches!(self, FrameDecodeLevel::Nothing)
    }

    pub(crate) fn payload_enabled(&self) -> bool {
        matches!(self, FrameDecodeLevel::Payload)
    }
}

impl PhysDecodeLevel {
    pub(crate) fn enabled(&self) -> bool {
        !matches!(self, PhysDecodeLevel::Nothing)
    }

    pub(crate) fn data_enabled(&self) -> bool {
        matches!(self, PhysDecodeLevel::Data)
    }
}
