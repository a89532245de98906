pub(crate) mod ascii;
pub(crate) mod frame;

use std::time::Duration;

use tokio_serial::SerialStream;

/// Serial port settings
#[derive(Clone, Debug)]
pub struct SerialSettings {
    /// path of the device, e.g. `/dev/ttyUSB0` on Linux or `COM3` on Windows
    pub path: String,
    /// baud rate of the port
    pub baud_rate: u32,
    /// number of data bits
    pub data_bits: tokio_serial::DataBits,
    /// number of stop bits
    pub stop_bits: tokio_serial::StopBits,
    /// parity setting
    pub parity: tokio_serial::Parity,
    /// flow control setting
    pub flow_control: tokio_serial::FlowControl,
    /// deadline applied to every read from the port
    pub timeout: Duration,
}

impl SerialSettings {
    /// settings for the common 8N1 framing at the given path and baud rate
    pub fn new(path: &str, baud_rate: u32) -> Self {
        Self {
            path: path.to_string(),
            baud_rate,
            ..Self::default()
        }
    }
}

impl Default for SerialSettings {
    fn default() -> Self {
        Self {
            path: String::new(),
            baud_rate: 19200,
            data_bits: tokio_serial::DataBits::Eight,
            stop_bits: tokio_serial::StopBits::One,
            parity: tokio_serial::Parity::None,
            flow_control: tokio_serial::FlowControl::None,
            timeout: Duration::from_secs(1),
        }
    }
}

pub(crate) fn open(settings: &SerialSettings) -> Result<SerialStream, std::io::Error> {
    let builder = tokio_serial::new(settings.path.as_str(), settings.baud_rate)
        .data_bits(settings.data_bits)
        .stop_bits(settings.stop_bits)
        .parity(settings.parity)
        .flow_control(settings.flow_control);
    SerialStream::open(&builder).map_err(|err| std::io::Error::new(std::io::ErrorKind::Other, err))
}
