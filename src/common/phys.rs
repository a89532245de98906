use std::fmt::Write;

use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::decode::PhysDecodeLevel;

/// encapsulates all possible physical layers as an enum
pub(crate) enum PhysLayerImpl {
    Tcp(tokio::net::TcpStream),
    Tls(Box<tokio_rustls::client::TlsStream<tokio::net::TcpStream>>),
    Serial(tokio_serial::SerialStream),
    #[cfg(test)]
    Mock(tokio_test::io::Mock),
}

pub(crate) struct PhysLayer {
    layer: PhysLayerImpl,
    level: PhysDecodeLevel,
}

impl std::fmt::Debug for PhysLayer {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self.layer {
            PhysLayerImpl::Tcp(_) => f.write_str("Tcp"),
            PhysLayerImpl::Tls(_) => f.write_str("Tls"),
            PhysLayerImpl::Serial(_) => f.write_str("Serial"),
            #[cfg(test)]
            PhysLayerImpl::Mock(_) => f.write_str("Mock"),
        }
    }
}

impl PhysLayer {
    pub(crate) fn new_tcp(socket: tokio::net::TcpStream, level: PhysDecodeLevel) -> Self {
        Self {
            layer: PhysLayerImpl::Tcp(socket),
            level,
        }
    }

    pub(crate) fn new_tls(
        socket: tokio_rustls::client::TlsStream<tokio::net::TcpStream>,
        level: PhysDecodeLevel,
    ) -> Self {
        Self {
            layer: PhysLayerImpl::Tls(Box::new(socket)),
            level,
        }
    }

    pub(crate) fn new_serial(port: tokio_serial::SerialStream, level: PhysDecodeLevel) -> Self {
        Self {
            layer: PhysLayerImpl::Serial(port),
            level,
        }
    }

    #[cfg(test)]
    pub(crate) fn new_mock(mock: tokio_test::io::Mock, level: PhysDecodeLevel) -> Self {
        Self {
            layer: PhysLayerImpl::Mock(mock),
            level,
        }
    }

    pub(crate) async fn read(&mut self, buffer: &mut [u8]) -> Result<usize, std::io::Error> {
        let length = match &mut self.layer {
            PhysLayerImpl::Tcp(x) => x.read(buffer).await?,
            PhysLayerImpl::Tls(x) => x.read(buffer).await?,
            PhysLayerImpl::Serial(x) => x.read(buffer).await?,
            #[cfg(test)]
            PhysLayerImpl::Mock(x) => x.read(buffer).await?,
        };

        if self.level.enabled() {
            if let Some(x) = buffer.get(0..length) {
                tracing::info!("PHYS RX - {}", PhysDisplay::new(self.level, x))
            }
        }

        Ok(length)
    }

    /// read until the slice is completely filled, treating a zero-length read as EOF
    pub(crate) async fn read_exact(&mut self, buffer: &mut [u8]) -> Result<(), std::io::Error> {
        let mut count = 0;
        while count < buffer.len() {
            let progress = self.read(&mut buffer[count..]).await?;
            if progress == 0 {
                return Err(std::io::Error::from(std::io::ErrorKind::UnexpectedEof));
            }
            count += progress;
        }
        Ok(())
    }

    pub(crate) async fn write(&mut self, data: &[u8]) -> Result<(), std::io::Error> {
        if self.level.enabled() {
            tracing::info!("PHYS TX - {}", PhysDisplay::new(self.level, data));
        }

        match &mut self.layer {
            PhysLayerImpl::Tcp(x) => x.write_all(data).await,
            PhysLayerImpl::Tls(x) => x.write_all(data).await,
            PhysLayerImpl::Serial(x) => x.write_all(data).await,
            #[cfg(test)]
            PhysLayerImpl::Mock(x) => x.write_all(data).await,
        }
    }
}

pub(crate) struct PhysDisplay<'a> {
    level: PhysDecodeLevel,
    data: &'a [u8],
}

impl<'a> PhysDisplay<'a> {
    pub(crate) fn new(level: PhysDecodeLevel, data: &'a [u8]) -> Self {
        PhysDisplay { level, data }
    }
}

impl std::fmt::Display for PhysDisplay<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{} bytes", self.data.len())?;
        if self.level.data_enabled() {
            format_bytes(f, self.data)?;
        }
        Ok(())
    }
}

const BYTES_PER_DECODE_LINE: usize = 18;

pub(crate) fn format_bytes(f: &mut std::fmt::Formatter, bytes: &[u8]) -> std::fmt::Result {
    for chunk in bytes.chunks(BYTES_PER_DECODE_LINE) {
        writeln!(f)?;
        let mut first = true;
        for byte in chunk {
            if !first {
                f.write_char(' ')?;
            }
            first = false;
            write!(f, "{byte:02X?}")?;
        }
    }
    Ok(())
}
