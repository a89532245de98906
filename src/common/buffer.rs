use tokio::io::{AsyncRead, AsyncReadExt};

use crate::common::phys::PhysLayer;
use crate::error::InternalError;

/// Accumulating read buffer used by the server-side frame parsers
pub(crate) struct ReadBuffer {
    buffer: Vec<u8>,
    begin: usize,
    end: usize,
}

impl ReadBuffer {
    pub(crate) fn new(capacity: usize) -> Self {
        ReadBuffer {
            buffer: vec![0; capacity],
            begin: 0,
            end: 0,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.end - self.begin
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.begin == self.end
    }

    pub(crate) fn read(&mut self, count: usize) -> Result<&[u8], InternalError> {
        if self.len() < count {
            return Err(InternalError::InsufficientBytesForRead);
        }

        match self.buffer.get(self.begin..(self.begin + count)) {
            Some(ret) => {
                self.begin += count;
                Ok(ret)
            }
            None => Err(InternalError::InsufficientBytesForRead),
        }
    }

    pub(crate) fn read_u8(&mut self) -> Result<u8, InternalError> {
        match self.buffer.get(self.begin) {
            Some(ret) if !self.is_empty() => {
                let value = *ret;
                self.begin += 1;
                Ok(value)
            }
            _ => Err(InternalError::InsufficientBytesForRead),
        }
    }

    pub(crate) fn read_u16_be(&mut self) -> Result<u16, InternalError> {
        let b1 = self.read_u8()? as u16;
        let b2 = self.read_u8()? as u16;
        Ok((b1 << 8) | b2)
    }

    pub(crate) async fn read_some(
        &mut self,
        io: &mut (impl AsyncRead + Unpin),
    ) -> Result<usize, std::io::Error> {
        // adjusting the indices when empty allows the biggest possible read
        // and avoids shifting later
        if self.is_empty() {
            self.begin = 0;
            self.end = 0;
        }

        // at capacity but still need more data, shift the remainder down
        if self.end == self.buffer.len() {
            let length = self.len();
            self.buffer.copy_within(self.begin..self.end, 0);
            self.begin = 0;
            self.end = length;
        }

        let count = io.read(&mut self.buffer[self.end..]).await?;
        if count == 0 {
            return Err(std::io::Error::from(std::io::ErrorKind::UnexpectedEof));
        }
        self.end += count;
        Ok(count)
    }

    /// same as `read_some`, but reads from a `PhysLayer` which is not an `AsyncRead`
    pub(crate) async fn read_some_phys(
        &mut self,
        io: &mut PhysLayer,
    ) -> Result<usize, std::io::Error> {
        if self.is_empty() {
            self.begin = 0;
            self.end = 0;
        }

        if self.end == self.buffer.len() {
            let length = self.len();
            self.buffer.copy_within(self.begin..self.end, 0);
            self.begin = 0;
            self.end = length;
        }

        let count = io.read(&mut self.buffer[self.end..]).await?;
        if count == 0 {
            return Err(std::io::Error::from(std::io::ErrorKind::UnexpectedEof));
        }
        self.end += count;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::block_on;

    #[test]
    fn errors_when_reading_too_many_bytes() {
        let mut buffer = ReadBuffer::new(10);
        assert_eq!(buffer.read_u8(), Err(InternalError::InsufficientBytesForRead));
        assert_eq!(buffer.read(1).unwrap_err(), InternalError::InsufficientBytesForRead);
    }

    #[test]
    fn shifts_contents_when_buffer_at_capacity() {
        let mut buffer = ReadBuffer::new(3);
        let mut io = tokio_test::io::Builder::new()
            .read(&[0x01, 0x02, 0x03])
            .read(&[0x04, 0x05])
            .build();
        assert_eq!(block_on(buffer.read_some(&mut io)).unwrap(), 3);
        assert_eq!(buffer.read(2).unwrap(), &[0x01, 0x02]);
        assert_eq!(block_on(buffer.read_some(&mut io)).unwrap(), 2);
        assert_eq!(buffer.read(3).unwrap(), &[0x03, 0x04, 0x05]);
    }

    #[test]
    fn reads_big_endian_words() {
        let mut buffer = ReadBuffer::new(4);
        let mut io = tokio_test::io::Builder::new().read(&[0xCA, 0xFE]).build();
        block_on(buffer.read_some(&mut io)).unwrap();
        assert_eq!(buffer.read_u16_be().unwrap(), 0xCAFE);
    }
}
