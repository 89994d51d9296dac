use crate::common::phys::PhysLayer;
use crate::decode::PhysDecodeLevel;

/// Accumulates bytes read from a stream until a complete frame is available
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

    /// all of the bytes that are currently buffered
    pub(crate) fn peek(&self) -> &[u8] {
        &self.buffer[self.begin..self.end]
    }

    pub(crate) fn peek_at(&self, idx: usize) -> Option<u8> {
        self.peek().get(idx).copied()
    }

    /// consume `count` bytes, returning `None` if fewer are buffered
    pub(crate) fn read(&mut self, count: usize) -> Option<&[u8]> {
        if self.len() < count {
            return None;
        }
        let start = self.begin;
        self.begin += count;
        self.buffer.get(start..self.begin)
    }

    pub(crate) fn clear(&mut self) {
        self.begin = 0;
        self.end = 0;
    }

    pub(crate) async fn read_some(
        &mut self,
        io: &mut PhysLayer,
        decode_level: PhysDecodeLevel,
    ) -> Result<usize, std::io::Error> {
        // before we read any data, check to see if the buffer is empty and adjust the indices
        // this allows use to make the biggest read possible, and avoids subsequent buffer shifting later
        if self.is_empty() {
            self.begin = 0;
            self.end = 0;
        }

        // if we've reached capacity, but still need more data we have to shift
        if self.end == self.buffer.len() {
            let length = self.len();
            self.buffer.copy_within(self.begin..self.end, 0);
            self.begin = 0;
            self.end = length;
        }

        // a parser that needs more bytes than the capacity would otherwise spin on a zero-length read
        if self.end == self.buffer.len() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "read buffer is full",
            ));
        }

        let count = io.read(&mut self.buffer[self.end..], decode_level).await?;

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
    use tokio_test::io::Builder;

    #[test]
    fn read_fails_when_too_few_bytes_are_buffered() {
        let mut buffer = ReadBuffer::new(10);
        assert!(buffer.read(1).is_none());
        assert_eq!(buffer.peek_at(0), None);
    }

    #[test]
    fn shifts_contents_when_buffer_at_capacity() {
        let mut buffer = ReadBuffer::new(3);
        let mut io = PhysLayer::new_mock(
            Builder::new()
                .read(&[0x01, 0x02, 0x03])
                .read(&[0x04, 0x05])
                .build(),
        );
        assert_eq!(
            block_on(buffer.read_some(&mut io, PhysDecodeLevel::Nothing)).unwrap(),
            3
        );
        assert_eq!(buffer.read(2).unwrap(), &[0x01, 0x02]);
        assert_eq!(
            block_on(buffer.read_some(&mut io, PhysDecodeLevel::Nothing)).unwrap(),
            2
        );
        assert_eq!(buffer.read(3).unwrap(), &[0x03, 0x04, 0x05]);
    }

    #[test]
    fn end_of_stream_is_an_error() {
        let mut buffer = ReadBuffer::new(3);
        let mut io = PhysLayer::new_mock(Builder::new().build());
        let err = block_on(buffer.read_some(&mut io, PhysDecodeLevel::Nothing)).unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::UnexpectedEof);
    }
}
