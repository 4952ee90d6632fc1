use bytes::{Buf, BytesMut};
use std::io;

const CHUNK_SIZE: usize = 8192;

/// A bounded, growable byte FIFO fed from a non-blocking reader. Data is
/// appended at the tail and consumed from the head once a full packet has
/// been extracted.
pub struct Buffer {
    data: BytesMut,
    limit: usize,
}

impl Buffer {
    #[inline]
    pub fn new(limit: usize) -> Buffer {
        Buffer {
            data: BytesMut::with_capacity(CHUNK_SIZE.min(limit)),
            limit,
        }
    }

    /// The number of bytes in the buffer.
    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns true in case the buffer is empty, false otherwise.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Remaining free capacity in the buffer.
    #[inline]
    pub fn free_capacity(&self) -> usize {
        self.limit - self.data.len()
    }

    /// Slice containing the buffered data.
    #[inline]
    pub fn read_slice(&self) -> &[u8] {
        &self.data
    }

    /// Drops `count` bytes off the head.
    #[inline]
    pub fn consume(&mut self, count: usize) {
        self.data.advance(count);
    }

    #[inline]
    pub fn clear(&mut self) {
        self.data.clear();
    }

    /// Appends raw bytes. Used by tests and by the loopback paths.
    #[inline]
    pub fn push(&mut self, data: &[u8]) {
        self.data.extend_from_slice(data);
    }

    /// Reads from the supplied reader until it would block. Returns the number
    /// of bytes ingested. A clean EOF from the peer folds into
    /// `UnexpectedEof` so the caller closes the connection; overrunning the
    /// buffer limit is an error since a well-formed packet always fits.
    pub fn ingress<R: io::Read>(&mut self, mut reader: R) -> io::Result<usize> {
        let mut total = 0;
        let mut chunk = [0u8; CHUNK_SIZE];

        loop {
            let free = self.free_capacity();

            if free == 0 {
                return Err(io::Error::new(io::ErrorKind::Other, "Buffer overrun"));
            }

            let want = free.min(CHUNK_SIZE);

            match reader.read(&mut chunk[..want]) {
                Ok(0) => return Err(io::ErrorKind::UnexpectedEof.into()),
                Ok(count) => {
                    self.data.extend_from_slice(&chunk[..count]);
                    total += count;
                }
                Err(ref err) if err.kind() == io::ErrorKind::WouldBlock => return Ok(total),
                Err(ref err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(err),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cmp::min;

    struct MockChannel {
        data: Vec<u8>,
        cursor: usize,
        chunk: usize,
    }

    impl MockChannel {
        fn new(data: Vec<u8>, chunk: usize) -> MockChannel {
            MockChannel { data, cursor: 0, chunk }
        }
    }

    impl io::Read for MockChannel {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.cursor == self.data.len() {
                return Err(io::ErrorKind::WouldBlock.into());
            }

            let offset = min(min(self.chunk, buf.len()), self.data.len() - self.cursor);
            buf[..offset].copy_from_slice(&self.data[self.cursor..(self.cursor + offset)]);
            self.cursor += offset;
            Ok(offset)
        }
    }

    #[test]
    fn test_ingress_drains_reader() {
        let mock_data: Vec<u8> = (0..4096).map(|item| item as u8).collect();
        let mut channel = MockChannel::new(mock_data.clone(), 500);

        let mut buffer = Buffer::new(65536);
        let count = buffer.ingress(&mut channel).unwrap();

        assert_eq!(count, mock_data.len());
        assert_eq!(buffer.read_slice(), &mock_data[..]);
    }

    #[test]
    fn test_ingress_eof_is_error() {
        let data: &[u8] = &[];
        let mut buffer = Buffer::new(65536);

        let err = buffer.ingress(data).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn test_ingress_buffer_overrun() {
        let mock_data: Vec<u8> = vec![1u8; 256];
        let mut channel = MockChannel::new(mock_data, 64);

        let mut buffer = Buffer::new(128);
        let err = buffer.ingress(&mut channel).unwrap_err();

        assert_eq!(err.kind(), io::ErrorKind::Other);
        assert_eq!(err.to_string(), "Buffer overrun");
        assert_eq!(buffer.len(), 128);
    }

    #[test]
    fn test_consume_advances_head() {
        let mut buffer = Buffer::new(1024);
        buffer.push(&[1, 2, 3, 4, 5]);

        buffer.consume(2);

        assert_eq!(buffer.read_slice(), &[3, 4, 5]);
        assert_eq!(buffer.len(), 3);
    }
}
