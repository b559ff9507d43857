use std::io;

/// A fixed-capacity FIFO byte queue backing channel I/O. Data is appended at
/// the tail and consumed from the head; the spare region is kept contiguous
/// by compacting pending data to the front on demand.
pub struct Buffer {
    data: Box<[u8]>,
    head: usize,
    tail: usize,
}

impl Buffer {
    #[inline]
    pub fn new(capacity: usize) -> Buffer {
        Buffer {
            data: vec![0u8; capacity].into_boxed_slice(),
            head: 0,
            tail: 0,
        }
    }

    /// The number of bytes in the buffer.
    #[inline]
    pub fn len(&self) -> usize {
        self.tail - self.head
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.head == self.tail
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Remaining free capacity in the buffer.
    #[inline]
    pub fn free_capacity(&self) -> usize {
        self.capacity() - self.len()
    }

    /// Slice containing data.
    #[inline]
    pub fn read_slice(&self) -> &[u8] {
        &self.data[self.head..self.tail]
    }

    /// Consume `count` bytes from the head.
    #[inline]
    pub fn move_head(&mut self, count: usize) {
        debug_assert!(count <= self.len());

        self.head += count;

        if self.head == self.tail {
            self.head = 0;
            self.tail = 0;
        }
    }

    /// Commit `count` bytes written into the spare region.
    #[inline]
    pub fn move_tail(&mut self, count: usize) {
        debug_assert!(count <= self.data.len() - self.tail);

        self.tail += count;
    }

    /// Contiguous spare region covering the full free capacity.
    #[inline]
    pub fn write_slice(&mut self) -> &mut [u8] {
        self.compact();
        &mut self.data[self.tail..]
    }

    #[inline]
    pub fn clear(&mut self) {
        self.head = 0;
        self.tail = 0;
    }

    fn compact(&mut self) {
        if self.head > 0 {
            self.data.copy_within(self.head..self.tail, 0);
            self.tail -= self.head;
            self.head = 0;
        }
    }

    /// Write the contents of the buffer to the supplied writer, advancing the
    /// head. A `WouldBlock` from the writer propagates with the already
    /// written prefix consumed and the remainder retained.
    pub fn egress<W: io::Write>(&mut self, mut writer: W) -> io::Result<usize> {
        let orig_len = self.len();

        while !self.is_empty() {
            let count = writer.write(self.read_slice())?;

            if count == 0 {
                return Err(io::ErrorKind::WriteZero.into());
            }

            self.move_head(count);
        }

        Ok(orig_len)
    }

    /// Read from the supplied reader until it would block, the buffer fills,
    /// or the source is exhausted. End of stream surfaces as `UnexpectedEof`
    /// so the caller can tell a closed peer from an idle one.
    pub fn ingress<R: io::Read>(&mut self, mut reader: R) -> io::Result<usize> {
        let mut total = 0;

        self.compact();

        while self.free_capacity() > 0 {
            let tail = self.tail;

            let count = match reader.read(&mut self.data[tail..]) {
                Ok(0) => return Err(io::ErrorKind::UnexpectedEof.into()),
                Ok(count) => count,
                Err(ref err) if err.kind() == io::ErrorKind::WouldBlock => break,
                Err(ref err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(err),
            };

            self.move_tail(count);
            total += count;
        }

        Ok(total)
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
        max_size: usize,
    }

    impl MockChannel {
        fn new(data: Vec<u8>, chunk: usize, max_size: usize) -> MockChannel {
            MockChannel {
                data,
                cursor: 0,
                chunk,
                max_size,
            }
        }

        fn clear(&mut self) {
            self.data.clear();
            self.cursor = 0;
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

    impl io::Write for MockChannel {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.data.len() == self.max_size {
                return Err(io::ErrorKind::WouldBlock.into());
            }

            let count = min(self.chunk, buf.len());
            self.data.extend(&buf[..count]);

            Ok(count)
        }

        fn flush(&mut self) -> io::Result<()> {
            unimplemented!()
        }
    }

    #[test]
    fn test_roundtrip() {
        let mock_data: Vec<_> = (0..2048).map(|item| item as u8).collect();
        let mut channel = MockChannel::new(mock_data.clone(), 500, mock_data.len());

        let mut buffer = Buffer::new(4096);

        let count = buffer.ingress(&mut channel).unwrap();

        assert_eq!(count, mock_data.len());
        assert_eq!(buffer.read_slice(), &mock_data[..]);

        channel.clear();
        let count = buffer.egress(&mut channel).unwrap();

        assert_eq!(count, mock_data.len());
        assert!(buffer.is_empty());
        assert_eq!(channel.data[..], mock_data[..]);
    }

    #[test]
    fn test_ingress_stops_when_full() {
        let mock_data = vec![7u8; 300];
        let mut channel = MockChannel::new(mock_data, 100, 0);

        let mut buffer = Buffer::new(128);

        let count = buffer.ingress(&mut channel).unwrap();

        assert_eq!(count, 128);
        assert_eq!(buffer.free_capacity(), 0);
    }

    #[test]
    fn test_ingress_eof_is_an_error() {
        let empty: &[u8] = &[];

        let mut buffer = Buffer::new(128);

        let err = buffer.ingress(empty).unwrap_err();

        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn test_egress_error_on_zero_write() {
        let mut zero_vec = vec![];

        let mut buffer = Buffer::new(128);
        buffer.write_slice()[0] = 1;
        buffer.move_tail(1);

        let err = buffer.egress(&mut zero_vec[..]).unwrap_err();

        assert_eq!(err.kind(), io::ErrorKind::WriteZero);
    }

    #[test]
    fn test_egress_would_block_keeps_remainder() {
        let mut channel = MockChannel::new(Vec::new(), 4, 4);

        let mut buffer = Buffer::new(128);
        buffer.write_slice()[..10].copy_from_slice(&[9u8; 10]);
        buffer.move_tail(10);

        let err = buffer.egress(&mut channel).unwrap_err();

        assert_eq!(err.kind(), io::ErrorKind::WouldBlock);
        assert_eq!(buffer.len(), 6);
        assert_eq!(channel.data, vec![9u8; 4]);
    }

    #[test]
    fn test_write_slice_compacts() {
        let mut buffer = Buffer::new(8);

        buffer.write_slice()[..6].copy_from_slice(&[1, 2, 3, 4, 5, 6]);
        buffer.move_tail(6);
        buffer.move_head(4);

        // The remaining two bytes move to the front, exposing the full free
        // capacity as one slice.
        assert_eq!(buffer.write_slice().len(), 6);
        assert_eq!(buffer.read_slice(), &[5, 6]);
    }

    #[test]
    fn test_head_reset_on_empty() {
        let mut buffer = Buffer::new(8);

        buffer.write_slice()[..4].copy_from_slice(&[1, 2, 3, 4]);
        buffer.move_tail(4);
        buffer.move_head(4);

        assert!(buffer.is_empty());
        assert_eq!(buffer.write_slice().len(), 8);
    }
}
