use std::io::{self, IoSlice, Write};

use bytes::Buf;

use crate::buffer::Buffer;

/// Tracks how much of a response has reached the socket.
///
/// The header lives in the connection's write [`Buffer`], whose read cursor
/// advances as bytes are sent. The mapped file is borrowed from the
/// response, so only the sent offset into it is kept here.
#[derive(Debug, Default)]
pub struct ResponseWriter {
    file_sent: usize,
}

impl ResponseWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes still to send across both spans.
    pub fn remaining(&self, header: &Buffer, file: &[u8]) -> usize {
        header.remaining() + file.len().saturating_sub(self.file_sent)
    }

    pub fn is_done(&self, header: &Buffer, file: &[u8]) -> bool {
        self.remaining(header, file) == 0
    }

    pub fn file_sent(&self) -> usize {
        self.file_sent
    }

    pub fn reset(&mut self) {
        self.file_sent = 0;
    }

    /// Issues one vectored write of whatever is left of the header and the
    /// file, then shrinks both spans by what the sink accepted.
    pub fn write_to<W: Write + ?Sized>(
        &mut self,
        sink: &mut W,
        header: &mut Buffer,
        file: &[u8],
    ) -> io::Result<usize> {
        let body = &file[self.file_sent.min(file.len())..];
        let n = if header.has_remaining() {
            let slices = [header.as_io_slice(), IoSlice::new(body)];
            let count = if body.is_empty() { 1 } else { 2 };
            sink.write_vectored(&slices[..count])?
        } else if !body.is_empty() {
            sink.write(body)?
        } else {
            return Ok(0);
        };

        let from_header = n.min(header.remaining());
        header.advance(from_header);
        self.file_sent += n - from_header;
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Sink that accepts at most `limit` bytes per call.
    struct Trickle {
        out: Vec<u8>,
        limit: usize,
    }

    impl Write for Trickle {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            let n = buf.len().min(self.limit);
            self.out.extend_from_slice(&buf[..n]);
            Ok(n)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn short_writes_cross_the_header_boundary() {
        let mut header = Buffer::new();
        header.append(b"HEAD\r\n");
        let file = b"0123456789";
        let mut sink = Trickle { out: Vec::new(), limit: 4 };
        let mut writer = ResponseWriter::new();

        while !writer.is_done(&header, file) {
            writer.write_to(&mut sink, &mut header, file).unwrap();
        }

        assert_eq!(sink.out, b"HEAD\r\n0123456789");
        assert_eq!(writer.file_sent(), file.len());
        assert_eq!(header.readable_bytes(), 0);
    }
}
