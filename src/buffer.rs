//! Growable byte buffer with separate read and write cursors.
//!
//! The same type stages bytes read from a socket, bytes waiting to be sent,
//! and formatted log records waiting to be flushed to a file.
//!
//! ```text
//! +-------------------+------------------+------------------+
//! | prependable bytes |  readable bytes  |  writable bytes  |
//! |    (consumed)     |     (content)    |                  |
//! +-------------------+------------------+------------------+
//! 0      <=        read_pos    <=    write_pos    <=     capacity
//! ```

use std::io::{self, IoSlice, IoSliceMut, Read, Write};

use bytes::Buf;

/// Size of the on-stack overflow region used by [`Buffer::append_from_source`].
const OVERFLOW_LEN: usize = 64 * 1024;

const DEFAULT_CAPACITY: usize = 1024;

#[derive(Debug, Clone)]
pub struct Buffer {
    buf: Vec<u8>,
    read_pos: usize,
    write_pos: usize,
}

impl Default for Buffer {
    fn default() -> Self {
        Self::new()
    }
}

impl Buffer {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: vec![0; capacity],
            read_pos: 0,
            write_pos: 0,
        }
    }

    /// Number of bytes appended but not yet consumed.
    pub fn readable_bytes(&self) -> usize {
        self.write_pos - self.read_pos
    }

    /// Number of bytes that can be appended without moving or growing storage.
    pub fn writable_bytes(&self) -> usize {
        self.buf.len() - self.write_pos
    }

    /// Number of already-consumed bytes in front of the read cursor.
    pub fn prependable_bytes(&self) -> usize {
        self.read_pos
    }

    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// The unread region, without copying.
    pub fn peek(&self) -> &[u8] {
        &self.buf[self.read_pos..self.write_pos]
    }

    /// Advances the read cursor by `len` bytes.
    ///
    /// # Panics
    ///
    /// Panics if `len` exceeds [`readable_bytes`](Self::readable_bytes).
    pub fn consume(&mut self, len: usize) {
        assert!(
            len <= self.readable_bytes(),
            "consume({len}) exceeds readable bytes ({})",
            self.readable_bytes()
        );
        self.read_pos += len;
    }

    /// Consumes everything up to and including the first occurrence of
    /// `marker`. Returns `false` and leaves the buffer untouched when the
    /// marker is not present.
    pub fn consume_until(&mut self, marker: &[u8]) -> bool {
        match find(self.peek(), marker) {
            Some(pos) => {
                self.consume(pos + marker.len());
                true
            }
            None => false,
        }
    }

    pub fn consume_all(&mut self) {
        self.read_pos = 0;
        self.write_pos = 0;
    }

    pub fn consume_all_to_string(&mut self) -> String {
        let s = String::from_utf8_lossy(self.peek()).into_owned();
        self.consume_all();
        s
    }

    /// The writable tail. Callers that fill it directly must follow up with
    /// [`has_written`](Self::has_written).
    pub fn writable_slice(&mut self) -> &mut [u8] {
        &mut self.buf[self.write_pos..]
    }

    /// Advances the write cursor after data was placed in [`writable_slice`](Self::writable_slice).
    ///
    /// # Panics
    ///
    /// Panics if `len` exceeds [`writable_bytes`](Self::writable_bytes).
    pub fn has_written(&mut self, len: usize) {
        assert!(
            len <= self.writable_bytes(),
            "has_written({len}) exceeds writable bytes ({})",
            self.writable_bytes()
        );
        self.write_pos += len;
    }

    /// Makes sure at least `len` bytes can be appended.
    pub fn ensure_writable(&mut self, len: usize) {
        if self.writable_bytes() < len {
            self.make_space(len);
        }
        debug_assert!(self.writable_bytes() >= len);
    }

    pub fn append(&mut self, data: &[u8]) {
        if data.is_empty() {
            return;
        }
        self.ensure_writable(data.len());
        self.buf[self.write_pos..self.write_pos + data.len()].copy_from_slice(data);
        self.has_written(data.len());
    }

    /// Reads from `src` with a single vectored read into the writable tail
    /// plus a 64 KiB stack region, then appends whatever overflowed.
    ///
    /// Returns the number of bytes read; `Ok(0)` means end of stream.
    pub fn append_from_source<R: Read + ?Sized>(&mut self, src: &mut R) -> io::Result<usize> {
        let mut extra = [0u8; OVERFLOW_LEN];
        let writable = self.writable_bytes();

        let n = {
            let tail = &mut self.buf[self.write_pos..];
            let mut iov = [IoSliceMut::new(tail), IoSliceMut::new(&mut extra)];
            src.read_vectored(&mut iov)?
        };

        if n <= writable {
            self.write_pos += n;
        } else {
            self.write_pos = self.buf.len();
            self.append(&extra[..n - writable]);
        }
        Ok(n)
    }

    /// Writes the readable region to `sink` with a single write and consumes
    /// whatever was accepted.
    pub fn drain_to_sink<W: Write + ?Sized>(&mut self, sink: &mut W) -> io::Result<usize> {
        if self.readable_bytes() == 0 {
            return Ok(0);
        }
        let n = sink.write(self.peek())?;
        self.consume(n);
        Ok(n)
    }

    /// Readable region as an `IoSlice` for vectored writes.
    pub fn as_io_slice(&self) -> IoSlice<'_> {
        IoSlice::new(self.peek())
    }

    fn make_space(&mut self, len: usize) {
        if self.writable_bytes() + self.prependable_bytes() < len {
            self.buf.resize(self.write_pos + len + 1, 0);
        } else {
            let readable = self.readable_bytes();
            self.buf.copy_within(self.read_pos..self.write_pos, 0);
            self.read_pos = 0;
            self.write_pos = readable;
        }
    }
}

impl Buf for Buffer {
    fn remaining(&self) -> usize {
        self.readable_bytes()
    }

    fn chunk(&self) -> &[u8] {
        self.peek()
    }

    fn advance(&mut self, cnt: usize) {
        self.consume(cnt);
    }
}

impl Write for Buffer {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.append(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Position of the first occurrence of `needle` in `haystack`.
pub(crate) fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_reclaims_prefix_before_growing() {
        let mut buf = Buffer::with_capacity(8);
        buf.append(b"abcdef");
        buf.consume(4);
        buf.append(b"ghijk");

        assert_eq!(buf.capacity(), 8);
        assert_eq!(buf.prependable_bytes(), 0);
        assert_eq!(buf.peek(), b"efghijk");
    }

    #[test]
    fn append_grows_to_write_pos_plus_len_plus_one() {
        let mut buf = Buffer::with_capacity(4);
        buf.append(b"abc");
        buf.append(b"defgh");

        assert_eq!(buf.capacity(), 3 + 5 + 1);
        assert_eq!(buf.peek(), b"abcdefgh");
    }

    #[test]
    fn find_locates_marker() {
        assert_eq!(find(b"GET /\r\nHost", b"\r\n"), Some(5));
        assert_eq!(find(b"no marker", b"\r\n"), None);
        assert_eq!(find(b"", b"\r\n"), None);
    }
}
