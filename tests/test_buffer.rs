use std::io::{Cursor, Read};

use bytes::Buf;
use webserv::buffer::Buffer;

#[test]
fn test_buffer_readable_tracks_appends_and_consumes() {
    let mut buf = Buffer::with_capacity(8);
    let mut appended = 0;
    let mut consumed = 0;

    for chunk in [&b"hello"[..], b" ", b"world, this outgrows eight bytes"] {
        buf.append(chunk);
        appended += chunk.len();
        assert_eq!(buf.readable_bytes(), appended - consumed);

        buf.consume(3);
        consumed += 3;
        assert_eq!(buf.readable_bytes(), appended - consumed);
    }
}

#[test]
fn test_buffer_zero_length_ops_are_noops() {
    let mut buf = Buffer::new();
    buf.append(b"");
    buf.consume(0);
    assert_eq!(buf.readable_bytes(), 0);
    assert_eq!(buf.prependable_bytes(), 0);
}

#[test]
#[should_panic]
fn test_buffer_consume_past_end_panics() {
    let mut buf = Buffer::new();
    buf.append(b"abc");
    buf.consume(4);
}

#[test]
fn test_buffer_consume_until_marker() {
    let mut buf = Buffer::new();
    buf.append(b"GET / HTTP/1.1\r\nHost: x\r\n");

    assert!(buf.consume_until(b"\r\n"));
    assert_eq!(buf.peek(), b"Host: x\r\n");
    assert!(!buf.consume_until(b"\r\n\r\n"));
    assert_eq!(buf.peek(), b"Host: x\r\n");
}

#[test]
fn test_buffer_append_from_source_overflows_into_growth() {
    // Larger than the writable tail, smaller than tail + overflow region.
    let data: Vec<u8> = (0..20_000u32).map(|i| (i % 251) as u8).collect();
    let mut src = Cursor::new(data.clone());
    let mut buf = Buffer::with_capacity(16);

    let n = buf.append_from_source(&mut src).unwrap();

    assert_eq!(n, data.len());
    assert_eq!(buf.peek(), &data[..]);
}

#[test]
fn test_buffer_append_from_source_reports_eof() {
    let mut src = Cursor::new(Vec::<u8>::new());
    let mut buf = Buffer::new();
    assert_eq!(buf.append_from_source(&mut src).unwrap(), 0);
}

#[test]
fn test_buffer_drain_to_sink_consumes_what_was_written() {
    let mut buf = Buffer::new();
    buf.append(b"response bytes");
    let mut sink = Vec::new();

    let n = buf.drain_to_sink(&mut sink).unwrap();

    assert_eq!(n, 14);
    assert_eq!(sink, b"response bytes");
    assert_eq!(buf.readable_bytes(), 0);
}

#[test]
fn test_buffer_as_buf_reader() {
    let mut buf = Buffer::new();
    buf.append(b"abcdef");
    buf.advance(2);

    let mut out = String::new();
    buf.reader().read_to_string(&mut out).unwrap();
    assert_eq!(out, "cdef");
}

#[test]
fn test_buffer_consume_all_to_string() {
    let mut buf = Buffer::new();
    buf.append(b"line one\n");
    assert_eq!(buf.consume_all_to_string(), "line one\n");
    assert_eq!(buf.readable_bytes(), 0);
    assert_eq!(buf.prependable_bytes(), 0);
}
