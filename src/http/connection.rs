use std::io::{self, ErrorKind};
use std::net::{SocketAddr, TcpStream};
use std::os::fd::{AsRawFd, RawFd};
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::auth::CredentialStore;
use crate::buffer::Buffer;
use crate::http::parser::{MAX_BODY_LEN, MAX_LINE_LEN, ParseStatus, RequestParser};
use crate::http::request::Method;
use crate::http::response::{HttpResponse, StatusCode};
use crate::http::writer::ResponseWriter;
use crate::server::stats::ServerStats;

/// Buffered request bytes past which an edge-triggered read stops and lets
/// the parser decide. Nothing the parser accepts is longer.
const READ_LIMIT: usize = MAX_LINE_LEN + MAX_BODY_LEN;

/// What the reactor should do with a connection once a task hands it back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Wait for more request bytes.
    RearmRead,
    /// A response is (still) pending.
    RearmWrite,
    Close,
}

/// Everything a worker needs besides the connection itself.
#[derive(Clone)]
pub struct ServeContext {
    pub root: PathBuf,
    pub credentials: Arc<dyn CredentialStore>,
    pub stats: Arc<ServerStats>,
}

/// Per-socket state. Owned by the reactor between events and moved into
/// exactly one worker task while an event is being handled.
pub struct Connection {
    stream: TcpStream,
    peer: SocketAddr,
    edge_triggered: bool,
    read_buf: Buffer,
    write_buf: Buffer,
    parser: RequestParser,
    response: HttpResponse,
    writer: ResponseWriter,
    keep_alive: bool,
}

impl Connection {
    pub fn new(stream: TcpStream, peer: SocketAddr, edge_triggered: bool) -> Self {
        Self {
            stream,
            peer,
            edge_triggered,
            read_buf: Buffer::new(),
            write_buf: Buffer::new(),
            parser: RequestParser::new(),
            response: HttpResponse::new(),
            writer: ResponseWriter::new(),
            keep_alive: false,
        }
    }

    pub fn fd(&self) -> RawFd {
        self.stream.as_raw_fd()
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    pub fn keep_alive(&self) -> bool {
        self.keep_alive
    }

    pub fn stream(&self) -> &TcpStream {
        &self.stream
    }

    /// Pulls request bytes off the socket, then parses what has arrived.
    pub fn on_read(&mut self, ctx: &ServeContext) -> Command {
        loop {
            match self.read_buf.append_from_source(&mut self.stream) {
                Ok(0) => {
                    debug!(peer = %self.peer, "peer closed");
                    return Command::Close;
                }
                Ok(_) if self.edge_triggered && self.read_buf.readable_bytes() <= READ_LIMIT => {
                    continue;
                }
                Ok(_) => break,
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    debug!(peer = %self.peer, error = %e, "read failed");
                    return Command::Close;
                }
            }
        }
        self.process(ctx)
    }

    /// Parses buffered bytes and, once a request is complete, renders its
    /// response into the write buffer.
    pub fn process(&mut self, ctx: &ServeContext) -> Command {
        if self.read_buf.readable_bytes() == 0 {
            return Command::RearmRead;
        }

        match self.parser.parse(&mut self.read_buf, ctx.credentials.as_ref()) {
            Ok(ParseStatus::Incomplete) => return Command::RearmRead,
            Ok(ParseStatus::Complete) => {
                let request = self.parser.request();
                self.keep_alive = request.keep_alive();
                self.response
                    .init(&ctx.root, &request.path, self.keep_alive, None);
                self.response.set_head_only(request.method == Method::HEAD);
            }
            Err(e) => {
                warn!(peer = %self.peer, error = %e, "bad request");
                self.keep_alive = false;
                self.read_buf.consume_all();
                self.parser.reset();
                self.response
                    .init(&ctx.root, "", false, Some(StatusCode::BadRequest));
            }
        }

        self.write_buf.consume_all();
        self.writer.reset();
        self.response.make_response(&mut self.write_buf);
        debug!(
            peer = %self.peer,
            status = self.response.status().as_u16(),
            path = self.response.path(),
            "response ready"
        );
        Command::RearmWrite
    }

    /// Sends as much of the pending response as the socket takes.
    pub fn on_write(&mut self, ctx: &ServeContext) -> Command {
        while !self.writer.is_done(&self.write_buf, self.response.file()) {
            match self
                .writer
                .write_to(&mut self.stream, &mut self.write_buf, self.response.file())
            {
                Ok(0) => return Command::Close,
                Ok(_) => {}
                Err(e) if e.kind() == ErrorKind::WouldBlock => return Command::RearmWrite,
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => {
                    debug!(peer = %self.peer, error = %e, "write failed");
                    return Command::Close;
                }
            }
        }

        self.response.unmap();
        ctx.stats.request_served();
        if !self.keep_alive {
            return Command::Close;
        }
        self.parser.reset();
        self.process(ctx)
    }

    /// Releases the file mapping and shuts the socket down. The descriptor
    /// itself closes on drop.
    pub fn close(&mut self) -> io::Result<()> {
        self.response.unmap();
        self.stream.shutdown(std::net::Shutdown::Both)
    }
}
