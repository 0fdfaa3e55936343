use std::io;

use thiserror::Error;

/// Malformed or unsupported request. Answered with `400 Bad Request` and
/// the connection is closed after the response is sent.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("bad request line")]
    BadRequestLine,
    #[error("unsupported method `{0}`")]
    UnsupportedMethod(String),
    #[error("invalid request target `{0}`")]
    InvalidTarget(String),
    #[error("malformed header line `{0}`")]
    MalformedHeader(String),
    #[error("request line or header too long")]
    LineTooLong,
    #[error("invalid content length `{0}`")]
    InvalidContentLength(String),
}

/// Why the worker pool refused a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SubmitError {
    #[error("worker queue is full ({0} tasks pending)")]
    QueueFull(usize),
    #[error("worker pool is shut down")]
    Closed,
}

/// Failures that keep the server from starting.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("invalid listen address `{0}`")]
    InvalidAddress(String),
    #[error("failed to bind {addr}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to set up the event loop")]
    Poller(#[source] io::Error),
    #[error("failed to start worker threads")]
    Workers(#[source] io::Error),
}
