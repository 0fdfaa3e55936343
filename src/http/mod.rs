//! HTTP protocol implementation.
//!
//! This module implements the HTTP/1.1 side of the server: incremental request
//! parsing, static file responses and per-connection keep-alive handling.
//!
//! # Architecture
//!
//! The HTTP layer is organized into several submodules:
//!
//! - **`connection`**: Per-socket state and the read/process/write steps run by workers
//! - **`parser`**: Incremental request parser over the connection's read buffer
//! - **`request`**: HTTP request representation
//! - **`response`**: Status resolution, header rendering and memory-mapped file bodies
//! - **`writer`**: Vectored writes of header bytes plus file bytes
//! - **`mime`**: MIME type detection based on file extensions
//!
//! # Connection State Machine
//!
//! The reactor moves each connection into a worker task per readiness event.
//! The task returns a [`connection::Command`] telling the reactor how to re-arm:
//!
//! ```text
//!        ┌─────────────┐
//!        │   Reading   │ ← on_read: drain socket, parse
//!        └──────┬──────┘
//!               │ Incomplete → RearmRead
//!               │ Complete / bad request
//!               ▼
//!        ┌──────────────────┐
//!        │   Processing     │ ← resolve status, map file, render headers
//!        └──────┬───────────┘
//!               │ RearmWrite
//!               ▼
//!        ┌──────────────────┐
//!        │    Writing       │ ← on_write: writev header + file
//!        └──────┬───────────┘
//!               │ WouldBlock → RearmWrite
//!               │ Response sent
//!               ├─ Keep-Alive → Processing (pipelined bytes) or RearmRead
//!               └─ Close
//! ```
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use webserv::auth::MemoryCredentialStore;
//! use webserv::config::Config;
//! use webserv::server::Server;
//!
//! fn main() -> anyhow::Result<()> {
//!     let cfg = Config::load()?;
//!     let mut server = Server::new(&cfg, Arc::new(MemoryCredentialStore::new()))?;
//!     server.run()
//! }
//! ```

pub mod connection;
pub mod mime;
pub mod parser;
pub mod request;
pub mod response;
pub mod writer;
