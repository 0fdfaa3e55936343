//! webserv - epoll reactor HTTP/1.1 static file server
//!
//! Core library for the event loop, HTTP handling and logging.

pub mod auth;
pub mod buffer;
pub mod config;
pub mod error;
pub mod http;
pub mod logging;
pub mod server;
