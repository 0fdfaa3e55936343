use std::collections::HashMap;

use tracing::{debug, warn};

use crate::auth::CredentialStore;
use crate::buffer::{Buffer, find};
use crate::error::ProtocolError;
use crate::http::request::{Method, Request};

const CRLF: &[u8] = b"\r\n";

/// Longest request line or header line accepted before the request is
/// rejected.
pub const MAX_LINE_LEN: usize = 8 * 1024;

/// Largest accepted `Content-Length`.
pub const MAX_BODY_LEN: usize = 1024 * 1024;

/// Extensionless pages that are served from their `.html` file.
const DEFAULT_HTML: [&str; 6] = ["/index", "/register", "/login", "/welcome", "/video", "/picture"];

const FORM_URLENCODED: &str = "application/x-www-form-urlencoded";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseState {
    StartLine,
    Headers,
    Body,
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseStatus {
    /// A full request is available through [`RequestParser::request`].
    Complete,
    /// More bytes are needed; parser state is kept for the next call.
    Incomplete,
}

/// Incremental request parser.
///
/// Bytes are consumed from the connection's read [`Buffer`] one CRLF line
/// at a time, so a request may arrive split at any byte boundary.
#[derive(Debug)]
pub struct RequestParser {
    state: ParseState,
    request: Request,
}

impl Default for RequestParser {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestParser {
    pub fn new() -> Self {
        Self {
            state: ParseState::StartLine,
            request: Request::default(),
        }
    }

    pub fn state(&self) -> ParseState {
        self.state
    }

    pub fn request(&self) -> &Request {
        &self.request
    }

    /// Gets ready for the next request on a kept-alive connection.
    pub fn reset(&mut self) {
        self.state = ParseState::StartLine;
        self.request = Request::default();
    }

    /// Advances the state machine over the buffered bytes.
    pub fn parse(
        &mut self,
        buf: &mut Buffer,
        credentials: &dyn CredentialStore,
    ) -> Result<ParseStatus, ProtocolError> {
        while self.state != ParseState::Done {
            match self.state {
                ParseState::StartLine => {
                    let Some(line) = take_line(buf)? else {
                        return Ok(ParseStatus::Incomplete);
                    };
                    self.parse_request_line(&line)?;
                }
                ParseState::Headers => {
                    let Some(line) = take_line(buf)? else {
                        return Ok(ParseStatus::Incomplete);
                    };
                    self.parse_header(&line)?;
                }
                ParseState::Body => {
                    let len = self.body_len()?;
                    if buf.readable_bytes() < len {
                        return Ok(ParseStatus::Incomplete);
                    }
                    let body = String::from_utf8_lossy(&buf.peek()[..len]).into_owned();
                    buf.consume(len);
                    self.parse_body(body, credentials);
                }
                ParseState::Done => unreachable!(),
            }
        }

        debug!(
            method = self.request.method.as_str(),
            path = %self.request.path,
            version = %self.request.version,
            "request parsed"
        );
        Ok(ParseStatus::Complete)
    }

    fn parse_request_line(&mut self, line: &str) -> Result<(), ProtocolError> {
        let mut parts = line.split(' ');
        let (Some(method), Some(target), Some(version), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            warn!(line, "bad request line");
            return Err(ProtocolError::BadRequestLine);
        };

        let version = match version.strip_prefix("HTTP/") {
            Some(v) if !v.is_empty() => v,
            _ => {
                warn!(line, "bad request line");
                return Err(ProtocolError::BadRequestLine);
            }
        };
        if !target.starts_with('/') || target.split('/').any(|seg| seg == "..") {
            return Err(ProtocolError::InvalidTarget(target.to_string()));
        }
        let method = Method::from_str(method)
            .ok_or_else(|| ProtocolError::UnsupportedMethod(method.to_string()))?;

        self.request.method = method;
        self.request.path = normalize_path(target);
        self.request.version = version.to_string();
        self.state = ParseState::Headers;
        Ok(())
    }

    /// `Name: value` lines fill the header map. The empty line ends the
    /// header section.
    fn parse_header(&mut self, line: &str) -> Result<(), ProtocolError> {
        if line.is_empty() {
            self.state = ParseState::Body;
            return Ok(());
        }
        match line.split_once(':') {
            Some((name, value)) if !name.is_empty() && !name.contains(' ') => {
                let value = value.strip_prefix(' ').unwrap_or(value);
                self.request
                    .headers
                    .insert(name.to_ascii_lowercase(), value.to_string());
                Ok(())
            }
            _ => {
                warn!(line, "bad header line");
                Err(ProtocolError::MalformedHeader(line.to_string()))
            }
        }
    }

    fn body_len(&self) -> Result<usize, ProtocolError> {
        let Some(raw) = self.request.header("Content-Length") else {
            return Ok(0);
        };
        match raw.trim().parse::<usize>() {
            Ok(len) if len <= MAX_BODY_LEN => Ok(len),
            _ => Err(ProtocolError::InvalidContentLength(raw.to_string())),
        }
    }

    fn parse_body(&mut self, body: String, credentials: &dyn CredentialStore) {
        self.request.body = body;
        self.parse_post(credentials);
        self.state = ParseState::Done;
        debug!(len = self.request.body.len(), "body received");
    }

    fn parse_post(&mut self, credentials: &dyn CredentialStore) {
        let is_form = self.request.method == Method::POST
            && self
                .request
                .header("Content-Type")
                .and_then(|v| v.split(';').next())
                .is_some_and(|v| v.trim().eq_ignore_ascii_case(FORM_URLENCODED));
        if !is_form {
            return;
        }

        self.request.form = decode_form(&self.request.body);

        let is_login = match self.request.path.as_str() {
            "/register.html" => false,
            "/login.html" => true,
            _ => return,
        };
        let username = self.request.form_value("username").unwrap_or_default();
        let password = self.request.form_value("password").unwrap_or_default();
        let verified = credentials.verify(username, password, is_login);
        self.request.path = if verified {
            "/welcome.html".to_string()
        } else {
            "/error.html".to_string()
        };
    }
}

/// Decodes an `application/x-www-form-urlencoded` body: `&` separates
/// pairs, `=` separates key from value, `+` is a space and `%XX` is the
/// byte `0xXX`. A repeated key keeps its last value.
pub fn decode_form(body: &str) -> HashMap<String, String> {
    url::form_urlencoded::parse(body.as_bytes())
        .into_owned()
        .collect()
}

fn normalize_path(target: &str) -> String {
    if target == "/" {
        "/index.html".to_string()
    } else if DEFAULT_HTML.contains(&target) {
        format!("{target}.html")
    } else {
        target.to_string()
    }
}

/// Pops one CRLF-terminated line, without the terminator.
fn take_line(buf: &mut Buffer) -> Result<Option<String>, ProtocolError> {
    match find(buf.peek(), CRLF) {
        Some(end) if end > MAX_LINE_LEN => Err(ProtocolError::LineTooLong),
        Some(end) => {
            let line = String::from_utf8_lossy(&buf.peek()[..end]).into_owned();
            buf.consume(end + CRLF.len());
            Ok(Some(line))
        }
        None if buf.readable_bytes() > MAX_LINE_LEN => Err(ProtocolError::LineTooLong),
        None => Ok(None),
    }
}
