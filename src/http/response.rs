use std::fs::{self, File};
use std::io::{self, Write};
use std::os::fd::AsRawFd;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::ptr::{self, NonNull};

use tracing::{debug, warn};

use crate::buffer::Buffer;
use crate::http::mime;

/// HTTP status codes produced by the server.
///
/// - `Ok` (200): File found and readable
/// - `BadRequest` (400): Malformed request
/// - `Forbidden` (403): File exists but is not world-readable
/// - `NotFound` (404): No such file
/// - `ServiceUnavailable` (503): Connection limit reached
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusCode {
    /// 200 OK
    Ok,
    /// 400 Bad Request
    BadRequest,
    /// 403 Forbidden
    Forbidden,
    /// 404 Not Found
    NotFound,
    /// 503 Service Unavailable
    ServiceUnavailable,
}

impl StatusCode {
    /// Returns the numeric HTTP status code.
    ///
    /// # Example
    ///
    /// ```
    /// # use webserv::http::response::StatusCode;
    /// assert_eq!(StatusCode::Ok.as_u16(), 200);
    /// assert_eq!(StatusCode::NotFound.as_u16(), 404);
    /// ```
    pub fn as_u16(&self) -> u16 {
        match self {
            StatusCode::Ok => 200,
            StatusCode::BadRequest => 400,
            StatusCode::Forbidden => 403,
            StatusCode::NotFound => 404,
            StatusCode::ServiceUnavailable => 503,
        }
    }

    /// Returns the standard HTTP reason phrase for this status code.
    pub fn reason_phrase(&self) -> &'static str {
        match self {
            StatusCode::Ok => "OK",
            StatusCode::BadRequest => "Bad Request",
            StatusCode::Forbidden => "Forbidden",
            StatusCode::NotFound => "Not Found",
            StatusCode::ServiceUnavailable => "Service Unavailable",
        }
    }

    /// Page served in place of the requested file for error statuses.
    pub fn error_page(&self) -> Option<&'static str> {
        match self {
            StatusCode::BadRequest => Some("/400.html"),
            StatusCode::Forbidden => Some("/403.html"),
            StatusCode::NotFound => Some("/404.html"),
            StatusCode::Ok | StatusCode::ServiceUnavailable => None,
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.as_u16())
    }
}

/// Read-only private mapping of a whole file.
struct MappedFile {
    ptr: NonNull<u8>,
    len: usize,
}

// The mapping is read-only and owned by exactly one response.
unsafe impl Send for MappedFile {}

impl MappedFile {
    fn map(file: &File, len: usize) -> io::Result<Self> {
        let addr = unsafe {
            libc::mmap(
                ptr::null_mut(),
                len,
                libc::PROT_READ,
                libc::MAP_PRIVATE,
                file.as_raw_fd(),
                0,
            )
        };
        if addr == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }
        let ptr = NonNull::new(addr as *mut u8)
            .ok_or_else(|| io::Error::other("mmap returned a null mapping"))?;
        Ok(Self { ptr, len })
    }

    fn as_slice(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }
}

impl Drop for MappedFile {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.ptr.as_ptr() as *mut libc::c_void, self.len);
        }
    }
}

/// Response for one request: headers are rendered into the connection's
/// write buffer, the file body stays in a memory mapping so it can be sent
/// with the headers in one vectored write.
pub struct HttpResponse {
    root: PathBuf,
    path: String,
    keep_alive: bool,
    status_override: Option<StatusCode>,
    status: StatusCode,
    head_only: bool,
    file: Option<MappedFile>,
}

impl Default for HttpResponse {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpResponse {
    pub fn new() -> Self {
        Self {
            root: PathBuf::new(),
            path: String::new(),
            keep_alive: false,
            status_override: None,
            status: StatusCode::Ok,
            head_only: false,
            file: None,
        }
    }

    /// Prepares for a new response, releasing the previous mapping.
    ///
    /// `status` forces a status code; with `None` it is derived from the
    /// file at `root` + `path`.
    pub fn init(&mut self, root: &Path, path: &str, keep_alive: bool, status: Option<StatusCode>) {
        self.unmap();
        self.root = root.to_path_buf();
        self.path = path.to_string();
        self.keep_alive = keep_alive;
        self.status_override = status;
        self.status = status.unwrap_or(StatusCode::Ok);
        self.head_only = false;
    }

    /// Answers a `HEAD` request: headers as for `GET`, no body.
    pub fn set_head_only(&mut self, head_only: bool) {
        self.head_only = head_only;
    }

    /// Resolves the status and writes status line and headers (plus the
    /// generated error page, if no file can be served) into `buf`.
    pub fn make_response(&mut self, buf: &mut Buffer) {
        self.status = match self.status_override {
            Some(status) => status,
            None => match fs::metadata(self.full_path()) {
                Err(_) => StatusCode::NotFound,
                Ok(meta) if meta.is_dir() => StatusCode::NotFound,
                Ok(meta) if meta.permissions().mode() & 0o004 == 0 => StatusCode::Forbidden,
                Ok(_) => StatusCode::Ok,
            },
        };
        if let Some(page) = self.status.error_page() {
            self.path = page.to_string();
        }

        self.add_status_line(buf);
        self.add_headers(buf);
        self.add_content(buf);
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn keep_alive(&self) -> bool {
        self.keep_alive
    }

    /// Path actually served, after error page substitution.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Mapped file body, empty when nothing is mapped.
    pub fn file(&self) -> &[u8] {
        self.file.as_ref().map(MappedFile::as_slice).unwrap_or_default()
    }

    pub fn file_len(&self) -> usize {
        self.file.as_ref().map_or(0, |f| f.len)
    }

    /// Releases the file mapping. Safe to call repeatedly.
    pub fn unmap(&mut self) {
        self.file = None;
    }

    fn full_path(&self) -> PathBuf {
        self.root.join(self.path.trim_start_matches('/'))
    }

    fn add_status_line(&self, buf: &mut Buffer) {
        let _ = write!(
            buf,
            "HTTP/1.1 {} {}\r\n",
            self.status.as_u16(),
            self.status.reason_phrase()
        );
    }

    fn add_headers(&self, buf: &mut Buffer) {
        if self.keep_alive {
            buf.append(b"Connection: keep-alive\r\n");
            buf.append(b"keep-alive: max=6, timeout=120\r\n");
        } else {
            buf.append(b"Connection: close\r\n");
        }
        let _ = write!(buf, "Content-Type: {}\r\n", mime::from_path(&self.path));
    }

    fn add_content(&mut self, buf: &mut Buffer) {
        let full = self.full_path();
        let (file, len) = match File::open(&full).and_then(|f| f.metadata().map(|m| (f, m))) {
            Ok((file, meta)) if meta.is_file() => (file, meta.len() as usize),
            _ => {
                self.error_content(buf, "File NotFound!");
                return;
            }
        };

        if len > 0 && !self.head_only {
            match MappedFile::map(&file, len) {
                Ok(mapped) => self.file = Some(mapped),
                Err(e) => {
                    warn!(path = %full.display(), error = %e, "mmap failed");
                    self.error_content(buf, "File NotFound!");
                    return;
                }
            }
        }
        debug!(path = %full.display(), len, "file mapped");
        let _ = write!(buf, "Content-Length: {len}\r\n\r\n");
    }

    /// Writes a generated HTML error page directly after the headers.
    pub fn error_content(&self, buf: &mut Buffer, message: &str) {
        let body = format!(
            "<html><title>Error</title><body bgcolor=\"ffffff\">{} : {}\n<p>{}</p><hr><em>webserv</em></body></html>",
            self.status.as_u16(),
            self.status.reason_phrase(),
            message
        );
        let _ = write!(buf, "Content-Length: {}\r\n\r\n", body.len());
        if !self.head_only {
            buf.append(body.as_bytes());
        }
    }
}

/// Minimal response sent when the server refuses a connection outright.
pub fn busy_response() -> Vec<u8> {
    let body = "Server busy";
    let status = StatusCode::ServiceUnavailable;
    format!(
        "HTTP/1.1 {} {}\r\nConnection: close\r\nContent-Type: text/plain\r\nContent-Length: {}\r\n\r\n{}",
        status.as_u16(),
        status.reason_phrase(),
        body.len(),
        body
    )
    .into_bytes()
}
