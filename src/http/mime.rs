//! File suffix to `Content-Type` lookup.

pub const DEFAULT_TYPE: &str = "application/octet-stream";

const SUFFIX_TYPE: &[(&str, &str)] = &[
    (".html", "text/html"),
    (".xml", "text/xml"),
    (".xhtml", "application/xhtml+xml"),
    (".txt", "text/plain"),
    (".rtf", "application/rtf"),
    (".pdf", "application/pdf"),
    (".word", "application/nsword"),
    (".png", "image/png"),
    (".gif", "image/gif"),
    (".jpg", "image/jpeg"),
    (".jpeg", "image/jpeg"),
    (".ico", "image/x-icon"),
    (".au", "audio/basic"),
    (".mpeg", "video/mpeg"),
    (".mpg", "video/mpeg"),
    (".mp4", "video/mp4"),
    (".avi", "video/x-msvideo"),
    (".gz", "application/x-gzip"),
    (".tar", "application/x-tar"),
    (".css", "text/css"),
    (".js", "text/javascript"),
    (".json", "application/json"),
];

/// MIME type for `path`, judged by the suffix after its last `.`.
///
/// ```
/// # use webserv::http::mime;
/// assert_eq!(mime::from_path("/index.html"), "text/html");
/// assert_eq!(mime::from_path("/blob"), mime::DEFAULT_TYPE);
/// ```
pub fn from_path(path: &str) -> &'static str {
    let file_name = path.rsplit('/').next().unwrap_or(path);
    let Some(dot) = file_name.rfind('.') else {
        return DEFAULT_TYPE;
    };
    let suffix = &file_name[dot..];
    SUFFIX_TYPE
        .iter()
        .find(|(ext, _)| ext.eq_ignore_ascii_case(suffix))
        .map(|(_, ty)| *ty)
        .unwrap_or(DEFAULT_TYPE)
}
