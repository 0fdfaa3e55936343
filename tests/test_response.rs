use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use webserv::buffer::Buffer;
use webserv::http::mime;
use webserv::http::response::{HttpResponse, StatusCode, busy_response};

fn site() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("index.html"), "<h1>home</h1>").unwrap();
    fs::write(dir.path().join("404.html"), "not here").unwrap();
    fs::write(dir.path().join("empty.txt"), "").unwrap();
    fs::create_dir(dir.path().join("sub")).unwrap();
    dir
}

fn respond(root: &Path, path: &str, keep_alive: bool, status: Option<StatusCode>) -> (HttpResponse, String) {
    let mut resp = HttpResponse::new();
    let mut buf = Buffer::new();
    resp.init(root, path, keep_alive, status);
    resp.make_response(&mut buf);
    (resp, buf.consume_all_to_string())
}

#[test]
fn test_status_code_tables() {
    assert_eq!(StatusCode::Ok.as_u16(), 200);
    assert_eq!(StatusCode::BadRequest.as_u16(), 400);
    assert_eq!(StatusCode::Forbidden.as_u16(), 403);
    assert_eq!(StatusCode::NotFound.as_u16(), 404);
    assert_eq!(StatusCode::ServiceUnavailable.as_u16(), 503);
    assert_eq!(StatusCode::Forbidden.reason_phrase(), "Forbidden");
    assert_eq!(StatusCode::NotFound.error_page(), Some("/404.html"));
    assert_eq!(StatusCode::Ok.error_page(), None);
    assert!(StatusCode::Ok.is_success());
    assert!(!StatusCode::NotFound.is_success());
}

#[test]
fn test_response_serves_mapped_file() {
    let dir = site();
    let (resp, head) = respond(dir.path(), "/index.html", true, None);

    assert_eq!(resp.status(), StatusCode::Ok);
    assert!(head.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(head.contains("Connection: keep-alive\r\n"));
    assert!(head.contains("keep-alive: max=6, timeout=120\r\n"));
    assert!(head.contains("Content-Type: text/html\r\n"));
    assert!(head.ends_with("Content-Length: 13\r\n\r\n"));
    assert_eq!(resp.file(), b"<h1>home</h1>");
    assert_eq!(resp.file_len(), 13);
}

#[test]
fn test_response_missing_file_uses_error_page() {
    let dir = site();
    let (resp, head) = respond(dir.path(), "/nope.html", false, None);

    assert_eq!(resp.status(), StatusCode::NotFound);
    assert_eq!(resp.path(), "/404.html");
    assert!(head.starts_with("HTTP/1.1 404 Not Found\r\n"));
    assert!(head.contains("Connection: close\r\n"));
    assert_eq!(resp.file(), b"not here");
}

#[test]
fn test_response_directory_is_not_found() {
    let dir = site();
    let (resp, _) = respond(dir.path(), "/sub", false, None);
    assert_eq!(resp.status(), StatusCode::NotFound);
}

#[test]
fn test_response_generates_html_without_error_page() {
    let dir = site();
    let (resp, head) = respond(dir.path(), "/", false, Some(StatusCode::BadRequest));

    assert_eq!(resp.status(), StatusCode::BadRequest);
    assert!(head.starts_with("HTTP/1.1 400 Bad Request\r\n"));
    assert!(head.contains("<title>Error</title>"));
    assert!(head.contains("400 : Bad Request\n<p>File NotFound!</p>"));
    assert!(resp.file().is_empty());

    let (_, body) = head.split_once("\r\n\r\n").unwrap();
    let length: usize = head
        .lines()
        .find_map(|l| l.strip_prefix("Content-Length: "))
        .unwrap()
        .parse()
        .unwrap();
    assert_eq!(body.len(), length);
}

#[test]
fn test_response_unreadable_file_is_forbidden() {
    let dir = site();
    let secret = dir.path().join("secret.html");
    fs::write(&secret, "hidden").unwrap();
    fs::set_permissions(&secret, fs::Permissions::from_mode(0o600)).unwrap();

    let (resp, head) = respond(dir.path(), "/secret.html", false, None);

    assert_eq!(resp.status(), StatusCode::Forbidden);
    assert!(head.starts_with("HTTP/1.1 403 Forbidden\r\n"));
    assert!(head.contains("403 : Forbidden"));
}

#[test]
fn test_response_empty_file() {
    let dir = site();
    let (resp, head) = respond(dir.path(), "/empty.txt", false, None);

    assert_eq!(resp.status(), StatusCode::Ok);
    assert!(head.contains("Content-Type: text/plain\r\n"));
    assert!(head.ends_with("Content-Length: 0\r\n\r\n"));
    assert_eq!(resp.file_len(), 0);
}

#[test]
fn test_response_unmap_is_idempotent() {
    let dir = site();
    let (mut resp, _) = respond(dir.path(), "/index.html", false, None);

    resp.unmap();
    resp.unmap();
    assert!(resp.file().is_empty());

    let mut never_mapped = HttpResponse::new();
    never_mapped.unmap();
}

#[test]
fn test_mime_lookup() {
    assert_eq!(mime::from_path("/a/b/photo.JPG"), "image/jpeg");
    assert_eq!(mime::from_path("/style.css"), "text/css");
    assert_eq!(mime::from_path("/archive.tar.gz"), "application/x-gzip");
    assert_eq!(mime::from_path("/dir.d/readme"), mime::DEFAULT_TYPE);
}

#[test]
fn test_busy_response() {
    let raw = String::from_utf8(busy_response()).unwrap();
    assert!(raw.starts_with("HTTP/1.1 503 Service Unavailable\r\n"));
    assert!(raw.ends_with("\r\n\r\nServer busy"));
}

#[test]
fn test_head_only_response_has_no_body() {
    let root = site();
    let mut resp = HttpResponse::new();
    let mut buf = Buffer::new();

    resp.init(root.path(), "/index.html", false, None);
    resp.set_head_only(true);
    resp.make_response(&mut buf);
    let head = buf.consume_all_to_string();

    assert!(head.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(head.ends_with("Content-Length: 13\r\n\r\n"));
    assert!(resp.file().is_empty());

    resp.init(root.path(), "/missing.html", false, Some(StatusCode::BadRequest));
    resp.set_head_only(true);
    resp.make_response(&mut buf);
    let head = buf.consume_all_to_string();

    assert!(head.starts_with("HTTP/1.1 400 Bad Request\r\n"));
    assert!(head.ends_with("\r\n\r\n"));
    assert!(!head.contains("<html>"));
}
