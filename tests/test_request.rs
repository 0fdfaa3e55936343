use std::collections::HashMap;

use webserv::http::request::{Method, Request};

fn request(version: &str, headers: &[(&str, &str)]) -> Request {
    Request {
        method: Method::GET,
        path: "/index.html".to_string(),
        version: version.to_string(),
        headers: headers
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
        ..Default::default()
    }
}

#[test]
fn test_request_header_retrieval() {
    let req = request("1.1", &[("Host", "example.com"), ("Accept", "*/*")]);

    assert_eq!(req.header("Host"), Some("example.com"));
    assert_eq!(req.header("Accept"), Some("*/*"));
    assert_eq!(req.header("Missing"), None);
}

#[test]
fn test_request_keep_alive_requires_http_1_1() {
    assert!(request("1.1", &[("Connection", "keep-alive")]).keep_alive());
    assert!(request("1.1", &[("Connection", "Keep-Alive")]).keep_alive());
    assert!(!request("1.0", &[("Connection", "keep-alive")]).keep_alive());
    assert!(!request("1.1", &[("Connection", "close")]).keep_alive());
    assert!(!request("1.1", &[]).keep_alive());
}

#[test]
fn test_request_form_value() {
    let mut form = HashMap::new();
    form.insert("username".to_string(), "ann".to_string());
    let req = Request {
        method: Method::POST,
        form,
        ..Default::default()
    };

    assert_eq!(req.form_value("username"), Some("ann"));
    assert_eq!(req.form_value("password"), None);
}

#[test]
fn test_method_round_trip() {
    for name in ["GET", "POST", "PUT", "DELETE", "HEAD", "OPTIONS", "PATCH"] {
        let method = Method::from_str(name).unwrap();
        assert_eq!(method.as_str(), name);
    }
    assert_eq!(Method::from_str("get"), None);
    assert_eq!(Method::default(), Method::GET);
}

#[test]
fn test_request_header_names_ignore_case() {
    let req = request("1.1", &[("connection", "keep-alive"), ("X-Trace", "abc")]);

    assert_eq!(req.header("Connection"), Some("keep-alive"));
    assert_eq!(req.header("x-trace"), Some("abc"));
    assert!(req.keep_alive());
}
