use std::collections::HashMap;

/// HTTP request methods.
///
/// The server serves static content for GET and handles form POSTs. Other
/// methods are recognised so they can be answered: HEAD gets the GET headers
/// without a body, the rest are served the same way as GET.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Method {
    /// GET - Retrieve a resource
    #[default]
    GET,
    /// POST - Submit a form
    POST,
    /// PUT - Replace a resource
    PUT,
    /// DELETE - Delete a resource
    DELETE,
    /// HEAD - Like GET but without the response body
    HEAD,
    /// OPTIONS - Describe communication options
    OPTIONS,
    /// PATCH - Partial modification of a resource
    PATCH,
}

impl Method {
    /// Parses an HTTP method from a string.
    ///
    /// # Arguments
    ///
    /// * `s` - String representation of the method (case-sensitive, typically uppercase)
    ///
    /// # Returns
    ///
    /// `Some(Method)` if the string matches a known method, `None` otherwise.
    ///
    /// # Example
    ///
    /// ```
    /// # use webserv::http::request::Method;
    /// assert_eq!(Method::from_str("GET"), Some(Method::GET));
    /// assert_eq!(Method::from_str("get"), None);
    /// ```
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "GET" => Some(Method::GET),
            "POST" => Some(Method::POST),
            "PUT" => Some(Method::PUT),
            "DELETE" => Some(Method::DELETE),
            "HEAD" => Some(Method::HEAD),
            "OPTIONS" => Some(Method::OPTIONS),
            "PATCH" => Some(Method::PATCH),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Method::GET => "GET",
            Method::POST => "POST",
            Method::PUT => "PUT",
            Method::DELETE => "DELETE",
            Method::HEAD => "HEAD",
            Method::OPTIONS => "OPTIONS",
            Method::PATCH => "PATCH",
        }
    }
}

/// A request as assembled by [`RequestParser`](crate::http::parser::RequestParser).
///
/// `path` is the normalized target: `/` becomes `/index.html`, a handful of
/// extensionless pages get `.html` appended, and login/register form posts
/// are rewritten to the page the client should see next.
#[derive(Debug, Clone, Default)]
pub struct Request {
    /// The HTTP method (GET, POST, etc.)
    pub method: Method,
    /// Normalized request path (e.g., "/index.html")
    pub path: String,
    /// Version without the `HTTP/` prefix (e.g., "1.1")
    pub version: String,
    /// Request headers keyed by lowercase name; a repeated name keeps the
    /// last value
    pub headers: HashMap<String, String>,
    /// Raw single-line body
    pub body: String,
    /// Decoded `application/x-www-form-urlencoded` fields
    pub form: HashMap<String, String>,
}

impl Request {
    /// Retrieves a header value. Names compare case-insensitively.
    pub fn header(&self, key: &str) -> Option<&str> {
        if let Some(value) = self.headers.get(key) {
            return Some(value.as_str());
        }
        self.headers
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(key))
            .map(|(_, value)| value.as_str())
    }

    /// Retrieves a decoded form field.
    pub fn form_value(&self, key: &str) -> Option<&str> {
        self.form.get(key).map(|v| v.as_str())
    }

    /// Whether the connection should stay open after the response.
    ///
    /// Only an HTTP/1.1 request that explicitly asks for `Connection:
    /// keep-alive` is kept open.
    pub fn keep_alive(&self) -> bool {
        self.version == "1.1"
            && self
                .header("Connection")
                .is_some_and(|v| v.eq_ignore_ascii_case("keep-alive"))
    }
}
