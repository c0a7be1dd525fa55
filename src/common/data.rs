use bytes::Bytes;
use http::StatusCode;
use std::{collections::HashMap, fmt, net::SocketAddr, str, time::Duration};

/// A decoded HTTP request as observed by the mock server.
///
/// Requests are immutable once the decoder has produced them. Header names are stored
/// lowercased, so all header lookups are case-insensitive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub(crate) method: String,
    pub(crate) path: String,
    pub(crate) version: String,
    pub(crate) query: HashMap<String, String>,
    pub(crate) headers: HashMap<String, String>,
    pub(crate) body: Bytes,
    pub(crate) remote_addr: Option<SocketAddr>,
}

impl Request {
    /// The request method exactly as sent, e.g. `POST`.
    pub fn method(&self) -> &str {
        &self.method
    }

    /// The request path without the query string.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// The protocol version token from the request line, e.g. `HTTP/1.1`.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// The percent-decoded query parameters. If a name occurs more than once, the last
    /// occurrence wins.
    pub fn query(&self) -> &HashMap<String, String> {
        &self.query
    }

    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.query.get(name).map(String::as_str)
    }

    /// All request headers, keyed by lowercased name.
    pub fn headers(&self) -> &HashMap<String, String> {
        &self.headers
    }

    /// Looks up a header by name, ignoring case.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// The body as UTF-8 text, or `None` if it is not valid UTF-8.
    pub fn body_str(&self) -> Option<&str> {
        str::from_utf8(&self.body).ok()
    }

    /// The `"METHOD PATH"` identifier of this request. The query string is not part of it.
    pub fn endpoint(&self) -> String {
        format!("{} {}", self.method, self.path)
    }

    /// The peer address of the connection the request arrived on, if it could be determined.
    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} ({} bytes)", self.method, self.path, self.body.len())
    }
}

/// The body of a mocked response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Body {
    /// A body whose length is known up front and sent with a `Content-Length` header.
    Full(Bytes),
    /// A body of unknown length. The chunks are written one after another and the
    /// connection is closed afterwards, so the client reads until EOF.
    Streaming(Vec<Bytes>),
}

impl Default for Body {
    fn default() -> Self {
        Body::Full(Bytes::new())
    }
}

/// A response produced by a mock rule or by the intrinsic default.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub(crate) status: u16,
    pub(crate) reason: String,
    pub(crate) headers: Vec<(String, String)>,
    pub(crate) body: Body,
    pub(crate) delay: Duration,
}

impl Response {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            reason: canonical_reason(status).to_string(),
            headers: Vec::new(),
            body: Body::default(),
            delay: Duration::ZERO,
        }
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }

    /// Headers in the order they will be written to the wire.
    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    pub fn body(&self) -> &Body {
        &self.body
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// The body length, or `None` for a streaming body.
    pub fn content_length(&self) -> Option<usize> {
        match &self.body {
            Body::Full(bytes) => Some(bytes.len()),
            Body::Streaming(_) => None,
        }
    }
}

impl Default for Response {
    fn default() -> Self {
        Response::new(200)
    }
}

pub(crate) fn canonical_reason(status: u16) -> &'static str {
    StatusCode::from_u16(status)
        .ok()
        .and_then(|code| code.canonical_reason())
        .unwrap_or("Unknown")
}
