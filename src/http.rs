//! Extract HTTP/1.x messages from a single TCP payload
//!
//! There is no stream reassembly. A message is only recognized if its whole header block is inside one segment, and
//! the body is whatever follows the header block in that same segment. Every value is copied out of the payload so a
//! parsed message can be kept after the frame it came from is gone.

use std::fmt;

use http::uri::InvalidUri;
use http::{Method, StatusCode, Uri};
use httparse::{Status, EMPTY_HEADER};
use thiserror::Error;

use crate::config::Scheme;

/// Maximum number of headers to parse per message.
const MAX_HEADERS: usize = 100;

/// Headers describing the captured connection or framing rather than the request itself
const HOP_BY_HOP: [&str; 9] = [
    "host",
    "content-length",
    "transfer-encoding",
    "connection",
    "keep-alive",
    "proxy-connection",
    "upgrade",
    "te",
    "trailer",
];

/// Reasons a payload is not a usable HTTP message
#[derive(Debug, Error)]
pub enum HttpParseErr {
    /// Header block ends past the end of the payload
    #[error("Header block is incomplete")]
    Incomplete,
    /// Payload is not HTTP
    #[error("Malformed HTTP message")]
    Malformed(#[from] httparse::Error),
    /// Method token is not valid
    #[error("Invalid method")]
    Method(#[from] http::method::InvalidMethod),
    /// Status code is outside of 100..=999
    #[error("Invalid status code {0}")]
    Status(u16),
    /// Request has neither a Host header nor an absolute target
    #[error("Request to {0} has no host")]
    MissingHost(String),
    /// Rewritten target is not a valid URL
    #[error("Invalid request URL {url}")]
    Url {
        url: String,
        #[source]
        source: InvalidUri,
    },
}

/// Single header, name as captured and value as raw bytes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub name: String,
    pub value: Vec<u8>,
}

impl Header {
    /// Whether the header should be sent again on a replay
    #[must_use]
    pub fn is_forwarded(&self) -> bool {
        !HOP_BY_HOP
            .iter()
            .any(|h| self.name.eq_ignore_ascii_case(h))
    }
}

/// HTTP request as captured
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    /// Request target exactly as it appeared on the request line
    pub target: String,
    /// Minor version, `1` for HTTP/1.1
    pub version: u8,
    pub headers: Vec<Header>,
    pub body: Vec<u8>,
}

/// HTTP response as captured
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: StatusCode,
    pub version: u8,
    pub headers: Vec<Header>,
    pub body: Vec<u8>,
}

/// Either side of an exchange
#[derive(Debug, Clone)]
pub enum HttpMessage {
    Request(HttpRequest),
    Response(HttpResponse),
}

impl HttpMessage {
    /// Parse a payload as a request, and failing that as a response
    ///
    /// # Errors
    /// Returns the response parse error if the payload is neither.
    pub fn parse(payload: &[u8]) -> Result<Self, HttpParseErr> {
        match HttpRequest::parse(payload) {
            Ok(req) => Ok(Self::Request(req)),
            Err(_) => HttpResponse::parse(payload).map(Self::Response),
        }
    }
}

impl HttpRequest {
    /// Parse a request out of a payload
    ///
    /// # Errors
    /// Returns an error if the payload does not start with a complete request header block.
    pub fn parse(payload: &[u8]) -> Result<Self, HttpParseErr> {
        let mut headers = [EMPTY_HEADER; MAX_HEADERS];
        let mut req = httparse::Request::new(&mut headers);
        let header_len = match req.parse(payload)? {
            Status::Complete(len) => len,
            Status::Partial => return Err(HttpParseErr::Incomplete),
        };
        // Complete guarantees the request line was there
        let method = Method::from_bytes(req.method.unwrap_or_default().as_bytes())?;
        let target = req.path.unwrap_or_default().to_string();
        let version = req.version.unwrap_or(1);
        let headers = copy_headers(req.headers);
        let body = body(&headers, &payload[header_len..]);
        Ok(Self {
            method,
            target,
            version,
            headers,
            body,
        })
    }

    /// First value of a header, compared case insensitively
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&[u8]> {
        find_header(&self.headers, name)
    }

    /// Host the request was sent to
    ///
    /// Taken from the authority of an absolute-form target, otherwise from the Host header.
    #[must_use]
    pub fn host(&self) -> Option<String> {
        if let Ok(uri) = self.target.parse::<Uri>() {
            if let Some(authority) = uri.authority() {
                return Some(authority.to_string());
            }
        }
        self.header("host")
            .map(|h| String::from_utf8_lossy(h).trim().to_string())
            .filter(|h| !h.is_empty())
    }

    /// Rewrite the target as `{scheme}://{host}{path}` for the live target
    ///
    /// # Errors
    /// Returns an error if there is no host or the result is not a valid URL.
    pub fn canonical_url(&self, scheme: Scheme) -> Result<Uri, HttpParseErr> {
        let host = self
            .host()
            .ok_or_else(|| HttpParseErr::MissingHost(self.target.clone()))?;
        let path = match self.target.parse::<Uri>() {
            Ok(uri) if uri.authority().is_some() => uri
                .path_and_query()
                .map_or_else(|| "/".to_string(), ToString::to_string),
            _ => self.target.clone(),
        };
        let url = format!("{scheme}://{host}{path}");
        url.parse::<Uri>()
            .map_err(|source| HttpParseErr::Url { url, source })
    }

    /// Headers that are sent again on a replay
    pub fn forwarded_headers(&self) -> impl Iterator<Item = &Header> {
        self.headers.iter().filter(|h| h.is_forwarded())
    }
}

impl fmt::Display for HttpRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.target)
    }
}

impl HttpResponse {
    /// Parse a response out of a payload
    ///
    /// # Errors
    /// Returns an error if the payload does not start with a complete status line and header block.
    pub fn parse(payload: &[u8]) -> Result<Self, HttpParseErr> {
        let mut headers = [EMPTY_HEADER; MAX_HEADERS];
        let mut resp = httparse::Response::new(&mut headers);
        let header_len = match resp.parse(payload)? {
            Status::Complete(len) => len,
            Status::Partial => return Err(HttpParseErr::Incomplete),
        };
        let code = resp.code.unwrap_or_default();
        let status = StatusCode::from_u16(code).map_err(|_| HttpParseErr::Status(code))?;
        let version = resp.version.unwrap_or(1);
        let headers = copy_headers(resp.headers);
        let body = body(&headers, &payload[header_len..]);
        Ok(Self {
            status,
            version,
            headers,
            body,
        })
    }

    /// First value of a header, compared case insensitively
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&[u8]> {
        find_header(&self.headers, name)
    }
}

fn copy_headers(headers: &[httparse::Header<'_>]) -> Vec<Header> {
    headers
        .iter()
        .filter(|h| !h.name.is_empty())
        .map(|h| Header {
            name: h.name.to_string(),
            value: h.value.to_vec(),
        })
        .collect()
}

fn find_header<'a>(headers: &'a [Header], name: &str) -> Option<&'a [u8]> {
    headers
        .iter()
        .find(|h| h.name.eq_ignore_ascii_case(name))
        .map(|h| h.value.as_slice())
}

/// Copy the body, cut to Content-Length when the segment holds more
fn body(headers: &[Header], rest: &[u8]) -> Vec<u8> {
    let declared = find_header(headers, "content-length")
        .and_then(|v| std::str::from_utf8(v).ok())
        .and_then(|v| v.trim().parse::<usize>().ok());
    match declared {
        Some(len) if len < rest.len() => rest[..len].to_vec(),
        _ => rest.to_vec(),
    }
}

#[cfg(test)]
mod http_testing {
    use super::*;

    const GET_REQUEST: &[u8] = b"GET /foo?bar=1 HTTP/1.1\r\nHost: example.com:8080\r\nAccept: */*\r\n\r\n";

    const POST_REQUEST: &[u8] = b"POST /submit HTTP/1.1\r\nHost: x\r\nContent-Length: 5\r\n\
        Connection: keep-alive\r\nX-Trace: abc\r\n\r\nhello trailing";

    #[test]
    fn parse_get() {
        let req = HttpRequest::parse(GET_REQUEST).unwrap();
        assert_eq!(req.method, Method::GET);
        assert_eq!(req.target, "/foo?bar=1");
        assert_eq!(req.version, 1);
        assert_eq!(req.host().as_deref(), Some("example.com:8080"));
        assert_eq!(req.header("accept"), Some(&b"*/*"[..]));
        assert!(req.body.is_empty());
    }

    #[test]
    fn body_cut_to_content_length() {
        let req = HttpRequest::parse(POST_REQUEST).unwrap();
        assert_eq!(req.method, Method::POST);
        assert_eq!(req.body, b"hello");
        let names: Vec<_> = req.forwarded_headers().map(|h| h.name.as_str()).collect();
        assert_eq!(names, ["X-Trace"]);
    }

    #[test]
    fn canonical_url_uses_scheme_and_host() {
        let req = HttpRequest::parse(GET_REQUEST).unwrap();
        assert_eq!(
            req.canonical_url(Scheme::Http).unwrap().to_string(),
            "http://example.com:8080/foo?bar=1"
        );
        assert_eq!(
            req.canonical_url(Scheme::Https).unwrap().to_string(),
            "https://example.com:8080/foo?bar=1"
        );
    }

    #[test]
    fn absolute_form_target() {
        let req = HttpRequest::parse(b"GET http://proxy.test/a/b HTTP/1.1\r\nHost: ignored\r\n\r\n").unwrap();
        assert_eq!(req.host().as_deref(), Some("proxy.test"));
        assert_eq!(
            req.canonical_url(Scheme::Https).unwrap().to_string(),
            "https://proxy.test/a/b"
        );
    }

    #[test]
    fn missing_host() {
        let req = HttpRequest::parse(b"GET / HTTP/1.0\r\n\r\n").unwrap();
        assert!(matches!(
            req.canonical_url(Scheme::Http),
            Err(HttpParseErr::MissingHost(_))
        ));
    }

    #[test]
    fn not_a_request() {
        assert!(HttpRequest::parse(b"HTTP/1.1 200 OK\r\n\r\n").is_err());
        assert!(matches!(
            HttpRequest::parse(b"GET / HTTP/1.1\r\nHost: x\r\n"),
            Err(HttpParseErr::Incomplete)
        ));
        assert!(HttpRequest::parse(b"").is_err());
        assert!(HttpRequest::parse(&[0x16, 0x03, 0x01, 0x02, 0x00, 0x01]).is_err());
    }

    #[test]
    fn parse_response() {
        let resp = HttpResponse::parse(b"HTTP/1.1 404 Not Found\r\nContent-Length: 2\r\n\r\nno").unwrap();
        assert_eq!(resp.status, StatusCode::NOT_FOUND);
        assert_eq!(resp.header("Content-Length"), Some(&b"2"[..]));
        assert_eq!(resp.body, b"no");
    }

    #[test]
    fn message_picks_side() {
        assert!(matches!(
            HttpMessage::parse(GET_REQUEST).unwrap(),
            HttpMessage::Request(_)
        ));
        assert!(matches!(
            HttpMessage::parse(b"HTTP/1.1 200 OK\r\n\r\n").unwrap(),
            HttpMessage::Response(ref r) if r.status == StatusCode::OK
        ));
        assert!(HttpMessage::parse(b"\x00\x01garbage").is_err());
    }
}
