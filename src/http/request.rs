//! HTTP/1.1 request parsing.
//!
//! Turns a [`Frame`] into a structured [`Request`]: request line, lower-cased
//! headers, decoded path, query map and a body parsed according to its
//! `Content-Type`.

use std::collections::HashMap;
use std::net::SocketAddr;

use bytes::Bytes;
use serde_json::Value;
use thiserror::Error;

use super::{Frame, Headers, Method};
use crate::router::PathParams;

/// Errors that can occur while parsing a framed request.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("malformed request line: {line:?}")]
    MalformedRequestLine { line: String },
}

/// The value(s) collected for one query or form key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryValue {
    Single(String),
    /// Every occurrence of a repeated key, in order of appearance.
    Multi(Vec<String>),
}

impl QueryValue {
    /// Returns the value when the key appeared exactly once.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Single(v) => Some(v),
            Self::Multi(_) => None,
        }
    }

    /// Returns all values for the key in order of appearance.
    pub fn values(&self) -> &[String] {
        match self {
            Self::Single(v) => std::slice::from_ref(v),
            Self::Multi(vs) => vs,
        }
    }

    fn push(&mut self, value: String) {
        match self {
            Self::Single(first) => {
                let first = std::mem::take(first);
                *self = Self::Multi(vec![first, value]);
            }
            Self::Multi(vs) => vs.push(value),
        }
    }
}

/// Decoded `key=value` pairs from a query string or urlencoded form body.
///
/// # Examples
///
/// ```
/// use spindle::http::{Query, QueryValue};
///
/// let q = Query::parse("a=1&a=2&b=hello+world");
/// assert_eq!(q.get("a"), Some(&QueryValue::Multi(vec!["1".into(), "2".into()])));
/// assert_eq!(q.first("b"), Some("hello world"));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Query {
    map: HashMap<String, QueryValue>,
}

impl Query {
    /// Parses `input` (without the leading `?`).
    ///
    /// `+` is read as a space and components are percent-decoded. Pairs that
    /// fail to decode, or that have an empty key, are dropped.
    pub fn parse(input: &str) -> Self {
        let mut map: HashMap<String, QueryValue> = HashMap::new();
        for pair in input.split('&').filter(|p| !p.is_empty()) {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            let (Some(key), Some(value)) = (decode_component(key), decode_component(value))
            else {
                continue;
            };
            if key.is_empty() {
                continue;
            }
            match map.get_mut(&key) {
                Some(existing) => existing.push(value),
                None => {
                    map.insert(key, QueryValue::Single(value));
                }
            }
        }
        Self { map }
    }

    pub fn get(&self, key: &str) -> Option<&QueryValue> {
        self.map.get(key)
    }

    /// Returns the first value recorded for `key`.
    pub fn first(&self, key: &str) -> Option<&str> {
        self.map
            .get(key)
            .and_then(|v| v.values().first())
            .map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &QueryValue)> {
        self.map.iter().map(|(k, v)| (k.as_str(), v))
    }
}

fn decode_component(raw: &str) -> Option<String> {
    let spaced = raw.replace('+', " ");
    urlencoding::decode(&spaced).ok().map(|s| s.into_owned())
}

/// A request body, parsed according to the request's `Content-Type`.
#[derive(Debug, Clone, PartialEq)]
pub enum Body {
    /// `application/json`. Invalid JSON is [`Value::Null`].
    Json(Value),
    /// `application/x-www-form-urlencoded`.
    Form(Query),
    /// Any other (or absent) content type, passed through unchanged.
    Raw(Bytes),
}

impl Body {
    pub fn as_json(&self) -> Option<&Value> {
        match self {
            Self::Json(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_form(&self) -> Option<&Query> {
        match self {
            Self::Form(q) => Some(q),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            Self::Raw(b) => Some(b),
            _ => None,
        }
    }

    /// Returns a raw body as text when it is valid UTF-8.
    pub fn as_text(&self) -> Option<&str> {
        self.as_bytes().and_then(|b| std::str::from_utf8(b).ok())
    }

    /// `true` for a JSON body that is `null`, including one that failed to parse.
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Json(Value::Null))
    }
}

impl Default for Body {
    fn default() -> Self {
        Self::Raw(Bytes::new())
    }
}

/// A fully parsed HTTP/1.1 request.
///
/// Created once per connection by [`Request::parse`]. Target and headers are
/// fixed after parsing; path parameters are filled in by routing.
///
/// # Examples
///
/// ```
/// use spindle::http::Request;
///
/// let raw = b"GET /hello%20there?name=world HTTP/1.1\r\nHost: localhost\r\n\r\n";
/// let request = Request::from_raw(raw).unwrap();
///
/// assert_eq!(request.method().as_str(), "GET");
/// assert_eq!(request.path(), "/hello there");
/// assert_eq!(request.query().first("name"), Some("world"));
/// assert_eq!(request.header("HOST"), Some("localhost"));
/// ```
#[derive(Debug, Clone)]
pub struct Request {
    method: Method,
    target: String,
    version: String,
    path: String,
    query_string: Option<String>,
    query: Query,
    headers: Headers,
    raw_body: Bytes,
    body: Body,
    params: PathParams,
    peer_addr: Option<SocketAddr>,
}

impl Request {
    /// Parses a complete frame received from `peer_addr`.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError::MalformedRequestLine`] when the request line does
    /// not carry a method, a target and a protocol version.
    pub fn parse(frame: Frame, peer_addr: Option<SocketAddr>) -> Result<Self, ParseError> {
        let (head, raw_body) = frame.into_parts();
        let head = String::from_utf8_lossy(&head);
        let mut lines = head.split("\r\n");

        let request_line = lines.next().unwrap_or_default();
        let mut tokens = request_line.split(' ');
        let (Some(method), Some(target), Some(version)) =
            (tokens.next(), tokens.next(), tokens.next())
        else {
            return Err(ParseError::MalformedRequestLine {
                line: request_line.to_owned(),
            });
        };
        if method.is_empty() || target.is_empty() {
            return Err(ParseError::MalformedRequestLine {
                line: request_line.to_owned(),
            });
        }

        let mut headers = Headers::new();
        for line in lines {
            if let Some((name, value)) = line.split_once(':') {
                headers.insert(name.trim().to_ascii_lowercase(), value.trim());
            }
        }

        let (raw_path, query_string) = match target.split_once('?') {
            Some((path, query)) => (path, Some(query.to_owned())),
            None => (target, None),
        };
        let path = urlencoding::decode(raw_path)
            .map(|p| p.into_owned())
            .unwrap_or_else(|_| raw_path.to_owned());
        let query = query_string.as_deref().map(Query::parse).unwrap_or_default();
        let body = parse_body(headers.get("content-type"), &raw_body);

        Ok(Self {
            method: method.into(),
            target: target.to_owned(),
            version: version.to_owned(),
            path,
            query_string,
            query,
            headers,
            raw_body,
            body,
            params: PathParams::new(),
            peer_addr,
        })
    }

    /// Parses a raw message without framing; everything after the first blank
    /// line is taken as the body.
    pub fn from_raw(raw: &[u8]) -> Result<Self, ParseError> {
        let frame = match raw.windows(4).position(|w| w == b"\r\n\r\n") {
            Some(end) => Frame::new(raw[..end].to_vec(), raw[end + 4..].to_vec()),
            None => Frame::new(raw.to_vec(), Bytes::new()),
        };
        Self::parse(frame, None)
    }

    /// Returns the HTTP method.
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Returns the request target exactly as received.
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Returns the protocol version token, e.g. `HTTP/1.1`.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Returns the percent-decoded path (without the query string).
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Returns the raw query string (without the leading `?`), if any.
    pub fn query_string(&self) -> Option<&str> {
        self.query_string.as_deref()
    }

    pub fn query(&self) -> &Query {
        &self.query
    }

    /// Returns the request headers. Names are stored lower-cased.
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    /// Returns the parsed body.
    pub fn body(&self) -> &Body {
        &self.body
    }

    /// Returns the body bytes as received.
    pub fn raw_body(&self) -> &Bytes {
        &self.raw_body
    }

    /// Returns the path parameters captured by the matched route.
    pub fn params(&self) -> &PathParams {
        &self.params
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name)
    }

    /// Returns the address of the connected client, when known.
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }

    pub(crate) fn set_params(&mut self, params: PathParams) {
        self.params = params;
    }
}

fn parse_body(content_type: Option<&str>, raw: &Bytes) -> Body {
    let essence = content_type
        .and_then(|ct| ct.split(';').next())
        .map(|ct| ct.trim().to_ascii_lowercase());

    match essence.as_deref() {
        Some("application/json") => Body::Json(serde_json::from_slice(raw).unwrap_or(Value::Null)),
        Some("application/x-www-form-urlencoded") => {
            Body::Form(Query::parse(&String::from_utf8_lossy(raw)))
        }
        _ => Body::Raw(raw.clone()),
    }
}
