//! HTTP/1.1 response writer.
//!
//! Handler code mutates status and headers on a [`Response`], then calls
//! [`Response::send`] exactly once. `send` serializes the message to its wire
//! form; the connection writes those bytes and closes. Later sends are ignored.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use bytes::{BufMut, Bytes, BytesMut};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{error, warn};

use super::{Headers, StatusCode, reason_phrase};
use crate::{assets, view};

/// Errors produced by the response helpers.
#[derive(Debug, Error)]
pub enum ResponseError {
    #[error("failed to serialize JSON response: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// An HTTP/1.1 response under construction.
///
/// # Examples
///
/// ```
/// use spindle::http::{Response, StatusCode};
///
/// let mut response = Response::new();
/// response
///     .status(StatusCode::Created)
///     .set_header("Content-Type", "application/json")
///     .send(r#"{"status":"ok"}"#);
///
/// let wire = std::str::from_utf8(response.wire().unwrap()).unwrap();
/// assert!(wire.starts_with("HTTP/1.1 201 Created\r\n"));
/// assert!(wire.contains("Content-Length: 15\r\n"));
/// assert!(wire.contains("Connection: close\r\n"));
/// ```
#[derive(Debug, Clone)]
pub struct Response {
    status: u16,
    headers: Headers,
    body: Bytes,
    suppress_body: bool,
    views_dir: Option<Arc<PathBuf>>,
    wire: Option<Bytes>,
}

impl Response {
    /// Creates an unsent `200` response with no headers.
    pub fn new() -> Self {
        Self {
            status: StatusCode::Ok.as_u16(),
            headers: Headers::new(),
            body: Bytes::new(),
            suppress_body: false,
            views_dir: None,
            wire: None,
        }
    }

    /// A response whose payload is computed but never written (`HEAD`).
    #[must_use]
    pub fn suppress_body(mut self, suppress: bool) -> Self {
        self.suppress_body = suppress;
        self
    }

    /// Sets the directory [`render`](Self::render) looks up views in.
    #[must_use]
    pub fn views_dir(mut self, dir: Arc<PathBuf>) -> Self {
        self.views_dir = Some(dir);
        self
    }

    /// Builds an already-sent response whose body is the status reason phrase.
    pub fn from_status(status: StatusCode) -> Self {
        let mut response = Self::new();
        response.status(status).send(status.canonical_reason());
        response
    }

    /// Sets the status code. Any numeric code is accepted.
    pub fn status(&mut self, code: impl Into<u16>) -> &mut Self {
        self.status = code.into();
        self
    }

    /// Sets a header, replacing any previous value for the same name.
    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.headers.insert(name, value);
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    pub fn status_code(&self) -> u16 {
        self.status
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// The body passed to [`send`](Self::send), even when it is not written.
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn is_sent(&self) -> bool {
        self.wire.is_some()
    }

    /// The serialized message, once sent.
    pub fn wire(&self) -> Option<&Bytes> {
        self.wire.as_ref()
    }

    pub(crate) fn take_wire(&mut self) -> Option<Bytes> {
        self.wire.take()
    }

    /// Finalizes the response with `body`.
    ///
    /// Adds:
    /// - `Content-Type: text/plain; charset=utf-8` if the body is non-empty and no
    ///   `Content-Type` header was set.
    /// - `Content-Length: <n>`, always recomputed from `body`.
    /// - `Connection: close`.
    ///
    /// Only the first call has any effect.
    pub fn send(&mut self, body: impl Into<Bytes>) {
        if self.is_sent() {
            warn!(status = self.status, "response already sent; ignoring send");
            return;
        }

        let body = body.into();
        if !body.is_empty() && !self.headers.contains("content-type") {
            self.headers
                .insert("Content-Type", "text/plain; charset=utf-8");
        }
        self.headers.insert("Content-Length", body.len().to_string());
        self.headers.insert("Connection", "close");

        let estimated_size = 128 + self.headers.len() * 64 + body.len();
        let mut buf = BytesMut::with_capacity(estimated_size);

        // Status line
        buf.put(format!("HTTP/1.1 {} {}\r\n", self.status, reason_phrase(self.status)).as_bytes());

        // Headers
        buf.put(self.headers.to_string().as_bytes());

        // Header/body separator
        buf.put(&b"\r\n"[..]);

        if !self.suppress_body {
            buf.put(body.as_ref());
        }

        self.body = body;
        self.wire = Some(buf.freeze());
    }

    /// Serializes `data` as JSON and sends it with `Content-Type: application/json`.
    ///
    /// # Errors
    ///
    /// Returns [`ResponseError::Serialize`] if `data` cannot be serialized;
    /// nothing is sent in that case.
    pub fn json<T: Serialize + ?Sized>(&mut self, data: &T) -> Result<(), ResponseError> {
        let payload = serde_json::to_vec(data)?;
        self.set_header("Content-Type", "application/json");
        self.send(payload);
        Ok(())
    }

    /// Renders the named view with `data` and sends it.
    ///
    /// The view is looked up in the configured views directory, trying each of
    /// [`view::VIEW_EXTENSIONS`] in order. Sends `404` when no file exists and
    /// `500` when it cannot be read.
    pub fn render(&mut self, name: &str, data: &Value) {
        let dir = self
            .views_dir
            .clone()
            .unwrap_or_else(|| Arc::new(PathBuf::from(view::DEFAULT_VIEWS_DIR)));

        let Some(path) = view::resolve(&dir, name) else {
            self.status(StatusCode::NotFound).send("Not Found");
            return;
        };

        match fs::read_to_string(&path) {
            Ok(template) => {
                self.set_header("Content-Type", assets::content_type_for(&path));
                self.send(view::render_template(&template, data));
            }
            Err(e) => {
                error!(view = %path.display(), error = %e, "failed to read view");
                self.fail();
            }
        }
    }

    /// Sends the fixed `500` response unless something was already sent.
    pub(crate) fn fail(&mut self) {
        if self.is_sent() {
            return;
        }
        self.headers.remove("content-type");
        self.status(StatusCode::InternalServerError)
            .send("Internal Server Error");
    }
}

impl Default for Response {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn wire(r: &Response) -> String {
        String::from_utf8(r.wire().unwrap().to_vec()).unwrap()
    }

    #[test]
    fn simple_ok_response() {
        let mut r = Response::new();
        r.send("Hello");
        let s = wire(&r);
        assert!(s.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(s.contains("Content-Length: 5\r\n"));
        assert!(s.contains("Connection: close\r\n"));
        assert!(s.ends_with("\r\n\r\nHello"));
    }

    #[test]
    fn caller_content_length_is_overridden() {
        let mut r = Response::new();
        r.set_header("content-length", "999").set_header("Connection", "keep-alive");
        r.send("abc");
        let s = wire(&r);
        assert!(s.contains("content-length: 3\r\n"));
        assert!(!s.contains("999"));
        assert!(s.contains("Connection: close\r\n"));
    }

    #[test]
    fn no_body_no_content_type() {
        let mut r = Response::new();
        r.status(StatusCode::NoContent).send(Bytes::new());
        let s = wire(&r);
        assert!(!s.contains("Content-Type"));
        assert!(s.contains("Content-Length: 0\r\n"));
    }

    #[test]
    fn unknown_status_reason() {
        let mut r = Response::new();
        r.status(302u16).send("moved");
        assert!(wire(&r).starts_with("HTTP/1.1 302 Unknown Status\r\n"));
    }

    #[test]
    fn suppressed_body_keeps_length() {
        let mut r = Response::new().suppress_body(true);
        r.send("Hello");
        let s = wire(&r);
        assert!(s.contains("Content-Length: 5\r\n"));
        assert!(s.ends_with("\r\n\r\n"));
        assert_eq!(&r.body()[..], b"Hello");
    }

    #[test]
    fn second_send_is_ignored() {
        let mut r = Response::new();
        r.send("first");
        r.status(StatusCode::BadRequest).send("second");
        let s = wire(&r);
        assert!(s.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(s.ends_with("first"));
    }

    #[test]
    fn json_sets_content_type() {
        let mut r = Response::new();
        r.json(&json!({"id": "42"})).unwrap();
        assert_eq!(r.header("content-type"), Some("application/json"));
        assert_eq!(&r.body()[..], br#"{"id":"42"}"#);
    }

    #[test]
    fn fail_after_send_is_ignored() {
        let mut r = Response::new();
        r.send("fine");
        r.fail();
        assert_eq!(r.status_code(), 200);
    }

    #[test]
    fn from_status_uses_reason_as_body() {
        let r = Response::from_status(StatusCode::BadRequest);
        assert!(wire(&r).starts_with("HTTP/1.1 400 Bad Request\r\n"));
        assert_eq!(&r.body()[..], b"Bad Request");
    }

    #[test]
    fn render_missing_view_is_404() {
        let dir = tempfile::tempdir().unwrap();
        let mut r = Response::new().views_dir(Arc::new(dir.path().to_path_buf()));
        r.render("absent", &json!({}));
        assert_eq!(r.status_code(), 404);
    }

    #[test]
    fn render_substitutes_data() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("hello.html"), "<h1>Hi {{ name }}</h1>").unwrap();
        let mut r = Response::new().views_dir(Arc::new(dir.path().to_path_buf()));
        r.render("hello", &json!({"name": "Ada"}));
        assert_eq!(r.status_code(), 200);
        assert_eq!(&r.body()[..], b"<h1>Hi Ada</h1>");
        assert_eq!(r.header("content-type"), Some("text/html"));
    }
}
