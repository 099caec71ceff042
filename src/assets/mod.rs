//! Static file serving.
//!
//! [`serve_dir`] builds a middleware that answers `GET`/`HEAD` requests with
//! files below a root directory and hands every other request to the rest of
//! the chain.

use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use tracing::debug;

use crate::http::Method;
use crate::middleware::{MiddlewareHandler, handler};

/// Returns the content type for `path` based on its extension.
///
/// Unknown extensions map to `application/octet-stream`.
///
/// ```
/// use spindle::assets::content_type_for;
///
/// assert_eq!(content_type_for("site/app.css"), "text/css");
/// assert_eq!(content_type_for("blob.unknownext"), "application/octet-stream");
/// ```
pub fn content_type_for(path: impl AsRef<Path>) -> String {
    mime_guess::from_path(path)
        .first_or_octet_stream()
        .to_string()
}

/// Middleware serving files from `root`.
///
/// `/` and directory paths serve their `index.html`. Paths that climb out of
/// the root are refused, and missing files fall through to `next`.
pub fn serve_dir(root: impl Into<PathBuf>) -> MiddlewareHandler {
    let root = root.into();
    handler(move |req, res, next| {
        if !matches!(req.method(), Method::Get | Method::Head) {
            next.run(req, res);
            return Ok(());
        }

        let Some(path) = resolve_file(&root, req.path()) else {
            next.run(req, res);
            return Ok(());
        };

        match fs::read(&path) {
            Ok(contents) => {
                debug!(file = %path.display(), "serving static file");
                res.set_header("Content-Type", content_type_for(&path));
                res.send(contents);
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                next.run(req, res);
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    })
}

fn resolve_file(root: &Path, url_path: &str) -> Option<PathBuf> {
    let relative = Path::new(url_path.trim_start_matches('/'));
    if relative
        .components()
        .any(|c| !matches!(c, Component::Normal(_)))
    {
        return None;
    }

    let mut candidate = root.join(relative);
    if candidate.is_dir() {
        candidate.push("index.html");
    }
    candidate.is_file().then_some(candidate)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::{Request, Response};
    use crate::middleware::execute;

    fn serve(root: &Path, raw: &str) -> Response {
        let chain = vec![
            serve_dir(root),
            handler(|_req, res, _next| {
                res.status(404u16).send("fallthrough");
                Ok(())
            }),
        ];
        let mut req = Request::from_raw(raw.as_bytes()).unwrap();
        let mut res = Response::new();
        execute(&chain, &mut req, &mut res);
        res
    }

    #[test]
    fn serves_existing_file_with_mime() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("style.css"), "body{}").unwrap();
        let res = serve(dir.path(), "GET /style.css HTTP/1.1\r\n\r\n");
        assert_eq!(res.status_code(), 200);
        assert_eq!(res.header("content-type"), Some("text/css"));
        assert_eq!(&res.body()[..], b"body{}");
    }

    #[test]
    fn root_serves_index() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("index.html"), "<p>home</p>").unwrap();
        let res = serve(dir.path(), "GET / HTTP/1.1\r\n\r\n");
        assert_eq!(&res.body()[..], b"<p>home</p>");
    }

    #[test]
    fn missing_file_falls_through() {
        let dir = tempfile::tempdir().unwrap();
        let res = serve(dir.path(), "GET /nope.txt HTTP/1.1\r\n\r\n");
        assert_eq!(&res.body()[..], b"fallthrough");
    }

    #[test]
    fn traversal_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let inner = dir.path().join("public");
        fs::create_dir(&inner).unwrap();
        fs::write(dir.path().join("secret.txt"), "s3cret").unwrap();
        let res = serve(&inner, "GET /../secret.txt HTTP/1.1\r\n\r\n");
        assert_eq!(&res.body()[..], b"fallthrough");
    }

    #[test]
    fn post_is_not_served() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), "a").unwrap();
        let res = serve(dir.path(), "POST /a.txt HTTP/1.1\r\n\r\n");
        assert_eq!(&res.body()[..], b"fallthrough");
    }
}
