//! Request routing: map HTTP methods and URL path templates to handlers.
//!
//! A template is split on `/` into segments. A segment written `:name` captures
//! any non-empty run of characters other than `/`; every other segment must
//! match literally and case-sensitively. Matching is anchored at both ends:
//!
//! | Template         | Path              | Result                 |
//! |------------------|-------------------|------------------------|
//! | `/items/:id`     | `/items/42`       | `id → "42"`            |
//! | `/items/:id`     | `/items/42/extra` | no match               |
//! | `/items/:id`     | `/items`          | no match               |
//! | `/v1.0/status`   | `/v1x0/status`    | no match (`.` is literal) |
//!
//! Routes are matched in registration order; the first route whose method and
//! template both match wins. A `HEAD` request with no `HEAD` route falls back to
//! the `GET` route for the same path.

use std::collections::HashSet;

use thiserror::Error;

use crate::http::Method;
use crate::middleware::MiddlewareHandler;

/// Errors raised when a path template cannot be compiled.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RouteError {
    #[error("empty parameter name in route template {template:?}")]
    EmptyParameterName { template: String },

    #[error("parameter {name:?} appears more than once in route template {template:?}")]
    DuplicateParameter { template: String, name: String },
}

/// Path parameters captured by a matched route, in template order.
///
/// # Examples
///
/// ```
/// use spindle::router::PathParams;
///
/// let mut params = PathParams::new();
/// params.insert("user", "7");
/// params.insert("post", "99");
/// assert_eq!(params.get("post"), Some("99"));
/// assert_eq!(params.get_index(0), Some("7"));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathParams {
    entries: Vec<(String, String)>,
}

impl PathParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.entries.push((name.into(), value.into()));
    }

    /// Returns the value captured for `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Returns the value captured at `index`, counting parameters left to right.
    pub fn get_index(&self, index: usize) -> Option<&str> {
        self.entries.get(index).map(|(_, v)| v.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

// A single template segment.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Param(String),
}

/// A compiled, anchored path template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pattern {
    segments: Vec<Segment>,
}

impl Pattern {
    /// Compiles `template` into a segment matcher.
    ///
    /// # Errors
    ///
    /// - [`RouteError::EmptyParameterName`]: a segment is a bare `:`.
    /// - [`RouteError::DuplicateParameter`]: two segments capture the same name.
    pub fn compile(template: &str) -> Result<Self, RouteError> {
        let mut seen = HashSet::new();
        let mut segments = Vec::new();
        for raw in template.split('/') {
            let segment = match raw.strip_prefix(':') {
                Some("") => {
                    return Err(RouteError::EmptyParameterName {
                        template: template.to_owned(),
                    });
                }
                Some(name) => {
                    if !seen.insert(name) {
                        return Err(RouteError::DuplicateParameter {
                            template: template.to_owned(),
                            name: name.to_owned(),
                        });
                    }
                    Segment::Param(name.to_owned())
                }
                None => Segment::Literal(raw.to_owned()),
            };
            segments.push(segment);
        }
        Ok(Self { segments })
    }

    /// Names of the captured parameters, in template order.
    pub fn param_names(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().filter_map(|s| match s {
            Segment::Param(name) => Some(name.as_str()),
            Segment::Literal(_) => None,
        })
    }

    /// Matches the whole of `path`, returning the captured parameters.
    pub fn matches(&self, path: &str) -> Option<PathParams> {
        let mut params = PathParams::new();
        let mut parts = path.split('/');

        for segment in &self.segments {
            let part = parts.next()?;
            match segment {
                Segment::Literal(literal) if literal == part => {}
                Segment::Literal(_) => return None,
                Segment::Param(_) if part.is_empty() => return None,
                Segment::Param(name) => params.insert(name.as_str(), part),
            }
        }

        // Extra trailing segments never match a shorter template.
        match parts.next() {
            Some(_) => None,
            None => Some(params),
        }
    }
}

/// A registered (method, template, handler) triple.
pub struct Route {
    method: Method,
    template: String,
    pattern: Pattern,
    handler: MiddlewareHandler,
}

impl Route {
    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn template(&self) -> &str {
        &self.template
    }

    pub fn pattern(&self) -> &Pattern {
        &self.pattern
    }

    pub fn handler(&self) -> &MiddlewareHandler {
        &self.handler
    }
}

impl std::fmt::Debug for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Route")
            .field("method", &self.method)
            .field("template", &self.template)
            .finish_non_exhaustive()
    }
}

/// The outcome of a successful [`Router::resolve`].
#[derive(Debug)]
pub struct Resolution<'a> {
    pub route: &'a Route,
    pub params: PathParams,
    /// `true` when a `HEAD` request was served by the `GET` route.
    pub head_fallback: bool,
}

/// Ordered route table.
///
/// # Examples
///
/// ```
/// use spindle::http::Method;
/// use spindle::router::Router;
///
/// let mut router = Router::new();
/// router
///     .register(Method::Get, "/users/:id", spindle::middleware::handler(|req, res, _next| {
///         res.send(req.param("id").unwrap_or_default().to_owned());
///         Ok(())
///     }))
///     .unwrap();
///
/// let found = router.resolve(&Method::Get, "/users/42").unwrap();
/// assert_eq!(found.params.get("id"), Some("42"));
/// assert!(router.resolve(&Method::Get, "/users/42/extra").is_none());
/// ```
#[derive(Debug, Default)]
pub struct Router {
    routes: Vec<Route>,
}

impl Router {
    /// Create a new, empty `Router` with no registered routes.
    pub fn new() -> Self {
        Self { routes: Vec::new() }
    }

    /// Compiles `template` and appends the route.
    ///
    /// # Errors
    ///
    /// Returns a [`RouteError`] if the template is invalid; the table is left
    /// unchanged.
    pub fn register(
        &mut self,
        method: Method,
        template: &str,
        handler: MiddlewareHandler,
    ) -> Result<(), RouteError> {
        let pattern = Pattern::compile(template)?;
        self.routes.push(Route {
            method,
            template: template.to_owned(),
            pattern,
            handler,
        });
        Ok(())
    }

    /// Finds the first route matching `method` and `path`.
    ///
    /// A `HEAD` request with no `HEAD` route is retried as `GET`.
    pub fn resolve(&self, method: &Method, path: &str) -> Option<Resolution<'_>> {
        if let Some((route, params)) = self.find(method, path) {
            return Some(Resolution {
                route,
                params,
                head_fallback: false,
            });
        }

        if *method == Method::Head {
            return self.find(&Method::Get, path).map(|(route, params)| Resolution {
                route,
                params,
                head_fallback: true,
            });
        }

        None
    }

    fn find(&self, method: &Method, path: &str) -> Option<(&Route, PathParams)> {
        self.routes
            .iter()
            .filter(|route| &route.method == method)
            .find_map(|route| route.pattern.matches(path).map(|params| (route, params)))
    }

    /// Return the number of routes registered in this router.
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Return `true` if no routes have been registered.
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    // Drops routes registered after `len`; used to undo a failed plugin.
    pub(crate) fn truncate(&mut self, len: usize) {
        self.routes.truncate(len);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::handler;

    fn noop() -> MiddlewareHandler {
        handler(|_req, _res, _next| Ok(()))
    }

    fn router_with(routes: &[(Method, &str)]) -> Router {
        let mut router = Router::new();
        for (method, template) in routes {
            router.register(method.clone(), template, noop()).unwrap();
        }
        router
    }

    // ── Pattern ──────────────────────────────────────────────────────────────

    #[test]
    fn pattern_param_names_in_order() {
        let pat = Pattern::compile("/users/:id/posts/:post_id").unwrap();
        assert_eq!(pat.param_names().collect::<Vec<_>>(), vec!["id", "post_id"]);
    }

    #[test]
    fn pattern_extracts_positionally_and_by_name() {
        let pat = Pattern::compile("/users/:id/posts/:post_id").unwrap();
        let params = pat.matches("/users/7/posts/99").unwrap();
        assert_eq!(params.get("id"), Some("7"));
        assert_eq!(params.get("post_id"), Some("99"));
        assert_eq!(params.get_index(0), Some("7"));
        assert_eq!(params.get_index(1), Some("99"));
    }

    #[test]
    fn pattern_is_anchored() {
        let pat = Pattern::compile("/items/:id").unwrap();
        assert!(pat.matches("/items/1").is_some());
        assert!(pat.matches("/items/1/extra").is_none());
        assert!(pat.matches("/items").is_none());
        assert!(pat.matches("/items/").is_none());
        assert!(pat.matches("/prefix/items/1").is_none());
    }

    #[test]
    fn pattern_trailing_slash_is_significant() {
        let pat = Pattern::compile("/users").unwrap();
        assert!(pat.matches("/users").is_some());
        assert!(pat.matches("/users/").is_none());
    }

    #[test]
    fn pattern_literals_are_exact() {
        let pat = Pattern::compile("/v1.0/a+b").unwrap();
        assert!(pat.matches("/v1.0/a+b").is_some());
        assert!(pat.matches("/v1x0/a+b").is_none());
        assert!(pat.matches("/v1.0/aab").is_none());
    }

    #[test]
    fn pattern_literals_are_case_sensitive() {
        let pat = Pattern::compile("/Users").unwrap();
        assert!(pat.matches("/users").is_none());
    }

    #[test]
    fn pattern_root() {
        let pat = Pattern::compile("/").unwrap();
        assert!(pat.matches("/").is_some());
        assert!(pat.matches("/other").is_none());
    }

    #[test]
    fn pattern_rejects_duplicate_names() {
        let err = Pattern::compile("/a/:id/b/:id").unwrap_err();
        assert!(matches!(err, RouteError::DuplicateParameter { name, .. } if name == "id"));
    }

    #[test]
    fn pattern_rejects_empty_name() {
        assert!(matches!(
            Pattern::compile("/a/:"),
            Err(RouteError::EmptyParameterName { .. })
        ));
    }

    // ── Router ───────────────────────────────────────────────────────────────

    #[test]
    fn router_starts_empty() {
        let router = Router::new();
        assert!(router.is_empty());
        assert!(router.resolve(&Method::Get, "/").is_none());
    }

    #[test]
    fn router_method_must_match() {
        let router = router_with(&[(Method::Get, "/hello")]);
        assert!(router.resolve(&Method::Get, "/hello").is_some());
        assert!(router.resolve(&Method::Post, "/hello").is_none());
    }

    #[test]
    fn router_first_registered_wins() {
        let router = router_with(&[(Method::Get, "/items/:id"), (Method::Get, "/items/new")]);
        let found = router.resolve(&Method::Get, "/items/new").unwrap();
        assert_eq!(found.route.template(), "/items/:id");
        assert_eq!(found.params.get("id"), Some("new"));
    }

    #[test]
    fn router_head_falls_back_to_get() {
        let router = router_with(&[(Method::Get, "/page")]);
        let found = router.resolve(&Method::Head, "/page").unwrap();
        assert!(found.head_fallback);
        assert_eq!(found.route.method(), &Method::Get);
    }

    #[test]
    fn router_explicit_head_route_preferred() {
        let router = router_with(&[(Method::Get, "/page"), (Method::Head, "/page")]);
        let found = router.resolve(&Method::Head, "/page").unwrap();
        assert!(!found.head_fallback);
    }

    #[test]
    fn router_no_fallback_for_other_methods() {
        let router = router_with(&[(Method::Get, "/page")]);
        assert!(router.resolve(&Method::Options, "/page").is_none());
    }

    #[test]
    fn router_truncate_drops_later_routes() {
        let mut router = router_with(&[(Method::Get, "/a"), (Method::Get, "/b")]);
        router.truncate(1);
        assert_eq!(router.len(), 1);
        assert!(router.resolve(&Method::Get, "/b").is_none());
    }
}
