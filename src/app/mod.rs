//! Application setup and the frozen request pipeline.
//!
//! [`App`] is the registration surface used by setup code and plugins. Once
//! setup is done it is frozen into a [`Pipeline`]: an immutable route table,
//! global middleware list and configuration shared by every connection.
//! Handling a request is a function of the pipeline and the request alone.

use std::net::SocketAddr;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, error, warn};

use crate::assets;
use crate::config::ServerConfig;
use crate::http::{Frame, Method, Request, Response, StatusCode};
use crate::middleware::{
    self, HandlerResult, MiddlewareHandler, Next, handler, not_found, panic_message,
};
use crate::plugin::Plugin;
use crate::router::Router;
use crate::server::{Server, ServerError};

/// Registration API for routes, middleware and plugins.
///
/// # Examples
///
/// ```rust,no_run
/// use spindle::App;
///
/// #[tokio::main]
/// async fn main() -> Result<(), spindle::ServerError> {
///     let mut app = App::new();
///     app.get("/items/:id", |req, res, _next| {
///         res.json(req.param("id").unwrap_or_default())?;
///         Ok(())
///     });
///     app.listen("127.0.0.1:8080").await
/// }
/// ```
#[derive(Default)]
pub struct App {
    config: ServerConfig,
    router: Router,
    middlewares: Vec<MiddlewareHandler>,
}

impl App {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: ServerConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    /// Number of global middlewares registered so far.
    pub fn middleware_count(&self) -> usize {
        self.middlewares.len()
    }

    /// Appends a global middleware. Global middlewares run in registration
    /// order, before the route handler.
    pub fn use_middleware<F>(&mut self, f: F) -> &mut Self
    where
        F: Fn(&mut Request, &mut Response, Next<'_>) -> HandlerResult + Send + Sync + 'static,
    {
        self.use_handler(handler(f))
    }

    /// Appends an already type-erased global middleware.
    pub fn use_handler(&mut self, middleware: MiddlewareHandler) -> &mut Self {
        self.middlewares.push(middleware);
        self
    }

    /// Registers a route for `method` and `path`.
    ///
    /// # Panics
    ///
    /// Panics if `path` is not a valid template (a bare `:` segment, or the
    /// same parameter name twice).
    pub fn route<F>(&mut self, method: impl Into<Method>, path: &str, f: F) -> &mut Self
    where
        F: Fn(&mut Request, &mut Response, Next<'_>) -> HandlerResult + Send + Sync + 'static,
    {
        self.route_handler(method, path, handler(f))
    }

    /// Registers a type-erased route handler.
    ///
    /// # Panics
    ///
    /// See [`route`](Self::route).
    pub fn route_handler(
        &mut self,
        method: impl Into<Method>,
        path: &str,
        route_handler: MiddlewareHandler,
    ) -> &mut Self {
        if let Err(e) = self.router.register(method.into(), path, route_handler) {
            panic!("invalid route: {e}");
        }
        self
    }

    pub fn get<F>(&mut self, path: &str, f: F) -> &mut Self
    where
        F: Fn(&mut Request, &mut Response, Next<'_>) -> HandlerResult + Send + Sync + 'static,
    {
        self.route(Method::Get, path, f)
    }

    pub fn post<F>(&mut self, path: &str, f: F) -> &mut Self
    where
        F: Fn(&mut Request, &mut Response, Next<'_>) -> HandlerResult + Send + Sync + 'static,
    {
        self.route(Method::Post, path, f)
    }

    pub fn put<F>(&mut self, path: &str, f: F) -> &mut Self
    where
        F: Fn(&mut Request, &mut Response, Next<'_>) -> HandlerResult + Send + Sync + 'static,
    {
        self.route(Method::Put, path, f)
    }

    pub fn delete<F>(&mut self, path: &str, f: F) -> &mut Self
    where
        F: Fn(&mut Request, &mut Response, Next<'_>) -> HandlerResult + Send + Sync + 'static,
    {
        self.route(Method::Delete, path, f)
    }

    pub fn patch<F>(&mut self, path: &str, f: F) -> &mut Self
    where
        F: Fn(&mut Request, &mut Response, Next<'_>) -> HandlerResult + Send + Sync + 'static,
    {
        self.route(Method::Patch, path, f)
    }

    /// Serves files from `dir` as a global middleware.
    pub fn static_files(&mut self, dir: impl Into<PathBuf>) -> &mut Self {
        self.use_handler(assets::serve_dir(dir))
    }

    /// Installs a plugin inside its own failure boundary.
    pub fn add_plugin(&mut self, plugin: impl Plugin) -> &mut Self {
        self.install(&plugin);
        self
    }

    /// Installs plugins in order. A failing plugin does not stop the rest.
    pub fn add_plugins<I>(&mut self, plugins: I) -> &mut Self
    where
        I: IntoIterator<Item = Box<dyn Plugin>>,
    {
        for plugin in plugins {
            self.install(plugin.as_ref());
        }
        self
    }

    fn install(&mut self, plugin: &dyn Plugin) {
        let name = plugin.name().to_owned();
        let (routes, middlewares) = (self.router.len(), self.middlewares.len());

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| plugin.install(self)));
        let failure = match outcome {
            Ok(Ok(())) => {
                debug!(plugin = %name, "plugin installed");
                return;
            }
            Ok(Err(e)) => e.to_string(),
            Err(payload) => panic_message(payload.as_ref()),
        };

        self.router.truncate(routes);
        self.middlewares.truncate(middlewares);
        error!(
            plugin = %name,
            error = %failure,
            "plugin failed to load; its registrations were discarded"
        );
    }

    /// Ends setup and produces the shared, read-only pipeline.
    pub fn freeze(self) -> Arc<Pipeline> {
        let views_dir = Arc::new(self.config.views_dir.clone());
        Arc::new(Pipeline {
            config: self.config,
            router: self.router,
            middlewares: self.middlewares,
            not_found: not_found(),
            views_dir,
        })
    }

    /// Binds `addr` and serves until the process ends.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Bind`] when the address cannot be bound.
    pub async fn listen(self, addr: impl AsRef<str>) -> Result<(), ServerError> {
        Server::bind(addr, self).await?.run().await
    }
}

/// The immutable request-handling configuration built by [`App::freeze`].
pub struct Pipeline {
    config: ServerConfig,
    router: Router,
    middlewares: Vec<MiddlewareHandler>,
    not_found: MiddlewareHandler,
    views_dir: Arc<PathBuf>,
}

impl Pipeline {
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    /// Parses `frame` and dispatches it.
    ///
    /// A malformed request line is answered with `400 Bad Request` without
    /// routing or running any middleware.
    pub fn handle_frame(&self, frame: Frame, peer: Option<SocketAddr>) -> Response {
        match Request::parse(frame, peer) {
            Ok(request) => self.dispatch(request),
            Err(e) => {
                warn!(peer = ?peer, error = %e, "bad request");
                Response::from_status(StatusCode::BadRequest)
            }
        }
    }

    /// Routes `request` and runs the global middlewares followed by the
    /// matched handler, or the `404` handler when nothing matched.
    pub fn dispatch(&self, mut request: Request) -> Response {
        let mut response = Response::new()
            .suppress_body(*request.method() == Method::Head)
            .views_dir(Arc::clone(&self.views_dir));

        let terminal = match self.router.resolve(request.method(), request.path()) {
            Some(found) => {
                if found.head_fallback {
                    debug!(path = %request.path(), "HEAD served by GET route");
                }
                let terminal = Arc::clone(found.route.handler());
                request.set_params(found.params);
                terminal
            }
            None => Arc::clone(&self.not_found),
        };

        let mut chain = Vec::with_capacity(self.middlewares.len() + 1);
        chain.extend(self.middlewares.iter().cloned());
        chain.push(terminal);

        middleware::execute(&chain, &mut request, &mut response);
        response
    }
}
