//! Middleware pipeline: ordered, explicitly continued request handling.
//!
//! A request runs through the global middlewares in registration order and
//! then through the resolved route handler (or a synthetic `404` handler).
//! Each entry decides whether the chain continues by calling [`Next::run`].
//!
//! ## Core types
//!
//! - [`Middleware`]: trait implemented by all middleware (and by plain closures).
//! - [`Next`]: cursor into the remaining chain; consumed by [`Next::run`].
//! - [`MiddlewareHandler`]: type-erased, cheaply-cloneable middleware.
//! - [`LoggerMiddleware`]: built-in request/response logger.
//!
//! ## Failure containment
//!
//! Every invocation is wrapped individually. An entry that returns `Err` or
//! panics gets a `500 Internal Server Error` sent on its behalf, and nothing
//! after it in the chain runs. An entry that neither continues nor sends leaves
//! the connection without a reply; the server logs this but does not invent a
//! response.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;

use tracing::{error, info};

use crate::http::{Request, Response, StatusCode};

/// Error type user middleware may fail with.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result returned by every middleware and route handler.
pub type HandlerResult = Result<(), HandlerError>;

/// A type-erased, reference-counted middleware.
///
/// Route handlers have the same shape; they usually ignore `next`.
pub type MiddlewareHandler = Arc<dyn Middleware>;

/// The core trait for all middleware.
///
/// Implementors receive the request, the response under construction and a
/// [`Next`] cursor. They may:
///
/// - **Pass through**: call `next.run(req, res)`.
/// - **Short-circuit**: send a response and return without calling `next`.
/// - **Decorate**: set headers or status, then continue.
///
/// Any `Fn(&mut Request, &mut Response, Next<'_>) -> HandlerResult` that is
/// `Send + Sync + 'static` is a middleware.
pub trait Middleware: Send + Sync + 'static {
    fn handle(&self, req: &mut Request, res: &mut Response, next: Next<'_>) -> HandlerResult;
}

impl<F> Middleware for F
where
    F: Fn(&mut Request, &mut Response, Next<'_>) -> HandlerResult + Send + Sync + 'static,
{
    fn handle(&self, req: &mut Request, res: &mut Response, next: Next<'_>) -> HandlerResult {
        (self)(req, res, next)
    }
}

/// Converts a [`Middleware`] implementation into a [`MiddlewareHandler`].
///
/// ```rust
/// use spindle::middleware::{LoggerMiddleware, from_middleware};
///
/// let handler = from_middleware(LoggerMiddleware);
/// ```
pub fn from_middleware<M: Middleware>(middleware: M) -> MiddlewareHandler {
    Arc::new(middleware)
}

/// Erases a closure into a [`MiddlewareHandler`].
///
/// Exists so closure argument types are inferred from the signature.
pub fn handler<F>(f: F) -> MiddlewareHandler
where
    F: Fn(&mut Request, &mut Response, Next<'_>) -> HandlerResult + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Terminal handler used when routing finds nothing.
pub fn not_found() -> MiddlewareHandler {
    handler(|_req, res, _next| {
        res.status(StatusCode::NotFound).send("Not Found");
        Ok(())
    })
}

/// A cursor into the remaining middleware chain for a single request.
///
/// `Next` is consumed by [`run`](Self::run), so a middleware can continue the
/// chain at most once.
pub struct Next<'a> {
    remaining: &'a [MiddlewareHandler],
}

impl<'a> Next<'a> {
    /// Creates a cursor positioned at the start of `chain`.
    pub fn new(chain: &'a [MiddlewareHandler]) -> Self {
        Self { remaining: chain }
    }

    /// Number of entries that have not run yet.
    pub fn remaining(&self) -> usize {
        self.remaining.len()
    }

    /// Invokes the next entry in the chain.
    ///
    /// When the chain is exhausted this does nothing. A failure inside the
    /// invoked entry is contained here: a `500` is sent if no response has gone
    /// out yet, and control returns to the caller normally.
    pub fn run(self, req: &mut Request, res: &mut Response) {
        let Some((current, rest)) = self.remaining.split_first() else {
            return;
        };
        let next = Next { remaining: rest };

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| current.handle(req, res, next)));
        let failure = match outcome {
            Ok(Ok(())) => return,
            Ok(Err(e)) => e.to_string(),
            Err(payload) => panic_message(payload.as_ref()),
        };

        error!(
            method = %req.method(),
            path = %req.path(),
            error = %failure,
            "middleware failed"
        );
        res.fail();
    }
}

/// Runs `chain` against one request/response pair.
pub fn execute(chain: &[MiddlewareHandler], req: &mut Request, res: &mut Response) {
    Next::new(chain).run(req, res);
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panic: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panic: {s}")
    } else {
        "panic with non-string payload".to_owned()
    }
}

/// Built-in middleware that logs each request's method, path, status, and duration.
///
/// Emits a single `tracing::info!` line once the rest of the chain has run:
///
/// ```text
/// METHOD /path - STATUS (duration)
/// ```
pub struct LoggerMiddleware;

impl Middleware for LoggerMiddleware {
    fn handle(&self, req: &mut Request, res: &mut Response, next: Next<'_>) -> HandlerResult {
        let start = Instant::now();
        next.run(req, res);
        info!(
            "{} {} - {} ({:?})",
            req.method(),
            req.path(),
            res.status_code(),
            start.elapsed()
        );
        Ok(())
    }
}
