//! # spindle
//!
//! A from-scratch HTTP/1.1 server engine: its own request framing and parsing,
//! segment-based routing with path parameters, an ordered middleware chain with
//! per-entry failure containment, and setup-time plugins.
//!
//! Each accepted connection carries exactly one request and is closed after
//! the response is written.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use spindle::App;
//! use spindle::middleware::{LoggerMiddleware, from_middleware};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut app = App::new();
//!     app.use_handler(from_middleware(LoggerMiddleware))
//!         .get("/items/:id", |req, res, _next| {
//!             res.json(req.param("id").unwrap_or_default())?;
//!             Ok(())
//!         });
//!     app.listen("127.0.0.1:8080").await?;
//!     Ok(())
//! }
//! ```

pub mod app;
pub mod assets;
pub mod config;
pub mod http;
pub mod middleware;
pub mod plugin;
pub mod router;
pub mod server;
pub mod view;

// ── Convenience re-exports ────────────────────────────────────────────────────
pub use app::{App, Pipeline};
pub use config::ServerConfig;
pub use http::{Body, Headers, Method, Request, Response, StatusCode};
pub use middleware::{HandlerResult, Middleware, Next};
pub use plugin::Plugin;
pub use router::Router;
pub use server::{Server, ServerError};
