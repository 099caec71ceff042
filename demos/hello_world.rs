//! Minimal server showing routes, middleware, a plugin and views.
//!
//! ```text
//! RUST_LOG=debug cargo run --example hello_world
//! curl -i http://127.0.0.1:8080/items/42
//! curl -i -X POST -H 'Content-Type: application/json' -d '{"a":1}' http://127.0.0.1:8080/echo
//! ```

use serde_json::json;
use spindle::middleware::{LoggerMiddleware, from_middleware};
use spindle::plugin::{PluginError, RateLimit};
use spindle::{App, Server, ServerConfig};
use tracing::error;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let mut app = App::with_config(ServerConfig::from_env());

    app.use_handler(from_middleware(LoggerMiddleware))
        .add_plugin(RateLimit::per_second(20))
        .add_plugin(|app: &mut App| -> Result<(), PluginError> {
            app.get("/health", |_req, res, _next| {
                res.send("ok");
                Ok(())
            });
            Ok(())
        })
        .get("/", |_req, res, _next| {
            res.send("Hello from spindle!");
            Ok(())
        })
        .get("/items/:id", |req, res, _next| {
            res.json(req.param("id").unwrap_or_default())?;
            Ok(())
        })
        .get("/search", |req, res, _next| {
            let terms = req
                .query()
                .get("q")
                .map(|v| v.values().to_vec())
                .unwrap_or_default();
            res.json(&json!({ "terms": terms }))?;
            Ok(())
        })
        .post("/echo", |req, res, _next| {
            let body = req.body().as_json().cloned().unwrap_or_default();
            res.json(&body)?;
            Ok(())
        })
        .get("/hello/:name", |req, res, _next| {
            let name = req.param("name").unwrap_or("world").to_owned();
            res.render("hello", &json!({ "name": name }));
            Ok(())
        })
        .static_files("public");

    let server = match Server::bind("127.0.0.1:8080", app).await {
        Ok(server) => server,
        Err(e) => {
            error!("{e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = server.run().await {
        error!("{e}");
        std::process::exit(1);
    }
}
