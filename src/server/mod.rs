//! Async TCP listener using Tokio.
//!
//! Accepts TCP connections and serves exactly one HTTP/1.1 request on each:
//! the connection is framed, handed to the [`Pipeline`], answered, and closed.
//! There is no keep-alive or pipelining.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};

use crate::app::{App, Pipeline};
use crate::config::ConfigError;
use crate::http::{FrameError, RequestFramer, Response, StatusCode};

/// Errors produced by the server.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("{}", describe_bind_failure(.addr, .source))]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
}

fn describe_bind_failure(addr: &str, source: &io::Error) -> String {
    match source.kind() {
        io::ErrorKind::AddrInUse => format!("failed to bind to {addr}: address already in use"),
        io::ErrorKind::PermissionDenied => {
            format!("failed to bind to {addr}: permission denied (privileged port?)")
        }
        _ => format!("failed to bind to {addr}: {source}"),
    }
}

/// A bound listener plus the frozen pipeline it serves.
///
/// # Examples
///
/// ```rust,no_run
/// use spindle::{App, Server};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let mut app = App::new();
///     app.get("/", |_req, res, _next| {
///         res.send("Hello!");
///         Ok(())
///     });
///     let server = Server::bind("127.0.0.1:8080", app).await?;
///     server.run().await?;
///     Ok(())
/// }
/// ```
pub struct Server {
    listener: TcpListener,
    local_addr: SocketAddr,
    pipeline: Arc<Pipeline>,
}

impl Server {
    /// Validates the app's configuration, freezes it and binds `addr`.
    ///
    /// # Errors
    ///
    /// - [`ServerError::Config`] if the configuration is invalid.
    /// - [`ServerError::Bind`] if the address cannot be bound
    ///   (e.g. port already in use, insufficient permissions).
    pub async fn bind(addr: impl AsRef<str>, app: App) -> Result<Self, ServerError> {
        app.config().validate()?;

        let addr = addr.as_ref();
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::Bind {
                addr: addr.to_owned(),
                source: e,
            })?;
        let local_addr = listener.local_addr()?;
        Ok(Self {
            listener,
            local_addr,
            pipeline: app.freeze(),
        })
    }

    /// Returns the local address the server is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn pipeline(&self) -> &Arc<Pipeline> {
        &self.pipeline
    }

    /// Starts accepting connections, one task per connection.
    ///
    /// Runs until the process is terminated. Accept errors are logged and the
    /// loop continues.
    pub async fn run(self) -> Result<(), ServerError> {
        info!(address = %self.local_addr, "spindle listening");

        loop {
            let (stream, peer_addr) = match self.listener.accept().await {
                Ok(pair) => pair,
                Err(e) => {
                    error!(error = %e, "failed to accept connection");
                    continue;
                }
            };

            debug!(peer = %peer_addr, "connection accepted");
            let pipeline = Arc::clone(&self.pipeline);
            tokio::spawn(serve_connection(stream, peer_addr, pipeline));
        }
    }
}

async fn serve_connection(stream: TcpStream, peer_addr: SocketAddr, pipeline: Arc<Pipeline>) {
    let deadline = pipeline.config().request_timeout;
    let work = handle_connection(stream, peer_addr, pipeline);

    let result = match deadline {
        Some(limit) => match tokio::time::timeout(limit, work).await {
            Ok(result) => result,
            Err(_) => {
                warn!(peer = %peer_addr, timeout = ?limit, "connection timed out; dropping it");
                return;
            }
        },
        None => work.await,
    };

    if let Err(e) = result {
        warn!(peer = %peer_addr, error = %e, "connection closed with error");
    }
}

/// Frames one request, runs it through the pipeline and writes the reply.
///
/// A socket error while reading discards the partial request without a reply.
async fn handle_connection(
    mut stream: TcpStream,
    peer_addr: SocketAddr,
    pipeline: Arc<Pipeline>,
) -> Result<(), io::Error> {
    let config = pipeline.config();
    let mut framer =
        RequestFramer::with_capacity(config.max_request_size, config.initial_buffer_size);

    let framed = loop {
        let bytes_read = stream.read_buf(framer.buffer_mut()).await?;
        match framer.advance() {
            Ok(Some(frame)) => break Ok(frame),
            Ok(None) if bytes_read == 0 => {
                debug!(
                    peer = %peer_addr,
                    buffered = framer.buffered(),
                    "peer closed before a full request arrived"
                );
                return Ok(());
            }
            Ok(None) => continue,
            Err(e) => break Err(e),
        }
    };

    let mut response = match framed {
        Ok(frame) => {
            let pipeline = Arc::clone(&pipeline);
            // Handlers are synchronous and may touch the filesystem.
            match tokio::task::spawn_blocking(move || pipeline.handle_frame(frame, Some(peer_addr)))
                .await
            {
                Ok(response) => response,
                Err(e) => {
                    error!(peer = %peer_addr, error = %e, "request task failed");
                    Response::from_status(StatusCode::InternalServerError)
                }
            }
        }
        Err(e) => {
            warn!(peer = %peer_addr, error = %e, "rejecting request");
            Response::from_status(rejection_status(&e))
        }
    };

    match response.take_wire() {
        Some(wire) => {
            stream.write_all(&wire).await?;
            stream.flush().await?;
            stream.shutdown().await?;
            debug!(peer = %peer_addr, status = response.status_code(), "response sent");
        }
        None => {
            warn!(
                peer = %peer_addr,
                "middleware chain ended without sending a response; connection left open"
            );
            let mut sink = [0u8; 512];
            while stream.read(&mut sink).await? > 0 {}
        }
    }

    Ok(())
}

fn rejection_status(error: &FrameError) -> StatusCode {
    match error {
        FrameError::InvalidContentLength { .. } => StatusCode::BadRequest,
        FrameError::TooLarge { .. } => StatusCode::PayloadTooLarge,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bind_failures_are_described() {
        let in_use = io::Error::from(io::ErrorKind::AddrInUse);
        assert_eq!(
            describe_bind_failure("0.0.0.0:80", &in_use),
            "failed to bind to 0.0.0.0:80: address already in use"
        );
        let denied = io::Error::from(io::ErrorKind::PermissionDenied);
        assert!(describe_bind_failure("0.0.0.0:80", &denied).contains("permission denied"));
    }

    #[test]
    fn frame_errors_map_to_statuses() {
        assert_eq!(
            rejection_status(&FrameError::TooLarge { limit: 1 }),
            StatusCode::PayloadTooLarge
        );
        assert_eq!(
            rejection_status(&FrameError::InvalidContentLength { value: "x".into() }),
            StatusCode::BadRequest
        );
    }

    #[tokio::test]
    async fn second_bind_on_same_port_fails() {
        let first = Server::bind("127.0.0.1:0", App::new()).await.unwrap();
        let addr = first.local_addr().to_string();
        let err = Server::bind(&addr, App::new()).await.err().unwrap();
        assert!(matches!(&err, ServerError::Bind { source, .. } if source.kind() == io::ErrorKind::AddrInUse));
        assert!(err.to_string().contains("address already in use"));
    }

    #[tokio::test]
    async fn invalid_config_is_rejected_before_binding() {
        let app = App::with_config(crate::config::ServerConfig::default().max_request_size(0));
        let err = Server::bind("127.0.0.1:0", app).await.err().unwrap();
        assert!(matches!(err, ServerError::Config(_)));
    }
}
