//! Server configuration.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::view::DEFAULT_VIEWS_DIR;

/// Default cap on a buffered request (8 MiB).
pub const DEFAULT_MAX_REQUEST_SIZE: usize = 8 * 1024 * 1024;

/// Default initial read buffer capacity per connection.
pub const DEFAULT_INITIAL_BUFFER_SIZE: usize = 4096;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Invalid {
        field: &'static str,
        reason: &'static str,
    },
}

/// Settings shared by every connection.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use spindle::config::ServerConfig;
///
/// let config = ServerConfig::default()
///     .max_request_size(64 * 1024)
///     .request_timeout(Some(Duration::from_secs(30)));
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Largest request (head plus body) a connection may buffer.
    /// Env: SPINDLE_MAX_REQUEST_SIZE
    pub max_request_size: usize,

    /// Initial read buffer capacity per connection.
    pub initial_buffer_size: usize,

    /// Deadline for a whole connection, from accept to close.
    /// `None` means a connection lives until the peer or the transport ends it.
    /// Env: SPINDLE_REQUEST_TIMEOUT_SECS
    pub request_timeout: Option<Duration>,

    /// Directory `Response::render` reads views from.
    /// Env: SPINDLE_VIEWS_DIR
    pub views_dir: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            max_request_size: DEFAULT_MAX_REQUEST_SIZE,
            initial_buffer_size: DEFAULT_INITIAL_BUFFER_SIZE,
            request_timeout: None,
            views_dir: PathBuf::from(DEFAULT_VIEWS_DIR),
        }
    }
}

impl ServerConfig {
    /// Defaults overridden by any `SPINDLE_*` environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_vars();
        config
    }

    /// Apply environment variables. Unparseable values are ignored.
    pub fn apply_env_vars(&mut self) {
        if let Some(size) = env::var("SPINDLE_MAX_REQUEST_SIZE")
            .ok()
            .and_then(|v| v.parse().ok())
        {
            self.max_request_size = size;
        }

        if let Some(secs) = env::var("SPINDLE_REQUEST_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
        {
            self.request_timeout = (secs > 0).then(|| Duration::from_secs(secs));
        }

        if let Ok(dir) = env::var("SPINDLE_VIEWS_DIR") {
            self.views_dir = PathBuf::from(dir);
        }
    }

    #[must_use]
    pub fn max_request_size(mut self, bytes: usize) -> Self {
        self.max_request_size = bytes;
        self
    }

    #[must_use]
    pub fn initial_buffer_size(mut self, bytes: usize) -> Self {
        self.initial_buffer_size = bytes;
        self
    }

    #[must_use]
    pub fn request_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.request_timeout = timeout;
        self
    }

    #[must_use]
    pub fn views_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.views_dir = dir.into();
        self
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_request_size == 0 {
            return Err(ConfigError::Invalid {
                field: "max_request_size",
                reason: "must be greater than zero",
            });
        }
        if self.initial_buffer_size == 0 {
            return Err(ConfigError::Invalid {
                field: "initial_buffer_size",
                reason: "must be greater than zero",
            });
        }
        if self.request_timeout == Some(Duration::ZERO) {
            return Err(ConfigError::Invalid {
                field: "request_timeout",
                reason: "use None to disable the deadline",
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = ServerConfig::default();
        assert_eq!(config.max_request_size, DEFAULT_MAX_REQUEST_SIZE);
        assert_eq!(config.request_timeout, None);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn zero_sizes_are_rejected() {
        let err = ServerConfig::default().max_request_size(0).validate();
        assert_eq!(
            err,
            Err(ConfigError::Invalid {
                field: "max_request_size",
                reason: "must be greater than zero",
            })
        );
        assert!(ServerConfig::default().initial_buffer_size(0).validate().is_err());
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let config = ServerConfig::default().request_timeout(Some(Duration::ZERO));
        assert!(config.validate().is_err());
    }
}
