//! Rate limiting plugin
//!
//! Fixed-window request counting per client IP address.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::debug;

use super::{Plugin, PluginError};
use crate::app::App;
use crate::http::StatusCode;

// Expired windows are swept once the table grows past this many clients.
const PRUNE_THRESHOLD: usize = 10_000;

#[derive(Debug, Clone, Copy)]
struct Window {
    count: u32,
    started: Instant,
}

/// Limits each client to `max_requests` per `window`.
///
/// Requests over the limit get `429 Too Many Requests` with a `Retry-After`
/// header and the rest of the chain does not run. Clients whose address is
/// unknown share one bucket.
///
/// ```
/// use spindle::App;
/// use spindle::plugin::RateLimit;
///
/// let mut app = App::new();
/// app.add_plugin(RateLimit::per_minute(120));
/// ```
#[derive(Debug, Clone)]
pub struct RateLimit {
    max_requests: u32,
    window: Duration,
    windows: Arc<Mutex<HashMap<Option<IpAddr>, Window>>>,
}

impl RateLimit {
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            max_requests,
            window,
            windows: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Requests per second
    pub fn per_second(max: u32) -> Self {
        Self::new(max, Duration::from_secs(1))
    }

    /// Requests per minute
    pub fn per_minute(max: u32) -> Self {
        Self::new(max, Duration::from_secs(60))
    }

    /// Counts one request for `client` at `now`.
    ///
    /// Returns the remaining allowance, or how long until the window resets
    /// when the limit is exceeded.
    fn check(&self, client: Option<IpAddr>, now: Instant) -> Result<u32, Duration> {
        let mut windows = self.windows.lock();
        if windows.len() > PRUNE_THRESHOLD {
            windows.retain(|_, w| now.duration_since(w.started) < self.window);
        }

        let entry = windows.entry(client).or_insert(Window {
            count: 0,
            started: now,
        });
        if now.duration_since(entry.started) >= self.window {
            *entry = Window {
                count: 0,
                started: now,
            };
        }

        entry.count = entry.count.saturating_add(1);
        if entry.count > self.max_requests {
            Err(self.window.saturating_sub(now.duration_since(entry.started)))
        } else {
            Ok(self.max_requests - entry.count)
        }
    }
}

impl Plugin for RateLimit {
    fn name(&self) -> &str {
        "rate-limit"
    }

    fn install(&self, app: &mut App) -> Result<(), PluginError> {
        if self.max_requests == 0 {
            return Err("rate limit must allow at least one request per window".into());
        }

        let limiter = self.clone();
        app.use_middleware(move |req, res, next| {
            let client = req.peer_addr().map(|addr| addr.ip());
            match limiter.check(client, Instant::now()) {
                Ok(remaining) => {
                    res.set_header("X-RateLimit-Limit", limiter.max_requests.to_string())
                        .set_header("X-RateLimit-Remaining", remaining.to_string());
                    next.run(req, res);
                }
                Err(reset) => {
                    debug!(client = ?client, "rate limit exceeded");
                    let retry_after = reset.as_secs() + u64::from(reset.subsec_nanos() > 0);
                    res.status(StatusCode::TooManyRequests)
                        .set_header("Retry-After", retry_after.max(1).to_string())
                        .send("Too Many Requests");
                }
            }
            Ok(())
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_up_to_limit_then_rejects() {
        let limit = RateLimit::per_second(2);
        let now = Instant::now();
        assert_eq!(limit.check(None, now), Ok(1));
        assert_eq!(limit.check(None, now), Ok(0));
        assert!(limit.check(None, now).is_err());
    }

    #[test]
    fn window_resets() {
        let limit = RateLimit::per_second(1);
        let start = Instant::now();
        assert!(limit.check(None, start).is_ok());
        assert!(limit.check(None, start).is_err());
        assert!(limit.check(None, start + Duration::from_secs(1)).is_ok());
    }

    #[test]
    fn clients_are_counted_separately() {
        let limit = RateLimit::per_second(1);
        let now = Instant::now();
        let a: IpAddr = "10.0.0.1".parse().unwrap();
        let b: IpAddr = "10.0.0.2".parse().unwrap();
        assert!(limit.check(Some(a), now).is_ok());
        assert!(limit.check(Some(b), now).is_ok());
        assert!(limit.check(Some(a), now).is_err());
    }

    #[test]
    fn zero_limit_fails_to_install() {
        let mut app = App::new();
        app.add_plugin(RateLimit::per_second(0));
        assert_eq!(app.middleware_count(), 0);
    }
}
