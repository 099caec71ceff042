//! Plugins: setup-time extensions that register middleware on an [`App`].
//!
//! Each plugin is installed inside its own failure boundary. If it returns an
//! error or panics, the routes and middleware it registered are discarded, the
//! failure is logged, and installation continues with the next plugin.
//!
//! ```
//! use spindle::App;
//! use spindle::middleware::LoggerMiddleware;
//! use spindle::plugin::PluginError;
//!
//! let mut app = App::new();
//! app.add_plugin(|app: &mut App| -> Result<(), PluginError> {
//!     app.use_handler(spindle::middleware::from_middleware(LoggerMiddleware));
//!     Ok(())
//! });
//! assert_eq!(app.middleware_count(), 1);
//! ```

pub mod rate_limit;

pub use rate_limit::RateLimit;

use crate::app::App;

/// Error a plugin may fail with.
pub type PluginError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// A setup-time extension.
pub trait Plugin {
    /// Name used in logs.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    /// Registers the plugin's middleware on `app`.
    fn install(&self, app: &mut App) -> Result<(), PluginError>;
}

impl<F> Plugin for F
where
    F: Fn(&mut App) -> Result<(), PluginError>,
{
    fn install(&self, app: &mut App) -> Result<(), PluginError> {
        (self)(app)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::Method;

    fn registers_one(app: &mut App) -> Result<(), PluginError> {
        app.use_middleware(|req, res, next| {
            next.run(req, res);
            Ok(())
        });
        Ok(())
    }

    #[test]
    fn plugin_registrations_are_kept() {
        let mut app = App::new();
        app.add_plugin(registers_one);
        assert_eq!(app.middleware_count(), 1);
    }

    #[test]
    fn failing_plugin_is_rolled_back_and_others_still_load() {
        let mut app = App::new();
        let failing = |app: &mut App| -> Result<(), PluginError> {
            app.use_middleware(|_req, _res, _next| Ok(()));
            app.get("/from-plugin", |_req, _res, _next| Ok(()));
            Err("missing credentials".into())
        };
        app.add_plugin(failing).add_plugin(registers_one);
        assert_eq!(app.middleware_count(), 1);
        assert!(app.router().resolve(&Method::Get, "/from-plugin").is_none());
    }

    #[test]
    fn panicking_plugin_is_contained() {
        let mut app = App::new();
        let panicking = |app: &mut App| -> Result<(), PluginError> {
            app.use_middleware(|_req, _res, _next| Ok(()));
            // Duplicate parameter names panic at registration.
            app.get("/a/:id/:id", |_req, _res, _next| Ok(()));
            Ok(())
        };
        app.add_plugins(vec![
            Box::new(panicking) as Box<dyn Plugin>,
            Box::new(registers_one) as Box<dyn Plugin>,
        ]);
        assert_eq!(app.middleware_count(), 1);
        assert!(app.router().is_empty());
    }

    #[test]
    fn default_name_is_type_name() {
        struct Named;
        impl Plugin for Named {
            fn install(&self, _app: &mut App) -> Result<(), PluginError> {
                Ok(())
            }
        }
        assert!(Named.name().ends_with("Named"));
    }
}
