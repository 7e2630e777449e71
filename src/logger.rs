//! Logger collaborator.

use tracing::{error, info};

/// Sink for the client's user-facing log lines.
pub trait Logger: Send + Sync {
    fn info(&self, message: &str);
    fn error(&self, message: &str);
}

/// Default logger that forwards to [`tracing`] under the `smallbot` target.
///
/// Nothing is printed until the application installs a subscriber, such as
/// `tracing_subscriber::fmt().init()`. Without one, the fatal error reported by
/// [`SmallBot::start`](crate::SmallBot::start) is dropped; supply a custom
/// [`Logger`] when no subscriber is wanted.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingLogger;

impl Logger for TracingLogger {
    fn info(&self, message: &str) {
        info!(target: "smallbot", "{message}");
    }

    fn error(&self, message: &str) {
        error!(target: "smallbot", "{message}");
    }
}
