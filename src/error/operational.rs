//! Operational error context propagation with `anyhow`.
//!
//! Failures that are contained rather than propagated, such as a failing
//! engine or rejected stored settings, are funnelled through
//! [`ErrorReporter`] so they are logged the same way everywhere.

use std::error::Error as StdError;

use {
    anyhow::{Context, Error, Result as AnyhowResult},
    tracing::{error, warn},
};

/// Extension trait for adding context to foreign errors.
pub trait ResultExt<T, E> {
    /// Adds context to an error with a static string.
    ///
    /// # Errors
    ///
    /// Returns the original error wrapped with `context`.
    fn add_context(self, context: &'static str) -> AnyhowResult<T>
    where
        E: StdError + Send + Sync + 'static;
}

impl<T, E> ResultExt<T, E> for Result<T, E> {
    fn add_context(self, context: &'static str) -> AnyhowResult<T>
    where
        E: StdError + Send + Sync + 'static,
    {
        self.context(context)
    }
}

/// Centralized error logging.
pub struct ErrorReporter;

impl ErrorReporter {
    /// Reports a recoverable failure.
    pub fn warn(error: &Error, context: &str) {
        warn!(context, error = %Self::chain(error), "Recoverable failure");
    }

    /// Reports a failure that ended an operation.
    pub fn error(error: &Error, context: &str) {
        error!(context, error = %Self::chain(error), "Operation failed");
    }

    /// Formats the whole cause chain as `outer: inner: root`.
    #[must_use]
    pub fn chain(error: &Error) -> String {
        format!("{error:#}")
    }
}
