//! Types for working with errors produced by pgdispatch.

use std::error::Error as StdError;
use std::fmt::{self, Debug, Display};
use std::result::Result as StdResult;
use std::sync::Arc;

/// A specialized `Result` type for pgdispatch.
pub type Result<T> = StdResult<T, Error>;

// Convenience type alias for usage within pgdispatch.
pub type BoxDynError = Box<dyn StdError + 'static + Send + Sync>;

/// Represents all the ways a query or a connection can fail within pgdispatch.
///
/// None of these are ever returned synchronously from [`Pool::exec`]; they are delivered
/// through the completion callback of the affected query or through the pool's break handler.
///
/// [`Pool::exec`]: crate::pool::Pool::exec
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// Error occurred while parsing connection options or building the pool.
    #[error("error with configuration: {0}")]
    Configuration(#[source] BoxDynError),

    /// Error reported by the driver, either for a single query or for a whole session.
    #[error("error returned from driver: {0}")]
    Driver(#[from] DriverError),

    /// The session became unusable and the driver did not say why.
    #[error("connection to the server was broken")]
    ConnectionBroken,

    /// [`Pool::exec`] was called after [`Pool::destroy`], or the pool worker is gone.
    ///
    /// [`Pool::exec`]: crate::pool::Pool::exec
    /// [`Pool::destroy`]: crate::pool::Pool::destroy
    #[error("attempted to execute a query on a closed pool")]
    PoolClosed,

    /// The query was still queued when the pool was destroyed.
    ///
    /// Only produced when [`PoolOptions::fail_queued_on_destroy`] is enabled.
    ///
    /// [`PoolOptions::fail_queued_on_destroy`]: crate::pool::PoolOptions::fail_queued_on_destroy
    #[error("pool was destroyed before the query was dispatched")]
    PoolDestroyed,
}

impl Error {
    #[inline]
    pub fn config(err: impl StdError + Send + Sync + 'static) -> Self {
        Error::Configuration(err.into())
    }

    /// Returns the driver error, if this error came from the driver.
    pub fn as_driver_error(&self) -> Option<&DriverError> {
        match self {
            Error::Driver(err) => Some(err),
            _ => None,
        }
    }
}

/// An error reported by the driver.
///
/// Cloning is cheap: a session that breaks in the middle of a query hands the same error
/// to the query's callback and to the pool's break handler.
#[derive(Clone)]
pub struct DriverError(Arc<dyn StdError + 'static + Send + Sync>);

impl DriverError {
    pub fn new(err: impl Into<BoxDynError>) -> Self {
        DriverError(Arc::from(err.into()))
    }

    /// The primary, human-readable error message.
    pub fn message(&self) -> String {
        self.0.to_string()
    }

    /// Attempts to downcast the inner error to a concrete type.
    pub fn downcast_ref<E: StdError + 'static>(&self) -> Option<&E> {
        self.0.downcast_ref()
    }
}

impl Debug for DriverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        Debug::fmt(&*self.0, f)
    }
}

impl Display for DriverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        Display::fmt(&*self.0, f)
    }
}

impl StdError for DriverError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.0.source()
    }
}

impl From<String> for DriverError {
    fn from(message: String) -> Self {
        DriverError::new(message)
    }
}

impl From<&'_ str> for DriverError {
    fn from(message: &str) -> Self {
        DriverError::new(message)
    }
}

// Format an error message as a `Configuration` error
macro_rules! err_config {
    ($expr:expr) => {
        $crate::error::Error::Configuration($expr.into())
    };

    ($fmt:expr, $($arg:tt)*) => {
        $crate::error::Error::Configuration(format!($fmt, $($arg)*).into())
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn driver_error_is_shared_between_clones() {
        let err = DriverError::from("server closed the connection unexpectedly");
        let clone = err.clone();

        assert_eq!(err.message(), clone.message());
        assert!(Arc::ptr_eq(&err.0, &clone.0));
    }

    #[test]
    fn driver_error_converts_into_error() {
        let err: Error = DriverError::from("relation \"foo\" does not exist").into();

        assert_eq!(
            err.to_string(),
            "error returned from driver: relation \"foo\" does not exist"
        );
        assert!(err.as_driver_error().is_some());
        assert!(Error::PoolClosed.as_driver_error().is_none());
    }
}
