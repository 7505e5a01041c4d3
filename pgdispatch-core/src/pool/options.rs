use std::fmt::{self, Debug, Formatter};
use std::time::Duration;

use log::LevelFilter;

use super::deferred::BreakHandler;
use super::Pool;
use crate::driver::Driver;
use crate::error::Error;
use crate::logger::LogSettings;
use crate::options::ConnectOptions;

/// Configuration options for [`Pool`].
///
/// ```rust,ignore
/// let pool = PoolOptions::new()
///     .max_connections(5)
///     .on_break(|err| eprintln!("lost a connection: {err}"))
///     .build(driver, "postgres://localhost/mydb".parse()?)?;
/// ```
pub struct PoolOptions {
    pub(crate) max_connections: u32,
    pub(crate) on_break: Option<BreakHandler>,
    pub(crate) fail_queued_on_destroy: bool,
    pub(crate) log_settings: LogSettings,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl PoolOptions {
    /// Returns a default "sane" configuration.
    ///
    /// See the source of this method for the current default values.
    pub fn new() -> Self {
        PoolOptions {
            // grown one connection at a time, on demand
            max_connections: 10,
            on_break: None,
            // queries still queued at destroy are dropped without a callback
            fail_queued_on_destroy: false,
            log_settings: LogSettings::default(),
        }
    }

    /// Set the maximum number of connections that this pool should maintain.
    ///
    /// Must be greater than zero; [`build`](Self::build) rejects `0`.
    pub fn max_connections(mut self, max: u32) -> Self {
        self.max_connections = max;
        self
    }

    /// Get the maximum number of connections that this pool should maintain
    pub fn get_max_connections(&self) -> u32 {
        self.max_connections
    }

    /// Called with the error whenever a connection breaks, either while connecting or
    /// while idle or running a query.
    ///
    /// The pool keeps working without the broken connection and opens a replacement on
    /// the next [`Pool::exec`] that finds no idle connection.
    pub fn on_break<F>(mut self, handler: F) -> Self
    where
        F: FnMut(Error) + Send + 'static,
    {
        self.on_break = Some(Box::new(handler));
        self
    }

    /// If `true`, [`Pool::destroy`] fails every query still waiting in the queue with
    /// [`Error::PoolDestroyed`] instead of dropping it silently.
    ///
    /// Defaults to `false`.
    pub fn fail_queued_on_destroy(mut self, fail: bool) -> Self {
        self.fail_queued_on_destroy = fail;
        self
    }

    /// Log executed statements with the specified `level`.
    pub fn log_statements(mut self, level: LevelFilter) -> Self {
        self.log_settings.log_statements(level);
        self
    }

    /// Log executed statements with a duration above the specified `duration`
    /// at the specified `level`.
    pub fn log_slow_statements(mut self, level: LevelFilter, duration: Duration) -> Self {
        self.log_settings.log_slow_statements(level, duration);
        self
    }

    /// Disable logging of executed statements.
    pub fn disable_statement_logging(self) -> Self {
        self.log_statements(LevelFilter::Off)
            .log_slow_statements(LevelFilter::Off, Duration::default())
    }

    /// Create a pool over `driver`. No connection is opened until the first query.
    ///
    /// `options` are handed to the driver unchanged for every session the pool opens.
    pub fn build<D: Driver>(self, driver: D, options: ConnectOptions) -> Result<Pool<D>, Error> {
        if self.max_connections == 0 {
            return Err(err_config!("max_connections must be greater than zero"));
        }

        Ok(Pool::with_options(self, driver, options))
    }
}

impl Debug for PoolOptions {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolOptions")
            .field("max_connections", &self.max_connections)
            .field("on_break", &self.on_break.is_some())
            .field("fail_queued_on_destroy", &self.fail_queued_on_destroy)
            .field("log_settings", &self.log_settings)
            .finish()
    }
}
