use std::fmt::{self, Debug, Formatter};

use crate::error::Error;

/// Completion handler for a single query.
pub type Callback<R> = Box<dyn FnOnce(Result<R, Error>) + Send + 'static>;

/// A query waiting in the pool, or in flight on one of its connections.
///
/// A `Query` is owned by exactly one place at a time: the pool's queue, then the
/// connection executing it, then the deferred delivery that hands its outcome to the
/// callback. The callback is consumed on delivery, so it can run at most once.
pub struct Query<R> {
    command: String,
    callback: Option<Callback<R>>,
}

impl<R> Query<R> {
    /// A query whose outcome nobody is interested in.
    pub fn new(command: impl Into<String>) -> Self {
        Query {
            command: command.into(),
            callback: None,
        }
    }

    pub fn with_callback<F>(command: impl Into<String>, callback: F) -> Self
    where
        F: FnOnce(Result<R, Error>) + Send + 'static,
    {
        Query {
            command: command.into(),
            callback: Some(Box::new(callback)),
        }
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn has_callback(&self) -> bool {
        self.callback.is_some()
    }

    /// Hands `outcome` to the callback, if there is one.
    pub(crate) fn complete(mut self, outcome: Result<R, Error>) {
        if let Some(callback) = self.callback.take() {
            callback(outcome);
        }
    }
}

impl<R> Debug for Query<R> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Query")
            .field("command", &self.command)
            .field("has_callback", &self.has_callback())
            .finish()
    }
}

impl<R> From<&'_ str> for Query<R> {
    fn from(command: &str) -> Self {
        Query::new(command)
    }
}

impl<R> From<String> for Query<R> {
    fn from(command: String) -> Self {
        Query::new(command)
    }
}
