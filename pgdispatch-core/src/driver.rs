//! The contract between the pool and the database driver.
//!
//! The driver owns everything below the session level: sockets, authentication, TLS,
//! the wire protocol and result decoding. The pool only needs to open, use and close
//! sessions, and to be told what happened to them.

use std::fmt::{self, Display};
use std::num::NonZeroU64;

use crate::error::{DriverError, Error};
use crate::options::ConnectOptions;

/// Opaque handle identifying one driver session.
///
/// Handles are never zero; a connection without a live session simply has no handle.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(NonZeroU64);

impl SessionId {
    /// Returns `None` for `0`.
    pub const fn new(raw: u64) -> Option<Self> {
        match NonZeroU64::new(raw) {
            Some(raw) => Some(SessionId(raw)),
            None => None,
        }
    }

    pub const fn get(self) -> u64 {
        self.0.get()
    }
}

impl Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

/// Which operation a [`DriverEvent`] reports on.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Task {
    Connect,
    Query,
}

/// Something that happened to a session.
///
/// `broken` may accompany either task and always means the session is now unusable.
#[derive(Debug)]
pub struct DriverEvent<R> {
    pub session: SessionId,
    pub broken: bool,
    pub task: Task,
    pub error: Option<DriverError>,
    pub result: Option<R>,
}

impl<R> DriverEvent<R> {
    /// The session is established and ready for queries.
    pub fn connected(session: SessionId) -> Self {
        DriverEvent {
            session,
            broken: false,
            task: Task::Connect,
            error: None,
            result: None,
        }
    }

    /// The session could not be established.
    pub fn connect_failed(session: SessionId, error: impl Into<DriverError>) -> Self {
        DriverEvent {
            session,
            broken: true,
            task: Task::Connect,
            error: Some(error.into()),
            result: None,
        }
    }

    /// The in-flight query finished successfully.
    pub fn query_ok(session: SessionId, result: R) -> Self {
        DriverEvent {
            session,
            broken: false,
            task: Task::Query,
            error: None,
            result: Some(result),
        }
    }

    /// The in-flight query failed but the session is still usable.
    pub fn query_failed(session: SessionId, error: impl Into<DriverError>) -> Self {
        DriverEvent {
            session,
            broken: false,
            task: Task::Query,
            error: Some(error.into()),
            result: None,
        }
    }

    /// The session broke while a query was in flight.
    pub fn query_broken(session: SessionId, error: impl Into<DriverError>) -> Self {
        DriverEvent {
            session,
            broken: true,
            task: Task::Query,
            error: Some(error.into()),
            result: None,
        }
    }

    /// Folds the `error`/`result` pair into the value handed to a query callback.
    ///
    /// A driver error always wins. An event carrying neither is reported as a broken
    /// connection, which is the only way a driver can legitimately say nothing.
    pub(crate) fn into_outcome(self) -> Result<R, Error> {
        match (self.error, self.result) {
            (Some(err), _) => Err(Error::Driver(err)),
            (None, Some(result)) => Ok(result),
            (None, None) => Err(Error::ConnectionBroken),
        }
    }
}

/// Raw session primitives provided by a database driver.
///
/// None of these operations report their outcome directly. `connect` and `exec` eventually
/// produce a [`DriverEvent`] for the returned session, which the owner of the pool feeds to
/// [`Pool::handle_event`]. Events must never be delivered from inside one of these calls.
///
/// [`Pool::handle_event`]: crate::pool::Pool::handle_event
pub trait Driver {
    /// The decoded result of one query.
    type Output;

    /// Starts opening a session. Completion is reported with [`Task::Connect`].
    fn connect(&mut self, options: &ConnectOptions) -> SessionId;

    /// Sends `command` over an established session. Completion is reported with
    /// [`Task::Query`].
    fn exec(&mut self, session: SessionId, command: &str);

    /// Releases the session. Fire-and-forget; no event is expected afterwards.
    fn disconnect(&mut self, session: SessionId);
}

impl<D: Driver + ?Sized> Driver for Box<D> {
    type Output = D::Output;

    fn connect(&mut self, options: &ConnectOptions) -> SessionId {
        (**self).connect(options)
    }

    fn exec(&mut self, session: SessionId, command: &str) {
        (**self).exec(session, command)
    }

    fn disconnect(&mut self, session: SessionId) {
        (**self).disconnect(session)
    }
}
