//! Provides the connection pool and query dispatcher.
//!
//! Applications hand queries to the [`Pool`] with [`Pool::exec`], which never blocks and
//! never fails synchronously. Queries wait in a single FIFO queue shared by every
//! connection; idle connections pull from it, and when nothing is idle the pool opens one
//! more connection, up to [`PoolOptions::max_connections`].
//!
//! ### Driving the pool
//!
//! The pool is a single-writer state machine. Whoever owns it feeds it the events the
//! driver produces with [`Pool::handle_event`] and, between events, calls
//! [`Pool::run_pending`] to deliver query outcomes and break notifications to the
//! application. Deliveries never run while the pool is in the middle of a transition,
//! so a callback can safely queue more work through whatever channel leads back to the
//! pool's owner.
//!
//! With the `runtime-tokio` feature, [`Pool::spawn`] moves the pool into a task that does
//! all of this and returns a cloneable [`PoolHandle`](crate::rt::PoolHandle).
//!
//! ### Growth and shrinking
//!
//! At most one connection is opened per [`Pool::exec`] call, and only if no existing
//! connection is idle. A connection that becomes idle while the queue is empty closes
//! itself, so the pool shrinks back down as soon as the load drops.

use std::fmt::{self, Debug, Formatter};

use indexmap::IndexMap;

use crate::connection::{Connection, ConnectionState, Context, Lifecycle};
use crate::driver::{Driver, DriverEvent, SessionId};
use crate::error::Error;
use crate::logger::LogSettings;
use crate::options::ConnectOptions;
use crate::query::Query;
use crate::queue::QueryQueue;

use self::deferred::{BreakHandler, Deferred};

pub use self::options::PoolOptions;

pub(crate) mod deferred;
mod options;


/// A queueing pool of driver sessions.
pub struct Pool<D: Driver> {
    driver: D,
    connect_options: ConnectOptions,
    max_connections: usize,
    // keyed by session so driver events find their connection; iteration order is
    // the order connections were opened in
    connections: IndexMap<SessionId, Connection<D::Output>>,
    queue: QueryQueue<D::Output>,
    deferred: Deferred<D::Output>,
    on_break: Option<BreakHandler>,
    fail_queued_on_destroy: bool,
    log_settings: LogSettings,
    closed: bool,
}

impl<D: Driver> Pool<D> {
    /// Create a pool with the default options.
    ///
    /// For custom configuration, see [`PoolOptions`].
    pub fn new(driver: D, options: ConnectOptions) -> Self {
        Pool::with_options(PoolOptions::new(), driver, options)
    }

    /// Shorthand for `PoolOptions::new().max_connections(max_connections).build(..)`.
    pub fn init(max_connections: u32, driver: D, options: ConnectOptions) -> Result<Self, Error> {
        PoolOptions::new()
            .max_connections(max_connections)
            .build(driver, options)
    }

    pub(crate) fn with_options(
        pool_options: PoolOptions,
        driver: D,
        connect_options: ConnectOptions,
    ) -> Self {
        let max_connections = pool_options.max_connections as usize;

        Pool {
            driver,
            connect_options,
            max_connections,
            connections: IndexMap::with_capacity(max_connections.min(16)),
            queue: QueryQueue::new(),
            deferred: Deferred::new(),
            on_break: pool_options.on_break,
            fail_queued_on_destroy: pool_options.fail_queued_on_destroy,
            log_settings: pool_options.log_settings,
            closed: false,
        }
    }

    /// Submit a query.
    ///
    /// The query is queued, then every idle connection is told to pick up work. If no
    /// connection was idle and the pool is below capacity, exactly one new connection is
    /// opened. Returns immediately; the outcome is reported only through the query's
    /// callback.
    pub fn exec(&mut self, query: impl Into<Query<D::Output>>) {
        let query = query.into();

        if self.closed {
            tracing::debug!(
                target: "pgdispatch::pool",
                command = query.command(),
                "rejecting query on a destroyed pool"
            );
            self.deferred.complete(query, Err(Error::PoolClosed));
            return;
        }

        self.queue.push(query);

        let mut cx = Context {
            driver: &mut self.driver,
            queue: &mut self.queue,
            deferred: &mut self.deferred,
            log_settings: &self.log_settings,
        };

        let mut any_idle = false;
        let mut released = Vec::new();

        for (session, conn) in self.connections.iter_mut() {
            if !conn.is_idle() {
                continue;
            }

            any_idle = true;

            if let Lifecycle::Released = conn.process(&mut cx) {
                released.push(*session);
            }
        }

        for session in released {
            self.settle(session, Lifecycle::Released);
        }

        if !any_idle && self.connections.len() < self.max_connections {
            self.spawn_connection();
        }
    }

    /// Apply one event reported by the driver.
    ///
    /// Events for sessions the pool no longer tracks are ignored.
    pub fn handle_event(&mut self, event: DriverEvent<D::Output>) {
        let session = event.session;

        let Some(conn) = self.connections.get_mut(&session) else {
            tracing::trace!(
                target: "pgdispatch::pool",
                session = %session,
                task = ?event.task,
                "ignoring event for unknown session"
            );
            return;
        };

        let mut cx = Context {
            driver: &mut self.driver,
            queue: &mut self.queue,
            deferred: &mut self.deferred,
            log_settings: &self.log_settings,
        };

        let lifecycle = conn.handle_event(event, &mut cx);
        self.settle(session, lifecycle);
    }

    /// Deliver every outcome and break notification produced since the last call.
    ///
    /// Returns the number of deliveries made. Queries without a callback are never
    /// scheduled, so they do not count.
    pub fn run_pending(&mut self) -> usize {
        self.deferred.run(self.on_break.as_mut())
    }

    /// Number of deliveries waiting for [`run_pending`](Self::run_pending).
    pub fn num_pending(&self) -> usize {
        self.deferred.len()
    }

    /// Disconnect every connection and stop accepting queries.
    ///
    /// Queries in flight are abandoned and their callbacks never run. Queries still in the
    /// queue are dropped without a callback, unless
    /// [`PoolOptions::fail_queued_on_destroy`] is set, in which case they are failed with
    /// [`Error::PoolDestroyed`] on the next [`run_pending`](Self::run_pending).
    ///
    /// Later calls to [`exec`](Self::exec) fail the query with [`Error::PoolClosed`].
    pub fn destroy(&mut self) {
        tracing::debug!(
            target: "pgdispatch::pool",
            size = self.connections.len(),
            queued = self.queue.len(),
            "destroying pool"
        );

        self.closed = true;

        for (_, mut conn) in self.connections.drain(..) {
            conn.disconnect(&mut self.driver);
        }

        if self.fail_queued_on_destroy {
            for query in self.queue.drain() {
                self.deferred.complete(query, Err(Error::PoolDestroyed));
            }
        } else {
            let dropped = self.queue.drain().count();

            if dropped > 0 {
                tracing::debug!(
                    target: "pgdispatch::pool",
                    dropped,
                    "dropped queued queries without completing them"
                );
            }
        }
    }

    /// Returns the number of live connections, including ones still connecting.
    pub fn size(&self) -> usize {
        self.connections.len()
    }

    /// Returns the number of connections with nothing in flight.
    pub fn num_idle(&self) -> usize {
        self.connections.values().filter(|c| c.is_idle()).count()
    }

    /// Returns the number of connections running a query.
    pub fn num_busy(&self) -> usize {
        self.connections.values().filter(|c| c.is_busy()).count()
    }

    /// Returns the number of queries waiting for a connection.
    pub fn num_queued(&self) -> usize {
        self.queue.len()
    }

    /// Returns the configured maximum pool size.
    pub fn max_connections(&self) -> usize {
        self.max_connections
    }

    /// Returns `true` once [`destroy`](Self::destroy) has been called.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// The parameters every connection is opened with.
    pub fn connect_options(&self) -> &ConnectOptions {
        &self.connect_options
    }

    /// Live connections in scan order, as `(session, state)`.
    pub fn connections(&self) -> impl Iterator<Item = (SessionId, ConnectionState)> + '_ {
        self.connections
            .iter()
            .map(|(session, conn)| (*session, conn.state()))
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    pub fn driver_mut(&mut self) -> &mut D {
        &mut self.driver
    }

    fn spawn_connection(&mut self) {
        let conn = Connection::connect(&mut self.driver, &self.connect_options);
        let session = conn.session();

        // the driver handed out a session it already gave us, so the old one is gone on
        // its side; the shared handle now belongs to the new connection
        if let Some(stale) = self.connections.get_mut(&session) {
            tracing::warn!(
                target: "pgdispatch::pool",
                session = %session,
                connection_id = %stale.id(),
                "driver reused a live session handle"
            );

            stale.abandon(
                Error::ConnectionBroken,
                &mut self.deferred,
                &self.log_settings,
            );
            self.settle(session, Lifecycle::Broken(Error::ConnectionBroken));
        }

        tracing::debug!(
            target: "pgdispatch::pool",
            connection_id = %conn.id(),
            size = self.connections.len() + 1,
            max_connections = self.max_connections,
            "spawned connection"
        );

        self.connections.insert(session, conn);
    }

    fn settle(&mut self, session: SessionId, lifecycle: Lifecycle) {
        let error = match lifecycle {
            Lifecycle::Live => return,
            Lifecycle::Released => None,
            Lifecycle::Broken(err) => Some(err),
        };

        if let Some(conn) = self.connections.shift_remove(&session) {
            tracing::debug!(
                target: "pgdispatch::pool",
                connection_id = %conn.id(),
                broken = error.is_some(),
                size = self.connections.len(),
                "connection removed from pool"
            );
        }

        if let Some(err) = error {
            if self.on_break.is_some() {
                self.deferred.notify_break(err);
            }
        }
    }
}

impl<D: Driver> Drop for Pool<D> {
    fn drop(&mut self) {
        if !self.closed {
            self.destroy();
            self.run_pending();
        }
    }
}

impl<D: Driver> Debug for Pool<D> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool")
            .field("size", &self.size())
            .field("num_idle", &self.num_idle())
            .field("num_queued", &self.num_queued())
            .field("max_connections", &self.max_connections)
            .field("is_closed", &self.closed)
            .finish()
    }
}
