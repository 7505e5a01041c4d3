use std::fmt::{self, Display};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::driver::{Driver, DriverEvent, SessionId, Task};
use crate::error::Error;
use crate::logger::{LogSettings, QueryLogger};
use crate::options::ConnectOptions;
use crate::pool::deferred::Deferred;
use crate::query::Query;
use crate::queue::QueryQueue;

/// Process-wide number used to tell connections apart in logs.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

impl ConnectionId {
    pub(crate) fn next() -> Self {
        ConnectionId(NEXT_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

/// Where a connection is in its lifecycle.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    /// The driver is still opening the session.
    Connecting,
    /// The session is open and nothing is in flight.
    Idle,
    /// One query has been handed to the driver and has not completed yet.
    Busy,
    /// The session is gone. Terminal.
    Disconnected,
}

enum State<R> {
    Connecting,
    Idle,
    Busy(InFlight<R>),
    Disconnected,
}

struct InFlight<R> {
    query: Query<R>,
    logger: QueryLogger,
}

/// What the owner of a connection has to do after it handled something.
#[derive(Debug)]
pub(crate) enum Lifecycle {
    /// Still usable; keep it in the live set.
    Live,
    /// Closed itself because there was no work left for it.
    Released,
    /// The driver reported the session as broken.
    Broken(Error),
}

/// One driver session and the single query it may be running.
///
/// A connection only ever holds work while it has a live session: `Busy` carries the
/// in-flight query, and every other state carries none.
pub(crate) struct Connection<R> {
    id: ConnectionId,
    session: SessionId,
    state: State<R>,
}

/// Everything a connection touches besides itself.
pub(crate) struct Context<'a, D: Driver> {
    pub driver: &'a mut D,
    pub queue: &'a mut QueryQueue<D::Output>,
    pub deferred: &'a mut Deferred<D::Output>,
    pub log_settings: &'a LogSettings,
}

impl<R> Connection<R> {
    /// Asks the driver for a new session. The connection stays `Connecting` until the
    /// driver reports back for the returned session.
    pub fn connect<D>(driver: &mut D, options: &ConnectOptions) -> Self
    where
        D: Driver<Output = R>,
    {
        let id = ConnectionId::next();
        let session = driver.connect(options);

        tracing::debug!(
            target: "pgdispatch::connection",
            connection_id = %id,
            session = %session,
            "opening connection"
        );

        Connection {
            id,
            session,
            state: State::Connecting,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn session(&self) -> SessionId {
        self.session
    }

    /// The live session handle; `None` while connecting and after disconnection.
    pub fn descriptor(&self) -> Option<SessionId> {
        match self.state {
            State::Idle | State::Busy(_) => Some(self.session),
            State::Connecting | State::Disconnected => None,
        }
    }

    pub fn state(&self) -> ConnectionState {
        match self.state {
            State::Connecting => ConnectionState::Connecting,
            State::Idle => ConnectionState::Idle,
            State::Busy(_) => ConnectionState::Busy,
            State::Disconnected => ConnectionState::Disconnected,
        }
    }

    pub fn is_idle(&self) -> bool {
        matches!(self.state, State::Idle)
    }

    pub fn is_busy(&self) -> bool {
        matches!(self.state, State::Busy(_))
    }

    /// Picks up the next queued query, or closes the session if the queue is empty.
    ///
    /// Does nothing unless the connection is `Idle`.
    pub fn process<D>(&mut self, cx: &mut Context<'_, D>) -> Lifecycle
    where
        D: Driver<Output = R>,
    {
        if !self.is_idle() {
            return Lifecycle::Live;
        }

        match cx.queue.shift() {
            Some(query) => {
                tracing::trace!(
                    target: "pgdispatch::connection",
                    connection_id = %self.id,
                    command = query.command(),
                    "dispatching query"
                );

                cx.driver.exec(self.session, query.command());
                self.state = State::Busy(InFlight {
                    query,
                    logger: QueryLogger::new(),
                });

                Lifecycle::Live
            }

            None => {
                tracing::debug!(
                    target: "pgdispatch::connection",
                    connection_id = %self.id,
                    "no queued work, closing surplus connection"
                );

                self.disconnect(cx.driver);
                Lifecycle::Released
            }
        }
    }

    /// Applies one driver event for this connection's session.
    ///
    /// A completed query frees the connection first and immediately pulls the next queued
    /// query; only then is the completed query's outcome scheduled for delivery.
    pub fn handle_event<D>(
        &mut self,
        event: DriverEvent<R>,
        cx: &mut Context<'_, D>,
    ) -> Lifecycle
    where
        D: Driver<Output = R>,
    {
        debug_assert_eq!(event.session, self.session);

        if matches!(self.state, State::Disconnected) {
            tracing::trace!(
                target: "pgdispatch::connection",
                connection_id = %self.id,
                task = ?event.task,
                "ignoring event for disconnected connection"
            );
            return Lifecycle::Live;
        }

        let broken = event.broken.then(|| break_error(&event));

        if let Some(err) = &broken {
            tracing::warn!(
                target: "pgdispatch::connection",
                connection_id = %self.id,
                task = ?event.task,
                error = %err,
                "connection broken"
            );
        }

        let mut lifecycle = Lifecycle::Live;

        match event.task {
            Task::Query => {
                let in_flight = match std::mem::replace(&mut self.state, State::Idle) {
                    State::Busy(in_flight) => Some(in_flight),
                    other => {
                        self.state = other;
                        None
                    }
                };

                if broken.is_some() {
                    self.state = State::Disconnected;
                } else if in_flight.is_some() {
                    lifecycle = self.process(cx);
                }

                match in_flight {
                    Some(InFlight { query, logger }) => {
                        let outcome = event.into_outcome();
                        logger.finish(query.command(), outcome.is_err(), cx.log_settings);
                        cx.deferred.complete(query, outcome);
                    }
                    None => tracing::warn!(
                        target: "pgdispatch::connection",
                        connection_id = %self.id,
                        "query event with no query in flight"
                    ),
                }
            }

            Task::Connect if event.broken => {
                // a session can break outside of any query; whatever was in flight
                // still gets an answer
                if let State::Busy(InFlight { query, logger }) =
                    std::mem::replace(&mut self.state, State::Disconnected)
                {
                    logger.finish(query.command(), true, cx.log_settings);
                    cx.deferred.complete(query, Err(break_error(&event)));
                }
            }

            Task::Connect => {
                if matches!(self.state, State::Connecting) {
                    tracing::debug!(
                        target: "pgdispatch::connection",
                        connection_id = %self.id,
                        session = %self.session,
                        "connection established"
                    );

                    self.state = State::Idle;
                    lifecycle = self.process(cx);
                } else {
                    tracing::trace!(
                        target: "pgdispatch::connection",
                        connection_id = %self.id,
                        "ignoring duplicate connect event"
                    );
                }
            }
        }

        match broken {
            Some(err) => Lifecycle::Broken(err),
            None => lifecycle,
        }
    }

    /// Closes the session unless it is already gone. Idempotent.
    ///
    /// A session that is still connecting is closed as well. A query in flight is dropped
    /// without its callback being invoked.
    pub fn disconnect<D>(&mut self, driver: &mut D)
    where
        D: Driver<Output = R>,
    {
        let state = std::mem::replace(&mut self.state, State::Disconnected);

        match state {
            State::Idle | State::Busy(_) | State::Connecting => {
                driver.disconnect(self.session);
            }
            State::Disconnected => {}
        }
    }

    /// Marks the connection dead without touching the driver, failing whatever was in
    /// flight with `error`. Used once the driver has stopped recognizing the session.
    pub fn abandon(
        &mut self,
        error: Error,
        deferred: &mut Deferred<R>,
        log_settings: &LogSettings,
    ) {
        if let State::Busy(InFlight { query, logger }) =
            std::mem::replace(&mut self.state, State::Disconnected)
        {
            logger.finish(query.command(), true, log_settings);
            deferred.complete(query, Err(error));
        }
    }
}

fn break_error<R>(event: &DriverEvent<R>) -> Error {
    match &event.error {
        Some(err) => Error::Driver(err.clone()),
        None => Error::ConnectionBroken,
    }
}

impl<R> fmt::Debug for Connection<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("descriptor", &self.descriptor())
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Sessions {
        last: u64,
        sent: Vec<(u64, String)>,
        closed: Vec<u64>,
    }

    impl Driver for Sessions {
        type Output = ();

        fn connect(&mut self, _: &ConnectOptions) -> SessionId {
            self.last += 1;
            SessionId::new(self.last).unwrap()
        }

        fn exec(&mut self, session: SessionId, command: &str) {
            self.sent.push((session.get(), command.to_owned()));
        }

        fn disconnect(&mut self, session: SessionId) {
            self.closed.push(session.get());
        }
    }

    struct Harness {
        driver: Sessions,
        queue: QueryQueue<()>,
        deferred: Deferred<()>,
        log_settings: LogSettings,
    }

    impl Harness {
        fn new() -> Self {
            Harness {
                driver: Sessions::default(),
                queue: QueryQueue::new(),
                deferred: Deferred::new(),
                log_settings: LogSettings::default(),
            }
        }

        fn cx(&mut self) -> Context<'_, Sessions> {
            Context {
                driver: &mut self.driver,
                queue: &mut self.queue,
                deferred: &mut self.deferred,
                log_settings: &self.log_settings,
            }
        }
    }

    #[test]
    fn it_has_no_descriptor_until_connected() {
        let mut h = Harness::new();
        let mut conn = Connection::connect(&mut h.driver, &ConnectOptions::new());

        assert_eq!(conn.state(), ConnectionState::Connecting);
        assert_eq!(conn.descriptor(), None);

        h.queue.push(Query::new("SELECT 1"));
        let session = conn.session();
        let lifecycle = conn.handle_event(DriverEvent::connected(session), &mut h.cx());

        assert!(matches!(lifecycle, Lifecycle::Live));
        assert_eq!(conn.state(), ConnectionState::Busy);
        assert_eq!(conn.descriptor(), Some(session));
        assert_eq!(h.driver.sent, [(1, "SELECT 1".to_owned())]);
    }

    #[test]
    fn it_ignores_process_unless_idle() {
        let mut h = Harness::new();
        let mut conn = Connection::connect(&mut h.driver, &ConnectOptions::new());

        h.queue.push(Query::new("SELECT 1"));

        assert!(matches!(conn.process(&mut h.cx()), Lifecycle::Live));
        assert_eq!(conn.state(), ConnectionState::Connecting);
        assert_eq!(h.queue.len(), 1);
        assert!(h.driver.sent.is_empty());
    }

    #[test]
    fn it_releases_itself_when_the_queue_is_empty() {
        let mut h = Harness::new();
        let mut conn = Connection::connect(&mut h.driver, &ConnectOptions::new());
        let session = conn.session();

        let lifecycle = conn.handle_event(DriverEvent::connected(session), &mut h.cx());

        assert!(matches!(lifecycle, Lifecycle::Released));
        assert_eq!(conn.state(), ConnectionState::Disconnected);
        assert_eq!(h.driver.closed, [1]);
    }

    #[test]
    fn it_reports_a_failed_connect_as_broken() {
        let mut h = Harness::new();
        let mut conn = Connection::connect(&mut h.driver, &ConnectOptions::new());
        let session = conn.session();

        let lifecycle = conn.handle_event(
            DriverEvent::connect_failed(session, "password authentication failed"),
            &mut h.cx(),
        );

        let err = match lifecycle {
            Lifecycle::Broken(err) => err,
            other => panic!("expected a broken connection, got {other:?}"),
        };
        assert_eq!(
            err.to_string(),
            "error returned from driver: password authentication failed"
        );
        assert_eq!(conn.state(), ConnectionState::Disconnected);
        // the driver already considers the session dead
        assert!(h.driver.closed.is_empty());
    }

    #[test]
    fn it_ignores_events_after_disconnect() {
        let mut h = Harness::new();
        let mut conn = Connection::connect(&mut h.driver, &ConnectOptions::new());
        let session = conn.session();

        conn.disconnect(&mut h.driver);
        conn.disconnect(&mut h.driver);
        assert_eq!(h.driver.closed, [1]);

        let lifecycle = conn.handle_event(DriverEvent::query_ok(session, ()), &mut h.cx());

        assert!(matches!(lifecycle, Lifecycle::Live));
        assert_eq!(conn.state(), ConnectionState::Disconnected);
        assert_eq!(h.deferred.len(), 0);
    }

    #[test]
    fn it_assigns_increasing_ids() {
        let a = ConnectionId::next();
        let b = ConnectionId::next();

        assert_ne!(a, b);
        assert!(b.0 > a.0);
    }
}
