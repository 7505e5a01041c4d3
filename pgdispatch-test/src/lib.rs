use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use parking_lot::Mutex;

use pgdispatch::rt::EventSender;
use pgdispatch::{ConnectOptions, Driver, DriverEvent, SessionId};

pub fn setup_if_needed() {
    let _ = dotenvy::dotenv();
    let _ = env_logger::builder().is_test(true).try_init();
}

/// One call the pool made into a driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Connect(SessionId),
    Exec(SessionId, String),
    Disconnect(SessionId),
}

fn session(raw: u64) -> SessionId {
    SessionId::new(raw).expect("session numbers start at 1")
}

/// Shorthand for `SessionId::new(raw).unwrap()`.
pub fn sid(raw: u64) -> SessionId {
    session(raw)
}

/// A driver that only records what it is asked to do.
///
/// The test decides which events happen and when; the helpers that build events also
/// keep track of which sessions are connecting and which queries are running.
#[derive(Debug, Default)]
pub struct ManualDriver {
    last_session: u64,
    calls: Vec<Call>,
    connecting: BTreeSet<SessionId>,
    running: BTreeMap<SessionId, String>,
    connect_options: Vec<String>,
}

impl ManualDriver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> &[Call] {
        &self.calls
    }

    pub fn last_call(&self) -> Option<&Call> {
        self.calls.last()
    }

    pub fn connects(&self) -> usize {
        self.calls
            .iter()
            .filter(|call| matches!(call, Call::Connect(_)))
            .count()
    }

    /// The connection strings every `connect` received, in order.
    pub fn connect_options(&self) -> &[String] {
        &self.connect_options
    }

    /// Sessions that were opened and have not been answered or released yet.
    pub fn connecting(&self) -> Vec<SessionId> {
        self.connecting.iter().copied().collect()
    }

    /// Queries on the wire, by session.
    pub fn running(&self) -> Vec<(SessionId, String)> {
        self.running
            .iter()
            .map(|(session, command)| (*session, command.clone()))
            .collect()
    }

    pub fn connected(&mut self, session: SessionId) -> DriverEvent<String> {
        self.connecting.remove(&session);
        DriverEvent::connected(session)
    }

    pub fn connect_failed(&mut self, session: SessionId, error: &str) -> DriverEvent<String> {
        self.connecting.remove(&session);
        DriverEvent::connect_failed(session, error)
    }

    /// Completes the query running on `session`, echoing its command as the result.
    pub fn complete(&mut self, session: SessionId) -> DriverEvent<String> {
        let command = self.running.remove(&session).unwrap_or_default();
        DriverEvent::query_ok(session, command)
    }

    pub fn fail(&mut self, session: SessionId, error: &str) -> DriverEvent<String> {
        self.running.remove(&session);
        DriverEvent::query_failed(session, error)
    }

    pub fn break_session(&mut self, session: SessionId, error: &str) -> DriverEvent<String> {
        self.running.remove(&session);
        DriverEvent::query_broken(session, error)
    }
}

impl Driver for ManualDriver {
    type Output = String;

    fn connect(&mut self, options: &ConnectOptions) -> SessionId {
        self.last_session += 1;
        let session = session(self.last_session);

        self.calls.push(Call::Connect(session));
        self.connecting.insert(session);
        self.connect_options.push(options.to_conninfo());

        session
    }

    fn exec(&mut self, session: SessionId, command: &str) {
        self.calls.push(Call::Exec(session, command.to_owned()));
        self.running.insert(session, command.to_owned());
    }

    fn disconnect(&mut self, session: SessionId) {
        self.calls.push(Call::Disconnect(session));
        self.connecting.remove(&session);
        self.running.remove(&session);
    }
}

#[derive(Debug, Default)]
struct MockState {
    last_session: u64,
    calls: Vec<Call>,
    refuse_connects: usize,
    held: BTreeMap<SessionId, String>,
}

/// A driver that answers on its own, through the pool's event channel.
///
/// Sessions connect successfully unless refused with [`MockHandle::refuse_connects`].
/// Commands are answered according to their first word:
///
/// * `ERROR ...` fails the query, the session stays usable;
/// * `BREAK ...` breaks the session mid-query;
/// * `HOLD ...` is never answered until the test calls [`MockHandle::release`];
/// * anything else succeeds with the command text as its result.
#[derive(Debug)]
pub struct MockDriver {
    events: EventSender<String>,
    state: Arc<Mutex<MockState>>,
}

/// Test-side view of a [`MockDriver`] that has been moved into a pool.
#[derive(Debug, Clone)]
pub struct MockHandle {
    events: EventSender<String>,
    state: Arc<Mutex<MockState>>,
}

impl MockDriver {
    pub fn new(events: EventSender<String>) -> (Self, MockHandle) {
        let state = Arc::new(Mutex::new(MockState::default()));

        let handle = MockHandle {
            events: events.clone(),
            state: state.clone(),
        };

        (MockDriver { events, state }, handle)
    }
}

impl Driver for MockDriver {
    type Output = String;

    fn connect(&mut self, _options: &ConnectOptions) -> SessionId {
        let mut state = self.state.lock();

        state.last_session += 1;
        let session = session(state.last_session);
        state.calls.push(Call::Connect(session));

        if state.refuse_connects > 0 {
            state.refuse_connects -= 1;
            self.events
                .send(DriverEvent::connect_failed(session, "connection refused"));
        } else {
            self.events.send(DriverEvent::connected(session));
        }

        session
    }

    fn exec(&mut self, session: SessionId, command: &str) {
        let mut state = self.state.lock();
        state.calls.push(Call::Exec(session, command.to_owned()));

        let event = match command.split_whitespace().next() {
            Some("ERROR") => DriverEvent::query_failed(session, command),
            Some("BREAK") => DriverEvent::query_broken(session, command),
            Some("HOLD") => {
                state.held.insert(session, command.to_owned());
                return;
            }
            _ => DriverEvent::query_ok(session, command.to_owned()),
        };

        self.events.send(event);
    }

    fn disconnect(&mut self, session: SessionId) {
        let mut state = self.state.lock();
        state.calls.push(Call::Disconnect(session));
        state.held.remove(&session);
    }
}

impl MockHandle {
    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().calls.clone()
    }

    pub fn connects(&self) -> usize {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|call| matches!(call, Call::Connect(_)))
            .count()
    }

    pub fn disconnects(&self) -> usize {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|call| matches!(call, Call::Disconnect(_)))
            .count()
    }

    /// Fails the next `n` connection attempts.
    pub fn refuse_connects(&self, n: usize) {
        self.state.lock().refuse_connects = n;
    }

    /// `HOLD` queries still waiting to be released, by session.
    pub fn held(&self) -> Vec<(SessionId, String)> {
        self.state
            .lock()
            .held
            .iter()
            .map(|(session, command)| (*session, command.clone()))
            .collect()
    }

    /// Completes the held query on `session` successfully.
    pub fn release(&self, session: SessionId) -> bool {
        let command = self.state.lock().held.remove(&session);

        match command {
            Some(command) => self.events.send(DriverEvent::query_ok(session, command)),
            None => false,
        }
    }

    /// Breaks `session` while its held query is in flight.
    pub fn break_session(&self, session: SessionId, error: &str) -> bool {
        self.state.lock().held.remove(&session);
        self.events.send(DriverEvent::query_broken(session, error))
    }
}
