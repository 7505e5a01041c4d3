//! Runs a [`Pool`] on Tokio.
//!
//! The pool moves into a dedicated task that is the only writer of its state. Application
//! commands arrive through [`PoolHandle`]s and driver events through an [`EventSender`];
//! the task applies them one at a time and delivers callbacks once each has been applied.

use std::fmt::{self, Debug, Formatter};

use futures_channel::oneshot;
use tokio::sync::mpsc;

use crate::driver::{Driver, DriverEvent};
use crate::error::Error;
use crate::pool::Pool;
use crate::query::Query;

/// Where a driver posts events for the sessions of one pool.
pub struct EventSender<R>(mpsc::UnboundedSender<DriverEvent<R>>);

/// The pool task's end of [`event_channel`].
pub struct EventReceiver<R>(mpsc::UnboundedReceiver<DriverEvent<R>>);

/// Creates the channel a driver uses to report session events to a spawned pool.
pub fn event_channel<R>() -> (EventSender<R>, EventReceiver<R>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (EventSender(tx), EventReceiver(rx))
}

impl<R> EventSender<R> {
    /// Posts `event` for the pool task. Returns `false` if the pool is gone, in which
    /// case the session should simply be released.
    pub fn send(&self, event: DriverEvent<R>) -> bool {
        self.0.send(event).is_ok()
    }
}

impl<R> Clone for EventSender<R> {
    fn clone(&self) -> Self {
        EventSender(self.0.clone())
    }
}

impl<R> Debug for EventSender<R> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventSender").finish_non_exhaustive()
    }
}

enum Command<R> {
    Exec(Query<R>),
    Destroy(oneshot::Sender<()>),
}

/// A cloneable handle to a pool running in its own task.
///
/// When the last handle is dropped the pool is destroyed.
pub struct PoolHandle<R> {
    commands: mpsc::UnboundedSender<Command<R>>,
}

impl<R> Clone for PoolHandle<R> {
    fn clone(&self) -> Self {
        PoolHandle {
            commands: self.commands.clone(),
        }
    }
}

impl<R> Debug for PoolHandle<R> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolHandle")
            .field("is_closed", &self.commands.is_closed())
            .finish()
    }
}

impl<R: Send + 'static> PoolHandle<R> {
    /// Submit a query. Never blocks and never fails here.
    ///
    /// If the pool task is gone, the query's callback is invoked right away, on the
    /// caller's stack, with [`Error::PoolClosed`]. This is the only outcome not delivered
    /// by the pool task, so a callback that submits more work from here must not hold
    /// locks it would also take in that path.
    pub fn exec(&self, query: impl Into<Query<R>>) {
        if let Err(mpsc::error::SendError(Command::Exec(query))) =
            self.commands.send(Command::Exec(query.into()))
        {
            query.complete(Err(Error::PoolClosed));
        }
    }

    /// Submit a query and wait for its outcome.
    ///
    /// Resolves to [`Error::PoolClosed`] if the pool is destroyed before the query
    /// completes.
    pub async fn fetch(&self, command: impl Into<String>) -> Result<R, Error> {
        let (tx, rx) = oneshot::channel();

        self.exec(Query::with_callback(command, move |outcome| {
            let _ = tx.send(outcome);
        }));

        rx.await.unwrap_or(Err(Error::PoolClosed))
    }

    /// Destroy the pool and wait for its task to finish.
    ///
    /// See [`Pool::destroy`] for what happens to queued and in-flight queries.
    pub async fn destroy(&self) {
        let (tx, rx) = oneshot::channel();

        if self.commands.send(Command::Destroy(tx)).is_ok() {
            // canceled if another handle destroyed the pool first
            let _ = rx.await;
        }
    }

    /// Returns `true` once the pool task has stopped.
    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }
}

impl<D> Pool<D>
where
    D: Driver + Send + 'static,
    D::Output: Send + 'static,
{
    /// Move the pool into a new Tokio task and return a handle to it.
    ///
    /// `events` must be the receiving end of the channel the driver posts to.
    ///
    /// # Panics
    /// If called outside of a Tokio runtime.
    pub fn spawn(self, events: EventReceiver<D::Output>) -> PoolHandle<D::Output> {
        let (tx, rx) = mpsc::unbounded_channel();

        tokio::spawn(run(self, rx, events.0));

        PoolHandle { commands: tx }
    }
}

async fn run<D: Driver>(
    mut pool: Pool<D>,
    mut commands: mpsc::UnboundedReceiver<Command<D::Output>>,
    mut events: mpsc::UnboundedReceiver<DriverEvent<D::Output>>,
) {
    let mut events_open = true;

    loop {
        tokio::select! {
            biased;

            event = events.recv(), if events_open => match event {
                Some(event) => pool.handle_event(event),
                None => {
                    tracing::warn!(
                        target: "pgdispatch::pool",
                        "driver event channel closed; in-flight queries will not complete"
                    );
                    events_open = false;
                }
            },

            command = commands.recv() => match command {
                Some(Command::Exec(query)) => pool.exec(query),
                Some(Command::Destroy(done)) => {
                    pool.destroy();
                    pool.run_pending();
                    let _ = done.send(());
                    return;
                }
                None => {
                    tracing::debug!(
                        target: "pgdispatch::pool",
                        "all pool handles dropped"
                    );
                    pool.destroy();
                    pool.run_pending();
                    return;
                }
            },
        }

        pool.run_pending();
    }
}
