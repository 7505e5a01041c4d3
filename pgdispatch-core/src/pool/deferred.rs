use std::collections::VecDeque;
use std::fmt::{self, Debug, Formatter};

use crate::error::Error;
use crate::query::Query;

/// Handler for connection-level failures.
pub type BreakHandler = Box<dyn FnMut(Error) + Send + 'static>;

/// Application callbacks produced while the pool was changing state.
///
/// Nothing in here runs until the pool has finished the transition that produced it;
/// [`Pool::run_pending`](super::Pool::run_pending) drains it afterwards, in order.
pub(crate) struct Deferred<R> {
    pending: VecDeque<Delivery<R>>,
}

enum Delivery<R> {
    Complete(Query<R>, Result<R, Error>),
    Break(Error),
}

impl<R> Deferred<R> {
    pub fn new() -> Self {
        Deferred {
            pending: VecDeque::new(),
        }
    }

    /// Schedules `query`'s callback. Queries without a callback are dropped right away.
    pub fn complete(&mut self, query: Query<R>, outcome: Result<R, Error>) {
        if query.has_callback() {
            self.pending.push_back(Delivery::Complete(query, outcome));
        }
    }

    pub fn notify_break(&mut self, error: Error) {
        self.pending.push_back(Delivery::Break(error));
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Runs everything scheduled so far and returns how many deliveries were made.
    pub fn run(&mut self, on_break: Option<&mut BreakHandler>) -> usize {
        let pending = std::mem::take(&mut self.pending);
        let count = pending.len();
        let mut on_break = on_break;

        for delivery in pending {
            match delivery {
                Delivery::Complete(query, outcome) => query.complete(outcome),
                Delivery::Break(error) => {
                    if let Some(handler) = on_break.as_deref_mut() {
                        handler(error);
                    }
                }
            }
        }

        count
    }
}

impl<R> Debug for Deferred<R> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Deferred")
            .field("pending", &self.pending.len())
            .finish()
    }
}
