use std::collections::VecDeque;

use crate::query::Query;

/// Queries submitted to the pool and not yet picked up by a connection, in submission order.
#[derive(Debug)]
pub struct QueryQueue<R> {
    queries: VecDeque<Query<R>>,
}

impl<R> QueryQueue<R> {
    pub fn new() -> Self {
        QueryQueue {
            queries: VecDeque::new(),
        }
    }

    /// Appends at the tail. Never rejects.
    pub fn push(&mut self, query: Query<R>) {
        self.queries.push_back(query);
    }

    /// Removes and returns the oldest query, or `None` if nothing is pending.
    pub fn shift(&mut self) -> Option<Query<R>> {
        self.queries.pop_front()
    }

    pub fn len(&self) -> usize {
        self.queries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queries.is_empty()
    }

    /// Removes every pending query, oldest first.
    pub fn drain(&mut self) -> impl Iterator<Item = Query<R>> + '_ {
        self.queries.drain(..)
    }
}

impl<R> Default for QueryQueue<R> {
    fn default() -> Self {
        Self::new()
    }
}
