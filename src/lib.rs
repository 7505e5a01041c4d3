//! A queueing connection pool for PostgreSQL drivers.
//!
//! `pgdispatch` sits between an application and a PostgreSQL client library. The
//! application submits queries with [`Pool::exec`]; they wait in one FIFO queue and are
//! handed, one at a time, to whichever pooled session frees up first. The pool opens
//! sessions on demand up to a fixed bound and closes them again as soon as the queue runs
//! dry.
//!
//! The client library plugs in through the [`Driver`] trait and reports what happens on
//! its sessions as [`DriverEvent`]s.
//!
//! ```rust,ignore
//! use pgdispatch::{PoolOptions, Query};
//!
//! let (events_tx, events_rx) = pgdispatch::rt::event_channel();
//! let driver = MyDriver::new(events_tx);
//!
//! let pool = PoolOptions::new()
//!     .max_connections(4)
//!     .on_break(|err| log::warn!("lost a session: {err}"))
//!     .build(driver, "postgres://app@localhost/app".parse()?)?
//!     .spawn(events_rx);
//!
//! let rows = pool.fetch("SELECT * FROM accounts").await?;
//! ```
#![cfg_attr(docsrs, feature(doc_cfg))]

// Modules
pub use pgdispatch_core::{driver, error, logger, options, pool, query};

// Types
pub use pgdispatch_core::{
    Callback, ConnectOptions, ConnectionId, ConnectionState, Driver, DriverError, DriverEvent,
    Error, Pool, PoolOptions, Query, Result, SessionId, Task,
};

#[cfg(feature = "_rt-tokio")]
#[cfg_attr(docsrs, doc(cfg(feature = "runtime-tokio")))]
pub use pgdispatch_core::rt::{self, event_channel, EventReceiver, EventSender, PoolHandle};
