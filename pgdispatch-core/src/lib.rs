//! Core of pgdispatch.
//!
//! Generally, you want to use the `pgdispatch` crate instead of this one.

#![warn(future_incompatible, rust_2018_idioms)]
#![cfg_attr(docsrs, feature(doc_cfg))]

#[macro_use]
pub mod error;

#[macro_use]
pub mod logger;

pub mod connection;
pub mod driver;
pub mod options;
pub mod pool;
pub mod query;
pub mod queue;

#[cfg(feature = "_rt-tokio")]
#[cfg_attr(docsrs, doc(cfg(feature = "runtime-tokio")))]
pub mod rt;

pub use connection::{ConnectionId, ConnectionState};
pub use driver::{Driver, DriverEvent, SessionId, Task};
pub use error::{BoxDynError, DriverError, Error, Result};
pub use options::ConnectOptions;
pub use pool::{Pool, PoolOptions};
pub use query::{Callback, Query};
