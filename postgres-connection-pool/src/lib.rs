//! A bounded asynchronous connection pool for Postgres.
//!
//! The pool stores established connections for reuse, creating new ones up to
//! its capacity and queueing requesters (first in, first out) when every
//! connection is in use. Idle connections are reused most-recently-released
//! first and are reclaimed lazily once they outlive the configured idle
//! timeout or lifespan. The pool implements
//! [`Provide`](postgres_connection::Provide), so callers built against that
//! trait work identically against a pool or a direct connection factory.
#![deny(unreachable_pub, missing_docs)]

mod configuration;
mod pool;

pub use configuration::{Configuration, ConfigurationError, Timeouts};
pub use pool::{Error, Pool, PooledConnection, Stats};
