//! Transaction lifecycle management over any Postgres connection provider.
//!
//! A [`Transaction`] acquires a connection through a
//! [`Provide`](postgres_connection::Provide) implementation (a pool or a
//! direct factory), issues a `BEGIN` parameterized by
//! [`TransactionOptions`], and guarantees that the connection goes back to
//! its provider on every exit path: explicit commit or rollback, terminal
//! failure, or abandonment (in which case a best-effort `ROLLBACK` runs
//! first so a connection is never reused mid-transaction).
#![deny(unreachable_pub, missing_docs)]

mod options;
mod transaction;

pub use options::{DeferrableMode, IsolationLevel, TransactionMode, TransactionOptions};
pub use transaction::{Error, State, Transaction};
