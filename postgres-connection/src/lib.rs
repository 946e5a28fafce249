//! Asynchronous connection primitives for Postgres: the lowest-layer
//! [`Transport`] seam, a [`Connection`] session wrapper with cancellable
//! readiness waits, and the [`Provide`] trait abstracting over "how to get a
//! connection" so that callers never care whether they hold a direct factory
//! or a pool.
#![deny(unreachable_pub, missing_docs)]

pub use async_trait::async_trait;

mod connection;
mod endpoint;
mod oid;
mod provider;
mod transport;

pub use connection::{Connection, Error};
pub use endpoint::Endpoint;
pub use oid::{Oid, OidMap};
pub use provider::{Connect, ConnectionInfo, Provide};
pub use transport::{TransactionStatus, Transport};
