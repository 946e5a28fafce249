use async_trait::async_trait;
use std::io;

/// Server-reported status of a connection's transaction block.
///
/// Reflects (but is not equal to) libpq's `PGTransactionStatusType`. A pool
/// must only reuse connections whose status is [`TransactionStatus::Idle`];
/// a connection returned with any other status shall be closed instead of
/// collected back into the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionStatus {
    /// status is unknown due to a bad or invalid connection
    Unknown,
    /// idle outside of any transaction block; the connection can be reused
    Idle,
    /// command execution is in progress
    Active,
    /// idle, but within a transaction block
    Transaction,
    /// idle, within a failed transaction block
    Error,
}

/// Lowest-layer transport beneath a [`Connection`](crate::Connection).
///
/// Implementations perform the actual byte I/O of the wire protocol and are
/// treated as opaque collaborators: this crate only needs readiness
/// notification and simple statement execution from them. Query execution and
/// result decoding live entirely on the other side of this seam.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Wait until the underlying I/O channel is readable
    async fn wait_read(&self) -> io::Result<()>;

    /// Wait until the underlying I/O channel is writable
    async fn wait_write(&self) -> io::Result<()>;

    /// Run a set of SQL statements using the simple query protocol, returning
    /// the server-reported transaction status afterwards
    async fn batch_execute(&mut self, statement: &str) -> io::Result<TransactionStatus>;
}
