use crate::{
    oid::OidMap,
    transport::{TransactionStatus, Transport},
};
use parking_lot::Mutex;
use std::{
    fmt, io,
    sync::atomic::{AtomicBool, Ordering},
    time::Duration,
};
use thiserror::Error;
use tokio::{
    sync::{Mutex as WaitLock, Notify},
    time::Instant,
};

/// Errors related to the lifecycle of a single connection
#[derive(Debug, Error)]
pub enum Error {
    /// Operating on a connection that has been closed
    #[error("Connection has been closed")]
    Closed,

    /// Operating on a connection in an unrecoverable error state
    #[error("Connection is in a bad state")]
    Bad,

    /// A pending asynchronous wait was aborted by `close` or `cancel`
    #[error("Asynchronous wait was cancelled")]
    Cancelled,

    /// A second wait of the same kind was requested while one is in flight
    #[error("Another wait of the same kind is already in progress")]
    WaitBusy,

    /// I/O failure reported by the transport
    #[error("I/O error on the connection: {0}")]
    Io(#[from] io::Error),

    /// Network or authentication failure while establishing a connection
    #[error("Error establishing the connection: {0}")]
    Connect(#[source] io::Error),

    /// Deadline elapsed while establishing a connection
    #[error("Timed out establishing the connection")]
    Timeout,
}

/// The two independent readiness directions of a connection
#[derive(Clone, Copy)]
enum Direction {
    Read,
    Write,
}

impl Direction {
    fn as_str(self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Write => "write",
        }
    }
}

/// A live database session wrapping the lowest-layer transport.
///
/// Connections track their own health (open/bad flags and the
/// server-reported transaction status), an error context describing the most
/// recent failure, and the oid map used by the result-decoding layer.
/// Readiness waits are independent per direction, limited to one outstanding
/// wait of each kind, and are woken with a cancellation error by [`close`]
/// or [`cancel`] so that no waiter is left dangling.
///
/// [`close`]: Connection::close
/// [`cancel`]: Connection::cancel
pub struct Connection {
    transport: Box<dyn Transport>,
    open: AtomicBool,
    bad: AtomicBool,
    cancel: Notify,
    read_wait: WaitLock<()>,
    write_wait: WaitLock<()>,
    error_context: Mutex<Option<String>>,
    transaction_status: Mutex<TransactionStatus>,
    oid_map: OidMap,
    opened_at: Instant,
}

impl Connection {
    /// Wrap a freshly established transport in a connection
    pub fn new(transport: Box<dyn Transport>) -> Self {
        Self {
            transport,
            open: AtomicBool::new(true),
            bad: AtomicBool::new(false),
            cancel: Notify::new(),
            read_wait: WaitLock::new(()),
            write_wait: WaitLock::new(()),
            error_context: Mutex::new(None),
            transaction_status: Mutex::new(TransactionStatus::Idle),
            oid_map: OidMap::new(),
            opened_at: Instant::now(),
        }
    }

    /// Check that the connection has not been closed
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    /// Check whether the connection is in an unrecoverable error state
    pub fn is_bad(&self) -> bool {
        self.bad.load(Ordering::Acquire)
    }

    /// Flag the connection as unrecoverable so that it is evicted instead of
    /// reused by its provider
    pub fn mark_bad(&self) {
        self.bad.store(true, Ordering::Release);
    }

    /// Close the connection, waking any pending readiness wait with a
    /// cancellation error. Closing an already-closed connection is a no-op.
    pub fn close(&self) {
        if self.open.swap(false, Ordering::AcqRel) {
            *self.transaction_status.lock() = TransactionStatus::Unknown;
            self.cancel.notify_waiters();

            tracing::debug!("Connection closed");
        }
    }

    /// Abort any in-flight readiness waits with a cancellation error,
    /// leaving the connection open
    pub fn cancel(&self) {
        self.cancel.notify_waiters();
    }

    /// Wait until the connection's I/O channel is readable
    pub async fn wait_read(&self) -> Result<(), Error> {
        self.wait(Direction::Read).await
    }

    /// Wait until the connection's I/O channel is writable
    pub async fn wait_write(&self) -> Result<(), Error> {
        self.wait(Direction::Write).await
    }

    async fn wait(&self, direction: Direction) -> Result<(), Error> {
        let wait_lock = match direction {
            Direction::Read => &self.read_wait,
            Direction::Write => &self.write_wait,
        };

        // one outstanding wait per direction
        let _guard = wait_lock.try_lock().map_err(|_| Error::WaitBusy)?;

        if !self.is_open() {
            return Err(Error::Closed);
        }

        let readiness = async {
            match direction {
                Direction::Read => self.transport.wait_read().await,
                Direction::Write => self.transport.wait_write().await,
            }
        };

        tokio::select! {
            result = readiness => result.map_err(|error| {
                self.mark_bad();
                self.set_error_context(format!(
                    "I/O failure while waiting to {}: {}",
                    direction.as_str(),
                    error
                ));

                Error::Io(error)
            }),
            _ = self.cancel.notified() => Err(Error::Cancelled),
        }
    }

    /// Run statements through the transport's simple query protocol,
    /// refreshing the server-reported transaction status on success
    pub async fn batch_execute(&mut self, statement: &str) -> Result<TransactionStatus, Error> {
        if !self.is_open() {
            return Err(Error::Closed);
        }

        if self.is_bad() {
            return Err(Error::Bad);
        }

        match self.transport.batch_execute(statement).await {
            Ok(status) => {
                *self.transaction_status.lock() = status;

                Ok(status)
            }
            Err(error) => {
                self.mark_bad();
                self.set_error_context(format!("Error executing statement: {error}"));

                Err(Error::Io(error))
            }
        }
    }

    /// The server-reported status of the connection's transaction block
    pub fn transaction_status(&self) -> TransactionStatus {
        *self.transaction_status.lock()
    }

    /// Additional human-readable context for the most recent failure on the
    /// connection, if any
    pub fn get_error_context(&self) -> Option<String> {
        self.error_context.lock().clone()
    }

    /// Attach human-readable context describing the most recent failure
    pub fn set_error_context(&self, context: impl Into<String>) {
        *self.error_context.lock() = Some(context.into());
    }

    /// Reset the error context
    pub fn clear_error_context(&self) {
        *self.error_context.lock() = None;
    }

    /// The raw transport beneath the connection, for advanced use by the
    /// protocol and result-decoding layers
    pub fn native_handle(&self) -> &dyn Transport {
        self.transport.as_ref()
    }

    /// The oid-to-decoder mapping used when decoding query results
    pub fn oid_map(&self) -> &OidMap {
        &self.oid_map
    }

    /// Mutable access to the oid-to-decoder mapping
    pub fn oid_map_mut(&mut self) -> &mut OidMap {
        &mut self.oid_map
    }

    /// Elapsed time since the connection was established
    pub fn age(&self) -> Duration {
        self.opened_at.elapsed()
    }
}

impl AsRef<Connection> for Connection {
    fn as_ref(&self) -> &Connection {
        self
    }
}

impl AsMut<Connection> for Connection {
    fn as_mut(&mut self) -> &mut Connection {
        self
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("Connection")
            .field("open", &self.is_open())
            .field("bad", &self.is_bad())
            .field("transaction_status", &self.transaction_status())
            .finish()
    }
}

#[cfg(test)]
mod test {
    use super::{Connection, Error};
    use crate::transport::{TransactionStatus, Transport};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::{collections::VecDeque, future, io, sync::Arc};

    /// How a stubbed readiness direction behaves
    #[derive(Clone, Copy)]
    enum Readiness {
        Ready,
        Pending,
        Broken,
    }

    /// Transport stub with scripted readiness and statement results
    struct StubTransport {
        read: Readiness,
        write: Readiness,
        statements: Arc<Mutex<Vec<String>>>,
        results: Mutex<VecDeque<io::Result<TransactionStatus>>>,
    }

    impl Default for StubTransport {
        fn default() -> Self {
            Self {
                read: Readiness::Pending,
                write: Readiness::Pending,
                statements: Arc::default(),
                results: Mutex::default(),
            }
        }
    }

    impl StubTransport {
        async fn ready(readiness: Readiness) -> io::Result<()> {
            match readiness {
                Readiness::Ready => Ok(()),
                Readiness::Pending => future::pending().await,
                Readiness::Broken => Err(io::Error::new(io::ErrorKind::BrokenPipe, "broken pipe")),
            }
        }
    }

    #[async_trait]
    impl Transport for StubTransport {
        async fn wait_read(&self) -> io::Result<()> {
            Self::ready(self.read).await
        }

        async fn wait_write(&self) -> io::Result<()> {
            Self::ready(self.write).await
        }

        async fn batch_execute(&mut self, statement: &str) -> io::Result<TransactionStatus> {
            self.statements.lock().push(statement.to_string());

            self.results
                .lock()
                .pop_front()
                .unwrap_or(Ok(TransactionStatus::Idle))
        }
    }

    #[tokio::test]
    async fn resolves_waits_when_the_channel_is_ready() {
        let connection = Connection::new(Box::new(StubTransport {
            read: Readiness::Ready,
            write: Readiness::Ready,
            ..StubTransport::default()
        }));

        connection.wait_read().await.expect("Error waiting for read readiness");
        connection.wait_write().await.expect("Error waiting for write readiness");
    }

    #[tokio::test]
    async fn cancel_wakes_pending_waits() {
        let connection = Connection::new(Box::new(StubTransport::default()));

        let (read, write, _) = tokio::join!(connection.wait_read(), connection.wait_write(), async {
            tokio::task::yield_now().await;
            connection.cancel();
        });

        assert!(matches!(read, Err(Error::Cancelled)));
        assert!(matches!(write, Err(Error::Cancelled)));
        assert!(connection.is_open(), "cancel should leave the connection open");
    }

    #[tokio::test]
    async fn close_wakes_pending_waits_and_is_idempotent() {
        let connection = Connection::new(Box::new(StubTransport::default()));

        let (read, _) = tokio::join!(connection.wait_read(), async {
            tokio::task::yield_now().await;
            connection.close();
        });

        assert!(matches!(read, Err(Error::Cancelled)));
        assert!(!connection.is_open());
        assert_eq!(connection.transaction_status(), TransactionStatus::Unknown);

        // closing again is a no-op
        connection.close();
        assert!(!connection.is_open());

        let wait = connection.wait_read().await;
        assert!(matches!(wait, Err(Error::Closed)));
    }

    #[tokio::test]
    async fn rejects_a_second_wait_of_the_same_kind() {
        let connection = Connection::new(Box::new(StubTransport::default()));

        let (first, _) = tokio::join!(connection.wait_read(), async {
            tokio::task::yield_now().await;

            let second = connection.wait_read().await;
            assert!(matches!(second, Err(Error::WaitBusy)));

            // a write wait is an independent suspension point
            let (write, _) = tokio::join!(connection.wait_write(), async {
                tokio::task::yield_now().await;
                connection.cancel();
            });
            assert!(matches!(write, Err(Error::Cancelled)));
        });

        assert!(matches!(first, Err(Error::Cancelled)));
    }

    #[tokio::test]
    async fn readiness_failures_mark_the_connection_bad() {
        let connection = Connection::new(Box::new(StubTransport {
            read: Readiness::Broken,
            ..StubTransport::default()
        }));

        let wait = connection.wait_read().await;

        assert!(matches!(wait, Err(Error::Io(..))));
        assert!(connection.is_bad());
        assert!(connection
            .get_error_context()
            .expect("missing error context")
            .contains("broken pipe"));
    }

    #[tokio::test]
    async fn batch_execute_refreshes_transaction_status() {
        let transport = StubTransport::default();
        let statements = Arc::clone(&transport.statements);
        transport
            .results
            .lock()
            .push_back(Ok(TransactionStatus::Transaction));

        let mut connection = Connection::new(Box::new(transport));

        let status = connection
            .batch_execute("BEGIN")
            .await
            .expect("Error executing statement");

        assert_eq!(status, TransactionStatus::Transaction);
        assert_eq!(connection.transaction_status(), TransactionStatus::Transaction);
        assert_eq!(statements.lock().as_slice(), ["BEGIN"]);
    }

    #[tokio::test]
    async fn batch_execute_failures_mark_the_connection_bad() {
        let transport = StubTransport::default();
        transport
            .results
            .lock()
            .push_back(Err(io::Error::new(io::ErrorKind::Other, "server error")));

        let mut connection = Connection::new(Box::new(transport));

        let result = connection.batch_execute("SELECT 1").await;

        assert!(matches!(result, Err(Error::Io(..))));
        assert!(connection.is_bad());
        assert!(connection
            .get_error_context()
            .expect("missing error context")
            .contains("server error"));

        // operations on a bad connection are refused
        let repeat = connection.batch_execute("SELECT 1").await;
        assert!(matches!(repeat, Err(Error::Bad)));
    }

    #[tokio::test]
    async fn closed_connections_refuse_statements() {
        let mut connection = Connection::new(Box::new(StubTransport::default()));
        connection.close();

        let result = connection.batch_execute("SELECT 1").await;

        assert!(matches!(result, Err(Error::Closed)));
    }
}
