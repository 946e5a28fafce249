use crate::configuration::{Configuration, ConfigurationError, Timeouts};
use parking_lot::Mutex;
use postgres_connection::{Connect, Connection, ConnectionInfo, Provide, TransactionStatus};
use std::{
    cmp,
    collections::VecDeque,
    fmt, io,
    ops::{Deref, DerefMut},
    sync::Arc,
};
use thiserror::Error;
use tokio::{
    sync::oneshot,
    time::{self, Instant},
};

/// Errors related to fetching connections from the pool
#[derive(Debug, Error)]
pub enum Error {
    /// Network or authentication failure while establishing a new connection
    #[error("Error establishing a new connection: {0}")]
    Connect(#[source] io::Error),

    /// Deadline elapsed while connecting or waiting in the queue
    #[error("Timed out waiting for a connection")]
    Timeout,

    /// Capacity reached and the waiter queue is full
    #[error("Connection pool exhausted: all connections are in use and the queue is full")]
    Exhausted,

    /// The pool was dropped while the request was queued
    #[error("Connection pool was closed")]
    Closed,

    /// Invalid pool configuration
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
}

impl From<postgres_connection::Error> for Error {
    fn from(error: postgres_connection::Error) -> Self {
        match error {
            postgres_connection::Error::Connect(error) => Self::Connect(error),
            postgres_connection::Error::Timeout => Self::Timeout,
            error => Self::Connect(io::Error::new(io::ErrorKind::Other, error)),
        }
    }
}

/// Point-in-time pool counters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stats {
    /// connections sitting idle in the pool
    pub idle: usize,
    /// connections checked out by callers or reserved for in-flight opens
    pub checked_out: usize,
    /// requests waiting in the queue
    pub waiters: usize,
}

/// An idle connection stamped with its release time
struct Idle {
    connection: Connection,
    since: Instant,
}

/// Handoff from a release to a queued waiter
enum Grant {
    /// reuse a connection just released by another caller
    Reuse(Connection),
    /// a slot freed up; the waiter opens its own connection
    Open,
}

struct Waiter {
    id: u64,
    grant: oneshot::Sender<Grant>,
}

/// Shared pool state; every mutation happens under one lock so that
/// acquire decisions, releases, and reclamation are atomic steps
/// relative to each other
struct State {
    idle: Vec<Idle>,
    checked_out: usize,
    waiters: VecDeque<Waiter>,
    next_waiter: u64,
}

impl State {
    fn total(&self) -> usize {
        self.idle.len() + self.checked_out
    }

    /// Close and drop idle connections that outlived the idle timeout or
    /// the lifespan
    fn reap(&mut self, configuration: &Configuration) {
        let now = Instant::now();

        self.idle.retain(|idle| {
            let expired = configuration
                .idle_timeout
                .map_or(false, |timeout| now.duration_since(idle.since) >= timeout)
                || configuration
                    .lifespan
                    .map_or(false, |lifespan| idle.connection.age() >= lifespan);

            if expired {
                tracing::debug!("Closing expired idle connection");
                idle.connection.close();
            }

            !expired
        });
    }

    /// Check out the most recently released healthy idle connection,
    /// closing any unhealthy ones found along the way
    fn checkout_idle(&mut self, configuration: &Configuration) -> Option<Connection> {
        while let Some(idle) = self.idle.pop() {
            let connection = idle.connection;

            let healthy = connection.is_open()
                && !connection.is_bad()
                && configuration
                    .lifespan
                    .map_or(true, |lifespan| connection.age() < lifespan);

            if healthy {
                self.checked_out += 1;

                return Some(connection);
            }

            connection.close();
        }

        None
    }

    /// Offer a free slot to queued waiters in FIFO order, skipping waiters
    /// that gave up
    fn offer_slot(&mut self) {
        while let Some(waiter) = self.waiters.pop_front() {
            if waiter.grant.send(Grant::Open).is_ok() {
                self.checked_out += 1;

                return;
            }
        }
    }
}

/// Asynchronous pool of reusable database connections.
///
/// Cloning the pool is cheap: clones share the same connections, counters,
/// and waiter queue. Each pool instance is independently synchronized; no
/// locks span multiple pools.
pub struct Pool<C> {
    inner: Arc<Inner<C>>,
}

struct Inner<C> {
    source: ConnectionInfo<C>,
    configuration: Configuration,
    timeouts: Timeouts,
    state: Mutex<State>,
}

impl<C> Clone for Pool<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C> Pool<C>
where
    C: Connect,
{
    /// Create a new pool over a direct connection source
    pub fn new(
        source: ConnectionInfo<C>,
        configuration: Configuration,
        timeouts: Timeouts,
    ) -> Result<Self, Error> {
        configuration.validate()?;

        Ok(Self {
            inner: Arc::new(Inner {
                source,
                configuration,
                timeouts,
                state: Mutex::new(State {
                    idle: Vec::new(),
                    checked_out: 0,
                    waiters: VecDeque::new(),
                    next_waiter: 0,
                }),
            }),
        })
    }

    /// Snapshot of the pool's idle, checked-out, and queued counts
    pub fn stats(&self) -> Stats {
        let state = self.inner.state.lock();

        Stats {
            idle: state.idle.len(),
            checked_out: state.checked_out,
            waiters: state.waiters.len(),
        }
    }

    /// Fetch an idle connection (most recently released first), open a new
    /// one when under capacity, or wait in line for the next one to free up
    #[tracing::instrument(skip(self))]
    pub async fn acquire(&self, deadline: Instant) -> Result<PooledConnection<C>, Error> {
        enum Decision {
            Reuse(Connection),
            Open,
            Wait(u64, oneshot::Receiver<Grant>),
        }

        let decision = {
            let mut state = self.inner.state.lock();
            state.reap(&self.inner.configuration);

            if let Some(connection) = state.checkout_idle(&self.inner.configuration) {
                tracing::debug!("Reusing idle connection from the pool");

                Decision::Reuse(connection)
            } else if state.total() < self.inner.configuration.capacity {
                // reserve the slot before releasing the lock
                state.checked_out += 1;

                Decision::Open
            } else if state.waiters.len() < self.inner.configuration.queue_capacity {
                let id = state.next_waiter;
                state.next_waiter += 1;

                let (grant, receiver) = oneshot::channel();
                state.waiters.push_back(Waiter { id, grant });

                tracing::debug!(waiters = state.waiters.len(), "Pool at capacity; queueing request");

                Decision::Wait(id, receiver)
            } else {
                return Err(Error::Exhausted);
            }
        };

        match decision {
            Decision::Reuse(connection) => Ok(self.lease(connection)),
            Decision::Open => self.open(deadline).await,
            Decision::Wait(id, receiver) => self.wait(id, receiver, deadline).await,
        }
    }

    /// Open a brand-new connection within the connect-phase budget.
    /// Assumes a slot has already been reserved; failure frees it.
    async fn open(&self, deadline: Instant) -> Result<PooledConnection<C>, Error> {
        let connect_deadline = cmp::min(deadline, Instant::now() + self.inner.timeouts.connect);

        match self.inner.source.connect(connect_deadline).await {
            Ok(connection) => {
                tracing::debug!("Opened new connection for the pool");

                Ok(self.lease(connection))
            }
            Err(error) => {
                self.free_slot();

                Err(Error::from(error))
            }
        }
    }

    /// Wait for a grant from a future release, bounded by the queue budget
    async fn wait(
        &self,
        id: u64,
        mut receiver: oneshot::Receiver<Grant>,
        deadline: Instant,
    ) -> Result<PooledConnection<C>, Error> {
        let queue_deadline = cmp::min(deadline, Instant::now() + self.inner.timeouts.queue);

        match time::timeout_at(queue_deadline, &mut receiver).await {
            Ok(Ok(Grant::Reuse(connection))) => Ok(self.lease(connection)),
            Ok(Ok(Grant::Open)) => self.open(deadline).await,
            Ok(Err(..)) => Err(Error::Closed),
            Err(..) => {
                // remove the queue entry, or recycle a grant that raced the
                // deadline so pool counts are unaffected by the timeout
                let recovered = {
                    let mut state = self.inner.state.lock();

                    if let Some(index) = state.waiters.iter().position(|waiter| waiter.id == id) {
                        state.waiters.remove(index);

                        None
                    } else {
                        receiver.try_recv().ok()
                    }
                };

                match recovered {
                    Some(Grant::Reuse(connection)) => self.release(connection),
                    Some(Grant::Open) => self.free_slot(),
                    None => {}
                }

                Err(Error::Timeout)
            }
        }
    }

    /// Give up a reserved slot, offering it to the next waiter in line
    fn free_slot(&self) {
        let mut state = self.inner.state.lock();
        state.checked_out -= 1;
        state.offer_slot();
    }

    /// Return a leased connection to the pool
    #[tracing::instrument(skip_all)]
    fn release(&self, connection: Connection) {
        let configuration = &self.inner.configuration;

        let reusable = connection.is_open()
            && !connection.is_bad()
            && connection.transaction_status() == TransactionStatus::Idle
            && configuration
                .lifespan
                .map_or(true, |lifespan| connection.age() < lifespan);

        let mut state = self.inner.state.lock();

        if reusable {
            // hand the connection to the next waiter directly; it stays
            // checked out
            let mut connection = connection;

            loop {
                match state.waiters.pop_front() {
                    Some(waiter) => match waiter.grant.send(Grant::Reuse(connection)) {
                        Ok(()) => break,
                        Err(Grant::Reuse(recovered)) => connection = recovered,
                        Err(Grant::Open) => unreachable!("waiters receive at most one grant"),
                    },
                    None => {
                        state.idle.push(Idle {
                            connection,
                            since: Instant::now(),
                        });
                        state.checked_out -= 1;

                        tracing::debug!(idle = state.idle.len(), "Connection returned to the pool");

                        break;
                    }
                }
            }
        } else {
            tracing::debug!("Closing released connection instead of pooling it");

            connection.close();
            state.checked_out -= 1;
            state.offer_slot();
        }

        state.reap(configuration);
    }

    fn lease(&self, connection: Connection) -> PooledConnection<C> {
        PooledConnection {
            pool: self.clone(),
            connection: Some(connection),
        }
    }
}

#[async_trait::async_trait]
impl<C> Provide for Pool<C>
where
    C: Connect,
{
    type Lease = PooledConnection<C>;
    type Error = Error;

    async fn acquire(&self, deadline: Instant) -> Result<Self::Lease, Self::Error> {
        Pool::acquire(self, deadline).await
    }
}

impl<C> fmt::Debug for Pool<C>
where
    C: Connect,
{
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("Pool")
            .field("endpoint", self.inner.source.endpoint())
            .field("configuration", &self.inner.configuration)
            .finish()
    }
}

/// Wrapper around a pooled connection for lease lifecycle management.
///
/// The connection returns to its pool when the lease is dropped or released
/// explicitly; because a lease is an owned value consumed exactly once,
/// releasing the same connection twice cannot be expressed.
pub struct PooledConnection<C>
where
    C: Connect,
{
    pool: Pool<C>,
    connection: Option<Connection>,
}

impl<C> PooledConnection<C>
where
    C: Connect,
{
    /// Return the connection to the pool, consuming the lease
    pub fn release(mut self) {
        if let Some(connection) = self.connection.take() {
            self.pool.release(connection);
        }
    }
}

impl<C> Deref for PooledConnection<C>
where
    C: Connect,
{
    type Target = Connection;

    fn deref(&self) -> &Self::Target {
        self.connection.as_ref().unwrap()
    }
}

impl<C> DerefMut for PooledConnection<C>
where
    C: Connect,
{
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.connection.as_mut().unwrap()
    }
}

impl<C> AsRef<Connection> for PooledConnection<C>
where
    C: Connect,
{
    fn as_ref(&self) -> &Connection {
        self.connection.as_ref().unwrap()
    }
}

impl<C> AsMut<Connection> for PooledConnection<C>
where
    C: Connect,
{
    fn as_mut(&mut self) -> &mut Connection {
        self.connection.as_mut().unwrap()
    }
}

impl<C> Drop for PooledConnection<C>
where
    C: Connect,
{
    fn drop(&mut self) {
        if let Some(connection) = self.connection.take() {
            self.pool.release(connection);
        }
    }
}
