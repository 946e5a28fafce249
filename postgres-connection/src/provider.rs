use crate::{
    connection::{Connection, Error},
    endpoint::Endpoint,
    transport::Transport,
};
use async_trait::async_trait;
use std::{fmt, io};
use tokio::time::Instant;

/// Wire-protocol connector: establishes the lowest-layer transport for an
/// endpoint, performing startup and authentication.
///
/// The concrete implementation lives in the protocol crate; this crate and
/// the pools built on top of it only depend on the seam.
#[async_trait]
pub trait Connect: Send + Sync {
    /// Open a transport to the endpoint
    async fn connect(&self, endpoint: &Endpoint) -> io::Result<Box<dyn Transport>>;
}

/// Source of connections: either a direct factory or a pool.
///
/// Providers are polymorphic over the single capability "produce a connection
/// asynchronously before a deadline"; callers must not care which variant
/// they hold.
#[async_trait]
pub trait Provide: Send + Sync {
    /// The lease granting exclusive temporary access to a connection until it
    /// is returned to (or closed by) the provider
    type Lease: AsRef<Connection> + AsMut<Connection> + Send;

    /// Errors surfaced while acquiring a connection
    type Error: std::error::Error + Send + Sync;

    /// Acquire a connection, giving up at the deadline
    async fn acquire(&self, deadline: Instant) -> Result<Self::Lease, Self::Error>;
}

/// Direct connection factory: opens a brand-new connection on every
/// acquisition
pub struct ConnectionInfo<C> {
    endpoint: Endpoint,
    connector: C,
}

impl<C> ConnectionInfo<C>
where
    C: Connect,
{
    /// Create a new factory from an endpoint and a wire-protocol connector
    pub fn new(endpoint: Endpoint, connector: C) -> Self {
        Self {
            endpoint,
            connector,
        }
    }

    /// The endpoint this factory connects to
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Open a new connection bounded by the deadline
    #[tracing::instrument(skip(self), fields(endpoint = ?self.endpoint))]
    pub async fn connect(&self, deadline: Instant) -> Result<Connection, Error> {
        match tokio::time::timeout_at(deadline, self.connector.connect(&self.endpoint)).await {
            Ok(Ok(transport)) => {
                tracing::debug!("Connection established");

                Ok(Connection::new(transport))
            }
            Ok(Err(error)) => Err(Error::Connect(error)),
            Err(..) => Err(Error::Timeout),
        }
    }
}

#[async_trait]
impl<C> Provide for ConnectionInfo<C>
where
    C: Connect,
{
    type Lease = Connection;
    type Error = Error;

    async fn acquire(&self, deadline: Instant) -> Result<Self::Lease, Self::Error> {
        self.connect(deadline).await
    }
}

impl<C> fmt::Debug for ConnectionInfo<C> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("ConnectionInfo")
            .field("endpoint", &self.endpoint)
            .finish()
    }
}
