use crate::options::TransactionOptions;
use postgres_connection::{Connection, Provide, Transport};
use thiserror::Error;
use tokio::time::Instant;
use uuid::Uuid;

/// Errors related to the transaction lifecycle, generic over the connection
/// provider's own error type
#[derive(Debug, Error)]
pub enum Error<E>
where
    E: std::error::Error,
{
    /// Failure acquiring a connection from the provider
    #[error("Error acquiring a connection for the transaction: {0}")]
    Acquire(#[source] E),

    /// The server rejected the `BEGIN` statement
    #[error("Error beginning the transaction: {0}")]
    Begin(#[source] postgres_connection::Error),

    /// Failure running a statement inside the transaction block
    #[error("Error executing a statement in the transaction: {0}")]
    Execute(#[source] postgres_connection::Error),

    /// The server rejected the `COMMIT` statement
    #[error("Error committing the transaction: {0}")]
    Commit(#[source] postgres_connection::Error),

    /// The server rejected the `ROLLBACK` statement
    #[error("Error rolling back the transaction: {0}")]
    Rollback(#[source] postgres_connection::Error),

    /// Operating on a transaction that already reached a terminal state
    #[error("Transaction has already been committed or rolled back")]
    Finished,
}

/// Lifecycle states of a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// `BEGIN` succeeded; no statements have run yet
    Begun,
    /// at least one statement has run inside the transaction block
    Active,
    /// committed cleanly
    Committed,
    /// rolled back explicitly
    RolledBack,
    /// terminated without a clean commit or rollback
    Closed,
}

/// A unit of work holding exclusive temporary ownership of one connection.
///
/// The transaction begins on construction and ends with a one-shot
/// [`commit`] or [`rollback`], after which the connection is released back
/// to its provider. Dropping an unfinished transaction rolls it back on a
/// best-effort basis so that a connection is never handed back to a pool
/// mid-transaction.
///
/// [`commit`]: Transaction::commit
/// [`rollback`]: Transaction::rollback
pub struct Transaction<P>
where
    P: Provide,
    P::Lease: 'static,
{
    id: Uuid,
    lease: Option<P::Lease>,
    state: State,
}

impl<P> Transaction<P>
where
    P: Provide,
    P::Lease: 'static,
{
    /// Begin a transaction on a connection acquired from the provider,
    /// applying the configured options
    #[tracing::instrument(skip(provider))]
    pub async fn begin(
        provider: &P,
        options: TransactionOptions,
        deadline: Instant,
    ) -> Result<Self, Error<P::Error>> {
        let id = Uuid::new_v4();
        let mut lease = provider.acquire(deadline).await.map_err(Error::Acquire)?;

        // a failed BEGIN hands the lease straight back to the provider
        if let Err(error) = lease.as_mut().batch_execute(&options.begin_statement()).await {
            drop(lease);

            return Err(Error::Begin(error));
        }

        tracing::info!(%id, "Transaction begun");

        Ok(Self {
            id,
            lease: Some(lease),
            state: State::Begun,
        })
    }

    /// Unique identifier of this transaction
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Current lifecycle state of the transaction
    pub fn state(&self) -> State {
        self.state
    }

    /// The connection this transaction holds, while it is still running
    pub fn connection(&self) -> Option<&Connection> {
        self.lease.as_ref().map(AsRef::as_ref)
    }

    /// The raw transport beneath the connection, for protocol-level
    /// diagnostics
    pub fn lowest_layer(&self) -> Option<&dyn Transport> {
        self.connection().map(Connection::native_handle)
    }

    /// Run statements inside the transaction block
    #[tracing::instrument(skip(self), fields(id = %self.id))]
    pub async fn batch_execute(&mut self, statement: &str) -> Result<(), Error<P::Error>> {
        let lease = self.lease.as_mut().ok_or(Error::Finished)?;

        lease
            .as_mut()
            .batch_execute(statement)
            .await
            .map_err(Error::Execute)?;

        self.state = State::Active;

        Ok(())
    }

    /// Commit the transaction and release its connection back to the
    /// provider. Committing a finished transaction is a protocol-misuse
    /// error.
    #[tracing::instrument(skip(self), fields(id = %self.id))]
    pub async fn commit(&mut self) -> Result<(), Error<P::Error>> {
        let mut lease = self.lease.take().ok_or(Error::Finished)?;

        match lease.as_mut().batch_execute("COMMIT").await {
            Ok(..) => {
                self.state = State::Committed;
                tracing::info!("Transaction committed");

                Ok(())
            }
            Err(error) => {
                // the lease still returns to the provider, which closes the
                // now-bad connection instead of reusing it
                self.state = State::Closed;

                Err(Error::Commit(error))
            }
        }
    }

    /// Roll the transaction back and release its connection back to the
    /// provider. Rolling back a finished transaction is a protocol-misuse
    /// error.
    #[tracing::instrument(skip(self), fields(id = %self.id))]
    pub async fn rollback(&mut self) -> Result<(), Error<P::Error>> {
        let mut lease = self.lease.take().ok_or(Error::Finished)?;

        match lease.as_mut().batch_execute("ROLLBACK").await {
            Ok(..) => {
                self.state = State::RolledBack;
                tracing::info!("Transaction rolled back");

                Ok(())
            }
            Err(error) => {
                self.state = State::Closed;

                Err(Error::Rollback(error))
            }
        }
    }
}

impl<P> Drop for Transaction<P>
where
    P: Provide,
    P::Lease: 'static,
{
    fn drop(&mut self) {
        let Some(mut lease) = self.lease.take() else {
            return;
        };

        self.state = State::Closed;

        // best-effort rollback off-task before the lease returns to the
        // provider; without a runtime the provider's transaction-status
        // check still keeps the connection out of reuse
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let id = self.id;

                handle.spawn(async move {
                    if let Err(error) = lease.as_mut().batch_execute("ROLLBACK").await {
                        tracing::warn!(%id, %error, "Error rolling back abandoned transaction");
                    }
                });
            }
            Err(..) => {
                tracing::warn!(id = %self.id, "Abandoned transaction dropped outside a runtime");
            }
        }
    }
}
