/// Transaction isolation levels supported by Postgres.
///
/// See the official documentation on
/// [transaction isolation](https://www.postgresql.org/docs/current/transaction-iso.html)
/// for the guarantees every level makes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum IsolationLevel {
    /// use the session's default isolation level
    #[default]
    Default,
    /// READ UNCOMMITTED (treated like READ COMMITTED by Postgres)
    ReadUncommitted,
    /// READ COMMITTED
    ReadCommitted,
    /// REPEATABLE READ
    RepeatableRead,
    /// SERIALIZABLE
    Serializable,
}

/// Transaction access modes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionMode {
    /// READ WRITE
    ReadWrite,
    /// READ ONLY
    ReadOnly,
}

/// Transaction deferrability, meaningful only for SERIALIZABLE READ ONLY
/// transactions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeferrableMode {
    /// DEFERRABLE
    Deferrable,
    /// NOT DEFERRABLE
    NotDeferrable,
}

/// Options applied when beginning a transaction.
///
/// Unset options are omitted from the generated `BEGIN` statement, leaving
/// the session defaults in effect.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransactionOptions {
    isolation_level: IsolationLevel,
    mode: Option<TransactionMode>,
    deferrable: Option<DeferrableMode>,
}

impl TransactionOptions {
    /// Create options that defer entirely to the session defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the isolation level of the transaction
    pub fn isolation_level(mut self, isolation_level: IsolationLevel) -> Self {
        self.isolation_level = isolation_level;
        self
    }

    /// Set the access mode of the transaction
    pub fn mode(mut self, mode: TransactionMode) -> Self {
        self.mode = Some(mode);
        self
    }

    /// Set the deferrability of the transaction
    pub fn deferrable(mut self, deferrable: DeferrableMode) -> Self {
        self.deferrable = Some(deferrable);
        self
    }

    /// Compile the options into a `BEGIN` statement
    pub fn begin_statement(&self) -> String {
        let mut statement = String::from("BEGIN");

        match self.isolation_level {
            IsolationLevel::Default => {}
            IsolationLevel::ReadUncommitted => {
                statement.push_str(" ISOLATION LEVEL READ UNCOMMITTED")
            }
            IsolationLevel::ReadCommitted => statement.push_str(" ISOLATION LEVEL READ COMMITTED"),
            IsolationLevel::RepeatableRead => {
                statement.push_str(" ISOLATION LEVEL REPEATABLE READ")
            }
            IsolationLevel::Serializable => statement.push_str(" ISOLATION LEVEL SERIALIZABLE"),
        }

        match self.mode {
            Some(TransactionMode::ReadWrite) => statement.push_str(" READ WRITE"),
            Some(TransactionMode::ReadOnly) => statement.push_str(" READ ONLY"),
            None => {}
        }

        match self.deferrable {
            Some(DeferrableMode::Deferrable) => statement.push_str(" DEFERRABLE"),
            Some(DeferrableMode::NotDeferrable) => statement.push_str(" NOT DEFERRABLE"),
            None => {}
        }

        statement
    }
}

#[cfg(test)]
mod test {
    use super::{DeferrableMode, IsolationLevel, TransactionMode, TransactionOptions};

    #[test]
    fn defaults_compile_to_a_bare_begin() {
        assert_eq!(TransactionOptions::new().begin_statement(), "BEGIN");
    }

    #[test]
    fn single_options_are_appended_to_the_begin_statement() {
        assert_eq!(
            TransactionOptions::new()
                .isolation_level(IsolationLevel::RepeatableRead)
                .begin_statement(),
            "BEGIN ISOLATION LEVEL REPEATABLE READ"
        );

        assert_eq!(
            TransactionOptions::new()
                .mode(TransactionMode::ReadOnly)
                .begin_statement(),
            "BEGIN READ ONLY"
        );

        assert_eq!(
            TransactionOptions::new()
                .deferrable(DeferrableMode::NotDeferrable)
                .begin_statement(),
            "BEGIN NOT DEFERRABLE"
        );
    }

    #[test]
    fn combined_options_are_emitted_in_canonical_order() {
        let statement = TransactionOptions::new()
            .deferrable(DeferrableMode::Deferrable)
            .mode(TransactionMode::ReadOnly)
            .isolation_level(IsolationLevel::Serializable)
            .begin_statement();

        assert_eq!(
            statement,
            "BEGIN ISOLATION LEVEL SERIALIZABLE READ ONLY DEFERRABLE"
        );
    }
}
