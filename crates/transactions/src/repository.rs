use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use common::TransactionReference;
use outbox::{InMemoryOutboxStore, NewOutboxEvent};

use crate::{Result, Transaction, TransactionError};

/// Persistence of the transaction aggregate.
#[async_trait]
pub trait TransactionRepository: Send + Sync {
    async fn get(&self, reference: &TransactionReference) -> Result<Option<Transaction>>;

    /// Stores `transaction` and stages `events` in the outbox as one commit.
    ///
    /// Fails with [`TransactionError::ConcurrencyConflict`] unless the stored
    /// version equals `expected_version` (0 for a transaction not yet saved).
    async fn save(
        &self,
        transaction: &Transaction,
        expected_version: u64,
        events: Vec<NewOutboxEvent>,
    ) -> Result<()>;
}

#[async_trait]
impl<T: TransactionRepository + ?Sized> TransactionRepository for Arc<T> {
    async fn get(&self, reference: &TransactionReference) -> Result<Option<Transaction>> {
        (**self).get(reference).await
    }

    async fn save(
        &self,
        transaction: &Transaction,
        expected_version: u64,
        events: Vec<NewOutboxEvent>,
    ) -> Result<()> {
        (**self).save(transaction, expected_version, events).await
    }
}

/// In-memory repository sharing its commit with an [`InMemoryOutboxStore`].
#[derive(Debug, Clone)]
pub struct InMemoryTransactionRepository {
    transactions: Arc<Mutex<HashMap<TransactionReference, Transaction>>>,
    outbox: InMemoryOutboxStore,
}

impl InMemoryTransactionRepository {
    pub fn new(outbox: InMemoryOutboxStore) -> Self {
        Self {
            transactions: Arc::new(Mutex::new(HashMap::new())),
            outbox,
        }
    }

    /// Returns the outbox this repository commits into.
    pub fn outbox(&self) -> &InMemoryOutboxStore {
        &self.outbox
    }

    pub fn len(&self) -> usize {
        self.transactions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl TransactionRepository for InMemoryTransactionRepository {
    async fn get(&self, reference: &TransactionReference) -> Result<Option<Transaction>> {
        Ok(self
            .transactions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(reference)
            .cloned())
    }

    async fn save(
        &self,
        transaction: &Transaction,
        expected_version: u64,
        events: Vec<NewOutboxEvent>,
    ) -> Result<()> {
        self.outbox.atomically(|| {
            let mut transactions = self
                .transactions
                .lock()
                .unwrap_or_else(PoisonError::into_inner);

            let actual = transactions
                .get(&transaction.reference)
                .map_or(0, |stored| stored.version);
            if actual != expected_version {
                return Err(TransactionError::ConcurrencyConflict {
                    reference: transaction.reference.clone(),
                    expected: expected_version,
                    actual,
                });
            }

            transactions.insert(transaction.reference.clone(), transaction.clone());
            Ok(((), events))
        })?;

        tracing::debug!(
            reference = %transaction.reference,
            version = transaction.version,
            status = %transaction.status,
            "transaction saved"
        );
        Ok(())
    }
}
