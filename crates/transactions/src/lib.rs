//! Transaction lifecycle and the fraud-check hand-off.
//!
//! [`TransactionService`] drives the state machine under per-resource locks
//! and stages every change in the outbox within the same commit. Entering
//! FRAUD_CHECK_PENDING stages a fraud-check request; the answer arrives
//! asynchronously on the result topic, where [`FraudResultConsumer`] hands
//! it to [`FraudGate::on_result`] and acknowledges only after the commit.

pub mod consumer;
pub mod error;
pub mod events;
pub mod fraud;
pub mod fraud_gate;
pub mod postgres;
pub mod repository;
pub mod service;
pub mod status;
pub mod transaction;

pub use consumer::{ConsumerConfig, ConsumerHandle, DeliveryOutcome, FraudResultConsumer};
pub use error::{Result, TransactionError};
pub use events::{
    AGGREGATE_TYPE, FraudAssessed, FraudCheckRequested, TransactionInitiated,
    TransactionStatusChanged, TransactionTopics,
};
pub use fraud::{FraudCheckResult, FraudDecision, RiskContext};
pub use fraud_gate::{FraudGate, FraudOutcome};
pub use postgres::PostgresTransactionRepository;
pub use repository::{InMemoryTransactionRepository, TransactionRepository};
pub use service::{InitiateTransaction, TransactionLocks, TransactionService};
pub use status::{FraudStatus, TransactionStatus};
pub use transaction::{FraudAssessment, FraudApplication, StatusChange, Transaction};
