//! Transaction coordination.

pub mod coordinator;
pub mod types;

pub use coordinator::TransactionCoordinator;
pub use types::{
    CloseTransactionResult, MutationReceipt, TransactionHandle, TransactionOutcome,
    TransactionState,
};
