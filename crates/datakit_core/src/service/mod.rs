//! Use-case layer over sessions.

pub mod unit_of_work;

pub use unit_of_work::{TransactionResult, TransactionState, UnitOfWork};
