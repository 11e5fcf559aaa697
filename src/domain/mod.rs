//! Domain layer for lrs-forwarder.
//!
//! Contains the canonical types shared across all modules:
//! - `Statement` / `Batch`: opaque xAPI payloads and their delivery groups
//! - `DeliveryOutcome` and the two outcome-log row types
//! - `LrsError`: failure taxonomy for a send to the LRS

pub mod error;
pub mod outcome;
pub mod statement;

pub use error::{FailureKind, LrsError};
pub use outcome::{
    DeliveryOutcome, RequestLogEntry, RequestStatistic, StatementLogEntry, StatementStatistic,
};
pub use statement::{Batch, Statement, statements_to_json};
