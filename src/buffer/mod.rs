//! Two-stage buffering: individually submitted statements, then the batches
//! grouped from them.

pub mod grouper;
pub mod queue;

pub use grouper::{BatchGrouper, GroupingReport};
pub use queue::{ItemId, Queue, QueueItem, SledQueue};
