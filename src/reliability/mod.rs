//! Delivery policy: how a failed send is classified, the per-batch worker that
//! applies it, and the counters that track the outcomes.

pub mod metrics;
pub mod policy;
pub mod worker;

pub use metrics::{MetricsError, MetricsExporter, PipelineMetrics};
pub use policy::{FailureAction, classify_failure, classify_status};
pub use worker::{BatchOutcome, BatchWorker};
