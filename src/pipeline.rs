//! Entry points driven by producers and the scheduler: submit, group,
//! deliver, and the read side used by reports.

use crate::buffer::{BatchGrouper, GroupingReport, ItemId, Queue, SledQueue};
use crate::domain::{
    Batch, LrsError, RequestLogEntry, RequestStatistic, Statement, StatementLogEntry,
    StatementStatistic,
};
use crate::outcome::{OutcomeLog, OutcomeRecorder, PurgeReport};
use crate::reliability::{BatchOutcome, BatchWorker, PipelineMetrics};
use crate::sender::{LrsClient, LrsResponse, LrsService, SettingsHandle, StatementSender};
use crate::store::{Store, StoreError};
use chrono::{DateTime, TimeDelta, Utc};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

pub const DEFAULT_CLAIM_LEASE: Duration = Duration::from_secs(1200);

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    pub attempted: usize,
    pub sent: usize,
    pub dropped: usize,
    pub deferred: usize,
    /// Set when the run stopped on a suspend signal.
    pub suspension: Option<String>,
}

impl DeliveryReport {
    pub fn is_suspended(&self) -> bool {
        self.suspension.is_some()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueDepths {
    pub statements: usize,
    pub batches: usize,
}

pub struct Pipeline<S = LrsService, L = OutcomeLog> {
    statements: SledQueue<Statement>,
    batches: SledQueue<Batch>,
    log: OutcomeLog,
    worker: BatchWorker<S, L>,
    settings: SettingsHandle,
    claim_lease: Duration,
    metrics: PipelineMetrics,
}

impl Pipeline<LrsService> {
    /// Wires the queues and outcome log of `store` to a live LRS client.
    pub fn open(
        store: &Store,
        client: LrsClient,
        settings: SettingsHandle,
        claim_lease: Duration,
        metrics: PipelineMetrics,
    ) -> Result<Self, StoreError> {
        let service = LrsService::new(client, settings.clone(), store.outcome_log()?);
        Self::with_sender(store, service, settings, claim_lease, metrics)
    }
}

impl<S: StatementSender> Pipeline<S> {
    pub fn with_sender(
        store: &Store,
        sender: S,
        settings: SettingsHandle,
        claim_lease: Duration,
        metrics: PipelineMetrics,
    ) -> Result<Self, StoreError> {
        let worker = BatchWorker::new(sender, store.outcome_log()?);
        Self::with_worker(store, worker, settings, claim_lease, metrics)
    }
}

impl<S: StatementSender, L: OutcomeRecorder> Pipeline<S, L> {
    /// Uses `worker` for delivery; reports still read the outcome log of
    /// `store`.
    pub fn with_worker(
        store: &Store,
        worker: BatchWorker<S, L>,
        settings: SettingsHandle,
        claim_lease: Duration,
        metrics: PipelineMetrics,
    ) -> Result<Self, StoreError> {
        Ok(Self {
            statements: store.statement_queue()?,
            batches: store.batch_queue()?,
            log: store.outcome_log()?,
            worker,
            settings,
            claim_lease,
            metrics,
        })
    }

    pub fn settings(&self) -> &SettingsHandle {
        &self.settings
    }

    pub fn metrics(&self) -> &PipelineMetrics {
        &self.metrics
    }

    pub fn submit_statement(&self, statement: &Statement) -> Result<ItemId, StoreError> {
        let id = self.statements.push(statement)?;
        self.metrics.record_submitted(1);
        Ok(id)
    }

    pub fn submit_statements(&self, statements: &[Statement]) -> Result<usize, StoreError> {
        for statement in statements {
            self.statements.push(statement)?;
        }
        self.metrics.record_submitted(statements.len());
        debug!(count = statements.len(), "Statements submitted");
        Ok(statements.len())
    }

    /// Groups every queued statement into batches of the configured size.
    pub fn run_grouping(&self) -> Result<GroupingReport, StoreError> {
        let batch_size = self.settings.snapshot().batch_size();
        let grouper = BatchGrouper::new(&self.statements, &self.batches, self.claim_lease);
        let report = grouper.drain_and_group(batch_size)?;

        self.metrics.record_batches_created(report.batches);
        self.refresh_depth_gauges();
        Ok(report)
    }

    /// Delivers up to `max_batches` batches (`0` drains every claimable one).
    ///
    /// Sent and dropped batches leave the queue. A deferred batch stays
    /// claimed until its lease runs out. A suspend signal releases the batch
    /// and ends the run; the caller decides when to try again.
    pub async fn run_delivery(&self, max_batches: usize) -> Result<DeliveryReport, LrsError> {
        let mut report = DeliveryReport::default();

        while max_batches == 0 || report.attempted < max_batches {
            let Some(item) = self.batches.claim(self.claim_lease)? else {
                break;
            };
            report.attempted += 1;

            let start = Instant::now();
            let outcome = match self.worker.process_batch(item.data.statements()).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!(
                        batch = %item.id,
                        error = %e,
                        "Batch processing failed; batch stays claimed until its lease expires"
                    );
                    self.refresh_depth_gauges();
                    return Err(e);
                }
            };
            self.metrics.record_outcome(outcome.label(), start.elapsed());

            match outcome {
                BatchOutcome::Sent { .. } => {
                    self.batches.delete(item.id)?;
                    report.sent += 1;
                }
                BatchOutcome::Dropped { .. } => {
                    self.batches.delete(item.id)?;
                    report.dropped += 1;
                }
                BatchOutcome::RetryLater(_) => {
                    report.deferred += 1;
                }
                BatchOutcome::Suspend(reason) => {
                    self.batches.release(item.id)?;
                    warn!(batch = %item.id, %reason, "Delivery suspended");
                    report.suspension = Some(reason);
                    break;
                }
            }
        }

        if report.attempted > 0 {
            info!(
                attempted = report.attempted,
                sent = report.sent,
                dropped = report.dropped,
                deferred = report.deferred,
                suspended = report.is_suspended(),
                "Delivery run finished"
            );
        }
        self.refresh_depth_gauges();
        Ok(report)
    }

    /// Sends an empty statement array without touching the request log.
    pub async fn test_connection(&self) -> Result<LrsResponse, LrsError> {
        self.worker.sender().send_to_lrs(&[], true).await
    }

    pub fn statement_statistics(&self) -> Result<Vec<StatementStatistic>, StoreError> {
        self.log.statement_statistics()
    }

    pub fn request_statistics(&self) -> Result<Vec<RequestStatistic>, StoreError> {
        self.log.request_statistics()
    }

    pub fn statement_entries(&self) -> Result<Vec<StatementLogEntry>, StoreError> {
        self.log.statement_entries()
    }

    pub fn request_entries(&self) -> Result<Vec<RequestLogEntry>, StoreError> {
        self.log.request_entries()
    }

    /// Deletes outcome rows older than `older_than_days` days.
    pub fn purge(&self, older_than_days: u32) -> Result<PurgeReport, StoreError> {
        self.log
            .purge_before(retention_cutoff(Utc::now(), older_than_days))
    }

    pub fn queue_depths(&self) -> Result<QueueDepths, StoreError> {
        Ok(QueueDepths {
            statements: self.statements.depth()?,
            batches: self.batches.depth()?,
        })
    }

    fn refresh_depth_gauges(&self) {
        match self.queue_depths() {
            Ok(depths) => {
                self.metrics
                    .set_queue_depth(self.statements.name(), depths.statements);
                self.metrics.set_queue_depth(self.batches.name(), depths.batches);
            }
            Err(e) => warn!(error = %e, "Failed to read queue depths"),
        }
    }
}

/// `now` minus the retention window. A window reaching past the earliest
/// representable time yields that time, so nothing is purged.
fn retention_cutoff(now: DateTime<Utc>, older_than_days: u32) -> DateTime<Utc> {
    TimeDelta::try_days(i64::from(older_than_days))
        .and_then(|window| now.checked_sub_signed(window))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retention_cutoff_subtracts_days() {
        let now = Utc::now();
        assert_eq!(retention_cutoff(now, 0), now);
        assert_eq!(retention_cutoff(now, 30), now - TimeDelta::days(30));
    }

    #[test]
    fn test_retention_cutoff_saturates_for_huge_windows() {
        assert_eq!(retention_cutoff(Utc::now(), u32::MAX), DateTime::<Utc>::MIN_UTC);
    }
}
