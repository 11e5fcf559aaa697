use super::queue::{ItemId, Queue};
use crate::domain::{Batch, Statement};
use crate::store::StoreError;
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GroupingReport {
    pub batches: usize,
    pub statements: usize,
}

/// Drains the statement queue into fixed-size batches on the batch queue.
pub struct BatchGrouper<SQ, BQ> {
    statements: SQ,
    batches: BQ,
    claim_lease: Duration,
}

impl<SQ, BQ> BatchGrouper<SQ, BQ>
where
    SQ: Queue<Statement>,
    BQ: Queue<Batch>,
{
    pub fn new(statements: SQ, batches: BQ, claim_lease: Duration) -> Self {
        Self {
            statements,
            batches,
            claim_lease,
        }
    }

    /// Groups the statements currently queued into batches of at most
    /// `max_batch_size` (a size of 0 counts as 1).
    ///
    /// The number of batches is fixed from the depth observed up front. If
    /// producers add statements meanwhile, the excess waits for the next
    /// call; if other consumers drain some, a batch simply comes out short.
    pub fn drain_and_group(&self, max_batch_size: usize) -> Result<GroupingReport, StoreError> {
        let max_batch_size = max_batch_size.max(1);
        let depth = self.statements.depth()?;
        let mut report = GroupingReport::default();

        if depth == 0 {
            return Ok(report);
        }

        let total_batches = depth.div_ceil(max_batch_size);
        debug!(depth, max_batch_size, total_batches, "Grouping statements");

        for _ in 0..total_batches {
            let Some(size) = self.fill_one(max_batch_size)? else {
                break;
            };
            report.batches += 1;
            report.statements += size;
        }

        if report.batches > 0 {
            info!(
                batches = report.batches,
                statements = report.statements,
                "Grouped statements into batches"
            );
        }
        Ok(report)
    }

    /// Claims up to `max_batch_size` statements and enqueues them as one
    /// batch. Returns `None` when nothing was left to claim.
    fn fill_one(&self, max_batch_size: usize) -> Result<Option<usize>, StoreError> {
        let mut ids: Vec<ItemId> = Vec::with_capacity(max_batch_size);
        let mut statements = Vec::with_capacity(max_batch_size);

        while statements.len() < max_batch_size {
            match self.statements.claim(self.claim_lease) {
                Ok(Some(item)) => {
                    ids.push(item.id);
                    statements.push(item.data);
                }
                Ok(None) => break,
                Err(e) => {
                    self.release_all(&ids);
                    return Err(e);
                }
            }
        }

        let size = statements.len();
        let Some(batch) = Batch::new(statements) else {
            return Ok(None);
        };

        if let Err(e) = self.batches.push(&batch) {
            self.release_all(&ids);
            return Err(e);
        }

        for id in ids {
            self.statements.delete(id)?;
        }
        Ok(Some(size))
    }

    fn release_all(&self, ids: &[ItemId]) {
        for id in ids {
            if let Err(e) = self.statements.release(*id) {
                warn!(item = %id, error = %e, "Failed to release statement claim");
            }
        }
    }
}
