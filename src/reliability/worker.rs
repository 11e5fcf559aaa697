use super::policy::{FailureAction, classify_failure};
use crate::domain::{DeliveryOutcome, LrsError, Statement, statements_to_json};
use crate::outcome::{OutcomeLog, OutcomeRecorder};
use crate::sender::{DeliveryError, StatementSender};
use chrono::Utc;
use tracing::{error, info, warn};

/// Result of processing one batch.
///
/// `Suspend` is a pipeline-wide signal, not a per-batch error: the caller
/// must stop pulling batches until the configuration is fixed.
#[derive(Debug)]
pub enum BatchOutcome {
    Sent { status: u16, reason: String },
    Dropped { status: Option<u16>, reason: String },
    RetryLater(LrsError),
    Suspend(String),
}

impl BatchOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Sent { .. } => "sent",
            Self::Dropped { .. } => "dropped",
            Self::RetryLater(_) => "deferred",
            Self::Suspend(_) => "suspended",
        }
    }

    /// Whether the batch reached a terminal state and can leave the queue.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Sent { .. } | Self::Dropped { .. })
    }
}

pub struct BatchWorker<S, L = OutcomeLog> {
    sender: S,
    log: L,
}

impl<S: StatementSender, L: OutcomeRecorder> BatchWorker<S, L> {
    pub fn new(sender: S, log: L) -> Self {
        Self { sender, log }
    }

    pub fn sender(&self) -> &S {
        &self.sender
    }

    /// Delivers one batch and records its outcome.
    ///
    /// Exactly one statement log row is written for `Sent` and `Dropped`;
    /// none for `RetryLater` and `Suspend`. An `Err` means the outcome could
    /// not be recorded and the batch must stay on the queue.
    pub async fn process_batch(&self, statements: &[Statement]) -> Result<BatchOutcome, LrsError> {
        let count = statements.len();

        let error = match self.sender.send_to_lrs(statements, false).await {
            Ok(response) => {
                let outcome =
                    DeliveryOutcome::accepted(response.status, response.reason.clone(), count);
                self.record(&outcome)?;
                info!(
                    count,
                    code = response.status,
                    latency_ms = response.latency.as_millis() as u64,
                    "Batch accepted by LRS"
                );
                return Ok(BatchOutcome::Sent {
                    status: response.status,
                    reason: response.reason,
                });
            }
            Err(error) => error,
        };

        match classify_failure(&error) {
            FailureAction::DropWithForensics => {
                let raw = statements_to_json(statements).map_err(DeliveryError::from)?;
                let outcome = DeliveryOutcome::dropped(
                    error.status(),
                    error.reason(),
                    error.to_string(),
                    count,
                    raw,
                );
                self.record(&outcome)?;
                warn!(
                    count,
                    code = error.status(),
                    kind = ?error.kind(),
                    error = %error,
                    "Dropped batch; statements kept in the statement log"
                );
                Ok(BatchOutcome::Dropped {
                    status: outcome.http_status,
                    reason: outcome.reason_phrase,
                })
            }
            FailureAction::RetryLater => {
                warn!(
                    count,
                    code = error.status(),
                    kind = ?error.kind(),
                    error = %error,
                    "Batch delivery deferred"
                );
                Ok(BatchOutcome::RetryLater(error))
            }
            FailureAction::Suspend => {
                error!(
                    kind = ?error.kind(),
                    error = %error,
                    "Suspending delivery until the LRS configuration is fixed"
                );
                Ok(BatchOutcome::Suspend(error.to_string()))
            }
            FailureAction::Fatal => Err(error),
        }
    }

    fn record(&self, outcome: &DeliveryOutcome) -> Result<(), LrsError> {
        let entry = outcome.to_log_entry(Utc::now());
        self.log.record_statement(&entry).map_err(|e| {
            error!(
                error = %e,
                code = entry.code,
                count = entry.count,
                "Failed to write statement log entry; operator follow-up required"
            );
            LrsError::from(e)
        })?;
        Ok(())
    }
}
