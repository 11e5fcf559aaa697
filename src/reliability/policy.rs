use crate::domain::LrsError;
use crate::sender::DeliveryError;

/// What the worker does with a batch whose delivery failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureAction {
    /// Log the batch with its data and remove it from the queue.
    DropWithForensics,
    /// Leave the batch on the queue for a later attempt.
    RetryLater,
    /// Stop processing the whole queue until the operator intervenes.
    Suspend,
    /// Abort the current invocation with the error.
    Fatal,
}

/// Status codes worth another attempt as they are.
const RETRYABLE_STATUSES: [u16; 5] = [403, 404, 500, 502, 503];

/// Maps a failed send onto the action the worker takes.
///
/// | failure | action |
/// |---|---|
/// | missing endpoint, key or secret | `Suspend` |
/// | 400 | `DropWithForensics` |
/// | 401 | `Suspend` |
/// | 403, 404, 500, 502, 503 | `RetryLater` |
/// | any other status | `DropWithForensics` |
/// | connection never established | `RetryLater` |
/// | timeout or other failure without a status | `DropWithForensics` |
/// | unusable endpoint or authorization header | `Suspend` |
/// | serialization or outcome log failure | `Fatal` |
///
/// A timed out request may already have been accepted by the LRS, so it is
/// never sent again.
pub fn classify_failure(error: &LrsError) -> FailureAction {
    match error {
        LrsError::MissingConfiguration(_) => FailureAction::Suspend,
        LrsError::Delivery(delivery) => match delivery {
            DeliveryError::Remote { status, .. } => classify_status(*status),
            DeliveryError::Connect(_) => FailureAction::RetryLater,
            DeliveryError::Timeout(_) | DeliveryError::Transport(_) => {
                FailureAction::DropWithForensics
            }
            DeliveryError::InvalidRequest(_) => FailureAction::Suspend,
            DeliveryError::Serialization(_) => FailureAction::Fatal,
        },
        LrsError::Storage(_) => FailureAction::Fatal,
    }
}

pub fn classify_status(status: u16) -> FailureAction {
    match status {
        400 => FailureAction::DropWithForensics,
        401 => FailureAction::Suspend,
        s if RETRYABLE_STATUSES.contains(&s) => FailureAction::RetryLater,
        _ => FailureAction::DropWithForensics,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::StoreError;

    fn remote(status: u16) -> LrsError {
        LrsError::Delivery(DeliveryError::Remote {
            status,
            reason: String::new(),
            message: String::new(),
        })
    }

    #[test]
    fn test_status_table() {
        assert_eq!(classify_failure(&remote(400)), FailureAction::DropWithForensics);
        assert_eq!(classify_failure(&remote(401)), FailureAction::Suspend);
        for status in [403, 404, 500, 502, 503] {
            assert_eq!(
                classify_failure(&remote(status)),
                FailureAction::RetryLater,
                "status {status}"
            );
        }
        for status in [304, 405, 409, 413, 418, 429, 501, 504] {
            assert_eq!(
                classify_failure(&remote(status)),
                FailureAction::DropWithForensics,
                "status {status}"
            );
        }
    }

    #[test]
    fn test_failures_without_status() {
        assert_eq!(
            classify_failure(&LrsError::missing_configuration()),
            FailureAction::Suspend
        );
        assert_eq!(
            classify_failure(&DeliveryError::Connect("refused".into()).into()),
            FailureAction::RetryLater
        );
        assert_eq!(
            classify_failure(&DeliveryError::Timeout("timed out".into()).into()),
            FailureAction::DropWithForensics
        );
        assert_eq!(
            classify_failure(&DeliveryError::Transport("reset".into()).into()),
            FailureAction::DropWithForensics
        );
        assert_eq!(
            classify_failure(&DeliveryError::InvalidRequest("bad url".into()).into()),
            FailureAction::Suspend
        );
    }

    #[test]
    fn test_storage_failure_is_fatal() {
        let error = LrsError::Storage(StoreError::CorruptRecord {
            tree: "request_log".to_string(),
            id: 7,
        });
        assert_eq!(classify_failure(&error), FailureAction::Fatal);
    }
}
