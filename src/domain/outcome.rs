use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Result of one delivery attempt for one batch. Never mutated once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryOutcome {
    pub http_status: Option<u16>,
    pub reason_phrase: String,
    pub error_message: Option<String>,
    pub batch_size: usize,
    /// Only present when the batch is dropped without being accepted.
    pub raw_batch_json: Option<String>,
}

impl DeliveryOutcome {
    pub fn accepted(status: u16, reason: impl Into<String>, batch_size: usize) -> Self {
        Self {
            http_status: Some(status),
            reason_phrase: reason.into(),
            error_message: None,
            batch_size,
            raw_batch_json: None,
        }
    }

    pub fn dropped(
        status: Option<u16>,
        reason: impl Into<String>,
        error_message: impl Into<String>,
        batch_size: usize,
        raw_batch_json: String,
    ) -> Self {
        Self {
            http_status: status,
            reason_phrase: reason.into(),
            error_message: Some(error_message.into()),
            batch_size,
            raw_batch_json: Some(raw_batch_json),
        }
    }

    pub fn is_accepted(&self) -> bool {
        self.raw_batch_json.is_none()
    }

    pub fn to_log_entry(&self, created_at: DateTime<Utc>) -> StatementLogEntry {
        StatementLogEntry {
            code: self.http_status,
            reason: self.reason_phrase.clone(),
            count: self.batch_size as u64,
            data: self.raw_batch_json.clone(),
            created_at,
        }
    }
}

/// Persisted outcome of a batch delivery attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatementLogEntry {
    /// `None` when no HTTP response was received.
    pub code: Option<u16>,
    pub reason: String,
    pub count: u64,
    pub data: Option<String>,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub created_at: DateTime<Utc>,
}

/// Persisted outcome of a single failed HTTP request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestLogEntry {
    pub code: Option<u16>,
    pub reason: String,
    pub error: String,
    pub count: u64,
    pub data: String,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub created_at: DateTime<Utc>,
}

/// Statements per response code, summed over `count`.
///
/// When several reasons share a code the first one logged is reported.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatementStatistic {
    pub code: Option<u16>,
    pub reason: String,
    pub total: u64,
}

/// Failed requests per response code, counted by row.
///
/// Like [`StatementStatistic`], `reason` and `error` come from the first row
/// logged for the code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestStatistic {
    pub code: Option<u16>,
    pub reason: String,
    pub error: String,
    pub total: u64,
}
