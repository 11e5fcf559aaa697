use super::client::{DeliveryError, DeliveryRequest, LrsClient, LrsResponse, statements_url};
use super::settings::SettingsHandle;
use crate::domain::{LrsError, RequestLogEntry, Statement, statements_to_json};
use crate::outcome::OutcomeLog;
use chrono::Utc;
use std::future::Future;
use tracing::error;

/// A configuration-gated single send of statements to the LRS.
pub trait StatementSender: Send + Sync {
    fn send_to_lrs(
        &self,
        statements: &[Statement],
        bypass_request_log: bool,
    ) -> impl Future<Output = Result<LrsResponse, LrsError>> + Send;
}

/// Sends statements with the current [`LrsSettings`](super::LrsSettings) and
/// records rejected requests in the request log.
#[derive(Debug, Clone)]
pub struct LrsService {
    client: LrsClient,
    settings: SettingsHandle,
    log: OutcomeLog,
}

impl LrsService {
    pub fn new(client: LrsClient, settings: SettingsHandle, log: OutcomeLog) -> Self {
        Self {
            client,
            settings,
            log,
        }
    }

    pub fn settings(&self) -> &SettingsHandle {
        &self.settings
    }

    /// Sends `statements` once.
    ///
    /// Fails with [`LrsError::MissingConfiguration`] before touching the
    /// network if the endpoint, key or secret is unset. A non-2xx response is
    /// written to the request log unless `bypass_request_log` is set; either
    /// way the error is returned unchanged.
    pub async fn send_to_lrs(
        &self,
        statements: &[Statement],
        bypass_request_log: bool,
    ) -> Result<LrsResponse, LrsError> {
        let settings = self.settings.snapshot();
        let Some(credentials) = settings.credentials() else {
            return Err(LrsError::missing_configuration());
        };

        let request = DeliveryRequest {
            endpoint: &credentials.endpoint,
            key: &credentials.key,
            secret: &credentials.secret,
            authorization: settings.authorization_override(),
            timeout: settings.timeout(),
            statements,
        };

        match self.client.post_statements(&request).await {
            Ok(response) => Ok(response),
            Err(error @ DeliveryError::Remote { .. }) => {
                error!(
                    url = %statements_url(&credentials.endpoint),
                    count = statements.len(),
                    code = error.status(),
                    status = error.reason(),
                    error = %error,
                    "LRS rejected statements"
                );
                if !bypass_request_log {
                    self.record_rejection(&error, statements)?;
                }
                Err(error.into())
            }
            Err(error) => {
                error!(
                    url = %statements_url(&credentials.endpoint),
                    count = statements.len(),
                    error = %error,
                    "Failed to send statements to LRS"
                );
                Err(error.into())
            }
        }
    }

    fn record_rejection(
        &self,
        error: &DeliveryError,
        statements: &[Statement],
    ) -> Result<(), LrsError> {
        let entry = RequestLogEntry {
            code: error.status(),
            reason: error.reason().to_string(),
            error: error.to_string(),
            count: statements.len() as u64,
            data: statements_to_json(statements).map_err(DeliveryError::from)?,
            created_at: Utc::now(),
        };

        if let Err(e) = self.log.append_request(&entry) {
            error!(
                error = %e,
                code = entry.code,
                "Failed to write request log entry; operator follow-up required"
            );
            return Err(e.into());
        }
        Ok(())
    }
}

impl StatementSender for LrsService {
    fn send_to_lrs(
        &self,
        statements: &[Statement],
        bypass_request_log: bool,
    ) -> impl Future<Output = Result<LrsResponse, LrsError>> + Send {
        LrsService::send_to_lrs(self, statements, bypass_request_log)
    }
}
