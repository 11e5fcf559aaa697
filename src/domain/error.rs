use crate::sender::DeliveryError;
use crate::store::StoreError;
use thiserror::Error;

/// Failure surfaced by a configuration-gated send to the LRS.
#[derive(Error, Debug)]
pub enum LrsError {
    #[error("{0}")]
    MissingConfiguration(String),

    #[error(transparent)]
    Delivery(#[from] DeliveryError),

    #[error("Outcome log error: {0}")]
    Storage(#[from] StoreError),
}

/// Coarse failure classes attached to delivery log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    MissingConfiguration,
    RemoteRejected(u16),
    Transport,
    Unexpected,
}

impl LrsError {
    pub fn missing_configuration() -> Self {
        Self::MissingConfiguration(
            "At least one of the required LRS configuration settings is missing!".to_string(),
        )
    }

    pub fn kind(&self) -> FailureKind {
        match self {
            Self::MissingConfiguration(_) => FailureKind::MissingConfiguration,
            Self::Delivery(DeliveryError::Remote { status, .. }) => {
                FailureKind::RemoteRejected(*status)
            }
            Self::Delivery(
                DeliveryError::Connect(_) | DeliveryError::Timeout(_) | DeliveryError::Transport(_),
            ) => FailureKind::Transport,
            Self::Delivery(_) | Self::Storage(_) => FailureKind::Unexpected,
        }
    }

    /// HTTP status of the response, if the LRS produced one.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Delivery(e) => e.status(),
            _ => None,
        }
    }

    /// Reason phrase of the response, empty without one.
    pub fn reason(&self) -> &str {
        match self {
            Self::Delivery(e) => e.reason(),
            _ => "",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_mapping() {
        assert_eq!(
            LrsError::missing_configuration().kind(),
            FailureKind::MissingConfiguration
        );

        let remote = LrsError::Delivery(DeliveryError::Remote {
            status: 401,
            reason: "Unauthorized".to_string(),
            message: "Client error".to_string(),
        });
        assert_eq!(remote.kind(), FailureKind::RemoteRejected(401));
        assert_eq!(remote.status(), Some(401));
        assert_eq!(remote.reason(), "Unauthorized");

        let timeout = LrsError::Delivery(DeliveryError::Timeout("timed out".to_string()));
        assert_eq!(timeout.kind(), FailureKind::Transport);
        assert_eq!(timeout.status(), None);
        assert_eq!(timeout.reason(), "");
    }
}
