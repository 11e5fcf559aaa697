use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_BATCH_SIZE: usize = 100;
pub const DEFAULT_TIMEOUT_SECS: f64 = 45.0;

/// LRS connection settings, owned by the operator and read on every send.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LrsSettings {
    pub xapi_endpoint: Option<String>,
    pub key: Option<String>,
    pub secret: Option<String>,
    /// Sent verbatim as the `Authorization` header, replacing basic auth.
    pub authorization_header: Option<String>,
    pub batch_size: i64,
    pub timeout: f64,
}

/// Endpoint and basic-auth pair, only available when all three are set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub endpoint: String,
    pub key: String,
    pub secret: String,
}

impl LrsSettings {
    /// Configured batch size, or the default when it is below 1.
    pub fn batch_size(&self) -> usize {
        if self.batch_size > 0 {
            self.batch_size as usize
        } else {
            DEFAULT_BATCH_SIZE
        }
    }

    /// Configured timeout, or the default when it is not positive or does
    /// not fit in a `Duration`.
    pub fn timeout(&self) -> Duration {
        Duration::try_from_secs_f64(self.timeout)
            .ok()
            .filter(|timeout| !timeout.is_zero())
            .unwrap_or(Duration::from_secs_f64(DEFAULT_TIMEOUT_SECS))
    }

    pub fn credentials(&self) -> Option<Credentials> {
        Some(Credentials {
            endpoint: non_empty(&self.xapi_endpoint)?.to_string(),
            key: non_empty(&self.key)?.to_string(),
            secret: non_empty(&self.secret)?.to_string(),
        })
    }

    pub fn authorization_override(&self) -> Option<&str> {
        non_empty(&self.authorization_header)
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}

/// Shared, updatable view of [`LrsSettings`].
#[derive(Debug, Clone, Default)]
pub struct SettingsHandle {
    inner: Arc<RwLock<LrsSettings>>,
}

impl SettingsHandle {
    pub fn new(settings: LrsSettings) -> Self {
        Self {
            inner: Arc::new(RwLock::new(settings)),
        }
    }

    pub fn snapshot(&self) -> LrsSettings {
        self.inner.read().clone()
    }

    pub fn update<F>(&self, f: F)
    where
        F: FnOnce(&mut LrsSettings),
    {
        f(&mut *self.inner.write());
    }
}
