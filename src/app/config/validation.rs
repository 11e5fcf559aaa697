use super::{Config, ConfigError};
use url::Url;

impl Config {
    /// Rejects values the forwarder cannot run with.
    ///
    /// Missing LRS credentials are allowed here; sends fail with a missing
    /// configuration error until they are provided.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(endpoint) = self.xapi_endpoint.as_deref().filter(|e| !e.is_empty()) {
            Url::parse(endpoint).map_err(|e| {
                ConfigError::InvalidUrl(format!("Invalid xAPI endpoint URL '{endpoint}': {e}"))
            })?;
        }

        if self.claim_lease_secs == 0 {
            return Err(ConfigError::InvalidConfig(
                "Claim lease must be greater than 0".to_string(),
            ));
        }

        if self.grouping_interval_secs == 0 || self.delivery_interval_secs == 0 {
            return Err(ConfigError::InvalidConfig(
                "Grouping and delivery intervals must be greater than 0".to_string(),
            ));
        }

        if self.connect_timeout_secs == 0 {
            return Err(ConfigError::InvalidConfig(
                "Connection timeout must be greater than 0".to_string(),
            ));
        }

        if self.max_connections == 0 {
            return Err(ConfigError::InvalidConfig(
                "Max connections must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}
