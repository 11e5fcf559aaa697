use super::config::LogLevel;
use thiserror::Error;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Dependencies that are chatty at info level.
const QUIET_TARGETS: [&str; 5] = ["hyper", "hyper_util", "reqwest", "sled", "warp"];

#[derive(Error, Debug)]
pub enum LoggingError {
    #[error("Invalid log filter '{filter}': {source}")]
    Filter {
        filter: String,
        #[source]
        source: tracing_subscriber::filter::ParseError,
    },
    #[error("Failed to set global tracing subscriber: {0}")]
    Install(#[from] tracing_subscriber::util::TryInitError),
}

/// Filter string for `level`, with the noisy dependencies held at `warn`.
pub fn build_filter_string(level: LogLevel) -> String {
    let mut parts = Vec::with_capacity(QUIET_TARGETS.len() + 1);
    parts.push(level.as_str().to_string());
    for target in QUIET_TARGETS {
        parts.push(format!("{target}=warn"));
    }
    parts.join(",")
}

/// Installs the global subscriber. `RUST_LOG` overrides the configured level.
pub fn setup_logging(level: LogLevel, json: bool) -> Result<(), LoggingError> {
    let filter_string = match std::env::var(EnvFilter::DEFAULT_ENV) {
        Ok(from_env) if !from_env.is_empty() => from_env,
        _ => build_filter_string(level),
    };

    let env_filter = EnvFilter::try_new(&filter_string).map_err(|source| LoggingError::Filter {
        filter: filter_string.clone(),
        source,
    })?;

    let registry = tracing_subscriber::registry().with(env_filter);

    if json {
        registry
            .with(
                fmt::layer()
                    .json()
                    .with_target(true)
                    .with_current_span(false),
            )
            .try_init()?;
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_level(true)
                    .compact(),
            )
            .try_init()?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_filter_string() {
        let filter = build_filter_string(LogLevel::Debug);
        assert!(filter.starts_with("debug,"));
        assert!(filter.contains("reqwest=warn"));
        assert!(filter.contains("sled=warn"));
        assert!(EnvFilter::try_new(&filter).is_ok());
    }
}
