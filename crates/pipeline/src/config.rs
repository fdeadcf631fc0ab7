use std::time::Duration;

use imagegen_core::config::{env_or, ConfigError};
use imagegen_core::generation::{
    DEFAULT_MAX_OUTPUTS, DEFAULT_MAX_WAIT_SECS, DEFAULT_POLL_INTERVAL_MS,
};
use imagegen_core::reference::{
    UploadValidityPolicy, DEFAULT_GRACE_MARGIN_HOURS, DEFAULT_UPLOAD_VALIDITY_HOURS,
};

/// Tunables of the orchestration engine.
#[derive(Debug, Clone)]
pub struct GenerationConfig {
    /// Wait between two status checks of one job.
    pub poll_interval: Duration,
    /// Budget after which a still-running job is timed out.
    pub max_wait: Duration,
    /// Largest accepted `requested_count`.
    pub max_outputs: u32,
    /// When a provider-side reference upload must be refreshed.
    pub upload_policy: UploadValidityPolicy,
    /// How long [`shutdown`](crate::GenerationOrchestrator::shutdown) waits
    /// for poll loops to exit.
    pub shutdown_timeout: Duration,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            max_wait: Duration::from_secs(DEFAULT_MAX_WAIT_SECS),
            max_outputs: DEFAULT_MAX_OUTPUTS,
            upload_policy: UploadValidityPolicy::default(),
            shutdown_timeout: Duration::from_secs(10),
        }
    }
}

impl GenerationConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                      | Default |
    /// |------------------------------|---------|
    /// | `GENERATION_POLL_INTERVAL_MS`| `3000`  |
    /// | `GENERATION_MAX_WAIT_SECS`   | `300`   |
    /// | `GENERATION_MAX_OUTPUTS`     | `8`     |
    /// | `UPLOAD_VALIDITY_HOURS`      | `24`    |
    /// | `UPLOAD_GRACE_MARGIN_HOURS`  | `4`     |
    /// | `SHUTDOWN_TIMEOUT_SECS`      | `10`    |
    pub fn from_env() -> Result<Self, ConfigError> {
        let poll_interval_ms: u64 = env_or("GENERATION_POLL_INTERVAL_MS", DEFAULT_POLL_INTERVAL_MS)?;
        let max_wait_secs: u64 = env_or("GENERATION_MAX_WAIT_SECS", DEFAULT_MAX_WAIT_SECS)?;
        let max_outputs: u32 = env_or("GENERATION_MAX_OUTPUTS", DEFAULT_MAX_OUTPUTS)?;
        let validity_hours: i64 = env_or("UPLOAD_VALIDITY_HOURS", DEFAULT_UPLOAD_VALIDITY_HOURS)?;
        let grace_hours: i64 = env_or("UPLOAD_GRACE_MARGIN_HOURS", DEFAULT_GRACE_MARGIN_HOURS)?;
        let shutdown_timeout_secs: u64 = env_or("SHUTDOWN_TIMEOUT_SECS", 10)?;

        if poll_interval_ms == 0 {
            return Err(invalid("GENERATION_POLL_INTERVAL_MS", "0", "must be positive"));
        }
        if max_outputs == 0 {
            return Err(invalid("GENERATION_MAX_OUTPUTS", "0", "must be positive"));
        }
        let upload_policy = UploadValidityPolicy::from_hours(validity_hours, grace_hours)
            .map_err(|e| invalid("UPLOAD_GRACE_MARGIN_HOURS", &grace_hours.to_string(), &e.to_string()))?;

        Ok(Self {
            poll_interval: Duration::from_millis(poll_interval_ms),
            max_wait: Duration::from_secs(max_wait_secs),
            max_outputs,
            upload_policy,
            shutdown_timeout: Duration::from_secs(shutdown_timeout_secs),
        })
    }
}

fn invalid(key: &'static str, value: &str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        key,
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_provider_behaviour() {
        let config = GenerationConfig::default();
        assert_eq!(config.poll_interval, Duration::from_secs(3));
        assert_eq!(config.max_wait, Duration::from_secs(300));
        assert_eq!(config.upload_policy.grace_margin(), chrono::Duration::hours(4));
        assert_eq!(config.upload_policy.validity_window(), chrono::Duration::hours(24));
    }
}
