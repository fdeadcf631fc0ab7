use imagegen_core::config::{env_or, require, ConfigError};

/// Default base URL of the provider's HTTP API.
pub const DEFAULT_API_URL: &str = "https://api.replicate.com/v1";
/// Default model input that receives reference image URLs.
pub const DEFAULT_REFERENCE_INPUT: &str = "image_input";

/// Provider connection settings.
#[derive(Debug, Clone)]
pub struct ReplicateConfig {
    /// Base API URL without trailing slash.
    pub api_url: String,
    pub api_token: String,
    /// Model in `owner/name` form.
    pub model: String,
    /// Name of the model input that takes reference image URLs.
    pub reference_input: String,
    pub request_timeout_secs: u64,
}

impl ReplicateConfig {
    /// Load configuration from environment variables.
    ///
    /// | Env Var                      | Default                        |
    /// |------------------------------|--------------------------------|
    /// | `REPLICATE_API_URL`          | `https://api.replicate.com/v1` |
    /// | `REPLICATE_API_TOKEN`        | required                       |
    /// | `REPLICATE_MODEL`            | required                       |
    /// | `REPLICATE_REFERENCE_INPUT`  | `image_input`                  |
    /// | `REPLICATE_TIMEOUT_SECS`     | `60`                           |
    pub fn from_env() -> Result<Self, ConfigError> {
        let api_url: String = env_or("REPLICATE_API_URL", DEFAULT_API_URL.to_string())?;
        let model = require("REPLICATE_MODEL")?;
        if !model.contains('/') {
            return Err(ConfigError::Invalid {
                key: "REPLICATE_MODEL",
                value: model,
                reason: "expected owner/name".to_string(),
            });
        }

        Ok(Self {
            api_url: api_url.trim_end_matches('/').to_string(),
            api_token: require("REPLICATE_API_TOKEN")?,
            model,
            reference_input: env_or("REPLICATE_REFERENCE_INPUT", DEFAULT_REFERENCE_INPUT.to_string())?,
            request_timeout_secs: env_or("REPLICATE_TIMEOUT_SECS", 60)?,
        })
    }
}
