use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use imagegen_core::config::{env_or, require, ConfigError};

/// Output format of the tracing subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pretty" | "text" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format '{other}', expected pretty or json")),
        }
    }
}

/// Worker process configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub database_url: String,
    /// Where ingested outputs are written.
    pub output_dir: PathBuf,
    /// Where reference image bytes are kept for re-upload.
    pub reference_dir: PathBuf,
    /// How often pending batches are claimed.
    pub dispatch_interval: Duration,
    pub log_format: LogFormat,
}

impl WorkerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                | Default              |
    /// |------------------------|----------------------|
    /// | `DATABASE_URL`         | required             |
    /// | `OUTPUT_DIR`           | `./data/outputs`     |
    /// | `REFERENCE_DIR`        | `./data/references`  |
    /// | `DISPATCH_INTERVAL_MS` | `1000`               |
    /// | `LOG_FORMAT`           | `pretty`             |
    pub fn from_env() -> Result<Self, ConfigError> {
        let dispatch_interval_ms: u64 = env_or("DISPATCH_INTERVAL_MS", 1_000)?;
        if dispatch_interval_ms == 0 {
            return Err(ConfigError::Invalid {
                key: "DISPATCH_INTERVAL_MS",
                value: "0".to_string(),
                reason: "must be positive".to_string(),
            });
        }

        Ok(Self {
            database_url: require("DATABASE_URL")?,
            output_dir: env_or("OUTPUT_DIR", PathBuf::from("./data/outputs"))?,
            reference_dir: env_or("REFERENCE_DIR", PathBuf::from("./data/references"))?,
            dispatch_interval: Duration::from_millis(dispatch_interval_ms),
            log_format: env_or("LOG_FORMAT", LogFormat::default())?,
        })
    }
}
