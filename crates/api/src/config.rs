use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use lumen_events::StreamOptions;
use lumen_worker::workers::BuiltinConcurrency;
use lumen_worker::ChannelConfig;

/// A variable was set but could not be parsed.
#[derive(Debug, thiserror::Error)]
#[error("{var} must be a valid {expected} (got '{value}')")]
pub struct ConfigError {
    pub var: &'static str,
    pub value: String,
    pub expected: &'static str,
}

fn env_or<T: FromStr>(var: &'static str, default: T, expected: &'static str) -> Result<T, ConfigError> {
    match std::env::var(var) {
        Ok(value) if !value.trim().is_empty() => value.trim().parse().map_err(|_| ConfigError {
            var,
            value,
            expected,
        }),
        _ => Ok(default),
    }
}

/// Server configuration loaded from environment variables.
///
/// All fields have defaults suitable for local development.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (default: `0.0.0.0`).
    pub host: String,
    /// Bind port (default: `3000`).
    pub port: u16,
    /// Allowed CORS origins, parsed from comma-separated `CORS_ORIGINS` env var.
    pub cors_origins: Vec<String>,
    /// HTTP request timeout in seconds (default: `30`). Not applied to the
    /// event stream.
    pub request_timeout_secs: u64,
    /// Upper bound on draining in-flight jobs at shutdown (default: `30`).
    pub shutdown_timeout_secs: u64,
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                | Default                    |
    /// |------------------------|----------------------------|
    /// | `HOST`                 | `0.0.0.0`                  |
    /// | `PORT`                 | `3000`                     |
    /// | `CORS_ORIGINS`         | `http://localhost:5173`    |
    /// | `REQUEST_TIMEOUT_SECS` | `30`                       |
    /// | `SHUTDOWN_TIMEOUT_SECS`| `30`                       |
    pub fn from_env() -> Result<Self, ConfigError> {
        let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into());

        let cors_origins: Vec<String> = std::env::var("CORS_ORIGINS")
            .unwrap_or_else(|_| "http://localhost:5173".into())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        Ok(Self {
            host,
            port: env_or("PORT", 3000, "u16")?,
            cors_origins,
            request_timeout_secs: env_or("REQUEST_TIMEOUT_SECS", 30, "u64")?,
            shutdown_timeout_secs: env_or("SHUTDOWN_TIMEOUT_SECS", 30, "u64")?,
        })
    }
}

/// Job subsystem settings.
#[derive(Debug, Clone)]
pub struct JobsConfig {
    /// Root of the image tree read and written by the built-in workers.
    pub media_root: PathBuf,
    pub topic_capacity: usize,
    /// Bounded wait when a topic is full. Zero fails immediately.
    pub publish_timeout_ms: u64,
    pub image_process_concurrency: usize,
    pub exif_process_concurrency: usize,
    pub sse_heartbeat_secs: u64,
    pub sse_retry_ms: u64,
    /// Cron expression for the periodic "missing" scan. `None` disables it.
    pub missing_scan_cron: Option<String>,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            media_root: PathBuf::from("./media"),
            topic_capacity: lumen_worker::channel::DEFAULT_TOPIC_CAPACITY,
            publish_timeout_ms: 250,
            image_process_concurrency: 2,
            exif_process_concurrency: 4,
            sse_heartbeat_secs: 25,
            sse_retry_ms: lumen_events::stream::DEFAULT_RETRY_MS,
            missing_scan_cron: None,
        }
    }
}

impl JobsConfig {
    /// Load job settings from environment variables with defaults.
    ///
    /// | Env Var                     | Default   |
    /// |-----------------------------|-----------|
    /// | `MEDIA_ROOT`                | `./media` |
    /// | `TOPIC_CAPACITY`            | `256`     |
    /// | `PUBLISH_TIMEOUT_MS`        | `250`     |
    /// | `IMAGE_PROCESS_CONCURRENCY` | `2`       |
    /// | `EXIF_PROCESS_CONCURRENCY`  | `4`       |
    /// | `SSE_HEARTBEAT_SECS`        | `25`      |
    /// | `SSE_RETRY_MS`              | `10000`   |
    /// | `MISSING_SCAN_CRON`         | unset     |
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            media_root: std::env::var("MEDIA_ROOT")
                .map(PathBuf::from)
                .unwrap_or(defaults.media_root),
            topic_capacity: env_or("TOPIC_CAPACITY", defaults.topic_capacity, "usize")?,
            publish_timeout_ms: env_or("PUBLISH_TIMEOUT_MS", defaults.publish_timeout_ms, "u64")?,
            image_process_concurrency: env_or(
                "IMAGE_PROCESS_CONCURRENCY",
                defaults.image_process_concurrency,
                "usize",
            )?,
            exif_process_concurrency: env_or(
                "EXIF_PROCESS_CONCURRENCY",
                defaults.exif_process_concurrency,
                "usize",
            )?,
            sse_heartbeat_secs: env_or("SSE_HEARTBEAT_SECS", defaults.sse_heartbeat_secs, "u64")?,
            sse_retry_ms: env_or("SSE_RETRY_MS", defaults.sse_retry_ms, "u64")?,
            missing_scan_cron: std::env::var("MISSING_SCAN_CRON")
                .ok()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty()),
        })
    }

    pub fn channel_config(&self) -> ChannelConfig {
        ChannelConfig {
            topic_capacity: self.topic_capacity.max(1),
            publish_timeout: Duration::from_millis(self.publish_timeout_ms),
        }
    }

    pub fn stream_options(&self) -> StreamOptions {
        StreamOptions {
            heartbeat: Duration::from_secs(self.sse_heartbeat_secs.max(1)),
            retry_ms: self.sse_retry_ms,
        }
    }

    pub fn builtin_concurrency(&self) -> BuiltinConcurrency {
        BuiltinConcurrency {
            image_process: self.image_process_concurrency.max(1),
            exif_process: self.exif_process_concurrency.max(1),
        }
    }
}
