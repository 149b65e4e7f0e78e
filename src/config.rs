//! Configuration management module
//!
//! Layered loading: built-in defaults, then an optional JSON config file,
//! then `CONTENT_GATEWAY_*` environment overrides.

use std::env;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::errors::GatewayError;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Bind address for the serving socket.
    pub bind: String,
    pub port: u16,
    /// Expose internal error detail in envelopes. Never enable in production.
    pub debug: bool,
    /// JSON file holding the identity directory entries.
    pub identities_file: Option<PathBuf>,
    /// Maximum accepted media upload size, after base64 decoding.
    pub upload_max_bytes: usize,
    pub limits: RateLimitSettings,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".to_string(),
            port: 8080,
            debug: false,
            identities_file: None,
            upload_max_bytes: 10 * 1024 * 1024,
            limits: RateLimitSettings::default(),
        }
    }
}

/// Sliding-window budgets. The failed-auth window is keyed separately from
/// the general counters and is deliberately much stricter.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitSettings {
    pub identity_max: u32,
    pub source_max: u32,
    pub window_secs: u64,
    pub failed_max: u32,
    pub failed_window_secs: u64,
    /// Windows untouched for this long are removed by the reaper.
    pub retention_secs: u64,
    pub reap_interval_secs: u64,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            identity_max: 100,
            source_max: 30,
            window_secs: 60,
            failed_max: 5,
            failed_window_secs: 300,
            retention_secs: 3600,
            reap_interval_secs: 600,
        }
    }
}

impl GatewayConfig {
    /// Load configuration: defaults, optional file, env overrides.
    pub fn load(config_file: Option<&Path>) -> Result<Self, GatewayError> {
        let mut config = Self::default();

        if let Some(path) = config_file {
            let content = std::fs::read_to_string(path).map_err(|err| {
                GatewayError::internal(anyhow::anyhow!(
                    "failed to read config file {}: {err}",
                    path.display()
                ))
            })?;
            config = serde_json::from_str(&content).map_err(|err| {
                GatewayError::internal(anyhow::anyhow!(
                    "invalid config file {}: {err}",
                    path.display()
                ))
            })?;
        }

        config.apply_env_overrides();
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(bind) = env::var("CONTENT_GATEWAY_BIND") {
            self.bind = bind;
        }
        if let Some(port) = env_parse("CONTENT_GATEWAY_PORT") {
            self.port = port;
        }
        if let Some(debug) = env_parse("CONTENT_GATEWAY_DEBUG") {
            self.debug = debug;
        }
        if let Ok(path) = env::var("CONTENT_GATEWAY_IDENTITIES") {
            self.identities_file = Some(PathBuf::from(path));
        }
        if let Some(max) = env_parse("CONTENT_GATEWAY_UPLOAD_MAX_BYTES") {
            self.upload_max_bytes = max;
        }
        if let Some(limit) = env_parse("CONTENT_GATEWAY_IDENTITY_LIMIT") {
            self.limits.identity_max = limit;
        }
        if let Some(limit) = env_parse("CONTENT_GATEWAY_SOURCE_LIMIT") {
            self.limits.source_max = limit;
        }
        if let Some(secs) = env_parse("CONTENT_GATEWAY_WINDOW_SECS") {
            self.limits.window_secs = secs;
        }
        if let Some(limit) = env_parse("CONTENT_GATEWAY_FAILED_LIMIT") {
            self.limits.failed_max = limit;
        }
        if let Some(secs) = env_parse("CONTENT_GATEWAY_FAILED_WINDOW_SECS") {
            self.limits.failed_window_secs = secs;
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|value| value.parse::<T>().ok())
}
