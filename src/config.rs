//! Client configuration loading.
//!
//! Settings come from an optional JSON file, then `SIGNALR_*` environment
//! variables. Every field has a default so partial files are fine.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::queue::ClosePolicy;

/// Configuration for a hub session.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct ClientConfig {
    /// Server base address (http, https, ws or wss).
    pub address: String,
    /// Hub name.
    pub hub: String,
    /// Run the SignalR negotiate request before connecting.
    pub negotiate: bool,
    /// Delay between open-state checks while closing, in milliseconds.
    pub close_poll_interval_ms: u64,
    /// Upper bound on the close wait, in milliseconds.
    pub close_timeout_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        let policy = ClosePolicy::default();
        Self {
            address: String::new(),
            hub: String::new(),
            negotiate: true,
            close_poll_interval_ms: millis(policy.poll_interval),
            close_timeout_ms: millis(policy.timeout),
        }
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

impl ClientConfig {
    /// Default configuration for `hub` at `address`.
    #[must_use]
    pub fn new(address: impl Into<String>, hub: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            hub: hub.into(),
            ..Self::default()
        }
    }

    /// Load from `path` (when given), then apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::load_from_file(path)?,
            None => Self::default(),
        };
        config.apply_env_overrides();
        Ok(config)
    }

    fn load_from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("invalid config file {}", path.display()))
    }

    /// Apply `SIGNALR_*` environment variables.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply overrides from `lookup`. Unparsable values are ignored.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(address) = lookup("SIGNALR_ADDRESS") {
            self.address = address;
        }

        if let Some(hub) = lookup("SIGNALR_HUB") {
            self.hub = hub;
        }

        if let Some(negotiate) = lookup("SIGNALR_NEGOTIATE") {
            match negotiate.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" => self.negotiate = true,
                "0" | "false" | "no" => self.negotiate = false,
                other => log::warn!("Ignoring SIGNALR_NEGOTIATE={other:?}"),
            }
        }

        if let Some(poll) = lookup("SIGNALR_CLOSE_POLL_MS") {
            if let Ok(ms) = poll.parse::<u64>() {
                self.close_poll_interval_ms = ms;
            }
        }

        if let Some(timeout) = lookup("SIGNALR_CLOSE_TIMEOUT_MS") {
            if let Ok(ms) = timeout.parse::<u64>() {
                self.close_timeout_ms = ms;
            }
        }
    }

    /// Close handshake timing derived from this configuration.
    #[must_use]
    pub fn close_policy(&self) -> ClosePolicy {
        ClosePolicy {
            poll_interval: Duration::from_millis(self.close_poll_interval_ms.max(1)),
            timeout: Duration::from_millis(self.close_timeout_ms),
        }
    }
}
