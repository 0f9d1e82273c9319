//! Gateway configuration types.
//!
//! [`GatewayFileConfig`] is the process-level `config.toml` read once at
//! startup. [`GatewaySettings`] holds the runtime key/value settings that
//! operators change through the management API while the gateway runs.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::model::Credential;

/// Process configuration loaded from `{data_dir}/config.toml`.
///
/// Every field has a default, so an empty or missing file is valid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayFileConfig {
    pub host: String,
    pub port: u16,
    /// Hard timeout for one non-streaming upstream call.
    pub forward_timeout_secs: u64,
    /// Timeout for establishing an upstream stream and receiving each event.
    pub stream_timeout_secs: u64,
    pub connect_test_timeout_secs: u64,
    pub quota_sync_interval_secs: u64,
    /// Base delay between failover attempts. Zero disables backoff.
    pub retry_backoff_ms: u64,
    pub retry_backoff_max_ms: u64,
    pub audit_channel_capacity: usize,
}

impl Default for GatewayFileConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            forward_timeout_secs: 120,
            stream_timeout_secs: 300,
            connect_test_timeout_secs: 10,
            quota_sync_interval_secs: 60,
            retry_backoff_ms: 0,
            retry_backoff_max_ms: 2000,
            audit_channel_capacity: 1024,
        }
    }
}

impl GatewayFileConfig {
    pub fn forward_timeout(&self) -> Duration {
        Duration::from_secs(self.forward_timeout_secs)
    }

    pub fn stream_timeout(&self) -> Duration {
        Duration::from_secs(self.stream_timeout_secs)
    }

    pub fn connect_test_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_test_timeout_secs)
    }

    pub fn quota_sync_interval(&self) -> Duration {
        Duration::from_secs(self.quota_sync_interval_secs.max(1))
    }

    /// Delay before failover attempt number `attempt` (0-based).
    ///
    /// Doubles per attempt, capped at `retry_backoff_max_ms`. The first
    /// attempt never waits.
    pub fn retry_backoff(&self, attempt: u32) -> Duration {
        if self.retry_backoff_ms == 0 || attempt == 0 {
            return Duration::ZERO;
        }
        let factor = 1u64 << (attempt - 1).min(16);
        let ms = self
            .retry_backoff_ms
            .saturating_mul(factor)
            .min(self.retry_backoff_max_ms);
        Duration::from_millis(ms)
    }
}

/// Keys of the runtime settings table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SettingKey {
    SwitchThreshold,
    AlertThreshold,
    GatewayApiKey,
    FailureThreshold,
    CircuitCooldown,
}

impl SettingKey {
    pub const ALL: [SettingKey; 5] = [
        SettingKey::SwitchThreshold,
        SettingKey::AlertThreshold,
        SettingKey::GatewayApiKey,
        SettingKey::FailureThreshold,
        SettingKey::CircuitCooldown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SettingKey::SwitchThreshold => "switch_threshold",
            SettingKey::AlertThreshold => "alert_threshold",
            SettingKey::GatewayApiKey => "gateway_api_key",
            SettingKey::FailureThreshold => "failure_threshold",
            SettingKey::CircuitCooldown => "circuit_cooldown",
        }
    }
}

impl fmt::Display for SettingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SettingKey {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SettingKey::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| ConfigError::UnknownKey(s.to_string()))
    }
}

/// Runtime settings read by the routing core on every request.
#[derive(Debug, Clone)]
pub struct GatewaySettings {
    /// Usage ratio at or above which a model is no longer selectable.
    pub switch_threshold: f64,
    /// Usage ratio whose upward crossing raises a one-time notification.
    pub alert_threshold: f64,
    /// Inbound bearer secret. Empty rejects every request.
    pub gateway_api_key: Credential,
    /// Consecutive failures before a circuit opens.
    pub failure_threshold: u32,
    /// Time an open circuit waits before allowing a probe.
    pub circuit_cooldown: Duration,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            switch_threshold: 0.99,
            alert_threshold: 0.80,
            gateway_api_key: Credential::new(""),
            failure_threshold: 3,
            circuit_cooldown: Duration::from_secs(30),
        }
    }
}

impl GatewaySettings {
    /// Apply one raw key/value pair, validating it first.
    ///
    /// On error `self` is left unchanged.
    pub fn apply(&mut self, key: SettingKey, raw: &str) -> Result<(), ConfigError> {
        let raw = raw.trim();
        match key {
            SettingKey::SwitchThreshold => self.switch_threshold = parse_ratio(key, raw)?,
            SettingKey::AlertThreshold => self.alert_threshold = parse_ratio(key, raw)?,
            SettingKey::GatewayApiKey => self.gateway_api_key = Credential::new(raw),
            SettingKey::FailureThreshold => {
                let n: u32 = raw.parse().map_err(|_| invalid(key, raw))?;
                if n == 0 {
                    return Err(invalid(key, raw));
                }
                self.failure_threshold = n;
            }
            SettingKey::CircuitCooldown => {
                let secs: f64 = raw.parse().map_err(|_| invalid(key, raw))?;
                if !secs.is_finite() || secs < 0.0 {
                    return Err(invalid(key, raw));
                }
                self.circuit_cooldown = Duration::from_secs_f64(secs);
            }
        }
        Ok(())
    }

    /// Build settings from stored key/value rows, skipping bad or unknown rows.
    ///
    /// Returns the settings plus the list of rows that were rejected.
    pub fn from_entries<'a>(
        entries: impl IntoIterator<Item = (&'a str, &'a str)>,
    ) -> (Self, Vec<ConfigError>) {
        let mut settings = Self::default();
        let mut rejected = Vec::new();
        for (k, v) in entries {
            let result = k.parse::<SettingKey>().and_then(|key| settings.apply(key, v));
            if let Err(e) = result {
                rejected.push(e);
            }
        }
        (settings, rejected)
    }

    /// Canonical string form of one setting, as stored.
    pub fn raw_value(&self, key: SettingKey) -> String {
        match key {
            SettingKey::SwitchThreshold => self.switch_threshold.to_string(),
            SettingKey::AlertThreshold => self.alert_threshold.to_string(),
            SettingKey::GatewayApiKey => self.gateway_api_key.expose().to_string(),
            SettingKey::FailureThreshold => self.failure_threshold.to_string(),
            SettingKey::CircuitCooldown => self.circuit_cooldown.as_secs_f64().to_string(),
        }
    }

    /// All settings for display, with the API key masked.
    pub fn to_public_map(&self) -> BTreeMap<String, String> {
        SettingKey::ALL
            .into_iter()
            .map(|key| {
                let value = match key {
                    SettingKey::GatewayApiKey if self.gateway_api_key.is_blank() => String::new(),
                    SettingKey::GatewayApiKey => "********".to_string(),
                    other => self.raw_value(other),
                };
                (key.as_str().to_string(), value)
            })
            .collect()
    }
}

fn invalid(key: SettingKey, raw: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.as_str().to_string(),
        value: raw.to_string(),
    }
}

/// Parse a threshold as a ratio. Percentages (`> 1`, up to 100) are scaled down.
fn parse_ratio(key: SettingKey, raw: &str) -> Result<f64, ConfigError> {
    let raw_num = raw.trim_end_matches('%');
    let value: f64 = raw_num.parse().map_err(|_| invalid(key, raw))?;
    if !value.is_finite() || value < 0.0 || value > 100.0 {
        return Err(invalid(key, raw));
    }
    if value > 1.0 || raw.ends_with('%') {
        Ok(value / 100.0)
    } else {
        Ok(value)
    }
}
