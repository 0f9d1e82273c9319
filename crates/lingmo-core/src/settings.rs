//! Shared handle to the runtime settings.
//!
//! Readers take a cheap `Arc` snapshot per request; writers validate a copy
//! and swap it in, so a rejected value never becomes visible.

use std::sync::{Arc, RwLock};

use lingmo_types::config::{GatewaySettings, SettingKey};
use lingmo_types::error::ConfigError;

#[derive(Debug)]
pub struct SettingsHandle {
    current: RwLock<Arc<GatewaySettings>>,
}

impl SettingsHandle {
    pub fn new(settings: GatewaySettings) -> Self {
        Self {
            current: RwLock::new(Arc::new(settings)),
        }
    }

    /// The settings in force right now.
    pub fn current(&self) -> Arc<GatewaySettings> {
        match self.current.read() {
            Ok(guard) => Arc::clone(&*guard),
            Err(poisoned) => Arc::clone(&*poisoned.into_inner()),
        }
    }

    /// Validate `raw` for `key` against a copy of the current settings.
    ///
    /// Nothing is installed; call [`SettingsHandle::install`] with the result.
    pub fn validate(&self, key: SettingKey, raw: &str) -> Result<GatewaySettings, ConfigError> {
        let mut next = (*self.current()).clone();
        next.apply(key, raw)?;
        Ok(next)
    }

    /// Replace the settings snapshot.
    pub fn install(&self, settings: GatewaySettings) {
        let next = Arc::new(settings);
        match self.current.write() {
            Ok(mut guard) => *guard = next,
            Err(poisoned) => *poisoned.into_inner() = next,
        }
    }

    /// Validate and install under one write guard, so concurrent updates of
    /// different keys never drop each other.
    pub fn update(&self, key: SettingKey, raw: &str) -> Result<Arc<GatewaySettings>, ConfigError> {
        let mut guard = match self.current.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let mut next = (**guard).clone();
        next.apply(key, raw)?;
        let next = Arc::new(next);
        *guard = Arc::clone(&next);
        Ok(next)
    }
}

impl Default for SettingsHandle {
    fn default() -> Self {
        Self::new(GatewaySettings::default())
    }
}
