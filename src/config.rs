//! Persisted power settings: role, resolution mode, overrides and the
//! system-default timeout knobs. The storage backend is out of scope; this
//! module owns the schema, the JSON codec and a shared async handle.

use crate::profile::PowerProfile;
use crate::types::Role;
use embassy_sync::{blocking_mutex::raw::CriticalSectionRawMutex, mutex::Mutex};
use log::warn;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

// Version for settings migration
const SETTINGS_VERSION: u8 = 1;

/// Forced base-profile selection for granular resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ForcedProfile {
    Auto,
    AlwaysPlugged,
    AlwaysBattery,
}

impl Default for ForcedProfile {
    fn default() -> Self {
        ForcedProfile::Auto
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PowerSettings {
    pub version: u8,
    pub role: Role,
    /// Granular (layered) resolution when true, legacy two-profile mode
    /// when false.
    pub granular_power_management: bool,
    pub force_profile: ForcedProfile,
    /// User override applied wholesale when running on external power.
    #[serde(default)]
    pub plugged_in_profile: Option<PowerProfile>,
    /// User override applied wholesale when running on battery.
    #[serde(default)]
    pub battery_profile: Option<PowerProfile>,
    /// Legacy power-saving flag, honored only in legacy mode.
    pub is_power_saving: bool,

    // System-default timeout overrides; 0 keeps the built-in default.
    pub screen_on_secs: u32,
    pub wait_bluetooth_secs: u32,
    pub min_wake_secs: u32,
    pub ls_secs: u32,
    pub sds_secs: u32,
}

impl Default for PowerSettings {
    fn default() -> Self {
        Self {
            version: SETTINGS_VERSION,
            role: Role::Client,
            granular_power_management: false,
            force_profile: ForcedProfile::Auto,
            plugged_in_profile: None,
            battery_profile: None,
            is_power_saving: false,
            screen_on_secs: 0,
            wait_bluetooth_secs: 0,
            min_wake_secs: 0,
            ls_secs: 0,
            sds_secs: 0,
        }
    }
}

#[derive(Debug)]
pub enum ConfigError {
    Decode(serde_json::Error),
    Encode(serde_json::Error),
    Version(u8),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Decode(e) => write!(f, "settings decode failed: {}", e),
            ConfigError::Encode(e) => write!(f, "settings encode failed: {}", e),
            ConfigError::Version(v) => write!(f, "unsupported settings version {}", v),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Decode settings from their JSON form. Callers that can tolerate loss
/// should fall back to `PowerSettings::default()` on error.
pub fn decode_settings(json: &str) -> Result<PowerSettings, ConfigError> {
    let settings: PowerSettings = serde_json::from_str(json).map_err(ConfigError::Decode)?;
    if settings.version != SETTINGS_VERSION {
        warn!(
            "settings version {} != {}, refusing to migrate silently",
            settings.version, SETTINGS_VERSION
        );
        return Err(ConfigError::Version(settings.version));
    }
    Ok(settings)
}

pub fn encode_settings(settings: &PowerSettings) -> Result<String, ConfigError> {
    serde_json::to_string(settings).map_err(ConfigError::Encode)
}

/// Shared async handle over the live settings, for config-change handlers.
pub struct ConfigManager {
    settings: Arc<Mutex<CriticalSectionRawMutex, PowerSettings>>,
}

impl ConfigManager {
    pub fn new(initial: PowerSettings) -> Self {
        Self {
            settings: Arc::new(Mutex::new(initial)),
        }
    }

    pub fn get_handle(&self) -> Arc<Mutex<CriticalSectionRawMutex, PowerSettings>> {
        Arc::clone(&self.settings)
    }

    pub async fn get_settings(&self) -> PowerSettings {
        self.settings.lock().await.clone()
    }

    pub async fn update_settings<F>(&self, update_fn: F)
    where
        F: FnOnce(&mut PowerSettings),
    {
        let mut settings = self.settings.lock().await;
        update_fn(&mut settings);
    }
}
