//! Layered power-policy resolution and atomic publication.
//!
//! A `PowerProfile` is an immutable bundle of sleep/radio/screen policy.
//! The resolver computes the effective profile from system defaults, role
//! modifiers and user overrides, then publishes it through a single atomic
//! pointer so readers on any context get a coherent policy without locking.

use crate::config::{ForcedProfile, PowerSettings};
use crate::types::{
    MaxPowerState, Role, DEFAULT_LS_SECS, DEFAULT_MIN_WAKE_SECS, DEFAULT_SCREEN_ON_SECS,
    DEFAULT_SDS_SECS, DEFAULT_WAIT_BLUETOOTH_SECS,
};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicPtr, Ordering};
use std::sync::RwLock;

/// Immutable power-policy record. Timeout fields use 0 for "system default".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PowerProfile {
    pub allow_deep_sleep: bool,
    pub allow_light_sleep: bool,
    pub bluetooth_enabled: bool,
    pub wifi_enabled: bool,
    pub screen_stays_responsive: bool,
    pub gps_enabled: bool,
    pub screen_timeout_secs: u32,
    pub bluetooth_timeout_secs: u32,
    pub min_wake_secs: u32,
    pub max_power_state: MaxPowerState,
}

/// Plugged-in default: everything on, no sleeping.
pub static SYSTEM_DEFAULT_PLUGGED: PowerProfile = PowerProfile {
    allow_deep_sleep: false,
    allow_light_sleep: false,
    bluetooth_enabled: true,
    wifi_enabled: true,
    screen_stays_responsive: true,
    gps_enabled: true,
    screen_timeout_secs: 0,
    bluetooth_timeout_secs: 0,
    min_wake_secs: 0,
    max_power_state: MaxPowerState::MaxOn,
};

/// Battery default: radios off, quick timeouts, CPU kept awake so the mesh
/// stays reachable.
pub static SYSTEM_DEFAULT_BATTERY: PowerProfile = PowerProfile {
    allow_deep_sleep: false,
    allow_light_sleep: false,
    bluetooth_enabled: false,
    wifi_enabled: false,
    screen_stays_responsive: false,
    gps_enabled: true,
    screen_timeout_secs: 30,
    bluetooth_timeout_secs: 30,
    min_wake_secs: 5,
    max_power_state: MaxPowerState::MaxNoBluetooth,
};

pub static LEGACY_POWER_SAVING: PowerProfile = PowerProfile {
    allow_deep_sleep: true,
    allow_light_sleep: true,
    bluetooth_enabled: false,
    wifi_enabled: false,
    screen_stays_responsive: true,
    gps_enabled: true,
    screen_timeout_secs: 0,
    bluetooth_timeout_secs: 0,
    min_wake_secs: 0,
    max_power_state: MaxPowerState::MaxSds,
};

pub static LEGACY_NORMAL: PowerProfile = PowerProfile {
    allow_deep_sleep: false,
    allow_light_sleep: false,
    bluetooth_enabled: true,
    wifi_enabled: true,
    screen_stays_responsive: true,
    gps_enabled: true,
    screen_timeout_secs: 0,
    bluetooth_timeout_secs: 0,
    min_wake_secs: 0,
    max_power_state: MaxPowerState::MaxDark,
};

enum Resolved {
    Static(&'static PowerProfile),
    Computed(PowerProfile),
}

/// Computes and publishes the effective power profile.
///
/// Readers use `active_profile()` and the query helpers; both are safe from
/// any context. Settings changes go through `apply_settings` followed by a
/// scheduled rebuild.
pub struct ProfileResolver {
    settings: RwLock<PowerSettings>,
    // Always null or a pointer to a 'static profile (a named static or a
    // published leak), so dereferencing is valid for the process lifetime.
    active: AtomicPtr<PowerProfile>,
}

impl ProfileResolver {
    pub fn new(settings: PowerSettings) -> Self {
        Self {
            settings: RwLock::new(settings),
            active: AtomicPtr::new(core::ptr::null_mut()),
        }
    }

    /// Replace the resolver's settings snapshot. The caller is expected to
    /// follow up with `update_active_profile` and a rebuild.
    pub fn apply_settings(&self, settings: PowerSettings) {
        *self
            .settings
            .write()
            .unwrap_or_else(|e| e.into_inner()) = settings;
    }

    pub fn settings(&self) -> PowerSettings {
        self.settings
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Pure resolution: what the effective profile would be for the given
    /// power source, without publishing anything.
    pub fn resolve(&self, has_external_power: bool) -> PowerProfile {
        match self.resolve_inner(&self.settings(), has_external_power) {
            Resolved::Static(p) => *p,
            Resolved::Computed(p) => p,
        }
    }

    fn resolve_inner(&self, settings: &PowerSettings, has_external_power: bool) -> Resolved {
        if !settings.granular_power_management {
            return Resolved::Static(Self::legacy_profile(settings));
        }

        let base = match settings.force_profile {
            ForcedProfile::AlwaysPlugged => &SYSTEM_DEFAULT_PLUGGED,
            ForcedProfile::AlwaysBattery => &SYSTEM_DEFAULT_BATTERY,
            ForcedProfile::Auto => {
                if has_external_power {
                    &SYSTEM_DEFAULT_PLUGGED
                } else {
                    &SYSTEM_DEFAULT_BATTERY
                }
            }
        };

        let mut profile = *base;
        Self::apply_role_modifiers(&mut profile, settings.role);

        // A user override for the current power source wholesale replaces
        // the computed profile; there is no field-by-field merge.
        let user = if has_external_power {
            settings.plugged_in_profile.as_ref()
        } else {
            settings.battery_profile.as_ref()
        };
        if let Some(user) = user {
            profile = *user;
        }

        Resolved::Computed(profile)
    }

    fn legacy_profile(settings: &PowerSettings) -> &'static PowerProfile {
        let power_saving = settings.is_power_saving || settings.role == Role::Router;
        if power_saving {
            &LEGACY_POWER_SAVING
        } else {
            &LEGACY_NORMAL
        }
    }

    fn apply_role_modifiers(profile: &mut PowerProfile, role: Role) {
        match role {
            Role::Router => {
                // Routers must stay awake to relay packets.
                profile.allow_deep_sleep = false;
                profile.allow_light_sleep = false;
                profile.min_wake_secs = 1;
                profile.max_power_state = MaxPowerState::MaxDark;
            }
            Role::Tracker => {
                profile.gps_enabled = true;
                profile.screen_timeout_secs = 10;
            }
            Role::Sensor => {
                profile.bluetooth_enabled = false;
                profile.screen_stays_responsive = false;
                profile.screen_timeout_secs = 5;
            }
            Role::ClientMute => {
                profile.screen_stays_responsive = false;
            }
            Role::Client | Role::TakTracker => {}
        }
    }

    /// Re-resolve against the current power source and publish the result if
    /// the effective policy changed. Returns whether it changed; the caller
    /// schedules the machine rebuild.
    ///
    /// Resolution never mints a new identity for an unchanged policy: if the
    /// fresh result is field-for-field equal to the active profile, the
    /// existing publication is kept and no change is reported.
    pub fn update_active_profile(&self, has_external_power: bool) -> bool {
        let settings = self.settings();
        let resolved = self.resolve_inner(&settings, has_external_power);
        let current = self.active.load(Ordering::Acquire);

        let publish: &'static PowerProfile = match resolved {
            Resolved::Static(p) => {
                if core::ptr::eq(p, current) {
                    return false;
                }
                p
            }
            Resolved::Computed(p) => {
                if !current.is_null() {
                    // Safety: `current` only ever holds statics or leaked
                    // publications, valid for the process lifetime.
                    let active = unsafe { &*current };
                    if *active == p {
                        return false;
                    }
                }
                Box::leak(Box::new(p))
            }
        };

        self.active
            .store(publish as *const _ as *mut _, Ordering::Release);
        info!(
            "power profile changed: {} source, bt={} light_sleep={} deep_sleep={}",
            if has_external_power { "plugged" } else { "battery" },
            publish.bluetooth_enabled,
            publish.allow_light_sleep,
            publish.allow_deep_sleep
        );
        true
    }

    /// Publish an arbitrary profile directly, bypassing resolution. Meant
    /// for diagnostics; the next `update_active_profile` wins it back.
    pub fn force_profile(&self, profile: &'static PowerProfile) {
        self.active
            .store(profile as *const _ as *mut _, Ordering::Release);
        debug!("power profile forced");
    }

    /// Lock-free read of the active profile; never null. Before the first
    /// publication this falls back to the safe legacy default.
    pub fn active_profile(&self) -> &'static PowerProfile {
        let p = self.active.load(Ordering::Acquire);
        if p.is_null() {
            &LEGACY_NORMAL
        } else {
            // Safety: see `active` field invariant.
            unsafe { &*p }
        }
    }

    pub fn allow_deep_sleep(&self) -> bool {
        self.active_profile().allow_deep_sleep
    }

    pub fn allow_light_sleep(&self) -> bool {
        self.active_profile().allow_light_sleep
    }

    pub fn bluetooth_enabled(&self) -> bool {
        self.active_profile().bluetooth_enabled
    }

    pub fn wifi_enabled(&self) -> bool {
        self.active_profile().wifi_enabled
    }

    pub fn screen_stays_responsive(&self) -> bool {
        self.active_profile().screen_stays_responsive
    }

    pub fn gps_enabled(&self) -> bool {
        self.active_profile().gps_enabled
    }

    pub fn screen_timeout_secs(&self) -> u32 {
        let profile = self.active_profile();
        if profile.screen_timeout_secs > 0 {
            return profile.screen_timeout_secs;
        }
        configured_or_default(self.settings().screen_on_secs, DEFAULT_SCREEN_ON_SECS)
    }

    pub fn bluetooth_timeout_secs(&self) -> u32 {
        let profile = self.active_profile();
        if profile.bluetooth_timeout_secs > 0 {
            return profile.bluetooth_timeout_secs;
        }
        configured_or_default(
            self.settings().wait_bluetooth_secs,
            DEFAULT_WAIT_BLUETOOTH_SECS,
        )
    }

    pub fn min_wake_secs(&self) -> u32 {
        let profile = self.active_profile();
        if profile.min_wake_secs > 0 {
            return profile.min_wake_secs;
        }
        configured_or_default(self.settings().min_wake_secs, DEFAULT_MIN_WAKE_SECS)
    }

    /// Light-sleep interval: how long the device stays in LS before waking
    /// for a service pass.
    pub fn ls_secs(&self) -> u32 {
        configured_or_default(self.settings().ls_secs, DEFAULT_LS_SECS)
    }

    /// Deep-sleep interval handed to the hardware primitive.
    pub fn sds_secs(&self) -> u32 {
        configured_or_default(self.settings().sds_secs, DEFAULT_SDS_SECS)
    }

    pub fn max_power_state(&self) -> MaxPowerState {
        self.active_profile().max_power_state
    }

    /// A state is allowed when it is no deeper than the profile ceiling.
    pub fn is_power_state_allowed(&self, candidate: MaxPowerState) -> bool {
        candidate >= self.max_power_state()
    }
}

fn configured_or_default(configured: u32, default: u32) -> u32 {
    if configured > 0 {
        configured
    } else {
        default
    }
}
