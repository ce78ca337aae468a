//! BLE discoverability policy.
//!
//! Advertising is independent of established connections: disabling it only
//! hides the device from new centrals. The radio stack is initialized at
//! most once per boot; toggles never touch initialization.

use crate::hardware::BleRadio;
use crate::profile::ProfileResolver;
use log::{debug, info};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub struct AdvertisingController {
    radio: Arc<dyn BleRadio>,
    resolver: Arc<ProfileResolver>,
    advertising: AtomicBool,
    initialized: AtomicBool,
}

impl AdvertisingController {
    pub fn new(radio: Arc<dyn BleRadio>, resolver: Arc<ProfileResolver>) -> Self {
        Self {
            radio,
            resolver,
            advertising: AtomicBool::new(false),
            initialized: AtomicBool::new(false),
        }
    }

    fn ensure_initialized(&self) {
        if !self.initialized.swap(true, Ordering::AcqRel) {
            self.radio.initialize();
        }
    }

    /// Start advertising. Idempotent: already-advertising calls issue no
    /// radio traffic.
    pub fn enable(&self) {
        self.ensure_initialized();
        if !self.advertising.swap(true, Ordering::AcqRel) {
            info!("BLE advertising enabled");
            self.radio.enable_advertising();
        }
    }

    /// Stop advertising. Idempotent, and never tears down established
    /// connections.
    pub fn disable(&self) {
        if self.advertising.swap(false, Ordering::AcqRel) {
            info!("BLE advertising disabled");
            self.radio.disable_advertising();
        }
    }

    pub fn set_enabled(&self, enabled: bool) {
        if enabled {
            self.enable();
        } else {
            self.disable();
        }
    }

    pub fn is_advertising(&self) -> bool {
        self.advertising.load(Ordering::Acquire)
    }

    /// A central dropped its connection. Resume advertising only if the
    /// *current* profile still wants bluetooth: a policy change made while
    /// the client was connected takes effect right here.
    pub fn on_client_disconnect(&self) {
        if self.resolver.bluetooth_enabled() {
            self.enable();
        } else {
            debug!("client disconnected, profile keeps advertising off");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PowerSettings;
    use crate::hardware::sim::SimRadio;
    use crate::types::Role;

    fn controller(has_usb: bool) -> (Arc<SimRadio>, Arc<ProfileResolver>, AdvertisingController) {
        let radio = Arc::new(SimRadio::default());
        let resolver = Arc::new(ProfileResolver::new(PowerSettings {
            role: Role::Client,
            granular_power_management: true,
            ..PowerSettings::default()
        }));
        resolver.update_active_profile(has_usb);
        let ctl = AdvertisingController::new(radio.clone() as Arc<dyn BleRadio>, resolver.clone());
        (radio, resolver, ctl)
    }

    #[test]
    fn enable_and_disable_are_idempotent() {
        let (radio, _resolver, ctl) = controller(true);
        ctl.enable();
        ctl.enable();
        assert_eq!(radio.enable_calls(), 1);
        ctl.disable();
        ctl.disable();
        assert_eq!(radio.disable_calls(), 1);
    }

    #[test]
    fn radio_initializes_exactly_once() {
        let (radio, _resolver, ctl) = controller(true);
        ctl.enable();
        ctl.disable();
        ctl.enable();
        assert_eq!(radio.init_calls(), 1);
    }

    #[test]
    fn disconnect_resumes_advertising_when_profile_allows() {
        let (radio, _resolver, ctl) = controller(true); // plugged: BT on
        ctl.on_client_disconnect();
        assert!(ctl.is_advertising());
        assert_eq!(radio.enable_calls(), 1);
    }

    #[test]
    fn profile_change_while_connected_applies_at_disconnect() {
        let (radio, resolver, ctl) = controller(true);
        ctl.enable();
        // Central connects; the stack stops advertising but our policy
        // mirror stays as-is until we decide at disconnect.
        ctl.disable();
        assert_eq!(radio.disable_calls(), 1);
        // Power source flips to battery while connected: BT now off.
        assert!(resolver.update_active_profile(false));
        ctl.on_client_disconnect();
        assert!(!ctl.is_advertising());
        // No new radio traffic: the device stays hidden.
        assert_eq!(radio.enable_calls(), 1);
    }
}
