//! Simulated hardware for host runs and deterministic tests.
//!
//! Every implementation records the calls it receives so tests can assert
//! on exact radio/sleep/display traffic instead of timing.

use super::{BleRadio, Display, PowerHal, PowerSource, WakeButton, WifiStatus};
use crate::types::WakeCause;
use embassy_time::Duration;
use log::info;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Mutex;

#[derive(Default)]
pub struct SimPowerSource {
    external: AtomicBool,
}

impl SimPowerSource {
    pub fn new(external: bool) -> Self {
        Self {
            external: AtomicBool::new(external),
        }
    }

    pub fn set_external_power(&self, on: bool) {
        self.external.store(on, Ordering::Relaxed);
    }
}

impl PowerSource for SimPowerSource {
    fn has_external_power(&self) -> bool {
        self.external.load(Ordering::Relaxed)
    }
}

#[derive(Default)]
pub struct SimWifi {
    connected: AtomicBool,
}

impl SimWifi {
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::Relaxed);
    }
}

impl WifiStatus for SimWifi {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }
}

/// Recorded sleep call: (light, duration, forced).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SleepCall {
    Light(Duration),
    Deep { duration: Duration, forced: bool },
    PowerOff,
}

#[derive(Default)]
pub struct SimPowerHal {
    calls: Mutex<Vec<SleepCall>>,
    wake_causes: Mutex<VecDeque<WakeCause>>,
}

impl SimPowerHal {
    /// Queue the wake cause the next light-sleep call reports. Unscripted
    /// calls wake on the timer.
    pub fn push_wake_cause(&self, cause: WakeCause) {
        self.wake_causes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(cause);
    }

    pub fn calls(&self) -> Vec<SleepCall> {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn deep_sleep_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, SleepCall::Deep { .. }))
            .count()
    }
}

impl PowerHal for SimPowerHal {
    fn light_sleep(&self, duration: Duration) -> WakeCause {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(SleepCall::Light(duration));
        self.wake_causes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
            .unwrap_or(WakeCause::Timer)
    }

    fn deep_sleep(&self, duration: Duration, forced: bool) {
        info!("sim: deep sleep {}s forced={}", duration.as_secs(), forced);
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(SleepCall::Deep { duration, forced });
    }

    fn power_off(&self) {
        info!("sim: power off");
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(SleepCall::PowerOff);
    }
}

#[derive(Default)]
pub struct SimDisplay {
    on: AtomicBool,
    presses: AtomicU32,
    printed: Mutex<Vec<String>>,
}

impl SimDisplay {
    pub fn is_on(&self) -> bool {
        self.on.load(Ordering::Relaxed)
    }

    pub fn printed(&self) -> Vec<String> {
        self.printed
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn press_count(&self) -> u32 {
        self.presses.load(Ordering::Relaxed)
    }
}

impl Display for SimDisplay {
    fn set_on(&self, on: bool) {
        self.on.store(on, Ordering::Relaxed);
    }

    fn print(&self, text: &str) {
        self.printed
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(text.to_string());
    }

    fn on_press(&self) {
        self.presses.fetch_add(1, Ordering::Relaxed);
    }
}

#[derive(Default)]
pub struct SimRadio {
    advertising: AtomicBool,
    init_calls: AtomicU32,
    enable_calls: AtomicU32,
    disable_calls: AtomicU32,
}

impl SimRadio {
    pub fn init_calls(&self) -> u32 {
        self.init_calls.load(Ordering::Relaxed)
    }

    pub fn enable_calls(&self) -> u32 {
        self.enable_calls.load(Ordering::Relaxed)
    }

    pub fn disable_calls(&self) -> u32 {
        self.disable_calls.load(Ordering::Relaxed)
    }
}

impl BleRadio for SimRadio {
    fn initialize(&self) {
        self.init_calls.fetch_add(1, Ordering::Relaxed);
        info!("sim: BLE service initialized");
    }

    fn enable_advertising(&self) {
        self.enable_calls.fetch_add(1, Ordering::Relaxed);
        self.advertising.store(true, Ordering::Relaxed);
    }

    fn disable_advertising(&self) {
        self.disable_calls.fetch_add(1, Ordering::Relaxed);
        self.advertising.store(false, Ordering::Relaxed);
    }

    fn is_advertising(&self) -> bool {
        self.advertising.load(Ordering::Relaxed)
    }
}

#[derive(Default)]
pub struct SimButton {
    pressed: AtomicBool,
}

impl SimButton {
    pub fn set_pressed(&self, pressed: bool) {
        self.pressed.store(pressed, Ordering::Relaxed);
    }
}

impl WakeButton for SimButton {
    fn is_pressed(&self) -> bool {
        self.pressed.load(Ordering::Relaxed)
    }
}
