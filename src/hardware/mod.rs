//! Hardware abstraction for the collaborators the power core drives.
//!
//! Real platforms implement these traits over their sleep, display and BLE
//! stacks; the `sim` module provides host implementations used by the
//! binary and the tests.

pub mod sim;

use crate::types::WakeCause;
use embassy_time::Duration;

/// USB/external supply sensing.
pub trait PowerSource: Send + Sync {
    fn has_external_power(&self) -> bool;
}

/// WiFi link status, consulted when deciding light-sleep eligibility.
pub trait WifiStatus: Send + Sync {
    fn is_connected(&self) -> bool;
}

/// CPU sleep and power-off primitives.
pub trait PowerHal: Send + Sync {
    /// Blocking bounded light sleep; returns why the CPU woke.
    fn light_sleep(&self, duration: Duration) -> WakeCause;

    /// Deep sleep; on real hardware this does not return (wake resembles a
    /// reset). `forced` marks the unconditional low-battery path.
    fn deep_sleep(&self, duration: Duration, forced: bool);

    /// Hard power-off for the terminal shutdown state.
    fn power_off(&self);
}

/// Screen control. Rendering is out of scope; these are fire-and-forget.
pub trait Display: Send + Sync {
    fn set_on(&self, on: bool);
    fn print(&self, text: &str);
    fn on_press(&self);
}

/// BLE advertising surface. Toggling discoverability must preserve
/// established connections and must never reinitialize the stack.
pub trait BleRadio: Send + Sync {
    /// One-time stack/service bring-up, called at most once per boot.
    fn initialize(&self);
    fn enable_advertising(&self);
    fn disable_advertising(&self);
    fn is_advertising(&self) -> bool;
}

/// Wake-button level, read when translating a sleep wake cause.
pub trait WakeButton: Send + Sync {
    fn is_pressed(&self) -> bool;
}
