use serde::{Deserialize, Serialize};

/// Discrete power modes of the device, from boot to terminal shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerState {
    Boot,
    Sds,
    LowBattSds,
    Ls,
    Nb,
    Dark,
    Serial,
    On,
    Power,
    Shutdown,
}

impl PowerState {
    /// Diagnostic name used in logs. Both deep-sleep states report as "SDS".
    pub fn name(self) -> &'static str {
        match self {
            PowerState::Boot => "BOOT",
            PowerState::Sds | PowerState::LowBattSds => "SDS",
            PowerState::Ls => "LS",
            PowerState::Nb => "NB",
            PowerState::Dark => "DARK",
            PowerState::Serial => "SERIAL",
            PowerState::On => "ON",
            PowerState::Power => "POWER",
            PowerState::Shutdown => "SHUTDOWN",
        }
    }

    /// Depth class of this state on the sleep ceiling scale.
    pub fn ceiling(self) -> MaxPowerState {
        match self {
            PowerState::Sds | PowerState::LowBattSds => MaxPowerState::MaxSds,
            PowerState::Ls => MaxPowerState::MaxLs,
            PowerState::Nb => MaxPowerState::MaxNoBluetooth,
            PowerState::Dark => MaxPowerState::MaxDark,
            _ => MaxPowerState::MaxOn,
        }
    }
}

/// Profile ceiling, ordered deepest-sleep first. A state is allowed when its
/// ceiling class is >= the profile's `max_power_state`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MaxPowerState {
    MaxSds,
    MaxLs,
    MaxNoBluetooth,
    MaxDark,
    MaxOn,
}

/// Runtime signals fed into the power machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerEvent {
    WakeTimer,
    PacketForPhone,
    Press,
    LowBattery,
    Shutdown,
    Input,
    BluetoothPair,
    SerialConnected,
    SerialDisconnected,
    PowerConnected,
    PowerDisconnected,
    ContactFromPhone,
    ReceivedMsg,
    NodedbUpdated,
}

/// Configured operational category of the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    Client,
    ClientMute,
    Router,
    Tracker,
    TakTracker,
    Sensor,
}

impl Default for Role {
    fn default() -> Self {
        Role::Client
    }
}

/// Hardware-reported reason a light-sleep call returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeCause {
    Timer,
    Uart,
    Other,
}

/// Fixed hardware capabilities sampled when the machine is (re)built.
#[derive(Debug, Clone, Copy)]
pub struct HardwareCaps {
    pub has_usb: bool,
    pub light_sleep_capable: bool,
    pub eink_screen: bool,
    pub wifi_connected: bool,
    pub role: Role,
}

// System defaults applied when a profile field is 0 ("use system default").
pub const DEFAULT_SCREEN_ON_SECS: u32 = 60 * 10;
pub const DEFAULT_WAIT_BLUETOOTH_SECS: u32 = 60;
pub const DEFAULT_MIN_WAKE_SECS: u32 = 10;
pub const DEFAULT_LS_SECS: u32 = 60 * 60;
pub const DEFAULT_SDS_SECS: u32 = 60 * 60 * 24 * 365; // effectively until reset

pub const SLEEP_CHUNK_SECS: u32 = 30; // one bounded light-sleep slice
pub const BOOT_HOLD_MS: u64 = 3000;
