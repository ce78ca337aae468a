//! Wiring of the concrete power machine.
//!
//! `build_power_fsm` turns the active profile plus the sampled hardware
//! capabilities into a complete transition table. The table is a value: a
//! profile change builds a fresh one and the coordinator swaps it in,
//! preserving the current state.
//!
//! States emit `PowerAction`s instead of touching hardware, so the table
//! can be unit tested without a device and every side effect funnels
//! through one interpreter (`ActionRunner`).

use crate::fsm::{Fsm, StateDef};
use crate::profile::ProfileResolver;
use crate::types::{HardwareCaps, PowerEvent, PowerState, Role, BOOT_HOLD_MS};
use embassy_time::Duration;

/// Side effects a power state can request, interpreted by `ActionRunner`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerAction {
    ScreenOn,
    ScreenOff,
    ScreenPress,
    ShowMessage(&'static str),
    SetAdvertising(bool),
    ResetSleepCounter,
    /// One bounded light-sleep slice; the interpreter turns the wake cause
    /// into the next event.
    SleepCycle,
    /// Deep sleep request. Unforced requests are vetoed by the profile and
    /// bounce back through WAKE_TIMER; forced ones (low battery) are not.
    EnterDeepSleep {
        forced: bool,
    },
    /// ON idle: fire POWER_CONNECTED once external power appears.
    PollPowerConnected,
    /// POWER idle: fire POWER_DISCONNECTED once external power is lost.
    PollPowerDisconnected,
    PowerOff,
}

pub type PowerFsm = Fsm<PowerState, PowerEvent, PowerAction>;

/// Build the power machine for the current profile and hardware caps.
///
/// `preserved` carries the previous machine's state across a rebuild; the
/// one-shot boot timer is only wired when genuinely starting from BOOT.
pub fn build_power_fsm(
    resolver: &ProfileResolver,
    caps: HardwareCaps,
    preserved: Option<PowerState>,
) -> PowerFsm {
    use PowerEvent::*;
    use PowerState::*;

    let profile = resolver.active_profile();
    let bluetooth = resolver.bluetooth_enabled();
    let mut fsm = Fsm::new(preserved.unwrap_or(Boot));

    fsm.add_state(StateDef::new(Boot, Boot.name()));
    fsm.add_state(StateDef::new(Sds, Sds.name()).on_enter(&[PowerAction::EnterDeepSleep { forced: false }]));
    fsm.add_state(
        StateDef::new(LowBattSds, LowBattSds.name()).on_enter(&[PowerAction::EnterDeepSleep { forced: true }]),
    );
    fsm.add_state(
        StateDef::new(Ls, Ls.name())
            .on_enter(&[PowerAction::ScreenOff, PowerAction::ResetSleepCounter])
            .on_idle(&[PowerAction::SleepCycle]),
    );
    fsm.add_state(
        StateDef::new(Nb, Nb.name())
            .on_enter(&[PowerAction::ScreenOff, PowerAction::SetAdvertising(bluetooth)]),
    );
    fsm.add_state(
        StateDef::new(Dark, Dark.name())
            .on_enter(&[PowerAction::SetAdvertising(bluetooth), PowerAction::ScreenOff]),
    );
    fsm.add_state(
        StateDef::new(Serial, Serial.name())
            .on_enter(&[
                PowerAction::SetAdvertising(false),
                PowerAction::ScreenOn,
                PowerAction::ShowMessage("Serial connected"),
            ])
            .on_exit(&[
                PowerAction::SetAdvertising(true),
                PowerAction::ShowMessage("Serial disconnected"),
            ]),
    );
    fsm.add_state(
        StateDef::new(On, On.name())
            .on_enter(&[PowerAction::ScreenOn, PowerAction::SetAdvertising(true)])
            .on_idle(&[PowerAction::PollPowerConnected]),
    );
    fsm.add_state(
        StateDef::new(Power, Power.name())
            .on_enter(&[PowerAction::ScreenOn, PowerAction::SetAdvertising(true)])
            .on_idle(&[PowerAction::PollPowerDisconnected])
            .on_exit(&[PowerAction::ScreenOn, PowerAction::SetAdvertising(true)]),
    );
    fsm.add_state(StateDef::new(PowerState::Shutdown, PowerState::Shutdown.name()).on_enter(&[PowerAction::PowerOff]));

    // One-shot boot hold, only when actually starting from BOOT.
    if preserved.is_none() {
        fsm.add_timed_transition(
            Boot,
            if caps.has_usb { Power } else { On },
            Duration::from_millis(BOOT_HOLD_MS),
            None,
            "boot timeout",
        );
    }

    // Wake-from-light-sleep target follows the bluetooth policy; platforms
    // without light-sleep support always come up in DARK.
    let wake_target = if caps.light_sleep_capable {
        if bluetooth {
            Dark
        } else {
            Nb
        }
    } else {
        Dark
    };
    fsm.add_transition(Ls, WakeTimer, wake_target, None, "Wake timer");

    fsm.add_transition(Ls, PacketForPhone, wake_target, None, "Received packet, exiting light sleep");
    fsm.add_transition(Nb, PacketForPhone, Nb, None, "Received packet, resetting wake");
    fsm.add_transition(Nb, PacketForPhone, Dark, None, "Packet for phone");

    fsm.add_transition(Ls, Press, On, None, "Press");
    fsm.add_transition(Nb, Press, On, None, "Press");
    fsm.add_transition(Dark, Press, if caps.has_usb { Power } else { On }, None, "Press");
    fsm.add_transition(Power, Press, Power, Some(PowerAction::ScreenPress), "Press");
    fsm.add_transition(On, Press, On, Some(PowerAction::ScreenPress), "Press");
    fsm.add_transition(Serial, Press, Serial, Some(PowerAction::ScreenPress), "Press");

    // Critical battery: unconditional, bypasses the deep-sleep-allowed check.
    for from in [Boot, Ls, Nb, Dark, On, Serial] {
        fsm.add_transition(from, LowBattery, LowBattSds, None, "LowBat");
    }

    for from in [Boot, Ls, Nb, Dark, On, Serial] {
        fsm.add_transition(from, PowerEvent::Shutdown, PowerState::Shutdown, None, "Shutdown");
    }

    fsm.add_transition(Ls, Input, On, None, "Input Device");
    fsm.add_transition(Nb, Input, On, None, "Input Device");
    fsm.add_transition(Dark, Input, On, None, "Input Device");
    fsm.add_transition(On, Input, On, None, "Input Device");
    fsm.add_transition(Power, Input, Power, None, "Input Device");

    fsm.add_transition(Dark, BluetoothPair, On, None, "Bluetooth pairing");
    fsm.add_transition(On, BluetoothPair, On, None, "Bluetooth pairing");

    for from in [Ls, Nb, Dark, On, Power] {
        fsm.add_transition(from, SerialConnected, Serial, None, "serial API");
    }
    fsm.add_transition(Serial, SerialDisconnected, On, None, "serial disconnect");

    for from in [Ls, Nb, Dark, On] {
        fsm.add_transition(from, PowerConnected, Power, None, "power connect");
    }
    fsm.add_transition(Power, PowerDisconnected, On, None, "power disconnected");

    // Resets any pending timed deadline out of DARK.
    fsm.add_transition(Dark, ContactFromPhone, Dark, None, "Contact from phone");

    let screen_timeout = Duration::from_secs(resolver.screen_timeout_secs() as u64);

    // E-ink panels honor an explicit 0 timeout as "never blank"; everything
    // else always times out to DARK using the effective timeout.
    if !caps.eink_screen || profile.screen_timeout_secs > 0 {
        fsm.add_timed_transition(On, Dark, screen_timeout, None, "Screen-on timeout");
        fsm.add_timed_transition(Power, Dark, screen_timeout, None, "Screen-on timeout");
    }

    if resolver.screen_stays_responsive() {
        fsm.add_transition(Ls, ReceivedMsg, On, None, "Received text (wake)");
        fsm.add_transition(Nb, ReceivedMsg, On, None, "Received text (wake)");
        fsm.add_transition(Dark, ReceivedMsg, On, None, "Received text (wake)");

        fsm.add_transition(Nb, NodedbUpdated, On, None, "NodeDB update (wake)");
        fsm.add_transition(Dark, NodedbUpdated, On, None, "NodeDB update (wake)");
    } else {
        fsm.add_transition(Ls, ReceivedMsg, Ls, None, "Received text (no wake)");
        fsm.add_transition(Nb, ReceivedMsg, Nb, None, "Received text (no wake)");
        fsm.add_transition(Dark, ReceivedMsg, Dark, None, "Received text (no wake)");

        fsm.add_transition(Nb, NodedbUpdated, Nb, None, "NodeDB update (no wake)");
        fsm.add_transition(Dark, NodedbUpdated, Dark, None, "NodeDB update (no wake)");
    }

    // Screen already on: restart its timer.
    fsm.add_transition(On, ReceivedMsg, On, None, "Received text (restart timer)");
    fsm.add_transition(On, NodedbUpdated, On, None, "NodeDB update (restart timer)");

    let tracker_or_sensor = matches!(caps.role, Role::Tracker | Role::TakTracker | Role::Sensor);
    let light_sleep_eligible = resolver.allow_light_sleep()
        && !caps.wifi_connected
        && !tracker_or_sensor
        && caps.light_sleep_capable;

    if light_sleep_eligible {
        fsm.add_timed_transition(
            Nb,
            Ls,
            Duration::from_secs(resolver.min_wake_secs() as u64),
            None,
            "Min wake timeout",
        );
        fsm.add_timed_transition(
            Dark,
            Ls,
            Duration::from_secs(resolver.bluetooth_timeout_secs() as u64),
            None,
            "Bluetooth timeout",
        );
        // After a full light-sleep interval the machine asks for deep
        // sleep; the SDS entry gate bounces it back here when the profile
        // forbids it.
        fsm.add_timed_transition(
            Ls,
            Sds,
            Duration::from_secs(resolver.sds_secs() as u64),
            None,
            "Shallow sleep",
        );
        fsm.add_transition(Sds, WakeTimer, wake_target, None, "Wake timer");
    } else {
        // Not sleeping: periodically re-enter DARK so config drift gets a
        // chance to take effect.
        fsm.add_timed_transition(Dark, Dark, screen_timeout, None, "Screen-on timeout");
    }

    fsm
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ForcedProfile, PowerSettings};
    use crate::profile::PowerProfile;
    use crate::types::MaxPowerState;

    fn resolver(role: Role, has_usb: bool) -> ProfileResolver {
        let resolver = ProfileResolver::new(PowerSettings {
            role,
            granular_power_management: true,
            ..PowerSettings::default()
        });
        resolver.update_active_profile(has_usb);
        resolver
    }

    fn caps(has_usb: bool) -> HardwareCaps {
        HardwareCaps {
            has_usb,
            light_sleep_capable: true,
            eink_screen: false,
            wifi_connected: false,
            role: Role::Client,
        }
    }

    fn sleepy_resolver() -> ProfileResolver {
        // Battery profile with light sleep opted in via user override.
        let mut settings = PowerSettings {
            role: Role::Client,
            granular_power_management: true,
            ..PowerSettings::default()
        };
        settings.battery_profile = Some(PowerProfile {
            allow_light_sleep: true,
            ..crate::profile::SYSTEM_DEFAULT_BATTERY
        });
        let resolver = ProfileResolver::new(settings);
        resolver.update_active_profile(false);
        resolver
    }

    #[test]
    fn boot_times_out_to_power_with_usb() {
        let r = resolver(Role::Client, true);
        let mut fsm = build_power_fsm(&r, caps(true), None);
        fsm.start();
        let t0 = fsm.entered_at();
        assert!(fsm.poll_timed(t0 + Duration::from_millis(2999)).is_none());
        fsm.poll_timed(t0 + Duration::from_millis(BOOT_HOLD_MS)).unwrap();
        assert_eq!(fsm.current_state(), PowerState::Power);
    }

    #[test]
    fn boot_times_out_to_on_without_usb() {
        let r = resolver(Role::Client, false);
        let mut fsm = build_power_fsm(&r, caps(false), None);
        fsm.start();
        let t0 = fsm.entered_at();
        fsm.poll_timed(t0 + Duration::from_millis(BOOT_HOLD_MS)).unwrap();
        assert_eq!(fsm.current_state(), PowerState::On);
    }

    #[test]
    fn rebuild_preserves_state_and_skips_boot_timer() {
        let r = resolver(Role::Client, false);
        let mut fsm = build_power_fsm(&r, caps(false), Some(PowerState::Dark));
        fsm.start();
        assert_eq!(fsm.current_state(), PowerState::Dark);
        // No boot timer: nothing fires at the boot deadline from a
        // non-BOOT state (DARK only has its own longer deadlines).
        let t0 = fsm.entered_at();
        assert!(fsm.poll_timed(t0 + Duration::from_millis(BOOT_HOLD_MS)).is_none());
    }

    #[test]
    fn ls_wake_goes_dark_when_bluetooth_enabled() {
        let r = resolver(Role::Client, true); // plugged default keeps BT on
        let mut fsm = build_power_fsm(&r, caps(true), Some(PowerState::Ls));
        fsm.start();
        fsm.trigger(PowerEvent::WakeTimer);
        assert_eq!(fsm.current_state(), PowerState::Dark);
    }

    #[test]
    fn ls_wake_goes_nb_when_bluetooth_disabled() {
        let r = resolver(Role::Client, false); // battery default turns BT off
        let mut fsm = build_power_fsm(&r, caps(false), Some(PowerState::Ls));
        fsm.start();
        fsm.trigger(PowerEvent::WakeTimer);
        assert_eq!(fsm.current_state(), PowerState::Nb);
    }

    #[test]
    fn ls_wake_always_dark_without_light_sleep_support() {
        let r = resolver(Role::Client, false);
        let mut c = caps(false);
        c.light_sleep_capable = false;
        let mut fsm = build_power_fsm(&r, c, Some(PowerState::Ls));
        fsm.start();
        fsm.trigger(PowerEvent::WakeTimer);
        assert_eq!(fsm.current_state(), PowerState::Dark);
    }

    #[test]
    fn nb_packet_duplicate_resolves_to_dark() {
        let r = resolver(Role::Client, false);
        let mut fsm = build_power_fsm(&r, caps(false), Some(PowerState::Nb));
        fsm.start();
        fsm.trigger(PowerEvent::PacketForPhone);
        assert_eq!(fsm.current_state(), PowerState::Dark);
    }

    #[test]
    fn low_battery_is_unconditional() {
        let r = resolver(Role::Client, false);
        // Battery default forbids deep sleep; LOW_BATTERY must not care.
        assert!(!r.allow_deep_sleep());
        let mut fsm = build_power_fsm(&r, caps(false), Some(PowerState::On));
        fsm.start();
        let actions = fsm.trigger(PowerEvent::LowBattery);
        assert_eq!(fsm.current_state(), PowerState::LowBattSds);
        assert!(actions.contains(&PowerAction::EnterDeepSleep { forced: true }));
    }

    #[test]
    fn shutdown_is_terminal() {
        let r = resolver(Role::Client, false);
        let mut fsm = build_power_fsm(&r, caps(false), Some(PowerState::On));
        fsm.start();
        let actions = fsm.trigger(PowerEvent::Shutdown);
        assert_eq!(fsm.current_state(), PowerState::Shutdown);
        assert!(actions.contains(&PowerAction::PowerOff));
        for event in [
            PowerEvent::Press,
            PowerEvent::WakeTimer,
            PowerEvent::PowerConnected,
            PowerEvent::SerialConnected,
        ] {
            assert!(fsm.trigger(event).is_empty());
            assert_eq!(fsm.current_state(), PowerState::Shutdown);
        }
    }

    #[test]
    fn press_in_dark_honors_usb() {
        let r = resolver(Role::Client, true);
        let mut fsm = build_power_fsm(&r, caps(true), Some(PowerState::Dark));
        fsm.start();
        fsm.trigger(PowerEvent::Press);
        assert_eq!(fsm.current_state(), PowerState::Power);

        let r = resolver(Role::Client, false);
        let mut fsm = build_power_fsm(&r, caps(false), Some(PowerState::Dark));
        fsm.start();
        fsm.trigger(PowerEvent::Press);
        assert_eq!(fsm.current_state(), PowerState::On);
    }

    #[test]
    fn responsive_profile_wakes_screen_on_message() {
        let r = resolver(Role::Client, true); // plugged default is responsive
        let mut fsm = build_power_fsm(&r, caps(true), Some(PowerState::Dark));
        fsm.start();
        fsm.trigger(PowerEvent::ReceivedMsg);
        assert_eq!(fsm.current_state(), PowerState::On);
    }

    #[test]
    fn quiet_profile_keeps_screen_dark_on_message() {
        let r = resolver(Role::Client, false); // battery default is not responsive
        let mut fsm = build_power_fsm(&r, caps(false), Some(PowerState::Dark));
        fsm.start();
        fsm.trigger(PowerEvent::ReceivedMsg);
        assert_eq!(fsm.current_state(), PowerState::Dark);
        fsm.trigger(PowerEvent::NodedbUpdated);
        assert_eq!(fsm.current_state(), PowerState::Dark);
    }

    #[test]
    fn screen_timeout_dims_on_to_dark() {
        let r = resolver(Role::Client, false);
        let timeout = r.screen_timeout_secs() as u64;
        let mut fsm = build_power_fsm(&r, caps(false), Some(PowerState::On));
        fsm.start();
        let t0 = fsm.entered_at();
        assert!(fsm.poll_timed(t0 + Duration::from_secs(timeout - 1)).is_none());
        fsm.poll_timed(t0 + Duration::from_secs(timeout)).unwrap();
        assert_eq!(fsm.current_state(), PowerState::Dark);
    }

    #[test]
    fn message_in_on_restarts_screen_timer() {
        let r = resolver(Role::Client, false);
        let timeout = r.screen_timeout_secs() as u64;
        let mut fsm = build_power_fsm(&r, caps(false), Some(PowerState::On));
        fsm.start();
        let t0 = fsm.entered_at();
        fsm.trigger(PowerEvent::ReceivedMsg);
        assert_eq!(fsm.current_state(), PowerState::On);
        // Deadline re-armed by the self-loop.
        let t1 = fsm.entered_at();
        assert!(t1 >= t0);
        assert!(fsm.poll_timed(t1 + Duration::from_secs(timeout - 1)).is_none());
    }

    #[test]
    fn eink_with_explicit_zero_timeout_never_dims() {
        let mut settings = PowerSettings {
            role: Role::Client,
            granular_power_management: true,
            force_profile: ForcedProfile::AlwaysPlugged,
            ..PowerSettings::default()
        };
        settings.screen_on_secs = 0;
        let r = ProfileResolver::new(settings);
        r.update_active_profile(true);
        // Plugged default carries a raw 0 screen timeout.
        assert_eq!(r.active_profile().screen_timeout_secs, 0);
        let mut c = caps(true);
        c.eink_screen = true;
        let mut fsm = build_power_fsm(&r, c, Some(PowerState::On));
        fsm.start();
        let t0 = fsm.entered_at();
        assert!(fsm
            .poll_timed(t0 + Duration::from_secs(crate::types::DEFAULT_SCREEN_ON_SECS as u64 * 2))
            .is_none());
    }

    #[test]
    fn eligible_profile_sleeps_from_nb_and_dark() {
        let r = sleepy_resolver();
        let mut fsm = build_power_fsm(&r, caps(false), Some(PowerState::Nb));
        fsm.start();
        let t0 = fsm.entered_at();
        fsm.poll_timed(t0 + Duration::from_secs(r.min_wake_secs() as u64)).unwrap();
        assert_eq!(fsm.current_state(), PowerState::Ls);

        let mut fsm = build_power_fsm(&r, caps(false), Some(PowerState::Dark));
        fsm.start();
        let t0 = fsm.entered_at();
        fsm.poll_timed(t0 + Duration::from_secs(r.bluetooth_timeout_secs() as u64)).unwrap();
        assert_eq!(fsm.current_state(), PowerState::Ls);
    }

    #[test]
    fn sensor_role_never_light_sleeps() {
        let r = sleepy_resolver();
        let mut c = caps(false);
        c.role = Role::Sensor;
        let mut fsm = build_power_fsm(&r, c, Some(PowerState::Nb));
        fsm.start();
        let t0 = fsm.entered_at();
        assert!(fsm.poll_timed(t0 + Duration::from_secs(r.min_wake_secs() as u64)).is_none());
    }

    #[test]
    fn wifi_connection_suppresses_light_sleep() {
        let r = sleepy_resolver();
        let mut c = caps(false);
        c.wifi_connected = true;
        let mut fsm = build_power_fsm(&r, c, Some(PowerState::Nb));
        fsm.start();
        let t0 = fsm.entered_at();
        assert!(fsm.poll_timed(t0 + Duration::from_secs(r.min_wake_secs() as u64)).is_none());
    }

    #[test]
    fn ineligible_profile_gets_dark_drift_check() {
        let r = resolver(Role::Client, false); // battery default: no light sleep
        let timeout = r.screen_timeout_secs() as u64;
        let mut fsm = build_power_fsm(&r, caps(false), Some(PowerState::Dark));
        fsm.start();
        let t0 = fsm.entered_at();
        let actions = fsm.poll_timed(t0 + Duration::from_secs(timeout)).unwrap();
        assert_eq!(fsm.current_state(), PowerState::Dark);
        // Self-loop re-runs DARK's entry posture.
        assert!(actions.contains(&PowerAction::ScreenOff));
    }

    #[test]
    fn contact_from_phone_resets_dark_deadline() {
        let r = sleepy_resolver();
        let bt_timeout = r.bluetooth_timeout_secs() as u64;
        let mut fsm = build_power_fsm(&r, caps(false), Some(PowerState::Dark));
        fsm.start();
        fsm.trigger(PowerEvent::ContactFromPhone);
        assert_eq!(fsm.current_state(), PowerState::Dark);
        let t1 = fsm.entered_at();
        assert!(fsm.poll_timed(t1 + Duration::from_secs(bt_timeout - 1)).is_none());
        fsm.poll_timed(t1 + Duration::from_secs(bt_timeout)).unwrap();
        assert_eq!(fsm.current_state(), PowerState::Ls);
    }

    #[test]
    fn serial_session_toggles_advertising_around_it() {
        let r = resolver(Role::Client, true);
        let mut fsm = build_power_fsm(&r, caps(true), Some(PowerState::On));
        fsm.start();
        let enter = fsm.trigger(PowerEvent::SerialConnected);
        assert_eq!(fsm.current_state(), PowerState::Serial);
        assert!(enter.contains(&PowerAction::SetAdvertising(false)));
        assert!(enter.contains(&PowerAction::ShowMessage("Serial connected")));

        let exit = fsm.trigger(PowerEvent::SerialDisconnected);
        assert_eq!(fsm.current_state(), PowerState::On);
        assert!(exit.contains(&PowerAction::ShowMessage("Serial disconnected")));
        // Exit restores advertising before ON's own entry actions run.
        assert_eq!(exit[0], PowerAction::SetAdvertising(true));
    }

    #[test]
    fn full_light_sleep_interval_requests_deep_sleep() {
        let r = sleepy_resolver();
        let mut fsm = build_power_fsm(&r, caps(false), Some(PowerState::Ls));
        fsm.start();
        let t0 = fsm.entered_at();
        let actions = fsm.poll_timed(t0 + Duration::from_secs(r.sds_secs() as u64)).unwrap();
        assert_eq!(fsm.current_state(), PowerState::Sds);
        assert!(actions.contains(&PowerAction::EnterDeepSleep { forced: false }));
        // The gate bounce path: WAKE_TIMER leaves SDS for the wake target.
        fsm.trigger(PowerEvent::WakeTimer);
        assert_eq!(fsm.current_state(), PowerState::Nb);
    }

    #[test]
    fn power_loss_returns_to_on() {
        let r = resolver(Role::Client, true);
        let mut fsm = build_power_fsm(&r, caps(true), Some(PowerState::Power));
        fsm.start();
        fsm.trigger(PowerEvent::PowerDisconnected);
        assert_eq!(fsm.current_state(), PowerState::On);
    }

    #[test]
    fn ceiling_matches_state_depth() {
        let r = resolver(Role::Client, false);
        // Battery ceiling MaxNoBluetooth: NB allowed, LS and SDS not.
        assert!(r.is_power_state_allowed(PowerState::Nb.ceiling()));
        assert!(!r.is_power_state_allowed(PowerState::Ls.ceiling()));
        assert!(!r.is_power_state_allowed(PowerState::Sds.ceiling()));
        assert_eq!(r.max_power_state(), MaxPowerState::MaxNoBluetooth);
    }
}
