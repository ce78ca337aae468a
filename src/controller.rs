//! The cooperative runtime: one loop owns dispatch, idle ticking and
//! pending rebuilds; everything else talks to it through the event channel
//! or the atomic entry points (`update_active_profile`, `schedule_rebuild`).

use crate::advertising::AdvertisingController;
use crate::config::PowerSettings;
use crate::coordinator::ReconfigurationCoordinator;
use crate::fsm::ActionVec;
use crate::hardware::{BleRadio, Display, PowerHal, PowerSource, WakeButton, WifiStatus};
use crate::orchestrator::PowerAction;
use crate::profile::ProfileResolver;
use crate::types::{HardwareCaps, PowerEvent, WakeCause, SLEEP_CHUNK_SECS};
use embassy_futures::select::{select, Either};
use embassy_sync::{blocking_mutex::raw::CriticalSectionRawMutex, channel::Channel};
use embassy_time::{Duration, Timer};
use log::{debug, info};
use std::collections::VecDeque;
use std::sync::Arc;

pub type PowerEventChannel = Channel<CriticalSectionRawMutex, PowerEvent, 16>;

/// Capabilities fixed at flash time, as opposed to the sampled ones.
#[derive(Debug, Clone, Copy)]
pub struct PlatformInfo {
    pub light_sleep_capable: bool,
    pub eink_screen: bool,
}

/// Translate a light-sleep wake into the event to dispatch next. The uart
/// cause is reserved for a future serial-wake path.
pub fn wake_event(cause: WakeCause, button_pressed: bool) -> PowerEvent {
    match cause {
        WakeCause::Uart => PowerEvent::SerialConnected,
        WakeCause::Timer => PowerEvent::WakeTimer,
        WakeCause::Other => {
            if button_pressed {
                PowerEvent::Press
            } else {
                PowerEvent::WakeTimer
            }
        }
    }
}

/// The single interpreter for `PowerAction`s. Actions may feed events back
/// into the machine (gate bounces, wake causes, power polls); those run
/// from the same queue so ordering stays strictly sequential.
pub struct ActionRunner {
    display: Arc<dyn Display>,
    hal: Arc<dyn PowerHal>,
    button: Arc<dyn WakeButton>,
    power: Arc<dyn PowerSource>,
    advertising: Arc<AdvertisingController>,
    resolver: Arc<ProfileResolver>,
    secs_slept: u32,
}

impl ActionRunner {
    pub fn new(
        display: Arc<dyn Display>,
        hal: Arc<dyn PowerHal>,
        button: Arc<dyn WakeButton>,
        power: Arc<dyn PowerSource>,
        advertising: Arc<AdvertisingController>,
        resolver: Arc<ProfileResolver>,
    ) -> Self {
        Self {
            display,
            hal,
            button,
            power,
            advertising,
            resolver,
            secs_slept: 0,
        }
    }

    pub fn run(&mut self, coordinator: &ReconfigurationCoordinator, actions: ActionVec<PowerAction>) {
        let mut queue: VecDeque<PowerAction> = actions.into_iter().collect();
        while let Some(action) = queue.pop_front() {
            match action {
                PowerAction::ScreenOn => self.display.set_on(true),
                PowerAction::ScreenOff => self.display.set_on(false),
                PowerAction::ScreenPress => self.display.on_press(),
                PowerAction::ShowMessage(text) => self.display.print(text),
                PowerAction::SetAdvertising(enabled) => self.advertising.set_enabled(enabled),
                PowerAction::ResetSleepCounter => self.secs_slept = 0,
                PowerAction::PowerOff => self.hal.power_off(),
                PowerAction::EnterDeepSleep { forced } => {
                    if forced || self.resolver.allow_deep_sleep() {
                        let duration = Duration::from_secs(self.resolver.sds_secs() as u64);
                        self.hal.deep_sleep(duration, forced);
                    } else {
                        // The one place policy pre-empts a hardware action:
                        // bounce back to a running state instead of sleeping.
                        info!("deep sleep blocked by power profile");
                        queue.extend(coordinator.trigger(PowerEvent::WakeTimer));
                    }
                }
                PowerAction::PollPowerConnected => {
                    if self.power.has_external_power() {
                        info!("power connected while ON");
                        queue.extend(coordinator.trigger(PowerEvent::PowerConnected));
                    }
                }
                PowerAction::PollPowerDisconnected => {
                    if !self.power.has_external_power() {
                        info!("loss of power while POWER");
                        queue.extend(coordinator.trigger(PowerEvent::PowerDisconnected));
                    }
                }
                PowerAction::SleepCycle => {
                    if let Some(event) = self.sleep_cycle() {
                        queue.extend(coordinator.trigger(event));
                    }
                }
            }
        }
    }

    /// One bounded slice of light sleep. Timer wakes accumulate toward the
    /// configured interval; any other wake turns into an event.
    fn sleep_cycle(&mut self) -> Option<PowerEvent> {
        let ls_secs = self.resolver.ls_secs();
        if self.secs_slept >= ls_secs {
            info!("light-sleep interval elapsed, back to service loop");
            return Some(PowerEvent::WakeTimer);
        }
        let cause = self
            .hal
            .light_sleep(Duration::from_secs(SLEEP_CHUNK_SECS as u64));
        match cause {
            WakeCause::Timer => {
                self.secs_slept += SLEEP_CHUNK_SECS;
                None
            }
            other => Some(wake_event(other, self.button.is_pressed())),
        }
    }
}

/// Process-wide lifecycle root: owns the resolver, the coordinator and the
/// interpreter, and runs the cooperative loop.
pub struct PowerController {
    resolver: Arc<ProfileResolver>,
    coordinator: Arc<ReconfigurationCoordinator>,
    runner: ActionRunner,
    power: Arc<dyn PowerSource>,
    wifi: Arc<dyn WifiStatus>,
    platform: PlatformInfo,
    events: Arc<PowerEventChannel>,
    last_usb: bool,
}

/// Cloneable handles for event producers and config-change handlers.
#[derive(Clone)]
pub struct PowerHandles {
    pub resolver: Arc<ProfileResolver>,
    pub coordinator: Arc<ReconfigurationCoordinator>,
    pub events: Arc<PowerEventChannel>,
}

impl PowerHandles {
    /// Config changed: hand the resolver its new settings and get the
    /// machine rebuilt outside any in-flight dispatch.
    pub fn apply_settings(&self, settings: PowerSettings, has_external_power: bool) {
        self.resolver.apply_settings(settings);
        self.resolver.update_active_profile(has_external_power);
        self.coordinator.schedule_rebuild();
    }
}

impl PowerController {
    pub fn new(
        settings: PowerSettings,
        platform: PlatformInfo,
        power: Arc<dyn PowerSource>,
        wifi: Arc<dyn WifiStatus>,
        hal: Arc<dyn PowerHal>,
        display: Arc<dyn Display>,
        radio: Arc<dyn BleRadio>,
        button: Arc<dyn WakeButton>,
    ) -> Self {
        let resolver = Arc::new(ProfileResolver::new(settings));
        let coordinator = Arc::new(ReconfigurationCoordinator::new());
        let advertising = Arc::new(AdvertisingController::new(radio, Arc::clone(&resolver)));
        let runner = ActionRunner::new(
            display,
            hal,
            button,
            Arc::clone(&power),
            advertising,
            Arc::clone(&resolver),
        );
        Self {
            resolver,
            coordinator,
            runner,
            power,
            wifi,
            platform,
            events: Arc::new(Channel::new()),
            last_usb: false,
        }
    }

    pub fn handles(&self) -> PowerHandles {
        PowerHandles {
            resolver: Arc::clone(&self.resolver),
            coordinator: Arc::clone(&self.coordinator),
            events: Arc::clone(&self.events),
        }
    }

    fn caps(&self, has_usb: bool) -> HardwareCaps {
        HardwareCaps {
            has_usb,
            light_sleep_capable: self.platform.light_sleep_capable,
            eink_screen: self.platform.eink_screen,
            wifi_connected: self.wifi.is_connected(),
            role: self.resolver.settings().role,
        }
    }

    /// Build the machine and run the loop. Never returns.
    pub async fn run(&mut self) {
        let has_usb = self.power.has_external_power();
        self.last_usb = has_usb;
        self.resolver.update_active_profile(has_usb);
        let actions = self
            .coordinator
            .install_initial(&self.resolver, self.caps(has_usb));
        self.runner.run(&self.coordinator, actions);

        info!("power controller started");
        let events = Arc::clone(&self.events);
        loop {
            let event_fut = events.receive();
            let periodic_timer = Timer::after(Duration::from_millis(100));

            match select(event_fut, periodic_timer).await {
                Either::First(event) => self.handle_event(event),
                Either::Second(_) => self.periodic_update(),
            }
        }
    }

    fn handle_event(&mut self, event: PowerEvent) {
        debug!("event: {:?}", event);
        let actions = self.coordinator.trigger(event);
        self.runner.run(&self.coordinator, actions);
    }

    /// One pass of the housekeeping that must stay out of dispatch: power
    /// source polling, profile refresh, pending rebuilds and the idle tick.
    fn periodic_update(&mut self) {
        let has_usb = self.power.has_external_power();
        if has_usb != self.last_usb {
            self.last_usb = has_usb;
            let event = if has_usb {
                PowerEvent::PowerConnected
            } else {
                PowerEvent::PowerDisconnected
            };
            self.handle_event(event);
        }

        if self.resolver.update_active_profile(has_usb) {
            self.coordinator.schedule_rebuild();
        }

        let actions = self
            .coordinator
            .process_pending(&self.resolver, self.caps(has_usb));
        self.runner.run(&self.coordinator, actions);

        let actions = self.coordinator.tick();
        self.runner.run(&self.coordinator, actions);
    }
}
