use anyhow::Context;
use embassy_executor::Spawner;
use embassy_time::{Duration, Timer};
use log::info;
use meshpower_rs::config::{decode_settings, ConfigManager, PowerSettings};
use meshpower_rs::controller::{PlatformInfo, PowerController, PowerHandles};
use meshpower_rs::hardware::sim::{
    SimButton, SimDisplay, SimPowerHal, SimPowerSource, SimRadio, SimWifi,
};
use meshpower_rs::hardware::PowerSource;
use meshpower_rs::types::{PowerEvent, Role};
use std::sync::Arc;

/// Settings come from MESHPOWER_SETTINGS (JSON) when present, otherwise a
/// granular-mode default.
fn load_settings() -> anyhow::Result<PowerSettings> {
    match std::env::var("MESHPOWER_SETTINGS") {
        Ok(json) => decode_settings(&json).context("invalid MESHPOWER_SETTINGS"),
        Err(_) => Ok(PowerSettings {
            granular_power_management: true,
            ..PowerSettings::default()
        }),
    }
}

/// Drives the simulated device through a short session: button press,
/// serial connect/disconnect, a power-source flip that forces a profile
/// change, then a role change through the config path.
#[embassy_executor::task]
async fn demo_task(handles: PowerHandles, power: Arc<SimPowerSource>, config: ConfigManager) {
    Timer::after(Duration::from_secs(4)).await; // let the boot hold expire
    handles.events.send(PowerEvent::Press).await;

    Timer::after(Duration::from_secs(1)).await;
    handles.events.send(PowerEvent::SerialConnected).await;
    Timer::after(Duration::from_secs(1)).await;
    handles.events.send(PowerEvent::SerialDisconnected).await;

    Timer::after(Duration::from_secs(1)).await;
    info!("demo: unplugging external power");
    power.set_external_power(false);

    Timer::after(Duration::from_secs(2)).await;
    info!("demo: switching role to Router");
    config.update_settings(|s| s.role = Role::Router).await;
    let settings = config.get_settings().await;
    handles.apply_settings(settings, power.has_external_power());
}

#[embassy_executor::main]
async fn main(spawner: Spawner) {
    // Bind the log crate to the host logging facilities
    env_logger::builder()
        .filter_level(log::LevelFilter::Debug)
        .init();

    info!("Starting mesh node power controller (simulated hardware)");

    let settings = match load_settings() {
        Ok(settings) => settings,
        Err(e) => {
            log::error!("{:#} - using defaults", e);
            PowerSettings::default()
        }
    };
    let config = ConfigManager::new(settings.clone());

    let power = Arc::new(SimPowerSource::new(true));
    let wifi = Arc::new(SimWifi::default());
    let hal = Arc::new(SimPowerHal::default());
    let display = Arc::new(SimDisplay::default());
    let radio = Arc::new(SimRadio::default());
    let button = Arc::new(SimButton::default());

    let platform = PlatformInfo {
        light_sleep_capable: true,
        eink_screen: false,
    };

    let mut controller = PowerController::new(
        settings,
        platform,
        power.clone(),
        wifi,
        hal,
        display,
        radio,
        button,
    );

    if spawner
        .spawn(demo_task(controller.handles(), power, config))
        .is_err()
    {
        log::warn!("Failed to spawn demo task - continuing without it");
    }

    controller.run().await;
}
