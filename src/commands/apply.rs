//! One-shot apply without a daemon.

use std::sync::Arc;

use anyhow::Context;
use chg_override::apply::Applier;
use chg_override::config::{ConfigStore, DeviceRole};
use chg_override::control;
use chg_override::pd_mode::{ProtocolModeControl, SysfsProtocolMode};
use chg_override::power_supply::SysfsPowerSupplyClass;
use chg_override::settings::Settings;

use super::CommandResult;

/// Validate and push one batch to sysfs, then print what happened.
pub fn run(settings: &Settings, batch: &str) -> CommandResult {
    let store = Arc::new(ConfigStore::new());
    {
        let mut guard = store.lock();
        guard.set_device_name(DeviceRole::Battery, &settings.battery)?;
        guard.set_device_name(DeviceRole::UsbInput, &settings.usb)?;
    }

    let supplies = Arc::new(SysfsPowerSupplyClass::new(&settings.power_supply_root));
    let protocol = SysfsProtocolMode::probe(&settings.pd_verifed_path)
        .map(|p| Arc::new(p) as Arc<dyn ProtocolModeControl>);
    let applier = Applier::new(store, supplies, protocol);

    let report = control::execute(&applier, batch).context("Rejected batch")?;

    println!("Writes: {} attempted, {} failed", report.attempted, report.failed);
    for role in &report.missing {
        println!("  {} device not found", role.as_str());
    }
    if report.protocol_failed {
        println!("  pd_verifed could not be set");
    }
    print!("{}", control::read_status(applier.store()));
    Ok(())
}
