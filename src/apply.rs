//! ApplyAll: push every configured override through the normal write path

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::{ConfigStore, DeviceRole, Field, StoreGuard};
use crate::gateway::DeviceWriteGateway;
use crate::pd_mode::ProtocolModeControl;
use crate::power_supply::PowerSupplyClass;

/// Outcome of one apply pass.
///
/// Per-field failures are logged and counted here only; callers that report a
/// single result (the control channel) still report success.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplyReport {
    /// Field writes issued
    pub attempted: usize,
    /// Field writes the device rejected
    pub failed: usize,
    /// Tracked devices that could not be resolved by name
    pub missing: Vec<DeviceRole>,
    /// Protocol-mode write was due but failed (or no control exists)
    pub protocol_failed: bool,
}

impl ApplyReport {
    pub fn is_clean(&self) -> bool {
        self.failed == 0 && self.missing.is_empty() && !self.protocol_failed
    }
}

/// Orchestrates device writes from a store snapshot
pub struct Applier {
    store: Arc<ConfigStore>,
    supplies: Arc<dyn PowerSupplyClass>,
    protocol: Option<Arc<dyn ProtocolModeControl>>,
    gateway: DeviceWriteGateway,
    passes: AtomicU64,
}

impl Applier {
    pub fn new(
        store: Arc<ConfigStore>,
        supplies: Arc<dyn PowerSupplyClass>,
        protocol: Option<Arc<dyn ProtocolModeControl>>,
    ) -> Self {
        Self {
            store,
            supplies,
            protocol,
            gateway: DeviceWriteGateway,
            passes: AtomicU64::new(0),
        }
    }

    pub fn store(&self) -> &Arc<ConfigStore> {
        &self.store
    }

    pub fn protocol(&self) -> Option<&Arc<dyn ProtocolModeControl>> {
        self.protocol.as_ref()
    }

    /// Number of completed apply passes
    pub fn passes(&self) -> u64 {
        self.passes.load(Ordering::Relaxed)
    }

    /// Take the store lock and run one pass
    pub fn apply(&self) -> ApplyReport {
        let mut guard = self.store.lock();
        self.apply_locked(&mut guard)
    }

    /// Run one pass with the store lock already held
    pub fn apply_locked(&self, guard: &mut StoreGuard<'_>) -> ApplyReport {
        let snap = guard.snapshot();
        let mut report = ApplyReport::default();

        if let Some(verified) = snap.protocol_mode() {
            match &self.protocol {
                Some(control) => match control.write(verified) {
                    Ok(()) => guard.record_pd_written(i32::from(verified)),
                    Err(e) => {
                        warn!("Failed to set pd_verifed={}: {}", u8::from(verified), e);
                        report.protocol_failed = true;
                    }
                },
                None => {
                    warn!("pd_verifed override active but no protocol-mode control available");
                    report.protocol_failed = true;
                }
            }
        }

        // One reference per device for the whole pass, dropped on return
        let battery_name = guard.device_name(DeviceRole::Battery);
        let usb_name = guard.device_name(DeviceRole::UsbInput);
        let battery = self.supplies.get_by_name(&battery_name);
        let usb = self.supplies.get_by_name(&usb_name);

        for (role, name, device) in [
            (DeviceRole::Battery, &battery_name, &battery),
            (DeviceRole::UsbInput, &usb_name, &usb),
        ] {
            let Some(device) = device else {
                debug!("{} device {:?} not present, skipping its fields", role.as_str(), name);
                report.missing.push(role);
                continue;
            };

            for field in Field::ALL.into_iter().filter(|f| f.role() == role) {
                if !snap.is_set(field) {
                    continue;
                }
                let value = snap.get(field);
                report.attempted += 1;
                if let Err(e) = self.gateway.write(&**device, field.property(), value) {
                    warn!(
                        "Failed to set {}/{} = {}: {}",
                        name,
                        field.property().as_str(),
                        value,
                        e
                    );
                    report.failed += 1;
                }
            }
        }

        self.passes.fetch_add(1, Ordering::Relaxed);
        if report.is_clean() {
            debug!("Apply pass: {} writes", report.attempted);
        } else {
            info!(
                "Apply pass: {} writes, {} failed, missing devices: {:?}",
                report.attempted, report.failed, report.missing
            );
        }
        report
    }

    /// Heartbeat check: re-apply if the charger silently reset the protocol mode.
    ///
    /// Fires when the override is active, the mode can be read back, it
    /// differs from the target, and the last value this engine wrote is the
    /// target (so the difference is not our own doing).
    pub fn reapply_if_drifted(&self) -> bool {
        let snap = self.store.snapshot();
        if !snap.auto_reapply || !snap.pd_enabled {
            return false;
        }
        let Some(control) = &self.protocol else {
            return false;
        };
        let current = match control.read() {
            Ok(Some(mode)) => i32::from(mode),
            Ok(None) => return false,
            Err(e) => {
                debug!("Failed to read pd_verifed: {}", e);
                return false;
            }
        };
        if current == snap.pd_target || snap.last_pd_written != snap.pd_target {
            return false;
        }

        info!(
            "pd_verifed reset detected ({} -> {}), reapplying settings",
            snap.pd_target, current
        );
        self.apply();
        true
    }
}
