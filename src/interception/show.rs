//! Attribute-show return rewrite
//!
//! Return probe on the generic property renderer. When a tracked device's
//! tracked attribute is read successfully and an override is configured, the
//! reader sees the override instead of what the driver rendered.

use std::io::Write;
use std::sync::Arc;

use psy_probes::{InvocationScratch, ReturnHandler, ReturnSlot};

use super::stats::RewriteStats;
use crate::config::{ConfigStore, DeviceRole, Field};

/// Longest `i32` in decimal plus sign and newline
const DECIMAL_CAP: usize = 12;

/// Override field behind a tracked attribute of a device role
pub fn tracked_field(role: DeviceRole, attr: &str) -> Option<Field> {
    match (role, attr) {
        (DeviceRole::Battery, "voltage_max") => Some(Field::VoltageMax),
        (DeviceRole::Battery, "constant_charge_current") => Some(Field::ConstantChargeCurrent),
        (DeviceRole::Battery, "charge_termination_current" | "charge_term_current") => {
            Some(Field::TermCurrent)
        }
        (DeviceRole::UsbInput, "input_current_limit") => Some(Field::InputCurrentLimit),
        (DeviceRole::UsbInput, "input_voltage_limit") => Some(Field::InputVoltageLimit),
        _ => None,
    }
}

/// Render `"<value>\n"` into `buf` without allocating.
///
/// Returns the length, or `None` if it does not fit (`buf` is left alone).
pub fn render_decimal(value: i32, buf: &mut [u8]) -> Option<usize> {
    let mut tmp = [0u8; DECIMAL_CAP];
    let mut cursor = &mut tmp[..];
    writeln!(cursor, "{}", value).ok()?;
    let len = DECIMAL_CAP - cursor.len();
    buf.get_mut(..len)?.copy_from_slice(&tmp[..len]);
    Some(len)
}

/// Generic show hook
pub struct PropertyShowRewriter {
    store: Arc<ConfigStore>,
    stats: Arc<RewriteStats>,
}

impl PropertyShowRewriter {
    pub fn new(store: Arc<ConfigStore>, stats: Arc<RewriteStats>) -> Self {
        Self { store, stats }
    }
}

impl ReturnHandler for PropertyShowRewriter {
    fn ret(&self, scratch: &InvocationScratch, slot: ReturnSlot<'_>) {
        // Never turn a failed read into a success
        if *slot.ret < 0 || !scratch.captured {
            return;
        }
        let Some(role) = self.store.role_of(scratch.device.as_str()) else {
            return;
        };
        let Some(field) = tracked_field(role, scratch.attr.as_str()) else {
            return;
        };
        let value = self.store.get(field);
        if value <= 0 {
            return;
        }
        match render_decimal(value, slot.buf) {
            Some(len) => {
                *slot.ret = len as isize;
                self.stats.show_rewritten();
            }
            None => self.stats.show_no_room(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use psy_probes::{InstrumentationHost, ProbeHandle, ProbeHost, ShowArgs};

    fn driver_render(_args: &ShowArgs<'_>, buf: &mut [u8]) -> isize {
        let text = b"4400000\n";
        buf[..text.len()].copy_from_slice(text);
        text.len() as isize
    }

    fn failing_render(_args: &ShowArgs<'_>, _buf: &mut [u8]) -> isize {
        -(libc::ENODATA as isize)
    }

    struct Rig {
        store: Arc<ConfigStore>,
        stats: Arc<RewriteStats>,
        site: Arc<psy_probes::CallSite>,
        _handle: ProbeHandle,
    }

    fn rig() -> Rig {
        let store = Arc::new(ConfigStore::new());
        let stats = Arc::new(RewriteStats::new());
        let host = ProbeHost::new();
        let site = host.define(psy_probes::symbol::POWER_SUPPLY_SHOW_PROPERTY);
        let handle = host
            .register_kretprobe(
                psy_probes::symbol::POWER_SUPPLY_SHOW_PROPERTY,
                Arc::new(PropertyShowRewriter::new(store.clone(), stats.clone())),
            )
            .unwrap();
        Rig {
            store,
            stats,
            site,
            _handle: handle,
        }
    }

    fn show(rig: &Rig, device: &str, attr: &str, buf: &mut [u8]) -> isize {
        rig.site.call_show(ShowArgs { device, attr }, buf, driver_render)
    }

    #[test]
    fn test_render_decimal() {
        let mut buf = [0u8; 16];
        assert_eq!(render_decimal(4_460_000, &mut buf), Some(8));
        assert_eq!(&buf[..8], b"4460000\n");
        assert_eq!(render_decimal(i32::MIN, &mut buf), Some(12));

        let mut small = [b'x'; 4];
        assert_eq!(render_decimal(4_460_000, &mut small), None);
        assert_eq!(&small, b"xxxx");
    }

    #[test]
    fn test_tracked_attributes() {
        assert_eq!(
            tracked_field(DeviceRole::Battery, "charge_termination_current"),
            Some(Field::TermCurrent)
        );
        assert_eq!(tracked_field(DeviceRole::UsbInput, "voltage_max"), None);
        assert_eq!(tracked_field(DeviceRole::Battery, "input_current_limit"), None);
        assert_eq!(tracked_field(DeviceRole::Battery, "charge_control_limit"), None);
    }

    #[test]
    fn test_rewrites_tracked_attribute() {
        let rig = rig();
        rig.store.lock().set(Field::VoltageMax, 4_460_000).unwrap();

        let mut buf = [0u8; 64];
        let ret = show(&rig, "battery", "voltage_max", &mut buf);
        assert_eq!(ret, 8);
        assert_eq!(&buf[..8], b"4460000\n");
        assert_eq!(rig.stats.drain().show_rewritten, 1);
    }

    #[test]
    fn test_unset_field_passes_through() {
        let rig = rig();
        let mut buf = [0u8; 64];
        let ret = show(&rig, "battery", "voltage_max", &mut buf);
        assert_eq!(ret, 8);
        assert_eq!(&buf[..8], b"4400000\n");
    }

    #[test]
    fn test_untracked_device_passes_through() {
        let rig = rig();
        rig.store.lock().set(Field::InputCurrentLimit, 1_500_000).unwrap();
        let mut buf = [0u8; 64];
        let ret = show(&rig, "wireless", "input_current_limit", &mut buf);
        assert_eq!(&buf[..ret as usize], b"4400000\n");
    }

    #[test]
    fn test_renamed_device_is_tracked() {
        let rig = rig();
        {
            let mut guard = rig.store.lock();
            guard.set_device_name(DeviceRole::UsbInput, "pc_port").unwrap();
            guard.set(Field::InputVoltageLimit, 9_000_000).unwrap();
        }
        let mut buf = [0u8; 64];
        let ret = show(&rig, "pc_port", "input_voltage_limit", &mut buf);
        assert_eq!(&buf[..ret as usize], b"9000000\n");
    }

    #[test]
    fn test_failed_call_not_rewritten() {
        let rig = rig();
        rig.store.lock().set(Field::VoltageMax, 4_460_000).unwrap();
        let mut buf = [0u8; 64];
        let ret = rig.site.call_show(
            ShowArgs {
                device: "battery",
                attr: "voltage_max",
            },
            &mut buf,
            failing_render,
        );
        assert_eq!(ret, -(libc::ENODATA as isize));
        assert!(buf.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_no_room_keeps_driver_output() {
        let rig = rig();
        rig.store.lock().set(Field::VoltageMax, 44_600_000).unwrap();
        let mut buf = [0u8; 8];
        let ret = show(&rig, "battery", "voltage_max", &mut buf);
        assert_eq!(ret, 8);
        assert_eq!(&buf, b"4400000\n");
        assert_eq!(rig.stats.drain().show_no_room, 1);
    }
}
