//! Line-oriented `key=value` control channel
//!
//! Write path: a batch of newline-separated assignments. The whole batch is
//! parsed and validated before anything is committed; one bad line rejects
//! the batch and leaves the store untouched. A committed batch is followed by
//! one apply pass under the same lock hold.
//!
//! Read path: fixed-format status text (see `read_status`).

use std::fmt::Write as _;

use crate::apply::{ApplyReport, Applier};
use crate::config::{
    validate_device_name, validate_protocol_mode, ConfigStore, DeviceRole, Field, StoreGuard,
};
use crate::error::{ControlError, RangeError};

/// Largest accepted batch, in bytes
pub const MAX_BATCH_LEN: usize = 4096;

/// One validated assignment
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Assignment {
    Set(Field, i32),
    ProtocolMode(i32),
    DisableProtocolMode,
    DeviceName(DeviceRole, String),
}

enum Key {
    Field(Field),
    ProtocolMode,
    DisableProtocolMode,
    DeviceName(DeviceRole),
}

fn lookup_key(key: &str) -> Option<Key> {
    let key = match key {
        "voltage_max" => Key::Field(Field::VoltageMax),
        "constant_charge_current" | "ccc" => Key::Field(Field::ConstantChargeCurrent),
        "term" | "charge_term_current" => Key::Field(Field::TermCurrent),
        "icl" | "input_current_limit" => Key::Field(Field::InputCurrentLimit),
        "ivl" | "input_voltage_limit" => Key::Field(Field::InputVoltageLimit),
        "charge_limit" | "charge_control_limit" => Key::Field(Field::ChargeControlLimit),
        "pd_verifed" => Key::ProtocolMode,
        "pd_verifed_disable" => Key::DisableProtocolMode,
        "batt" => Key::DeviceName(DeviceRole::Battery),
        "usb" => Key::DeviceName(DeviceRole::UsbInput),
        _ => return None,
    };
    Some(key)
}

/// Parse and validate a whole batch
pub fn parse_batch(batch: &str) -> Result<Vec<Assignment>, ControlError> {
    if batch.is_empty() {
        return Err(ControlError::Empty);
    }
    if batch.len() > MAX_BATCH_LEN {
        return Err(ControlError::TooLarge(batch.len()));
    }

    let mut out = Vec::new();
    for (idx, raw) in batch.lines().enumerate() {
        let line = idx + 1;
        let text = raw.trim();
        if text.is_empty() {
            continue;
        }
        let (key, value) = text
            .split_once('=')
            .ok_or(ControlError::MissingSeparator { line })?;
        let (key, value) = (key.trim(), value.trim());

        let parsed = lookup_key(key).ok_or_else(|| ControlError::UnknownKey {
            line,
            key: key.to_string(),
        })?;

        let number = || {
            value
                .parse::<i32>()
                .map_err(|_| ControlError::InvalidNumber {
                    line,
                    key: key.to_string(),
                    value: value.to_string(),
                })
        };
        let range = |source: RangeError| ControlError::Range { line, source };

        let assignment = match parsed {
            Key::Field(field) => Assignment::Set(field, field.validate(number()?).map_err(range)?),
            Key::ProtocolMode => {
                Assignment::ProtocolMode(validate_protocol_mode(number()?).map_err(range)?)
            }
            Key::DisableProtocolMode => Assignment::DisableProtocolMode,
            Key::DeviceName(role) => {
                validate_device_name(value).map_err(range)?;
                Assignment::DeviceName(role, value.to_string())
            }
        };
        out.push(assignment);
    }
    Ok(out)
}

/// Commit validated assignments in order
pub fn commit(guard: &mut StoreGuard<'_>, assignments: &[Assignment]) -> Result<(), RangeError> {
    for assignment in assignments {
        match assignment {
            Assignment::Set(field, value) => guard.set(*field, *value)?,
            Assignment::ProtocolMode(value) => guard.set_protocol_mode(*value)?,
            Assignment::DisableProtocolMode => guard.disable_protocol_mode(),
            Assignment::DeviceName(role, name) => guard.set_device_name(*role, name)?,
        }
    }
    Ok(())
}

/// Handle one write on the control channel: validate, commit, apply.
///
/// The returned report is diagnostic only. Partial device failures do not
/// turn the batch into an error.
pub fn execute(applier: &Applier, batch: &str) -> Result<ApplyReport, ControlError> {
    let assignments = parse_batch(batch)?;
    let mut guard = applier.store().lock();
    // Already validated; only reachable if commit-time checks diverge
    commit(&mut guard, &assignments).map_err(|source| ControlError::Range { line: 0, source })?;
    Ok(applier.apply_locked(&mut guard))
}

/// Render the read-path status text
pub fn read_status(store: &ConfigStore) -> String {
    let guard = store.lock();
    let snap = guard.snapshot();
    let mut out = String::with_capacity(192);

    let _ = writeln!(
        out,
        "batt={} usb={}",
        guard.device_name(DeviceRole::Battery),
        guard.device_name(DeviceRole::UsbInput)
    );
    for field in [
        Field::VoltageMax,
        Field::ConstantChargeCurrent,
        Field::TermCurrent,
        Field::InputCurrentLimit,
        Field::InputVoltageLimit,
        Field::ChargeControlLimit,
    ] {
        let _ = writeln!(out, "{}={}", field.key(), snap.get(field));
    }
    match snap.protocol_mode() {
        Some(verified) => {
            let _ = writeln!(out, "pd_verifed={}", u8::from(verified));
        }
        None => out.push_str("pd_verifed=off\n"),
    }
    let _ = writeln!(
        out,
        "auto_reapply={}",
        if snap.auto_reapply { "yes" } else { "no" }
    );
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::power_supply::{MemoryPowerSupply, MemoryPowerSupplyClass, Property};

    fn applier() -> (Applier, Arc<MemoryPowerSupply>) {
        let class = Arc::new(MemoryPowerSupplyClass::new());
        let battery = class.add(MemoryPowerSupply::new("battery"));
        class.add(MemoryPowerSupply::new("usb"));
        (Applier::new(Arc::new(ConfigStore::new()), class, None), battery)
    }

    #[test]
    fn test_aliases() {
        let batch = "ccc=1\nconstant_charge_current=2\nterm=3\ncharge_term_current=4\n";
        let parsed = parse_batch(batch).unwrap();
        assert_eq!(
            parsed,
            vec![
                Assignment::Set(Field::ConstantChargeCurrent, 1),
                Assignment::Set(Field::ConstantChargeCurrent, 2),
                Assignment::Set(Field::TermCurrent, 3),
                Assignment::Set(Field::TermCurrent, 4),
            ]
        );
    }

    #[test]
    fn test_blank_lines_and_whitespace() {
        let parsed = parse_batch("\n  icl=1500000  \n\n ivl = 9000000\n").unwrap();
        assert_eq!(
            parsed,
            vec![
                Assignment::Set(Field::InputCurrentLimit, 1_500_000),
                Assignment::Set(Field::InputVoltageLimit, 9_000_000),
            ]
        );
    }

    #[test]
    fn test_errors_carry_line_numbers() {
        assert_eq!(
            parse_batch("icl=1\nvoltage_max"),
            Err(ControlError::MissingSeparator { line: 2 })
        );
        assert!(matches!(
            parse_batch("icl=1\n\nfoo=3"),
            Err(ControlError::UnknownKey { line: 3, .. })
        ));
        assert!(matches!(
            parse_batch("icl=1.5"),
            Err(ControlError::InvalidNumber { line: 1, .. })
        ));
        assert!(matches!(
            parse_batch("charge_limit=101"),
            Err(ControlError::Range { line: 1, .. })
        ));
    }

    #[test]
    fn test_size_limits() {
        assert_eq!(parse_batch(""), Err(ControlError::Empty));
        let big = "icl=1\n".repeat(MAX_BATCH_LEN / 6 + 1);
        assert!(matches!(parse_batch(&big), Err(ControlError::TooLarge(_))));
    }

    #[test]
    fn test_pd_disable_ignores_value() {
        assert_eq!(
            parse_batch("pd_verifed_disable=whatever").unwrap(),
            vec![Assignment::DisableProtocolMode]
        );
        assert!(parse_batch("pd_verifed_disable").is_err());
    }

    #[test]
    fn test_names_validated() {
        assert!(parse_batch("batt=").is_err());
        assert!(parse_batch("usb=a/b").is_err());
        assert_eq!(
            parse_batch("batt=bms").unwrap(),
            vec![Assignment::DeviceName(DeviceRole::Battery, "bms".into())]
        );
    }

    #[test]
    fn test_invalid_batch_leaves_store_untouched() {
        let (applier, battery) = applier();
        let err = execute(&applier, "voltage_max=4400000\npd_verifed=2\n").unwrap_err();
        assert!(matches!(err, ControlError::Range { line: 2, .. }));
        assert_eq!(applier.store().get(Field::VoltageMax), 0);
        assert!(battery.attempts().is_empty());
        assert_eq!(applier.passes(), 0);
    }

    #[test]
    fn test_charge_limit_bounds() {
        let (applier, _) = applier();
        execute(&applier, "charge_limit=100").unwrap();
        execute(&applier, "charge_limit=0").unwrap();
        execute(&applier, "charge_limit=80").unwrap();
        assert!(execute(&applier, "charge_limit=101").is_err());
        assert!(execute(&applier, "charge_limit=-1").is_err());
        assert_eq!(applier.store().get(Field::ChargeControlLimit), 80);
    }

    #[test]
    fn test_pd_mode_batch() {
        let (applier, _) = applier();
        execute(&applier, "pd_verifed=0").unwrap();
        assert_eq!(applier.store().snapshot().protocol_mode(), Some(false));
        execute(&applier, "pd_verifed=1").unwrap();
        assert_eq!(applier.store().snapshot().protocol_mode(), Some(true));
        assert!(execute(&applier, "pd_verifed=2").is_err());
        assert_eq!(applier.store().snapshot().protocol_mode(), Some(true));
    }

    #[test]
    fn test_execute_applies_once() {
        let (applier, battery) = applier();
        let report = execute(&applier, "voltage_max=4460000\nccc=6000000\n").unwrap();
        assert_eq!(report.attempted, 2);
        assert_eq!(applier.passes(), 1);
        assert_eq!(battery.value(Property::ConstantChargeCurrent), Some(6_000_000));
    }

    #[test]
    fn test_read_status_format() {
        let (applier, _) = applier();
        execute(
            &applier,
            "batt=bms\nvoltage_max=4460000\nccc=6000000\nicl=-3\ncharge_limit=80\n",
        )
        .unwrap();
        assert_eq!(
            read_status(applier.store()),
            "batt=bms usb=usb\n\
             voltage_max=4460000\n\
             ccc=6000000\n\
             term=0\n\
             icl=0\n\
             ivl=0\n\
             charge_limit=80\n\
             pd_verifed=off\n\
             auto_reapply=yes\n"
        );
    }
}
