//! Desired charging parameters shared by every component
//!
//! Two access paths:
//!
//! - Blocking domain: `ConfigStore::lock()` returns a `StoreGuard`, the only
//!   way to mutate the store. Control-channel batches and apply passes hold it
//!   for their whole duration, so they never interleave.
//! - Restricted domain: `get`, `snapshot` and `role_of` read atomics directly.
//!   No lock, no allocation. Each scalar is read whole; two different fields
//!   may be observed at slightly different instants (see `TargetSnapshot`).

use std::sync::atomic::{fence, AtomicBool, AtomicI32, AtomicU32, AtomicU8, AtomicUsize, Ordering};

use parking_lot::{Mutex, MutexGuard};

use crate::error::RangeError;
use crate::power_supply::Property;

/// Sentinel: no override configured for this field
pub const UNSET: i32 = 0;

/// Longest accepted device name, in bytes
pub const NAME_CAP: usize = 31;

/// Default battery power-supply name
pub const DEFAULT_BATTERY: &str = "battery";

/// Default USB input power-supply name
pub const DEFAULT_USB: &str = "usb";

/// `last_pd_written` before the engine ever wrote the protocol mode
pub const PD_NEVER_WRITTEN: i32 = -1;

/// Upper bound on seqlock retries before a restricted-domain reader gives up
const NAME_READ_RETRIES: usize = 4;

/// Which tracked device an override targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceRole {
    Battery,
    UsbInput,
}

impl DeviceRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Battery => "battery",
            Self::UsbInput => "usb",
        }
    }
}

/// Scalar override fields
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    /// Battery target voltage (µV)
    VoltageMax,
    /// Battery constant-charge current (µA)
    ConstantChargeCurrent,
    /// Battery termination current (µA)
    TermCurrent,
    /// Battery charge-control limit (percent)
    ChargeControlLimit,
    /// USB input current limit (µA)
    InputCurrentLimit,
    /// USB input voltage limit (µV)
    InputVoltageLimit,
}

impl Field {
    /// All fields, battery first, in apply order
    pub const ALL: [Field; 6] = [
        Field::VoltageMax,
        Field::ConstantChargeCurrent,
        Field::TermCurrent,
        Field::ChargeControlLimit,
        Field::InputCurrentLimit,
        Field::InputVoltageLimit,
    ];

    const fn index(self) -> usize {
        self as usize
    }

    /// Canonical control-channel key
    pub fn key(&self) -> &'static str {
        match self {
            Self::VoltageMax => "voltage_max",
            Self::ConstantChargeCurrent => "ccc",
            Self::TermCurrent => "term",
            Self::ChargeControlLimit => "charge_limit",
            Self::InputCurrentLimit => "icl",
            Self::InputVoltageLimit => "ivl",
        }
    }

    /// Device the field is written to
    pub fn role(&self) -> DeviceRole {
        match self {
            Self::VoltageMax
            | Self::ConstantChargeCurrent
            | Self::TermCurrent
            | Self::ChargeControlLimit => DeviceRole::Battery,
            Self::InputCurrentLimit | Self::InputVoltageLimit => DeviceRole::UsbInput,
        }
    }

    /// Property written through the device's set path
    pub fn property(&self) -> Property {
        match self {
            Self::VoltageMax => Property::VoltageMax,
            Self::ConstantChargeCurrent => Property::ConstantChargeCurrent,
            Self::TermCurrent => Property::ChargeTermCurrent,
            Self::ChargeControlLimit => Property::ChargeControlLimit,
            Self::InputCurrentLimit => Property::InputCurrentLimit,
            Self::InputVoltageLimit => Property::InputVoltageLimit,
        }
    }

    /// Check a value against the field's domain and normalize it.
    ///
    /// Currents and voltages fold every non-positive value into `UNSET`.
    /// The charge-control limit must be a percentage.
    pub fn validate(&self, value: i32) -> Result<i32, RangeError> {
        match self {
            Self::ChargeControlLimit => {
                if (0..=100).contains(&value) {
                    Ok(value)
                } else {
                    Err(RangeError::OutOfRange {
                        field: self.key(),
                        value,
                        min: 0,
                        max: 100,
                    })
                }
            }
            _ => Ok(value.max(UNSET)),
        }
    }
}

/// Check a protocol-mode target
pub fn validate_protocol_mode(value: i32) -> Result<i32, RangeError> {
    match value {
        0 | 1 => Ok(value),
        _ => Err(RangeError::InvalidMode(value)),
    }
}

/// Check a device name. Names double as sysfs directory names.
pub fn validate_device_name(name: &str) -> Result<(), RangeError> {
    let reason = if name.is_empty() {
        "empty"
    } else if name.len() > NAME_CAP {
        "too long"
    } else if name.contains(['/', '=']) || name.chars().any(char::is_whitespace) {
        "contains '/', '=' or whitespace"
    } else if name == "." || name == ".." {
        "reserved"
    } else {
        return Ok(());
    };
    Err(RangeError::InvalidName {
        name: name.to_string(),
        reason,
    })
}

/// Device name copied out of the store without allocating
#[derive(Clone, Copy)]
pub struct NameBuf {
    buf: [u8; NAME_CAP],
    len: usize,
}

impl NameBuf {
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf[..self.len]
    }

    pub fn as_str(&self) -> &str {
        std::str::from_utf8(self.as_bytes()).unwrap_or_default()
    }
}

/// Seqlock-protected device name.
///
/// Writers are serialized by the store lock. Readers copy the bytes and retry
/// if a write overlapped the copy.
struct AtomicName {
    seq: AtomicU32,
    len: AtomicUsize,
    bytes: [AtomicU8; NAME_CAP],
}

impl AtomicName {
    fn new(name: &str) -> Self {
        let slot = Self {
            seq: AtomicU32::new(0),
            len: AtomicUsize::new(0),
            bytes: std::array::from_fn(|_| AtomicU8::new(0)),
        };
        slot.store(name);
        slot
    }

    fn store(&self, name: &str) {
        let bytes = &name.as_bytes()[..name.len().min(NAME_CAP)];
        let seq = self.seq.load(Ordering::Relaxed);
        self.seq.store(seq.wrapping_add(1), Ordering::Relaxed);
        fence(Ordering::Release);
        for (slot, &b) in self.bytes.iter().zip(bytes) {
            slot.store(b, Ordering::Relaxed);
        }
        self.len.store(bytes.len(), Ordering::Relaxed);
        self.seq.store(seq.wrapping_add(2), Ordering::Release);
    }

    fn load(&self) -> Option<NameBuf> {
        for _ in 0..NAME_READ_RETRIES {
            let before = self.seq.load(Ordering::Acquire);
            if before & 1 == 1 {
                std::hint::spin_loop();
                continue;
            }
            let mut out = NameBuf {
                buf: [0; NAME_CAP],
                len: self.len.load(Ordering::Relaxed).min(NAME_CAP),
            };
            for (dst, src) in out.buf.iter_mut().zip(&self.bytes) {
                *dst = src.load(Ordering::Relaxed);
            }
            fence(Ordering::Acquire);
            if self.seq.load(Ordering::Relaxed) == before {
                return Some(out);
            }
        }
        None
    }
}

/// Plain copy of every scalar in the store.
///
/// Taken without the lock, fields are individually consistent but may come
/// from different instants. Taken through a `StoreGuard`, the copy is exact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TargetSnapshot {
    values: [i32; 6],
    pub pd_target: i32,
    pub pd_enabled: bool,
    pub last_pd_written: i32,
    pub auto_reapply: bool,
}

impl TargetSnapshot {
    pub fn get(&self, field: Field) -> i32 {
        self.values[field.index()]
    }

    /// Field holds a real override
    pub fn is_set(&self, field: Field) -> bool {
        self.get(field) > UNSET
    }

    /// Target protocol mode, if its override is active
    pub fn protocol_mode(&self) -> Option<bool> {
        self.pd_enabled.then_some(self.pd_target == 1)
    }
}

/// Process-wide store of desired values
pub struct ConfigStore {
    values: [AtomicI32; 6],
    pd_target: AtomicI32,
    pd_enabled: AtomicBool,
    last_pd_written: AtomicI32,
    auto_reapply: AtomicBool,
    battery: AtomicName,
    usb: AtomicName,
    lock: Mutex<()>,
}

impl Default for ConfigStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigStore {
    /// Empty store: no overrides, default device names, auto-reapply on
    pub fn new() -> Self {
        Self {
            values: std::array::from_fn(|_| AtomicI32::new(UNSET)),
            pd_target: AtomicI32::new(0),
            pd_enabled: AtomicBool::new(false),
            last_pd_written: AtomicI32::new(PD_NEVER_WRITTEN),
            auto_reapply: AtomicBool::new(true),
            battery: AtomicName::new(DEFAULT_BATTERY),
            usb: AtomicName::new(DEFAULT_USB),
            lock: Mutex::new(()),
        }
    }

    /// Enter the blocking domain
    pub fn lock(&self) -> StoreGuard<'_> {
        StoreGuard {
            store: self,
            _guard: self.lock.lock(),
        }
    }

    /// Lock-free read of one field
    #[inline]
    pub fn get(&self, field: Field) -> i32 {
        self.values[field.index()].load(Ordering::Relaxed)
    }

    /// Lock-free copy of every scalar
    pub fn snapshot(&self) -> TargetSnapshot {
        TargetSnapshot {
            values: std::array::from_fn(|i| self.values[i].load(Ordering::Relaxed)),
            pd_target: self.pd_target.load(Ordering::Relaxed),
            pd_enabled: self.pd_enabled.load(Ordering::Relaxed),
            last_pd_written: self.last_pd_written.load(Ordering::Relaxed),
            auto_reapply: self.auto_reapply.load(Ordering::Relaxed),
        }
    }

    /// Lock-free copy of a tracked device name.
    ///
    /// `None` when a concurrent rename kept racing the copy.
    pub fn name_of(&self, role: DeviceRole) -> Option<NameBuf> {
        match role {
            DeviceRole::Battery => self.battery.load(),
            DeviceRole::UsbInput => self.usb.load(),
        }
    }

    /// Resolve which tracked device `device` is, without locking.
    ///
    /// The battery name wins if both names are equal.
    pub fn role_of(&self, device: &str) -> Option<DeviceRole> {
        [DeviceRole::Battery, DeviceRole::UsbInput]
            .into_iter()
            .find(|&role| {
                self.name_of(role)
                    .is_some_and(|name| name.as_bytes() == device.as_bytes())
            })
    }
}

/// Exclusive access to the store (blocking domain only)
pub struct StoreGuard<'a> {
    store: &'a ConfigStore,
    _guard: MutexGuard<'a, ()>,
}

impl StoreGuard<'_> {
    /// Validate and commit one field
    pub fn set(&mut self, field: Field, value: i32) -> Result<(), RangeError> {
        let value = field.validate(value)?;
        self.store.values[field.index()].store(value, Ordering::Relaxed);
        Ok(())
    }

    pub fn get(&self, field: Field) -> i32 {
        self.store.get(field)
    }

    /// Set the protocol-mode target and activate its override
    pub fn set_protocol_mode(&mut self, value: i32) -> Result<(), RangeError> {
        let value = validate_protocol_mode(value)?;
        self.store.pd_target.store(value, Ordering::Relaxed);
        self.store.pd_enabled.store(true, Ordering::Relaxed);
        Ok(())
    }

    /// Stop enforcing the protocol mode. The target is kept.
    pub fn disable_protocol_mode(&mut self) {
        self.store.pd_enabled.store(false, Ordering::Relaxed);
    }

    /// Remember the protocol mode this engine last wrote successfully
    pub fn record_pd_written(&mut self, value: i32) {
        self.store.last_pd_written.store(value, Ordering::Relaxed);
    }

    pub fn set_device_name(&mut self, role: DeviceRole, name: &str) -> Result<(), RangeError> {
        validate_device_name(name)?;
        match role {
            DeviceRole::Battery => self.store.battery.store(name),
            DeviceRole::UsbInput => self.store.usb.store(name),
        }
        Ok(())
    }

    /// Owned copy of a device name. Writers are excluded, so this never races.
    pub fn device_name(&self, role: DeviceRole) -> String {
        self.store
            .name_of(role)
            .map(|n| n.as_str().to_string())
            .unwrap_or_default()
    }

    pub fn set_auto_reapply(&mut self, enabled: bool) {
        self.store.auto_reapply.store(enabled, Ordering::Relaxed);
    }

    /// Exact copy: no writer can run while the guard is held
    pub fn snapshot(&self) -> TargetSnapshot {
        self.store.snapshot()
    }
}
