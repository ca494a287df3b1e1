//! Power supply class integration
//!
//! Devices are reached by name through a `PowerSupplyClass`. Two backends:
//! 1. sysfs (`/sys/class/power_supply/<name>/<property>`)
//! 2. In-memory devices for tests

use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::error::DeviceError;

/// Default sysfs power supply class directory
pub const DEFAULT_ROOT: &str = "/sys/class/power_supply";

/// Writable charging properties (names match the kernel's sysfs attributes)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Property {
    VoltageMax,
    ConstantChargeCurrent,
    ChargeTermCurrent,
    ChargeControlLimit,
    InputCurrentLimit,
    InputVoltageLimit,
}

impl Property {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::VoltageMax => "voltage_max",
            Self::ConstantChargeCurrent => "constant_charge_current",
            Self::ChargeTermCurrent => "charge_term_current",
            Self::ChargeControlLimit => "charge_control_limit",
            Self::InputCurrentLimit => "input_current_limit",
            Self::InputVoltageLimit => "input_voltage_limit",
        }
    }

    /// Map a sysfs attribute name back to a property
    pub fn from_attr(attr: &str) -> Option<Self> {
        match attr {
            "voltage_max" => Some(Self::VoltageMax),
            "constant_charge_current" => Some(Self::ConstantChargeCurrent),
            "charge_term_current" | "charge_termination_current" => Some(Self::ChargeTermCurrent),
            "charge_control_limit" => Some(Self::ChargeControlLimit),
            "input_current_limit" => Some(Self::InputCurrentLimit),
            "input_voltage_limit" => Some(Self::InputVoltageLimit),
            _ => None,
        }
    }
}

/// A property-based device
pub trait PowerSupplyDevice: Send + Sync {
    fn name(&self) -> &str;

    /// Whether the device has a generic set path at all
    fn is_writeable(&self) -> bool;

    /// Generic property-set entry point
    fn set_property(&self, property: Property, value: i32) -> Result<(), DeviceError>;

    /// Render attribute `attr` into `buf`, returning bytes written
    fn show(&self, attr: &str, buf: &mut [u8]) -> Result<usize, DeviceError>;
}

/// Registry that resolves devices by name.
///
/// Every returned `Arc` is one reference on the device; callers drop it when done.
pub trait PowerSupplyClass: Send + Sync {
    fn get_by_name(&self, name: &str) -> Option<Arc<dyn PowerSupplyDevice>>;
}

fn is_plain_name(name: &str) -> bool {
    !name.is_empty() && name != "." && name != ".." && !name.contains('/')
}

/// Power supply backed by a sysfs directory
pub struct SysfsPowerSupply {
    name: String,
    base_path: PathBuf,
}

impl SysfsPowerSupply {
    pub fn new(name: &str, base_path: PathBuf) -> Self {
        Self {
            name: name.to_string(),
            base_path,
        }
    }

    fn attr_path(&self, attr: &str) -> Result<PathBuf, DeviceError> {
        if !is_plain_name(attr) {
            return Err(DeviceError::InvalidValue(format!("attribute {attr:?}")));
        }
        Ok(self.base_path.join(attr))
    }

    fn not_supported(&self, attr: &str) -> DeviceError {
        DeviceError::NotSupported {
            device: self.name.clone(),
            property: attr.to_string(),
        }
    }
}

impl PowerSupplyDevice for SysfsPowerSupply {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_writeable(&self) -> bool {
        self.base_path.is_dir()
    }

    fn set_property(&self, property: Property, value: i32) -> Result<(), DeviceError> {
        let path = self.attr_path(property.as_str())?;
        // Attribute files are never created; a missing file means no such property
        let mut file = match OpenOptions::new().write(true).open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(self.not_supported(property.as_str()))
            }
            Err(e) => return Err(e.into()),
        };
        writeln!(file, "{}", value)?;
        debug!("{} <- {}", path.display(), value);
        Ok(())
    }

    fn show(&self, attr: &str, buf: &mut [u8]) -> Result<usize, DeviceError> {
        let path = self.attr_path(attr)?;
        let contents = match fs::read(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Err(self.not_supported(attr)),
            Err(e) => return Err(e.into()),
        };
        let len = contents.len().min(buf.len());
        buf[..len].copy_from_slice(&contents[..len]);
        Ok(len)
    }
}

/// sysfs power supply class rooted at a directory
pub struct SysfsPowerSupplyClass {
    root: PathBuf,
}

impl SysfsPowerSupplyClass {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

}

impl Default for SysfsPowerSupplyClass {
    fn default() -> Self {
        Self::new(DEFAULT_ROOT)
    }
}

impl PowerSupplyClass for SysfsPowerSupplyClass {
    fn get_by_name(&self, name: &str) -> Option<Arc<dyn PowerSupplyDevice>> {
        if !is_plain_name(name) {
            return None;
        }
        let path = self.root.join(name);
        if !path.is_dir() {
            return None;
        }
        Some(Arc::new(SysfsPowerSupply::new(name, path)))
    }
}

/// In-memory power supply.
///
/// Keeps the last value per property and a log of every set attempt,
/// successful or not. Properties listed via `reject` fail with `Io(EIO)`.
pub struct MemoryPowerSupply {
    name: String,
    writeable: bool,
    values: Mutex<HashMap<String, String>>,
    rejected: Mutex<Vec<Property>>,
    attempts: Mutex<Vec<(Property, i32)>>,
}

impl MemoryPowerSupply {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            writeable: true,
            values: Mutex::new(HashMap::new()),
            rejected: Mutex::new(Vec::new()),
            attempts: Mutex::new(Vec::new()),
        }
    }

    /// Device without a set path
    pub fn read_only(name: &str) -> Self {
        Self {
            writeable: false,
            ..Self::new(name)
        }
    }

    /// Seed an attribute's rendered text
    pub fn with_attr(self, attr: &str, text: &str) -> Self {
        self.values.lock().insert(attr.to_string(), text.to_string());
        self
    }

    /// Make every write of `property` fail
    pub fn reject(&self, property: Property) {
        self.rejected.lock().push(property);
    }

    /// Every set attempt, in order
    pub fn attempts(&self) -> Vec<(Property, i32)> {
        self.attempts.lock().clone()
    }

    /// Last value written to `property`
    pub fn value(&self, property: Property) -> Option<i32> {
        self.values
            .lock()
            .get(property.as_str())
            .and_then(|v| v.trim().parse().ok())
    }
}

impl PowerSupplyDevice for MemoryPowerSupply {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_writeable(&self) -> bool {
        self.writeable
    }

    fn set_property(&self, property: Property, value: i32) -> Result<(), DeviceError> {
        self.attempts.lock().push((property, value));
        if self.rejected.lock().contains(&property) {
            return Err(io::Error::from_raw_os_error(libc::EIO).into());
        }
        self.values
            .lock()
            .insert(property.as_str().to_string(), format!("{}\n", value));
        Ok(())
    }

    fn show(&self, attr: &str, buf: &mut [u8]) -> Result<usize, DeviceError> {
        let values = self.values.lock();
        let text = values.get(attr).ok_or_else(|| DeviceError::NotSupported {
            device: self.name.clone(),
            property: attr.to_string(),
        })?;
        let len = text.len().min(buf.len());
        buf[..len].copy_from_slice(&text.as_bytes()[..len]);
        Ok(len)
    }
}

/// In-memory power supply class
#[derive(Default)]
pub struct MemoryPowerSupplyClass {
    devices: Mutex<HashMap<String, Arc<MemoryPowerSupply>>>,
}

impl MemoryPowerSupplyClass {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a device, returning a handle for inspection
    pub fn add(&self, device: MemoryPowerSupply) -> Arc<MemoryPowerSupply> {
        let device = Arc::new(device);
        self.devices
            .lock()
            .insert(device.name.clone(), Arc::clone(&device));
        device
    }

    pub fn remove(&self, name: &str) -> Option<Arc<MemoryPowerSupply>> {
        self.devices.lock().remove(name)
    }
}

impl PowerSupplyClass for MemoryPowerSupplyClass {
    fn get_by_name(&self, name: &str) -> Option<Arc<dyn PowerSupplyDevice>> {
        self.devices
            .lock()
            .get(name)
            .map(|d| Arc::clone(d) as Arc<dyn PowerSupplyDevice>)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sysfs_tree() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        let battery = dir.path().join("battery");
        fs::create_dir(&battery).unwrap();
        fs::write(battery.join("voltage_max"), "4400000\n").unwrap();
        fs::write(battery.join("constant_charge_current"), "3000000\n").unwrap();
        fs::create_dir(dir.path().join("usb")).unwrap();
        dir
    }

    #[test]
    fn test_property_names() {
        assert_eq!(Property::ChargeTermCurrent.as_str(), "charge_term_current");
        assert_eq!(
            Property::from_attr("charge_termination_current"),
            Some(Property::ChargeTermCurrent)
        );
        assert_eq!(Property::from_attr("capacity"), None);
    }

    #[test]
    fn test_sysfs_lookup() {
        let dir = sysfs_tree();
        let class = SysfsPowerSupplyClass::new(dir.path());
        assert!(class.get_by_name("battery").is_some());
        assert!(class.get_by_name("bms").is_none());
        assert!(class.get_by_name("..").is_none());
        assert!(class.get_by_name("battery/../usb").is_none());
    }

    #[test]
    fn test_sysfs_write_and_show() {
        let dir = sysfs_tree();
        let class = SysfsPowerSupplyClass::new(dir.path());
        let battery = class.get_by_name("battery").unwrap();

        battery.set_property(Property::VoltageMax, 4_460_000).unwrap();
        assert_eq!(
            fs::read_to_string(dir.path().join("battery/voltage_max")).unwrap(),
            "4460000\n"
        );

        let mut buf = [0u8; 32];
        let n = battery.show("voltage_max", &mut buf).unwrap();
        assert_eq!(&buf[..n], b"4460000\n");
    }

    #[test]
    fn test_sysfs_missing_property_not_supported() {
        let dir = sysfs_tree();
        let class = SysfsPowerSupplyClass::new(dir.path());
        let usb = class.get_by_name("usb").unwrap();

        let err = usb.set_property(Property::InputCurrentLimit, 1).unwrap_err();
        assert!(matches!(err, DeviceError::NotSupported { .. }));
        assert_eq!(err.errno(), libc::EOPNOTSUPP);
        // Not created as a side effect
        assert!(!dir.path().join("usb/input_current_limit").exists());
    }

    #[test]
    fn test_memory_device_rejects() {
        let class = MemoryPowerSupplyClass::new();
        let battery = class.add(MemoryPowerSupply::new("battery"));
        battery.reject(Property::ChargeControlLimit);

        let dev = class.get_by_name("battery").unwrap();
        assert!(dev.set_property(Property::ChargeControlLimit, 80).is_err());
        dev.set_property(Property::VoltageMax, 4_400_000).unwrap();

        assert_eq!(battery.value(Property::VoltageMax), Some(4_400_000));
        assert_eq!(battery.value(Property::ChargeControlLimit), None);
        assert_eq!(battery.attempts().len(), 2);
    }
}
