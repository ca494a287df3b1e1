//! Single write path into devices

use tracing::debug;

use crate::error::DeviceError;
use crate::power_supply::{PowerSupplyDevice, Property};

/// Writes one property through a device's generic set entry point.
///
/// Values are passed through unchanged; the device is the only judge of
/// whether a value is acceptable.
#[derive(Debug, Default, Clone, Copy)]
pub struct DeviceWriteGateway;

impl DeviceWriteGateway {
    pub fn write(
        &self,
        device: &dyn PowerSupplyDevice,
        property: Property,
        value: i32,
    ) -> Result<(), DeviceError> {
        if !device.is_writeable() {
            return Err(DeviceError::NotSupported {
                device: device.name().to_string(),
                property: property.as_str().to_string(),
            });
        }
        device.set_property(property, value)?;
        debug!("Wrote {}/{} = {}", device.name(), property.as_str(), value);
        Ok(())
    }
}
