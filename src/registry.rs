use std::fmt;

use derivative::Derivative;

use crate::{device::SharedDevice, error::ConfigError, range::AddressRange};

#[derive(Derivative, Clone)]
#[derivative(Debug)]
pub struct DeviceBinding {
    pub name: String,
    pub range: AddressRange,
    #[derivative(Debug = "ignore")]
    pub device: SharedDevice,
}

impl fmt::Display for DeviceBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (device {})", self.range, self.name)
    }
}

/// Ordered table of device register windows. Devices are few, so lookup is a
/// linear scan in registration order.
#[derive(Debug, Default, Clone)]
pub struct PeripheralRegistry {
    bindings: Vec<DeviceBinding>,
}

impl PeripheralRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        name: &str,
        range: AddressRange,
        device: SharedDevice,
    ) -> Result<(), ConfigError> {
        if !range.is_valid() {
            return Err(ConfigError::InvalidRange(range, name.to_string()));
        }
        if self.bindings.iter().any(|b| b.name == name) {
            return Err(ConfigError::DuplicateDevice(name.to_string()));
        }
        if let Some(other) = self.bindings.iter().find(|b| b.range.overlaps(&range)) {
            return Err(ConfigError::OverlappingDevices {
                name: name.to_string(),
                range,
                other: other.name.clone(),
                other_range: other.range,
            });
        }

        tracing::debug!("Registering device {} at {}", name, range);
        self.bindings.push(DeviceBinding {
            name: name.to_string(),
            range,
            device,
        });
        Ok(())
    }

    /// Finds the device answering `address` and the device-local offset.
    pub fn resolve(&self, address: u32) -> Option<(&DeviceBinding, u32)> {
        self.bindings
            .iter()
            .find(|b| b.range.contains(address))
            .map(|b| (b, b.range.offset_of(address)))
    }

    pub fn device(&self, name: &str) -> Option<&SharedDevice> {
        self.bindings
            .iter()
            .find(|b| b.name == name)
            .map(|b| &b.device)
    }

    pub fn bindings(&self) -> &[DeviceBinding] {
        &self.bindings
    }
}
