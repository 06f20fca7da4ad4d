use std::{fmt, fs::File, io::Read, path::Path};

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::{error::ConfigError, range::AddressRange};

#[derive(Debug, Copy, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AccessMode {
    ReadWrite,
    ReadOnly,
}

#[derive(Debug, Copy, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Persistence {
    #[default]
    Volatile,
    BatteryBacked,
}

/// What a region is used for. The raster generator finds its video RAM and
/// glyph store by role rather than by address.
#[derive(Debug, Copy, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RegionRole {
    #[default]
    Work,
    Rom,
    Extended,
    VideoRam,
    GlyphStore,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct MemoryRegion {
    pub name: String,
    pub base: u32,
    pub access: AccessMode,
    pub persistence: Persistence,
    pub role: RegionRole,
    pub data: Vec<u8>,
}

impl fmt::Display for MemoryRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.access {
            AccessMode::ReadWrite => "RAM",
            AccessMode::ReadOnly => "ROM",
        };
        write!(f, "{} {} {:?} size={:#06X}", kind, self.name, self.role, self.size())?;
        if self.persistence == Persistence::BatteryBacked {
            write!(f, " (battery-backed)")?;
        }
        Ok(())
    }
}

impl MemoryRegion {
    pub fn ram(name: &str, base: u32, size: usize) -> Result<Self, ConfigError> {
        check_window(name, base, size)?;

        Ok(MemoryRegion {
            name: name.to_string(),
            base,
            access: AccessMode::ReadWrite,
            persistence: Persistence::Volatile,
            role: RegionRole::Work,
            data: vec![0x00; size],
        })
    }

    /// Builds a ROM region erased to 0xFF with `image` copied to its start.
    pub fn rom(name: &str, base: u32, size: usize, image: &[u8]) -> Result<Self, ConfigError> {
        check_window(name, base, size)?;
        if image.len() > size {
            return Err(ConfigError::ImageTooLarge {
                name: name.to_string(),
                image_len: image.len(),
                size,
            });
        }

        let mut data = vec![0xFF; size];
        data[..image.len()].copy_from_slice(image);

        Ok(MemoryRegion {
            name: name.to_string(),
            base,
            access: AccessMode::ReadOnly,
            persistence: Persistence::Volatile,
            role: RegionRole::Rom,
            data,
        })
    }

    pub fn load_rom(name: &str, base: u32, size: usize, path: &Path) -> anyhow::Result<Self> {
        let mut file = File::open(path)
            .with_context(|| format!("opening ROM image {} for {}", path.display(), name))?;
        let mut buffer = Vec::new();
        file.read_to_end(&mut buffer)?;

        tracing::info!(
            "Loaded ROM image {} ({} bytes) into {}",
            path.display(),
            buffer.len(),
            name
        );
        Ok(Self::rom(name, base, size, &buffer)?)
    }

    pub fn with_role(mut self, role: RegionRole) -> Self {
        self.role = role;
        self
    }

    pub fn battery_backed(mut self) -> Self {
        self.persistence = Persistence::BatteryBacked;
        self
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }

    pub fn range(&self) -> AddressRange {
        AddressRange::with_size(self.base, self.data.len())
            .unwrap_or(AddressRange::new(self.base, u32::MAX))
    }

    pub fn is_read_only(&self) -> bool {
        self.access == AccessMode::ReadOnly
    }

    fn translate_address(&self, address: u32) -> Option<usize> {
        address.checked_sub(self.base).map(|offset| offset as usize)
    }

    /// Reads by CPU address. Addresses outside the region read as 0xFF.
    pub fn read(&self, address: u32) -> u8 {
        self.translate_address(address).map_or(0xFF, |offset| self.read_offset(offset))
    }

    pub fn write(&mut self, address: u32, value: u8) {
        if self.is_read_only() {
            tracing::trace!(
                "Attempt to write {:02X} to ROM {} address {:#07X}",
                value,
                self.name,
                address
            );
            return;
        }
        match self.translate_address(address).and_then(|offset| self.data.get_mut(offset)) {
            Some(byte) => *byte = value,
            None => tracing::trace!(
                "Write {:02X} to {:#07X} is outside region {}",
                value,
                address,
                self.name
            ),
        }
    }

    /// Reads by region-local offset. Offsets past the end read as 0xFF.
    pub fn read_offset(&self, offset: usize) -> u8 {
        self.data.get(offset).copied().unwrap_or(0xFF)
    }

    /// Replaces the region contents with a persisted image. The image must be
    /// exactly the region size; anything else is rejected and left untouched.
    pub fn restore(&mut self, image: &[u8]) -> bool {
        if image.len() != self.data.len() {
            return false;
        }
        self.data.copy_from_slice(image);
        true
    }
}

fn check_window(name: &str, base: u32, size: usize) -> Result<AddressRange, ConfigError> {
    if size == 0 {
        return Err(ConfigError::ZeroSizedRegion(name.to_string()));
    }
    AddressRange::with_size(base, size).ok_or_else(|| ConfigError::RegionOutOfRange {
        name: name.to_string(),
        base,
        size,
    })
}

/// The machine's byte storage, one non-overlapping region per address window.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct MemoryBank {
    regions: Vec<MemoryRegion>,
}

impl MemoryBank {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, region: MemoryRegion) -> Result<(), ConfigError> {
        let range = check_window(&region.name, region.base, region.size())?;
        if self.region(&region.name).is_some() {
            return Err(ConfigError::DuplicateRegion(region.name));
        }

        if let Some(other) = self.regions.iter().find(|r| r.range().overlaps(&range)) {
            return Err(ConfigError::OverlappingRegions {
                name: region.name,
                range,
                other: other.name.clone(),
                other_range: other.range(),
            });
        }

        tracing::debug!("Mapping {} at {}", region, range);
        self.regions.push(region);
        Ok(())
    }

    pub fn find(&self, address: u32) -> Option<&MemoryRegion> {
        self.regions.iter().find(|r| r.range().contains(address))
    }

    pub fn find_mut(&mut self, address: u32) -> Option<&mut MemoryRegion> {
        self.regions.iter_mut().find(|r| r.range().contains(address))
    }

    pub fn region(&self, name: &str) -> Option<&MemoryRegion> {
        self.regions.iter().find(|r| r.name == name)
    }

    pub fn region_mut(&mut self, name: &str) -> Option<&mut MemoryRegion> {
        self.regions.iter_mut().find(|r| r.name == name)
    }

    pub fn region_by_role(&self, role: RegionRole) -> Option<&MemoryRegion> {
        self.regions.iter().find(|r| r.role == role)
    }

    pub fn regions(&self) -> impl Iterator<Item = &MemoryRegion> {
        self.regions.iter()
    }

    pub fn battery_backed(&self) -> impl Iterator<Item = &MemoryRegion> {
        self.regions
            .iter()
            .filter(|r| r.persistence == Persistence::BatteryBacked)
    }
}
