use std::{collections::HashMap, path::PathBuf};

use anyhow::Context;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::{
    bus::UnmappedPolicy,
    error::ConfigError,
    memory::{AccessMode, Persistence, RegionRole},
    range::AddressRange,
    renderer::{Palette, RasterConfig},
};

pub const CPU_CLOCK_HZ: u32 = 4_000_000;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RegionConfig {
    pub name: String,
    pub base: u32,
    pub size: usize,
    pub access: AccessMode,
    #[serde(default)]
    pub persistence: Persistence,
    #[serde(default)]
    pub role: RegionRole,
    /// ROM image loaded at the start of the region.
    #[serde(default)]
    pub image: Option<PathBuf>,
}

impl RegionConfig {
    pub fn ram(name: &str, base: u32, size: usize) -> Self {
        Self {
            name: name.to_string(),
            base,
            size,
            access: AccessMode::ReadWrite,
            persistence: Persistence::Volatile,
            role: RegionRole::Work,
            image: None,
        }
    }

    pub fn rom(name: &str, base: u32, size: usize) -> Self {
        Self {
            access: AccessMode::ReadOnly,
            role: RegionRole::Rom,
            ..Self::ram(name, base, size)
        }
    }

    pub fn role(mut self, role: RegionRole) -> Self {
        self.role = role;
        self
    }

    pub fn battery_backed(mut self) -> Self {
        self.persistence = Persistence::BatteryBacked;
        self
    }
}

#[derive(Debug, Copy, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DeviceKind {
    Via,
    Crtc,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeviceConfig {
    pub name: String,
    pub kind: DeviceKind,
    pub range: AddressRange,
}

#[derive(Debug, Copy, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Sink {
    CpuIrq,
}

/// A device output wired to a CPU input, resolved once at build time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Connection {
    pub source: String,
    pub sink: Sink,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MachineConfig {
    pub name: String,
    #[serde(default = "default_clock")]
    pub cpu_clock_hz: u32,
    #[serde(default)]
    pub unmapped: UnmappedPolicy,
    pub regions: Vec<RegionConfig>,
    #[serde(default)]
    pub devices: Vec<DeviceConfig>,
    #[serde(default)]
    pub connections: Vec<Connection>,
    #[serde(default)]
    pub raster: Option<RasterConfig>,
    /// Name of the VIA the keyboard encoder drives.
    #[serde(default)]
    pub keyboard: Option<String>,
}

fn default_clock() -> u32 {
    CPU_CLOCK_HZ
}

impl MachineConfig {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            cpu_clock_hz: CPU_CLOCK_HZ,
            unmapped: UnmappedPolicy::High,
            regions: Vec::new(),
            devices: Vec::new(),
            connections: Vec::new(),
            raster: None,
            keyboard: None,
        }
    }

    pub fn variant(name: &str) -> Result<Self, ConfigError> {
        VARIANTS
            .get(name)
            .cloned()
            .ok_or_else(|| ConfigError::UnknownVariant(name.to_string()))
    }

    pub fn variant_names() -> Vec<&'static str> {
        let mut names: Vec<_> = VARIANTS.keys().copied().collect();
        names.sort();
        names
    }

    pub fn from_json(json: &str) -> anyhow::Result<Self> {
        serde_json::from_str(json).context("parsing machine configuration")
    }

    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("reading machine configuration {}", path.display()))?;
        Self::from_json(&json)
    }

    pub fn to_json(&self) -> anyhow::Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

static VARIANTS: Lazy<HashMap<&'static str, MachineConfig>> = Lazy::new(|| {
    let mut variants = HashMap::new();
    variants.insert("pzero", pzero());
    variants.insert("pzero_video", pzero_video());
    variants.insert("pzero_full", pzero_full());
    variants
});

/// RAM and boot ROM only.
fn pzero() -> MachineConfig {
    let mut config = MachineConfig::new("pzero");
    config.unmapped = UnmappedPolicy::High;
    config.regions = vec![
        RegionConfig::ram("main", 0x0000, 0xE000),
        RegionConfig::rom("boot", 0xF000, 0x1000),
    ];
    config
}

/// Adds the banked window (aux RAM, video RAM, glyph store), the CRTC and
/// the keyboard VIA. The VIA interrupt is left unconnected.
fn pzero_video() -> MachineConfig {
    let mut config = pzero();
    config.name = "pzero_video".to_string();
    config.unmapped = UnmappedPolicy::Low;
    config.regions.extend([
        RegionConfig::ram("aux", 0x10000, 0x8000).role(RegionRole::Extended),
        RegionConfig::ram("vram", 0x18000, 0x800).role(RegionRole::VideoRam),
        RegionConfig::ram("chargen", 0x19000, 0x1000).role(RegionRole::GlyphStore),
    ]);
    config.devices = vec![
        DeviceConfig {
            name: "via".to_string(),
            kind: DeviceKind::Via,
            range: AddressRange::new(0xE000, 0xE00F),
        },
        DeviceConfig {
            name: "crtc".to_string(),
            kind: DeviceKind::Crtc,
            range: AddressRange::new(0xE010, 0xE011),
        },
    ];
    config.raster = Some(RasterConfig {
        chars_per_row: 80,
        glyph_rows_per_char: 16,
        wrap_size: 0x800,
        palette: Palette::monochrome(0x000000, 0x33FF33),
    });
    config.keyboard = Some("via".to_string());
    config
}

/// Video machine with battery-backed aux RAM and the VIA interrupt wired.
fn pzero_full() -> MachineConfig {
    let mut config = pzero_video();
    config.name = "pzero_full".to_string();
    config.unmapped = UnmappedPolicy::High;
    for region in config.regions.iter_mut().filter(|r| r.name == "aux") {
        region.persistence = Persistence::BatteryBacked;
    }
    config.connections = vec![Connection {
        source: "via".to_string(),
        sink: Sink::CpuIrq,
    }];
    config
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_variants() {
        assert_eq!(
            MachineConfig::variant_names(),
            vec!["pzero", "pzero_full", "pzero_video"]
        );
        assert_eq!(MachineConfig::variant("pzero").unwrap().unmapped, UnmappedPolicy::High);
        assert_eq!(
            MachineConfig::variant("pzero_video").unwrap().unmapped,
            UnmappedPolicy::Low
        );
        assert!(MachineConfig::variant("pzero_video").unwrap().connections.is_empty());
        assert_eq!(MachineConfig::variant("pzero_full").unwrap().connections.len(), 1);
        assert_eq!(
            MachineConfig::variant("pluto"),
            Err(ConfigError::UnknownVariant("pluto".to_string()))
        );
    }

    #[test]
    fn test_json_round_trip_of_variant() {
        let config = MachineConfig::variant("pzero_full").unwrap();
        let json = config.to_json().unwrap();
        assert_eq!(MachineConfig::from_json(&json).unwrap(), config);
    }

    #[test]
    fn test_json_defaults() {
        let config = MachineConfig::from_json(
            r#"{
                "name": "bare",
                "regions": [
                    { "name": "main", "base": 0, "size": 57344, "access": "read_write" },
                    { "name": "boot", "base": 61440, "size": 4096, "access": "read_only",
                      "role": "rom", "image": "roms/rom000.bin" }
                ]
            }"#,
        )
        .unwrap();

        assert_eq!(config.cpu_clock_hz, CPU_CLOCK_HZ);
        assert_eq!(config.unmapped, UnmappedPolicy::High);
        assert_eq!(config.regions[0].persistence, Persistence::Volatile);
        assert_eq!(config.regions[1].image, Some(PathBuf::from("roms/rom000.bin")));
        assert!(config.devices.is_empty());
    }

    #[test]
    fn test_bad_json() {
        let err = MachineConfig::from_json("{ \"name\": 3 }").unwrap_err();
        assert!(err.to_string().contains("machine configuration"));
    }

    #[test]
    fn test_load_from_file() {
        let dir = std::env::temp_dir().join(format!("pluton-config-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("pzero_full.json");
        let saved = MachineConfig::variant("pzero_full").unwrap();
        std::fs::write(&path, saved.to_json().unwrap()).unwrap();

        assert_eq!(MachineConfig::load(&path).unwrap(), saved);

        let missing = dir.join("missing.json");
        let err = MachineConfig::load(&missing).unwrap_err();
        let message = format!("{:#}", err);
        assert!(message.contains("reading machine configuration"));
        assert!(message.contains("missing.json"));
    }
}
