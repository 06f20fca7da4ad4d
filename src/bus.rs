// +-----------------+-----------------------------------------------+
// | Range           | Description (pzero_full)                      |
// +-----------------+-----------------------------------------------+
// | 0x00000-0x0DFFF | Work RAM                                      |
// | 0x0E000-0x0E00F | VIA: parallel interface (keyboard on port A)  |
// | 0x0E010-0x0E011 | CRTC: address / data registers                |
// | 0x0F000-0x0FFFF | Boot ROM                                      |
// | 0x10000-0x17FFF | Auxiliary RAM (banked window)                 |
// | 0x18000-0x187FF | Video RAM (banked window)                     |
// | 0x19000-0x19FFF | Glyph store (banked window)                   |
// +-----------------+-----------------------------------------------+
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{memory::MemoryBank, range::AddressRange, registry::PeripheralRegistry};

/// What the bus answers for addresses nothing is mapped to.
#[derive(Debug, Copy, Clone, Default, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum UnmappedPolicy {
    Low,
    #[default]
    High,
}

impl UnmappedPolicy {
    pub fn value(&self) -> u8 {
        match self {
            UnmappedPolicy::Low => 0x00,
            UnmappedPolicy::High => 0xFF,
        }
    }
}

/// Address-space dispatcher: devices first, then memory regions, then the
/// unmapped policy.
#[derive(Debug)]
pub struct Bus {
    pub memory: MemoryBank,
    registry: PeripheralRegistry,
    unmapped: UnmappedPolicy,
}

impl Bus {
    pub fn new(memory: MemoryBank, registry: PeripheralRegistry, unmapped: UnmappedPolicy) -> Self {
        for binding in registry.bindings() {
            for region in memory.regions() {
                if region.range().overlaps(&binding.range) {
                    tracing::info!(
                        "[BUS] Device {} at {} shadows region {} at {}",
                        binding.name,
                        binding.range,
                        region.name,
                        region.range()
                    );
                }
            }
        }

        Self {
            memory,
            registry,
            unmapped,
        }
    }

    pub fn unmapped_policy(&self) -> UnmappedPolicy {
        self.unmapped
    }

    pub fn registry(&self) -> &PeripheralRegistry {
        &self.registry
    }

    pub fn read_byte(&mut self, addr: u32) -> u8 {
        if let Some((binding, offset)) = self.registry.resolve(addr) {
            return binding.device.borrow_mut().read(offset);
        }

        match self.memory.find(addr) {
            Some(region) => region.read(addr),
            None => {
                tracing::trace!("[BUS] Unmapped read {:#07X}", addr);
                self.unmapped.value()
            }
        }
    }

    pub fn write_byte(&mut self, addr: u32, data: u8) {
        if let Some((binding, offset)) = self.registry.resolve(addr) {
            binding.device.borrow_mut().write(offset, data);
            return;
        }

        match self.memory.find_mut(addr) {
            Some(region) => region.write(addr, data),
            None => tracing::trace!("[BUS] Unmapped write {:#07X} = {:02X}", addr, data),
        }
    }

    /// Side-effect-free read for debuggers and dumps.
    pub fn peek_byte(&self, addr: u32) -> u8 {
        if let Some((binding, offset)) = self.registry.resolve(addr) {
            return binding.device.borrow().peek(offset);
        }

        self.memory
            .find(addr)
            .map(|region| region.read(addr))
            .unwrap_or_else(|| self.unmapped.value())
    }

    pub fn read_word(&mut self, address: u32) -> u16 {
        let low_byte = self.read_byte(address) as u16;
        let high_byte = self.read_byte(address.wrapping_add(1)) as u16;
        (high_byte << 8) | low_byte
    }

    pub fn write_word(&mut self, address: u32, value: u16) {
        let low_byte = (value & 0x00FF) as u8;
        let high_byte = ((value & 0xFF00) >> 8) as u8;
        self.write_byte(address, low_byte);
        self.write_byte(address.wrapping_add(1), high_byte);
    }

    pub fn write_block(&mut self, start_addr: u32, data: &[u8]) {
        let mut addr = start_addr;
        for &byte in data {
            self.write_byte(addr, byte);
            addr = addr.wrapping_add(1);
        }
    }

    /// Every mapped window, in address order, with what answers it.
    pub fn memory_map(&self) -> Vec<MapEntry> {
        let mut entries: Vec<MapEntry> = self
            .registry
            .bindings()
            .iter()
            .map(|b| MapEntry {
                range: b.range,
                target: MapTarget::Device(b.name.clone()),
            })
            .chain(self.memory.regions().map(|r| MapEntry {
                range: r.range(),
                target: MapTarget::Region(r.name.clone()),
            }))
            .collect();
        entries.sort_by_key(|e| e.range.start);
        entries
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub enum MapTarget {
    Region(String),
    Device(String),
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct MapEntry {
    pub range: AddressRange,
    pub target: MapTarget,
}

impl fmt::Display for MapEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.target {
            MapTarget::Region(name) => write!(f, "{} - region {}", self.range, name),
            MapTarget::Device(name) => write!(f, "{} - device {}", self.range, name),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{cell::RefCell, rc::Rc};

    use super::*;
    use crate::{device::Device, memory::MemoryRegion};

    #[derive(Default)]
    struct Recorder {
        writes: Vec<(u32, u8)>,
        reads: Vec<u32>,
    }

    impl Device for Recorder {
        fn read(&mut self, offset: u32) -> u8 {
            self.reads.push(offset);
            0xA5
        }

        fn write(&mut self, offset: u32, value: u8) {
            self.writes.push((offset, value));
        }

        fn peek(&self, _offset: u32) -> u8 {
            0xA5
        }
    }

    fn base_bank() -> MemoryBank {
        let mut bank = MemoryBank::new();
        bank.add(MemoryRegion::ram("main", 0x0000, 0xE000).unwrap()).unwrap();
        bank.add(MemoryRegion::rom("boot", 0xF000, 0x1000, &[0x18, 0xFB]).unwrap()).unwrap();
        bank
    }

    #[test]
    fn test_unmapped_policy() {
        let mut bus = Bus::new(base_bank(), PeripheralRegistry::new(), UnmappedPolicy::High);
        assert_eq!(bus.read_byte(0xE800), 0xFF);
        assert_eq!(bus.read_byte(0x20000), 0xFF);
        bus.write_byte(0xE800, 0x12);
        assert_eq!(bus.read_byte(0xE800), 0xFF);

        let mut bus = Bus::new(base_bank(), PeripheralRegistry::new(), UnmappedPolicy::Low);
        assert_eq!(bus.read_byte(0xE800), 0x00);
    }

    #[test]
    fn test_unmapped_write_leaves_regions_alone() {
        let mut bus = Bus::new(base_bank(), PeripheralRegistry::new(), UnmappedPolicy::High);
        let before = bus.memory.clone();
        for addr in [0xE000, 0xEFFF, 0x10000, 0xFFFFFF] {
            bus.write_byte(addr, 0x5A);
        }
        assert_eq!(bus.memory, before);
    }

    #[test]
    fn test_rom_writes_discarded() {
        let mut bus = Bus::new(base_bank(), PeripheralRegistry::new(), UnmappedPolicy::High);
        for _ in 0..3 {
            bus.write_byte(0xF000, 0x00);
            bus.write_byte(0xF001, 0x00);
        }
        assert_eq!(bus.read_word(0xF000), 0xFB18);
    }

    #[test]
    fn test_ram_word_access() {
        let mut bus = Bus::new(base_bank(), PeripheralRegistry::new(), UnmappedPolicy::High);
        bus.write_word(0x0200, 0xBEEF);
        assert_eq!(bus.read_byte(0x0200), 0xEF);
        assert_eq!(bus.read_byte(0x0201), 0xBE);
        assert_eq!(bus.read_word(0x0200), 0xBEEF);
    }

    #[test]
    fn test_word_and_block_wrap_at_top_of_address_space() {
        let mut bus = Bus::new(base_bank(), PeripheralRegistry::new(), UnmappedPolicy::High);
        bus.write_byte(0x0000, 0x12);
        assert_eq!(bus.read_word(u32::MAX), 0x12FF);

        bus.write_word(u32::MAX, 0x3456);
        assert_eq!(bus.read_byte(0x0000), 0x34);

        bus.write_block(u32::MAX, &[0xAA, 0xBB, 0xCC]);
        assert_eq!(bus.read_word(0x0000), 0xCCBB);
    }

    #[test]
    fn test_device_shadows_region() {
        let recorder = Rc::new(RefCell::new(Recorder::default()));
        let mut registry = PeripheralRegistry::new();
        registry
            .register("io", AddressRange::new(0xD000, 0xD00F), recorder.clone())
            .unwrap();

        let mut bus = Bus::new(base_bank(), registry, UnmappedPolicy::High);
        bus.write_byte(0xD004, 0x77);
        assert_eq!(bus.read_byte(0xD004), 0xA5);
        assert_eq!(bus.peek_byte(0xD004), 0xA5);
        assert_eq!(bus.memory.region("main").unwrap().read(0xD004), 0x00);
        assert_eq!(recorder.borrow().writes, vec![(4, 0x77)]);
        assert_eq!(recorder.borrow().reads, vec![4]);
    }

    #[test]
    fn test_memory_map_is_sorted() {
        let mut registry = PeripheralRegistry::new();
        registry
            .register(
                "via",
                AddressRange::new(0xE000, 0xE00F),
                Rc::new(RefCell::new(Recorder::default())),
            )
            .unwrap();
        let bus = Bus::new(base_bank(), registry, UnmappedPolicy::High);

        let map: Vec<String> = bus.memory_map().iter().map(|e| e.to_string()).collect();
        assert_eq!(
            map,
            vec![
                "0x00000 - 0x0DFFF - region main",
                "0x0E000 - 0x0E00F - device via",
                "0x0F000 - 0x0FFFF - region boot",
            ]
        );
    }
}
