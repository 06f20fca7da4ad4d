use std::fmt;

use serde::{Deserialize, Serialize};

/// Inclusive `[start, end]` window of the CPU address space.
#[derive(Debug, Copy, Clone, Serialize, Deserialize, Eq, PartialEq, Hash)]
pub struct AddressRange {
    pub start: u32,
    pub end: u32,
}

impl AddressRange {
    pub const fn new(start: u32, end: u32) -> Self {
        Self { start, end }
    }

    /// `size` bytes from `start`. `None` when empty or when the window would
    /// run past the top of the 32-bit address space.
    pub fn with_size(start: u32, size: usize) -> Option<Self> {
        let last = u32::try_from(size.checked_sub(1)?).ok()?;
        Some(Self {
            start,
            end: start.checked_add(last)?,
        })
    }

    pub fn is_valid(&self) -> bool {
        self.start <= self.end
    }

    pub fn contains(&self, address: u32) -> bool {
        address >= self.start && address <= self.end
    }

    pub fn overlaps(&self, other: &AddressRange) -> bool {
        self.start <= other.end && other.start <= self.end
    }

    pub fn size(&self) -> u64 {
        u64::from(self.end - self.start) + 1
    }

    pub fn offset_of(&self, address: u32) -> u32 {
        address - self.start
    }
}

impl fmt::Display for AddressRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:05X} - 0x{:05X}", self.start, self.end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overlap() {
        let ram = AddressRange::new(0x0000, 0xDFFF);
        assert!(ram.overlaps(&AddressRange::new(0xDFFF, 0xE00F)));
        assert!(!ram.overlaps(&AddressRange::new(0xE000, 0xE00F)));
        assert!(AddressRange::new(0xE000, 0xE00F).overlaps(&AddressRange::new(0xE004, 0xE004)));
    }

    #[test]
    fn test_with_size() {
        let rom = AddressRange::with_size(0xF000, 0x1000).unwrap();
        assert_eq!(rom, AddressRange::new(0xF000, 0xFFFF));
        assert_eq!(rom.size(), 0x1000);
        assert_eq!(rom.offset_of(0xF123), 0x123);
        assert_eq!(format!("{}", rom), "0x0F000 - 0x0FFFF");
    }

    #[test]
    fn test_with_size_rejects_wraparound() {
        assert_eq!(AddressRange::with_size(0x1000, 0), None);
        assert_eq!(AddressRange::with_size(0xFFFF_F000, 0x2000), None);
        assert_eq!(
            AddressRange::with_size(0xFFFF_F000, 0x1000),
            Some(AddressRange::new(0xFFFF_F000, u32::MAX))
        );
    }
}
