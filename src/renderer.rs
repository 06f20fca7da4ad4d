use serde::{Deserialize, Serialize};

use crate::{
    error::ConfigError,
    memory::{MemoryBank, RegionRole},
};

/// Glyph rows are one byte wide.
pub const PIXELS_PER_CHAR: usize = 8;

/// 0x00RRGGBB
pub type Rgb = u32;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Palette {
    entries: Vec<Rgb>,
}

impl Palette {
    pub fn new(entries: Vec<Rgb>) -> Result<Self, ConfigError> {
        if entries.len() != 2 {
            return Err(ConfigError::InvalidPalette(entries.len()));
        }
        Ok(Self { entries })
    }

    pub fn monochrome(background: Rgb, foreground: Rgb) -> Self {
        Self {
            entries: vec![background, foreground],
        }
    }

    pub fn get(&self, index: u8) -> Rgb {
        self.entries[index as usize & (self.entries.len() - 1)]
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for Palette {
    fn default() -> Self {
        Palette::monochrome(0x000000, 0xFFFFFF)
    }
}

/// Cursor as reported by the CRT controller for the row being drawn.
#[derive(Debug, Copy, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CursorState {
    pub column: u16,
    pub visible: bool,
}

impl CursorState {
    pub fn at(column: u16) -> Self {
        Self {
            column,
            visible: true,
        }
    }

    pub fn hidden() -> Self {
        Self::default()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RasterConfig {
    pub chars_per_row: usize,
    pub glyph_rows_per_char: usize,
    /// Character capacity of video RAM; row addressing wraps at this size.
    pub wrap_size: usize,
    #[serde(default)]
    pub palette: Palette,
}

impl RasterConfig {
    pub fn row_len(&self) -> usize {
        self.chars_per_row * PIXELS_PER_CHAR
    }

    /// Checks the geometry against the regions it will read from.
    pub fn validate(&self, memory: &MemoryBank) -> Result<(), ConfigError> {
        if self.chars_per_row == 0 {
            return Err(ConfigError::InvalidRaster("zero characters per row".into()));
        }
        if self.glyph_rows_per_char == 0 {
            return Err(ConfigError::InvalidRaster("zero glyph rows per character".into()));
        }
        if self.wrap_size == 0 {
            return Err(ConfigError::InvalidRaster("zero video RAM wrap size".into()));
        }
        if self.palette.len() != 2 {
            return Err(ConfigError::InvalidPalette(self.palette.len()));
        }

        let vram = memory
            .region_by_role(RegionRole::VideoRam)
            .ok_or(ConfigError::MissingVideoRegion("video RAM"))?;
        if vram.size() < self.wrap_size {
            return Err(ConfigError::VideoRamTooSmall {
                name: vram.name.clone(),
                size: vram.size(),
                wrap: self.wrap_size,
            });
        }

        let glyphs = memory
            .region_by_role(RegionRole::GlyphStore)
            .ok_or(ConfigError::MissingVideoRegion("glyph store"))?;
        let required = 256 * self.glyph_rows_per_char;
        if glyphs.size() < required {
            return Err(ConfigError::GlyphStoreTooSmall {
                name: glyphs.name.clone(),
                size: glyphs.size(),
                required,
                rows_per_char: self.glyph_rows_per_char,
            });
        }

        Ok(())
    }
}

/// Character-mode raster generator. Turns one scanline of video RAM into
/// palette colors.
#[derive(Debug, Clone)]
pub struct Renderer {
    config: RasterConfig,
}

impl Renderer {
    pub fn new(config: RasterConfig, memory: &MemoryBank) -> Result<Self, ConfigError> {
        config.validate(memory)?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &RasterConfig {
        &self.config
    }

    /// Renders the scanline whose characters start at `row_base` in video RAM,
    /// using glyph row `glyph_row` of each character. The cursor cell is drawn
    /// inverted.
    pub fn render_row(
        &self,
        memory: &MemoryBank,
        row_base: u16,
        glyph_row: u8,
        cursor: CursorState,
    ) -> Vec<Rgb> {
        let vram = memory.region_by_role(RegionRole::VideoRam);
        let glyphs = memory.region_by_role(RegionRole::GlyphStore);
        let rows_per_char = self.config.glyph_rows_per_char;
        let glyph_row = glyph_row as usize % rows_per_char;

        let mut row = Vec::with_capacity(self.config.row_len());
        for x in 0..self.config.chars_per_row {
            let offset = (row_base as usize + x) % self.config.wrap_size;
            let char_code = vram.map_or(0, |r| r.read_offset(offset));

            let inv = if cursor.visible && cursor.column as usize == x {
                0xFF
            } else {
                0x00
            };
            let pattern = glyphs.map_or(0, |g| {
                g.read_offset(char_code as usize * rows_per_char + glyph_row)
            }) ^ inv;

            for i in 0..PIXELS_PER_CHAR {
                let bit = (pattern >> (7 - i)) & 1;
                row.push(self.config.palette.get(bit));
            }
        }
        row
    }

    /// `chars` characters of one text row, for dumps. Non-printable codes
    /// show as spaces.
    pub fn as_text(&self, memory: &MemoryBank, row_base: u16, chars: usize) -> String {
        let vram = memory.region_by_role(RegionRole::VideoRam);
        (0..chars)
            .map(|x| {
                let offset = (row_base as usize + x) % self.config.wrap_size;
                match vram.map_or(0, |r| r.read_offset(offset)) {
                    c if c.is_ascii_graphic() => c as char,
                    _ => ' ',
                }
            })
            .collect()
    }
}
