use tracing::trace;

use crate::{device::Device, renderer::CursorState};

pub const REGISTER_COUNT: usize = 18;

const R_HORIZONTAL_DISPLAYED: usize = 1;
const R_VERTICAL_DISPLAYED: usize = 6;
const R_MAX_SCANLINE: usize = 9;
const R_CURSOR_START: usize = 10;
const R_CURSOR_END: usize = 11;
const R_START_HI: usize = 12;
const R_START_LO: usize = 13;
const R_CURSOR_HI: usize = 14;
const R_CURSOR_LO: usize = 15;

const ADDRESS_MASK: u16 = 0x3FFF;

/// Per-scanline inputs for the raster generator.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ScanlineParams {
    pub row_base: u16,
    pub glyph_row: u8,
    pub cursor: CursorState,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CursorMode {
    Steady,
    Hidden,
    BlinkFast,
    BlinkSlow,
}

/// 6845-style CRT controller: address register at offset 0, data register at
/// offset 1. Only the display geometry, start address and cursor registers
/// are modelled; sync timing is left to the host.
#[derive(Clone, Debug)]
pub struct Crtc {
    registers: [u8; REGISTER_COUNT],
    selected: u8,
    frame: u32,
}

impl Crtc {
    pub fn new() -> Self {
        Crtc::default()
    }

    pub fn register(&self, index: usize) -> u8 {
        self.registers.get(index).copied().unwrap_or(0)
    }

    pub fn set_register(&mut self, index: usize, value: u8) {
        if let Some(reg) = self.registers.get_mut(index) {
            *reg = value;
        }
    }

    pub fn chars_per_row(&self) -> u16 {
        self.registers[R_HORIZONTAL_DISPLAYED] as u16
    }

    pub fn rows(&self) -> u16 {
        (self.registers[R_VERTICAL_DISPLAYED] & 0x7F) as u16
    }

    pub fn glyph_rows_per_char(&self) -> u16 {
        (self.registers[R_MAX_SCANLINE] & 0x1F) as u16 + 1
    }

    pub fn visible_scanlines(&self) -> u16 {
        self.rows() * self.glyph_rows_per_char()
    }

    pub fn start_address(&self) -> u16 {
        ((self.registers[R_START_HI] as u16) << 8 | self.registers[R_START_LO] as u16)
            & ADDRESS_MASK
    }

    pub fn cursor_address(&self) -> u16 {
        ((self.registers[R_CURSOR_HI] as u16) << 8 | self.registers[R_CURSOR_LO] as u16)
            & ADDRESS_MASK
    }

    pub fn cursor_mode(&self) -> CursorMode {
        match (self.registers[R_CURSOR_START] >> 5) & 0x03 {
            0b00 => CursorMode::Steady,
            0b01 => CursorMode::Hidden,
            0b10 => CursorMode::BlinkFast,
            _ => CursorMode::BlinkSlow,
        }
    }

    pub fn frame(&self) -> u32 {
        self.frame
    }

    /// Advances the blink phase. Called once per rendered frame.
    pub fn end_frame(&mut self) {
        self.frame = self.frame.wrapping_add(1);
    }

    fn cursor_blink_on(&self) -> bool {
        match self.cursor_mode() {
            CursorMode::Steady => true,
            CursorMode::Hidden => false,
            CursorMode::BlinkFast => self.frame & 0x08 == 0,
            CursorMode::BlinkSlow => self.frame & 0x10 == 0,
        }
    }

    /// Display parameters for `line`, or `None` outside the displayed area.
    pub fn scanline(&self, line: u16) -> Option<ScanlineParams> {
        if line >= self.visible_scanlines() {
            return None;
        }

        let rows_per_char = self.glyph_rows_per_char();
        let char_row = line / rows_per_char;
        let glyph_row = (line % rows_per_char) as u8;
        let chars = self.chars_per_row();
        let row_base = (self.start_address() + char_row * chars) & ADDRESS_MASK;

        let cursor_start = self.registers[R_CURSOR_START] & 0x1F;
        let cursor_end = self.registers[R_CURSOR_END] & 0x1F;
        let column = self.cursor_address().wrapping_sub(row_base) & ADDRESS_MASK;
        let visible = self.cursor_blink_on()
            && column < chars
            && glyph_row >= cursor_start
            && glyph_row <= cursor_end;

        Some(ScanlineParams {
            row_base,
            glyph_row,
            cursor: CursorState { column, visible },
        })
    }
}

impl Default for Crtc {
    fn default() -> Self {
        let mut registers = [0; REGISTER_COUNT];
        // 80x25 text, 16 scanlines per character, full block cursor
        registers[R_HORIZONTAL_DISPLAYED] = 80;
        registers[R_VERTICAL_DISPLAYED] = 25;
        registers[R_MAX_SCANLINE] = 15;
        registers[R_CURSOR_START] = 0;
        registers[R_CURSOR_END] = 15;

        Crtc {
            registers,
            selected: 0,
            frame: 0,
        }
    }
}

impl Device for Crtc {
    fn read(&mut self, offset: u32) -> u8 {
        self.peek(offset)
    }

    fn write(&mut self, offset: u32, value: u8) {
        match offset & 0x01 {
            0 => self.selected = value & 0x1F,
            _ => {
                trace!("[CRTC] R{} = {:02X}", self.selected, value);
                self.set_register(self.selected as usize, value);
            }
        }
    }

    fn peek(&self, offset: u32) -> u8 {
        match (offset & 0x01, self.selected as usize) {
            // only the cursor and light pen registers read back
            (1, R_CURSOR_HI..=17) => self.registers[self.selected as usize],
            _ => 0x00,
        }
    }

    fn reset(&mut self) {
        let frame = self.frame;
        *self = Crtc::default();
        self.frame = frame;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn program(crtc: &mut Crtc, reg: u8, value: u8) {
        crtc.write(0, reg);
        crtc.write(1, value);
    }

    #[test]
    fn test_row_base_steps_by_row_width() {
        let mut crtc = Crtc::new();
        program(&mut crtc, 12, 0x01);
        program(&mut crtc, 13, 0x00);

        let first = crtc.scanline(0).unwrap();
        assert_eq!(first.row_base, 0x100);
        assert_eq!(first.glyph_row, 0);

        let line = crtc.scanline(16 * 2 + 5).unwrap();
        assert_eq!(line.row_base, 0x100 + 160);
        assert_eq!(line.glyph_row, 5);

        assert!(crtc.scanline(25 * 16).is_none());
    }

    #[test]
    fn test_cursor_column_only_on_its_row() {
        let mut crtc = Crtc::new();
        program(&mut crtc, 14, 0x00);
        program(&mut crtc, 15, 83);

        let row0 = crtc.scanline(0).unwrap();
        assert!(!row0.cursor.visible);

        let row1 = crtc.scanline(16).unwrap();
        assert!(row1.cursor.visible);
        assert_eq!(row1.cursor.column, 3);
    }

    #[test]
    fn test_cursor_scanline_window_and_mode() {
        let mut crtc = Crtc::new();
        program(&mut crtc, 10, 14);
        program(&mut crtc, 11, 15);

        assert!(!crtc.scanline(13).unwrap().cursor.visible);
        assert!(crtc.scanline(14).unwrap().cursor.visible);

        program(&mut crtc, 10, 0b0010_0000 | 14);
        assert_eq!(crtc.cursor_mode(), CursorMode::Hidden);
        assert!(!crtc.scanline(14).unwrap().cursor.visible);
    }

    #[test]
    fn test_cursor_blink() {
        let mut crtc = Crtc::new();
        program(&mut crtc, 10, 0b0100_0000);
        assert!(crtc.scanline(0).unwrap().cursor.visible);
        for _ in 0..8 {
            crtc.end_frame();
        }
        assert!(!crtc.scanline(0).unwrap().cursor.visible);
    }

    #[test]
    fn test_register_readback() {
        let mut crtc = Crtc::new();
        program(&mut crtc, 14, 0x12);
        program(&mut crtc, 1, 40);

        crtc.write(0, 14);
        assert_eq!(crtc.read(1), 0x12);
        crtc.write(0, 1);
        assert_eq!(crtc.read(1), 0x00);
        assert_eq!(crtc.chars_per_row(), 40);
    }
}
