// Machine setup error types

use thiserror::Error;

use crate::range::AddressRange;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid address range {0} for {1}: start is past end")]
    InvalidRange(AddressRange, String),

    #[error("region {0} has zero size")]
    ZeroSizedRegion(String),

    #[error("region {name} of {size} bytes at {base:#07X} runs past the end of the address space")]
    RegionOutOfRange { name: String, base: u32, size: usize },

    #[error("region {name} at {range} overlaps region {other} at {other_range}")]
    OverlappingRegions {
        name: String,
        range: AddressRange,
        other: String,
        other_range: AddressRange,
    },

    #[error("device {name} at {range} overlaps device {other} at {other_range}")]
    OverlappingDevices {
        name: String,
        range: AddressRange,
        other: String,
        other_range: AddressRange,
    },

    #[error("duplicate region name {0}")]
    DuplicateRegion(String),

    #[error("duplicate device name {0}")]
    DuplicateDevice(String),

    #[error("image for region {name} is {image_len} bytes, region holds only {size}")]
    ImageTooLarge {
        name: String,
        image_len: usize,
        size: usize,
    },

    #[error("no {0} region configured for the video raster")]
    MissingVideoRegion(&'static str),

    #[error("glyph store {name} holds {size} bytes, needs {required} (256 x {rows_per_char} rows)")]
    GlyphStoreTooSmall {
        name: String,
        size: usize,
        required: usize,
        rows_per_char: usize,
    },

    #[error("video RAM {name} holds {size} bytes, smaller than wrap size {wrap}")]
    VideoRamTooSmall { name: String, size: usize, wrap: usize },

    #[error("raster geometry is degenerate: {0}")]
    InvalidRaster(String),

    #[error("palette must hold exactly 2 entries for monochrome output, got {0}")]
    InvalidPalette(usize),

    #[error("connection source {0} is not a configured device")]
    UnknownConnectionSource(String),

    #[error("keyboard target {0} is not a configured VIA")]
    KeyboardTarget(String),

    #[error("unknown machine variant {0}")]
    UnknownVariant(String),
}
