pub mod bus;
pub mod config;
pub mod crtc;
pub mod device;
pub mod error;
pub mod keyboard;
pub mod machine;
pub mod memory;
pub mod range;
pub mod registry;
pub mod renderer;
pub mod utils;
pub mod via;

pub use bus::{Bus, UnmappedPolicy};
pub use config::MachineConfig;
pub use device::{Device, SharedDevice};
pub use error::ConfigError;
pub use machine::{Frame, Machine, MachineBuilder};
pub use range::AddressRange;
pub use renderer::{CursorState, Palette, Renderer};
pub use utils::hexdump;

use std::sync::Once;

use wasm_bindgen::prelude::*;

static INIT_HOOKS: Once = Once::new();

pub fn get_machine(variant: &str, rom_data: &[u8]) -> anyhow::Result<Machine> {
    let config = MachineConfig::variant(variant)?;
    let rom = config
        .regions
        .iter()
        .find(|r| r.access == memory::AccessMode::ReadOnly)
        .map(|r| r.name.clone());

    let mut builder = MachineBuilder::from_config(config);
    if let Some(rom) = rom {
        builder.rom_image(&rom, rom_data);
    }
    builder.build()
}

#[wasm_bindgen(js_name = Machine)]
pub struct JsMachine(Machine);

#[wasm_bindgen(js_class = Machine)]
impl JsMachine {
    #[wasm_bindgen(constructor)]
    pub fn new(variant: &str, rom_data: &[u8]) -> Result<JsMachine, JsError> {
        INIT_HOOKS.call_once(|| {
            console_error_panic_hook::set_once();
            tracing_wasm::set_as_global_default();
        });

        get_machine(variant, rom_data)
            .map(Self)
            .map_err(|err| JsError::new(&format!("{:#}", err)))
    }

    pub fn read(&mut self, address: u32) -> u8 {
        self.0.bus_read(address)
    }

    pub fn write(&mut self, address: u32, value: u8) {
        self.0.bus_write(address, value);
    }

    pub fn peek(&self, address: u32) -> u8 {
        self.0.peek(address)
    }

    pub fn load(&mut self, address: u32, data: &[u8]) {
        self.0.load(address, data);
    }

    #[wasm_bindgen(getter)]
    pub fn irq(&self) -> bool {
        self.0.irq_line()
    }

    #[wasm_bindgen(js_name = keyDown)]
    pub fn key_down(&mut self, key: String) {
        self.0.key_down(&key);
    }

    #[wasm_bindgen(js_name = keyUp)]
    pub fn key_up(&mut self, key: String) {
        self.0.key_up(&key);
    }

    pub fn reset(&mut self) {
        self.0.reset();
    }

    /// RGBA bytes of the next frame, ready for `ImageData`.
    pub fn screen(&mut self) -> js_sys::Uint8ClampedArray {
        let rgba: Vec<u8> = self
            .0
            .render_frame()
            .map(|frame| {
                frame
                    .pixels
                    .iter()
                    .flat_map(|&rgb| [(rgb >> 16) as u8, (rgb >> 8) as u8, rgb as u8, 0xFF])
                    .collect()
            })
            .unwrap_or_default();
        js_sys::Uint8ClampedArray::from(rgba.as_slice())
    }

    #[wasm_bindgen(getter = screenWidth)]
    pub fn screen_width(&self) -> usize {
        self.0.raster().map_or(0, |r| r.row_len())
    }

    #[wasm_bindgen(getter = screenHeight)]
    pub fn screen_height(&self) -> usize {
        self.0
            .crtc()
            .map_or(0, |crtc| crtc.borrow().visible_scanlines() as usize)
    }

    #[wasm_bindgen(getter)]
    pub fn text(&self) -> String {
        self.0.screen_text().unwrap_or_default()
    }

    #[wasm_bindgen(js_name = memoryDump)]
    pub fn memory_dump(&self, start: u32, end: u32) -> String {
        self.0.memory_dump(start, end)
    }
}
