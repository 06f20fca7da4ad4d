use std::{
    cell::RefCell,
    collections::{BTreeSet, HashMap, VecDeque},
    fs,
    path::{Path, PathBuf},
    rc::Rc,
};

use anyhow::Context;
use derivative::Derivative;

use crate::{
    bus::{Bus, MapEntry, UnmappedPolicy},
    config::{Connection, DeviceConfig, DeviceKind, MachineConfig, RegionConfig, Sink},
    crtc::Crtc,
    device::{IrqLine, Message, MessageQueue, SharedDevice},
    error::ConfigError,
    keyboard::{KeyEventSerializer, Keyboard, ParallelInput},
    memory::{AccessMode, MemoryBank, MemoryRegion, Persistence},
    range::AddressRange,
    registry::PeripheralRegistry,
    renderer::{CursorState, RasterConfig, Renderer, Rgb, PIXELS_PER_CHAR},
    utils::hexdump,
    via::Via,
};

/// One rendered frame, row-major.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub width: usize,
    pub height: usize,
    pub pixels: Vec<Rgb>,
}

/// One emulated Pluton/0 session: memory, devices, video and keyboard.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct Machine {
    pub name: String,
    pub cpu_clock_hz: u32,
    pub bus: Bus,
    queue: MessageQueue,
    irq_sources: BTreeSet<String>,
    renderer: Option<Renderer>,
    crtc: Option<Rc<RefCell<Crtc>>>,
    keyboard: Keyboard,
    #[derivative(Debug = "ignore")]
    key_port: Option<KeyEventSerializer<dyn ParallelInput>>,
    nvram_dir: Option<PathBuf>,
}

impl Machine {
    pub fn variant(name: &str) -> anyhow::Result<Self> {
        MachineBuilder::from_config(MachineConfig::variant(name)?).build()
    }

    /// CPU-side read. Device reads may have side effects.
    pub fn bus_read(&mut self, address: u32) -> u8 {
        let value = self.bus.read_byte(address);
        self.process_messages();
        value
    }

    pub fn bus_write(&mut self, address: u32, value: u8) {
        self.bus.write_byte(address, value);
        self.process_messages();
    }

    pub fn peek(&self, address: u32) -> u8 {
        self.bus.peek_byte(address)
    }

    /// Copies `data` into the address space starting at `address`, the way
    /// a monitor or loader would. ROM and unmapped bytes are skipped.
    pub fn load(&mut self, address: u32, data: &[u8]) {
        tracing::debug!("[Machine] Loading {} bytes at {:#07X}", data.len(), address);
        self.bus.write_block(address, data);
        self.process_messages();
    }

    /// Folds queued interrupt changes into the CPU IRQ line.
    pub fn process_messages(&mut self) {
        while let Some(message) = self.queue.borrow_mut().pop_front() {
            match message {
                Message::AssertIrq(source) => {
                    tracing::debug!("[Machine] IRQ asserted by {}", source);
                    self.irq_sources.insert(source);
                }
                Message::ClearIrq(source) => {
                    tracing::debug!("[Machine] IRQ cleared by {}", source);
                    self.irq_sources.remove(&source);
                }
            }
        }
    }

    /// Level of the CPU IRQ input: any connected source asserting.
    pub fn irq_line(&self) -> bool {
        !self.irq_sources.is_empty()
    }

    pub fn submit_key(&mut self, key: u8) {
        match &self.key_port {
            Some(port) => port.submit(key),
            None => tracing::debug!("[Machine] No keyboard port, dropping key {:02X}", key),
        }
        self.process_messages();
    }

    pub fn key_down(&mut self, key: &str) {
        let code = self.keyboard.key_down(key);
        self.submit_key(code);
    }

    pub fn key_up(&mut self, key: &str) {
        self.keyboard.key_up(key);
    }

    pub fn crtc(&self) -> Option<Rc<RefCell<Crtc>>> {
        self.crtc.clone()
    }

    pub fn raster(&self) -> Option<&RasterConfig> {
        self.renderer.as_ref().map(|r| r.config())
    }

    pub fn render_row(
        &self,
        row_base: u16,
        glyph_row: u8,
        cursor: CursorState,
    ) -> Option<Vec<Rgb>> {
        let renderer = self.renderer.as_ref()?;
        Some(renderer.render_row(&self.bus.memory, row_base, glyph_row, cursor))
    }

    /// Renders every displayed scanline with the CRTC's current geometry
    /// and advances its blink phase. Columns past the CRTC's displayed width
    /// are border and drawn in the background color.
    pub fn render_frame(&mut self) -> Option<Frame> {
        let renderer = self.renderer.as_ref()?;
        let crtc = self.crtc.as_ref()?;

        let frame = {
            let crtc = crtc.borrow();
            let height = crtc.visible_scanlines() as usize;
            let width = renderer.config().row_len();
            let displayed = width.min(crtc.chars_per_row() as usize * PIXELS_PER_CHAR);
            let border = renderer.config().palette.get(0);

            let mut pixels = Vec::with_capacity(width * height);
            for line in 0..height as u16 {
                if let Some(params) = crtc.scanline(line) {
                    let mut row = renderer.render_row(
                        &self.bus.memory,
                        params.row_base,
                        params.glyph_row,
                        params.cursor,
                    );
                    row[displayed..].fill(border);
                    pixels.extend(row);
                }
            }
            Frame {
                width,
                height,
                pixels,
            }
        };

        crtc.borrow_mut().end_frame();
        Some(frame)
    }

    /// Displayed text rows, one line each.
    pub fn screen_text(&self) -> Option<String> {
        let renderer = self.renderer.as_ref()?;
        let crtc = self.crtc.as_ref()?.borrow();
        let rows_per_char = crtc.glyph_rows_per_char();
        let chars = crtc.chars_per_row() as usize;

        let lines: Vec<String> = (0..crtc.rows())
            .filter_map(|row| crtc.scanline(row * rows_per_char))
            .map(|params| renderer.as_text(&self.bus.memory, params.row_base, chars))
            .collect();
        Some(lines.join("\n"))
    }

    pub fn memory_map(&self) -> Vec<MapEntry> {
        self.bus.memory_map()
    }

    pub fn print_memory_map(&self) {
        for entry in self.memory_map() {
            tracing::info!("{}", entry);
        }
    }

    pub fn memory_dump(&self, start: u32, end: u32) -> String {
        let bytes: Vec<u8> = (start..=end).map(|addr| self.peek(addr)).collect();
        hexdump(&bytes, start)
    }

    /// Resets every device and drops pending interrupts. Memory is kept.
    pub fn reset(&mut self) {
        tracing::info!("[Machine] Reset {}", self.name);
        for binding in self.bus.registry().bindings() {
            binding.device.borrow_mut().reset();
        }
        self.queue.borrow_mut().clear();
        self.irq_sources.clear();
        self.keyboard = Keyboard::new();
    }

    /// Flushes battery-backed regions to the NVRAM directory.
    pub fn shutdown(&mut self) -> anyhow::Result<()> {
        let Some(dir) = &self.nvram_dir else {
            tracing::debug!("[Machine] No NVRAM directory, nothing to flush");
            return Ok(());
        };

        for region in self.bus.memory.battery_backed() {
            let path = nvram_path(dir, &self.name, &region.name);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("creating NVRAM directory {}", parent.display()))?;
            }
            fs::write(&path, &region.data)
                .with_context(|| format!("writing NVRAM image {}", path.display()))?;
            tracing::info!("[Machine] Saved {} to {}", region.name, path.display());
        }
        Ok(())
    }
}

pub fn nvram_path(dir: &Path, machine: &str, region: &str) -> PathBuf {
    dir.join(machine).join(format!("{}.nv", region))
}

#[derive(Derivative)]
#[derivative(Debug)]
pub struct MachineBuilder {
    config: MachineConfig,
    images: HashMap<String, Vec<u8>>,
    #[derivative(Debug = "ignore")]
    external: Vec<(String, AddressRange, SharedDevice)>,
    nvram_dir: Option<PathBuf>,
}

impl MachineBuilder {
    pub fn new(name: &str) -> Self {
        Self::from_config(MachineConfig::new(name))
    }

    pub fn from_config(config: MachineConfig) -> Self {
        Self {
            config,
            images: HashMap::new(),
            external: Vec::new(),
            nvram_dir: None,
        }
    }

    pub fn region(&mut self, region: RegionConfig) -> &mut Self {
        self.config.regions.push(region);
        self
    }

    pub fn ram_region(&mut self, name: &str, base: u32, size: usize) -> &mut Self {
        self.region(RegionConfig::ram(name, base, size))
    }

    pub fn rom_region(&mut self, name: &str, base: u32, size: usize, image: &[u8]) -> &mut Self {
        self.rom_image(name, image);
        self.region(RegionConfig::rom(name, base, size))
    }

    /// In-memory image for a ROM region, taking precedence over its path.
    pub fn rom_image(&mut self, region: &str, image: &[u8]) -> &mut Self {
        self.images.insert(region.to_string(), image.to_vec());
        self
    }

    pub fn via(&mut self, name: &str, range: AddressRange) -> &mut Self {
        self.config.devices.push(DeviceConfig {
            name: name.to_string(),
            kind: DeviceKind::Via,
            range,
        });
        self
    }

    pub fn crtc(&mut self, name: &str, range: AddressRange) -> &mut Self {
        self.config.devices.push(DeviceConfig {
            name: name.to_string(),
            kind: DeviceKind::Crtc,
            range,
        });
        self
    }

    /// Maps a device owned by the host (serial, sound, ...).
    pub fn device(&mut self, name: &str, range: AddressRange, device: SharedDevice) -> &mut Self {
        self.external.push((name.to_string(), range, device));
        self
    }

    pub fn connect(&mut self, source: &str, sink: Sink) -> &mut Self {
        self.config.connections.push(Connection {
            source: source.to_string(),
            sink,
        });
        self
    }

    pub fn raster(&mut self, raster: RasterConfig) -> &mut Self {
        self.config.raster = Some(raster);
        self
    }

    pub fn keyboard(&mut self, via: &str) -> &mut Self {
        self.config.keyboard = Some(via.to_string());
        self
    }

    pub fn unmapped(&mut self, policy: UnmappedPolicy) -> &mut Self {
        self.config.unmapped = policy;
        self
    }

    pub fn nvram_dir(&mut self, dir: impl Into<PathBuf>) -> &mut Self {
        self.nvram_dir = Some(dir.into());
        self
    }

    pub fn build(&self) -> anyhow::Result<Machine> {
        let config = &self.config;
        tracing::info!("Initializing {} ({:?} unmapped)", config.name, config.unmapped);

        let mut memory = MemoryBank::new();
        for region in &config.regions {
            memory.add(self.build_region(region)?)?;
        }

        let queue: MessageQueue = Rc::new(RefCell::new(VecDeque::new()));
        let mut registry = PeripheralRegistry::new();
        let mut vias: HashMap<String, Rc<RefCell<Via>>> = HashMap::new();
        let mut crtc = None;

        for device in &config.devices {
            let shared: SharedDevice = match device.kind {
                DeviceKind::Via => {
                    let via = Rc::new(RefCell::new(Via::new()));
                    vias.insert(device.name.clone(), via.clone());
                    via
                }
                DeviceKind::Crtc => {
                    let handle = Rc::new(RefCell::new(Crtc::new()));
                    crtc.get_or_insert_with(|| handle.clone());
                    handle
                }
            };
            registry.register(&device.name, device.range, shared)?;
        }
        for (name, range, device) in &self.external {
            registry.register(name, *range, device.clone())?;
        }

        for connection in &config.connections {
            let device = registry
                .device(&connection.source)
                .ok_or_else(|| ConfigError::UnknownConnectionSource(connection.source.clone()))?;
            match connection.sink {
                Sink::CpuIrq => {
                    tracing::debug!("Wiring {} IRQ to the CPU", connection.source);
                    device
                        .borrow_mut()
                        .connect_irq(IrqLine::to_queue(&connection.source, queue.clone()));
                }
            }
        }

        let key_port = match &config.keyboard {
            Some(target) => {
                let via = vias
                    .get(target)
                    .ok_or_else(|| ConfigError::KeyboardTarget(target.clone()))?;
                let port: Rc<RefCell<dyn ParallelInput>> = via.clone();
                Some(KeyEventSerializer::new(port))
            }
            None => None,
        };

        let renderer = match &config.raster {
            Some(raster) => Some(Renderer::new(raster.clone(), &memory)?),
            None => None,
        };

        let mut machine = Machine {
            name: config.name.clone(),
            cpu_clock_hz: config.cpu_clock_hz,
            bus: Bus::new(memory, registry, config.unmapped),
            queue,
            irq_sources: BTreeSet::new(),
            renderer,
            crtc,
            keyboard: Keyboard::new(),
            key_port,
            nvram_dir: self.nvram_dir.clone(),
        };
        machine.process_messages();
        machine.print_memory_map();
        Ok(machine)
    }

    fn build_region(&self, region: &RegionConfig) -> anyhow::Result<MemoryRegion> {
        let built = match region.access {
            AccessMode::ReadOnly => match (self.images.get(&region.name), &region.image) {
                (Some(image), _) => {
                    MemoryRegion::rom(&region.name, region.base, region.size, image)?
                }
                (None, Some(path)) => {
                    MemoryRegion::load_rom(&region.name, region.base, region.size, path)?
                }
                (None, None) => MemoryRegion::rom(&region.name, region.base, region.size, &[])?,
            },
            AccessMode::ReadWrite => MemoryRegion::ram(&region.name, region.base, region.size)?,
        };
        let mut built = built.with_role(region.role);

        if region.persistence == Persistence::BatteryBacked {
            built = built.battery_backed();
            self.restore_nvram(&mut built)?;
        }
        Ok(built)
    }

    fn restore_nvram(&self, region: &mut MemoryRegion) -> anyhow::Result<()> {
        let Some(dir) = &self.nvram_dir else {
            return Ok(());
        };

        let path = nvram_path(dir, &self.config.name, &region.name);
        if !path.exists() {
            tracing::debug!("No NVRAM image at {}, starting zeroed", path.display());
            return Ok(());
        }

        let image =
            fs::read(&path).with_context(|| format!("reading NVRAM image {}", path.display()))?;
        if region.restore(&image) {
            tracing::info!("Restored {} from {}", region.name, path.display());
        } else {
            tracing::warn!(
                "NVRAM image {} is {} bytes, {} expects {}; ignoring it",
                path.display(),
                image.len(),
                region.name,
                region.size()
            );
        }
        Ok(())
    }
}
