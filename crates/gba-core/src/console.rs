//! The machine: CPU plus bus, stepped in lockstep.

use log::{error, info};

use crate::bios::Bios;
use crate::bus::Bus;
use crate::cartridge::{Cartridge, CartridgeError};
use crate::cpu::{Cpu, EmuError};
use crate::dma::DmaTiming;
use crate::ppu::{PpuEvent, SCREEN_HEIGHT};
use crate::save::SaveError;

/// Cartridge entry point the firmware jumps to.
pub const ROM_ENTRY: u32 = 0x0800_0000;

/// What a [`Console::step`] completed, beyond executing an instruction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StepEvent {
    None,
    /// A visible scanline finished drawing.
    LineReady(u16),
    /// VBlank began; the framebuffer holds a whole frame.
    FrameReady,
}

pub struct Console {
    pub cpu: Cpu,
    pub bus: Bus,
    /// Sticky until the next reset.
    fault: Option<EmuError>,
    audio_enabled: bool,
}

impl Console {
    /// Load `rom` with the built-in firmware and power on.
    pub fn new(rom: Vec<u8>) -> Result<Self, CartridgeError> {
        Self::with_bios(rom, Bios::builtin())
    }

    pub fn with_bios(rom: Vec<u8>, bios: Bios) -> Result<Self, CartridgeError> {
        let cart = Cartridge::new(rom)?;
        let mut console = Self {
            cpu: Cpu::new(),
            bus: Bus::new(cart, bios),
            fault: None,
            audio_enabled: true,
        };
        console.reset();
        Ok(console)
    }

    /// Cold power-on: firmware runs from the reset vector.
    pub fn reset(&mut self) {
        info!(
            "reset ({} firmware)",
            if self.bus.bios.is_builtin() { "built-in" } else { "external" }
        );
        self.bus.reset();
        self.bus.apu.set_enabled(self.audio_enabled);
        self.cpu.reset();
        self.fault = None;
    }

    /// Start as if the firmware had just handed over to the cartridge.
    pub fn soft_reset(&mut self) {
        info!("soft reset to {ROM_ENTRY:#010x}");
        self.bus.reset();
        self.bus.apu.set_enabled(self.audio_enabled);
        self.bus.bios.handed_over();
        self.bus.postflg = 1;
        self.cpu.boot(ROM_ENTRY);
        self.fault = None;
    }

    /// Execute one instruction (or one idle stretch while halted) and advance
    /// every device by its cost.
    pub fn step(&mut self) -> Result<StepEvent, EmuError> {
        if let Some(err) = &self.fault {
            return Err(err.clone());
        }

        if self.bus.halted && self.bus.irq.requested() {
            self.bus.halted = false;
        }
        let mut cycles = if self.bus.halted {
            let to_timer = self.bus.timers.cycles_until_overflow().unwrap_or(u32::MAX);
            self.bus.ppu.cycles_to_event().min(to_timer).max(1)
        } else {
            match self.cpu.step(&mut self.bus) {
                Ok(cycles) => cycles,
                Err(err) => {
                    error!("emulation stopped: {err}");
                    self.fault = Some(err.clone());
                    return Err(err);
                }
            }
        };
        cycles += self.bus.run_dma();

        let mut event = StepEvent::None;
        while cycles > 0 {
            let chunk = cycles.min(self.bus.ppu.cycles_to_event());
            cycles -= chunk;
            cycles += self.advance(chunk, &mut event);
        }
        Ok(event)
    }

    /// Advance devices by `cycles`, which never crosses a display event.
    /// Returns the cost of any DMA the advance triggered.
    fn advance(&mut self, cycles: u32, event: &mut StepEvent) -> u32 {
        let bus = &mut self.bus;
        let overflows = bus.timers.step(cycles, &mut bus.irq);
        for (timer, &count) in overflows.iter().enumerate().take(2) {
            if count == 0 {
                continue;
            }
            let requests = bus.apu.timer_overflow(timer, count);
            for (fifo, wanted) in requests.into_iter().enumerate() {
                if wanted {
                    bus.fifo_request(fifo);
                }
            }
        }
        bus.apu.step(cycles);

        match bus.ppu.step(cycles, &mut bus.irq) {
            PpuEvent::HBlank(line) if (line as usize) < SCREEN_HEIGHT => {
                bus.trigger_dma(DmaTiming::HBlank);
                if *event == StepEvent::None {
                    *event = StepEvent::LineReady(line);
                }
            }
            PpuEvent::VBlank => {
                bus.trigger_dma(DmaTiming::VBlank);
                *event = StepEvent::FrameReady;
            }
            _ => {}
        }
        bus.run_dma()
    }

    /// Step until the next frame boundary.
    pub fn run_frame(&mut self) -> Result<(), EmuError> {
        while self.step()? != StepEvent::FrameReady {}
        Ok(())
    }

    /// 240x160 pixels, 0x00RRGGBB.
    pub fn framebuffer(&self) -> &[u32] {
        self.bus.ppu.framebuffer()
    }

    /// Drain buffered audio: interleaved stereo at [`crate::apu::SAMPLE_RATE`].
    pub fn take_samples(&mut self) -> Vec<i16> {
        self.bus.apu.take_samples()
    }

    pub fn set_audio_enabled(&mut self, enabled: bool) {
        self.audio_enabled = enabled;
        self.bus.apu.set_enabled(enabled);
    }

    /// Pressed buttons as a mask of [`crate::keypad::keys`] bits.
    pub fn set_keys(&mut self, pressed: u16) {
        self.bus.keypad.set_pressed(pressed, &mut self.bus.irq);
    }

    pub fn cartridge(&self) -> &Cartridge {
        &self.bus.cart
    }

    pub fn fault(&self) -> Option<&EmuError> {
        self.fault.as_ref()
    }

    pub fn save_data(&self) -> &[u8] {
        self.bus.cart.save.data()
    }

    pub fn load_save_data(&mut self, blob: &[u8]) -> Result<(), SaveError> {
        self.bus.cart.save.load(blob)
    }

    /// Whether the save changed since the last [`Console::clear_save_dirty`].
    pub fn save_dirty(&self) -> bool {
        self.bus.cart.save.dirty()
    }

    pub fn clear_save_dirty(&mut self) {
        self.bus.cart.save.clear_dirty();
    }
}
