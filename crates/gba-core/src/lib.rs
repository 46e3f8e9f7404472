//! Cycle-driven Game Boy Advance emulation core.
//!
//! This crate contains the platform-agnostic machine (CPU/bus/PPU/APU/etc).
//! Hosts drive it through the [`console`] facade: feed it a ROM, step it,
//! and collect frames, audio samples and save data.

/// Sound channels, FIFOs and the mixer.
pub mod apu;

/// Built-in firmware image and high-level firmware calls.
pub mod bios;

/// Memory map, wait states and IO registers.
pub mod bus;

/// ROM header parsing and the cartridge save chip.
pub mod cartridge;

/// High-level facade that wires the CPU and bus into a single machine.
pub mod console;

/// ARM7TDMI core.
pub mod cpu;

/// The four DMA channels.
pub mod dma;

/// IE/IF/IME.
pub mod interrupt;

/// KEYINPUT/KEYCNT.
pub mod keypad;

/// Display controller.
pub mod ppu;

/// SRAM, flash and EEPROM save protocols.
pub mod save;

/// The four hardware timers.
pub mod timer;

pub use bios::{Bios, BiosError};
pub use cartridge::{Cartridge, CartridgeError};
pub use console::{Console, StepEvent};
pub use cpu::EmuError;
pub use keypad::keys;
pub use ppu::{SCREEN_HEIGHT, SCREEN_WIDTH};
pub use save::{SaveError, SaveKind};
