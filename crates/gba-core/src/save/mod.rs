//! Cartridge save backends.
//!
//! The set of protocols is closed, so the backend is a plain enum and the bus
//! matches on it rather than going through a trait object.

pub mod eeprom;
pub mod flash;
pub mod sram;

use log::{info, warn};
use thiserror::Error;

pub use eeprom::Eeprom;
pub use flash::{Flash, FlashSize};
pub use sram::Sram;

/// Save protocol detected for a cartridge.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SaveKind {
    None,
    Sram,
    Flash64K,
    Flash128K,
    Eeprom,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SaveError {
    #[error("cartridge has no save backend")]
    NoBackend,
    #[error("save data for {kind:?} must be {expected} bytes, got {actual}")]
    SizeMismatch {
        kind: SaveKind,
        expected: usize,
        actual: usize,
    },
}

/// Library marker strings linked into cartridges by the official SDK.
const MARKERS: &[(&[u8], SaveKind)] = &[
    (b"EEPROM_V", SaveKind::Eeprom),
    (b"SRAM_V", SaveKind::Sram),
    (b"SRAM_F_V", SaveKind::Sram),
    (b"FLASH_V", SaveKind::Flash64K),
    (b"FLASH512_V", SaveKind::Flash64K),
    (b"FLASH1M_V", SaveKind::Flash128K),
];

/// Guess the save protocol from the ROM contents.
///
/// Markers are word aligned. Finding markers for more than one protocol is
/// treated as undetermined.
pub fn detect(rom: &[u8]) -> SaveKind {
    let mut found: Option<SaveKind> = None;
    for offset in (0..rom.len()).step_by(4) {
        let tail = &rom[offset..];
        if tail[0] != b'E' && tail[0] != b'S' && tail[0] != b'F' {
            continue;
        }
        for &(marker, kind) in MARKERS {
            if !tail.starts_with(marker) {
                continue;
            }
            match found {
                None => found = Some(kind),
                Some(prev) if prev == kind => {}
                Some(prev) => {
                    warn!("ambiguous save markers ({prev:?} and {kind:?}); saving disabled");
                    return SaveKind::None;
                }
            }
        }
    }
    found.unwrap_or(SaveKind::None)
}

#[derive(Clone, Debug)]
pub enum SaveBackend {
    None,
    Sram(Sram),
    Flash(Flash),
    Eeprom(Eeprom),
}

impl SaveBackend {
    pub fn new(kind: SaveKind) -> Self {
        match kind {
            SaveKind::None => SaveBackend::None,
            SaveKind::Sram => SaveBackend::Sram(Sram::new()),
            SaveKind::Flash64K => SaveBackend::Flash(Flash::new(FlashSize::K64)),
            SaveKind::Flash128K => SaveBackend::Flash(Flash::new(FlashSize::K128)),
            SaveKind::Eeprom => SaveBackend::Eeprom(Eeprom::new()),
        }
    }

    pub fn kind(&self) -> SaveKind {
        match self {
            SaveBackend::None => SaveKind::None,
            SaveBackend::Sram(_) => SaveKind::Sram,
            SaveBackend::Flash(f) => match f.size() {
                FlashSize::K64 => SaveKind::Flash64K,
                FlashSize::K128 => SaveKind::Flash128K,
            },
            SaveBackend::Eeprom(_) => SaveKind::Eeprom,
        }
    }

    /// Byte read from the 0x0E000000 region.
    pub fn read8(&self, addr: u32) -> u8 {
        match self {
            SaveBackend::Sram(s) => s.read(addr),
            SaveBackend::Flash(f) => f.read(addr),
            SaveBackend::None | SaveBackend::Eeprom(_) => 0xFF,
        }
    }

    /// Byte write to the 0x0E000000 region.
    pub fn write8(&mut self, addr: u32, val: u8) {
        match self {
            SaveBackend::Sram(s) => s.write(addr, val),
            SaveBackend::Flash(f) => f.write(addr, val),
            SaveBackend::None | SaveBackend::Eeprom(_) => {}
        }
    }

    pub fn eeprom(&self) -> Option<&Eeprom> {
        match self {
            SaveBackend::Eeprom(e) => Some(e),
            _ => None,
        }
    }

    pub fn eeprom_mut(&mut self) -> Option<&mut Eeprom> {
        match self {
            SaveBackend::Eeprom(e) => Some(e),
            _ => None,
        }
    }

    /// The persisted image, or an empty slice when there is nothing to save.
    pub fn data(&self) -> &[u8] {
        match self {
            SaveBackend::None => &[],
            SaveBackend::Sram(s) => s.data(),
            SaveBackend::Flash(f) => f.data(),
            SaveBackend::Eeprom(e) => e.data(),
        }
    }

    /// Restore a persisted image. On failure the backend is left freshly erased.
    pub fn load(&mut self, blob: &[u8]) -> Result<(), SaveError> {
        let kind = self.kind();
        let result = match self {
            SaveBackend::None => Err(SaveError::NoBackend),
            SaveBackend::Sram(s) => s.load(blob),
            SaveBackend::Flash(f) => f.load(blob),
            SaveBackend::Eeprom(e) => e.load(blob),
        };
        match &result {
            Ok(()) => info!("restored {} bytes of {kind:?} save data", blob.len()),
            Err(SaveError::NoBackend) => {}
            Err(e) => {
                warn!("discarding save data: {e}");
                *self = SaveBackend::new(kind);
            }
        }
        result
    }

    pub fn dirty(&self) -> bool {
        match self {
            SaveBackend::None => false,
            SaveBackend::Sram(s) => s.dirty,
            SaveBackend::Flash(f) => f.dirty,
            SaveBackend::Eeprom(e) => e.dirty,
        }
    }

    pub fn clear_dirty(&mut self) {
        match self {
            SaveBackend::None => {}
            SaveBackend::Sram(s) => s.dirty = false,
            SaveBackend::Flash(f) => f.dirty = false,
            SaveBackend::Eeprom(e) => e.dirty = false,
        }
    }
}
