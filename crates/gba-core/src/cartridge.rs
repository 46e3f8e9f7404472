use log::{info, warn};
use thiserror::Error;

use crate::save::{self, SaveBackend, SaveKind};

/// Smallest image that still carries a complete header.
pub const HEADER_SIZE: usize = 0xC0;
/// Largest image the 32 MiB cartridge window can address.
pub const MAX_ROM_SIZE: usize = 0x0200_0000;

const FIXED_BYTE_OFFSET: usize = 0xB2;
const FIXED_BYTE: u8 = 0x96;
const COMPLEMENT_OFFSET: usize = 0xBD;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CartridgeError {
    #[error("ROM is {len} bytes, shorter than the {HEADER_SIZE}-byte header")]
    TooShort { len: usize },
    #[error("header fixed byte is {found:#04x}, expected 0x96")]
    BadFixedByte { found: u8 },
}

struct Header<'a> {
    data: &'a [u8],
}

impl<'a> Header<'a> {
    fn parse(data: &'a [u8]) -> Result<Self, CartridgeError> {
        if data.len() < HEADER_SIZE {
            return Err(CartridgeError::TooShort { len: data.len() });
        }
        let found = data[FIXED_BYTE_OFFSET];
        if found != FIXED_BYTE {
            return Err(CartridgeError::BadFixedByte { found });
        }
        Ok(Self { data })
    }

    fn text(&self, start: usize, len: usize) -> String {
        let mut slice = &self.data[start..start + len];
        if let Some(pos) = slice.iter().position(|&b| b == 0) {
            slice = &slice[..pos];
        }
        String::from_utf8_lossy(slice).trim().to_string()
    }

    fn title(&self) -> String {
        self.text(0xA0, 12)
    }

    fn game_code(&self) -> String {
        self.text(0xAC, 4)
    }

    fn maker_code(&self) -> String {
        self.text(0xB0, 2)
    }

    fn version(&self) -> u8 {
        self.data[0xBC]
    }

    fn complement(&self) -> u8 {
        self.data[COMPLEMENT_OFFSET]
    }
}

/// Header complement check over 0xA0..=0xBC.
pub fn header_checksum(rom: &[u8]) -> u8 {
    rom[0xA0..COMPLEMENT_OFFSET]
        .iter()
        .fold(0u8, |acc, &b| acc.wrapping_sub(b))
        .wrapping_sub(0x19)
}

/// A loaded Game Pak: read-only ROM plus its save chip.
#[derive(Clone, Debug)]
pub struct Cartridge {
    rom: Vec<u8>,
    pub title: String,
    pub game_code: String,
    pub maker_code: String,
    pub version: u8,
    pub checksum_ok: bool,
    pub save: SaveBackend,
}

impl Cartridge {
    pub fn new(mut rom: Vec<u8>) -> Result<Self, CartridgeError> {
        let header = Header::parse(&rom)?;
        let title = header.title();
        let game_code = header.game_code();
        let maker_code = header.maker_code();
        let version = header.version();
        let checksum_ok = header.complement() == header_checksum(&rom);
        if !checksum_ok {
            warn!(
                "header complement {:#04x} does not match computed {:#04x}",
                rom[COMPLEMENT_OFFSET],
                header_checksum(&rom)
            );
        }
        if rom.len() > MAX_ROM_SIZE {
            warn!("ROM is {} bytes; truncating to 32 MiB", rom.len());
            rom.truncate(MAX_ROM_SIZE);
        }

        let kind = save::detect(&rom);
        info!(
            "Loaded ROM: {title} [{game_code}] maker {maker_code} v{version}, save {kind:?}"
        );

        Ok(Self {
            rom,
            title,
            game_code,
            maker_code,
            version,
            checksum_ok,
            save: SaveBackend::new(kind),
        })
    }

    pub fn rom(&self) -> &[u8] {
        &self.rom
    }

    pub fn save_kind(&self) -> SaveKind {
        self.save.kind()
    }

    /// Halfword read at `offset` into the 32 MiB ROM window.
    ///
    /// Past the end of the image the bus floats to the low address bits.
    #[inline]
    pub fn read16(&self, offset: u32) -> u16 {
        let offset = (offset & !1) as usize;
        match self.rom.get(offset..offset + 2) {
            Some(b) => u16::from_le_bytes([b[0], b[1]]),
            None => (offset >> 1) as u16,
        }
    }

    #[inline]
    pub fn read8(&self, offset: u32) -> u8 {
        let half = self.read16(offset);
        (half >> ((offset & 1) * 8)) as u8
    }

    /// Whether accesses at `offset` in the 0x0D region reach the EEPROM.
    ///
    /// Images up to 16 MiB see the chip anywhere in the region; larger ones only
    /// in the top 256 bytes.
    pub fn eeprom_at(&self, offset: u32) -> bool {
        if self.save.kind() != SaveKind::Eeprom {
            return false;
        }
        self.rom.len() <= 0x0100_0000 || offset & 0x00FF_FF00 == 0x00FF_FF00
    }
}

/// A blank image of `len` bytes with a valid header, for unit tests.
#[cfg(test)]
pub(crate) fn test_rom(len: usize) -> Vec<u8> {
    let mut rom = vec![0u8; len.max(HEADER_SIZE)];
    rom[0xA0..0xA0 + 8].copy_from_slice(b"TESTGAME");
    rom[0xAC..0xB0].copy_from_slice(b"ATST");
    rom[0xB0..0xB2].copy_from_slice(b"01");
    rom[FIXED_BYTE_OFFSET] = FIXED_BYTE;
    rom[0xBC] = 2;
    rom[COMPLEMENT_OFFSET] = header_checksum(&rom);
    rom
}
