use log::debug;

use super::{SaveError, SaveKind};

const SMALL_SIZE: usize = 0x200;
const LARGE_SIZE: usize = 0x2000;
const BLOCK_BYTES: usize = 8;

/// Bits clocked out before the 64 data bits of a read.
const READ_PREAMBLE: u8 = 4;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum State {
    /// Shifting in a command.
    Receiving,
    /// Shifting out a block, `remaining` bits left including the preamble.
    Reading { value: u64, remaining: u8 },
}

/// Serial EEPROM driven one bit per 16-bit access at 0x0D000000.
///
/// Requests are "11" + address + stop bit for a read and
/// "10" + address + 64 data bits + stop bit for a write, MSB first.
#[derive(Clone, Debug)]
pub struct Eeprom {
    data: Vec<u8>,
    addr_bits: Option<u8>,
    shift: u128,
    count: u32,
    state: State,
    pub dirty: bool,
}

impl Eeprom {
    pub fn new() -> Self {
        Self {
            data: vec![0xFF; LARGE_SIZE],
            addr_bits: None,
            shift: 0,
            count: 0,
            state: State::Receiving,
            dirty: false,
        }
    }

    /// Address width once known. Until then commands are parsed as 14-bit.
    pub fn addr_bits(&self) -> Option<u8> {
        self.addr_bits
    }

    fn width(&self) -> u32 {
        self.addr_bits.unwrap_or(14) as u32
    }

    fn set_width(&mut self, bits: u8) {
        if self.addr_bits.is_some() {
            return;
        }
        debug!("eeprom address width fixed at {bits} bits");
        self.addr_bits = Some(bits);
        let size = if bits == 6 { SMALL_SIZE } else { LARGE_SIZE };
        self.data.resize(size, 0xFF);
    }

    /// Infer the address width from the unit count of a DMA3 transfer that
    /// targets the chip.
    pub fn observe_dma_length(&mut self, count: u32) {
        match count {
            9 | 73 => self.set_width(6),
            17 | 81 => self.set_width(14),
            _ => {}
        }
    }

    fn block_offset(&self, addr: u64) -> usize {
        let blocks = self.data.len() / BLOCK_BYTES;
        (addr as usize & (blocks - 1)) * BLOCK_BYTES
    }

    pub fn write_bit(&mut self, val: u16) {
        if matches!(self.state, State::Reading { .. }) {
            self.state = State::Receiving;
            self.shift = 0;
            self.count = 0;
        }

        self.shift = (self.shift << 1) | (val & 1) as u128;
        self.count += 1;
        if self.count < 2 {
            return;
        }

        let width = self.width();
        let command = (self.shift >> (self.count - 2)) & 0b11;
        match command {
            0b11 if self.count == 2 + width + 1 => {
                let addr = (self.shift >> 1) as u64 & ((1 << width) - 1);
                let at = self.block_offset(addr);
                let mut block = [0u8; BLOCK_BYTES];
                block.copy_from_slice(&self.data[at..at + BLOCK_BYTES]);
                self.state = State::Reading {
                    value: u64::from_be_bytes(block),
                    remaining: READ_PREAMBLE + 64,
                };
                self.shift = 0;
                self.count = 0;
            }
            0b10 if self.count == 2 + width + 64 + 1 => {
                let value = (self.shift >> 1) as u64;
                let addr = (self.shift >> 65) as u64 & ((1 << width) - 1);
                let at = self.block_offset(addr);
                self.data[at..at + BLOCK_BYTES].copy_from_slice(&value.to_be_bytes());
                self.dirty = true;
                self.shift = 0;
                self.count = 0;
            }
            0b11 | 0b10 => {}
            _ => {
                self.shift = 0;
                self.count = 0;
            }
        }
    }

    pub fn read_bit(&mut self) -> u16 {
        let State::Reading { value, remaining } = self.state else {
            return 1;
        };
        let remaining = remaining - 1;
        self.state = if remaining == 0 {
            State::Receiving
        } else {
            State::Reading { value, remaining }
        };
        if remaining >= 64 {
            0
        } else {
            ((value >> remaining) & 1) as u16
        }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn load(&mut self, blob: &[u8]) -> Result<(), SaveError> {
        let bits = match blob.len() {
            SMALL_SIZE => 6,
            LARGE_SIZE => 14,
            actual => {
                return Err(SaveError::SizeMismatch {
                    kind: SaveKind::Eeprom,
                    expected: self.data.len(),
                    actual,
                });
            }
        };
        self.addr_bits = None;
        self.set_width(bits);
        self.data.copy_from_slice(blob);
        self.dirty = false;
        Ok(())
    }
}

impl Default for Eeprom {
    fn default() -> Self {
        Self::new()
    }
}
