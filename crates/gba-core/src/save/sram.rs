use super::{SaveError, SaveKind};

pub const SRAM_SIZE: usize = 0x8000;

/// Battery-backed static RAM: flat byte addressing, mirrored every 32 KiB.
#[derive(Clone, Debug)]
pub struct Sram {
    data: Vec<u8>,
    pub dirty: bool,
}

impl Sram {
    pub fn new() -> Self {
        Self {
            data: vec![0xFF; SRAM_SIZE],
            dirty: false,
        }
    }

    pub fn read(&self, addr: u32) -> u8 {
        self.data[addr as usize & (SRAM_SIZE - 1)]
    }

    pub fn write(&mut self, addr: u32, val: u8) {
        self.data[addr as usize & (SRAM_SIZE - 1)] = val;
        self.dirty = true;
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn load(&mut self, blob: &[u8]) -> Result<(), SaveError> {
        if blob.len() != SRAM_SIZE {
            return Err(SaveError::SizeMismatch {
                kind: SaveKind::Sram,
                expected: SRAM_SIZE,
                actual: blob.len(),
            });
        }
        self.data.copy_from_slice(blob);
        self.dirty = false;
        Ok(())
    }
}

impl Default for Sram {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bytes_roundtrip_and_mirror() {
        let mut sram = Sram::new();
        let payload = b"SAVE FILE 01";
        for (i, &b) in payload.iter().enumerate() {
            sram.write(0x0E00_0100 + i as u32, b);
        }
        let back: Vec<u8> = (0..payload.len())
            .map(|i| sram.read(0x0E00_0100 + i as u32))
            .collect();
        assert_eq!(back, payload);
        assert_eq!(sram.read(0x0E00_8100), b'S');
        assert!(sram.dirty);
    }
}
