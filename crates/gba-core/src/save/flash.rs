use log::debug;

use super::{SaveError, SaveKind};

const BANK_SIZE: usize = 0x1_0000;
const SECTOR_SIZE: usize = 0x1000;
const ERASED: u8 = 0xFF;

const CMD_ADDR_1: u32 = 0x5555;
const CMD_ADDR_2: u32 = 0x2AAA;

const CMD_ENTER_ID: u8 = 0x90;
const CMD_EXIT_ID: u8 = 0xF0;
const CMD_ERASE_PREPARE: u8 = 0x80;
const CMD_ERASE_CHIP: u8 = 0x10;
const CMD_ERASE_SECTOR: u8 = 0x30;
const CMD_PROGRAM: u8 = 0xA0;
const CMD_BANK_SELECT: u8 = 0xB0;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FlashSize {
    K64,
    K128,
}

impl FlashSize {
    pub const fn bytes(self) -> usize {
        match self {
            FlashSize::K64 => BANK_SIZE,
            FlashSize::K128 => BANK_SIZE * 2,
        }
    }

    /// Manufacturer and device id reported in ID mode.
    const fn id(self) -> [u8; 2] {
        match self {
            // Panasonic MN63F805MNP
            FlashSize::K64 => [0x32, 0x1B],
            // Sanyo LE26FV10N1TS
            FlashSize::K128 => [0x62, 0x13],
        }
    }

    const fn kind(self) -> SaveKind {
        match self {
            FlashSize::K64 => SaveKind::Flash64K,
            FlashSize::K128 => SaveKind::Flash128K,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Unlock {
    Ready,
    /// 0xAA seen at 0x5555.
    First,
    /// 0x55 seen at 0x2AAA; the next write is a command.
    Second,
}

/// Command latched by the previous unlocked write.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Pending {
    None,
    ErasePrepared,
    Program,
    BankSelect,
}

/// Flash memory with the 0x5555/0x2AAA command protocol.
#[derive(Clone, Debug)]
pub struct Flash {
    data: Vec<u8>,
    size: FlashSize,
    bank: usize,
    unlock: Unlock,
    pending: Pending,
    id_mode: bool,
    pub dirty: bool,
}

impl Flash {
    pub fn new(size: FlashSize) -> Self {
        Self {
            data: vec![ERASED; size.bytes()],
            size,
            bank: 0,
            unlock: Unlock::Ready,
            pending: Pending::None,
            id_mode: false,
            dirty: false,
        }
    }

    pub fn size(&self) -> FlashSize {
        self.size
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn read(&self, addr: u32) -> u8 {
        let offset = addr & 0xFFFF;
        if self.id_mode && offset < 2 {
            return self.size.id()[offset as usize];
        }
        self.data[self.bank * BANK_SIZE + offset as usize]
    }

    pub fn write(&mut self, addr: u32, val: u8) {
        let offset = addr & 0xFFFF;

        match self.pending {
            Pending::Program => {
                self.data[self.bank * BANK_SIZE + offset as usize] = val;
                self.dirty = true;
                self.pending = Pending::None;
                return;
            }
            Pending::BankSelect => {
                self.pending = Pending::None;
                if offset == 0 {
                    self.bank = (val & 1) as usize;
                }
                return;
            }
            Pending::None | Pending::ErasePrepared => {}
        }

        match self.unlock {
            Unlock::Ready => {
                if offset == CMD_ADDR_1 && val == 0xAA {
                    self.unlock = Unlock::First;
                } else {
                    self.pending = Pending::None;
                }
            }
            Unlock::First => {
                if offset == CMD_ADDR_2 && val == 0x55 {
                    self.unlock = Unlock::Second;
                } else {
                    self.unlock = Unlock::Ready;
                    self.pending = Pending::None;
                }
            }
            Unlock::Second => {
                self.unlock = Unlock::Ready;
                self.command(offset, val);
            }
        }
    }

    fn command(&mut self, offset: u32, val: u8) {
        let erase_prepared = self.pending == Pending::ErasePrepared;
        self.pending = Pending::None;

        if offset == CMD_ADDR_1 {
            match val {
                CMD_ENTER_ID => self.id_mode = true,
                CMD_EXIT_ID => self.id_mode = false,
                CMD_ERASE_PREPARE => self.pending = Pending::ErasePrepared,
                CMD_ERASE_CHIP if erase_prepared => {
                    debug!("flash chip erase");
                    self.data.fill(ERASED);
                    self.dirty = true;
                }
                CMD_PROGRAM => self.pending = Pending::Program,
                CMD_BANK_SELECT if self.size == FlashSize::K128 => {
                    self.pending = Pending::BankSelect;
                }
                _ => debug!("ignored flash command {val:02X}"),
            }
        } else if val == CMD_ERASE_SECTOR && erase_prepared && offset & 0x0FFF == 0 {
            let start = self.bank * BANK_SIZE + offset as usize;
            self.data[start..start + SECTOR_SIZE].fill(ERASED);
            self.dirty = true;
        }
    }

    pub fn load(&mut self, blob: &[u8]) -> Result<(), SaveError> {
        if blob.len() != self.size.bytes() {
            return Err(SaveError::SizeMismatch {
                kind: self.size.kind(),
                expected: self.size.bytes(),
                actual: blob.len(),
            });
        }
        self.data.copy_from_slice(blob);
        self.dirty = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unlock(flash: &mut Flash) {
        flash.write(0x0E00_5555, 0xAA);
        flash.write(0x0E00_2AAA, 0x55);
    }

    fn program(flash: &mut Flash, addr: u32, val: u8) {
        unlock(flash);
        flash.write(0x0E00_5555, CMD_PROGRAM);
        flash.write(addr, val);
    }

    #[test]
    fn program_then_read_back() {
        let mut flash = Flash::new(FlashSize::K64);
        for (i, &b) in b"flash!".iter().enumerate() {
            program(&mut flash, 0x0E00_0040 + i as u32, b);
        }
        let back: Vec<u8> = (0..6).map(|i| flash.read(0x0E00_0040 + i)).collect();
        assert_eq!(back, b"flash!");
    }

    #[test]
    fn unlocked_chip_erase_clears_everything() {
        let mut flash = Flash::new(FlashSize::K64);
        program(&mut flash, 0x0E00_0000, 0x12);
        program(&mut flash, 0x0E00_FFFF, 0x34);

        unlock(&mut flash);
        flash.write(0x0E00_5555, CMD_ERASE_PREPARE);
        unlock(&mut flash);
        flash.write(0x0E00_5555, CMD_ERASE_CHIP);

        assert!(flash.data().iter().all(|&b| b == ERASED));
    }

    #[test]
    fn out_of_sequence_commands_are_ignored() {
        let mut flash = Flash::new(FlashSize::K64);
        program(&mut flash, 0x0E00_0100, 0x77);
        let before = flash.data().to_vec();

        // Erase without unlock.
        flash.write(0x0E00_5555, CMD_ERASE_PREPARE);
        flash.write(0x0E00_5555, CMD_ERASE_CHIP);
        // Erase without the prepare step.
        unlock(&mut flash);
        flash.write(0x0E00_5555, CMD_ERASE_CHIP);
        // Broken unlock sequence.
        flash.write(0x0E00_5555, 0xAA);
        flash.write(0x0E00_1234, 0x55);
        flash.write(0x0E00_5555, CMD_PROGRAM);
        flash.write(0x0E00_0100, 0x00);

        assert_eq!(flash.data(), &before[..]);
    }

    #[test]
    fn stray_write_cancels_prepared_erase() {
        let mut flash = Flash::new(FlashSize::K64);
        program(&mut flash, 0x0E00_0100, 0x77);

        unlock(&mut flash);
        flash.write(0x0E00_5555, CMD_ERASE_PREPARE);
        flash.write(0x0E00_0200, 0x00);
        unlock(&mut flash);
        flash.write(0x0E00_5555, CMD_ERASE_CHIP);
        assert_eq!(flash.read(0x0E00_0100), 0x77);

        // A broken unlock after the prepare step cancels it as well.
        unlock(&mut flash);
        flash.write(0x0E00_5555, CMD_ERASE_PREPARE);
        flash.write(0x0E00_5555, 0xAA);
        flash.write(0x0E00_1234, 0x55);
        unlock(&mut flash);
        flash.write(0x0E00_1000, CMD_ERASE_SECTOR);
        unlock(&mut flash);
        flash.write(0x0E00_5555, CMD_ERASE_CHIP);
        assert_eq!(flash.read(0x0E00_0100), 0x77);
    }

    #[test]
    fn sector_erase_only_touches_one_sector() {
        let mut flash = Flash::new(FlashSize::K64);
        program(&mut flash, 0x0E00_1000, 0x01);
        program(&mut flash, 0x0E00_2000, 0x02);
        unlock(&mut flash);
        flash.write(0x0E00_5555, CMD_ERASE_PREPARE);
        unlock(&mut flash);
        flash.write(0x0E00_1000, CMD_ERASE_SECTOR);
        assert_eq!(flash.read(0x0E00_1000), ERASED);
        assert_eq!(flash.read(0x0E00_2000), 0x02);
    }

    #[test]
    fn id_mode_reports_chip_id() {
        let mut flash = Flash::new(FlashSize::K128);
        unlock(&mut flash);
        flash.write(0x0E00_5555, CMD_ENTER_ID);
        assert_eq!([flash.read(0x0E00_0000), flash.read(0x0E00_0001)], [0x62, 0x13]);
        unlock(&mut flash);
        flash.write(0x0E00_5555, CMD_EXIT_ID);
        assert_eq!(flash.read(0x0E00_0000), ERASED);
    }

    #[test]
    fn bank_switch_on_128k() {
        let mut flash = Flash::new(FlashSize::K128);
        program(&mut flash, 0x0E00_0010, 0xAA);
        unlock(&mut flash);
        flash.write(0x0E00_5555, CMD_BANK_SELECT);
        flash.write(0x0E00_0000, 1);
        assert_eq!(flash.read(0x0E00_0010), ERASED);
        program(&mut flash, 0x0E00_0010, 0xBB);
        assert_eq!(flash.data()[BANK_SIZE + 0x10], 0xBB);
        assert_eq!(flash.data()[0x10], 0xAA);
    }
}
