//! System bus: address decoding, wait states and the IO register file.
//!
//! Every CPU and DMA access goes through here. Accesses accumulate their cost
//! in system cycles, which the CPU collects with [`Bus::take_cycles`].

use log::debug;

use crate::apu::Apu;
use crate::bios::{BIOS_SIZE, Bios};
use crate::cartridge::Cartridge;
use crate::dma::Dma;
use crate::interrupt::Interrupts;
use crate::keypad::Keypad;
use crate::ppu::Ppu;
use crate::timer::Timers;

pub const EWRAM_SIZE: usize = 0x4_0000;
pub const IWRAM_SIZE: usize = 0x8000;
const IO_SIZE: usize = 0x400;

/// First-access ROM wait states, selected by two WAITCNT bits.
const ROM_FIRST: [u32; 4] = [4, 3, 2, 8];
/// Sequential ROM wait states per wait-state region.
const ROM_SECOND: [[u32; 2]; 3] = [[2, 1], [4, 1], [8, 1]];
const SRAM_WAIT: [u32; 4] = [4, 3, 2, 8];

/// Whether an access continues the previous one.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Access {
    NonSeq,
    Seq,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Width {
    Byte,
    Half,
    Word,
}

pub struct Bus {
    pub irq: Interrupts,
    pub bios: Bios,
    /// Set by HALTCNT, cleared when an enabled interrupt is requested.
    pub halted: bool,
    pub ppu: Ppu,
    pub apu: Apu,
    pub timers: Timers,
    pub dma: Dma,
    pub keypad: Keypad,
    pub cart: Cartridge,
    pub ewram: Vec<u8>,
    pub iwram: Vec<u8>,
    pub waitcnt: u16,
    pub postflg: u8,

    /// Last value fetched by the CPU, seen on unmapped reads.
    open_bus: u32,
    /// Address of the instruction being executed.
    exec_addr: u32,
    /// Last value written to each IO byte, for byte merges and write-only registers.
    io_shadow: [u8; IO_SIZE],
    cycles: u32,
}

#[inline]
fn le16(mem: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([mem[offset], mem[offset + 1]])
}

#[inline]
fn set_le16(mem: &mut [u8], offset: usize, val: u16) {
    mem[offset..offset + 2].copy_from_slice(&val.to_le_bytes());
}

/// VRAM is 96 KiB mirrored in 128 KiB steps, with the last 32 KiB repeating the OBJ area.
#[inline]
fn vram_offset(addr: u32) -> usize {
    let off = (addr & 0x1_FFFF) as usize;
    if off >= 0x1_8000 { off - 0x8000 } else { off }
}

#[inline]
fn is_sram(addr: u32) -> bool {
    matches!(addr >> 24, 0x0E | 0x0F)
}

impl Bus {
    pub fn new(cart: Cartridge, bios: Bios) -> Self {
        Self {
            irq: Interrupts::new(),
            bios,
            halted: false,
            ppu: Ppu::new(),
            apu: Apu::new(),
            timers: Timers::new(),
            dma: Dma::new(),
            keypad: Keypad::new(),
            cart,
            ewram: vec![0; EWRAM_SIZE],
            iwram: vec![0; IWRAM_SIZE],
            waitcnt: 0,
            postflg: 0,
            open_bus: 0,
            exec_addr: 0,
            io_shadow: [0; IO_SIZE],
            cycles: 0,
        }
    }

    /// Power-cycle everything except the cartridge and firmware.
    pub fn reset(&mut self) {
        self.irq = Interrupts::new();
        self.halted = false;
        self.ppu = Ppu::new();
        self.apu = Apu::new();
        self.timers = Timers::new();
        self.dma = Dma::new();
        let pressed = self.keypad.pressed();
        self.keypad = Keypad::new();
        self.keypad.set_pressed(pressed, &mut self.irq);
        self.ewram.fill(0);
        self.iwram.fill(0);
        self.waitcnt = 0;
        self.postflg = 0;
        self.open_bus = 0;
        self.exec_addr = 0;
        self.io_shadow = [0; IO_SIZE];
        self.cycles = 0;
    }

    /// Idle cycles, charged to the current instruction.
    #[inline]
    pub fn idle(&mut self, cycles: u32) {
        self.cycles += cycles;
    }

    /// Cycles accumulated since the last call.
    #[inline]
    pub fn take_cycles(&mut self) -> u32 {
        std::mem::take(&mut self.cycles)
    }

    fn wait(&self, addr: u32, width: Width, access: Access) -> u32 {
        match addr >> 24 {
            0x02 => {
                if width == Width::Word {
                    6
                } else {
                    3
                }
            }
            0x05 | 0x06 => {
                if width == Width::Word {
                    2
                } else {
                    1
                }
            }
            region @ 0x08..=0x0D => {
                let ws = ((region - 0x08) / 2) as usize;
                let shift = 2 + ws as u16 * 3;
                let n = 1 + ROM_FIRST[((self.waitcnt >> shift) & 3) as usize];
                let s = 1 + ROM_SECOND[ws][((self.waitcnt >> (shift + 2)) & 1) as usize];
                let first = if access == Access::Seq { s } else { n };
                if width == Width::Word { first + s } else { first }
            }
            0x0E | 0x0F => 1 + SRAM_WAIT[(self.waitcnt & 3) as usize],
            _ => 1,
        }
    }

    /// Pipeline refill after a jump: one non-sequential and one sequential fetch.
    pub fn refill(&mut self, pc: u32, thumb: bool) {
        let width = if thumb { Width::Half } else { Width::Word };
        self.cycles += self.wait(pc, width, Access::NonSeq) + self.wait(pc, width, Access::Seq);
    }

    pub fn fetch32(&mut self, addr: u32) -> u32 {
        self.exec_addr = addr;
        let val = self.read32(addr, Access::Seq);
        self.open_bus = val;
        if addr < BIOS_SIZE as u32 {
            self.bios.latch(val);
        }
        val
    }

    pub fn fetch16(&mut self, addr: u32) -> u16 {
        self.exec_addr = addr;
        let val = self.read16(addr, Access::Seq);
        self.open_bus = val as u32 * 0x0001_0001;
        if addr < BIOS_SIZE as u32 {
            let word = addr & !3;
            let latched = self.load16(word) as u32 | (self.load16(word + 2) as u32) << 16;
            self.bios.latch(latched);
        }
        val
    }

    pub fn read32(&mut self, addr: u32, access: Access) -> u32 {
        self.cycles += self.wait(addr, Width::Word, access);
        if is_sram(addr) {
            return self.cart.save.read8(addr & 0xFFFF) as u32 * 0x0101_0101;
        }
        let addr = addr & !3;
        self.load16(addr) as u32 | (self.load16(addr + 2) as u32) << 16
    }

    pub fn read16(&mut self, addr: u32, access: Access) -> u16 {
        self.cycles += self.wait(addr, Width::Half, access);
        if is_sram(addr) {
            return self.cart.save.read8(addr & 0xFFFF) as u16 * 0x0101;
        }
        self.load16(addr & !1)
    }

    pub fn read8(&mut self, addr: u32, access: Access) -> u8 {
        self.cycles += self.wait(addr, Width::Byte, access);
        if is_sram(addr) {
            return self.cart.save.read8(addr & 0xFFFF);
        }
        (self.load16(addr & !1) >> ((addr & 1) * 8)) as u8
    }

    pub fn write32(&mut self, addr: u32, val: u32, access: Access) {
        self.cycles += self.wait(addr, Width::Word, access);
        if is_sram(addr) {
            self.cart.save.write8(addr & 0xFFFF, (val >> ((addr & 3) * 8)) as u8);
            return;
        }
        let addr = addr & !3;
        self.store16(addr, val as u16);
        self.store16(addr + 2, (val >> 16) as u16);
    }

    pub fn write16(&mut self, addr: u32, val: u16, access: Access) {
        self.cycles += self.wait(addr, Width::Half, access);
        if is_sram(addr) {
            self.cart.save.write8(addr & 0xFFFF, (val >> ((addr & 1) * 8)) as u8);
            return;
        }
        self.store16(addr & !1, val);
    }

    pub fn write8(&mut self, addr: u32, val: u8, access: Access) {
        self.cycles += self.wait(addr, Width::Byte, access);
        match addr >> 24 {
            0x02 => self.ewram[(addr & 0x3_FFFF) as usize] = val,
            0x03 => self.iwram[(addr & 0x7FFF) as usize] = val,
            0x04 => self.io_write8(addr, val),
            // Palette and BG VRAM latch the byte into both halves.
            0x05 => set_le16(&mut self.ppu.palette, (addr & 0x3FE) as usize, val as u16 * 0x0101),
            0x06 => {
                let off = vram_offset(addr) & !1;
                if off < self.ppu.bg_vram_limit() {
                    set_le16(&mut self.ppu.vram, off, val as u16 * 0x0101);
                }
            }
            0x0E | 0x0F => self.cart.save.write8(addr & 0xFFFF, val),
            _ => debug!("ignored byte write {val:02X} to {addr:08X}"),
        }
    }

    /// Side-effect-free of wait states; `addr` is halfword aligned.
    fn load16(&mut self, addr: u32) -> u16 {
        match addr >> 24 {
            0x00 if addr < BIOS_SIZE as u32 => {
                self.bios.read16(addr, self.exec_addr < BIOS_SIZE as u32)
            }
            0x02 => le16(&self.ewram, (addr & 0x3_FFFE) as usize),
            0x03 => le16(&self.iwram, (addr & 0x7FFE) as usize),
            0x04 => self.io_read16(addr),
            0x05 => le16(&self.ppu.palette, (addr & 0x3FE) as usize),
            0x06 => le16(&self.ppu.vram, vram_offset(addr)),
            0x07 => le16(&self.ppu.oam, (addr & 0x3FE) as usize),
            0x08..=0x0C => self.cart.read16(addr & 0x01FF_FFFF),
            0x0D => {
                let off = addr & 0x01FF_FFFF;
                if self.cart.eeprom_at(off) {
                    if let Some(eeprom) = self.cart.save.eeprom_mut() {
                        return eeprom.read_bit();
                    }
                }
                self.cart.read16(off)
            }
            _ => (self.open_bus >> ((addr & 2) * 8)) as u16,
        }
    }

    fn store16(&mut self, addr: u32, val: u16) {
        match addr >> 24 {
            0x02 => set_le16(&mut self.ewram, (addr & 0x3_FFFE) as usize, val),
            0x03 => set_le16(&mut self.iwram, (addr & 0x7FFE) as usize, val),
            0x04 => self.io_write16(addr, val),
            0x05 => set_le16(&mut self.ppu.palette, (addr & 0x3FE) as usize, val),
            0x06 => set_le16(&mut self.ppu.vram, vram_offset(addr), val),
            0x07 => set_le16(&mut self.ppu.oam, (addr & 0x3FE) as usize, val),
            0x0D => {
                let off = addr & 0x01FF_FFFF;
                if self.cart.eeprom_at(off) {
                    if let Some(eeprom) = self.cart.save.eeprom_mut() {
                        eeprom.write_bit(val);
                    }
                }
            }
            _ => debug!("ignored write {val:04X} to {addr:08X}"),
        }
    }

    fn shadow16(&self, off: usize) -> u16 {
        le16(&self.io_shadow, off)
    }

    fn io_read16(&mut self, addr: u32) -> u16 {
        let off = addr & 0x00FF_FFFE;
        if off as usize >= IO_SIZE {
            return 0;
        }
        match off {
            0x000..=0x05F => self.ppu.read16(off),
            0x060..=0x0AF => self.apu.read16(off),
            0x0B0..=0x0DF => self.dma.read16(off),
            0x100..=0x10F => self.timers.read(off - 0x100),
            0x120..=0x12F | 0x134 | 0x140..=0x15F => self.shadow16(off as usize),
            0x130 => self.keypad.read_keyinput(),
            0x132 => self.keypad.read_keycnt(),
            0x200 => self.irq.read_ie(),
            0x202 => self.irq.read_if(),
            0x204 => self.waitcnt,
            0x208 => self.irq.read_ime(),
            0x300 => self.postflg as u16,
            _ => 0,
        }
    }

    fn io_write16(&mut self, addr: u32, val: u16) {
        let off = addr & 0x00FF_FFFE;
        if off as usize >= IO_SIZE {
            return;
        }
        set_le16(&mut self.io_shadow, off as usize, val);
        match off {
            0x000..=0x05F => self.ppu.write16(off, val),
            0x060..=0x0AF => {
                self.apu.write16(off, val);
                // Restart and FIFO reset bits act once; later byte merges must not repeat them.
                let once = match off {
                    0x64 | 0x6C | 0x74 | 0x7C => 0x8000,
                    0x82 => 0x8800,
                    _ => 0,
                };
                set_le16(&mut self.io_shadow, off as usize, val & !once);
            }
            0x0B0..=0x0DF => self.write_dma(off, val),
            0x100..=0x10F => self.timers.write(off - 0x100, val),
            0x132 => self.keypad.write_keycnt(val, &mut self.irq),
            0x200 => self.irq.write_ie(val),
            0x202 => self.irq.acknowledge(val),
            0x204 => self.waitcnt = val & 0x5FFF,
            0x208 => self.irq.write_ime(val),
            0x300 => {
                self.postflg = val as u8 & 1;
                self.write_haltcnt((val >> 8) as u8);
            }
            _ => {}
        }
    }

    fn io_write8(&mut self, addr: u32, val: u8) {
        let off = addr & 0x00FF_FFFF;
        if off as usize >= IO_SIZE {
            return;
        }
        match off {
            0x202 | 0x203 => self.irq.acknowledge((val as u16) << ((off & 1) * 8)),
            0x300 => self.postflg = val & 1,
            0x301 => self.write_haltcnt(val),
            0x0A0..=0x0A7 => self.apu.write_fifo(off, val),
            _ => {
                let half = off & !1;
                // DMA control reflects completed transfers, so merge against the live value.
                let base = match half {
                    0x0BA | 0x0C6 | 0x0D2 | 0x0DE => self.dma.read16(half),
                    _ => self.shadow16(half as usize),
                };
                let merged = if off & 1 == 0 {
                    (base & 0xFF00) | val as u16
                } else {
                    (base & 0x00FF) | (val as u16) << 8
                };
                self.io_write16(half, merged);
            }
        }
    }

    fn write_haltcnt(&mut self, val: u8) {
        if val & 0x80 != 0 {
            debug!("stop mode requested; halting instead");
        }
        self.halted = true;
    }
}
