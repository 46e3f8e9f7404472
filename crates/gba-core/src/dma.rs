//! The four DMA channels.
//!
//! Register writes only latch state. Transfers run from [`Bus::run_dma`], which
//! the console calls after every CPU step and at HBlank/VBlank, so a transfer
//! always completes before the CPU continues.

use crate::bus::{Access, Bus};
use crate::interrupt::Interrupt;

#[cfg(feature = "dma-trace")]
macro_rules! dma_trace {
    ($($arg:tt)*) => {
        log::trace!($($arg)*);
    };
}
#[cfg(not(feature = "dma-trace"))]
macro_rules! dma_trace {
    ($($arg:tt)*) => {};
}

const CTRL_DST: u16 = 0x0060;
const CTRL_SRC: u16 = 0x0180;
const CTRL_REPEAT: u16 = 0x0200;
const CTRL_WORD: u16 = 0x0400;
const CTRL_DRQ: u16 = 0x0800;
const CTRL_TIMING: u16 = 0x3000;
const CTRL_IRQ: u16 = 0x4000;
const CTRL_ENABLE: u16 = 0x8000;

/// Destination of FIFO A; FIFO B follows 4 bytes later.
const FIFO_A_ADDR: u32 = 0x0400_00A0;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DmaTiming {
    Immediate,
    VBlank,
    HBlank,
    /// Sound FIFO on channels 1-2, video capture on channel 3.
    Special,
}

impl DmaTiming {
    fn from_control(control: u16) -> Self {
        match (control & CTRL_TIMING) >> 12 {
            0 => DmaTiming::Immediate,
            1 => DmaTiming::VBlank,
            2 => DmaTiming::HBlank,
            _ => DmaTiming::Special,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct DmaChannel {
    /// Programmed registers, as last written.
    pub src: u32,
    pub dst: u32,
    pub count: u16,
    pub control: u16,
    // Working copies latched when the channel is enabled.
    cur_src: u32,
    cur_dst: u32,
    cur_count: u32,
    pending: bool,
}

impl DmaChannel {
    #[inline]
    pub fn enabled(&self) -> bool {
        self.control & CTRL_ENABLE != 0
    }

    pub fn timing(&self) -> DmaTiming {
        DmaTiming::from_control(self.control)
    }
}

#[derive(Clone, Debug, Default)]
pub struct Dma {
    pub channels: [DmaChannel; 4],
}

fn src_mask(index: usize) -> u32 {
    if index == 0 { 0x07FF_FFFF } else { 0x0FFF_FFFF }
}

fn dst_mask(index: usize) -> u32 {
    if index == 3 { 0x0FFF_FFFF } else { 0x07FF_FFFF }
}

/// Transfer units for a programmed count; zero means the maximum.
fn unit_count(index: usize, count: u16) -> u32 {
    let max = if index == 3 { 0x1_0000 } else { 0x4000 };
    match count as u32 & (max - 1) {
        0 => max,
        n => n,
    }
}

/// Register offset (relative to 0x04000000) to channel and register within it.
fn split(offset: u32) -> (usize, u32) {
    let rel = offset - 0xB0;
    ((rel / 12) as usize, rel % 12)
}

impl Dma {
    pub fn new() -> Self {
        Self::default()
    }

    /// Only the control halves are readable.
    pub fn read16(&self, offset: u32) -> u16 {
        let (index, reg) = split(offset);
        match (self.channels.get(index), reg) {
            (Some(ch), 0xA) => ch.control,
            _ => 0,
        }
    }

    /// Whether any channel is waiting to run.
    pub fn pending(&self) -> bool {
        self.channels.iter().any(|c| c.pending)
    }
}

impl Bus {
    pub(crate) fn write_dma(&mut self, offset: u32, val: u16) {
        let (index, reg) = split(offset);
        let ch = &mut self.dma.channels[index];
        match reg {
            0x0 => ch.src = (ch.src & 0xFFFF_0000) | val as u32,
            0x2 => ch.src = (ch.src & 0x0000_FFFF) | (val as u32) << 16,
            0x4 => ch.dst = (ch.dst & 0xFFFF_0000) | val as u32,
            0x6 => ch.dst = (ch.dst & 0x0000_FFFF) | (val as u32) << 16,
            0x8 => ch.count = val,
            _ => {
                let was_enabled = ch.enabled();
                let drq = if index == 3 { CTRL_DRQ } else { 0 };
                ch.control = val & (0xF7E0 | drq);
                if !ch.enabled() {
                    ch.pending = false;
                } else if !was_enabled {
                    ch.cur_src = ch.src & src_mask(index);
                    ch.cur_dst = ch.dst & dst_mask(index);
                    ch.cur_count = unit_count(index, ch.count);
                    ch.pending = ch.timing() == DmaTiming::Immediate;
                    dma_trace!(
                        "DMA{index} armed {:08X} -> {:08X} x{} ctrl {:04X}",
                        ch.cur_src,
                        ch.cur_dst,
                        ch.cur_count,
                        ch.control
                    );
                }
            }
        }
    }

    /// Mark channels waiting on `timing` as ready to run.
    pub fn trigger_dma(&mut self, timing: DmaTiming) {
        for ch in &mut self.dma.channels {
            if ch.enabled() && ch.timing() == timing {
                ch.pending = true;
            }
        }
    }

    /// A sound FIFO (0 = A, 1 = B) dropped to half full.
    pub fn fifo_request(&mut self, fifo: usize) {
        let target = FIFO_A_ADDR + 4 * fifo as u32;
        for ch in &mut self.dma.channels[1..3] {
            if ch.enabled() && ch.timing() == DmaTiming::Special && ch.cur_dst == target {
                ch.pending = true;
            }
        }
    }

    /// Run every pending transfer in priority order. Returns the cycles spent.
    pub fn run_dma(&mut self) -> u32 {
        let carried = self.take_cycles();
        while let Some(index) = self.dma.channels.iter().position(|c| c.pending) {
            self.transfer(index);
        }
        carried + self.take_cycles()
    }

    fn transfer(&mut self, index: usize) {
        let ch = self.dma.channels[index].clone();
        let timing = ch.timing();
        let fifo = timing == DmaTiming::Special && (index == 1 || index == 2);
        let word = fifo || ch.control & CTRL_WORD != 0;
        let unit: i32 = if word { 4 } else { 2 };
        let count = if fifo { 4 } else { ch.cur_count };

        let dst_ctrl = (ch.control & CTRL_DST) >> 5;
        let src_ctrl = (ch.control & CTRL_SRC) >> 7;
        let rom_src = (0x08..0x0E).contains(&(ch.cur_src >> 24));
        let src_step = match src_ctrl {
            _ if rom_src => unit,
            1 => -unit,
            2 => 0,
            _ => unit,
        };
        let dst_step = match dst_ctrl {
            _ if fifo => 0,
            1 => -unit,
            2 => 0,
            _ => unit,
        };

        dma_trace!(
            "DMA{index} run {:08X} -> {:08X} x{count} {}",
            ch.cur_src,
            ch.cur_dst,
            if word { "words" } else { "halves" }
        );

        if index == 3 && (ch.cur_src >> 24 == 0x0D || ch.cur_dst >> 24 == 0x0D) {
            if let Some(eeprom) = self.cart.save.eeprom_mut() {
                eeprom.observe_dma_length(count);
            }
        }

        let (mut src, mut dst) = (ch.cur_src, ch.cur_dst);
        for i in 0..count {
            let access = if i == 0 { Access::NonSeq } else { Access::Seq };
            if word {
                let v = self.read32(src, access);
                self.write32(dst, v, access);
            } else {
                let v = self.read16(src, access);
                self.write16(dst, v, access);
            }
            src = src.wrapping_add_signed(src_step);
            dst = dst.wrapping_add_signed(dst_step);
        }
        self.idle(2);

        if ch.control & CTRL_IRQ != 0 {
            self.irq.raise(Interrupt::dma(index));
        }

        let ch = &mut self.dma.channels[index];
        ch.pending = false;
        ch.cur_src = src;
        ch.cur_dst = dst;
        if ch.control & CTRL_REPEAT != 0 && timing != DmaTiming::Immediate {
            if !fifo {
                ch.cur_count = unit_count(index, ch.count);
            }
            if dst_ctrl == 3 {
                ch.cur_dst = ch.dst & dst_mask(index);
            }
        } else {
            ch.control &= !CTRL_ENABLE;
        }
    }
}
