//! Display controller: register file, scanline timing and video memories.
//!
//! Timing is 1232 cycles per line, HBlank from cycle 960, 228 lines per
//! frame. A visible line is rendered into the framebuffer when its HBlank
//! starts.

mod render;
mod sprites;

use crate::interrupt::{Interrupt, Interrupts};

#[cfg(feature = "ppu-trace")]
macro_rules! ppu_trace {
    ($($arg:tt)*) => {
        log::trace!($($arg)*);
    };
}
#[cfg(not(feature = "ppu-trace"))]
macro_rules! ppu_trace {
    ($($arg:tt)*) => {};
}

pub const SCREEN_WIDTH: usize = 240;
pub const SCREEN_HEIGHT: usize = 160;

pub const HDRAW_CYCLES: u32 = 960;
pub const CYCLES_PER_LINE: u32 = 1232;
pub const LINES_PER_FRAME: u16 = 228;
pub const CYCLES_PER_FRAME: u32 = CYCLES_PER_LINE * LINES_PER_FRAME as u32;

pub const PALETTE_SIZE: usize = 0x400;
pub const VRAM_SIZE: usize = 0x18000;
pub const OAM_SIZE: usize = 0x400;

const DISPCNT_FORCED_BLANK: u16 = 1 << 7;

const STAT_VBLANK: u16 = 1 << 0;
const STAT_HBLANK: u16 = 1 << 1;
const STAT_VCOUNT: u16 = 1 << 2;
const STAT_VBLANK_IRQ: u16 = 1 << 3;
const STAT_HBLANK_IRQ: u16 = 1 << 4;
const STAT_VCOUNT_IRQ: u16 = 1 << 5;
const STAT_WRITABLE: u16 = 0xFF38;

/// What happened during a call to [`Ppu::step`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PpuEvent {
    None,
    /// HBlank started on the given line. Lines below 160 have just been drawn.
    HBlank(u16),
    /// Line 160 began.
    VBlank,
}

#[derive(Clone, Copy, Debug, Default)]
struct BgRegs {
    cnt: u16,
    hofs: u16,
    vofs: u16,
}

/// BG2/BG3 rotation-scaling state.
#[derive(Clone, Copy, Debug, Default)]
struct AffineRegs {
    pa: i16,
    pb: i16,
    pc: i16,
    pd: i16,
    /// Reference point as written, 20.8 fixed point.
    x: i32,
    y: i32,
    /// Internal reference advanced by PB/PD each line.
    cur_x: i32,
    cur_y: i32,
}

#[derive(Clone, Debug)]
pub struct Ppu {
    pub palette: Vec<u8>,
    pub vram: Vec<u8>,
    pub oam: Vec<u8>,

    dispcnt: u16,
    green_swap: u16,
    dispstat: u16,
    vcount: u16,
    bg: [BgRegs; 4],
    affine: [AffineRegs; 2],
    win_h: [u16; 2],
    win_v: [u16; 2],
    winin: u16,
    winout: u16,
    mosaic: u16,
    bldcnt: u16,
    bldalpha: u16,
    bldy: u16,

    line_cycle: u32,
    framebuffer: Vec<u32>,
    frames: u64,
}

impl Ppu {
    pub fn new() -> Self {
        let mut affine = [AffineRegs::default(); 2];
        for a in &mut affine {
            a.pa = 0x100;
            a.pd = 0x100;
        }
        Self {
            palette: vec![0; PALETTE_SIZE],
            vram: vec![0; VRAM_SIZE],
            oam: vec![0; OAM_SIZE],
            dispcnt: 0,
            green_swap: 0,
            dispstat: 0,
            vcount: 0,
            bg: [BgRegs::default(); 4],
            affine,
            win_h: [0; 2],
            win_v: [0; 2],
            winin: 0,
            winout: 0,
            mosaic: 0,
            bldcnt: 0,
            bldalpha: 0,
            bldy: 0,
            line_cycle: 0,
            framebuffer: vec![0; SCREEN_WIDTH * SCREEN_HEIGHT],
            frames: 0,
        }
    }

    pub fn framebuffer(&self) -> &[u32] {
        &self.framebuffer
    }

    pub fn vcount(&self) -> u16 {
        self.vcount
    }

    pub fn in_vblank(&self) -> bool {
        self.dispstat & STAT_VBLANK != 0
    }

    pub fn in_hblank(&self) -> bool {
        self.dispstat & STAT_HBLANK != 0
    }

    /// Frames completed since power-on.
    pub fn frames(&self) -> u64 {
        self.frames
    }

    fn mode(&self) -> u16 {
        self.dispcnt & 7
    }

    /// Modes 3-5 keep BG pixels up to 0x14000 and OBJ tiles above it.
    pub fn bitmap_mode(&self) -> bool {
        self.mode() >= 3
    }

    /// End of the BG part of VRAM for the current mode.
    pub fn bg_vram_limit(&self) -> usize {
        if self.bitmap_mode() { 0x14000 } else { 0x10000 }
    }

    /// Cycles until the next HBlank start or line end.
    pub fn cycles_to_event(&self) -> u32 {
        if self.line_cycle < HDRAW_CYCLES {
            HDRAW_CYCLES - self.line_cycle
        } else {
            CYCLES_PER_LINE - self.line_cycle
        }
    }

    /// Advance by `cycles`, which must not exceed [`Ppu::cycles_to_event`].
    pub fn step(&mut self, cycles: u32, irq: &mut Interrupts) -> PpuEvent {
        let was_hdraw = self.line_cycle < HDRAW_CYCLES;
        self.line_cycle += cycles;

        if was_hdraw && self.line_cycle >= HDRAW_CYCLES {
            return self.enter_hblank(irq);
        }
        if self.line_cycle >= CYCLES_PER_LINE {
            self.line_cycle -= CYCLES_PER_LINE;
            return self.next_line(irq);
        }
        PpuEvent::None
    }

    fn enter_hblank(&mut self, irq: &mut Interrupts) -> PpuEvent {
        self.dispstat |= STAT_HBLANK;
        if self.dispstat & STAT_HBLANK_IRQ != 0 {
            irq.raise(Interrupt::HBlank);
        }
        let line = self.vcount;
        if (line as usize) < SCREEN_HEIGHT {
            self.render_line();
            for a in &mut self.affine {
                a.cur_x = a.cur_x.wrapping_add(a.pb as i32);
                a.cur_y = a.cur_y.wrapping_add(a.pd as i32);
            }
        }
        PpuEvent::HBlank(line)
    }

    fn next_line(&mut self, irq: &mut Interrupts) -> PpuEvent {
        self.dispstat &= !STAT_HBLANK;
        self.vcount += 1;
        let mut event = PpuEvent::None;

        if self.vcount == LINES_PER_FRAME {
            self.vcount = 0;
            self.dispstat &= !STAT_VBLANK;
        } else if self.vcount == SCREEN_HEIGHT as u16 {
            ppu_trace!("VBlank, frame {}", self.frames);
            self.dispstat |= STAT_VBLANK;
            if self.dispstat & STAT_VBLANK_IRQ != 0 {
                irq.raise(Interrupt::VBlank);
            }
            for a in &mut self.affine {
                a.cur_x = a.x;
                a.cur_y = a.y;
            }
            self.frames += 1;
            event = PpuEvent::VBlank;
        }

        if self.vcount == self.dispstat >> 8 {
            self.dispstat |= STAT_VCOUNT;
            if self.dispstat & STAT_VCOUNT_IRQ != 0 {
                irq.raise(Interrupt::VCount);
            }
        } else {
            self.dispstat &= !STAT_VCOUNT;
        }
        event
    }

    /// `offset` is relative to 0x04000000 and halfword aligned.
    pub fn read16(&self, offset: u32) -> u16 {
        match offset {
            0x00 => self.dispcnt,
            0x02 => self.green_swap,
            0x04 => self.dispstat,
            0x06 => self.vcount,
            0x08 | 0x0A | 0x0C | 0x0E => self.bg[(offset as usize - 0x08) / 2].cnt,
            0x48 => self.winin,
            0x4A => self.winout,
            0x50 => self.bldcnt,
            0x52 => self.bldalpha,
            _ => 0,
        }
    }

    pub fn write16(&mut self, offset: u32, val: u16) {
        ppu_trace!("write {offset:03X} = {val:04X}");
        match offset {
            0x00 => self.dispcnt = val,
            0x02 => self.green_swap = val & 1,
            0x04 => self.dispstat = (self.dispstat & !STAT_WRITABLE) | (val & STAT_WRITABLE),
            0x06 => {}
            0x08 | 0x0A | 0x0C | 0x0E => {
                let mask = if offset >= 0x0C { 0xFFFF } else { 0xDFFF };
                self.bg[(offset as usize - 0x08) / 2].cnt = val & mask;
            }
            0x10..=0x1E => {
                let bg = &mut self.bg[(offset as usize - 0x10) / 4];
                if offset & 2 == 0 {
                    bg.hofs = val & 0x1FF;
                } else {
                    bg.vofs = val & 0x1FF;
                }
            }
            0x20..=0x3E => self.write_affine(offset, val),
            0x40 | 0x42 => self.win_h[(offset as usize - 0x40) / 2] = val,
            0x44 | 0x46 => self.win_v[(offset as usize - 0x44) / 2] = val,
            0x48 => self.winin = val & 0x3F3F,
            0x4A => self.winout = val & 0x3F3F,
            0x4C => self.mosaic = val,
            0x50 => self.bldcnt = val & 0x3FFF,
            0x52 => self.bldalpha = val & 0x1F1F,
            0x54 => self.bldy = val & 0x1F,
            _ => {}
        }
    }

    fn write_affine(&mut self, offset: u32, val: u16) {
        let a = &mut self.affine[(offset as usize - 0x20) / 0x10];
        // 28-bit signed reference halves.
        let set_ref = |r: &mut i32, high: bool| {
            let raw = *r as u32;
            let raw = if high {
                (raw & 0xFFFF) | ((val as u32 & 0x0FFF) << 16)
            } else {
                (raw & 0xFFFF_0000) | val as u32
            };
            *r = ((raw << 4) as i32) >> 4;
        };
        match offset & 0xF {
            0x0 => a.pa = val as i16,
            0x2 => a.pb = val as i16,
            0x4 => a.pc = val as i16,
            0x6 => a.pd = val as i16,
            0x8 | 0xA => {
                set_ref(&mut a.x, offset & 2 != 0);
                a.cur_x = a.x;
            }
            _ => {
                set_ref(&mut a.y, offset & 2 != 0);
                a.cur_y = a.y;
            }
        }
    }

    fn forced_blank(&self) -> bool {
        self.dispcnt & DISPCNT_FORCED_BLANK != 0
    }
}

impl Default for Ppu {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_frame(ppu: &mut Ppu, irq: &mut Interrupts) -> (Vec<PpuEvent>, u32) {
        let mut events = Vec::new();
        let mut cycles = 0;
        loop {
            let n = ppu.cycles_to_event();
            cycles += n;
            let ev = ppu.step(n, irq);
            if ev != PpuEvent::None {
                events.push(ev);
            }
            if ppu.vcount() == 0 && ppu.line_cycle == 0 {
                return (events, cycles);
            }
        }
    }

    #[test]
    fn frame_timing() {
        let mut ppu = Ppu::new();
        let mut irq = Interrupts::new();
        let (events, cycles) = run_frame(&mut ppu, &mut irq);
        assert_eq!(cycles, CYCLES_PER_FRAME);
        let hblanks = events
            .iter()
            .filter(|e| matches!(e, PpuEvent::HBlank(_)))
            .count();
        assert_eq!(hblanks, LINES_PER_FRAME as usize);
        let vblanks = events.iter().filter(|e| **e == PpuEvent::VBlank).count();
        assert_eq!(vblanks, 1);
        assert_eq!(ppu.frames(), 1);
    }

    #[test]
    fn vblank_flag_tracks_lines() {
        let mut ppu = Ppu::new();
        let mut irq = Interrupts::new();
        let mut seen = std::collections::BTreeSet::new();
        for _ in 0..LINES_PER_FRAME as u32 * 2 {
            let n = ppu.cycles_to_event();
            ppu.step(n, &mut irq);
            let line = ppu.vcount();
            seen.insert(line);
            assert_eq!(ppu.in_vblank(), (160..=227).contains(&line), "line {line}");
        }
        assert_eq!(seen.len(), LINES_PER_FRAME as usize);
    }

    #[test]
    fn dispstat_irqs_and_vcount_match() {
        let mut ppu = Ppu::new();
        let mut irq = Interrupts::new();
        ppu.write16(0x04, STAT_VBLANK_IRQ | STAT_VCOUNT_IRQ | (5 << 8));
        while ppu.vcount() != 5 {
            let n = ppu.cycles_to_event();
            ppu.step(n, &mut irq);
        }
        assert_ne!(ppu.read16(0x04) & STAT_VCOUNT, 0);
        assert_eq!(irq.flags, Interrupt::VCount.mask());

        while ppu.vcount() != 160 {
            let n = ppu.cycles_to_event();
            ppu.step(n, &mut irq);
        }
        assert_ne!(irq.flags & Interrupt::VBlank.mask(), 0);
        assert_eq!(irq.flags & Interrupt::HBlank.mask(), 0);
    }

    #[test]
    fn status_flags_are_read_only() {
        let mut ppu = Ppu::new();
        ppu.write16(0x04, 0xFFFF);
        assert_eq!(ppu.read16(0x04) & 0x7, 0);
        ppu.write16(0x06, 99);
        assert_eq!(ppu.read16(0x06), 0);
    }

    #[test]
    fn reference_point_is_sign_extended() {
        let mut ppu = Ppu::new();
        ppu.write16(0x28, 0x0000);
        ppu.write16(0x2A, 0x0800);
        assert_eq!(ppu.affine[0].x, -(1 << 27));
        assert_eq!(ppu.affine[0].cur_x, -(1 << 27));
    }
}
