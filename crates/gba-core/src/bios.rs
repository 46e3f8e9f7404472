//! System firmware.
//!
//! Either a 16 KiB image supplied by the host, or a small built-in replacement
//! holding just the exception vectors, a reset routine and the IRQ trampoline.
//! With the built-in image software interrupts are serviced here instead of
//! being executed as firmware code.

use std::f64::consts::PI;

use log::{debug, warn};
use thiserror::Error;

use crate::bus::{Access, Bus};
use crate::cpu::Cpu;

pub const BIOS_SIZE: usize = 0x4000;

/// Value the official firmware leaves on the bus after handing over to the
/// cartridge; reads of the region see it until the firmware runs again.
const POST_BOOT_FETCH: u32 = 0xE129_F000;

/// Checksum reported by the official firmware.
const CHECKSUM: u32 = 0xBAAE_187F;

/// Firmware copy of IF acknowledged by user interrupt handlers.
const BIOS_IF: u32 = 0x0300_7FF8;
const SOFT_RESET_FLAG: u32 = 0x0300_7FFA;

const RESET_ROUTINE: u32 = 0xE0;
const IRQ_ROUTINE: u32 = 0x128;

#[rustfmt::skip]
const VECTORS: [u32; 8] = [
    0xEA00_0036, // b    reset
    0xE1B0_F00E, // movs pc, lr
    0xE1B0_F00E, // movs pc, lr
    0xE25E_F004, // subs pc, lr, #4
    0xE25E_F008, // subs pc, lr, #8
    0xEAFF_FFFE, // b    .
    0xEA00_0042, // b    irq
    0xE25E_F004, // subs pc, lr, #4
];

#[rustfmt::skip]
const RESET: [u32; 14] = [
    0xE3A0_00D3, // mov  r0, #0xD3
    0xE121_F000, // msr  cpsr_c, r0
    0xE59F_D01C, // ldr  sp, =0x03007FE0
    0xE3A0_00D2, // mov  r0, #0xD2
    0xE121_F000, // msr  cpsr_c, r0
    0xE59F_D014, // ldr  sp, =0x03007FA0
    0xE3A0_001F, // mov  r0, #0x1F
    0xE121_F000, // msr  cpsr_c, r0
    0xE59F_D00C, // ldr  sp, =0x03007F00
    0xE3A0_E302, // mov  lr, #0x08000000
    0xE12F_FF1E, // bx   lr
    0x0300_7FE0,
    0x0300_7FA0,
    0x0300_7F00,
];

#[rustfmt::skip]
const IRQ: [u32; 6] = [
    0xE92D_500F, // stmfd sp!, {r0-r3, r12, lr}
    0xE3A0_0301, // mov   r0, #0x04000000
    0xE28F_E000, // add   lr, pc, #0
    0xE510_F004, // ldr   pc, [r0, #-4]
    0xE8BD_500F, // ldmfd sp!, {r0-r3, r12, lr}
    0xE25E_F004, // subs  pc, lr, #4
];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BiosError {
    #[error("firmware image is {len} bytes, expected {BIOS_SIZE}")]
    BadSize { len: usize },
}

#[derive(Clone, Debug)]
pub struct Bios {
    image: Vec<u8>,
    builtin: bool,
    /// Last word fetched from inside the firmware.
    last_fetch: u32,
    /// An IntrWait is parked waiting for its flags.
    pub(crate) waiting: bool,
}

impl Bios {
    pub fn builtin() -> Self {
        let mut image = vec![0u8; BIOS_SIZE];
        let mut place = |base: u32, words: &[u32]| {
            for (i, w) in words.iter().enumerate() {
                let at = base as usize + i * 4;
                image[at..at + 4].copy_from_slice(&w.to_le_bytes());
            }
        };
        place(0, &VECTORS);
        place(RESET_ROUTINE, &RESET);
        place(IRQ_ROUTINE, &IRQ);
        Self {
            image,
            builtin: true,
            last_fetch: POST_BOOT_FETCH,
            waiting: false,
        }
    }

    pub fn new(image: Vec<u8>) -> Result<Self, BiosError> {
        if image.len() != BIOS_SIZE {
            return Err(BiosError::BadSize { len: image.len() });
        }
        Ok(Self {
            image,
            builtin: false,
            last_fetch: POST_BOOT_FETCH,
            waiting: false,
        })
    }

    pub fn is_builtin(&self) -> bool {
        self.builtin
    }

    pub fn image(&self) -> &[u8] {
        &self.image
    }

    /// Halfword read. Outside the firmware only the latched fetch is visible.
    pub(crate) fn read16(&self, addr: u32, from_inside: bool) -> u16 {
        if from_inside {
            let at = (addr as usize) & (BIOS_SIZE - 2);
            u16::from_le_bytes([self.image[at], self.image[at + 1]])
        } else {
            (self.last_fetch >> ((addr & 2) * 8)) as u16
        }
    }

    pub(crate) fn latch(&mut self, fetched: u32) {
        self.last_fetch = fetched;
    }

    /// Back to the state left right after the firmware hands over.
    pub(crate) fn handed_over(&mut self) {
        self.last_fetch = POST_BOOT_FETCH;
        self.waiting = false;
    }
}

impl Default for Bios {
    fn default() -> Self {
        Self::builtin()
    }
}

/// Service firmware call `number`, issued by the SWI at `swi_addr`.
pub(crate) fn call(cpu: &mut Cpu, bus: &mut Bus, number: u8, swi_addr: u32) {
    debug!("SWI {number:02X} from {swi_addr:08X}");
    let [r0, r1, r2, r3] = [0, 1, 2, 3].map(|i| cpu.reg(i));
    match number {
        0x00 => soft_reset(cpu, bus),
        0x01 => register_ram_reset(bus, r0),
        0x02 | 0x03 => bus.halted = true,
        0x04 => intr_wait(cpu, bus, r0 != 0, r1 as u16, swi_addr),
        0x05 => {
            cpu.set_reg(0, 1);
            cpu.set_reg(1, 1);
            intr_wait(cpu, bus, true, 1, swi_addr);
        }
        0x06 => div(cpu, r0 as i32, r1 as i32),
        0x07 => div(cpu, r1 as i32, r0 as i32),
        0x08 => cpu.set_reg(0, r0.isqrt()),
        0x09 => {
            let (angle, a, b) = arctan(r0 as i32);
            cpu.set_reg(0, angle as u32);
            cpu.set_reg(1, a as u32);
            cpu.set_reg(3, b as u32);
        }
        0x0A => cpu.set_reg(0, arctan2(r0 as i32, r1 as i32) as u32),
        0x0B => cpu_set(bus, r0, r1, r2),
        0x0C => cpu_fast_set(bus, r0, r1, r2),
        0x0D => cpu.set_reg(0, CHECKSUM),
        0x0E => bg_affine_set(bus, r0, r1, r2),
        0x0F => obj_affine_set(bus, r0, r1, r2, r3),
        0x10 => bit_unpack(bus, r0, r1, r2),
        0x11 => {
            let out = lz77(bus, r0);
            store_bytes(bus, r1, &out);
        }
        0x12 => {
            let out = lz77(bus, r0);
            store_halves(bus, r1, &out);
        }
        0x13 => huffman(bus, r0, r1),
        0x14 => {
            let out = run_length(bus, r0);
            store_bytes(bus, r1, &out);
        }
        0x15 => {
            let out = run_length(bus, r0);
            store_halves(bus, r1, &out);
        }
        0x16 => {
            let out = unfilter8(bus, r0);
            store_bytes(bus, r1, &out);
        }
        0x17 => {
            let out = unfilter8(bus, r0);
            store_halves(bus, r1, &out);
        }
        0x18 => unfilter16(bus, r0, r1),
        0x19 => sound_bias(bus, r0 != 0),
        0x1F => {
            let freq = midi_key_to_freq(bus, r0, r1, r2);
            cpu.set_reg(0, freq);
        }
        _ => warn!("unhandled firmware call {number:#04x} at {swi_addr:#010x}"),
    }
}

fn soft_reset(cpu: &mut Cpu, bus: &mut Bus) {
    let entry = if bus.read8(SOFT_RESET_FLAG, Access::NonSeq) != 0 {
        0x0200_0000
    } else {
        0x0800_0000
    };
    bus.iwram[0x7E00..].fill(0);
    bus.bios.handed_over();
    cpu.boot(entry);
    cpu.set_pc(entry);
}

fn register_ram_reset(bus: &mut Bus, flags: u32) {
    if flags & 0x01 != 0 {
        bus.ewram.fill(0);
    }
    if flags & 0x02 != 0 {
        bus.iwram[..0x7E00].fill(0);
    }
    if flags & 0x04 != 0 {
        bus.ppu.palette.fill(0);
    }
    if flags & 0x08 != 0 {
        bus.ppu.vram.fill(0);
    }
    if flags & 0x10 != 0 {
        bus.ppu.oam.fill(0);
    }
    let clear = |bus: &mut Bus, range: std::ops::Range<u32>| {
        for offset in range.step_by(2) {
            bus.write16(0x0400_0000 + offset, 0, Access::Seq);
        }
    };
    if flags & 0x20 != 0 {
        clear(bus, 0x120..0x130);
        bus.write16(0x0400_0134, 0x8000, Access::Seq);
        clear(bus, 0x140..0x15C);
    }
    if flags & 0x40 != 0 {
        clear(bus, 0x060..0x0A8);
        bus.write16(0x0400_0088, 0x0200, Access::Seq);
    }
    if flags & 0x80 != 0 {
        clear(bus, 0x000..0x060);
        clear(bus, 0x0B0..0x0E0);
        clear(bus, 0x100..0x110);
        clear(bus, 0x200..0x20A);
        bus.write16(0x0400_0000, 0x0080, Access::Seq);
    }
}

fn intr_wait(cpu: &mut Cpu, bus: &mut Bus, discard: bool, mask: u16, swi_addr: u32) {
    let flags = bus.read16(BIOS_IF, Access::NonSeq);
    if discard && !bus.bios.waiting {
        bus.write16(BIOS_IF, flags & !mask, Access::NonSeq);
    } else if flags & mask != 0 {
        bus.write16(BIOS_IF, flags & !mask, Access::NonSeq);
        bus.bios.waiting = false;
        return;
    }
    bus.irq.master_enable = true;
    bus.halted = true;
    bus.bios.waiting = true;
    cpu.set_pc(swi_addr);
}

fn div(cpu: &mut Cpu, num: i32, den: i32) {
    if den == 0 {
        warn!("firmware division by zero");
        cpu.set_reg(0, if num < 0 { -1i32 as u32 } else { 1 });
        cpu.set_reg(1, num as u32);
        cpu.set_reg(3, 1);
        return;
    }
    let quot = num.wrapping_div(den);
    cpu.set_reg(0, quot as u32);
    cpu.set_reg(1, num.wrapping_rem(den) as u32);
    cpu.set_reg(3, quot.unsigned_abs());
}

/// Polynomial arctangent of a 1.14 tangent, as the firmware evaluates it.
/// Returns the angle plus the two intermediates left in r1 and r3.
fn arctan(tan: i32) -> (i32, i32, i32) {
    let a = -(tan.wrapping_mul(tan) >> 14);
    let mut b = ((0xA9 * a) >> 14) + 0x390;
    for c in [0x91C, 0xFB6, 0x16AA, 0x2081, 0x3651, 0xA2F9] {
        b = (b.wrapping_mul(a) >> 14) + c;
    }
    (tan.wrapping_mul(b) >> 16, a, b)
}

/// Full-circle angle of (x, y), 0x0000-0xFFFF.
fn arctan2(x: i32, y: i32) -> u16 {
    let at = |num: i64, den: i64| arctan(((num << 14) / den) as i32).0;
    let (x, y) = (i64::from(x), i64::from(y));
    let angle = if y == 0 {
        if x >= 0 { 0 } else { 0x8000 }
    } else if x == 0 {
        if y >= 0 { 0x4000 } else { 0xC000 }
    } else if y >= 0 {
        if x >= 0 && x >= y {
            at(y, x)
        } else if x < 0 && -x >= y {
            at(y, x) + 0x8000
        } else {
            0x4000 - at(x, y)
        }
    } else if x <= 0 && -x > -y {
        at(y, x) + 0x8000
    } else if x > 0 && x >= -y {
        at(y, x) + 0x10000
    } else {
        0xC000 - at(x, y)
    };
    angle as u16
}

fn cpu_set(bus: &mut Bus, mut src: u32, mut dst: u32, control: u32) {
    let count = control & 0x1F_FFFF;
    let fill = control & (1 << 24) != 0;
    if control & (1 << 26) != 0 {
        src &= !3;
        dst &= !3;
        let fixed = bus.read32(src, Access::NonSeq);
        for _ in 0..count {
            let v = if fill { fixed } else { bus.read32(src, Access::Seq) };
            bus.write32(dst, v, Access::Seq);
            if !fill {
                src = src.wrapping_add(4);
            }
            dst = dst.wrapping_add(4);
        }
    } else {
        src &= !1;
        dst &= !1;
        let fixed = bus.read16(src, Access::NonSeq);
        for _ in 0..count {
            let v = if fill { fixed } else { bus.read16(src, Access::Seq) };
            bus.write16(dst, v, Access::Seq);
            if !fill {
                src = src.wrapping_add(2);
            }
            dst = dst.wrapping_add(2);
        }
    }
}

fn cpu_fast_set(bus: &mut Bus, src: u32, dst: u32, control: u32) {
    let words = (control & 0x1F_FFFF).div_ceil(8) * 8;
    cpu_set(bus, src, dst, words | (control & (1 << 24)) | (1 << 26));
}

fn fixed(v: f64) -> i32 {
    (v * 256.0) as i32
}

fn bg_affine_set(bus: &mut Bus, mut src: u32, mut dst: u32, count: u32) {
    for _ in 0..count {
        let ox = bus.read32(src, Access::NonSeq) as i32 as f64 / 256.0;
        let oy = bus.read32(src.wrapping_add(4), Access::Seq) as i32 as f64 / 256.0;
        let cx = bus.read16(src.wrapping_add(8), Access::Seq) as i16 as f64;
        let cy = bus.read16(src.wrapping_add(10), Access::Seq) as i16 as f64;
        let sx = bus.read16(src.wrapping_add(12), Access::Seq) as i16 as f64 / 256.0;
        let sy = bus.read16(src.wrapping_add(14), Access::Seq) as i16 as f64 / 256.0;
        let theta = (bus.read16(src.wrapping_add(16), Access::Seq) >> 8) as f64 / 128.0 * PI;
        src = src.wrapping_add(20);

        let (sin, cos) = theta.sin_cos();
        let pa = cos * sx;
        let pb = -sin * sx;
        let pc = sin * sy;
        let pd = cos * sy;
        let rx = ox - (pa * cx + pb * cy);
        let ry = oy - (pc * cx + pd * cy);

        bus.write16(dst, fixed(pa) as u16, Access::NonSeq);
        bus.write16(dst.wrapping_add(2), fixed(pb) as u16, Access::Seq);
        bus.write16(dst.wrapping_add(4), fixed(pc) as u16, Access::Seq);
        bus.write16(dst.wrapping_add(6), fixed(pd) as u16, Access::Seq);
        bus.write32(dst.wrapping_add(8), fixed(rx) as u32, Access::Seq);
        bus.write32(dst.wrapping_add(12), fixed(ry) as u32, Access::Seq);
        dst = dst.wrapping_add(16);
    }
}

fn obj_affine_set(bus: &mut Bus, mut src: u32, mut dst: u32, count: u32, stride: u32) {
    for _ in 0..count {
        let sx = bus.read16(src, Access::NonSeq) as i16 as f64 / 256.0;
        let sy = bus.read16(src.wrapping_add(2), Access::Seq) as i16 as f64 / 256.0;
        let theta = (bus.read16(src.wrapping_add(4), Access::Seq) >> 8) as f64 / 128.0 * PI;
        src = src.wrapping_add(8);

        let (sin, cos) = theta.sin_cos();
        for v in [cos * sx, -sin * sx, sin * sy, cos * sy] {
            bus.write16(dst, fixed(v) as u16, Access::NonSeq);
            dst = dst.wrapping_add(stride);
        }
    }
}

fn bit_unpack(bus: &mut Bus, src: u32, mut dst: u32, info: u32) {
    let len = bus.read16(info, Access::NonSeq) as u32;
    let src_width = bus.read8(info.wrapping_add(2), Access::Seq) as u32;
    let dst_width = bus.read8(info.wrapping_add(3), Access::Seq) as u32;
    let offset = bus.read32(info.wrapping_add(4), Access::Seq);
    let zero_too = offset & 0x8000_0000 != 0;
    let offset = offset & 0x7FFF_FFFF;
    if !matches!(src_width, 1 | 2 | 4 | 8) || !matches!(dst_width, 1 | 2 | 4 | 8 | 16 | 32) {
        warn!("BitUnPack with unsupported widths {src_width}->{dst_width}");
        return;
    }

    let mask = (1u32 << src_width) - 1;
    let mut out = 0u64;
    let mut filled = 0;
    for i in 0..len {
        let byte = bus.read8(src.wrapping_add(i), Access::Seq) as u32;
        for shift in (0..8).step_by(src_width as usize) {
            let mut v = (byte >> shift) & mask;
            if v != 0 || zero_too {
                v = v.wrapping_add(offset);
            }
            out |= (v as u64 & ((1u64 << dst_width) - 1)) << filled;
            filled += dst_width;
            if filled >= 32 {
                bus.write32(dst, out as u32, Access::Seq);
                dst = dst.wrapping_add(4);
                out = 0;
                filled = 0;
            }
        }
    }
}

/// Reads a compression header and returns (type nibble, decompressed size).
fn header(bus: &mut Bus, src: u32) -> (u32, usize) {
    let word = bus.read32(src, Access::NonSeq);
    ((word >> 4) & 0xF, (word >> 8) as usize)
}

fn lz77(bus: &mut Bus, src: u32) -> Vec<u8> {
    let (_, size) = header(bus, src);
    let mut out = Vec::with_capacity(size);
    let mut at = src.wrapping_add(4);
    let mut next = |bus: &mut Bus| {
        let b = bus.read8(at, Access::Seq);
        at = at.wrapping_add(1);
        b
    };
    while out.len() < size {
        let flags = next(bus);
        for bit in (0..8).rev() {
            if out.len() >= size {
                break;
            }
            if flags & (1 << bit) == 0 {
                out.push(next(bus));
                continue;
            }
            let hi = next(bus) as usize;
            let lo = next(bus) as usize;
            let len = (hi >> 4) + 3;
            let disp = ((hi & 0xF) << 8 | lo) + 1;
            for _ in 0..len {
                if out.len() >= size {
                    break;
                }
                let b = out.len().checked_sub(disp).map_or(0, |i| out[i]);
                out.push(b);
            }
        }
    }
    out
}

fn huffman(bus: &mut Bus, src: u32, mut dst: u32) {
    let (bits, size) = header(bus, src);
    if bits != 4 && bits != 8 {
        warn!("HuffUnComp with {bits}-bit data");
        return;
    }
    let tree_size = (bus.read8(src.wrapping_add(4), Access::Seq) as u32 + 1) * 2;
    let root = src.wrapping_add(5);
    let mut data = src.wrapping_add(4 + tree_size);

    let mut written = 0usize;
    let mut out = 0u32;
    let mut filled = 0;
    let mut node_addr = root;
    let mut node = bus.read8(root, Access::Seq);
    while written < size {
        let word = bus.read32(data, Access::Seq);
        data = data.wrapping_add(4);
        for bit in (0..32).rev() {
            let child = (node_addr & !1).wrapping_add((node as u32 & 0x3F) * 2 + 2);
            let (child, leaf) = if word & (1 << bit) == 0 {
                (child, node & 0x80 != 0)
            } else {
                (child.wrapping_add(1), node & 0x40 != 0)
            };
            if !leaf {
                node_addr = child;
                node = bus.read8(child, Access::Seq);
                continue;
            }
            let value = bus.read8(child, Access::Seq) as u32 & ((1 << bits) - 1);
            out |= value << filled;
            filled += bits;
            node_addr = root;
            node = bus.read8(root, Access::Seq);
            if filled == 32 {
                bus.write32(dst, out, Access::Seq);
                dst = dst.wrapping_add(4);
                written += 4;
                out = 0;
                filled = 0;
                if written >= size {
                    return;
                }
            }
        }
    }
}

fn run_length(bus: &mut Bus, src: u32) -> Vec<u8> {
    let (_, size) = header(bus, src);
    let mut out = Vec::with_capacity(size);
    let mut at = src.wrapping_add(4);
    while out.len() < size {
        let flag = bus.read8(at, Access::Seq);
        at = at.wrapping_add(1);
        if flag & 0x80 != 0 {
            let len = (flag & 0x7F) as usize + 3;
            let b = bus.read8(at, Access::Seq);
            at = at.wrapping_add(1);
            out.extend(std::iter::repeat_n(b, len));
        } else {
            for _ in 0..=flag {
                out.push(bus.read8(at, Access::Seq));
                at = at.wrapping_add(1);
            }
        }
    }
    out.truncate(size);
    out
}

fn unfilter8(bus: &mut Bus, src: u32) -> Vec<u8> {
    let (_, size) = header(bus, src);
    let mut out = Vec::with_capacity(size);
    let mut acc = 0u8;
    for i in 0..size as u32 {
        acc = acc.wrapping_add(bus.read8(src.wrapping_add(4 + i), Access::Seq));
        out.push(acc);
    }
    out
}

fn unfilter16(bus: &mut Bus, src: u32, dst: u32) {
    let (_, size) = header(bus, src);
    let mut acc = 0u16;
    for i in (0..size as u32).step_by(2) {
        acc = acc.wrapping_add(bus.read16(src.wrapping_add(4 + i), Access::Seq));
        bus.write16(dst.wrapping_add(i), acc, Access::Seq);
    }
}

fn store_bytes(bus: &mut Bus, dst: u32, data: &[u8]) {
    for (i, &b) in data.iter().enumerate() {
        bus.write8(dst.wrapping_add(i as u32), b, Access::Seq);
    }
}

/// VRAM variants only issue halfword stores.
fn store_halves(bus: &mut Bus, dst: u32, data: &[u8]) {
    for (i, pair) in data.chunks(2).enumerate() {
        let v = u16::from_le_bytes([pair[0], pair.get(1).copied().unwrap_or(0)]);
        bus.write16(dst.wrapping_add(i as u32 * 2), v, Access::Seq);
    }
}

fn sound_bias(bus: &mut Bus, raise: bool) {
    let current = bus.read16(0x0400_0088, Access::NonSeq);
    let level = if raise { 0x200 } else { 0 };
    bus.write16(0x0400_0088, (current & !0x3FE) | level, Access::NonSeq);
}

fn midi_key_to_freq(bus: &mut Bus, wave: u32, key: u32, fine: u32) -> u32 {
    let base = bus.read32(wave.wrapping_add(4), Access::NonSeq) as f64;
    let exponent = (180.0 - key as f64 - fine as f64 / 256.0) / 12.0;
    (base / 2f64.powf(exponent)) as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cartridge::{test_rom, Cartridge};
    use crate::cpu::arm::{self, ArmInstruction};

    fn setup() -> (Cpu, Bus) {
        let cart = Cartridge::new(test_rom(0x400)).unwrap();
        let bus = Bus::new(cart, Bios::builtin());
        let mut cpu = Cpu::new();
        cpu.boot(0x0800_0000);
        (cpu, bus)
    }

    #[test]
    fn builtin_vectors_reach_routines() {
        let bios = Bios::builtin();
        let word = |at: u32| {
            u32::from(bios.read16(at, true)) | u32::from(bios.read16(at + 2, true)) << 16
        };
        match arm::decode(word(0x00)).insn {
            ArmInstruction::Branch { link: false, offset } => {
                assert_eq!((8 + offset) as u32, RESET_ROUTINE)
            }
            other => panic!("reset vector decoded as {other:?}"),
        }
        match arm::decode(word(0x18)).insn {
            ArmInstruction::Branch { link: false, offset } => {
                assert_eq!((0x18 + 8 + offset) as u32, IRQ_ROUTINE)
            }
            other => panic!("irq vector decoded as {other:?}"),
        }
    }

    #[test]
    fn rejects_wrong_sized_images() {
        assert_eq!(
            Bios::new(vec![0; 100]).unwrap_err(),
            BiosError::BadSize { len: 100 }
        );
        assert!(!Bios::new(vec![0; BIOS_SIZE]).unwrap().is_builtin());
    }

    #[test]
    fn protected_reads_see_last_fetch() {
        let mut bios = Bios::builtin();
        assert_eq!(bios.read16(0, false), 0xF000);
        assert_eq!(bios.read16(2, false), 0xE129);
        bios.latch(0x1234_5678);
        assert_eq!(bios.read16(0x100, false), 0x5678);
    }

    #[test]
    fn division() {
        let (mut cpu, mut bus) = setup();
        cpu.set_reg(0, -7i32 as u32);
        cpu.set_reg(1, 2);
        call(&mut cpu, &mut bus, 0x06, 0x0800_0000);
        assert_eq!(cpu.reg(0) as i32, -3);
        assert_eq!(cpu.reg(1) as i32, -1);
        assert_eq!(cpu.reg(3), 3);

        cpu.set_reg(0, 2);
        cpu.set_reg(1, 9);
        call(&mut cpu, &mut bus, 0x07, 0x0800_0000);
        assert_eq!(cpu.reg(0), 4);
        assert_eq!(cpu.reg(1), 1);
    }

    #[test]
    fn division_by_zero_is_defined() {
        let (mut cpu, mut bus) = setup();
        cpu.set_reg(0, -5i32 as u32);
        cpu.set_reg(1, 0);
        call(&mut cpu, &mut bus, 0x06, 0x0800_0000);
        assert_eq!(cpu.reg(0) as i32, -1);
        assert_eq!(cpu.reg(1) as i32, -5);
        assert_eq!(cpu.reg(3), 1);
    }

    #[test]
    fn square_root_and_checksum() {
        let (mut cpu, mut bus) = setup();
        cpu.set_reg(0, 1_000_000);
        call(&mut cpu, &mut bus, 0x08, 0x0800_0000);
        assert_eq!(cpu.reg(0), 1000);
        call(&mut cpu, &mut bus, 0x0D, 0x0800_0000);
        assert_eq!(cpu.reg(0), CHECKSUM);
    }

    #[test]
    fn arctan2_quadrants() {
        assert_eq!(arctan2(0x100, 0), 0);
        assert_eq!(arctan2(0, 0x100), 0x4000);
        assert_eq!(arctan2(-0x100, 0), 0x8000);
        assert_eq!(arctan2(0, -0x100), 0xC000);
        let diag = arctan2(0x100, 0x100);
        assert!((0x1F00..=0x2100).contains(&diag), "{diag:#x}");
    }

    #[test]
    fn arctan2_handles_most_negative_inputs() {
        let (mut cpu, mut bus) = setup();
        let mut angle = |x: u32, y: u32| {
            cpu.set_reg(0, x);
            cpu.set_reg(1, y);
            call(&mut cpu, &mut bus, 0x0A, 0x0800_0000);
            cpu.reg(0)
        };
        assert_eq!(angle(0x8000_0000, 0), 0x8000);
        assert_eq!(angle(0, 0x8000_0000), 0xC000);
        assert_eq!(angle(0x8000_0000, 0x8000_0000), 0xA000);
        assert_eq!(angle(1, 0x8000_0000), 0xC000);
    }

    #[test]
    fn routines_wrap_at_top_of_address_space() {
        let (mut cpu, mut bus) = setup();
        bus.write32(0x0300_0000, 0x5A5A_5A5A, Access::NonSeq);
        for number in [0x10, 0x11, 0x12, 0x14, 0x15, 0x16, 0x17, 0x18] {
            cpu.set_reg(0, 0xFFFF_FFFC);
            cpu.set_reg(1, 0x0300_0100);
            cpu.set_reg(2, 0xFFFF_FFFE);
            call(&mut cpu, &mut bus, number, 0x0800_0000);
        }
        cpu.set_reg(0, 0xFFFF_FFF0);
        cpu.set_reg(1, 0x0300_0100);
        cpu.set_reg(2, 1);
        cpu.set_reg(3, 2);
        call(&mut cpu, &mut bus, 0x0E, 0x0800_0000);
        call(&mut cpu, &mut bus, 0x0F, 0x0800_0000);
        assert_eq!(bus.read32(0x0300_0000, Access::NonSeq), 0x5A5A_5A5A);
    }

    #[test]
    fn vram_run_length_keeps_odd_tail() {
        let (mut cpu, mut bus) = setup();
        // Three literal bytes.
        let rl = [0x30, 3, 0, 0, 0x02, b'A', b'B', b'C'];
        for (i, &b) in rl.iter().enumerate() {
            bus.write8(0x0200_0000 + i as u32, b, Access::NonSeq);
        }
        bus.write16(0x0600_0002, 0xFFFF, Access::NonSeq);
        cpu.set_reg(0, 0x0200_0000);
        cpu.set_reg(1, 0x0600_0000);
        call(&mut cpu, &mut bus, 0x15, 0x0800_0000);
        assert_eq!(bus.read16(0x0600_0000, Access::NonSeq), 0x4241);
        assert_eq!(bus.read16(0x0600_0002, Access::NonSeq), 0x0043);
    }

    #[test]
    fn cpu_set_copies_and_fills() {
        let (mut cpu, mut bus) = setup();
        for i in 0..4u32 {
            bus.write32(0x0200_0000 + i * 4, 0x1111_1111 * (i + 1), Access::NonSeq);
        }
        cpu.set_reg(0, 0x0200_0000);
        cpu.set_reg(1, 0x0300_0000);
        cpu.set_reg(2, 4 | 1 << 26);
        call(&mut cpu, &mut bus, 0x0B, 0x0800_0000);
        assert_eq!(bus.read32(0x0300_000C, Access::NonSeq), 0x4444_4444);

        cpu.set_reg(2, 3 | 1 << 24);
        call(&mut cpu, &mut bus, 0x0B, 0x0800_0000);
        assert_eq!(bus.read16(0x0300_0004, Access::NonSeq), 0x1111);
        assert_eq!(bus.read16(0x0300_0006, Access::NonSeq), 0x2222);
    }

    #[test]
    fn lz77_and_run_length() {
        let (_, mut bus) = setup();
        // "ABABABAB": two literals then a back reference of 6 at distance 2.
        let lz = [0x10, 8, 0, 0, 0x20, b'A', b'B', 0x30, 0x01];
        for (i, &b) in lz.iter().enumerate() {
            bus.write8(0x0200_0000 + i as u32, b, Access::NonSeq);
        }
        assert_eq!(lz77(&mut bus, 0x0200_0000), b"ABABABAB");

        let rl = [0x30, 6, 0, 0, 0x81, b'x', 0x00, b'y', 0x80, b'z'];
        for (i, &b) in rl.iter().enumerate() {
            bus.write8(0x0200_0100 + i as u32, b, Access::NonSeq);
        }
        assert_eq!(run_length(&mut bus, 0x0200_0100), b"xxxxyz");
    }

    #[test]
    fn diff_filters() {
        let (_, mut bus) = setup();
        let data = [0x80, 4, 0, 0, 1, 1, 1, 0xFF];
        for (i, &b) in data.iter().enumerate() {
            bus.write8(0x0200_0000 + i as u32, b, Access::NonSeq);
        }
        assert_eq!(unfilter8(&mut bus, 0x0200_0000), [1, 2, 3, 2]);
    }

    #[test]
    fn bit_unpack_expands_with_offset() {
        let (_, mut bus) = setup();
        bus.write8(0x0200_0000, 0b1101_0010, Access::NonSeq);
        bus.write16(0x0200_0010, 1, Access::NonSeq);
        bus.write8(0x0200_0012, 2, Access::NonSeq);
        bus.write8(0x0200_0013, 8, Access::NonSeq);
        bus.write32(0x0200_0014, 0x10, Access::NonSeq);
        bit_unpack(&mut bus, 0x0200_0000, 0x0300_0000, 0x0200_0010);
        assert_eq!(bus.read32(0x0300_0000, Access::NonSeq), 0x13_11_00_12);
    }

    #[test]
    fn vblank_intr_wait_parks_until_flagged() {
        let (mut cpu, mut bus) = setup();
        call(&mut cpu, &mut bus, 0x05, 0x0800_0100);
        assert!(bus.halted);
        assert!(bus.irq.master_enable);
        assert_eq!(cpu.pc(), 0x0800_0100);

        // The user handler acknowledges into the firmware copy of IF.
        bus.halted = false;
        bus.write16(BIOS_IF, 1, Access::NonSeq);
        call(&mut cpu, &mut bus, 0x05, 0x0800_0100);
        assert!(!bus.halted);
        assert_eq!(bus.read16(BIOS_IF, Access::NonSeq), 0);
    }

    #[test]
    fn soft_reset_boots_cartridge() {
        let (mut cpu, mut bus) = setup();
        bus.write32(0x0300_7E00, 0xFFFF_FFFF, Access::NonSeq);
        cpu.set_reg(5, 99);
        call(&mut cpu, &mut bus, 0x00, 0x0800_0000);
        assert_eq!(cpu.pc(), 0x0800_0000);
        assert_eq!(cpu.reg(5), 0);
        assert_eq!(bus.read32(0x0300_7E00, Access::NonSeq), 0);
    }
}
