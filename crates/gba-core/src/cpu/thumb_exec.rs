use log::debug;

use super::alu::{self, ShiftType};
use super::arm::HalfwordKind;
use super::arm_exec::{load_half, read_rotated};
use super::thumb::{AluOp, HiRegOp, ImmOp, MoveShiftOp, SignedOp, ThumbInstruction};
use super::{Cpu, EmuError, Exception};
use crate::bios;
use crate::bus::{Access, Bus};

impl Cpu {
    pub(super) fn execute_thumb(
        &mut self,
        bus: &mut Bus,
        insn: ThumbInstruction,
        pc: u32,
    ) -> Result<(), EmuError> {
        use ThumbInstruction::*;

        let r = |cpu: &Cpu, idx: u8| cpu.regs.r[idx as usize];

        match insn {
            MoveShifted { op, offset, rs, rd } => {
                let kind = match op {
                    MoveShiftOp::Lsl => ShiftType::Lsl,
                    MoveShiftOp::Lsr => ShiftType::Lsr,
                    MoveShiftOp::Asr => ShiftType::Asr,
                };
                let (result, carry) =
                    alu::shift_imm(kind, r(self, rs), offset as u32, self.cpsr.c());
                self.regs.r[rd as usize] = result;
                self.cpsr.set_nz(result);
                self.cpsr.set_c(carry);
            }
            AddSub {
                sub,
                imm,
                operand,
                rs,
                rd,
            } => {
                let b = if imm { operand as u32 } else { r(self, operand) };
                let a = r(self, rs);
                let f = if sub {
                    alu::sub(a, b, true)
                } else {
                    alu::add(a, b, false)
                };
                self.regs.r[rd as usize] = f.result;
                self.set_arith_flags(f);
            }
            Immediate { op, rd, imm } => {
                let a = r(self, rd);
                let b = imm as u32;
                match op {
                    ImmOp::Mov => {
                        self.regs.r[rd as usize] = b;
                        self.cpsr.set_nz(b);
                    }
                    ImmOp::Cmp => self.set_arith_flags(alu::sub(a, b, true)),
                    ImmOp::Add => {
                        let f = alu::add(a, b, false);
                        self.regs.r[rd as usize] = f.result;
                        self.set_arith_flags(f);
                    }
                    ImmOp::Sub => {
                        let f = alu::sub(a, b, true);
                        self.regs.r[rd as usize] = f.result;
                        self.set_arith_flags(f);
                    }
                }
            }
            Alu { op, rs, rd } => self.thumb_alu(bus, op, rs, rd),
            HiReg { op, rs, rd } => {
                let a = r(self, rd);
                let b = r(self, rs);
                match op {
                    HiRegOp::Add => self.write_reg(rd, a.wrapping_add(b)),
                    HiRegOp::Cmp => self.set_arith_flags(alu::sub(a, b, true)),
                    HiRegOp::Mov => self.write_reg(rd, b),
                }
            }
            BranchExchange { rs } => {
                let target = r(self, rs);
                self.cpsr.set_thumb(target & 1 != 0);
                self.set_pc(target);
            }
            PcLoad { rd, word } => {
                let addr = (self.regs.r[15] & !2).wrapping_add(word as u32 * 4);
                let value = bus.read32(addr, Access::NonSeq);
                bus.idle(1);
                self.regs.r[rd as usize] = value;
            }
            LoadStoreReg {
                load,
                byte,
                ro,
                rb,
                rd,
            } => {
                let addr = r(self, rb).wrapping_add(r(self, ro));
                self.thumb_transfer(bus, addr, load, byte, rd);
            }
            LoadStoreSigned { op, ro, rb, rd } => {
                let addr = r(self, rb).wrapping_add(r(self, ro));
                let kind = match op {
                    SignedOp::Strh => {
                        bus.write16(addr, r(self, rd) as u16, Access::NonSeq);
                        return Ok(());
                    }
                    SignedOp::Ldrh => HalfwordKind::Unsigned,
                    SignedOp::Ldsb => HalfwordKind::SignedByte,
                    SignedOp::Ldsh => HalfwordKind::SignedHalf,
                };
                let value = load_half(bus, addr, kind);
                bus.idle(1);
                self.regs.r[rd as usize] = value;
            }
            LoadStoreImm {
                load,
                byte,
                offset,
                rb,
                rd,
            } => {
                let scale = if byte { 1 } else { 4 };
                let addr = r(self, rb).wrapping_add(offset as u32 * scale);
                self.thumb_transfer(bus, addr, load, byte, rd);
            }
            LoadStoreHalf {
                load,
                offset,
                rb,
                rd,
            } => {
                let addr = r(self, rb).wrapping_add(offset as u32 * 2);
                if load {
                    let value = load_half(bus, addr, HalfwordKind::Unsigned);
                    bus.idle(1);
                    self.regs.r[rd as usize] = value;
                } else {
                    bus.write16(addr, r(self, rd) as u16, Access::NonSeq);
                }
            }
            SpLoadStore { load, rd, word } => {
                let addr = self.regs.r[13].wrapping_add(word as u32 * 4);
                self.thumb_transfer(bus, addr, load, false, rd);
            }
            LoadAddress { sp, rd, word } => {
                let base = if sp {
                    self.regs.r[13]
                } else {
                    self.regs.r[15] & !2
                };
                self.regs.r[rd as usize] = base.wrapping_add(word as u32 * 4);
            }
            AddSp { negative, word } => {
                let delta = word as u32 * 4;
                self.regs.r[13] = if negative {
                    self.regs.r[13].wrapping_sub(delta)
                } else {
                    self.regs.r[13].wrapping_add(delta)
                };
            }
            PushPop { pop, pc_lr, list } => self.push_pop(bus, pop, pc_lr, list),
            MultipleLoadStore { load, rb, list } => self.thumb_block(bus, load, rb, list),
            CondBranch { cond, offset } => {
                if self.condition(cond) {
                    let target = self.regs.r[15].wrapping_add((offset as i32 * 2) as u32);
                    self.set_pc(target);
                }
            }
            SoftwareInterrupt { comment } => {
                if bus.bios.is_builtin() {
                    bios::call(self, bus, comment, pc);
                } else {
                    self.enter_exception(Exception::SoftwareInterrupt, pc.wrapping_add(2));
                }
            }
            Branch { offset } => {
                let target = self.regs.r[15].wrapping_add((offset as i32 * 2) as u32);
                self.set_pc(target);
            }
            LongBranch { high, offset } => {
                if high {
                    let target = self.regs.r[14].wrapping_add(offset as u32 * 2);
                    self.regs.r[14] = pc.wrapping_add(2) | 1;
                    self.set_pc(target);
                } else {
                    let upper = (((offset as u32) << 21) as i32 >> 9) as u32;
                    self.regs.r[14] = self.regs.r[15].wrapping_add(upper);
                }
            }
            Undefined { raw } => {
                debug!("undefined thumb instruction {raw:04X} at {pc:08X}");
                self.enter_exception(Exception::Undefined, pc.wrapping_add(2));
            }
            Unimplemented { raw } => {
                return Err(EmuError::Unimplemented {
                    addr: pc,
                    opcode: raw as u32,
                    thumb: true,
                });
            }
        }
        Ok(())
    }

    fn set_arith_flags(&mut self, f: alu::Flags) {
        self.cpsr.set_nz(f.result);
        self.cpsr.set_c(f.carry);
        self.cpsr.set_v(f.overflow);
    }

    fn thumb_alu(&mut self, bus: &mut Bus, op: AluOp, rs: u8, rd: u8) {
        let a = self.regs.r[rd as usize];
        let b = self.regs.r[rs as usize];
        let carry = self.cpsr.c();

        let (result, write) = match op {
            AluOp::And => (a & b, true),
            AluOp::Eor => (a ^ b, true),
            AluOp::Orr => (a | b, true),
            AluOp::Bic => (a & !b, true),
            AluOp::Mvn => (!b, true),
            AluOp::Tst => (a & b, false),
            AluOp::Mul => {
                bus.idle(alu::multiply_cycles(a, true));
                (a.wrapping_mul(b), true)
            }
            AluOp::Lsl | AluOp::Lsr | AluOp::Asr | AluOp::Ror => {
                let kind = match op {
                    AluOp::Lsl => ShiftType::Lsl,
                    AluOp::Lsr => ShiftType::Lsr,
                    AluOp::Asr => ShiftType::Asr,
                    _ => ShiftType::Ror,
                };
                bus.idle(1);
                let (v, c) = alu::shift_reg(kind, a, b & 0xFF, carry);
                self.cpsr.set_c(c);
                (v, true)
            }
            AluOp::Adc | AluOp::Sbc | AluOp::Neg | AluOp::Cmp | AluOp::Cmn => {
                let f = match op {
                    AluOp::Adc => alu::add(a, b, carry),
                    AluOp::Sbc => alu::sub(a, b, carry),
                    AluOp::Neg => alu::sub(0, b, true),
                    AluOp::Cmp => alu::sub(a, b, true),
                    _ => alu::add(a, b, false),
                };
                self.set_arith_flags(f);
                let write = !matches!(op, AluOp::Cmp | AluOp::Cmn);
                if write {
                    self.regs.r[rd as usize] = f.result;
                }
                return;
            }
        };
        self.cpsr.set_nz(result);
        if write {
            self.regs.r[rd as usize] = result;
        }
    }

    fn thumb_transfer(&mut self, bus: &mut Bus, addr: u32, load: bool, byte: bool, rd: u8) {
        if load {
            let value = if byte {
                bus.read8(addr, Access::NonSeq) as u32
            } else {
                read_rotated(bus, addr, Access::NonSeq)
            };
            bus.idle(1);
            self.regs.r[rd as usize] = value;
        } else {
            let value = self.regs.r[rd as usize];
            if byte {
                bus.write8(addr, value as u8, Access::NonSeq);
            } else {
                bus.write32(addr, value, Access::NonSeq);
            }
        }
    }

    fn push_pop(&mut self, bus: &mut Bus, pop: bool, pc_lr: bool, list: u8) {
        let count = list.count_ones() + pc_lr as u32;
        let mut access = Access::NonSeq;
        if pop {
            let mut addr = self.regs.r[13];
            for i in 0..8usize {
                if list & (1 << i) != 0 {
                    self.regs.r[i] = bus.read32(addr, access);
                    addr = addr.wrapping_add(4);
                    access = Access::Seq;
                }
            }
            if pc_lr {
                let target = bus.read32(addr, access);
                addr = addr.wrapping_add(4);
                self.set_pc(target);
            }
            bus.idle(1);
            self.regs.r[13] = addr;
        } else {
            let start = self.regs.r[13].wrapping_sub(count * 4);
            let mut addr = start;
            for i in 0..8usize {
                if list & (1 << i) != 0 {
                    bus.write32(addr, self.regs.r[i], access);
                    addr = addr.wrapping_add(4);
                    access = Access::Seq;
                }
            }
            if pc_lr {
                bus.write32(addr, self.regs.r[14], access);
            }
            self.regs.r[13] = start;
        }
    }

    fn thumb_block(&mut self, bus: &mut Bus, load: bool, rb: u8, list: u8) {
        let base = self.regs.r[rb as usize];
        let rb = rb as usize;

        if list == 0 {
            // Empty list: r15 is transferred and the base moves by 16 words.
            if load {
                let target = bus.read32(base, Access::NonSeq);
                self.regs.r[rb] = base.wrapping_add(0x40);
                self.set_pc(target);
            } else {
                bus.write32(base, self.regs.r[15].wrapping_add(2), Access::NonSeq);
                self.regs.r[rb] = base.wrapping_add(0x40);
            }
            return;
        }

        let new_base = base.wrapping_add(list.count_ones() * 4);
        let first = list.trailing_zeros() as usize;
        let mut addr = base;
        let mut access = Access::NonSeq;
        if load {
            self.regs.r[rb] = new_base;
            for i in 0..8usize {
                if list & (1 << i) != 0 {
                    self.regs.r[i] = bus.read32(addr, access);
                    addr = addr.wrapping_add(4);
                    access = Access::Seq;
                }
            }
            bus.idle(1);
        } else {
            for i in 0..8usize {
                if list & (1 << i) != 0 {
                    let value = if i == rb && i != first {
                        new_base
                    } else {
                        self.regs.r[i]
                    };
                    bus.write32(addr, value, access);
                    addr = addr.wrapping_add(4);
                    access = Access::Seq;
                }
            }
            self.regs.r[rb] = new_base;
        }
    }
}
