use log::debug;

use super::alu::{self, Flags};
use super::arm::{
    ArmInstruction, DpOp, HalfwordKind, HalfwordOffset, Indexing, Operand2, PsrSource,
    ShiftAmount, TransferOffset,
};
use super::psr::{CONTROL_MASK, FLAGS_MASK};
use super::{Cpu, EmuError, Exception};
use crate::bios;
use crate::bus::{Access, Bus};

/// T is only changed by BX and exception return, never by MSR.
const STATE_BIT: u32 = 1 << 5;

impl Cpu {
    pub(super) fn execute_arm(
        &mut self,
        bus: &mut Bus,
        insn: ArmInstruction,
        pc: u32,
    ) -> Result<(), EmuError> {
        use ArmInstruction::*;

        match insn {
            DataProcessing {
                op,
                set_flags,
                rn,
                rd,
                op2,
            } => self.data_processing(bus, op, set_flags, rn, rd, op2),
            PsrRead { spsr, rd } => {
                let value = if spsr {
                    self.spsr().unwrap_or(self.cpsr).bits()
                } else {
                    self.cpsr.bits()
                };
                self.write_reg(rd, value);
            }
            PsrWrite { spsr, fields, src } => {
                let value = match src {
                    PsrSource::Reg(rm) => self.regs.r[rm as usize],
                    PsrSource::Imm { value, rotate } => {
                        (value as u32).rotate_right(rotate as u32 * 2)
                    }
                };
                self.psr_write(spsr, fields, value);
            }
            Multiply {
                accumulate,
                set_flags,
                rd,
                rn,
                rs,
                rm,
            } => {
                let rs_val = self.regs.r[rs as usize];
                let mut result = self.regs.r[rm as usize].wrapping_mul(rs_val);
                let mut internal = alu::multiply_cycles(rs_val, true);
                if accumulate {
                    result = result.wrapping_add(self.regs.r[rn as usize]);
                    internal += 1;
                }
                bus.idle(internal);
                self.write_reg(rd, result);
                if set_flags {
                    self.cpsr.set_nz(result);
                }
            }
            MultiplyLong {
                signed,
                accumulate,
                set_flags,
                rd_hi,
                rd_lo,
                rs,
                rm,
            } => {
                let a = self.regs.r[rm as usize];
                let b = self.regs.r[rs as usize];
                let mut result = if signed {
                    (a as i32 as i64).wrapping_mul(b as i32 as i64) as u64
                } else {
                    a as u64 * b as u64
                };
                let mut internal = alu::multiply_cycles(b, signed) + 1;
                if accumulate {
                    let acc = (self.regs.r[rd_hi as usize] as u64) << 32
                        | self.regs.r[rd_lo as usize] as u64;
                    result = result.wrapping_add(acc);
                    internal += 1;
                }
                bus.idle(internal);
                self.regs.r[rd_lo as usize] = result as u32;
                self.regs.r[rd_hi as usize] = (result >> 32) as u32;
                if set_flags {
                    self.cpsr.set_n(result >> 63 != 0);
                    self.cpsr.set_z(result == 0);
                }
            }
            Swap { byte, rn, rd, rm } => {
                let addr = self.regs.r[rn as usize];
                let src = self.regs.r[rm as usize];
                let old = if byte {
                    let old = bus.read8(addr, Access::NonSeq) as u32;
                    bus.write8(addr, src as u8, Access::NonSeq);
                    old
                } else {
                    let old = read_rotated(bus, addr, Access::NonSeq);
                    bus.write32(addr, src, Access::NonSeq);
                    old
                };
                bus.idle(1);
                self.write_reg(rd, old);
            }
            BranchExchange { rm } => {
                let target = self.regs.r[rm as usize];
                self.cpsr.set_thumb(target & 1 != 0);
                self.set_pc(target);
            }
            HalfwordTransfer {
                index,
                load,
                kind,
                rn,
                rd,
                offset,
            } => {
                let offset = match offset {
                    HalfwordOffset::Imm(n) => n as u32,
                    HalfwordOffset::Reg(rm) => self.regs.r[rm as usize],
                };
                self.halfword_transfer(bus, index, load, kind, rn, rd, offset);
            }
            SingleTransfer {
                index,
                load,
                byte,
                rn,
                rd,
                offset,
            } => {
                let offset = match offset {
                    TransferOffset::Imm(n) => n as u32,
                    TransferOffset::Reg { rm, shift, amount } => {
                        let value = self.regs.r[rm as usize];
                        alu::shift_imm(shift, value, amount as u32, self.cpsr.c()).0
                    }
                };
                self.single_transfer(bus, index, load, byte, rn, rd, offset);
            }
            BlockTransfer {
                index,
                load,
                user,
                rn,
                list,
            } => self.block_transfer(bus, index, load, user, rn, list),
            Branch { link, offset } => {
                if link {
                    self.regs.r[14] = pc.wrapping_add(4);
                }
                let target = pc.wrapping_add(8).wrapping_add(offset as u32);
                self.set_pc(target);
            }
            SoftwareInterrupt { comment } => {
                if bus.bios.is_builtin() {
                    bios::call(self, bus, (comment >> 16) as u8, pc);
                } else {
                    self.enter_exception(Exception::SoftwareInterrupt, pc.wrapping_add(4));
                }
            }
            Undefined { raw } => {
                debug!("undefined instruction {raw:08X} at {pc:08X}");
                self.enter_exception(Exception::Undefined, pc.wrapping_add(4));
            }
            Unimplemented { raw } => {
                return Err(EmuError::Unimplemented {
                    addr: pc,
                    opcode: raw,
                    thumb: false,
                });
            }
        }
        Ok(())
    }

    fn data_processing(
        &mut self,
        bus: &mut Bus,
        op: DpOp,
        set_flags: bool,
        rn: u8,
        rd: u8,
        op2: Operand2,
    ) {
        let carry = self.cpsr.c();
        // A register-specified shift delays the operand reads by one cycle, so
        // r15 reads 4 further ahead.
        let mut pc_ahead = 0;
        let (b, shifter_carry) = match op2 {
            Operand2::Imm { value, rotate } => {
                let v = (value as u32).rotate_right(rotate as u32 * 2);
                let c = if rotate == 0 { carry } else { v >> 31 != 0 };
                (v, c)
            }
            Operand2::Reg { rm, shift, amount } => match amount {
                ShiftAmount::Imm(n) => {
                    let v = self.regs.r[rm as usize];
                    alu::shift_imm(shift, v, n as u32, carry)
                }
                ShiftAmount::Reg(rs) => {
                    bus.idle(1);
                    pc_ahead = 4;
                    let amount = self.regs.r[rs as usize] & 0xFF;
                    let v = self.regs.r[rm as usize].wrapping_add(if rm == 15 { 4 } else { 0 });
                    alu::shift_reg(shift, v, amount, carry)
                }
            },
        };
        let a = self.regs.r[rn as usize].wrapping_add(if rn == 15 { pc_ahead } else { 0 });

        let (result, arith): (u32, Option<Flags>) = match op {
            DpOp::And | DpOp::Tst => (a & b, None),
            DpOp::Eor | DpOp::Teq => (a ^ b, None),
            DpOp::Orr => (a | b, None),
            DpOp::Mov => (b, None),
            DpOp::Bic => (a & !b, None),
            DpOp::Mvn => (!b, None),
            DpOp::Sub | DpOp::Cmp => arith(alu::sub(a, b, true)),
            DpOp::Rsb => arith(alu::sub(b, a, true)),
            DpOp::Add | DpOp::Cmn => arith(alu::add(a, b, false)),
            DpOp::Adc => arith(alu::add(a, b, carry)),
            DpOp::Sbc => arith(alu::sub(a, b, carry)),
            DpOp::Rsc => arith(alu::sub(b, a, carry)),
        };

        if set_flags {
            if rd == 15 && !op.is_test() {
                // Exception return.
                if let Some(spsr) = self.spsr() {
                    self.set_cpsr(spsr);
                }
            } else {
                self.cpsr.set_nz(result);
                match arith {
                    Some(f) => {
                        self.cpsr.set_c(f.carry);
                        self.cpsr.set_v(f.overflow);
                    }
                    None => self.cpsr.set_c(shifter_carry),
                }
            }
        }
        if !op.is_test() {
            self.write_reg(rd, result);
        }
    }

    fn psr_write(&mut self, spsr: bool, fields: u8, value: u32) {
        let mut mask = 0;
        if fields & 0b1000 != 0 {
            mask |= FLAGS_MASK;
        }
        if fields & 0b0001 != 0 {
            mask |= CONTROL_MASK;
        }

        let mode = self.cpsr.mode();
        if spsr {
            if let Some(mut psr) = self.regs.spsr(mode) {
                if psr.merge(value, mask) {
                    self.regs.set_spsr(mode, psr);
                }
            }
            return;
        }

        if !mode.is_privileged() {
            mask &= FLAGS_MASK;
        }
        mask &= !STATE_BIT;
        let mut psr = self.cpsr;
        if !psr.merge(value, mask) {
            debug!("MSR with reserved mode bits {value:08X}; control field ignored");
            psr.merge(value, mask & FLAGS_MASK);
        }
        self.set_cpsr(psr);
    }

    #[allow(clippy::too_many_arguments)]
    fn single_transfer(
        &mut self,
        bus: &mut Bus,
        index: Indexing,
        load: bool,
        byte: bool,
        rn: u8,
        rd: u8,
        offset: u32,
    ) {
        let base = self.regs.r[rn as usize];
        let moved = if index.up {
            base.wrapping_add(offset)
        } else {
            base.wrapping_sub(offset)
        };
        let addr = if index.pre { moved } else { base };
        let writeback = (!index.pre || index.writeback) && rn != 15;

        if load {
            let value = if byte {
                bus.read8(addr, Access::NonSeq) as u32
            } else {
                read_rotated(bus, addr, Access::NonSeq)
            };
            bus.idle(1);
            if writeback {
                self.regs.r[rn as usize] = moved;
            }
            self.write_reg(rd, value);
        } else {
            let value = self.store_value(rd);
            if byte {
                bus.write8(addr, value as u8, Access::NonSeq);
            } else {
                bus.write32(addr, value, Access::NonSeq);
            }
            if writeback {
                self.regs.r[rn as usize] = moved;
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn halfword_transfer(
        &mut self,
        bus: &mut Bus,
        index: Indexing,
        load: bool,
        kind: HalfwordKind,
        rn: u8,
        rd: u8,
        offset: u32,
    ) {
        let base = self.regs.r[rn as usize];
        let moved = if index.up {
            base.wrapping_add(offset)
        } else {
            base.wrapping_sub(offset)
        };
        let addr = if index.pre { moved } else { base };
        let writeback = (!index.pre || index.writeback) && rn != 15;

        if load {
            let value = load_half(bus, addr, kind);
            bus.idle(1);
            if writeback {
                self.regs.r[rn as usize] = moved;
            }
            self.write_reg(rd, value);
        } else {
            let value = self.store_value(rd);
            bus.write16(addr, value as u16, Access::NonSeq);
            if writeback {
                self.regs.r[rn as usize] = moved;
            }
        }
    }

    /// Stored r15 is the instruction address plus 12.
    #[inline]
    fn store_value(&self, rd: u8) -> u32 {
        if rd == 15 {
            self.regs.r[15].wrapping_add(4)
        } else {
            self.regs.r[rd as usize]
        }
    }

    fn block_transfer(
        &mut self,
        bus: &mut Bus,
        index: Indexing,
        load: bool,
        user: bool,
        rn: u8,
        list: u16,
    ) {
        let base = self.regs.r[rn as usize];
        // An empty list transfers r15 and moves the base by 16 words.
        let (list, count) = if list == 0 {
            (0x8000u16, 16u32)
        } else {
            (list, list.count_ones())
        };
        let span = count * 4;
        let (start, new_base) = match (index.pre, index.up) {
            (false, true) => (base, base.wrapping_add(span)),
            (true, true) => (base.wrapping_add(4), base.wrapping_add(span)),
            (false, false) => (base.wrapping_sub(span).wrapping_add(4), base.wrapping_sub(span)),
            (true, false) => (base.wrapping_sub(span), base.wrapping_sub(span)),
        };

        let mode = self.cpsr.mode();
        let restores_cpsr = user && load && list & 0x8000 != 0;
        let user_bank = user && !restores_cpsr;
        let mut addr = start;
        let mut access = Access::NonSeq;

        if load {
            if index.writeback {
                self.regs.r[rn as usize] = new_base;
            }
            let mut loaded_pc = None;
            for i in 0..16usize {
                if list & (1 << i) == 0 {
                    continue;
                }
                let value = bus.read32(addr, access);
                if i == 15 {
                    loaded_pc = Some(value);
                } else if user_bank {
                    self.regs.set_user(mode, i, value);
                } else {
                    self.regs.r[i] = value;
                }
                addr = addr.wrapping_add(4);
                access = Access::Seq;
            }
            bus.idle(1);
            if let Some(target) = loaded_pc {
                if restores_cpsr {
                    if let Some(spsr) = self.spsr() {
                        self.set_cpsr(spsr);
                    }
                }
                self.set_pc(target);
            }
        } else {
            let first = list.trailing_zeros() as usize;
            for i in 0..16usize {
                if list & (1 << i) == 0 {
                    continue;
                }
                let value = if i == 15 {
                    self.regs.r[15].wrapping_add(4)
                } else if i == rn as usize && index.writeback && i != first {
                    new_base
                } else if user_bank {
                    self.regs.user(mode, i)
                } else {
                    self.regs.r[i]
                };
                bus.write32(addr, value, access);
                addr = addr.wrapping_add(4);
                access = Access::Seq;
            }
            if index.writeback {
                self.regs.r[rn as usize] = new_base;
            }
        }
    }
}

#[inline]
fn arith(f: Flags) -> (u32, Option<Flags>) {
    (f.result, Some(f))
}

/// Word load with the ARM7 rotation for unaligned addresses.
pub(super) fn read_rotated(bus: &mut Bus, addr: u32, access: Access) -> u32 {
    bus.read32(addr, access).rotate_right((addr & 3) * 8)
}

/// LDRH/LDRSB/LDRSH including the unaligned forms.
pub(super) fn load_half(bus: &mut Bus, addr: u32, kind: HalfwordKind) -> u32 {
    match kind {
        HalfwordKind::Unsigned => {
            (bus.read16(addr, Access::NonSeq) as u32).rotate_right((addr & 1) * 8)
        }
        HalfwordKind::SignedByte => bus.read8(addr, Access::NonSeq) as i8 as i32 as u32,
        HalfwordKind::SignedHalf => {
            if addr & 1 != 0 {
                bus.read8(addr, Access::NonSeq) as i8 as i32 as u32
            } else {
                bus.read16(addr, Access::NonSeq) as i16 as i32 as u32
            }
        }
    }
}
