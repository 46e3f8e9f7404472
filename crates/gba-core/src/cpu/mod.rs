//! ARM7TDMI core.
//!
//! `regs.r[15]` holds the address of the next instruction between steps. While
//! an instruction executes it reads as that address plus 8 (ARM) or plus 4
//! (Thumb), which is what the pipeline exposes to programs.

pub mod alu;
pub mod arm;
mod arm_exec;
pub mod psr;
pub mod registers;
pub mod thumb;
mod thumb_exec;

use log::{error, trace};
use thiserror::Error;

use crate::bus::Bus;
use arm::Cond;
use psr::{Mode, Psr};
use registers::Registers;

#[cfg(feature = "cpu-trace")]
macro_rules! cpu_trace {
    ($($arg:tt)*) => {
        log::trace!($($arg)*);
    };
}
#[cfg(not(feature = "cpu-trace"))]
macro_rules! cpu_trace {
    ($($arg:tt)*) => {};
}

/// Stack tops the firmware sets up before handing over to the cartridge.
pub const SP_SVC: u32 = 0x0300_7FE0;
pub const SP_IRQ: u32 = 0x0300_7FA0;
pub const SP_SYS: u32 = 0x0300_7F00;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum EmuError {
    #[error("unimplemented opcode {opcode:#010x} at {addr:#010x} (thumb: {thumb})")]
    Unimplemented { addr: u32, opcode: u32, thumb: bool },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Exception {
    Reset,
    Undefined,
    SoftwareInterrupt,
    Irq,
    Fiq,
}

impl Exception {
    const fn vector(self) -> u32 {
        match self {
            Exception::Reset => 0x00,
            Exception::Undefined => 0x04,
            Exception::SoftwareInterrupt => 0x08,
            Exception::Irq => 0x18,
            Exception::Fiq => 0x1C,
        }
    }

    const fn mode(self) -> Mode {
        match self {
            Exception::Reset | Exception::SoftwareInterrupt => Mode::Supervisor,
            Exception::Undefined => Mode::Undefined,
            Exception::Irq => Mode::Irq,
            Exception::Fiq => Mode::Fiq,
        }
    }
}

#[derive(Clone, Debug)]
pub struct Cpu {
    pub regs: Registers,
    pub cpsr: Psr,
    /// Set when the executing instruction wrote r15.
    branched: bool,
}

impl Cpu {
    pub fn new() -> Self {
        let mut cpu = Self {
            regs: Registers::new(),
            cpsr: Psr::new(Mode::Supervisor),
            branched: false,
        };
        cpu.reset();
        cpu
    }

    /// Power-on state: Supervisor mode, interrupts masked, PC at the reset vector.
    pub fn reset(&mut self) {
        self.regs = Registers::new();
        self.cpsr = Psr::new(Mode::Supervisor);
        self.cpsr.set_irq_disabled(true);
        self.cpsr.set_fiq_disabled(true);
        self.regs.r[15] = Exception::Reset.vector();
        self.branched = false;
    }

    /// State left behind by the firmware when it jumps to `entry`.
    pub fn boot(&mut self, entry: u32) {
        self.regs = Registers::new();
        self.cpsr = Psr::new(Mode::System);
        self.regs.set_banked_sp(Mode::System, Mode::Supervisor, SP_SVC);
        self.regs.set_banked_sp(Mode::System, Mode::Irq, SP_IRQ);
        self.regs.r[13] = SP_SYS;
        self.regs.r[15] = entry;
        self.branched = false;
    }

    /// Address of the next instruction.
    #[inline]
    pub fn pc(&self) -> u32 {
        self.regs.r[15]
    }

    #[inline]
    pub fn reg(&self, idx: usize) -> u32 {
        self.regs.r[idx]
    }

    #[inline]
    pub fn set_reg(&mut self, idx: usize, val: u32) {
        self.regs.r[idx] = val;
    }

    pub fn mode(&self) -> Mode {
        self.cpsr.mode()
    }

    pub fn spsr(&self) -> Option<Psr> {
        self.regs.spsr(self.cpsr.mode())
    }

    /// Replace CPSR, swapping register banks on a mode change.
    pub fn set_cpsr(&mut self, psr: Psr) {
        let old = self.cpsr.mode();
        let new = psr.mode();
        if old != new {
            self.regs.switch_mode(old, new);
        }
        self.cpsr = psr;
    }

    /// Jump. The target is aligned for the current instruction set.
    #[inline]
    pub fn set_pc(&mut self, addr: u32) {
        self.regs.r[15] = if self.cpsr.thumb() { addr & !1 } else { addr & !3 };
        self.branched = true;
    }

    #[inline]
    fn write_reg(&mut self, rd: u8, val: u32) {
        if rd == 15 {
            self.set_pc(val);
        } else {
            self.regs.r[rd as usize] = val;
        }
    }

    pub fn condition(&self, cond: Cond) -> bool {
        let p = self.cpsr;
        match cond {
            Cond::Eq => p.z(),
            Cond::Ne => !p.z(),
            Cond::Cs => p.c(),
            Cond::Cc => !p.c(),
            Cond::Mi => p.n(),
            Cond::Pl => !p.n(),
            Cond::Vs => p.v(),
            Cond::Vc => !p.v(),
            Cond::Hi => p.c() && !p.z(),
            Cond::Ls => !p.c() || p.z(),
            Cond::Ge => p.n() == p.v(),
            Cond::Lt => p.n() != p.v(),
            Cond::Gt => !p.z() && p.n() == p.v(),
            Cond::Le => p.z() || p.n() != p.v(),
            Cond::Al => true,
            Cond::Nv => false,
        }
    }

    pub fn enter_exception(&mut self, kind: Exception, return_addr: u32) {
        let saved = self.cpsr;
        let mut psr = self.cpsr;
        psr.set_mode(kind.mode());
        psr.set_thumb(false);
        psr.set_irq_disabled(true);
        if matches!(kind, Exception::Reset | Exception::Fiq) {
            psr.set_fiq_disabled(true);
        }
        self.set_cpsr(psr);
        self.regs.set_spsr(kind.mode(), saved);
        self.regs.r[14] = return_addr;
        self.set_pc(kind.vector());
    }

    /// Execute one instruction, or take a pending interrupt.
    ///
    /// Returns the cycles consumed, including bus wait states and the
    /// pipeline refill after a jump.
    pub fn step(&mut self, bus: &mut Bus) -> Result<u32, EmuError> {
        self.branched = false;

        if bus.irq.pending() && !self.cpsr.irq_disabled() {
            let next = self.regs.r[15];
            trace!("IRQ entry from {next:08X}, IF={:04X}", bus.irq.flags);
            self.enter_exception(Exception::Irq, next.wrapping_add(4));
            bus.refill(self.regs.r[15], false);
            return Ok(bus.take_cycles());
        }

        let pc = self.regs.r[15];
        let result = if self.cpsr.thumb() {
            self.step_thumb(bus, pc)
        } else {
            self.step_arm(bus, pc)
        };

        if let Err(err) = result {
            error!("{err}; halting");
            self.regs.r[15] = pc;
            self.branched = false;
            bus.take_cycles();
            return Err(err);
        }

        if self.branched {
            bus.refill(self.regs.r[15], self.cpsr.thumb());
        }
        Ok(bus.take_cycles())
    }

    fn step_arm(&mut self, bus: &mut Bus, pc: u32) -> Result<(), EmuError> {
        let word = bus.fetch32(pc);
        self.regs.r[15] = pc.wrapping_add(8);
        let op = arm::decode(word);
        cpu_trace!("{pc:08X}: {word:08X} {op:?}");
        if self.condition(op.cond) {
            self.execute_arm(bus, op.insn, pc)?;
        }
        if !self.branched {
            self.regs.r[15] = pc.wrapping_add(4);
        }
        Ok(())
    }

    fn step_thumb(&mut self, bus: &mut Bus, pc: u32) -> Result<(), EmuError> {
        let half = bus.fetch16(pc);
        self.regs.r[15] = pc.wrapping_add(4);
        let insn = thumb::decode(half);
        cpu_trace!("{pc:08X}: {half:04X} {insn:?}");
        self.execute_thumb(bus, insn, pc)?;
        if !self.branched {
            self.regs.r[15] = pc.wrapping_add(2);
        }
        Ok(())
    }
}

impl Default for Cpu {
    fn default() -> Self {
        Self::new()
    }
}
