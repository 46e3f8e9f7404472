use super::psr::{Mode, Psr};

/// Index into the r13/r14 bank table.
const fn bank(mode: Mode) -> usize {
    match mode {
        Mode::User | Mode::System => 0,
        Mode::Fiq => 1,
        Mode::Irq => 2,
        Mode::Supervisor => 3,
        Mode::Abort => 4,
        Mode::Undefined => 5,
    }
}

/// The visible register file plus every banked copy.
///
/// `r` always holds the registers of the current mode; the other modes'
/// copies live in the banks and are swapped in by [`Registers::switch_mode`].
#[derive(Clone, Debug)]
pub struct Registers {
    pub r: [u32; 16],
    /// r8-r12 of every mode except FIQ, while FIQ is active.
    shared_hi: [u32; 5],
    /// r8-r12 of FIQ mode, while another mode is active.
    fiq_hi: [u32; 5],
    /// r13/r14 per bank, for banks that are not active.
    sp_lr: [[u32; 2]; 6],
    spsr: [Psr; 6],
}

impl Default for Registers {
    fn default() -> Self {
        Self {
            r: [0; 16],
            shared_hi: [0; 5],
            fiq_hi: [0; 5],
            sp_lr: [[0; 2]; 6],
            spsr: [Psr::new(Mode::User); 6],
        }
    }
}

impl Registers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Swap banked registers out for `from` and in for `to`.
    pub fn switch_mode(&mut self, from: Mode, to: Mode) {
        let (old, new) = (bank(from), bank(to));
        if old == new {
            return;
        }
        self.sp_lr[old] = [self.r[13], self.r[14]];
        if from == Mode::Fiq {
            self.fiq_hi.copy_from_slice(&self.r[8..13]);
            self.r[8..13].copy_from_slice(&self.shared_hi);
        } else if to == Mode::Fiq {
            self.shared_hi.copy_from_slice(&self.r[8..13]);
            self.r[8..13].copy_from_slice(&self.fiq_hi);
        }
        [self.r[13], self.r[14]] = self.sp_lr[new];
    }

    /// Read a register as seen from User mode while `mode` is active.
    pub fn user(&self, mode: Mode, idx: usize) -> u32 {
        match idx {
            8..=12 if mode == Mode::Fiq => self.shared_hi[idx - 8],
            13 | 14 if bank(mode) != 0 => self.sp_lr[0][idx - 13],
            _ => self.r[idx],
        }
    }

    pub fn set_user(&mut self, mode: Mode, idx: usize, val: u32) {
        match idx {
            8..=12 if mode == Mode::Fiq => self.shared_hi[idx - 8] = val,
            13 | 14 if bank(mode) != 0 => self.sp_lr[0][idx - 13] = val,
            _ => self.r[idx] = val,
        }
    }

    /// Stack pointer of `mode` regardless of which mode is active.
    pub fn set_banked_sp(&mut self, current: Mode, mode: Mode, sp: u32) {
        if bank(current) == bank(mode) {
            self.r[13] = sp;
        } else {
            self.sp_lr[bank(mode)][0] = sp;
        }
    }

    pub fn banked_sp(&self, current: Mode, mode: Mode) -> u32 {
        if bank(current) == bank(mode) {
            self.r[13]
        } else {
            self.sp_lr[bank(mode)][0]
        }
    }

    /// SPSR of `mode`, or `None` for User and System.
    pub fn spsr(&self, mode: Mode) -> Option<Psr> {
        mode.has_spsr().then(|| self.spsr[bank(mode)])
    }

    pub fn set_spsr(&mut self, mode: Mode, psr: Psr) {
        if mode.has_spsr() {
            self.spsr[bank(mode)] = psr;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sp_and_lr_are_banked_per_mode() {
        let mut regs = Registers::new();
        regs.r[13] = 0x0300_7F00;
        regs.r[14] = 0x0800_0000;
        regs.switch_mode(Mode::System, Mode::Irq);
        assert_eq!(regs.r[13], 0);
        regs.r[13] = 0x0300_7FA0;
        regs.switch_mode(Mode::Irq, Mode::Supervisor);
        regs.r[13] = 0x0300_7FE0;
        regs.switch_mode(Mode::Supervisor, Mode::User);
        assert_eq!(regs.r[13], 0x0300_7F00);
        assert_eq!(regs.r[14], 0x0800_0000);
        assert_eq!(regs.banked_sp(Mode::User, Mode::Irq), 0x0300_7FA0);
        assert_eq!(regs.banked_sp(Mode::User, Mode::Supervisor), 0x0300_7FE0);
    }

    #[test]
    fn fiq_banks_r8_to_r12() {
        let mut regs = Registers::new();
        for i in 0..16 {
            regs.r[i] = i as u32;
        }
        regs.switch_mode(Mode::System, Mode::Fiq);
        assert_eq!(regs.r[7], 7);
        assert_eq!(regs.r[8], 0);
        assert_eq!(regs.user(Mode::Fiq, 8), 8);
        regs.r[8] = 0xAA;
        regs.switch_mode(Mode::Fiq, Mode::Irq);
        assert_eq!(regs.r[8], 8);
        regs.switch_mode(Mode::Irq, Mode::Fiq);
        assert_eq!(regs.r[8], 0xAA);
    }

    #[test]
    fn user_view_from_privileged_mode() {
        let mut regs = Registers::new();
        regs.r[13] = 0x1000;
        regs.switch_mode(Mode::User, Mode::Supervisor);
        assert_eq!(regs.user(Mode::Supervisor, 13), 0x1000);
        regs.set_user(Mode::Supervisor, 14, 0x2000);
        regs.switch_mode(Mode::Supervisor, Mode::System);
        assert_eq!(regs.r[14], 0x2000);
    }

    #[test]
    fn spsr_only_for_exception_modes() {
        let mut regs = Registers::new();
        regs.set_spsr(Mode::System, Psr::new(Mode::Irq));
        assert_eq!(regs.spsr(Mode::System), None);
        regs.set_spsr(Mode::Irq, Psr::new(Mode::User));
        assert_eq!(regs.spsr(Mode::Irq), Some(Psr::new(Mode::User)));
    }
}
