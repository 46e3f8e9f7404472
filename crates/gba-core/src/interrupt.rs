/// Interrupt sources in IE/IF bit order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Interrupt {
    VBlank = 0,
    HBlank = 1,
    VCount = 2,
    Timer0 = 3,
    Timer1 = 4,
    Timer2 = 5,
    Timer3 = 6,
    Serial = 7,
    Dma0 = 8,
    Dma1 = 9,
    Dma2 = 10,
    Dma3 = 11,
    Keypad = 12,
    GamePak = 13,
}

impl Interrupt {
    #[inline]
    pub const fn mask(self) -> u16 {
        1 << self as u16
    }

    pub const fn timer(index: usize) -> Self {
        match index {
            0 => Interrupt::Timer0,
            1 => Interrupt::Timer1,
            2 => Interrupt::Timer2,
            _ => Interrupt::Timer3,
        }
    }

    pub const fn dma(index: usize) -> Self {
        match index {
            0 => Interrupt::Dma0,
            1 => Interrupt::Dma1,
            2 => Interrupt::Dma2,
            _ => Interrupt::Dma3,
        }
    }
}

const IRQ_BITS: u16 = 0x3FFF;

/// IE/IF/IME state.
///
/// Sources set bits in `flags` unconditionally; whether the CPU sees a
/// pending request depends on `enable` and the master enable.
#[derive(Clone, Debug, Default)]
pub struct Interrupts {
    pub enable: u16,
    pub flags: u16,
    pub master_enable: bool,
}

impl Interrupts {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn raise(&mut self, irq: Interrupt) {
        self.flags |= irq.mask();
    }

    /// Write-one-to-clear acknowledge used by IF writes.
    #[inline]
    pub fn acknowledge(&mut self, bits: u16) {
        self.flags &= !bits;
    }

    /// Any enabled source requested, ignoring IME. This is what wakes a halted CPU.
    #[inline]
    pub fn requested(&self) -> bool {
        self.flags & self.enable & IRQ_BITS != 0
    }

    /// The signal the CPU polls before every fetch.
    #[inline]
    pub fn pending(&self) -> bool {
        self.master_enable && self.requested()
    }

    pub fn read_ie(&self) -> u16 {
        self.enable
    }

    pub fn write_ie(&mut self, val: u16) {
        self.enable = val & IRQ_BITS;
    }

    pub fn read_if(&self) -> u16 {
        self.flags
    }

    pub fn read_ime(&self) -> u16 {
        self.master_enable as u16
    }

    pub fn write_ime(&mut self, val: u16) {
        self.master_enable = val & 1 != 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flag_without_enable_is_not_pending() {
        let mut irq = Interrupts::new();
        irq.master_enable = true;
        irq.raise(Interrupt::Timer2);
        assert_eq!(irq.flags, 1 << 5);
        assert!(!irq.pending());

        irq.write_ie(Interrupt::Timer2.mask());
        assert!(irq.pending());
    }

    #[test]
    fn master_enable_gates_pending_but_not_request() {
        let mut irq = Interrupts::new();
        irq.write_ie(0xFFFF);
        irq.raise(Interrupt::VBlank);
        assert!(irq.requested());
        assert!(!irq.pending());
        irq.write_ime(1);
        assert!(irq.pending());
    }

    #[test]
    fn acknowledge_clears_only_written_bits() {
        let mut irq = Interrupts::new();
        irq.raise(Interrupt::VBlank);
        irq.raise(Interrupt::Dma3);
        irq.acknowledge(Interrupt::VBlank.mask());
        assert_eq!(irq.read_if(), Interrupt::Dma3.mask());
    }
}
