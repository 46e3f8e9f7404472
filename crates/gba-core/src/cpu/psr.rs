/// Processor modes as encoded in PSR bits 0-4.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Mode {
    User = 0x10,
    Fiq = 0x11,
    Irq = 0x12,
    Supervisor = 0x13,
    Abort = 0x17,
    Undefined = 0x1B,
    System = 0x1F,
}

impl Mode {
    pub const fn from_bits(bits: u32) -> Option<Self> {
        match bits & 0x1F {
            0x10 => Some(Mode::User),
            0x11 => Some(Mode::Fiq),
            0x12 => Some(Mode::Irq),
            0x13 => Some(Mode::Supervisor),
            0x17 => Some(Mode::Abort),
            0x1B => Some(Mode::Undefined),
            0x1F => Some(Mode::System),
            _ => None,
        }
    }

    pub const fn is_privileged(self) -> bool {
        !matches!(self, Mode::User)
    }

    /// Modes other than User and System own an SPSR.
    pub const fn has_spsr(self) -> bool {
        !matches!(self, Mode::User | Mode::System)
    }
}

const N: u32 = 1 << 31;
const Z: u32 = 1 << 30;
const C: u32 = 1 << 29;
const V: u32 = 1 << 28;
const I: u32 = 1 << 7;
const F: u32 = 1 << 6;
const T: u32 = 1 << 5;

pub const FLAGS_MASK: u32 = 0xF000_0000;
pub const CONTROL_MASK: u32 = 0x0000_00FF;

/// A program status register.
///
/// The mode field always holds a valid mode; writes with reserved mode bits
/// are rejected by the CPU before they get here.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Psr(u32);

impl Psr {
    pub const fn new(mode: Mode) -> Self {
        Psr(mode as u32)
    }

    /// Build from raw bits, falling back to `None` if the mode is reserved.
    pub fn from_bits(bits: u32) -> Option<Self> {
        Mode::from_bits(bits)?;
        Some(Psr(bits & (FLAGS_MASK | CONTROL_MASK)))
    }

    #[inline]
    pub const fn bits(self) -> u32 {
        self.0
    }

    #[inline]
    pub fn mode(self) -> Mode {
        // The constructor and setters keep the field valid.
        Mode::from_bits(self.0).unwrap_or(Mode::System)
    }

    #[inline]
    pub fn set_mode(&mut self, mode: Mode) {
        self.0 = (self.0 & !0x1F) | mode as u32;
    }

    #[inline]
    fn flag(self, bit: u32) -> bool {
        self.0 & bit != 0
    }

    #[inline]
    fn set_flag(&mut self, bit: u32, on: bool) {
        if on {
            self.0 |= bit;
        } else {
            self.0 &= !bit;
        }
    }

    pub fn n(self) -> bool {
        self.flag(N)
    }
    pub fn z(self) -> bool {
        self.flag(Z)
    }
    pub fn c(self) -> bool {
        self.flag(C)
    }
    pub fn v(self) -> bool {
        self.flag(V)
    }
    pub fn irq_disabled(self) -> bool {
        self.flag(I)
    }
    pub fn fiq_disabled(self) -> bool {
        self.flag(F)
    }
    pub fn thumb(self) -> bool {
        self.flag(T)
    }

    pub fn set_n(&mut self, on: bool) {
        self.set_flag(N, on)
    }
    pub fn set_z(&mut self, on: bool) {
        self.set_flag(Z, on)
    }
    pub fn set_c(&mut self, on: bool) {
        self.set_flag(C, on)
    }
    pub fn set_v(&mut self, on: bool) {
        self.set_flag(V, on)
    }
    pub fn set_irq_disabled(&mut self, on: bool) {
        self.set_flag(I, on)
    }
    pub fn set_fiq_disabled(&mut self, on: bool) {
        self.set_flag(F, on)
    }
    pub fn set_thumb(&mut self, on: bool) {
        self.set_flag(T, on)
    }

    /// Set N and Z from a result.
    #[inline]
    pub fn set_nz(&mut self, result: u32) {
        self.set_n(result & N != 0);
        self.set_z(result == 0);
    }

    /// Replace the fields selected by `mask`, keeping the mode valid.
    ///
    /// Returns `false` and leaves the register untouched when the new mode
    /// bits are reserved.
    pub fn merge(&mut self, value: u32, mask: u32) -> bool {
        let bits = (self.0 & !mask) | (value & mask);
        match Psr::from_bits(bits) {
            Some(psr) => {
                *self = psr;
                true
            }
            None => false,
        }
    }
}
