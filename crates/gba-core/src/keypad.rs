use crate::interrupt::{Interrupt, Interrupts};

/// Button bits as laid out in KEYINPUT.
pub mod keys {
    pub const A: u16 = 1 << 0;
    pub const B: u16 = 1 << 1;
    pub const SELECT: u16 = 1 << 2;
    pub const START: u16 = 1 << 3;
    pub const RIGHT: u16 = 1 << 4;
    pub const LEFT: u16 = 1 << 5;
    pub const UP: u16 = 1 << 6;
    pub const DOWN: u16 = 1 << 7;
    pub const R: u16 = 1 << 8;
    pub const L: u16 = 1 << 9;
    pub const ALL: u16 = 0x03FF;
}

const KEYCNT_IRQ: u16 = 1 << 14;
const KEYCNT_AND: u16 = 1 << 15;

/// KEYINPUT / KEYCNT.
#[derive(Clone, Debug, Default)]
pub struct Keypad {
    /// Pressed buttons, active high. The register view is inverted.
    pressed: u16,
    control: u16,
}

impl Keypad {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_pressed(&mut self, mask: u16, irq: &mut Interrupts) {
        self.pressed = mask & keys::ALL;
        self.update_irq(irq);
    }

    pub fn pressed(&self) -> u16 {
        self.pressed
    }

    pub fn read_keyinput(&self) -> u16 {
        !self.pressed & keys::ALL
    }

    pub fn read_keycnt(&self) -> u16 {
        self.control
    }

    pub fn write_keycnt(&mut self, val: u16, irq: &mut Interrupts) {
        self.control = val & 0xC3FF;
        self.update_irq(irq);
    }

    fn update_irq(&self, irq: &mut Interrupts) {
        if self.control & KEYCNT_IRQ == 0 {
            return;
        }
        let select = self.control & keys::ALL;
        let hit = if self.control & KEYCNT_AND != 0 {
            select != 0 && self.pressed & select == select
        } else {
            self.pressed & select != 0
        };
        if hit {
            irq.raise(Interrupt::Keypad);
        }
    }
}
