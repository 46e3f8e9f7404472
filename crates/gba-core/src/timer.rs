use crate::interrupt::{Interrupt, Interrupts};

/// Prescaler divisors selected by TMxCNT_H bits 0-1.
const PRESCALE: [u32; 4] = [1, 64, 256, 1024];

const CTRL_PRESCALE: u16 = 0x0003;
const CTRL_CASCADE: u16 = 0x0004;
const CTRL_IRQ: u16 = 0x0040;
const CTRL_ENABLE: u16 = 0x0080;
const CTRL_MASK: u16 = CTRL_PRESCALE | CTRL_CASCADE | CTRL_IRQ | CTRL_ENABLE;

#[derive(Clone, Debug, Default)]
pub struct Timer {
    /// Current counter value (TMxCNT_L read).
    pub counter: u16,
    /// Reload value (TMxCNT_L write).
    pub reload: u16,
    control: u16,
    /// Cycles accumulated toward the next prescaled tick.
    prescale_acc: u32,
}

impl Timer {
    #[inline]
    pub fn enabled(&self) -> bool {
        self.control & CTRL_ENABLE != 0
    }

    #[inline]
    fn cascade(&self) -> bool {
        self.control & CTRL_CASCADE != 0
    }

    #[inline]
    fn prescale(&self) -> u32 {
        PRESCALE[(self.control & CTRL_PRESCALE) as usize]
    }

    pub fn control(&self) -> u16 {
        self.control
    }

    fn write_control(&mut self, val: u16) {
        let was_enabled = self.enabled();
        self.control = val & CTRL_MASK;
        if !was_enabled && self.enabled() {
            self.counter = self.reload;
            self.prescale_acc = 0;
        }
    }

    /// Apply `ticks` counter increments, returning how many overflows happened.
    ///
    /// Computed in closed form so large cycle advances cost the same as small ones.
    fn add_ticks(&mut self, ticks: u64) -> u32 {
        let to_first = 0x1_0000 - self.counter as u64;
        if ticks < to_first {
            self.counter += ticks as u16;
            return 0;
        }
        let rest = ticks - to_first;
        let period = 0x1_0000 - self.reload as u64;
        self.counter = self.reload + (rest % period) as u16;
        (1 + rest / period) as u32
    }
}

/// The four hardware timers at 0x04000100-0x0400010F.
#[derive(Clone, Debug, Default)]
pub struct Timers {
    pub units: [Timer; 4],
}

impl Timers {
    pub fn new() -> Self {
        Self::default()
    }

    /// `offset` is relative to 0x04000100 and halfword aligned.
    pub fn read(&self, offset: u32) -> u16 {
        let timer = &self.units[(offset as usize >> 2) & 3];
        if offset & 2 == 0 {
            timer.counter
        } else {
            timer.control
        }
    }

    pub fn write(&mut self, offset: u32, val: u16) {
        let timer = &mut self.units[(offset as usize >> 2) & 3];
        if offset & 2 == 0 {
            timer.reload = val;
        } else {
            timer.write_control(val);
        }
    }

    /// Advance all timers by `cycles` system clocks.
    ///
    /// Returns the number of overflows per timer so the audio FIFOs can be
    /// clocked by timers 0 and 1.
    pub fn step(&mut self, cycles: u32, irq: &mut Interrupts) -> [u32; 4] {
        let mut overflows = [0u32; 4];
        for i in 0..4 {
            let prev_overflows = if i > 0 { overflows[i - 1] } else { 0 };
            let timer = &mut self.units[i];
            if !timer.enabled() {
                continue;
            }
            let ticks = if i > 0 && timer.cascade() {
                prev_overflows as u64
            } else {
                let prescale = timer.prescale();
                let total = timer.prescale_acc as u64 + cycles as u64;
                timer.prescale_acc = (total % prescale as u64) as u32;
                total / prescale as u64
            };
            if ticks == 0 {
                continue;
            }
            overflows[i] = timer.add_ticks(ticks);
            if overflows[i] > 0 && timer.control & CTRL_IRQ != 0 {
                irq.raise(Interrupt::timer(i));
            }
        }
        overflows
    }

    /// Cycles until the earliest self-clocked timer overflows.
    pub fn cycles_until_overflow(&self) -> Option<u32> {
        self.units
            .iter()
            .enumerate()
            .filter(|(i, t)| t.enabled() && !(*i > 0 && t.cascade()))
            .map(|(_, t)| {
                let ticks = 0x1_0000 - t.counter as u64;
                let cycles = ticks * t.prescale() as u64 - t.prescale_acc as u64;
                cycles.min(u32::MAX as u64) as u32
            })
            .min()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn start(timers: &mut Timers, idx: usize, reload: u16, control: u16) {
        timers.write(idx as u32 * 4, reload);
        timers.write(idx as u32 * 4 + 2, control | CTRL_ENABLE);
    }

    #[test]
    fn enable_transition_loads_reload() {
        let mut t = Timers::new();
        t.write(0, 0x1234);
        assert_eq!(t.read(0), 0);
        t.write(2, CTRL_ENABLE);
        assert_eq!(t.read(0), 0x1234);
        // Rewriting control while enabled does not reload.
        t.units[0].counter = 0x2000;
        t.write(2, CTRL_ENABLE | CTRL_IRQ);
        assert_eq!(t.read(0), 0x2000);
    }

    #[test]
    fn overflow_after_exact_period() {
        for (sel, &prescale) in PRESCALE.iter().enumerate() {
            let reload = 0xFF00u16;
            let period = (0x1_0000 - reload as u32) * prescale;
            let mut t = Timers::new();
            let mut irq = Interrupts::new();
            start(&mut t, 0, reload, sel as u16 | CTRL_IRQ);

            let ov = t.step(period - 1, &mut irq);
            assert_eq!(ov[0], 0, "prescale {prescale}");
            assert_eq!(irq.flags, 0);

            let ov = t.step(1, &mut irq);
            assert_eq!(ov[0], 1, "prescale {prescale}");
            assert_eq!(t.units[0].counter, reload);
            assert_eq!(irq.flags, Interrupt::Timer0.mask());
        }
    }

    #[test]
    fn large_advance_matches_small_steps() {
        let mut a = Timers::new();
        let mut b = Timers::new();
        let mut irq = Interrupts::new();
        start(&mut a, 0, 0xFFF0, 1);
        start(&mut b, 0, 0xFFF0, 1);

        let big = a.step(100_000, &mut irq)[0];
        let mut small = 0;
        for _ in 0..1000 {
            small += b.step(100, &mut irq)[0];
        }
        assert_eq!(big, small);
        assert_eq!(a.units[0].counter, b.units[0].counter);
        assert_eq!(a.units[0].prescale_acc, b.units[0].prescale_acc);
    }

    #[test]
    fn cascade_counts_only_predecessor_overflows() {
        let mut t = Timers::new();
        let mut irq = Interrupts::new();
        start(&mut t, 0, 0xFFFE, 0);
        // Timer 1 cascades with the slowest prescaler; the prescaler must be ignored.
        start(&mut t, 1, 0, CTRL_CASCADE | 3);

        t.step(1, &mut irq);
        assert_eq!(t.units[1].counter, 0);
        t.step(1, &mut irq);
        assert_eq!(t.units[1].counter, 1);
        t.step(20, &mut irq);
        assert_eq!(t.units[1].counter, 11);
    }

    #[test]
    fn cascade_chain_overflow_raises_irq() {
        let mut t = Timers::new();
        let mut irq = Interrupts::new();
        start(&mut t, 0, 0xFFFF, 0);
        start(&mut t, 1, 0xFFFE, CTRL_CASCADE | CTRL_IRQ);
        let ov = t.step(2, &mut irq);
        assert_eq!(ov[0], 2);
        assert_eq!(ov[1], 1);
        assert_eq!(irq.flags, Interrupt::Timer1.mask());
    }

    #[test]
    fn next_overflow_estimate() {
        let mut t = Timers::new();
        assert_eq!(t.cycles_until_overflow(), None);
        start(&mut t, 2, 0xFFF0, 1);
        assert_eq!(t.cycles_until_overflow(), Some(16 * 64));
    }
}
