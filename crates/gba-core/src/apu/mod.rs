//! Sound: four legacy tone channels, two 8-bit FIFO channels and the mixer.
//!
//! Register offsets are relative to 0x04000000. Output is interleaved
//! stereo `i16` at [`SAMPLE_RATE`].

use std::collections::VecDeque;

mod channels;

use channels::{FrameSequencer, Noise, Square, Wave};

#[cfg(feature = "apu-trace")]
macro_rules! apu_trace {
    ($($arg:tt)*) => {
        log::trace!($($arg)*);
    };
}
#[cfg(not(feature = "apu-trace"))]
macro_rules! apu_trace {
    ($($arg:tt)*) => {};
}

pub const SAMPLE_RATE: u32 = 32_768;
/// System cycles per output sample pair.
const CYCLES_PER_SAMPLE: u32 = 512;
/// Keep at most one second of stereo samples.
const MAX_SAMPLES: usize = SAMPLE_RATE as usize * 2;

const FIFO_CAPACITY: usize = 32;
/// A FIFO asks for a refill once it holds this many bytes or fewer.
const FIFO_REFILL: usize = 16;

const REG_SOUNDCNT_L: u32 = 0x80;
const REG_SOUNDCNT_H: u32 = 0x82;
const REG_SOUNDCNT_X: u32 = 0x84;
const REG_SOUNDBIAS: u32 = 0x88;

#[derive(Clone, Debug, Default)]
struct Fifo {
    data: VecDeque<i8>,
    current: i8,
}

impl Fifo {
    fn push(&mut self, byte: u8) {
        if self.data.len() < FIFO_CAPACITY {
            self.data.push_back(byte as i8);
        }
    }

    /// Advance to the next sample; an empty queue holds the last one.
    fn pop(&mut self) {
        if let Some(s) = self.data.pop_front() {
            self.current = s;
        }
    }

    fn clear(&mut self) {
        self.data.clear();
        self.current = 0;
    }
}

pub struct Apu {
    ch1: Square,
    ch2: Square,
    ch3: Wave,
    ch4: Noise,
    sequencer: FrameSequencer,
    fifo: [Fifo; 2],
    soundcnt_l: u16,
    soundcnt_h: u16,
    master_enable: bool,
    bias: u16,
    sample_timer: u32,
    samples: VecDeque<i16>,
    enabled: bool,
}

impl Default for Apu {
    fn default() -> Self {
        Self::new()
    }
}

impl Apu {
    pub fn new() -> Self {
        Self {
            ch1: Square::new(true),
            ch2: Square::new(false),
            ch3: Wave::default(),
            ch4: Noise::default(),
            sequencer: FrameSequencer::default(),
            fifo: Default::default(),
            soundcnt_l: 0,
            soundcnt_h: 0,
            master_enable: false,
            bias: 0x200,
            sample_timer: 0,
            samples: VecDeque::with_capacity(MAX_SAMPLES),
            enabled: true,
        }
    }

    /// Host-side mute. Registers and FIFOs keep running, nothing is mixed.
    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
        if !enabled {
            self.samples.clear();
        }
    }

    /// Drain every buffered sample, interleaved left/right.
    pub fn take_samples(&mut self) -> Vec<i16> {
        self.samples.drain(..).collect()
    }

    pub fn buffered_samples(&self) -> usize {
        self.samples.len()
    }

    fn push_sample(&mut self, s: i16) {
        if self.samples.len() >= MAX_SAMPLES {
            let excess = self.samples.len() + 1 - MAX_SAMPLES;
            self.samples.drain(..excess);
        }
        self.samples.push_back(s);
    }

    fn status(&self) -> u16 {
        self.ch1.enabled as u16
            | (self.ch2.enabled as u16) << 1
            | (self.ch3.enabled as u16) << 2
            | (self.ch4.enabled as u16) << 3
    }

    pub fn read16(&self, offset: u32) -> u16 {
        match offset & !1 {
            0x60 => self.ch1.read_sweep(),
            0x62 => self.ch1.read_control(),
            0x64 => self.ch1.read_frequency(),
            0x68 => self.ch2.read_control(),
            0x6C => self.ch2.read_frequency(),
            0x70 => self.ch3.read_select(),
            0x72 => self.ch3.read_control(),
            0x74 => self.ch3.read_frequency(),
            0x78 => self.ch4.read_control(),
            0x7C => self.ch4.read_frequency(),
            REG_SOUNDCNT_L => self.soundcnt_l,
            REG_SOUNDCNT_H => self.soundcnt_h & 0x770F,
            REG_SOUNDCNT_X => (self.master_enable as u16) << 7 | self.status(),
            REG_SOUNDBIAS => self.bias,
            off @ 0x90..=0x9F => {
                let i = (off - 0x90) as usize;
                u16::from_le_bytes([self.ch3.read_ram(i), self.ch3.read_ram(i + 1)])
            }
            _ => 0,
        }
    }

    pub fn write16(&mut self, offset: u32, val: u16) {
        let offset = offset & !1;
        apu_trace!("apu write {:#05X} = {:#06X}", offset, val);
        // With the master switch off only the control, bias, wave RAM and FIFOs respond.
        if !self.master_enable && offset < REG_SOUNDCNT_X && offset != REG_SOUNDCNT_H {
            return;
        }
        match offset {
            0x60 => self.ch1.write_sweep(val),
            0x62 => self.ch1.write_control(val),
            0x64 => self.ch1.write_frequency(val),
            0x68 => self.ch2.write_control(val),
            0x6C => self.ch2.write_frequency(val),
            0x70 => self.ch3.write_select(val),
            0x72 => self.ch3.write_control(val),
            0x74 => self.ch3.write_frequency(val),
            0x78 => self.ch4.write_control(val),
            0x7C => self.ch4.write_frequency(val),
            REG_SOUNDCNT_L => self.soundcnt_l = val & 0xFF77,
            REG_SOUNDCNT_H => {
                self.soundcnt_h = val;
                if val & 0x0800 != 0 {
                    self.fifo[0].clear();
                }
                if val & 0x8000 != 0 {
                    self.fifo[1].clear();
                }
            }
            REG_SOUNDCNT_X => {
                let enable = val & 0x80 != 0;
                if self.master_enable && !enable {
                    self.power_off();
                }
                self.master_enable = enable;
            }
            REG_SOUNDBIAS => self.bias = val & 0xC3FE,
            0x90..=0x9F => {
                let i = (offset - 0x90) as usize;
                let [lo, hi] = val.to_le_bytes();
                self.ch3.write_ram(i, lo);
                self.ch3.write_ram(i + 1, hi);
            }
            0xA0..=0xA7 => {
                let [lo, hi] = val.to_le_bytes();
                self.write_fifo(offset, lo);
                self.write_fifo(offset + 1, hi);
            }
            _ => {}
        }
    }

    /// Byte write into FIFO A (0xA0-0xA3) or FIFO B (0xA4-0xA7).
    pub fn write_fifo(&mut self, offset: u32, byte: u8) {
        let index = ((offset - 0xA0) / 4) as usize & 1;
        self.fifo[index].push(byte);
    }

    fn power_off(&mut self) {
        self.ch1 = Square::new(true);
        self.ch2 = Square::new(false);
        self.ch4 = Noise::default();
        // Wave RAM survives power-off.
        let select = self.ch3.read_select();
        self.ch3.write_select(select & 0x40);
        self.ch3.write_control(0);
        self.ch3.write_frequency(0);
        self.soundcnt_l = 0;
    }

    /// Timer `timer` overflowed `count` times. Returns which FIFOs want a DMA refill.
    pub fn timer_overflow(&mut self, timer: usize, count: u32) -> [bool; 2] {
        let mut requests = [false; 2];
        for (i, fifo) in self.fifo.iter_mut().enumerate() {
            let select_bit = if i == 0 { 0x0400 } else { 0x4000 };
            let selected = if self.soundcnt_h & select_bit != 0 { 1 } else { 0 };
            if selected != timer {
                continue;
            }
            for _ in 0..count.min(FIFO_CAPACITY as u32) {
                fifo.pop();
            }
            requests[i] = fifo.data.len() <= FIFO_REFILL;
        }
        requests
    }

    pub fn step(&mut self, cycles: u32) {
        if self.master_enable {
            for step in self.sequencer.advance(cycles) {
                self.clock_frame_sequencer(step);
            }
            self.ch1.step(cycles);
            self.ch2.step(cycles);
            self.ch3.step(cycles);
            self.ch4.step(cycles);
        }

        self.sample_timer += cycles;
        while self.sample_timer >= CYCLES_PER_SAMPLE {
            self.sample_timer -= CYCLES_PER_SAMPLE;
            if self.enabled {
                let (left, right) = self.mix_output();
                self.push_sample(left);
                self.push_sample(right);
            }
        }
    }

    fn clock_frame_sequencer(&mut self, step: u8) {
        if step & 1 == 0 {
            self.ch1.clock_length();
            self.ch2.clock_length();
            self.ch3.clock_length();
            self.ch4.clock_length();
        }
        if step == 2 || step == 6 {
            self.ch1.clock_sweep();
        }
        if step == 7 {
            self.ch1.envelope.clock();
            self.ch2.envelope.clock();
            self.ch4.envelope.clock();
        }
    }

    fn mix_output(&self) -> (i16, i16) {
        let bias = (self.bias & 0x3FE) as i32;
        if !self.master_enable {
            return (0, 0);
        }

        let outputs = [
            self.ch1.output(),
            self.ch2.output(),
            self.ch3.output(),
            self.ch4.output(),
        ];
        // Legacy channel share: 25%, 50%, 100%.
        let psg_shift = match self.soundcnt_h & 3 {
            0 => 2,
            1 => 1,
            _ => 0,
        };

        let mut mixed = [0i32; 2];
        for (side, out) in mixed.iter_mut().enumerate() {
            // Side 0 is left: enables 12-15, volume 4-6. Right: enables 8-11, volume 0-2.
            let (enable_shift, volume_shift) = if side == 0 { (12, 4) } else { (8, 0) };
            let mut psg = 0i32;
            for (ch, &v) in outputs.iter().enumerate() {
                if self.soundcnt_l & (1 << (enable_shift + ch)) != 0 {
                    psg += v as i32 * 2 - 15;
                }
            }
            let volume = ((self.soundcnt_l >> volume_shift) & 7) as i32 + 1;
            psg = (psg * volume) >> psg_shift;

            let mut fifo = 0i32;
            for (i, f) in self.fifo.iter().enumerate() {
                let full = self.soundcnt_h & (0x04 << i) != 0;
                let routed = self.soundcnt_h & (0x0100 << (i * 4 + 1 - side)) != 0;
                if routed {
                    let s = f.current as i32;
                    fifo += if full { s * 4 } else { s * 2 };
                }
            }

            let level = (bias + psg + fifo).clamp(0, 0x3FF);
            *out = (level - bias) * 32;
        }
        let clamp = |v: i32| v.clamp(i16::MIN as i32, i16::MAX as i32) as i16;
        (clamp(mixed[0]), clamp(mixed[1]))
    }
}
