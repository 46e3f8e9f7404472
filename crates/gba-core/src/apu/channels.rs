//! The four legacy tone generators, clocked in system cycles.

/// Cycles between frame sequencer steps (512 Hz).
pub(super) const FRAME_SEQUENCER_PERIOD: u32 = 32_768;

const DUTY_TABLE: [[u8; 8]; 4] = [
    [0, 0, 0, 0, 0, 0, 0, 1], // 12.5%
    [1, 0, 0, 0, 0, 0, 0, 1], // 25%
    [1, 0, 0, 0, 0, 1, 1, 1], // 50%
    [0, 1, 1, 1, 1, 1, 1, 0], // 75%
];

#[derive(Clone, Copy, Debug, Default)]
pub(super) struct Envelope {
    initial: u8,
    period: u8,
    add: bool,
    pub volume: u8,
    timer: u8,
}

impl Envelope {
    /// Writes the envelope byte: period 0-2, direction 3, initial volume 4-7.
    fn write(&mut self, val: u8) {
        self.initial = val >> 4;
        self.period = val & 0x07;
        self.add = val & 0x08 != 0;
    }

    fn bits(&self) -> u8 {
        self.initial << 4 | (self.add as u8) << 3 | self.period
    }

    fn dac_enabled(&self) -> bool {
        self.initial != 0 || self.add
    }

    fn trigger(&mut self) {
        self.volume = self.initial;
        self.timer = self.period;
    }

    pub fn clock(&mut self) {
        if self.period == 0 {
            return;
        }
        if self.timer > 1 {
            self.timer -= 1;
            return;
        }
        self.timer = self.period;
        if self.add && self.volume < 15 {
            self.volume += 1;
        } else if !self.add && self.volume > 0 {
            self.volume -= 1;
        }
    }
}

#[derive(Clone, Debug, Default)]
struct Sweep {
    period: u8,
    negate: bool,
    shift: u8,
    timer: u8,
    shadow: u16,
    enabled: bool,
}

impl Sweep {
    fn calculate(&self) -> u16 {
        let delta = self.shadow >> self.shift;
        if self.negate {
            self.shadow.wrapping_sub(delta)
        } else {
            self.shadow.wrapping_add(delta)
        }
    }

    fn write(&mut self, val: u16) {
        self.shift = (val & 0x07) as u8;
        self.negate = val & 0x08 != 0;
        self.period = ((val >> 4) & 0x07) as u8;
    }

    fn bits(&self) -> u16 {
        (self.period as u16) << 4 | (self.negate as u16) << 3 | self.shift as u16
    }

    fn reload(&mut self, freq: u16) {
        self.shadow = freq;
        self.timer = if self.period == 0 { 8 } else { self.period };
        self.enabled = self.period != 0 || self.shift != 0;
    }
}

/// Tone channel, with frequency sweep on channel 1.
#[derive(Clone, Debug)]
pub(super) struct Square {
    pub enabled: bool,
    duty: u8,
    duty_pos: u8,
    length: u8,
    length_enable: bool,
    pub envelope: Envelope,
    frequency: u16,
    timer: i32,
    sweep: Option<Sweep>,
}

impl Square {
    pub fn new(with_sweep: bool) -> Self {
        Self {
            enabled: false,
            duty: 0,
            duty_pos: 0,
            length: 0,
            length_enable: false,
            envelope: Envelope::default(),
            frequency: 0,
            timer: 0,
            sweep: with_sweep.then(Sweep::default),
        }
    }

    fn period(&self) -> i32 {
        (2048 - self.frequency as i32) * 16
    }

    pub fn write_sweep(&mut self, val: u16) {
        if let Some(s) = &mut self.sweep {
            s.write(val);
        }
    }

    pub fn read_sweep(&self) -> u16 {
        self.sweep.as_ref().map_or(0, Sweep::bits)
    }

    /// Length 0-5, duty 6-7, envelope 8-15.
    pub fn write_control(&mut self, val: u16) {
        self.length = 64 - (val & 0x3F) as u8;
        self.duty = ((val >> 6) & 3) as u8;
        self.envelope.write((val >> 8) as u8);
        if !self.envelope.dac_enabled() {
            self.enabled = false;
        }
    }

    pub fn read_control(&self) -> u16 {
        (self.envelope.bits() as u16) << 8 | (self.duty as u16) << 6
    }

    /// Frequency 0-10, length enable 14, restart 15.
    pub fn write_frequency(&mut self, val: u16) {
        self.frequency = val & 0x7FF;
        self.length_enable = val & 0x4000 != 0;
        if val & 0x8000 != 0 {
            self.trigger();
        }
    }

    pub fn read_frequency(&self) -> u16 {
        (self.length_enable as u16) << 14
    }

    fn trigger(&mut self) {
        self.enabled = self.envelope.dac_enabled();
        if self.length == 0 {
            self.length = 64;
        }
        self.timer = self.period();
        self.envelope.trigger();
        let freq = self.frequency;
        if let Some(s) = &mut self.sweep {
            s.reload(freq);
            if s.shift != 0 && s.calculate() > 2047 {
                self.enabled = false;
            }
        }
    }

    pub fn step(&mut self, cycles: u32) {
        if !self.enabled {
            return;
        }
        let mut cycles = cycles as i32;
        while self.timer <= cycles {
            cycles -= self.timer;
            self.timer = self.period();
            self.duty_pos = (self.duty_pos + 1) & 7;
        }
        self.timer -= cycles;
    }

    pub fn output(&self) -> u8 {
        if !self.enabled {
            return 0;
        }
        DUTY_TABLE[self.duty as usize][self.duty_pos as usize] * self.envelope.volume
    }

    pub fn clock_length(&mut self) {
        if self.length_enable && self.length > 0 {
            self.length -= 1;
            if self.length == 0 {
                self.enabled = false;
            }
        }
    }

    pub fn clock_sweep(&mut self) {
        let Some(s) = &mut self.sweep else {
            return;
        };
        if s.timer > 0 {
            s.timer -= 1;
        }
        if s.timer != 0 {
            return;
        }
        s.timer = if s.period == 0 { 8 } else { s.period };
        if !s.enabled || s.period == 0 {
            return;
        }
        let next = s.calculate();
        if next > 2047 {
            self.enabled = false;
            return;
        }
        if s.shift != 0 {
            s.shadow = next;
            self.frequency = next;
            if s.calculate() > 2047 {
                self.enabled = false;
            }
        }
    }
}

/// Wave channel with two 32-sample banks.
#[derive(Clone, Debug, Default)]
pub(super) struct Wave {
    pub enabled: bool,
    playback: bool,
    two_banks: bool,
    bank: usize,
    length: u16,
    length_enable: bool,
    volume: u8,
    force_75: bool,
    frequency: u16,
    timer: i32,
    position: u8,
    sample: u8,
    ram: [[u8; 16]; 2],
}

impl Wave {
    fn period(&self) -> i32 {
        (2048 - self.frequency as i32) * 8
    }

    /// Dimension 5, bank 6, playback 7.
    pub fn write_select(&mut self, val: u16) {
        self.two_banks = val & 0x20 != 0;
        self.bank = ((val >> 6) & 1) as usize;
        self.playback = val & 0x80 != 0;
        if !self.playback {
            self.enabled = false;
        }
    }

    pub fn read_select(&self) -> u16 {
        (self.two_banks as u16) << 5 | (self.bank as u16) << 6 | (self.playback as u16) << 7
    }

    /// Length 0-7, volume 13-14, forced 75% 15.
    pub fn write_control(&mut self, val: u16) {
        self.length = 256 - (val & 0xFF);
        self.volume = ((val >> 13) & 3) as u8;
        self.force_75 = val & 0x8000 != 0;
    }

    pub fn read_control(&self) -> u16 {
        (self.volume as u16) << 13 | (self.force_75 as u16) << 15
    }

    pub fn write_frequency(&mut self, val: u16) {
        self.frequency = val & 0x7FF;
        self.length_enable = val & 0x4000 != 0;
        if val & 0x8000 != 0 {
            self.enabled = self.playback;
            if self.length == 0 {
                self.length = 256;
            }
            self.timer = self.period();
            self.position = 0;
        }
    }

    pub fn read_frequency(&self) -> u16 {
        (self.length_enable as u16) << 14
    }

    /// Wave RAM as seen by the CPU: the bank that is not selected for playback.
    pub fn read_ram(&self, offset: usize) -> u8 {
        self.ram[self.bank ^ 1][offset & 0xF]
    }

    pub fn write_ram(&mut self, offset: usize, val: u8) {
        self.ram[self.bank ^ 1][offset & 0xF] = val;
    }

    fn fetch(&self) -> u8 {
        let samples = if self.two_banks { 64 } else { 32 };
        let pos = self.position as usize % samples;
        let bank = if pos >= 32 { self.bank ^ 1 } else { self.bank };
        let byte = self.ram[bank][(pos % 32) / 2];
        if pos & 1 == 0 { byte >> 4 } else { byte & 0xF }
    }

    pub fn step(&mut self, cycles: u32) {
        if !self.enabled {
            return;
        }
        let mut cycles = cycles as i32;
        while self.timer <= cycles {
            cycles -= self.timer;
            self.timer = self.period();
            let samples = if self.two_banks { 64 } else { 32 };
            self.position = (self.position + 1) % samples;
            self.sample = self.fetch();
        }
        self.timer -= cycles;
    }

    pub fn output(&self) -> u8 {
        if !self.enabled {
            return 0;
        }
        if self.force_75 {
            return self.sample * 3 / 4;
        }
        match self.volume {
            1 => self.sample,
            2 => self.sample >> 1,
            3 => self.sample >> 2,
            _ => 0,
        }
    }

    pub fn clock_length(&mut self) {
        if self.length_enable && self.length > 0 {
            self.length -= 1;
            if self.length == 0 {
                self.enabled = false;
            }
        }
    }
}

#[derive(Clone, Debug, Default)]
pub(super) struct Noise {
    pub enabled: bool,
    length: u8,
    length_enable: bool,
    pub envelope: Envelope,
    shift: u8,
    divisor: u8,
    width7: bool,
    lfsr: u16,
    timer: i32,
}

impl Noise {
    fn period(&self) -> i32 {
        let base = match self.divisor {
            0 => 8,
            d => d as i32 * 16,
        };
        (base << self.shift) * 4
    }

    /// Length 0-5, envelope 8-15.
    pub fn write_control(&mut self, val: u16) {
        self.length = 64 - (val & 0x3F) as u8;
        self.envelope.write((val >> 8) as u8);
        if !self.envelope.dac_enabled() {
            self.enabled = false;
        }
    }

    pub fn read_control(&self) -> u16 {
        (self.envelope.bits() as u16) << 8
    }

    /// Divisor 0-2, width 3, shift 4-7, length enable 14, restart 15.
    pub fn write_frequency(&mut self, val: u16) {
        self.divisor = (val & 7) as u8;
        self.width7 = val & 0x08 != 0;
        self.shift = ((val >> 4) & 0xF) as u8;
        self.length_enable = val & 0x4000 != 0;
        if val & 0x8000 != 0 {
            self.enabled = self.envelope.dac_enabled();
            if self.length == 0 {
                self.length = 64;
            }
            self.envelope.trigger();
            self.lfsr = if self.width7 { 0x40 } else { 0x4000 };
            self.timer = self.period();
        }
    }

    pub fn read_frequency(&self) -> u16 {
        self.divisor as u16
            | (self.width7 as u16) << 3
            | (self.shift as u16) << 4
            | (self.length_enable as u16) << 14
    }

    pub fn step(&mut self, cycles: u32) {
        if !self.enabled || self.shift >= 14 {
            return;
        }
        let mut cycles = cycles as i32;
        while self.timer <= cycles {
            cycles -= self.timer;
            self.timer = self.period();
            let carry = self.lfsr & 1 != 0;
            self.lfsr >>= 1;
            if carry {
                self.lfsr ^= if self.width7 { 0x60 } else { 0x6000 };
            }
        }
        self.timer -= cycles;
    }

    pub fn output(&self) -> u8 {
        if !self.enabled || self.lfsr & 1 == 0 {
            return 0;
        }
        self.envelope.volume
    }

    pub fn clock_length(&mut self) {
        if self.length_enable && self.length > 0 {
            self.length -= 1;
            if self.length == 0 {
                self.enabled = false;
            }
        }
    }
}

/// 512 Hz sequencer: length at 256 Hz, sweep at 128 Hz, envelope at 64 Hz.
#[derive(Clone, Debug, Default)]
pub(super) struct FrameSequencer {
    step: u8,
    timer: u32,
}

impl FrameSequencer {
    /// Steps reached during the next `cycles`, oldest first.
    pub fn advance(&mut self, cycles: u32) -> impl Iterator<Item = u8> + use<> {
        self.timer += cycles;
        let count = self.timer / FRAME_SEQUENCER_PERIOD;
        self.timer %= FRAME_SEQUENCER_PERIOD;
        let first = self.step;
        self.step = ((self.step as u32 + count) & 7) as u8;
        (0..count).map(move |i| ((first as u32 + i) & 7) as u8)
    }
}
