//! Barrel shifter and flag-producing arithmetic shared by both instruction sets.

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShiftType {
    Lsl = 0,
    Lsr = 1,
    Asr = 2,
    Ror = 3,
}

impl ShiftType {
    pub const fn from_bits(bits: u32) -> Self {
        match bits & 3 {
            0 => ShiftType::Lsl,
            1 => ShiftType::Lsr,
            2 => ShiftType::Asr,
            _ => ShiftType::Ror,
        }
    }
}

/// Shift by an immediate amount. An amount of 0 encodes LSR #32, ASR #32 and
/// RRX for the right shifts.
pub fn shift_imm(kind: ShiftType, value: u32, amount: u32, carry: bool) -> (u32, bool) {
    match (kind, amount) {
        (ShiftType::Lsl, 0) => (value, carry),
        (ShiftType::Lsr, 0) => (0, value >> 31 != 0),
        (ShiftType::Asr, 0) => {
            let sign = value >> 31 != 0;
            (if sign { u32::MAX } else { 0 }, sign)
        }
        (ShiftType::Ror, 0) => (((carry as u32) << 31) | (value >> 1), value & 1 != 0),
        _ => shift_reg(kind, value, amount, carry),
    }
}

/// Shift by a register amount (bottom byte). Amounts of 32 and above follow
/// the ARM7 rules; 0 leaves value and carry untouched.
pub fn shift_reg(kind: ShiftType, value: u32, amount: u32, carry: bool) -> (u32, bool) {
    if amount == 0 {
        return (value, carry);
    }
    match kind {
        ShiftType::Lsl => match amount {
            1..=31 => (value << amount, (value >> (32 - amount)) & 1 != 0),
            32 => (0, value & 1 != 0),
            _ => (0, false),
        },
        ShiftType::Lsr => match amount {
            1..=31 => (value >> amount, (value >> (amount - 1)) & 1 != 0),
            32 => (0, value >> 31 != 0),
            _ => (0, false),
        },
        ShiftType::Asr => {
            if amount < 32 {
                (
                    ((value as i32) >> amount) as u32,
                    ((value as i32) >> (amount - 1)) & 1 != 0,
                )
            } else {
                let sign = value >> 31 != 0;
                (if sign { u32::MAX } else { 0 }, sign)
            }
        }
        ShiftType::Ror => {
            let rot = amount & 31;
            if rot == 0 {
                (value, value >> 31 != 0)
            } else {
                let result = value.rotate_right(rot);
                (result, result >> 31 != 0)
            }
        }
    }
}

/// Result of an arithmetic operation with all four flags.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Flags {
    pub result: u32,
    pub carry: bool,
    pub overflow: bool,
}

#[inline]
pub fn add(a: u32, b: u32, carry_in: bool) -> Flags {
    let wide = a as u64 + b as u64 + carry_in as u64;
    let result = wide as u32;
    Flags {
        result,
        carry: wide > u32::MAX as u64,
        overflow: (!(a ^ b) & (a ^ result)) >> 31 != 0,
    }
}

/// `a - b - !carry_in`; carry out is "no borrow".
#[inline]
pub fn sub(a: u32, b: u32, carry_in: bool) -> Flags {
    let wide = (a as u64)
        .wrapping_sub(b as u64)
        .wrapping_sub(!carry_in as u64);
    let result = wide as u32;
    Flags {
        result,
        carry: (a as u64) >= (b as u64) + (!carry_in as u64),
        overflow: ((a ^ b) & (a ^ result)) >> 31 != 0,
    }
}

/// Internal cycles of the multiplier array for operand `rs`.
///
/// Signed forms terminate early on leading ones as well as leading zeros.
pub fn multiply_cycles(rs: u32, signed: bool) -> u32 {
    let stop = |mask: u32| rs & mask == 0 || (signed && rs & mask == mask);
    if stop(0xFFFF_FF00) {
        1
    } else if stop(0xFFFF_0000) {
        2
    } else if stop(0xFF00_0000) {
        3
    } else {
        4
    }
}
