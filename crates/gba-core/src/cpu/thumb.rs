//! 16-bit instruction set: the nineteen formats, decoded and re-encoded.

use super::arm::Cond;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MoveShiftOp {
    Lsl = 0,
    Lsr,
    Asr,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ImmOp {
    Mov = 0,
    Cmp,
    Add,
    Sub,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AluOp {
    And = 0,
    Eor,
    Lsl,
    Lsr,
    Asr,
    Adc,
    Sbc,
    Ror,
    Tst,
    Neg,
    Cmp,
    Cmn,
    Orr,
    Mul,
    Bic,
    Mvn,
}

impl AluOp {
    const fn from_bits(bits: u16) -> Self {
        match bits & 0xF {
            0 => AluOp::And,
            1 => AluOp::Eor,
            2 => AluOp::Lsl,
            3 => AluOp::Lsr,
            4 => AluOp::Asr,
            5 => AluOp::Adc,
            6 => AluOp::Sbc,
            7 => AluOp::Ror,
            8 => AluOp::Tst,
            9 => AluOp::Neg,
            10 => AluOp::Cmp,
            11 => AluOp::Cmn,
            12 => AluOp::Orr,
            13 => AluOp::Mul,
            14 => AluOp::Bic,
            _ => AluOp::Mvn,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HiRegOp {
    Add = 0,
    Cmp,
    Mov,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SignedOp {
    Strh = 0,
    Ldsb,
    Ldrh,
    Ldsh,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ThumbInstruction {
    /// Format 1.
    MoveShifted {
        op: MoveShiftOp,
        offset: u8,
        rs: u8,
        rd: u8,
    },
    /// Format 2. `operand` is a register or a 3-bit immediate.
    AddSub {
        sub: bool,
        imm: bool,
        operand: u8,
        rs: u8,
        rd: u8,
    },
    /// Format 3.
    Immediate { op: ImmOp, rd: u8, imm: u8 },
    /// Format 4.
    Alu { op: AluOp, rs: u8, rd: u8 },
    /// Format 5, ADD/CMP/MOV on the full register range.
    HiReg { op: HiRegOp, rs: u8, rd: u8 },
    /// Format 5, BX.
    BranchExchange { rs: u8 },
    /// Format 6.
    PcLoad { rd: u8, word: u8 },
    /// Format 7.
    LoadStoreReg {
        load: bool,
        byte: bool,
        ro: u8,
        rb: u8,
        rd: u8,
    },
    /// Format 8.
    LoadStoreSigned {
        op: SignedOp,
        ro: u8,
        rb: u8,
        rd: u8,
    },
    /// Format 9. `offset` is in units of the access width.
    LoadStoreImm {
        load: bool,
        byte: bool,
        offset: u8,
        rb: u8,
        rd: u8,
    },
    /// Format 10.
    LoadStoreHalf {
        load: bool,
        offset: u8,
        rb: u8,
        rd: u8,
    },
    /// Format 11.
    SpLoadStore { load: bool, rd: u8, word: u8 },
    /// Format 12.
    LoadAddress { sp: bool, rd: u8, word: u8 },
    /// Format 13.
    AddSp { negative: bool, word: u8 },
    /// Format 14.
    PushPop { pop: bool, pc_lr: bool, list: u8 },
    /// Format 15.
    MultipleLoadStore { load: bool, rb: u8, list: u8 },
    /// Format 16.
    CondBranch { cond: Cond, offset: i8 },
    /// Format 17.
    SoftwareInterrupt { comment: u8 },
    /// Format 18. Offset in halfwords.
    Branch { offset: i16 },
    /// Format 19. `high` marks the second half which performs the jump.
    LongBranch { high: bool, offset: u16 },
    Undefined { raw: u16 },
    Unimplemented { raw: u16 },
}

#[inline]
fn r3(op: u16, lsb: u32) -> u8 {
    ((op >> lsb) & 7) as u8
}

#[inline]
fn bit(op: u16, n: u32) -> bool {
    op & (1 << n) != 0
}

pub fn decode(op: u16) -> ThumbInstruction {
    use ThumbInstruction::*;

    match op >> 13 {
        0b000 => {
            if (op >> 11) & 3 == 3 {
                AddSub {
                    sub: bit(op, 9),
                    imm: bit(op, 10),
                    operand: r3(op, 6),
                    rs: r3(op, 3),
                    rd: r3(op, 0),
                }
            } else {
                MoveShifted {
                    op: match (op >> 11) & 3 {
                        0 => MoveShiftOp::Lsl,
                        1 => MoveShiftOp::Lsr,
                        _ => MoveShiftOp::Asr,
                    },
                    offset: ((op >> 6) & 0x1F) as u8,
                    rs: r3(op, 3),
                    rd: r3(op, 0),
                }
            }
        }
        0b001 => Immediate {
            op: match (op >> 11) & 3 {
                0 => ImmOp::Mov,
                1 => ImmOp::Cmp,
                2 => ImmOp::Add,
                _ => ImmOp::Sub,
            },
            rd: r3(op, 8),
            imm: op as u8,
        },
        0b010 => decode_010(op),
        0b011 => LoadStoreImm {
            load: bit(op, 11),
            byte: bit(op, 12),
            offset: ((op >> 6) & 0x1F) as u8,
            rb: r3(op, 3),
            rd: r3(op, 0),
        },
        0b100 => {
            if bit(op, 12) {
                SpLoadStore {
                    load: bit(op, 11),
                    rd: r3(op, 8),
                    word: op as u8,
                }
            } else {
                LoadStoreHalf {
                    load: bit(op, 11),
                    offset: ((op >> 6) & 0x1F) as u8,
                    rb: r3(op, 3),
                    rd: r3(op, 0),
                }
            }
        }
        0b101 => {
            if !bit(op, 12) {
                LoadAddress {
                    sp: bit(op, 11),
                    rd: r3(op, 8),
                    word: op as u8,
                }
            } else if op & 0xFF00 == 0xB000 {
                AddSp {
                    negative: bit(op, 7),
                    word: (op & 0x7F) as u8,
                }
            } else if op & 0xF600 == 0xB400 {
                PushPop {
                    pop: bit(op, 11),
                    pc_lr: bit(op, 8),
                    list: op as u8,
                }
            } else {
                Unimplemented { raw: op }
            }
        }
        0b110 => {
            if !bit(op, 12) {
                MultipleLoadStore {
                    load: bit(op, 11),
                    rb: r3(op, 8),
                    list: op as u8,
                }
            } else {
                match (op >> 8) & 0xF {
                    0xE => Undefined { raw: op },
                    0xF => SoftwareInterrupt { comment: op as u8 },
                    cond => CondBranch {
                        cond: Cond::from_bits(cond as u32),
                        offset: op as u8 as i8,
                    },
                }
            }
        }
        _ => match (op >> 11) & 3 {
            0 => Branch {
                offset: ((op << 5) as i16) >> 5,
            },
            1 => Unimplemented { raw: op },
            h => LongBranch {
                high: h == 3,
                offset: op & 0x7FF,
            },
        },
    }
}

fn decode_010(op: u16) -> ThumbInstruction {
    use ThumbInstruction::*;

    if op & 0xFC00 == 0x4000 {
        return Alu {
            op: AluOp::from_bits(op >> 6),
            rs: r3(op, 3),
            rd: r3(op, 0),
        };
    }
    if op & 0xFC00 == 0x4400 {
        let rs = r3(op, 3) | (bit(op, 6) as u8) << 3;
        let rd = r3(op, 0) | (bit(op, 7) as u8) << 3;
        return match (op >> 8) & 3 {
            0 => HiReg { op: HiRegOp::Add, rs, rd },
            1 => HiReg { op: HiRegOp::Cmp, rs, rd },
            2 => HiReg { op: HiRegOp::Mov, rs, rd },
            _ if bit(op, 7) => Unimplemented { raw: op },
            _ => BranchExchange { rs },
        };
    }
    if op & 0xF800 == 0x4800 {
        return PcLoad {
            rd: r3(op, 8),
            word: op as u8,
        };
    }
    if bit(op, 9) {
        LoadStoreSigned {
            op: match (op >> 10) & 3 {
                0 => SignedOp::Strh,
                1 => SignedOp::Ldsb,
                2 => SignedOp::Ldrh,
                _ => SignedOp::Ldsh,
            },
            ro: r3(op, 6),
            rb: r3(op, 3),
            rd: r3(op, 0),
        }
    } else {
        LoadStoreReg {
            load: bit(op, 11),
            byte: bit(op, 10),
            ro: r3(op, 6),
            rb: r3(op, 3),
            rd: r3(op, 0),
        }
    }
}

#[inline]
fn put(val: u8, lsb: u32) -> u16 {
    (val as u16) << lsb
}

#[inline]
fn flag(on: bool, n: u32) -> u16 {
    (on as u16) << n
}

pub fn encode(insn: ThumbInstruction) -> u16 {
    use ThumbInstruction::*;

    match insn {
        MoveShifted { op, offset, rs, rd } => {
            put(op as u8, 11) | put(offset & 0x1F, 6) | put(rs, 3) | put(rd, 0)
        }
        AddSub {
            sub,
            imm,
            operand,
            rs,
            rd,
        } => 0x1800 | flag(imm, 10) | flag(sub, 9) | put(operand, 6) | put(rs, 3) | put(rd, 0),
        Immediate { op, rd, imm } => 0x2000 | put(op as u8, 11) | put(rd, 8) | imm as u16,
        Alu { op, rs, rd } => 0x4000 | put(op as u8, 6) | put(rs, 3) | put(rd, 0),
        HiReg { op, rs, rd } => {
            0x4400
                | put(op as u8, 8)
                | flag(rd & 8 != 0, 7)
                | flag(rs & 8 != 0, 6)
                | put(rs & 7, 3)
                | put(rd & 7, 0)
        }
        BranchExchange { rs } => 0x4700 | flag(rs & 8 != 0, 6) | put(rs & 7, 3),
        PcLoad { rd, word } => 0x4800 | put(rd, 8) | word as u16,
        LoadStoreReg {
            load,
            byte,
            ro,
            rb,
            rd,
        } => 0x5000 | flag(load, 11) | flag(byte, 10) | put(ro, 6) | put(rb, 3) | put(rd, 0),
        LoadStoreSigned { op, ro, rb, rd } => {
            0x5200 | put(op as u8, 10) | put(ro, 6) | put(rb, 3) | put(rd, 0)
        }
        LoadStoreImm {
            load,
            byte,
            offset,
            rb,
            rd,
        } => {
            0x6000
                | flag(byte, 12)
                | flag(load, 11)
                | put(offset & 0x1F, 6)
                | put(rb, 3)
                | put(rd, 0)
        }
        LoadStoreHalf {
            load,
            offset,
            rb,
            rd,
        } => 0x8000 | flag(load, 11) | put(offset & 0x1F, 6) | put(rb, 3) | put(rd, 0),
        SpLoadStore { load, rd, word } => 0x9000 | flag(load, 11) | put(rd, 8) | word as u16,
        LoadAddress { sp, rd, word } => 0xA000 | flag(sp, 11) | put(rd, 8) | word as u16,
        AddSp { negative, word } => 0xB000 | flag(negative, 7) | (word & 0x7F) as u16,
        PushPop { pop, pc_lr, list } => 0xB400 | flag(pop, 11) | flag(pc_lr, 8) | list as u16,
        MultipleLoadStore { load, rb, list } => {
            0xC000 | flag(load, 11) | put(rb, 8) | list as u16
        }
        CondBranch { cond, offset } => 0xD000 | (cond as u16) << 8 | offset as u8 as u16,
        SoftwareInterrupt { comment } => 0xDF00 | comment as u16,
        Branch { offset } => 0xE000 | (offset as u16 & 0x7FF),
        LongBranch { high, offset } => 0xF000 | flag(high, 11) | (offset & 0x7FF),
        Undefined { raw } | Unimplemented { raw } => raw,
    }
}
