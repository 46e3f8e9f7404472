#![allow(dead_code)]

use gba_core::cartridge::header_checksum;
use gba_core::cpu::arm::{
    ArmInstruction, ArmOpcode, Cond, DpOp, HalfwordKind, HalfwordOffset, Indexing, Operand2,
    TransferOffset,
};
use gba_core::cpu::thumb::{self, ThumbInstruction};

/// Cartridge address of the first instruction after the header.
pub const CODE_START: u32 = 0x0800_00C0;
const CODE_OFFSET: usize = 0xC0;

/// `b .`
pub const SPIN: u32 = 0xEAFF_FFFE;

/// Blank image with a valid header whose entry branch jumps to [`CODE_START`].
pub fn blank_rom(len: usize) -> Vec<u8> {
    let mut rom = vec![0u8; len.max(0x200)];
    // b 0x080000C0
    rom[0..4].copy_from_slice(&0xEA00_002Eu32.to_le_bytes());
    rom[0xA0..0xA8].copy_from_slice(b"HARNESS!");
    rom[0xAC..0xB0].copy_from_slice(b"BTST");
    rom[0xB0..0xB2].copy_from_slice(b"7F");
    rom[0xB2] = 0x96;
    rom[0xBC] = 1;
    rom[0xBD] = header_checksum(&rom);
    rom
}

/// Image whose code area holds `code`.
pub fn arm_rom(code: &[u32]) -> Vec<u8> {
    let mut rom = blank_rom(CODE_OFFSET + code.len() * 4 + 0x100);
    for (i, word) in code.iter().enumerate() {
        let at = CODE_OFFSET + i * 4;
        rom[at..at + 4].copy_from_slice(&word.to_le_bytes());
    }
    rom
}

/// Copy `code` into `rom` at cartridge address `addr`.
pub fn place_thumb(rom: &mut Vec<u8>, addr: u32, code: &[u16]) {
    let at = (addr - 0x0800_0000) as usize;
    if rom.len() < at + code.len() * 2 {
        rom.resize(at + code.len() * 2, 0);
    }
    for (i, half) in code.iter().enumerate() {
        rom[at + i * 2..at + i * 2 + 2].copy_from_slice(&half.to_le_bytes());
    }
}

pub fn arm(insn: ArmInstruction) -> u32 {
    ArmOpcode::new(Cond::Al, insn).encode()
}

pub fn thumb(insn: ThumbInstruction) -> u16 {
    thumb::encode(insn)
}

/// Data processing with an immediate `value` rotated right by `2 * rotate`.
pub fn dp_imm(op: DpOp, rd: u8, rn: u8, value: u8, rotate: u8) -> u32 {
    arm(ArmInstruction::DataProcessing {
        op,
        set_flags: false,
        rn,
        rd,
        op2: Operand2::Imm { value, rotate },
    })
}

pub fn mov_imm(rd: u8, value: u8, rotate: u8) -> u32 {
    dp_imm(DpOp::Mov, rd, 0, value, rotate)
}

fn pre_up() -> Indexing {
    Indexing {
        pre: true,
        up: true,
        writeback: false,
    }
}

pub fn str_word(rd: u8, rn: u8, offset: u16) -> u32 {
    arm(ArmInstruction::SingleTransfer {
        index: pre_up(),
        load: false,
        byte: false,
        rn,
        rd,
        offset: TransferOffset::Imm(offset),
    })
}

pub fn ldr_word(rd: u8, rn: u8, offset: u16) -> u32 {
    arm(ArmInstruction::SingleTransfer {
        index: pre_up(),
        load: true,
        byte: false,
        rn,
        rd,
        offset: TransferOffset::Imm(offset),
    })
}

pub fn strh(rd: u8, rn: u8, offset: u8) -> u32 {
    arm(ArmInstruction::HalfwordTransfer {
        index: pre_up(),
        load: false,
        kind: HalfwordKind::Unsigned,
        rn,
        rd,
        offset: HalfwordOffset::Imm(offset),
    })
}

pub fn mul(rd: u8, rm: u8, rs: u8) -> u32 {
    arm(ArmInstruction::Multiply {
        accumulate: false,
        set_flags: false,
        rd,
        rn: 0,
        rs,
        rm,
    })
}

pub fn bx(rm: u8) -> u32 {
    arm(ArmInstruction::BranchExchange { rm })
}

pub fn swi(number: u8) -> u32 {
    arm(ArmInstruction::SoftwareInterrupt {
        comment: (number as u32) << 16,
    })
}

/// `mov r0, #0x04000000`
pub fn io_base(rd: u8) -> u32 {
    mov_imm(rd, 0x04, 4)
}
