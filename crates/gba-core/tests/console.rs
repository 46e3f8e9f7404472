mod common;

use common::*;
use gba_core::bus::Access;
use gba_core::cpu::arm::DpOp;
use gba_core::cpu::psr::Mode;
use gba_core::cpu::thumb::{ImmOp, MoveShiftOp, ThumbInstruction};
use gba_core::{CartridgeError, Console, EmuError, StepEvent, SCREEN_HEIGHT};

fn run_steps(console: &mut Console, steps: usize) {
    for _ in 0..steps {
        console.step().unwrap();
    }
}

#[test]
fn rejects_bad_fixed_byte() {
    let mut rom = blank_rom(0x200);
    rom[0xB2] = 0;
    assert_eq!(
        Console::new(rom).err(),
        Some(CartridgeError::BadFixedByte { found: 0 })
    );
}

#[test]
fn rejects_truncated_image() {
    assert!(matches!(
        Console::new(vec![0; 0x40]),
        Err(CartridgeError::TooShort { len: 0x40 })
    ));
}

#[test]
fn vblank_interrupt_enters_irq_vector() {
    let rom = arm_rom(&[
        io_base(0),
        mov_imm(1, 8, 0),
        strh(1, 0, 0x04),
        mov_imm(1, 1, 0),
        // r2 = 0x04000200
        dp_imm(DpOp::Add, 2, 0, 0x02, 12),
        strh(1, 2, 0x00),
        strh(1, 2, 0x08),
        SPIN,
    ]);
    let spin = CODE_START + 7 * 4;

    // Cold start: the built-in firmware hands over to the cartridge first.
    let mut console = Console::new(rom).unwrap();
    let mut steps = 0;
    while console.cpu.pc() != 0x18 {
        console.step().unwrap();
        steps += 1;
        assert!(steps < 300_000, "no interrupt taken");
    }

    assert_eq!(console.cpu.mode(), Mode::Irq);
    assert_eq!(console.cpu.reg(14), spin + 4);
    assert_eq!(console.cpu.spsr().map(|psr| psr.mode()), Some(Mode::System));
    assert!(console.cpu.cpsr.irq_disabled());
    assert_eq!(console.bus.read16(0x0400_0006, Access::NonSeq), 160);
    // Entry leaves IF for the handler to acknowledge.
    assert_eq!(console.bus.read16(0x0400_0202, Access::NonSeq) & 1, 1);
    console.bus.write16(0x0400_0202, 1, Access::NonSeq);
    assert_eq!(console.bus.read16(0x0400_0202, Access::NonSeq) & 1, 0);
}

#[test]
fn vblank_dma_runs_once_per_frame() {
    let mut console = Console::new(arm_rom(&[SPIN])).unwrap();
    console.soft_reset();
    let bus = &mut console.bus;
    for (i, word) in [0x1111_1111u32, 0x2222_2222, 0x3333_3333, 0x4444_4444]
        .into_iter()
        .enumerate()
    {
        bus.write32(0x0300_0000 + i as u32 * 4, word, Access::NonSeq);
    }
    bus.write32(0x0400_00B0, 0x0300_0000, Access::NonSeq);
    bus.write32(0x0400_00B4, 0x0300_0100, Access::NonSeq);
    bus.write16(0x0400_00B8, 1, Access::NonSeq);
    // enable, VBlank, 32-bit, repeat, fixed destination
    bus.write16(0x0400_00BA, 0x8000 | 0x1000 | 0x0400 | 0x0200 | 0x0040, Access::NonSeq);
    assert_eq!(bus.read32(0x0300_0100, Access::NonSeq), 0);

    for expected in [0x1111_1111u32, 0x2222_2222, 0x3333_3333] {
        console.run_frame().unwrap();
        assert_eq!(console.bus.read32(0x0300_0100, Access::NonSeq), expected);
    }
    // Repeat keeps the channel armed.
    assert_ne!(console.bus.read16(0x0400_00BA, Access::NonSeq) & 0x8000, 0);
}

#[test]
fn vcount_and_vblank_flag_track_a_frame() {
    let mut console = Console::new(arm_rom(&[SPIN])).unwrap();
    console.soft_reset();
    console.run_frame().unwrap();

    let mut seen = [false; 228];
    loop {
        let event = console.step().unwrap();
        let dispstat = console.bus.read16(0x0400_0004, Access::NonSeq);
        let vcount = console.bus.read16(0x0400_0006, Access::NonSeq);
        seen[vcount as usize] = true;
        let in_vblank = (160..=227).contains(&vcount);
        assert_eq!(dispstat & 1 != 0, in_vblank, "line {vcount}");
        if event == StepEvent::FrameReady {
            break;
        }
    }
    assert!(seen.iter().all(|&line| line));
    assert_eq!(console.bus.ppu.frames(), 2);
}

#[test]
fn frame_reports_each_visible_line() {
    let mut console = Console::new(arm_rom(&[SPIN])).unwrap();
    console.soft_reset();
    console.run_frame().unwrap();
    let mut lines = Vec::new();
    loop {
        match console.step().unwrap() {
            StepEvent::LineReady(line) => lines.push(line),
            StepEvent::FrameReady => break,
            StepEvent::None => {}
        }
    }
    assert_eq!(lines, (0..SCREEN_HEIGHT as u16).collect::<Vec<_>>());
}

#[test]
fn timer_overflow_raises_interrupt() {
    let mut console = Console::new(arm_rom(&[SPIN])).unwrap();
    console.soft_reset();
    console.bus.write16(0x0400_0100, 0xFF00, Access::NonSeq);
    // enable, IRQ, prescaler 1
    console.bus.write16(0x0400_0102, 0x00C0, Access::NonSeq);

    let mut steps = 0;
    while console.bus.read16(0x0400_0202, Access::NonSeq) & 0x0008 == 0 {
        console.step().unwrap();
        steps += 1;
        assert!(steps < 200, "timer 0 never overflowed");
    }
}

#[test]
fn cascade_counts_overflows() {
    let mut console = Console::new(arm_rom(&[SPIN])).unwrap();
    console.soft_reset();
    let bus = &mut console.bus;
    bus.write16(0x0400_0100, 0xFF00, Access::NonSeq);
    bus.write16(0x0400_0102, 0x0080, Access::NonSeq);
    bus.write16(0x0400_0106, 0x0084, Access::NonSeq);
    // Free-running reference clock.
    bus.write16(0x0400_010A, 0x0080, Access::NonSeq);

    while console.bus.read16(0x0400_0108, Access::NonSeq) < 5000 {
        console.step().unwrap();
    }
    let elapsed = console.bus.read16(0x0400_0108, Access::NonSeq) as u32;
    let low = console.bus.read16(0x0400_0100, Access::NonSeq) as u32;
    let high = console.bus.read16(0x0400_0104, Access::NonSeq) as u32;
    assert_eq!(high, elapsed / 256);
    assert_eq!(low, 0xFF00 + elapsed % 256);
}

#[test]
fn arm_program_writes_product() {
    let rom = arm_rom(&[
        // r0 = 0x03000000
        mov_imm(0, 0x03, 4),
        mov_imm(1, 5, 0),
        mov_imm(2, 7, 0),
        mul(3, 1, 2),
        str_word(3, 0, 0),
        ldr_word(4, 0, 0),
        SPIN,
    ]);
    let mut console = Console::new(rom).unwrap();
    console.soft_reset();
    run_steps(&mut console, 32);
    assert_eq!(console.bus.read32(0x0300_0000, Access::NonSeq), 35);
    assert_eq!(console.cpu.reg(4), 35);
    assert_eq!(console.cpu.pc(), CODE_START + 6 * 4);
}

#[test]
fn bx_switches_to_thumb() {
    let mut rom = arm_rom(&[
        // r4 = 0x08000101
        mov_imm(4, 0x08, 4),
        dp_imm(DpOp::Orr, 4, 4, 0x01, 12),
        dp_imm(DpOp::Orr, 4, 4, 0x01, 0),
        bx(4),
    ]);
    place_thumb(
        &mut rom,
        0x0800_0100,
        &[
            thumb(ThumbInstruction::Immediate { op: ImmOp::Mov, rd: 0, imm: 3 }),
            thumb(ThumbInstruction::MoveShifted {
                op: MoveShiftOp::Lsl,
                offset: 24,
                rs: 0,
                rd: 0,
            }),
            thumb(ThumbInstruction::Immediate { op: ImmOp::Mov, rd: 1, imm: 200 }),
            thumb(ThumbInstruction::Immediate { op: ImmOp::Add, rd: 1, imm: 55 }),
            thumb(ThumbInstruction::LoadStoreImm {
                load: false,
                byte: false,
                offset: 1,
                rb: 0,
                rd: 1,
            }),
            thumb(ThumbInstruction::Branch { offset: -2 }),
        ],
    );
    let mut console = Console::new(rom).unwrap();
    console.soft_reset();
    run_steps(&mut console, 40);
    assert!(console.cpu.cpsr.thumb());
    assert_eq!(console.bus.read32(0x0300_0004, Access::NonSeq), 255);
    assert_eq!(console.cpu.pc(), 0x0800_010A);
}

#[test]
fn firmware_division_call() {
    let rom = arm_rom(&[
        mov_imm(0, 100, 0),
        mov_imm(1, 7, 0),
        swi(0x06),
        mov_imm(5, 0x03, 4),
        str_word(0, 5, 0),
        str_word(1, 5, 4),
        SPIN,
    ]);
    let mut console = Console::new(rom).unwrap();
    console.soft_reset();
    run_steps(&mut console, 40);
    assert_eq!(console.bus.read32(0x0300_0000, Access::NonSeq), 14);
    assert_eq!(console.bus.read32(0x0300_0004, Access::NonSeq), 2);
    assert_eq!(console.cpu.reg(3), 14);
}

#[test]
fn fault_reports_address_and_stops() {
    // clz r0, r0
    let rom = arm_rom(&[mov_imm(0, 1, 0), 0xE16F_0F10]);
    let mut console = Console::new(rom).unwrap();
    console.soft_reset();
    console.step().unwrap();
    console.step().unwrap();
    let err = console.step().unwrap_err();
    assert!(matches!(
        err,
        EmuError::Unimplemented { addr, thumb: false, .. } if addr == CODE_START + 4
    ));
    assert!(console.run_frame().is_err());
    assert_eq!(console.fault(), Some(&err));
}

#[test]
fn muted_console_buffers_no_audio() {
    let mut console = Console::new(arm_rom(&[SPIN])).unwrap();
    console.soft_reset();
    console.run_frame().unwrap();
    assert!(!console.take_samples().is_empty());

    console.set_audio_enabled(false);
    console.run_frame().unwrap();
    assert!(console.take_samples().is_empty());
}
