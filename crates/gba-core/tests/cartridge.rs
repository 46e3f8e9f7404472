mod common;

use common::*;
use gba_core::bus::Access;
use gba_core::{Console, SaveError, SaveKind};

fn rom_with_marker(marker: &[u8]) -> Vec<u8> {
    let mut rom = arm_rom(&[SPIN]);
    rom.resize(0x400, 0);
    rom[0x200..0x200 + marker.len()].copy_from_slice(marker);
    rom
}

fn flash_command(console: &mut Console, cmd: u8) {
    let bus = &mut console.bus;
    bus.write8(0x0E00_5555, 0xAA, Access::NonSeq);
    bus.write8(0x0E00_2AAA, 0x55, Access::NonSeq);
    bus.write8(0x0E00_5555, cmd, Access::NonSeq);
}

#[test]
fn header_fields() {
    let console = Console::new(arm_rom(&[SPIN])).unwrap();
    let cart = console.cartridge();
    assert_eq!(cart.title, "HARNESS!");
    assert_eq!(cart.game_code, "BTST");
    assert_eq!(cart.maker_code, "7F");
    assert_eq!(cart.version, 1);
    assert!(cart.checksum_ok);
    assert_eq!(cart.save_kind(), SaveKind::None);
}

#[test]
fn bad_complement_still_loads() {
    let mut rom = arm_rom(&[SPIN]);
    rom[0xBD] = rom[0xBD].wrapping_add(1);
    let console = Console::new(rom).unwrap();
    assert!(!console.cartridge().checksum_ok);
}

#[test]
fn no_backend_rejects_save_data() {
    let mut console = Console::new(arm_rom(&[SPIN])).unwrap();
    assert!(console.save_data().is_empty());
    assert_eq!(console.load_save_data(&[0; 16]), Err(SaveError::NoBackend));
}

#[test]
fn sram_persists_across_consoles() {
    let rom = rom_with_marker(b"SRAM_V113");
    let mut console = Console::new(rom.clone()).unwrap();
    console.soft_reset();
    assert_eq!(console.cartridge().save_kind(), SaveKind::Sram);
    assert!(!console.save_dirty());

    console.bus.write8(0x0E00_0000, 0x12, Access::NonSeq);
    console.bus.write8(0x0E00_7FFF, 0x34, Access::NonSeq);
    assert!(console.save_dirty());
    let blob = console.save_data().to_vec();
    assert_eq!(blob.len(), 0x8000);
    assert_eq!((blob[0], blob[0x7FFF], blob[1]), (0x12, 0x34, 0xFF));
    console.clear_save_dirty();
    assert!(!console.save_dirty());

    let mut restored = Console::new(rom).unwrap();
    restored.load_save_data(&blob).unwrap();
    assert!(!restored.save_dirty());
    assert_eq!(restored.bus.read8(0x0E00_0000, Access::NonSeq), 0x12);
    // 32 KiB mirror
    assert_eq!(restored.bus.read8(0x0E00_FFFF, Access::NonSeq), 0x34);
}

#[test]
fn wrong_size_blob_leaves_save_erased() {
    let mut console = Console::new(rom_with_marker(b"SRAM_V113")).unwrap();
    console.bus.write8(0x0E00_0000, 0x12, Access::NonSeq);
    assert_eq!(
        console.load_save_data(&[0; 100]),
        Err(SaveError::SizeMismatch {
            kind: SaveKind::Sram,
            expected: 0x8000,
            actual: 100,
        })
    );
    assert_eq!(console.save_data().len(), 0x8000);
    assert!(console.save_data().iter().all(|&b| b == 0xFF));
}

#[test]
fn flash_program_and_chip_erase() {
    let mut console = Console::new(rom_with_marker(b"FLASH_V126")).unwrap();
    assert_eq!(console.cartridge().save_kind(), SaveKind::Flash64K);

    flash_command(&mut console, 0xA0);
    console.bus.write8(0x0E00_0010, 0x42, Access::NonSeq);
    assert_eq!(console.bus.read8(0x0E00_0010, Access::NonSeq), 0x42);

    // Without the unlock sequence a write does nothing.
    console.bus.write8(0x0E00_0020, 0x99, Access::NonSeq);
    assert_eq!(console.bus.read8(0x0E00_0020, Access::NonSeq), 0xFF);

    flash_command(&mut console, 0x80);
    flash_command(&mut console, 0x10);
    assert!(console.save_data().iter().all(|&b| b == 0xFF));
    assert!(console.save_dirty());
}

#[test]
fn flash_reports_chip_id() {
    let mut console = Console::new(rom_with_marker(b"FLASH1M_V103")).unwrap();
    assert_eq!(console.save_data().len(), 0x2_0000);

    flash_command(&mut console, 0x90);
    assert_eq!(console.bus.read8(0x0E00_0000, Access::NonSeq), 0x62);
    assert_eq!(console.bus.read8(0x0E00_0001, Access::NonSeq), 0x13);
    flash_command(&mut console, 0xF0);
    assert_eq!(console.bus.read8(0x0E00_0000, Access::NonSeq), 0xFF);
}

#[test]
fn flash_bank_switch() {
    let mut console = Console::new(rom_with_marker(b"FLASH1M_V103")).unwrap();
    flash_command(&mut console, 0xB0);
    console.bus.write8(0x0E00_0000, 1, Access::NonSeq);
    flash_command(&mut console, 0xA0);
    console.bus.write8(0x0E00_0004, 0x77, Access::NonSeq);
    assert_eq!(console.save_data()[0x1_0004], 0x77);
    assert_eq!(console.save_data()[0x0004], 0xFF);
}

#[test]
fn eeprom_accepts_both_sizes() {
    let mut console = Console::new(rom_with_marker(b"EEPROM_V124")).unwrap();
    assert_eq!(console.cartridge().save_kind(), SaveKind::Eeprom);
    console.load_save_data(&[0xAB; 0x200]).unwrap();
    assert_eq!(console.save_data().len(), 0x200);
    console.load_save_data(&[0xCD; 0x2000]).unwrap();
    assert_eq!(console.save_data().len(), 0x2000);
    assert!(matches!(
        console.load_save_data(&[0; 0x1000]),
        Err(SaveError::SizeMismatch { kind: SaveKind::Eeprom, actual: 0x1000, .. })
    ));
}
