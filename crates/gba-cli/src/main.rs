mod config;
mod output;

use clap::Parser;
use gba_core::{Bios, Cartridge, Console, SaveKind};
use log::{info, warn};
use std::error::Error;
use std::fs;
use std::path::{Path, PathBuf};

const DEFAULT_FRAMES: u32 = 60;

#[derive(Parser)]
#[command(version, about = "Run a Game Boy Advance ROM without a window")]
struct Args {
    /// Path to ROM file
    rom: PathBuf,

    /// 16 KiB firmware image to use instead of the built-in one
    #[arg(long)]
    bios: Option<PathBuf>,

    /// Run the firmware from the reset vector before the cartridge
    #[arg(long)]
    boot_bios: bool,

    /// Print the cartridge header and exit
    #[arg(long)]
    cart_info: bool,

    /// Number of frames to run
    #[arg(long)]
    frames: Option<u32>,

    /// Save the last frame as a PNG
    #[arg(long)]
    screenshot: Option<PathBuf>,

    /// Record the audio output as a WAV file
    #[arg(long)]
    wav: Option<PathBuf>,

    /// Skip audio generation
    #[arg(long, conflicts_with = "wav")]
    mute: bool,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,

    /// Settings file
    #[arg(long)]
    config: Option<PathBuf>,
}

fn print_cart_info(cart: &Cartridge) {
    println!("Title:    {}", cart.title);
    println!("Code:     {}", cart.game_code);
    println!("Maker:    {}", cart.maker_code);
    println!("Version:  {}", cart.version);
    println!(
        "Checksum: {}",
        if cart.checksum_ok { "ok" } else { "MISMATCH" }
    );
    println!("Save:     {:?}", cart.save_kind());
}

fn restore_save(console: &mut Console, path: &Path) {
    if console.cartridge().save_kind() == SaveKind::None {
        return;
    }
    match fs::read(path) {
        Ok(blob) => {
            if let Err(e) = console.load_save_data(&blob) {
                warn!("Ignoring {}: {e}", path.display());
            }
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to read {}: {e}", path.display()),
    }
}

fn persist_save(console: &mut Console, path: &Path) -> std::io::Result<()> {
    if !console.save_dirty() {
        return Ok(());
    }
    if let Some(parent) = path
        .parent()
        .and_then(|p| (!p.as_os_str().is_empty()).then_some(p))
    {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, console.save_data())?;
    console.clear_save_dirty();
    info!("Wrote save to {}", path.display());
    Ok(())
}

fn run(
    console: &mut Console,
    frames: u32,
    mut wav: Option<&mut output::WavWriter>,
) -> Result<(), Box<dyn Error>> {
    for _ in 0..frames {
        console.run_frame()?;
        let samples = console.take_samples();
        if let Some(writer) = wav.as_deref_mut() {
            output::write_samples(writer, &samples)?;
        }
    }
    Ok(())
}

fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();

    let level = if args.debug { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let config_path = args.config.clone().unwrap_or_else(config::default_config_path);
    let settings = config::load_from_file(&config_path);

    let rom = fs::read(&args.rom)?;
    let bios = match args.bios.as_ref().or(settings.bios_path.as_ref()) {
        Some(path) => Bios::new(fs::read(path)?)?,
        None => Bios::builtin(),
    };
    let mut console = Console::with_bios(rom, bios)?;

    if args.cart_info {
        print_cart_info(console.cartridge());
        return Ok(());
    }

    console.set_audio_enabled(!args.mute);
    if !args.boot_bios && settings.skip_bios {
        console.soft_reset();
    }

    let save_path = config::save_path(&args.rom, settings.save_dir.as_deref());
    restore_save(&mut console, &save_path);

    let mut wav = args.wav.as_deref().map(output::create_wav).transpose()?;
    let frames = args.frames.or(settings.frames).unwrap_or(DEFAULT_FRAMES);
    info!("Running {frames} frames");

    // Keep whatever the game saved even if emulation stopped early.
    let outcome = run(&mut console, frames, wav.as_mut());
    persist_save(&mut console, &save_path)?;
    if let Some(writer) = wav {
        writer.finalize()?;
    }
    outcome?;

    if let Some(path) = &args.screenshot {
        output::write_png(path, console.framebuffer())?;
        info!("Wrote screenshot to {}", path.display());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use gba_core::bus::Access;

    fn sram_console() -> Console {
        let mut rom = vec![0u8; 0x400];
        rom[0xB2] = 0x96;
        rom[0x200..0x209].copy_from_slice(b"SRAM_V113");
        Console::new(rom).unwrap()
    }

    #[test]
    fn clean_save_is_not_written() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("game.sav");
        let mut console = sram_console();
        persist_save(&mut console, &path).unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn dirty_save_round_trips_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("saves").join("game.sav");
        let mut console = sram_console();
        console.bus.write8(0x0E00_0004, 0x42, Access::NonSeq);
        persist_save(&mut console, &path).unwrap();
        assert!(!console.save_dirty());
        assert_eq!(fs::read(&path).unwrap().len(), 0x8000);

        let mut restored = sram_console();
        restore_save(&mut restored, &path);
        assert_eq!(restored.bus.read8(0x0E00_0004, Access::NonSeq), 0x42);
    }
}
