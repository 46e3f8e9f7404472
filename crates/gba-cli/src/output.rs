use gba_core::apu::SAMPLE_RATE;
use gba_core::{SCREEN_HEIGHT, SCREEN_WIDTH};
use std::error::Error;
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::Path;

pub type WavWriter = hound::WavWriter<BufWriter<File>>;

fn create_parent(path: &Path) -> std::io::Result<()> {
    if let Some(parent) = path
        .parent()
        .and_then(|p| (!p.as_os_str().is_empty()).then_some(p))
    {
        fs::create_dir_all(parent)?;
    }
    Ok(())
}

/// Write a 0x00RRGGBB framebuffer as an 8-bit RGB PNG.
pub fn write_png(path: &Path, framebuffer: &[u32]) -> Result<(), Box<dyn Error>> {
    create_parent(path)?;
    let file = BufWriter::new(File::create(path)?);
    let mut encoder = png::Encoder::new(file, SCREEN_WIDTH as u32, SCREEN_HEIGHT as u32);
    encoder.set_color(png::ColorType::Rgb);
    encoder.set_depth(png::BitDepth::Eight);
    let mut writer = encoder.write_header()?;

    let data: Vec<u8> = framebuffer
        .iter()
        .flat_map(|&px| [(px >> 16) as u8, (px >> 8) as u8, px as u8])
        .collect();
    writer.write_image_data(&data)?;
    writer.finish()?;
    Ok(())
}

/// 16-bit stereo at the core's native rate.
pub fn create_wav(path: &Path) -> Result<WavWriter, Box<dyn Error>> {
    create_parent(path)?;
    let spec = hound::WavSpec {
        channels: 2,
        sample_rate: SAMPLE_RATE,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    Ok(hound::WavWriter::create(path, spec)?)
}

pub fn write_samples(writer: &mut WavWriter, samples: &[i16]) -> hound::Result<()> {
    for &sample in samples {
        writer.write_sample(sample)?;
    }
    Ok(())
}
