use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use mixcast::audio::buffer::AudioBuffer;
use mixcast::mix::pipeline::MixMetadata;

/// Writes the mix as WAV: 16 or 24-bit integer PCM, or 32-bit float.
pub fn write_wav(path: &Path, audio: &AudioBuffer, bit_depth: u16) -> Result<()> {
    let sample_format = match bit_depth {
        16 | 24 => hound::SampleFormat::Int,
        32 => hound::SampleFormat::Float,
        other => anyhow::bail!("Unsupported WAV bit depth {} (expected 16, 24 or 32)", other),
    };
    let spec = hound::WavSpec {
        channels: audio.num_channels() as u16,
        sample_rate: audio.sample_rate(),
        bits_per_sample: bit_depth,
        sample_format,
    };

    let mut writer = hound::WavWriter::create(path, spec)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    let scale = ((1i32 << (bit_depth.min(24) - 1)) - 1) as f32;
    for sample in audio.interleaved() {
        match sample_format {
            hound::SampleFormat::Float => writer.write_sample(sample)?,
            hound::SampleFormat::Int => writer.write_sample((sample.clamp(-1.0, 1.0) * scale).round() as i32)?,
        }
    }
    writer.finalize().context("Failed to finalize WAV file")?;

    log::info!("Wrote {} ({}-bit, {:.1}s)", path.display(), bit_depth, audio.duration_secs());
    Ok(())
}

pub fn sidecar_path(output: &Path) -> PathBuf {
    output.with_extension("json")
}

pub fn write_metadata(path: &Path, metadata: &MixMetadata) -> Result<()> {
    let json = serde_json::to_string_pretty(metadata).context("Failed to serialize mix metadata")?;
    std::fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))?;
    log::info!("Wrote metadata to {}", path.display());
    Ok(())
}
