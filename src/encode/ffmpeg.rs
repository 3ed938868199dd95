use anyhow::{Context, Result};
use std::io::Write;
use std::path::Path;
use std::process::{Child, Command, Stdio};

use mixcast::audio::buffer::AudioBuffer;

/// Frames written to ffmpeg per pipe write.
const CHUNK_FRAMES: usize = 16384;

/// Streams raw f32 PCM into an ffmpeg child process for compressed formats.
pub struct FfmpegEncoder {
    child: Child,
}

impl FfmpegEncoder {
    pub fn new(output_path: &Path, sample_rate: u32, channels: usize, codec: &str, bitrate: Option<&str>) -> Result<Self> {
        let mut args = vec![
            "-y".to_string(),
            "-f".into(), "f32le".into(),
            "-ar".into(), sample_rate.to_string(),
            "-ac".into(), channels.to_string(),
            "-i".into(), "pipe:0".into(),
            "-c:a".into(), codec.to_string(),
        ];
        if let Some(br) = bitrate {
            args.extend(["-b:a".to_string(), br.to_string()]);
        }

        let child = Command::new("ffmpeg")
            .args(&args)
            .arg(output_path)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .context("Failed to spawn ffmpeg. Is ffmpeg installed?")?;

        log::info!("FFmpeg encoder started: {}Hz, {} ch, codec={}", sample_rate, channels, codec);

        Ok(Self { child })
    }

    pub fn write_samples(&mut self, interleaved: &[f32]) -> Result<()> {
        let stdin = self.child.stdin.as_mut().context("FFmpeg stdin not available")?;
        let bytes: Vec<u8> = interleaved.iter().flat_map(|s| s.to_le_bytes()).collect();
        stdin.write_all(&bytes).context("Failed to write samples to ffmpeg")?;
        Ok(())
    }

    pub fn finish(mut self) -> Result<()> {
        // Close stdin to signal EOF
        drop(self.child.stdin.take());

        let output = self.child.wait_with_output().context("Failed to wait for ffmpeg")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("FFmpeg exited with error:\n{}", stderr);
        }

        log::info!("FFmpeg encoding complete");
        Ok(())
    }
}

/// Codec and default bitrate ffmpeg should use for an output extension.
pub fn codec_for(path: &Path) -> Option<(&'static str, Option<&'static str>)> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "mp3" => Some(("libmp3lame", Some("320k"))),
        "m4a" | "aac" => Some(("aac", Some("256k"))),
        "ogg" => Some(("libvorbis", Some("192k"))),
        "opus" => Some(("libopus", Some("128k"))),
        "flac" => Some(("flac", None)),
        _ => None,
    }
}

pub fn encode_audio(path: &Path, audio: &AudioBuffer, codec: &str, bitrate: Option<&str>) -> Result<()> {
    let mut encoder = FfmpegEncoder::new(path, audio.sample_rate(), audio.num_channels(), codec, bitrate)?;
    let interleaved = audio.interleaved();
    for chunk in interleaved.chunks(CHUNK_FRAMES * audio.num_channels()) {
        encoder.write_samples(chunk)?;
    }
    encoder.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn picks_codec_from_extension() {
        assert_eq!(codec_for(Path::new("mix.mp3")), Some(("libmp3lame", Some("320k"))));
        assert_eq!(codec_for(Path::new("mix.FLAC")), Some(("flac", None)));
        assert_eq!(codec_for(Path::new("mix.wav")), None);
        assert_eq!(codec_for(Path::new("mix")), None);
    }
}
