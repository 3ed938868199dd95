use anyhow::{Context, Result};
use std::path::Path;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::DecoderOptions;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use super::buffer::AudioBuffer;

/// Decodes the first audio track of a file, keeping every channel.
pub fn decode_audio(path: &Path) -> Result<AudioBuffer> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("Failed to open audio file: {}", path.display()))?;

    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
        .context("Failed to probe audio format")?;

    let mut format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != symphonia::core::codecs::CODEC_TYPE_NULL)
        .context("No audio tracks found")?;

    let track_id = track.id;
    let mut channels = track.codec_params.channels.map_or(0, |c| c.count());
    let mut sample_rate = track.codec_params.sample_rate.unwrap_or(0);

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .context("Failed to create audio decoder")?;

    let mut interleaved: Vec<f32> = Vec::new();

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(symphonia::core::errors::Error::IoError(ref e))
                if e.kind() == std::io::ErrorKind::UnexpectedEof =>
            {
                break;
            }
            Err(e) => return Err(e.into()),
        };

        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(d) => d,
            Err(symphonia::core::errors::Error::DecodeError(err)) => {
                log::debug!("Skipping corrupt packet: {}", err);
                continue;
            }
            Err(e) => return Err(e.into()),
        };

        // Containers may omit the layout; the first decoded packet carries it.
        let spec = *decoded.spec();
        if channels == 0 {
            channels = spec.channels.count();
        }
        if sample_rate == 0 {
            sample_rate = spec.rate;
        }

        let mut sample_buf = SampleBuffer::<f32>::new(decoded.frames() as u64, spec);
        sample_buf.copy_interleaved_ref(decoded);
        interleaved.extend_from_slice(sample_buf.samples());
    }

    if interleaved.is_empty() {
        anyhow::bail!("No audio decoded from {}", path.display());
    }

    let buffer = AudioBuffer::from_interleaved(&interleaved, channels, sample_rate)
        .with_context(|| format!("Unusable audio in {}", path.display()))?;

    log::info!(
        "Decoded audio: {} frames, {} ch, {}Hz, {:.1}s",
        buffer.num_frames(),
        buffer.num_channels(),
        buffer.sample_rate(),
        buffer.duration_secs()
    );

    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_stereo_wav_without_downmixing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stereo.wav");
        let spec = hound::WavSpec {
            channels: 2,
            sample_rate: 8000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&path, spec).unwrap();
        for _ in 0..4000 {
            writer.write_sample(8192i16).unwrap();
            writer.write_sample(-8192i16).unwrap();
        }
        writer.finalize().unwrap();

        let buf = decode_audio(&path).unwrap();
        assert_eq!(buf.num_channels(), 2);
        assert_eq!(buf.sample_rate(), 8000);
        assert_eq!(buf.num_frames(), 4000);
        assert!((buf.channel(0)[100] - 0.25).abs() < 1e-3);
        assert!((buf.channel(1)[100] + 0.25).abs() < 1e-3);
    }

    #[test]
    fn missing_file_is_an_error() {
        let err = decode_audio(Path::new("/nonexistent/source.mp3")).unwrap_err();
        assert!(err.to_string().contains("Failed to open audio file"));
    }
}
