//! Dynamics processing: compressor, peak limiter and gain trim.

use crate::audio::buffer::AudioBuffer;

const LIMITER_LOOKAHEAD_MS: f64 = 1.5;
const LIMITER_RELEASE_MS: f64 = 50.0;

pub fn amp_to_db(amp: f64) -> f64 {
    20.0 * amp.abs().max(1e-10).log10()
}

pub fn db_to_amp(db: f64) -> f64 {
    10.0_f64.powf(db / 20.0)
}

pub fn gain(audio: &AudioBuffer, gain_db: f32) -> AudioBuffer {
    let factor = db_to_amp(gain_db as f64) as f32;
    audio.with_channels(
        audio
            .channels()
            .iter()
            .map(|c| c.iter().map(|s| s * factor).collect())
            .collect(),
    )
}

/// Feed-forward compressor with a channel-linked RMS envelope follower.
pub fn compress(
    audio: &AudioBuffer,
    threshold_db: f32,
    ratio: f32,
    attack_ms: f32,
    release_ms: f32,
) -> AudioBuffer {
    let sample_rate = audio.sample_rate() as f64;
    let attack_coeff = (-1.0 / (attack_ms.max(0.1) as f64 * 0.001 * sample_rate)).exp();
    let release_coeff = (-1.0 / (release_ms.max(1.0) as f64 * 0.001 * sample_rate)).exp();
    let threshold_db = threshold_db as f64;
    let slope = 1.0 - 1.0 / (ratio.max(1.0) as f64);
    let num_channels = audio.num_channels() as f64;

    let mut envelope = 0.0f64;
    let mut out: Vec<Vec<f32>> = vec![Vec::with_capacity(audio.num_frames()); audio.num_channels()];

    for i in 0..audio.num_frames() {
        let power: f64 = audio.channels().iter().map(|c| (c[i] as f64).powi(2)).sum();
        let level = (power / num_channels).sqrt();

        let coeff = if level > envelope { attack_coeff } else { release_coeff };
        envelope = coeff * envelope + (1.0 - coeff) * level;

        let over_db = amp_to_db(envelope) - threshold_db;
        let gain = if over_db > 0.0 { db_to_amp(-over_db * slope) } else { 1.0 };

        for (dst, src) in out.iter_mut().zip(audio.channels()) {
            dst.push((src[i] as f64 * gain) as f32);
        }
    }

    audio.with_channels(out)
}

/// Look-ahead peak limiter. The output never exceeds `threshold_db`.
///
/// Works offline on the whole buffer: the required gain per frame is
/// smoothed by a release pass forward and an attack ramp backward, both of
/// which can only lower it, then a hard clamp absorbs rounding.
pub fn limit(audio: &AudioBuffer, threshold_db: f32) -> AudioBuffer {
    let ceiling = db_to_amp(threshold_db as f64) as f32;
    let frames = audio.num_frames();
    let sample_rate = audio.sample_rate() as f64;

    let mut gain: Vec<f32> = (0..frames)
        .map(|i| {
            let peak = audio.channels().iter().fold(0.0f32, |acc, c| acc.max(c[i].abs()));
            if peak > ceiling {
                ceiling / peak
            } else {
                1.0
            }
        })
        .collect();

    let release_coeff = (-1.0 / (LIMITER_RELEASE_MS * 0.001 * sample_rate)).exp() as f32;
    for i in 1..frames {
        let recovered = 1.0 - (1.0 - gain[i - 1]) * release_coeff;
        gain[i] = gain[i].min(recovered);
    }

    let lookahead = ((LIMITER_LOOKAHEAD_MS * 0.001 * sample_rate).round() as usize).max(1);
    let step = 1.0 / lookahead as f32;
    for i in (0..frames.saturating_sub(1)).rev() {
        gain[i] = gain[i].min(gain[i + 1] + step);
    }

    audio.with_channels(
        audio
            .channels()
            .iter()
            .map(|c| {
                c.iter()
                    .zip(&gain)
                    .map(|(s, g)| (s * g).clamp(-ceiling, ceiling))
                    .collect()
            })
            .collect(),
    )
}
