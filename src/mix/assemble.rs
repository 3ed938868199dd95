use std::f64::consts::FRAC_PI_2;

use crate::audio::buffer::AudioBuffer;
use crate::error::{MixError, Result};

const EDGE_FADE_SECS: f64 = 0.010;

/// Joins processed pieces with equal-power crossfades.
///
/// Each join overlaps the tail of one piece with the head of the next by the
/// crossfade length, clamped to half of either piece. Samples outside the
/// overlaps are copied unchanged, except for a short fade at the very start
/// and end of the mix.
#[derive(Clone, Copy, Debug)]
pub struct Assembler {
    crossfade_secs: f64,
}

impl Assembler {
    pub fn new(crossfade_secs: f64) -> Self {
        Self {
            crossfade_secs: crossfade_secs.max(0.0),
        }
    }

    pub fn crossfade_secs(&self) -> f64 {
        self.crossfade_secs
    }

    pub fn assemble(&self, pieces: &[AudioBuffer]) -> Result<AudioBuffer> {
        let first = pieces.first().ok_or(MixError::NoSegments)?;
        let sample_rate = first.sample_rate();
        let num_channels = first.num_channels();
        if let Some(bad) = pieces
            .iter()
            .find(|p| p.sample_rate() != sample_rate || p.num_channels() != num_channels)
        {
            return Err(MixError::input(format!(
                "cannot join {} Hz/{} ch audio onto {} Hz/{} ch",
                bad.sample_rate(),
                bad.num_channels(),
                sample_rate,
                num_channels
            )));
        }

        let xfade = (self.crossfade_secs * sample_rate as f64).round() as usize;
        let mut out: Vec<Vec<f32>> = first.channels().to_vec();
        let mut prev_len = first.num_frames();

        for piece in &pieces[1..] {
            let len = piece.num_frames();
            let overlap = xfade.min(prev_len / 2).min(len / 2);
            let offset = out[0].len() - overlap;
            for (dst, src) in out.iter_mut().zip(piece.channels()) {
                for k in 0..overlap {
                    let (fade_out, fade_in) = equal_power(k, overlap);
                    dst[offset + k] = dst[offset + k] * fade_out + src[k] * fade_in;
                }
                dst.extend_from_slice(&src[overlap..]);
            }
            prev_len = len;
        }

        let edge = ((EDGE_FADE_SECS * sample_rate as f64).round() as usize).min(out[0].len() / 4);
        for channel in &mut out {
            apply_edge_fades(channel, edge);
        }

        log::debug!(
            "Assembled {} pieces into {} frames",
            pieces.len(),
            out[0].len()
        );
        AudioBuffer::new(out, sample_rate)
    }
}

/// Gains for sample `k` of an `n`-sample overlap; their squares sum to one.
fn equal_power(k: usize, n: usize) -> (f32, f32) {
    let t = (k as f64 + 0.5) / n as f64 * FRAC_PI_2;
    (t.cos() as f32, t.sin() as f32)
}

fn apply_edge_fades(channel: &mut [f32], frames: usize) {
    if frames == 0 {
        return;
    }
    let len = channel.len();
    for k in 0..frames {
        let gain = k as f32 / frames as f32;
        channel[k] *= gain;
        channel[len - 1 - k] *= gain;
    }
}
