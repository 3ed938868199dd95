use std::ops::Range;

use crate::error::{MixError, Result};

/// Highest channel count the pipeline accepts.
pub const MAX_CHANNELS: usize = 8;

/// Planar PCM audio. Every constructor enforces a positive sample rate, a
/// supported channel count and equal, non-empty channels.
#[derive(Clone, Debug, PartialEq)]
pub struct AudioBuffer {
    channels: Vec<Vec<f32>>,
    sample_rate: u32,
}

impl AudioBuffer {
    pub fn new(channels: Vec<Vec<f32>>, sample_rate: u32) -> Result<Self> {
        if sample_rate == 0 {
            return Err(MixError::input("sample rate must be positive"));
        }
        if channels.is_empty() || channels.len() > MAX_CHANNELS {
            return Err(MixError::input(format!(
                "unsupported channel count {} (expected 1-{})",
                channels.len(),
                MAX_CHANNELS
            )));
        }
        let frames = channels[0].len();
        if frames == 0 {
            return Err(MixError::input("buffer is empty"));
        }
        if channels.iter().any(|c| c.len() != frames) {
            return Err(MixError::input("channels have different lengths"));
        }
        Ok(Self { channels, sample_rate })
    }

    pub fn mono(samples: Vec<f32>, sample_rate: u32) -> Result<Self> {
        Self::new(vec![samples], sample_rate)
    }

    /// Splits interleaved frames (`L R L R ...`) into planar channels.
    pub fn from_interleaved(samples: &[f32], channels: usize, sample_rate: u32) -> Result<Self> {
        if channels == 0 || channels > MAX_CHANNELS {
            return Err(MixError::input(format!(
                "unsupported channel count {} (expected 1-{})",
                channels, MAX_CHANNELS
            )));
        }
        if samples.len() % channels != 0 {
            return Err(MixError::input("interleaved length is not a multiple of the channel count"));
        }
        let frames = samples.len() / channels;
        let mut planar = vec![Vec::with_capacity(frames); channels];
        for frame in samples.chunks_exact(channels) {
            for (ch, &s) in frame.iter().enumerate() {
                planar[ch].push(s);
            }
        }
        Self::new(planar, sample_rate)
    }

    /// Builds a buffer with this buffer's sample rate from processed channels
    /// of the same shape.
    pub(crate) fn with_channels(&self, channels: Vec<Vec<f32>>) -> Self {
        debug_assert_eq!(channels.len(), self.channels.len());
        debug_assert!(channels.iter().all(|c| c.len() == self.num_frames()));
        Self {
            channels,
            sample_rate: self.sample_rate,
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn num_channels(&self) -> usize {
        self.channels.len()
    }

    pub fn num_frames(&self) -> usize {
        self.channels[0].len()
    }

    pub fn duration_secs(&self) -> f64 {
        self.num_frames() as f64 / self.sample_rate as f64
    }

    pub fn channel(&self, idx: usize) -> &[f32] {
        &self.channels[idx]
    }

    pub fn channels(&self) -> &[Vec<f32>] {
        &self.channels
    }

    pub fn into_channels(self) -> Vec<Vec<f32>> {
        self.channels
    }

    pub fn secs_to_frame(&self, secs: f64) -> usize {
        ((secs.max(0.0) * self.sample_rate as f64).round() as usize).min(self.num_frames())
    }

    pub fn frame_to_secs(&self, frame: usize) -> f64 {
        frame as f64 / self.sample_rate as f64
    }

    /// Averages all channels into one.
    pub fn mixdown(&self) -> Vec<f32> {
        if self.channels.len() == 1 {
            return self.channels[0].clone();
        }
        let scale = 1.0 / self.channels.len() as f32;
        (0..self.num_frames())
            .map(|i| self.channels.iter().map(|c| c[i]).sum::<f32>() * scale)
            .collect()
    }

    /// Copies out a frame range. The range is clamped to the buffer; an empty
    /// result is an input error.
    pub fn slice_frames(&self, range: Range<usize>) -> Result<Self> {
        let end = range.end.min(self.num_frames());
        let start = range.start.min(end);
        Self::new(
            self.channels.iter().map(|c| c[start..end].to_vec()).collect(),
            self.sample_rate,
        )
    }

    /// Largest absolute sample value across all channels.
    pub fn peak(&self) -> f32 {
        self.channels
            .iter()
            .flat_map(|c| c.iter())
            .fold(0.0f32, |acc, s| acc.max(s.abs()))
    }

    pub fn is_finite(&self) -> bool {
        self.channels.iter().all(|c| c.iter().all(|s| s.is_finite()))
    }

    pub fn interleaved(&self) -> Vec<f32> {
        let n = self.num_channels();
        let mut out = Vec::with_capacity(self.num_frames() * n);
        for i in 0..self.num_frames() {
            for c in &self.channels {
                out.push(c[i]);
            }
        }
        out
    }

    /// Frame index nearest to `frame` (within `radius`) where the mixdown
    /// changes sign or is exactly zero. Returns `frame` when none is found.
    pub fn nearest_zero_crossing(&self, frame: usize, radius: usize) -> usize {
        let frames = self.num_frames();
        let frame = frame.min(frames);
        let value = |i: usize| -> f32 { self.channels.iter().map(|c| c[i]).sum() };
        let is_crossing = |i: usize| -> bool {
            if i >= frames {
                return false;
            }
            let cur = value(i);
            if cur == 0.0 {
                return true;
            }
            i > 0 && (value(i - 1) < 0.0) != (cur < 0.0)
        };

        if frame == frames || frame == 0 {
            return frame;
        }
        for offset in 0..=radius {
            if offset <= frame && is_crossing(frame - offset) {
                return frame - offset;
            }
            if is_crossing(frame + offset) {
                return frame + offset;
            }
        }
        frame
    }
}
