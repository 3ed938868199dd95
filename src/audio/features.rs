use serde::{Deserialize, Serialize};

use crate::error::{MixError, Result};

/// Tunables for the content analyzer.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Analysis frame length in samples (FFT size)
    pub frame_size: usize,
    /// Hop between frames in samples
    pub hop_size: usize,
    /// Half-width, in frames, of the rolling median used for onset picking
    pub onset_median_radius: usize,
    /// Onset strength must exceed `median * multiplier + offset`
    pub onset_multiplier: f32,
    pub onset_offset: f32,
    /// Minimum spacing between onsets (seconds)
    pub min_onset_gap: f64,
    pub min_tempo_bpm: f64,
    pub max_tempo_bpm: f64,
    /// Normalized autocorrelation a tempo peak must reach
    pub min_tempo_strength: f32,
    /// Percentile (0-100) of the envelope used as the activity threshold
    pub activity_percentile: f64,
    /// Frames must exceed the percentile level by this ratio
    pub activity_margin: f32,
    /// Dips below threshold shorter than this are bridged (seconds)
    pub merge_gap: f64,
    /// Intervals shorter than this are discarded (seconds)
    pub min_interval: f64,
    /// Loudest-frame RMS below which the source counts as silent
    pub silence_floor: f32,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            frame_size: 2048,
            hop_size: 512,
            onset_median_radius: 8,
            onset_multiplier: 1.5,
            onset_offset: 1e-4,
            min_onset_gap: 0.05,
            min_tempo_bpm: 60.0,
            max_tempo_bpm: 200.0,
            min_tempo_strength: 0.1,
            activity_percentile: 75.0,
            activity_margin: 1.1,
            merge_gap: 0.25,
            min_interval: 1.0,
            silence_floor: 1e-4,
        }
    }
}

impl AnalysisConfig {
    pub fn validate(&self) -> Result<()> {
        if self.frame_size < 2 {
            return Err(MixError::config(format!("frame_size must be at least 2, got {}", self.frame_size)));
        }
        if self.hop_size == 0 {
            return Err(MixError::config("hop_size must be positive"));
        }
        if !(0.0..=100.0).contains(&self.activity_percentile) {
            return Err(MixError::config(format!(
                "activity_percentile must lie in 0-100, got {}",
                self.activity_percentile
            )));
        }
        if !(self.min_tempo_bpm > 0.0 && self.min_tempo_bpm < self.max_tempo_bpm) {
            return Err(MixError::config(format!(
                "tempo range {}-{} BPM is empty",
                self.min_tempo_bpm, self.max_tempo_bpm
            )));
        }
        let finite = [self.min_onset_gap, self.merge_gap, self.min_interval]
            .iter()
            .all(|v| v.is_finite() && *v >= 0.0);
        if !finite {
            return Err(MixError::config("analysis time spans must be finite and non-negative"));
        }
        Ok(())
    }
}

/// A contiguous stretch of above-threshold energy.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ActivityInterval {
    pub start: f64,
    pub end: f64,
    /// Mean frame RMS inside the interval
    pub energy: f32,
    /// `energy * duration`, the ranking key for selection
    pub score: f64,
}

impl ActivityInterval {
    pub fn duration(&self) -> f64 {
        self.end - self.start
    }
}

/// Everything the selector needs to know about one source recording.
#[derive(Clone, Debug)]
pub struct AnalysisResult {
    pub sample_rate: u32,
    pub duration: f64,
    pub frame_size: usize,
    pub hop_size: usize,
    /// Per-frame RMS; frame `i` starts at `i * hop_size` samples
    pub envelope: Vec<f32>,
    /// Per-frame spectral flux
    pub onset_strength: Vec<f32>,
    /// Onset times in seconds, ascending
    pub onsets: Vec<f64>,
    pub tempo_bpm: Option<f64>,
    pub threshold: f32,
    /// High-activity intervals in chronological order
    pub intervals: Vec<ActivityInterval>,
}

impl AnalysisResult {
    pub fn frame_duration(&self) -> f64 {
        self.hop_size as f64 / self.sample_rate as f64
    }

    pub fn frame_time(&self, frame: usize) -> f64 {
        frame as f64 * self.frame_duration()
    }

    /// True when no usable activity was found.
    pub fn is_degenerate(&self) -> bool {
        self.intervals.is_empty()
    }
}
