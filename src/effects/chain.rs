use crate::audio::buffer::AudioBuffer;
use crate::error::{MixError, Result};
use crate::themes::catalog::{Stage, ThemeProfile};

use super::{dynamics, filter, reverb};

/// A theme's stages applied in declared order to one segment.
///
/// Every stage returns a fresh buffer, so a chain can be shared across
/// worker threads and the caller's segment is never modified.
#[derive(Clone, Copy, Debug)]
pub struct EffectsChain {
    profile: &'static ThemeProfile,
}

impl EffectsChain {
    pub fn new(profile: &'static ThemeProfile) -> Self {
        debug_assert!(matches!(profile.stages.last(), Some(Stage::Limiter { .. })));
        Self { profile }
    }

    pub fn profile(&self) -> &'static ThemeProfile {
        self.profile
    }

    pub fn process(&self, segment: &AudioBuffer) -> Result<AudioBuffer> {
        let mut current = apply_stage(segment, &self.profile.stages[0]);
        check_finite(&current, &self.profile.stages[0])?;
        for stage in &self.profile.stages[1..] {
            current = apply_stage(&current, stage);
            check_finite(&current, stage)?;
        }
        Ok(current)
    }
}

fn check_finite(audio: &AudioBuffer, stage: &Stage) -> Result<()> {
    if audio.is_finite() {
        Ok(())
    } else {
        Err(MixError::NumericOverflow { stage: stage.name() })
    }
}

pub fn apply_stage(audio: &AudioBuffer, stage: &Stage) -> AudioBuffer {
    match *stage {
        Stage::HighPass { cutoff_hz } => filter::high_pass(audio, cutoff_hz),
        Stage::LowPass { cutoff_hz } => filter::low_pass(audio, cutoff_hz),
        Stage::Eq { freq_hz, gain_db, q } => filter::peaking_eq(audio, freq_hz, gain_db, q),
        Stage::Compressor {
            threshold_db,
            ratio,
            attack_ms,
            release_ms,
        } => dynamics::compress(audio, threshold_db, ratio, attack_ms, release_ms),
        Stage::Reverb {
            room_size,
            damping,
            wet_level,
        } => reverb::reverb(audio, room_size, damping, wet_level),
        Stage::Gain { gain_db } => dynamics::gain(audio, gain_db),
        Stage::Limiter { threshold_db } => dynamics::limit(audio, threshold_db),
    }
}
