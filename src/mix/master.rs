use serde::{Deserialize, Serialize};

use crate::audio::buffer::AudioBuffer;
use crate::effects::dynamics::{self, amp_to_db};
use crate::error::{MixError, Result};

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct MasterConfig {
    /// Gated RMS level the makeup gain aims for (dBFS)
    pub target_loudness_db: f64,
    /// Largest boost or cut the makeup stage may apply (dB)
    pub max_makeup_db: f64,
    /// Final limiter ceiling (dBFS); tighter than every theme limiter
    pub ceiling_db: f32,
    pub block_ms: f64,
    /// Blocks quieter than this are ignored by the loudness estimate (dBFS)
    pub gate_db: f64,
}

impl Default for MasterConfig {
    fn default() -> Self {
        Self {
            target_loudness_db: -16.0,
            max_makeup_db: 12.0,
            ceiling_db: -1.5,
            block_ms: 400.0,
            gate_db: -70.0,
        }
    }
}

impl MasterConfig {
    pub fn validate(&self) -> Result<()> {
        let values = [self.target_loudness_db, self.max_makeup_db, self.block_ms, self.gate_db];
        if values.iter().any(|v| !v.is_finite()) || !self.ceiling_db.is_finite() {
            return Err(MixError::config("mastering levels must be finite"));
        }
        if self.max_makeup_db < 0.0 || self.block_ms <= 0.0 {
            return Err(MixError::config("max_makeup_db must be non-negative and block_ms positive"));
        }
        if self.ceiling_db > 0.0 {
            return Err(MixError::config(format!("ceiling {} dBFS is above full scale", self.ceiling_db)));
        }
        Ok(())
    }
}

/// Levels measured around mastering.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct MasterReport {
    /// `None` when every block fell below the gate
    pub loudness_before_db: Option<f64>,
    pub loudness_after_db: Option<f64>,
    pub makeup_gain_db: f64,
    pub peak_db: f64,
}

/// Makeup gain toward a loudness target followed by one brick-wall limiter.
/// Runs once on the assembled mix.
pub struct MasteringChain {
    config: MasterConfig,
}

impl MasteringChain {
    pub fn new(config: MasterConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &MasterConfig {
        &self.config
    }

    pub fn process(&self, mix: &AudioBuffer) -> Result<(AudioBuffer, MasterReport)> {
        let cfg = &self.config;
        let before = gated_loudness(mix, cfg.block_ms, cfg.gate_db);
        let makeup = before.map_or(0.0, |level| {
            (cfg.target_loudness_db - level).clamp(-cfg.max_makeup_db, cfg.max_makeup_db)
        });
        log::info!(
            "Mastering: loudness {}, makeup {:+.1} dB, ceiling {:.1} dBFS",
            before.map_or("silent".to_string(), |l| format!("{:.1} dBFS", l)),
            makeup,
            cfg.ceiling_db
        );

        let boosted = dynamics::gain(mix, makeup as f32);
        let limited = dynamics::limit(&boosted, cfg.ceiling_db);
        if !limited.is_finite() {
            return Err(MixError::NumericOverflow { stage: "master" });
        }

        let report = MasterReport {
            loudness_before_db: before,
            loudness_after_db: gated_loudness(&limited, cfg.block_ms, cfg.gate_db),
            makeup_gain_db: makeup,
            peak_db: amp_to_db(limited.peak() as f64),
        };
        Ok((limited, report))
    }
}

/// Energy-based loudness: mean power of the blocks above the gate, in dBFS.
/// A trailing partial block counts like a full one.
pub fn gated_loudness(audio: &AudioBuffer, block_ms: f64, gate_db: f64) -> Option<f64> {
    let block = ((block_ms * 0.001 * audio.sample_rate() as f64).round() as usize).max(1);
    let channels = audio.num_channels() as f64;
    let frames = audio.num_frames();

    let powers: Vec<f64> = (0..frames)
        .step_by(block)
        .map(|start| {
            let end = (start + block).min(frames);
            let sum: f64 = audio
                .channels()
                .iter()
                .flat_map(|c| c[start..end].iter())
                .map(|&s| (s as f64) * (s as f64))
                .sum();
            sum / ((end - start) as f64 * channels)
        })
        .collect();

    let gate = 10f64.powf(gate_db / 10.0);
    let kept: Vec<f64> = powers.into_iter().filter(|&p| p > gate).collect();
    if kept.is_empty() {
        return None;
    }
    let mean = kept.iter().sum::<f64>() / kept.len() as f64;
    Some(10.0 * mean.log10())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effects::dynamics::db_to_amp;

    const SR: u32 = 8000;

    fn sine(amp: f32, secs: f64) -> AudioBuffer {
        let n = (secs * SR as f64) as usize;
        let samples = (0..n)
            .map(|i| amp * (2.0 * std::f32::consts::PI * 220.0 * i as f32 / SR as f32).sin())
            .collect();
        AudioBuffer::mono(samples, SR).unwrap()
    }

    #[test]
    fn loudness_of_full_scale_sine_is_minus_three() {
        let level = gated_loudness(&sine(1.0, 4.0), 400.0, -70.0).unwrap();
        assert!((level + 3.01).abs() < 0.05, "level {}", level);
    }

    #[test]
    fn silence_is_gated_out() {
        let silent = AudioBuffer::mono(vec![0.0; 16000], SR).unwrap();
        assert_eq!(gated_loudness(&silent, 400.0, -70.0), None);
        let (out, report) = MasteringChain::new(MasterConfig::default()).process(&silent).unwrap();
        assert_eq!(report.makeup_gain_db, 0.0);
        assert_eq!(out, silent);
    }

    #[test]
    fn quiet_mix_is_raised_toward_target() {
        let quiet = sine(0.02, 4.0);
        let (out, report) = MasteringChain::new(MasterConfig::default()).process(&quiet).unwrap();
        // -37 dBFS wants +21 dB; capped at +12
        assert!((report.makeup_gain_db - 12.0).abs() < 1e-9);
        assert!(out.peak() > quiet.peak() * 3.9);
    }

    #[test]
    fn loud_mix_is_brought_down_under_ceiling() {
        let loud = sine(0.5, 4.0);
        let cfg = MasterConfig::default();
        let ceiling = db_to_amp(cfg.ceiling_db as f64) as f32;
        let (out, report) = MasteringChain::new(cfg).process(&loud).unwrap();
        assert!(report.makeup_gain_db < 0.0);
        assert!(out.peak() <= ceiling);
        assert!(report.peak_db <= -1.5 + 1e-6);
        let after = report.loudness_after_db.unwrap();
        assert!((after + 16.0).abs() < 0.5, "after {}", after);
    }
}
