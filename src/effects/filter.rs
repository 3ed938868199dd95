//! Biquad filters (Audio EQ Cookbook).

use std::f64::consts::PI;

use crate::audio::buffer::AudioBuffer;

const BUTTERWORTH_Q: f64 = std::f64::consts::FRAC_1_SQRT_2;

#[derive(Debug, Clone, Copy)]
pub struct BiquadCoeffs {
    pub b0: f64,
    pub b1: f64,
    pub b2: f64,
    pub a1: f64,
    pub a2: f64,
}

impl BiquadCoeffs {
    pub fn lowpass(cutoff: f64, q: f64, sample_rate: f64) -> Self {
        let (cos_omega, alpha) = omega_terms(cutoff, q, sample_rate);
        Self::normalized(
            (1.0 - cos_omega) / 2.0,
            1.0 - cos_omega,
            (1.0 - cos_omega) / 2.0,
            1.0 + alpha,
            -2.0 * cos_omega,
            1.0 - alpha,
        )
    }

    pub fn highpass(cutoff: f64, q: f64, sample_rate: f64) -> Self {
        let (cos_omega, alpha) = omega_terms(cutoff, q, sample_rate);
        Self::normalized(
            (1.0 + cos_omega) / 2.0,
            -(1.0 + cos_omega),
            (1.0 + cos_omega) / 2.0,
            1.0 + alpha,
            -2.0 * cos_omega,
            1.0 - alpha,
        )
    }

    /// Peaking EQ band; positive `db_gain` boosts around `frequency`.
    pub fn peaking_eq(frequency: f64, q: f64, db_gain: f64, sample_rate: f64) -> Self {
        let a = 10.0_f64.powf(db_gain / 40.0);
        let (cos_omega, alpha) = omega_terms(frequency, q, sample_rate);
        Self::normalized(
            1.0 + alpha * a,
            -2.0 * cos_omega,
            1.0 - alpha * a,
            1.0 + alpha / a,
            -2.0 * cos_omega,
            1.0 - alpha / a,
        )
    }

    fn normalized(b0: f64, b1: f64, b2: f64, a0: f64, a1: f64, a2: f64) -> Self {
        Self {
            b0: b0 / a0,
            b1: b1 / a0,
            b2: b2 / a0,
            a1: a1 / a0,
            a2: a2 / a0,
        }
    }
}

/// Clamps frequency below Nyquist and Q to a stable range, returns (cos ω, α).
fn omega_terms(frequency: f64, q: f64, sample_rate: f64) -> (f64, f64) {
    let frequency = frequency.clamp(10.0, sample_rate * 0.45);
    let q = q.clamp(0.1, 10.0);
    let omega = 2.0 * PI * frequency / sample_rate;
    (omega.cos(), omega.sin() / (2.0 * q))
}

/// Direct form I biquad with f64 state.
#[derive(Debug, Clone)]
pub struct BiquadFilter {
    coeffs: BiquadCoeffs,
    x1: f64,
    x2: f64,
    y1: f64,
    y2: f64,
}

impl BiquadFilter {
    pub fn new(coeffs: BiquadCoeffs) -> Self {
        Self {
            coeffs,
            x1: 0.0,
            x2: 0.0,
            y1: 0.0,
            y2: 0.0,
        }
    }

    #[inline]
    pub fn process(&mut self, input: f64) -> f64 {
        let c = &self.coeffs;
        let output = c.b0 * input + c.b1 * self.x1 + c.b2 * self.x2 - c.a1 * self.y1 - c.a2 * self.y2;
        self.x2 = self.x1;
        self.x1 = input;
        self.y2 = self.y1;
        self.y1 = output;
        output
    }
}

/// Runs every channel through its own copy of the filter.
fn filter_channels(audio: &AudioBuffer, coeffs: BiquadCoeffs) -> AudioBuffer {
    let channels = audio
        .channels()
        .iter()
        .map(|channel| {
            let mut filter = BiquadFilter::new(coeffs);
            channel
                .iter()
                .map(|&s| filter.process(s as f64) as f32)
                .collect()
        })
        .collect();
    audio.with_channels(channels)
}

pub fn high_pass(audio: &AudioBuffer, cutoff_hz: f32) -> AudioBuffer {
    let sr = audio.sample_rate() as f64;
    filter_channels(audio, BiquadCoeffs::highpass(cutoff_hz as f64, BUTTERWORTH_Q, sr))
}

pub fn low_pass(audio: &AudioBuffer, cutoff_hz: f32) -> AudioBuffer {
    let sr = audio.sample_rate() as f64;
    filter_channels(audio, BiquadCoeffs::lowpass(cutoff_hz as f64, BUTTERWORTH_Q, sr))
}

pub fn peaking_eq(audio: &AudioBuffer, freq_hz: f32, gain_db: f32, q: f32) -> AudioBuffer {
    let sr = audio.sample_rate() as f64;
    let gain_db = (gain_db as f64).clamp(-24.0, 24.0);
    filter_channels(audio, BiquadCoeffs::peaking_eq(freq_hz as f64, q as f64, gain_db, sr))
}
