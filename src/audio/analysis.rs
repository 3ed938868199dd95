use rustfft::{num_complex::Complex, FftPlanner};

use super::buffer::AudioBuffer;
use super::features::{ActivityInterval, AnalysisConfig, AnalysisResult};

/// Energy, onset and tempo analysis over a whole recording.
///
/// Runs as one sequential pass: the activity threshold is a percentile of the
/// complete envelope, so nothing can be emitted before the last frame is seen.
pub struct ContentAnalyzer {
    config: AnalysisConfig,
}

impl ContentAnalyzer {
    pub fn new(config: AnalysisConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    pub fn analyze(&self, audio: &AudioBuffer) -> AnalysisResult {
        let cfg = &self.config;
        let samples = audio.mixdown();
        let sr = audio.sample_rate();
        let frame_duration = cfg.hop_size as f64 / sr as f64;

        log::info!("Pass 1: Envelope and spectral flux...");
        let (envelope, onset_strength) = envelope_and_flux(&samples, cfg.frame_size, cfg.hop_size);

        log::info!("Pass 2: Onsets and tempo ({} frames)...", envelope.len());
        let onsets = detect_onsets(&onset_strength, frame_duration, cfg);
        let tempo_bpm = estimate_tempo(&onset_strength, frame_duration, cfg);

        log::info!("Pass 3: Activity intervals (p{:.0})...", cfg.activity_percentile);
        let peak_rms = envelope.iter().copied().fold(0.0f32, f32::max);
        let (threshold, intervals) = if peak_rms < cfg.silence_floor {
            log::warn!(
                "Source is near-silent (peak frame RMS {:.2e}); no activity intervals",
                peak_rms
            );
            (0.0, Vec::new())
        } else {
            let threshold = percentile(&envelope, cfg.activity_percentile) * cfg.activity_margin;
            (threshold, activity_intervals(&envelope, threshold, frame_duration, cfg))
        };

        log::info!(
            "Analysis: peak_rms={:.4}, onsets={}, tempo={}, intervals={}",
            peak_rms,
            onsets.len(),
            tempo_bpm.map_or_else(|| "n/a".to_string(), |t| format!("{:.1} BPM", t)),
            intervals.len()
        );

        AnalysisResult {
            sample_rate: sr,
            duration: audio.duration_secs(),
            frame_size: cfg.frame_size,
            hop_size: cfg.hop_size,
            envelope,
            onset_strength,
            onsets,
            tempo_bpm,
            threshold,
            intervals,
        }
    }
}

/// Per-frame RMS and positive spectral flux. Buffers shorter than one frame
/// are zero-padded to a single frame; non-finite samples read as silence.
fn envelope_and_flux(samples: &[f32], frame_size: usize, hop_size: usize) -> (Vec<f32>, Vec<f32>) {
    let num_frames = if samples.len() <= frame_size {
        1
    } else {
        1 + (samples.len() - frame_size).div_ceil(hop_size)
    };

    let mut planner = FftPlanner::<f32>::new();
    let fft = planner.plan_fft_forward(frame_size);
    let mut scratch = vec![Complex::new(0.0, 0.0); fft.get_inplace_scratch_len()];
    let hann = hann_window(frame_size);
    let half = frame_size / 2;
    let norm = 1.0 / half as f32;

    let mut envelope = Vec::with_capacity(num_frames);
    let mut flux = Vec::with_capacity(num_frames);
    let mut prev_magnitudes = vec![0.0f32; half];
    let mut buffer = vec![Complex::new(0.0f32, 0.0); frame_size];

    for frame in 0..num_frames {
        let pos = frame * hop_size;
        let mut energy = 0.0f32;
        for (i, slot) in buffer.iter_mut().enumerate() {
            let s = samples.get(pos + i).copied().filter(|s| s.is_finite()).unwrap_or(0.0);
            energy += s * s;
            *slot = Complex::new(s * hann[i], 0.0);
        }
        envelope.push((energy / frame_size as f32).sqrt());

        fft.process_with_scratch(&mut buffer, &mut scratch);

        let mut frame_flux = 0.0f32;
        for (bin, prev) in buffer[..half].iter().zip(prev_magnitudes.iter_mut()) {
            let magnitude = bin.norm() * norm;
            frame_flux += (magnitude - *prev).max(0.0);
            *prev = magnitude;
        }
        // The first frame has no predecessor to diff against.
        flux.push(if frame == 0 { 0.0 } else { frame_flux });
    }

    (envelope, flux)
}

/// Local maxima of the flux above a rolling-median threshold.
fn detect_onsets(flux: &[f32], frame_duration: f64, cfg: &AnalysisConfig) -> Vec<f64> {
    let n = flux.len();
    let mut onsets: Vec<f64> = Vec::new();
    let mut window: Vec<f32> = Vec::with_capacity(2 * cfg.onset_median_radius + 1);

    for i in 0..n {
        let start = i.saturating_sub(cfg.onset_median_radius);
        let end = (i + cfg.onset_median_radius + 1).min(n);
        window.clear();
        window.extend_from_slice(&flux[start..end]);
        window.sort_by(|a, b| a.total_cmp(b));
        let median = window[window.len() / 2];
        let threshold = median * cfg.onset_multiplier + cfg.onset_offset;

        if flux[i] <= threshold {
            continue;
        }
        let is_peak = (i == 0 || flux[i] >= flux[i - 1]) && (i + 1 == n || flux[i] > flux[i + 1]);
        if !is_peak {
            continue;
        }
        let time = i as f64 * frame_duration;
        let far_enough = onsets.last().map_or(true, |&last| time - last >= cfg.min_onset_gap);
        if far_enough {
            onsets.push(time);
        }
    }

    onsets
}

/// Autocorrelation of the mean-removed onset strength; the strongest local
/// peak inside the tempo range wins if it clears `min_tempo_strength`.
fn estimate_tempo(flux: &[f32], frame_duration: f64, cfg: &AnalysisConfig) -> Option<f64> {
    let n = flux.len();
    let min_lag = ((60.0 / cfg.max_tempo_bpm) / frame_duration).round().max(1.0) as usize;
    let max_lag = ((60.0 / cfg.min_tempo_bpm) / frame_duration).round() as usize;
    if max_lag + 2 >= n || min_lag > max_lag {
        return None;
    }

    let mean = flux.iter().map(|&f| f as f64).sum::<f64>() / n as f64;
    let centered: Vec<f64> = flux.iter().map(|&f| f as f64 - mean).collect();
    let energy: f64 = centered.iter().map(|x| x * x).sum();
    if energy <= 1e-12 {
        return None;
    }

    let autocorr = |lag: usize| -> f64 {
        centered[..n - lag]
            .iter()
            .zip(&centered[lag..])
            .map(|(a, b)| a * b)
            .sum::<f64>()
            / energy
    };

    let lo = min_lag.saturating_sub(1).max(1);
    let hi = max_lag + 1;
    let values: Vec<f64> = (lo..=hi).map(autocorr).collect();

    let mut best: Option<(usize, f64)> = None;
    for lag in min_lag..=max_lag {
        let idx = lag - lo;
        let r = values[idx];
        let left = if idx > 0 { values[idx - 1] } else { f64::MIN };
        let right = values.get(idx + 1).copied().unwrap_or(f64::MIN);
        if r >= left && r >= right && best.map_or(true, |(_, b)| r > b) {
            best = Some((lag, r));
        }
    }

    let (lag, strength) = best?;
    if strength < cfg.min_tempo_strength as f64 {
        return None;
    }
    Some(60.0 / (lag as f64 * frame_duration))
}

/// Linear-interpolated percentile (0-100).
pub(crate) fn percentile(values: &[f32], pct: f64) -> f32 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let rank = (pct.clamp(0.0, 100.0) / 100.0) * (sorted.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    let frac = (rank - lower as f64) as f32;
    sorted[lower] + (sorted[upper] - sorted[lower]) * frac
}

fn activity_intervals(
    envelope: &[f32],
    threshold: f32,
    frame_duration: f64,
    cfg: &AnalysisConfig,
) -> Vec<ActivityInterval> {
    let bridge = (cfg.merge_gap / frame_duration).round() as usize;

    // Runs of above-threshold frames as inclusive (first, last) pairs.
    let mut runs: Vec<(usize, usize)> = Vec::new();
    for (i, &e) in envelope.iter().enumerate() {
        if e <= threshold {
            continue;
        }
        match runs.last_mut() {
            Some((_, last)) if i - *last - 1 <= bridge => *last = i,
            _ => runs.push((i, i)),
        }
    }

    runs.into_iter()
        .filter_map(|(first, last)| {
            let start = first as f64 * frame_duration;
            let end = (last + 1) as f64 * frame_duration;
            let duration = end - start;
            if duration < cfg.min_interval {
                return None;
            }
            let frames = &envelope[first..=last];
            let energy = frames.iter().sum::<f32>() / frames.len() as f32;
            Some(ActivityInterval {
                start,
                end,
                energy,
                score: energy as f64 * duration,
            })
        })
        .collect()
}

fn hann_window(size: usize) -> Vec<f32> {
    (0..size)
        .map(|i| {
            0.5 * (1.0 - (2.0 * std::f32::consts::PI * i as f32 / (size - 1) as f32).cos())
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SR: u32 = 8000;

    fn tone(secs: f64, freq: f32, amp: f32) -> Vec<f32> {
        let n = (secs * SR as f64) as usize;
        (0..n)
            .map(|i| amp * (2.0 * std::f32::consts::PI * freq * i as f32 / SR as f32).sin())
            .collect()
    }

    fn analyze(samples: Vec<f32>) -> AnalysisResult {
        let audio = AudioBuffer::mono(samples, SR).unwrap();
        ContentAnalyzer::new(AnalysisConfig::default()).analyze(&audio)
    }

    #[test]
    fn silent_input_is_degenerate() {
        let result = analyze(vec![0.0; SR as usize * 30]);
        assert!(result.is_degenerate());
        assert!(result.onsets.is_empty());
        assert_eq!(result.tempo_bpm, None);
    }

    #[test]
    fn shorter_than_one_frame_yields_single_frame() {
        let result = analyze(vec![0.5; 100]);
        assert_eq!(result.envelope.len(), 1);
        assert!(result.intervals.is_empty());
    }

    #[test]
    fn finds_loud_burst_interval() {
        let mut samples = tone(40.0, 250.0, 0.01);
        let burst = tone(5.0, 440.0, 0.8);
        let offset = 8 * SR as usize;
        samples[offset..offset + burst.len()].copy_from_slice(&burst);

        let result = analyze(samples);
        assert_eq!(result.intervals.len(), 1, "{:?}", result.intervals);
        let interval = &result.intervals[0];
        assert!((interval.start - 8.0).abs() < 0.5, "start {}", interval.start);
        assert!((interval.end - 13.0).abs() < 0.5, "end {}", interval.end);
        assert!(interval.score > 0.0);
        assert!(!result.onsets.is_empty());
        assert!(result.onsets.iter().any(|&t| (t - 8.0).abs() < 0.5));
    }

    #[test]
    fn detects_click_track_tempo() {
        // Clicks every 0.512 s (~117 BPM), eight analysis hops apart at 8 kHz
        let mut samples = vec![0.0f32; SR as usize * 20];
        let click = tone(0.01, 1000.0, 0.9);
        let period = 8 * 512;
        let mut pos = 2000;
        while pos + click.len() < samples.len() {
            samples[pos..pos + click.len()].copy_from_slice(&click);
            pos += period;
        }

        let result = analyze(samples);
        let tempo = result.tempo_bpm.expect("tempo should be detected");
        assert!((tempo - 117.2).abs() < 2.0, "tempo {}", tempo);
        assert!(result.onsets.len() >= 20, "onsets {}", result.onsets.len());
    }

    #[test]
    fn percentile_interpolates() {
        let values = [0.0, 1.0, 2.0, 3.0, 4.0];
        assert_eq!(percentile(&values, 0.0), 0.0);
        assert_eq!(percentile(&values, 50.0), 2.0);
        assert_eq!(percentile(&values, 75.0), 3.0);
        assert!((percentile(&values, 90.0) - 3.6).abs() < 1e-6);
    }

    #[test]
    fn short_intervals_are_discarded() {
        let mut samples = tone(20.0, 250.0, 0.01);
        let blip = tone(0.3, 440.0, 0.8);
        let offset = 5 * SR as usize;
        samples[offset..offset + blip.len()].copy_from_slice(&blip);
        assert!(analyze(samples).intervals.is_empty());
    }
}
