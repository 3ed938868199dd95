use std::f64::consts::PI;

use mixcast::audio::buffer::AudioBuffer;
use mixcast::effects::dynamics::db_to_amp;
use mixcast::mix::master::MasterConfig;
use mixcast::mix::pipeline::{FinalMix, MixRequest, Pipeline};
use mixcast::select::segment::Relaxation;
use mixcast::themes::catalog::ThemeId;
use mixcast::MixError;

const SR: u32 = 8000;

/// Low hum with loud two-tone bursts `(start, len, amplitude)`.
fn program(secs: f64, bursts: &[(f64, f64, f64)], channels: usize) -> AudioBuffer {
    let n = (secs * SR as f64) as usize;
    let mono: Vec<f32> = (0..n)
        .map(|i| {
            let t = i as f64 / SR as f64;
            let burst = bursts.iter().find(|&&(s, l, _)| t >= s && t < s + l);
            let v = match burst {
                Some(&(_, _, amp)) => amp * (0.6 * (2.0 * PI * 220.0 * t).sin() + 0.4 * (2.0 * PI * 660.0 * t).sin()),
                None => 0.01 * (2.0 * PI * 150.0 * t).sin(),
            };
            v as f32
        })
        .collect();
    let planar = (0..channels)
        .map(|c| mono.iter().map(|s| s * (1.0 - 0.1 * c as f32)).collect())
        .collect();
    AudioBuffer::new(planar, SR).unwrap()
}

/// Uniform white noise at `amplitude` inside the bursts and 0.05 elsewhere.
fn noise_program(secs: f64, bursts: &[(f64, f64)], amplitude: f64) -> AudioBuffer {
    let n = (secs * SR as f64) as usize;
    let mut state: u64 = 0x2545_f491_4f6c_dd1d;
    let samples = (0..n)
        .map(|i| {
            state = state
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            let white = (state >> 33) as f64 / (1u64 << 30) as f64 - 1.0;
            let t = i as f64 / SR as f64;
            let level = if bursts.iter().any(|&(s, l)| t >= s && t < s + l) {
                amplitude
            } else {
                0.05
            };
            (level * white) as f32
        })
        .collect();
    AudioBuffer::mono(samples, SR).unwrap()
}

fn rms(samples: &[f32]) -> f64 {
    (samples.iter().map(|&s| (s as f64) * (s as f64)).sum::<f64>() / samples.len() as f64).sqrt()
}

fn render(source: &AudioBuffer, theme: ThemeId, target: f64) -> FinalMix {
    Pipeline::with_defaults()
        .unwrap()
        .render(&MixRequest::new(source, theme, target))
        .unwrap()
}

fn ceiling() -> f32 {
    db_to_amp(MasterConfig::default().ceiling_db as f64) as f32
}

#[test]
fn three_bursts_make_a_ninety_second_mix() {
    // bursts at 15%, 50% and 85% of a ten-minute source
    let source = program(600.0, &[(90.0, 40.0, 0.8), (300.0, 40.0, 0.7), (510.0, 40.0, 0.6)], 1);
    let mix = render(&source, ThemeId::MediaMeltdown, 90.0);
    let meta = &mix.metadata;

    assert!((2..=4).contains(&meta.segments.len()), "{} segments", meta.segments.len());
    assert!((meta.achieved_secs - 90.0).abs() <= 2.0, "achieved {}", meta.achieved_secs);
    assert!(!meta.shortfall);
    assert!(!meta.degenerate);
    assert_eq!(meta.relaxation, Relaxation::None);

    let mut buckets: Vec<usize> = meta
        .segments
        .iter()
        .map(|s| ((s.start + s.end) / 2.0 / 75.0) as usize)
        .collect();
    buckets.dedup();
    assert_eq!(buckets.len(), meta.segments.len(), "segments share a time bucket");

    for seg in &meta.segments {
        assert!(seg.duration() <= 30.0 + 0.01);
        let in_burst = [(90.0, 130.0), (300.0, 340.0), (510.0, 550.0)]
            .iter()
            .any(|&(s, e)| seg.start >= s - 0.5 && seg.end <= e + 0.5);
        assert!(in_burst, "segment {:.2}-{:.2} outside every burst", seg.start, seg.end);
    }

    assert!(mix.audio.peak() <= ceiling());
    assert!(meta.peak_db <= -1.5 + 1e-6);
}

#[test]
fn segments_are_chronological_and_disjoint() {
    let source = program(
        900.0,
        &[(700.0, 25.0, 0.9), (50.0, 20.0, 0.5), (400.0, 35.0, 0.7), (820.0, 12.0, 0.8)],
        1,
    );
    let mix = render(&source, ThemeId::BestOf, 75.0);
    let segments = &mix.metadata.segments;
    assert!(segments.len() >= 3);
    for pair in segments.windows(2) {
        assert!(pair[0].end <= pair[1].start, "{:?} overlaps {:?}", pair[0], pair[1]);
    }
    for (i, seg) in segments.iter().enumerate() {
        assert_eq!(seg.order, i);
    }
}

#[test]
fn every_theme_respects_the_master_ceiling() {
    let source = program(300.0, &[(30.0, 30.0, 0.95), (200.0, 30.0, 0.9)], 2);
    let pipeline = Pipeline::with_defaults().unwrap();
    for theme in ThemeId::ALL {
        let mix = pipeline.render(&MixRequest::new(&source, theme, 40.0)).unwrap();
        assert!(mix.audio.peak() <= ceiling(), "{}: peak {}", theme, mix.audio.peak());
        assert_eq!(mix.audio.num_channels(), 2);
        assert_eq!(mix.audio.sample_rate(), SR);
        assert!(mix.audio.is_finite());
    }
}

#[test]
fn target_longer_than_source_is_flagged() {
    let source = program(60.0, &[(20.0, 10.0, 0.8)], 1);
    let mix = render(&source, ThemeId::DonationNation, 600.0);
    assert!(mix.metadata.shortfall);
    assert!(mix.metadata.achieved_secs <= 60.0);
    assert!(mix.metadata.achieved_secs > 40.0);
}

#[test]
fn silent_source_falls_back_to_uniform_segments() {
    let source = AudioBuffer::mono(vec![0.0; 300 * SR as usize], SR).unwrap();
    let mix = render(&source, ThemeId::BestOf, 60.0);
    let meta = &mix.metadata;
    assert!(meta.degenerate);
    assert_eq!(meta.relaxation, Relaxation::UniformFallback);
    assert_eq!(meta.segments.len(), 3);
    assert!((meta.achieved_secs - 60.0).abs() <= 2.0, "achieved {}", meta.achieved_secs);
    assert_eq!(meta.loudness_before_db, None);
    assert_eq!(meta.makeup_gain_db, 0.0);
    assert_eq!(mix.audio.peak(), 0.0);
}

#[test]
fn rendering_is_deterministic() {
    let source = program(300.0, &[(40.0, 20.0, 0.7), (150.0, 15.0, 0.9), (240.0, 15.0, 0.6)], 2);
    let first = render(&source, ThemeId::ConspiracyCorner, 50.0);
    let second = render(&source, ThemeId::ConspiracyCorner, 50.0);
    assert_eq!(first.audio, second.audio);
    assert_eq!(first.metadata.segments, second.metadata.segments);
}

#[test]
fn worker_count_does_not_change_the_result() {
    use mixcast::audio::features::AnalysisConfig;
    use mixcast::mix::pipeline::PipelineConfig;
    use mixcast::select::selector::SelectionConfig;

    let source = program(300.0, &[(40.0, 20.0, 0.7), (150.0, 15.0, 0.9), (240.0, 15.0, 0.6)], 1);
    let with_workers = |workers| {
        let config = PipelineConfig {
            workers,
            ..PipelineConfig::default()
        };
        Pipeline::new(AnalysisConfig::default(), SelectionConfig::default(), MasterConfig::default(), config)
            .unwrap()
            .render(&MixRequest::new(&source, ThemeId::MusicalMayhem, 50.0))
            .unwrap()
    };
    assert_eq!(with_workers(1).audio, with_workers(4).audio);
}

#[test]
fn metadata_serializes_for_the_sidecar() {
    let source = program(200.0, &[(60.0, 30.0, 0.8)], 1);
    let mix = render(&source, ThemeId::MediaMeltdown, 25.0);
    let json = serde_json::to_value(&mix.metadata).unwrap();
    assert_eq!(json["theme"], "media-meltdown");
    assert_eq!(json["theme_name"], "Media Meltdown");
    assert_eq!(json["relaxation"], "none");
    assert_eq!(json["segments"].as_array().unwrap().len(), mix.metadata.segments.len());
    assert!(json["achieved_secs"].as_f64().unwrap() > 20.0);
}

#[test]
fn invalid_requests_fail_fast() {
    assert!(matches!(AudioBuffer::mono(vec![], SR).unwrap_err(), MixError::Input(_)));
    assert!(matches!(AudioBuffer::mono(vec![0.0; 10], 0).unwrap_err(), MixError::Input(_)));
    assert!(matches!("polka".parse::<ThemeId>().unwrap_err(), MixError::UnknownTheme(_)));

    let source = program(60.0, &[], 1);
    let err = Pipeline::with_defaults()
        .unwrap()
        .render(&MixRequest::new(&source, ThemeId::BestOf, 3600.0))
        .unwrap_err();
    assert!(matches!(err, MixError::InvalidTarget { .. }));
}

#[test]
fn joins_keep_a_steady_level() {
    let source = noise_program(600.0, &[(90.0, 40.0), (300.0, 40.0), (510.0, 40.0)], 0.5);
    let mix = render(&source, ThemeId::BestOf, 85.0);
    let segments = &mix.metadata.segments;
    assert!(segments.len() >= 2);

    let out = mix.audio.channel(0);
    let xfade = (0.5 * SR as f64) as usize;
    let window = SR as usize / 20;
    let mut start = 0usize;
    for pair in segments.windows(2) {
        start += ((pair[0].end - pair[0].start) * SR as f64).round() as usize - xfade;
        let center = start + xfade / 2;
        let levels: Vec<f64> = (0..40)
            .map(|w| {
                let from = center - SR as usize + w * window;
                rms(&out[from..from + window])
            })
            .collect();
        let loudest = levels.iter().cloned().fold(0.0, f64::max);
        let quietest = levels.iter().cloned().fold(f64::INFINITY, f64::min);
        assert!(
            loudest / quietest < 2.0,
            "level swings {:.4}..{:.4} around the join at {:.2}s",
            quietest,
            loudest,
            center as f64 / SR as f64
        );
        let worst_step = out[center - xfade..center + xfade]
            .windows(2)
            .map(|w| (w[1] - w[0]).abs())
            .fold(0.0f32, f32::max);
        let body_step = out[center - 3 * xfade..center - xfade]
            .windows(2)
            .map(|w| (w[1] - w[0]).abs())
            .fold(0.0f32, f32::max);
        assert!(worst_step <= 1.5 * body_step, "step {} vs {}", worst_step, body_step);
    }
}

#[test]
fn duration_holds_across_targets() {
    // talk spurts of varying loudness separated by short pauses
    let mut bursts = Vec::new();
    let mut t = 1.0;
    let mut k = 0usize;
    while t < 295.0 {
        let len = 3.0 + ((k * 5) % 17) as f64;
        bursts.push((t, len, 0.3 + 0.05 * ((k * 7) % 10) as f64));
        t += len + 0.8 + (k % 3) as f64;
        k += 1;
    }
    let source = program(300.0, &bursts, 1);
    let pipeline = Pipeline::with_defaults().unwrap();
    for target in [61.0, 150.0, 282.0] {
        let mix = pipeline.render(&MixRequest::new(&source, ThemeId::MediaMeltdown, target)).unwrap();
        let meta = &mix.metadata;
        assert!(!meta.shortfall, "target {} flagged short", target);
        assert!(
            (meta.achieved_secs - target).abs() <= 2.0,
            "target {} achieved {}",
            target,
            meta.achieved_secs
        );
        for pair in meta.segments.windows(2) {
            assert!(pair[0].end <= pair[1].start + 0.011);
        }
    }
}
