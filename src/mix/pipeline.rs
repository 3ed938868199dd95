//! End-to-end mix rendering: analyze, select, process segments in parallel,
//! assemble, master.

use std::collections::HashMap;
use std::fmt;
use std::ops::Range;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::audio::analysis::ContentAnalyzer;
use crate::audio::buffer::AudioBuffer;
use crate::audio::features::{AnalysisConfig, AnalysisResult};
use crate::effects::chain::EffectsChain;
use crate::error::{MixError, Result};
use crate::select::segment::{MixPlan, Relaxation, Segment};
use crate::select::selector::{SegmentSelector, SelectionConfig};
use crate::themes::catalog::ThemeId;

use super::assemble::Assembler;
use super::master::{MasterConfig, MasterReport, MasteringChain};

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Segment worker threads; 0 uses every available core
    pub workers: usize,
    pub crossfade_secs: f64,
    pub min_target_secs: f64,
    pub max_target_secs: f64,
    /// How far a segment boundary may move to land on a zero crossing
    pub zero_crossing_ms: f64,
    /// Re-plans allowed after segments fail processing
    pub backfill_rounds: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            workers: 0,
            crossfade_secs: 0.5,
            min_target_secs: 10.0,
            max_target_secs: 1800.0,
            zero_crossing_ms: 5.0,
            backfill_rounds: 3,
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<()> {
        if !self.crossfade_secs.is_finite() || self.crossfade_secs < 0.0 {
            return Err(MixError::config(format!("crossfade {}s must be finite and non-negative", self.crossfade_secs)));
        }
        let bounds_ok = self.min_target_secs.is_finite()
            && self.max_target_secs.is_finite()
            && self.min_target_secs > 0.0
            && self.min_target_secs <= self.max_target_secs;
        if !bounds_ok {
            return Err(MixError::config(format!(
                "target bounds {}-{}s are empty",
                self.min_target_secs, self.max_target_secs
            )));
        }
        if !self.zero_crossing_ms.is_finite() || self.zero_crossing_ms < 0.0 {
            return Err(MixError::config("zero_crossing_ms must be finite and non-negative"));
        }
        Ok(())
    }
}

/// One invocation's inputs. Stingers play without theme processing: the
/// intro before the first segment, the outro after the last and the
/// transition between every pair of segments.
#[derive(Clone, Copy, Debug)]
pub struct MixRequest<'a> {
    pub source: &'a AudioBuffer,
    pub theme: ThemeId,
    pub target_secs: f64,
    pub intro: Option<&'a AudioBuffer>,
    pub outro: Option<&'a AudioBuffer>,
    pub transition: Option<&'a AudioBuffer>,
}

impl<'a> MixRequest<'a> {
    pub fn new(source: &'a AudioBuffer, theme: ThemeId, target_secs: f64) -> Self {
        Self {
            source,
            theme,
            target_secs,
            intro: None,
            outro: None,
            transition: None,
        }
    }

    pub fn with_intro(mut self, intro: &'a AudioBuffer) -> Self {
        self.intro = Some(intro);
        self
    }

    pub fn with_outro(mut self, outro: &'a AudioBuffer) -> Self {
        self.outro = Some(outro);
        self
    }

    pub fn with_transition(mut self, transition: &'a AudioBuffer) -> Self {
        self.transition = Some(transition);
        self
    }

    fn stingers(&self) -> impl Iterator<Item = &'a AudioBuffer> {
        self.intro.into_iter().chain(self.outro).chain(self.transition)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PipelineStage {
    Analyzing,
    Selecting,
    Processing,
    Assembling,
    Mastering,
}

impl PipelineStage {
    pub const COUNT: u64 = 5;

    pub fn index(self) -> u64 {
        self as u64
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PipelineStage::Analyzing => "analyzing",
            PipelineStage::Selecting => "selecting",
            PipelineStage::Processing => "processing segments",
            PipelineStage::Assembling => "assembling",
            PipelineStage::Mastering => "mastering",
        };
        f.write_str(name)
    }
}

/// Description of a rendered mix, written next to the audio by the CLI.
#[derive(Clone, Debug, Serialize)]
pub struct MixMetadata {
    pub theme: ThemeId,
    pub theme_name: &'static str,
    pub sample_rate: u32,
    pub channels: usize,
    /// Source ranges in play order, after zero-crossing snapping
    pub segments: Vec<Segment>,
    pub target_secs: f64,
    pub achieved_secs: f64,
    pub peak: f32,
    pub peak_db: f64,
    pub loudness_before_db: Option<f64>,
    pub loudness_after_db: Option<f64>,
    pub makeup_gain_db: f64,
    pub tempo_bpm: Option<f64>,
    pub onset_count: usize,
    pub relaxation: Relaxation,
    pub shortfall: bool,
    pub degenerate: bool,
    pub dropped_segments: usize,
    pub has_intro: bool,
    pub has_outro: bool,
    /// Transition stingers placed between segments
    pub transitions: usize,
}

#[derive(Clone, Debug)]
pub struct FinalMix {
    pub audio: AudioBuffer,
    pub metadata: MixMetadata,
}

pub struct Pipeline {
    analyzer: ContentAnalyzer,
    selector: SegmentSelector,
    assembler: Assembler,
    master: MasteringChain,
    config: PipelineConfig,
    pool: rayon::ThreadPool,
}

impl Pipeline {
    pub fn new(
        analysis: AnalysisConfig,
        selection: SelectionConfig,
        master: MasterConfig,
        config: PipelineConfig,
    ) -> Result<Self> {
        analysis.validate()?;
        selection.validate()?;
        master.validate()?;
        config.validate()?;
        let tightest = ThemeId::tightest_limiter_db();
        if master.ceiling_db >= tightest {
            return Err(MixError::config(format!(
                "master ceiling {} dBFS must sit below every theme limiter (lowest {} dBFS)",
                master.ceiling_db, tightest
            )));
        }

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.workers)
            .thread_name(|i| format!("mixcast-segment-{}", i))
            .build()?;
        Ok(Self {
            analyzer: ContentAnalyzer::new(analysis),
            selector: SegmentSelector::new(selection, config.crossfade_secs),
            assembler: Assembler::new(config.crossfade_secs),
            master: MasteringChain::new(master),
            config,
            pool,
        })
    }

    pub fn with_defaults() -> Result<Self> {
        Self::new(
            AnalysisConfig::default(),
            SelectionConfig::default(),
            MasterConfig::default(),
            PipelineConfig::default(),
        )
    }

    pub fn workers(&self) -> usize {
        self.pool.current_num_threads()
    }

    pub fn render(&self, request: &MixRequest) -> Result<FinalMix> {
        self.render_observed(request, |_| {})
    }

    /// Renders a mix, reporting each stage to `observer` as it starts.
    pub fn render_observed(&self, request: &MixRequest, mut observer: impl FnMut(PipelineStage)) -> Result<FinalMix> {
        let chain = EffectsChain::new(request.theme.profile());
        self.render_with(request, &mut observer, |_, segment| chain.process(segment))
    }

    fn render_with<F>(&self, request: &MixRequest, observer: &mut dyn FnMut(PipelineStage), process: F) -> Result<FinalMix>
    where
        F: Fn(&Segment, &AudioBuffer) -> Result<AudioBuffer> + Sync,
    {
        let source = request.source;
        let segment_target = self.validate(request)?;

        observer(PipelineStage::Analyzing);
        let analysis = self.analyzer.analyze(source);

        observer(PipelineStage::Selecting);
        let selector = self
            .selector
            .with_interlude(request.transition.map_or(0.0, AudioBuffer::duration_secs));
        let mut plan = selector.plan(&analysis, request.theme, segment_target);

        let radius = ((self.config.zero_crossing_ms * 0.001 * source.sample_rate() as f64).round()) as usize;
        let mut cache: HashMap<(usize, usize), Option<AudioBuffer>> = HashMap::new();
        let mut excluded: Vec<(f64, f64)> = Vec::new();
        let mut round = 0;

        let (segments, pieces) = loop {
            let snapped: Vec<(Segment, Range<usize>)> = plan
                .segments
                .iter()
                .map(|seg| snap_to_zero_crossings(source, seg, radius))
                .collect();

            observer(PipelineStage::Processing);
            let todo: Vec<&(Segment, Range<usize>)> = snapped
                .iter()
                .filter(|(_, range)| !cache.contains_key(&(range.start, range.end)))
                .collect();
            log::info!(
                "Processing {} segments on {} workers ({} cached)",
                todo.len(),
                self.workers(),
                snapped.len() - todo.len()
            );
            let results: Vec<Result<AudioBuffer>> = self.pool.install(|| {
                todo.par_iter()
                    .map(|(seg, range)| process(seg, &source.slice_frames(range.clone())?))
                    .collect()
            });
            for ((seg, range), result) in todo.iter().zip(results) {
                let processed = match result {
                    Ok(audio) => Some(audio),
                    Err(MixError::NumericOverflow { stage }) => {
                        log::warn!(
                            "Dropping segment {:.2}-{:.2}s: {} produced non-finite samples",
                            seg.start,
                            seg.end,
                            stage
                        );
                        None
                    }
                    Err(e) => return Err(e),
                };
                cache.insert((range.start, range.end), processed);
            }

            let failed: Vec<(f64, f64)> = snapped
                .iter()
                .filter(|(_, range)| matches!(cache.get(&(range.start, range.end)), Some(None)))
                .map(|(seg, _)| (seg.start, seg.end))
                .collect();

            if failed.is_empty() || round == self.config.backfill_rounds {
                let mut segments = Vec::with_capacity(snapped.len());
                let mut pieces = Vec::with_capacity(snapped.len());
                for (seg, range) in snapped {
                    if let Some(Some(audio)) = cache.remove(&(range.start, range.end)) {
                        segments.push(seg);
                        pieces.push(audio);
                    }
                }
                break (segments, pieces);
            }

            round += 1;
            log::info!("Backfill round {}: re-planning around {} failed segments", round, failed.len());
            excluded.extend(failed);
            observer(PipelineStage::Selecting);
            plan = selector.plan_excluding(&analysis, request.theme, segment_target, &excluded);
        };

        let dropped = excluded.len() + (plan.segments.len() - segments.len());
        if pieces.is_empty() {
            return Err(MixError::NoSegments);
        }

        observer(PipelineStage::Assembling);
        let transitions = match request.transition {
            Some(_) => pieces.len() - 1,
            None => 0,
        };
        let mut parts: Vec<AudioBuffer> = Vec::with_capacity(2 * pieces.len() + 1);
        parts.extend(request.intro.cloned());
        for (i, piece) in pieces.into_iter().enumerate() {
            if i > 0 {
                parts.extend(request.transition.cloned());
            }
            parts.push(piece);
        }
        parts.extend(request.outro.cloned());
        let assembled = self.assembler.assemble(&parts)?;

        observer(PipelineStage::Mastering);
        let (audio, report) = self.master.process(&assembled)?;

        let metadata = self.metadata(request, &plan, segments, &audio, report, &analysis, dropped, transitions);
        log::info!(
            "Mix ready: {:.1}s from {} segments, peak {:.2} dBFS",
            metadata.achieved_secs,
            metadata.segments.len(),
            metadata.peak_db
        );
        Ok(FinalMix { audio, metadata })
    }

    /// Checks the request and returns the duration left for source segments
    /// once stingers are accounted for.
    fn validate(&self, request: &MixRequest) -> Result<f64> {
        let cfg = &self.config;
        let target = request.target_secs;
        if !target.is_finite() || target < cfg.min_target_secs || target > cfg.max_target_secs {
            return Err(MixError::InvalidTarget {
                secs: target,
                min: cfg.min_target_secs,
                max: cfg.max_target_secs,
            });
        }

        let source = request.source;
        for stinger in request.stingers() {
            if stinger.sample_rate() != source.sample_rate() || stinger.num_channels() != source.num_channels() {
                return Err(MixError::input(format!(
                    "stinger is {} Hz/{} ch but the source is {} Hz/{} ch",
                    stinger.sample_rate(),
                    stinger.num_channels(),
                    source.sample_rate(),
                    source.num_channels()
                )));
            }
            if !stinger.is_finite() {
                return Err(MixError::input("stinger contains non-finite samples"));
            }
        }
        let crossfade = self.assembler.crossfade_secs();
        if let Some(transition) = request.transition {
            if transition.duration_secs() <= 2.0 * crossfade {
                return Err(MixError::input(format!(
                    "transition of {:.2}s must outlast two {:.2}s crossfades",
                    transition.duration_secs(),
                    crossfade
                )));
            }
        }

        let reserved: f64 = request
            .intro
            .into_iter()
            .chain(request.outro)
            .map(|stinger| stinger.duration_secs() - crossfade)
            .sum();

        let remaining = target - reserved;
        if remaining <= 0.0 {
            return Err(MixError::input(format!(
                "stingers take {:.1}s of a {:.1}s target",
                reserved, target
            )));
        }
        Ok(remaining)
    }

    #[allow(clippy::too_many_arguments)]
    fn metadata(
        &self,
        request: &MixRequest,
        plan: &MixPlan,
        segments: Vec<Segment>,
        audio: &AudioBuffer,
        report: MasterReport,
        analysis: &AnalysisResult,
        dropped: usize,
        transitions: usize,
    ) -> MixMetadata {
        let achieved_secs = audio.duration_secs();
        let tolerance = self.selector.config().tolerance;
        let segments = segments
            .into_iter()
            .enumerate()
            .map(|(order, seg)| Segment { order, ..seg })
            .collect();
        MixMetadata {
            theme: request.theme,
            theme_name: request.theme.profile().display_name,
            sample_rate: audio.sample_rate(),
            channels: audio.num_channels(),
            segments,
            target_secs: request.target_secs,
            achieved_secs,
            peak: audio.peak(),
            peak_db: report.peak_db,
            loudness_before_db: report.loudness_before_db,
            loudness_after_db: report.loudness_after_db,
            makeup_gain_db: report.makeup_gain_db,
            tempo_bpm: analysis.tempo_bpm,
            onset_count: analysis.onsets.len(),
            relaxation: plan.relaxation,
            shortfall: plan.shortfall || (request.target_secs - achieved_secs) > tolerance,
            degenerate: plan.degenerate,
            dropped_segments: dropped,
            has_intro: request.intro.is_some(),
            has_outro: request.outro.is_some(),
            transitions,
        }
    }
}

/// Moves both ends of a segment onto nearby zero crossings of the source.
fn snap_to_zero_crossings(source: &AudioBuffer, seg: &Segment, radius: usize) -> (Segment, Range<usize>) {
    let start = source.nearest_zero_crossing(source.secs_to_frame(seg.start), radius);
    let end = source.nearest_zero_crossing(source.secs_to_frame(seg.end), radius);
    let range = if end > start {
        start..end
    } else {
        source.secs_to_frame(seg.start)..source.secs_to_frame(seg.end)
    };
    let snapped = Segment {
        start: source.frame_to_secs(range.start),
        end: source.frame_to_secs(range.end),
        ..seg.clone()
    };
    (snapped, range)
}
