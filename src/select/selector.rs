//! Greedy segment selection with staged relaxation.
//!
//! Candidates come from the analyzer's activity intervals, shaped to the
//! allowed segment length and ranked by score. They are accepted in rank
//! order in bucket rounds: round `n` lets every timeline bucket hold `n`
//! segments, so a bucket only takes another once no bucket with an eligible
//! candidate has fewer. When a round accepts nothing and the target is still
//! unmet, the minimum gap is dropped, then the remainder is closed by force
//! and finally topped up with unscored filler. If even that falls short, an
//! even tiling of the source replaces the plan when the tiling can reach the
//! target. Segments never overlap in the source and every join costs one
//! crossfade of length.

use serde::Deserialize;

use crate::audio::features::AnalysisResult;
use crate::error::{MixError, Result};
use crate::themes::catalog::ThemeId;

use super::segment::{MixPlan, Relaxation, Segment};

const EPSILON: f64 = 1e-3;

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct SelectionConfig {
    /// Shortest segment normally accepted (seconds)
    pub min_segment: f64,
    pub max_segment: f64,
    /// Required silence between chosen segments in the source (seconds)
    pub min_gap: f64,
    /// Number of equal time buckets used for diversity
    pub buckets: usize,
    /// Allowed distance between achieved and requested duration (seconds)
    pub tolerance: f64,
    /// How far a widened start may move back to meet an onset (seconds)
    pub onset_snap: f64,
}

impl Default for SelectionConfig {
    fn default() -> Self {
        Self {
            min_segment: 10.0,
            max_segment: 30.0,
            min_gap: 5.0,
            buckets: 8,
            tolerance: 2.0,
            onset_snap: 1.0,
        }
    }
}

impl SelectionConfig {
    pub fn validate(&self) -> Result<()> {
        let spans = [self.min_segment, self.max_segment, self.min_gap, self.tolerance, self.onset_snap];
        if spans.iter().any(|v| !v.is_finite() || *v < 0.0) {
            return Err(MixError::config("selection durations must be finite and non-negative"));
        }
        if self.min_segment <= 0.0 || self.min_segment > self.max_segment {
            return Err(MixError::config(format!(
                "segment bounds {}-{}s are empty",
                self.min_segment, self.max_segment
            )));
        }
        if self.buckets == 0 {
            return Err(MixError::config("buckets must be at least 1"));
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
struct Candidate {
    start: f64,
    end: f64,
    score: f64,
    bucket: usize,
}

impl Candidate {
    fn duration(&self) -> f64 {
        self.end - self.start
    }

    fn overlaps(&self, start: f64, end: f64) -> bool {
        self.start < end && start < self.end
    }

    fn distance_to(&self, other: &Candidate) -> f64 {
        if self.end <= other.start {
            other.start - self.end
        } else {
            self.start - other.end
        }
    }
}

#[derive(Clone)]
pub struct SegmentSelector {
    config: SelectionConfig,
    crossfade: f64,
    interlude: f64,
}

impl SegmentSelector {
    /// `crossfade` is the overlap the assembler will spend on each join.
    pub fn new(config: SelectionConfig, crossfade: f64) -> Self {
        let crossfade = crossfade.clamp(0.0, config.min_segment / 2.0);
        Self {
            config,
            crossfade,
            interlude: 0.0,
        }
    }

    /// Selector for mixes that put a stinger of `secs` between every pair of
    /// segments. Each join then adds the stinger less two crossfades.
    pub fn with_interlude(&self, secs: f64) -> Self {
        Self {
            interlude: secs.max(0.0),
            ..self.clone()
        }
    }

    /// Net length one join removes from the mix (negative when an interlude
    /// adds more than its crossfades take).
    fn join(&self) -> f64 {
        if self.interlude > 0.0 {
            2.0 * self.crossfade - self.interlude
        } else {
            self.crossfade
        }
    }

    pub fn config(&self) -> &SelectionConfig {
        &self.config
    }

    pub fn plan(&self, analysis: &AnalysisResult, theme: ThemeId, target_secs: f64) -> MixPlan {
        self.plan_excluding(analysis, theme, target_secs, &[])
    }

    /// Plans a mix that avoids the given source ranges entirely.
    pub fn plan_excluding(
        &self,
        analysis: &AnalysisResult,
        theme: ThemeId,
        target_secs: f64,
        excluded: &[(f64, f64)],
    ) -> MixPlan {
        let duration = analysis.duration;
        let capped = target_secs > duration + EPSILON;
        let goal = target_secs.min(duration).max(0.0);
        let prefix = prefix_sums(&analysis.envelope);
        let mut planner = self.planner(analysis, &prefix, goal, excluded);

        let degenerate = analysis.is_degenerate();
        if degenerate {
            log::warn!("No activity detected; spreading segments uniformly");
            planner.spread_uniformly();
            planner.close(&[]);
        } else {
            let candidates = self.candidates(analysis, &prefix, excluded);
            log::debug!("{} candidates from {} intervals", candidates.len(), analysis.intervals.len());
            planner.run(candidates);
            if planner.need() > self.config.tolerance {
                if let Some(tiled) = self.tile(analysis, &prefix, goal, excluded) {
                    log::info!(
                        "Scored selection reached {:.1}s of {:.1}s; tiling the source evenly",
                        planner.effective(),
                        goal
                    );
                    planner = tiled;
                }
            }
        }

        planner.finish(theme, target_secs, capped, degenerate)
    }

    fn planner<'a>(
        &'a self,
        analysis: &'a AnalysisResult,
        prefix: &'a [f64],
        goal: f64,
        excluded: &'a [(f64, f64)],
    ) -> Planner<'a> {
        Planner {
            config: &self.config,
            analysis,
            prefix,
            crossfade: self.crossfade,
            join: self.join(),
            goal,
            excluded,
            accepted: Vec::new(),
            bucket_counts: vec![0; self.config.buckets.max(1)],
            relaxation: Relaxation::None,
        }
    }

    /// Equal slices of the source, accepted only when they stay disjoint and
    /// meet the goal.
    fn tile<'a>(
        &'a self,
        analysis: &'a AnalysisResult,
        prefix: &'a [f64],
        goal: f64,
        excluded: &'a [(f64, f64)],
    ) -> Option<Planner<'a>> {
        let mut tiled = self.planner(analysis, prefix, goal, excluded);
        tiled.spread_uniformly();
        let disjoint = tiled.accepted.windows(2).all(|w| w[0].end <= w[1].start + EPSILON);
        let playable = tiled.accepted.iter().all(|c| c.duration() > 2.0 * self.crossfade);
        (disjoint && playable && tiled.need().abs() <= self.config.tolerance).then_some(tiled)
    }

    /// Shapes every activity interval to the allowed length range and ranks
    /// the results by score (ties: earlier first).
    fn candidates(&self, analysis: &AnalysisResult, prefix: &[f64], excluded: &[(f64, f64)]) -> Vec<Candidate> {
        let cfg = &self.config;
        let mut out: Vec<Candidate> = analysis
            .intervals
            .iter()
            .filter_map(|interval| {
                let (start, end) = if interval.duration() > cfg.max_segment {
                    densest_window(analysis, prefix, interval.start, interval.end, cfg.max_segment)
                } else if interval.duration() < cfg.min_segment {
                    self.widen(analysis, interval.start, interval.end)
                } else {
                    (interval.start, interval.end)
                };
                if excluded.iter().any(|&(s, e)| start < e && s < end) {
                    return None;
                }
                Some(Candidate {
                    start,
                    end,
                    score: interval.score,
                    bucket: bucket_of(0.5 * (start + end), analysis.duration, cfg.buckets),
                })
            })
            .collect();
        out.sort_by(|a, b| b.score.total_cmp(&a.score).then(a.start.total_cmp(&b.start)));
        out
    }

    /// Grows a short interval symmetrically to the minimum length, keeps it
    /// inside the source and pulls its start back to a nearby onset.
    fn widen(&self, analysis: &AnalysisResult, start: f64, end: f64) -> (f64, f64) {
        let duration = analysis.duration;
        let len = self.config.min_segment.min(duration);
        let pad = 0.5 * (len - (end - start));
        let mut lo = start - pad;
        let mut hi = end + pad;
        if lo < 0.0 {
            hi -= lo;
            lo = 0.0;
        }
        if hi > duration {
            lo = (lo - (hi - duration)).max(0.0);
            hi = duration;
        }

        let idx = analysis.onsets.partition_point(|&t| t <= lo);
        if idx > 0 && analysis.onsets[idx - 1] >= lo - self.config.onset_snap {
            lo = analysis.onsets[idx - 1];
        }
        (lo, hi)
    }
}

struct Planner<'a> {
    config: &'a SelectionConfig,
    analysis: &'a AnalysisResult,
    prefix: &'a [f64],
    crossfade: f64,
    join: f64,
    goal: f64,
    excluded: &'a [(f64, f64)],
    accepted: Vec<Candidate>,
    bucket_counts: Vec<usize>,
    relaxation: Relaxation,
}

impl Planner<'_> {
    /// Mix length the accepted segments yield after crossfading.
    fn effective(&self) -> f64 {
        let total: f64 = self.accepted.iter().map(Candidate::duration).sum();
        total - self.join * self.accepted.len().saturating_sub(1) as f64
    }

    fn need(&self) -> f64 {
        self.goal - self.effective()
    }

    fn join_cost(&self) -> f64 {
        if self.accepted.is_empty() {
            0.0
        } else {
            self.join
        }
    }

    fn is_free(&self, start: f64, end: f64) -> bool {
        !self.accepted.iter().any(|a| a.overlaps(start, end))
            && !self.excluded.iter().any(|&(s, e)| start < e && s < end)
    }

    fn too_close(&self, cand: &Candidate) -> bool {
        self.accepted
            .iter()
            .any(|a| cand.distance_to(a) < self.config.min_gap - EPSILON)
    }

    fn relax_to(&mut self, level: Relaxation) {
        self.relaxation = self.relaxation.max(level);
    }

    fn accept(&mut self, cand: Candidate) {
        log::debug!(
            "Accepted {:.2}-{:.2}s (score {:.3}, bucket {})",
            cand.start,
            cand.end,
            cand.score,
            cand.bucket
        );
        self.bucket_counts[cand.bucket] += 1;
        self.accepted.push(cand);
    }

    fn run(&mut self, candidates: Vec<Candidate>) {
        let mut remaining = candidates;
        // Eligibility only shrinks as segments are accepted, so a round that
        // accepts nothing means no bucket can take another.
        let mut cap = 1;
        while self.need() > EPSILON && self.fill(&mut remaining, Some(cap), true) {
            if cap > 1 {
                self.relax_to(Relaxation::Diversity);
            }
            cap += 1;
        }
        if self.need() > EPSILON && self.fill(&mut remaining, None, false) {
            self.relax_to(Relaxation::Gap);
        }
        self.close(&remaining);
    }

    /// One pass over the ranked candidates. `bucket_cap` bounds how many
    /// segments a bucket may hold after the pass.
    fn fill(&mut self, remaining: &mut Vec<Candidate>, bucket_cap: Option<usize>, gap: bool) -> bool {
        let mut accepted_any = false;
        let mut i = 0;
        while i < remaining.len() && self.need() > EPSILON {
            let cand = remaining[i];
            let allowed = self.is_free(cand.start, cand.end)
                && !(gap && self.too_close(&cand))
                && bucket_cap.map_or(true, |cap| self.bucket_counts[cand.bucket] < cap);
            match allowed.then(|| self.fit(&cand)).flatten() {
                Some(fitted) => {
                    remaining.remove(i);
                    self.accept(fitted);
                    accepted_any = true;
                }
                None => i += 1,
            }
        }
        accepted_any
    }

    /// The candidate itself when it fits the remaining need, otherwise its
    /// densest sub-window of exactly the needed length. A trimmed candidate
    /// must still reach the minimum length.
    fn fit(&self, cand: &Candidate) -> Option<Candidate> {
        let want = self.need() + self.join_cost();
        if cand.duration() <= want + EPSILON {
            return Some(*cand);
        }
        if want < self.config.min_segment {
            return None;
        }
        Some(self.trim(cand, want))
    }

    fn trim(&self, cand: &Candidate, len: f64) -> Candidate {
        let (start, end) = densest_window(self.analysis, self.prefix, cand.start, cand.end, len);
        Candidate { start, end, ..*cand }
    }

    /// Closes a remaining gap larger than the tolerance: stretch accepted
    /// segments, then force-fit the longest unused candidate, then fall back
    /// to unscored audio from free stretches of the source.
    fn close(&mut self, remaining: &[Candidate]) {
        if self.need() <= self.config.tolerance {
            return;
        }
        let mut forced = self.stretch_accepted();
        if self.need() > EPSILON {
            forced |= self.force_fit(remaining);
        }
        if forced {
            self.relax_to(Relaxation::Forced);
        }
        if self.need() > self.config.tolerance && self.fill_free_space() {
            self.relax_to(Relaxation::Filler);
        }
    }

    /// Nearest occupied boundaries around a range, or the source edges.
    fn free_bounds(&self, start: f64, end: f64) -> (f64, f64) {
        let occupied = self
            .accepted
            .iter()
            .map(|a| (a.start, a.end))
            .chain(self.excluded.iter().copied());
        let mut lo = 0.0f64;
        let mut hi = self.analysis.duration;
        for (s, e) in occupied {
            if e <= start {
                lo = lo.max(e);
            }
            if s >= end {
                hi = hi.min(s);
            }
        }
        (lo, hi)
    }

    /// Grows `[start, end)` by up to `amount`, split evenly across both sides
    /// where room allows.
    fn grow(&self, start: f64, end: f64, amount: f64) -> (f64, f64) {
        let (lo, hi) = self.free_bounds(start, end);
        let room_left = (start - lo).max(0.0);
        let room_right = (hi - end).max(0.0);
        let amount = amount.min(room_left + room_right);
        let left = (0.5 * amount).min(room_left);
        let right = (amount - left).min(room_right);
        let left = (amount - right).min(room_left);
        (start - left, end + right)
    }

    fn stretch_accepted(&mut self) -> bool {
        self.accepted.sort_by(|a, b| a.start.total_cmp(&b.start));
        let mut stretched = false;
        for i in 0..self.accepted.len() {
            let need = self.need();
            if need <= EPSILON {
                break;
            }
            let seg = self.accepted[i];
            let amount = need.min(self.config.max_segment - seg.duration());
            if amount <= EPSILON {
                continue;
            }
            let (start, end) = self.grow(seg.start, seg.end, amount);
            if end - start > seg.duration() + EPSILON {
                log::debug!("Stretched {:.2}-{:.2}s to {:.2}-{:.2}s", seg.start, seg.end, start, end);
                self.accepted[i].start = start;
                self.accepted[i].end = end;
                stretched = true;
            }
        }
        stretched
    }

    /// Fits the longest unused candidate to the remaining need exactly. This
    /// closing piece may come out shorter than the minimum length.
    fn force_fit(&mut self, remaining: &[Candidate]) -> bool {
        let best = remaining
            .iter()
            .filter(|c| self.is_free(c.start, c.end))
            .max_by(|a, b| a.duration().total_cmp(&b.duration()).then(b.start.total_cmp(&a.start)))
            .copied();
        let Some(cand) = best else {
            return false;
        };
        let want = self.need() + self.join_cost();
        if want <= 2.0 * self.crossfade + EPSILON {
            return false;
        }
        let fitted = if cand.duration() > want {
            self.trim(&cand, want)
        } else {
            let amount = want.min(self.config.max_segment) - cand.duration();
            let (start, end) = self.grow(cand.start, cand.end, amount);
            Candidate { start, end, ..cand }
        };
        self.accept(fitted);
        true
    }

    /// Tops the plan up with unscored audio: segments grow into free
    /// neighbouring audio, and new pieces are centered in the largest free
    /// stretches. Filler may be shorter than the minimum length but always
    /// outlasts two crossfades.
    fn fill_free_space(&mut self) -> bool {
        let mut added = false;
        while self.need() > self.config.tolerance {
            let grew = self.stretch_accepted();
            added |= grew;
            if self.need() <= self.config.tolerance {
                break;
            }
            if self.place_filler() {
                added = true;
            } else if !grew {
                break;
            }
        }
        added
    }

    fn place_filler(&mut self) -> bool {
        let want = (self.need() + self.join_cost()).min(self.config.max_segment);
        let Some((lo, hi)) = self.largest_free_gap() else {
            return false;
        };
        let len = want.min(hi - lo);
        if len <= 2.0 * self.crossfade + EPSILON {
            return false;
        }
        let start = lo + 0.5 * (hi - lo - len);
        let bucket = bucket_of(start + 0.5 * len, self.analysis.duration, self.config.buckets);
        self.accept(Candidate {
            start,
            end: start + len,
            score: 0.0,
            bucket,
        });
        true
    }

    fn largest_free_gap(&self) -> Option<(f64, f64)> {
        let mut occupied: Vec<(f64, f64)> = self
            .accepted
            .iter()
            .map(|a| (a.start, a.end))
            .chain(self.excluded.iter().copied())
            .collect();
        occupied.sort_by(|a, b| a.0.total_cmp(&b.0));

        let mut best: Option<(f64, f64)> = None;
        let mut consider = |lo: f64, hi: f64| {
            if hi - lo > EPSILON && best.map_or(true, |(s, e)| hi - lo > e - s) {
                best = Some((lo, hi));
            }
        };
        let mut cursor = 0.0f64;
        for (s, e) in occupied {
            if s > cursor {
                consider(cursor, s);
            }
            cursor = cursor.max(e);
        }
        consider(cursor, self.analysis.duration);
        best
    }

    /// Evenly spaced segments for sources without detectable activity. Each
    /// segment is as long as needed so the crossfaded total hits the goal.
    fn spread_uniformly(&mut self) {
        self.relax_to(Relaxation::UniformFallback);
        let duration = self.analysis.duration;
        if self.goal <= EPSILON {
            return;
        }
        let overlap = self.join;
        let max = self.config.max_segment;
        let count = if self.goal <= max {
            1
        } else {
            ((self.goal - overlap) / (max - overlap).max(EPSILON)).ceil() as usize
        };
        let len = ((self.goal + (count - 1) as f64 * overlap) / count as f64).min(duration);
        let slot = duration / count as f64;

        for i in 0..count {
            let start = ((i as f64 + 0.5) * slot - 0.5 * len).clamp(0.0, (duration - len).max(0.0));
            let end = start + len;
            if self.excluded.iter().any(|&(s, e)| start < e && s < end) {
                log::debug!("Skipping excluded range {:.2}-{:.2}s", start, end);
                continue;
            }
            let bucket = bucket_of(start + 0.5 * len, duration, self.config.buckets);
            self.accept(Candidate {
                start,
                end,
                score: 0.0,
                bucket,
            });
        }
    }

    fn finish(mut self, theme: ThemeId, target_secs: f64, capped: bool, degenerate: bool) -> MixPlan {
        self.accepted.sort_by(|a, b| a.start.total_cmp(&b.start));
        let planned_secs = self.effective().max(0.0);
        let shortfall = capped || self.need() > self.config.tolerance;
        if shortfall {
            log::warn!(
                "Mix will run short: {:.1}s planned for a {:.1}s target",
                planned_secs,
                target_secs
            );
        }
        log::info!(
            "Planned {} segments, {:.1}s (relaxation: {:?})",
            self.accepted.len(),
            planned_secs,
            self.relaxation
        );

        MixPlan {
            theme,
            segments: self
                .accepted
                .iter()
                .enumerate()
                .map(|(order, c)| Segment {
                    start: c.start,
                    end: c.end,
                    score: c.score,
                    order,
                })
                .collect(),
            target_secs,
            planned_secs,
            shortfall,
            degenerate,
            relaxation: self.relaxation,
        }
    }
}

fn bucket_of(time: f64, duration: f64, buckets: usize) -> usize {
    let buckets = buckets.max(1);
    if duration <= 0.0 {
        return 0;
    }
    (((time / duration) * buckets as f64).floor().max(0.0) as usize).min(buckets - 1)
}

fn prefix_sums(envelope: &[f32]) -> Vec<f64> {
    let mut sums = Vec::with_capacity(envelope.len() + 1);
    sums.push(0.0);
    let mut acc = 0.0f64;
    for &v in envelope {
        acc += v as f64;
        sums.push(acc);
    }
    sums
}

/// Highest-energy window of `len` seconds inside `[start, end)`, earliest
/// on ties.
fn densest_window(analysis: &AnalysisResult, prefix: &[f64], start: f64, end: f64, len: f64) -> (f64, f64) {
    let frame_dur = analysis.frame_duration();
    let frames = analysis.envelope.len();
    let first = ((start / frame_dur).floor() as usize).min(frames);
    let last = ((end / frame_dur).ceil() as usize).min(frames);
    let width = ((len / frame_dur).round() as usize).max(1);

    let mut best_start = start;
    if last > first + width {
        let mut best_sum = f64::NEG_INFINITY;
        let mut best_frame = first;
        for k in first..=last - width {
            let sum = prefix[k + width] - prefix[k];
            if sum > best_sum {
                best_sum = sum;
                best_frame = k;
            }
        }
        best_start = analysis.frame_time(best_frame);
    }
    let s = best_start.min(end - len).max(start);
    (s, s + len)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::features::ActivityInterval;

    const SR: u32 = 8000;
    const HOP: usize = 512;

    fn analysis(duration: f64, intervals: &[(f64, f64, f32)], onsets: Vec<f64>) -> AnalysisResult {
        let frame_dur = HOP as f64 / SR as f64;
        let frames = (duration / frame_dur).ceil() as usize;
        let envelope = (0..frames)
            .map(|i| {
                let t = i as f64 * frame_dur;
                intervals
                    .iter()
                    .find(|&&(s, e, _)| t >= s && t < e)
                    .map_or(0.01, |&(_, _, energy)| energy)
            })
            .collect();
        AnalysisResult {
            sample_rate: SR,
            duration,
            frame_size: 2048,
            hop_size: HOP,
            envelope,
            onset_strength: vec![0.0; frames],
            onsets,
            tempo_bpm: None,
            threshold: 0.02,
            intervals: intervals
                .iter()
                .map(|&(start, end, energy)| ActivityInterval {
                    start,
                    end,
                    energy,
                    score: energy as f64 * (end - start),
                })
                .collect(),
        }
    }

    fn selector() -> SegmentSelector {
        SegmentSelector::new(SelectionConfig::default(), 0.5)
    }

    fn assert_disjoint_and_ordered(plan: &MixPlan) {
        for (i, pair) in plan.segments.windows(2).enumerate() {
            assert!(pair[0].start <= pair[1].start, "segments out of order at {}", i);
            assert!(pair[0].end <= pair[1].start + 1e-9, "segments overlap at {}", i);
        }
        for (i, seg) in plan.segments.iter().enumerate() {
            assert_eq!(seg.order, i);
        }
    }

    #[test]
    fn picks_best_intervals_from_distinct_buckets() {
        let a = analysis(
            600.0,
            &[(60.0, 100.0, 0.9), (300.0, 340.0, 0.8), (500.0, 540.0, 0.7)],
            vec![],
        );
        let plan = selector().plan(&a, ThemeId::BestOf, 60.0);
        assert_eq!(plan.segments.len(), 2);
        assert!((plan.planned_secs - 59.5).abs() < 0.1, "planned {}", plan.planned_secs);
        assert!(!plan.shortfall);
        assert_eq!(plan.relaxation, Relaxation::None);
        assert!(plan.segments[0].start >= 60.0 && plan.segments[0].end <= 100.0);
        assert!(plan.segments[1].start >= 300.0 && plan.segments[1].end <= 340.0);
        for seg in &plan.segments {
            assert!(seg.duration() <= 30.0 + 1e-9);
        }
        assert_disjoint_and_ordered(&plan);
    }

    #[test]
    fn relaxes_diversity_before_gap() {
        let a = analysis(
            600.0,
            &[(10.0, 40.0, 0.9), (45.0, 75.0, 0.85), (400.0, 430.0, 0.5)],
            vec![],
        );
        let plan = selector().plan(&a, ThemeId::BestOf, 85.0);
        assert_eq!(plan.relaxation, Relaxation::Diversity);
        assert_eq!(plan.segments.len(), 3);
        assert!((plan.planned_secs - 85.0).abs() < 0.01, "planned {}", plan.planned_secs);
        assert!(plan.segments[1].start >= 45.0);
        assert_disjoint_and_ordered(&plan);
    }

    #[test]
    fn relaxes_gap_when_diversity_is_not_enough() {
        let a = analysis(600.0, &[(10.0, 40.0, 0.9), (42.0, 72.0, 0.8)], vec![]);
        let plan = selector().plan(&a, ThemeId::BestOf, 55.0);
        assert_eq!(plan.relaxation, Relaxation::Gap);
        assert_eq!(plan.segments.len(), 2);
        assert!((plan.planned_secs - 55.0).abs() < 0.01);
        assert_disjoint_and_ordered(&plan);
    }

    #[test]
    fn buckets_take_turns_before_any_takes_a_third() {
        // buckets are 100 s wide: three candidates in the first, two in the second
        let a = analysis(
            800.0,
            &[
                (5.0, 25.0, 0.9),
                (35.0, 55.0, 0.88),
                (65.0, 85.0, 0.86),
                (105.0, 125.0, 0.5),
                (135.0, 155.0, 0.48),
            ],
            vec![],
        );
        let plan = selector().plan(&a, ThemeId::BestOf, 78.0);
        let per_bucket = |b: usize| {
            plan.segments
                .iter()
                .filter(|s| (0.5 * (s.start + s.end) / 100.0) as usize == b)
                .count()
        };
        assert_eq!((per_bucket(0), per_bucket(1)), (2, 2), "{:?}", plan.segments);
        assert!(plan.segments.iter().all(|s| s.end <= 65.0 || s.start >= 85.0));
        assert_eq!(plan.relaxation, Relaxation::Diversity);
        assert!((plan.planned_secs - 78.0).abs() < 0.01, "planned {}", plan.planned_secs);
        assert_disjoint_and_ordered(&plan);
    }

    /// Alternating talk and pauses of varying length over five minutes.
    fn conversation() -> AnalysisResult {
        let mut intervals = Vec::new();
        let mut t = 2.0;
        let mut k = 0usize;
        while t < 295.0 {
            let len = 4.0 + ((k * 7) % 23) as f64;
            let energy = 0.2 + 0.05 * ((k * 3) % 11) as f32;
            intervals.push((t, (t + len).min(298.0), energy));
            t += len + 1.0 + (k % 4) as f64 * 1.5;
            k += 1;
        }
        analysis(300.0, &intervals, vec![])
    }

    #[test]
    fn duration_holds_for_every_reachable_target() {
        let a = conversation();
        let sel = selector();
        let (max, xfade) = (30.0, 0.5);
        for target in (10..=295).step_by(9).map(f64::from) {
            let pieces = if target <= max {
                1.0
            } else {
                ((target - xfade) / (max - xfade)).ceil()
            };
            let plan = sel.plan(&a, ThemeId::MediaMeltdown, target);
            assert_disjoint_and_ordered(&plan);
            assert!(plan.segments.iter().all(|s| s.duration() <= max + 1e-6));
            if target + (pieces - 1.0) * xfade <= a.duration {
                assert!(!plan.shortfall, "target {} flagged short at {}", target, plan.planned_secs);
                assert!(
                    (plan.planned_secs - target).abs() <= 2.0,
                    "target {} planned {}",
                    target,
                    plan.planned_secs
                );
            }
        }
    }

    #[test]
    fn interludes_count_toward_the_target() {
        let a = analysis(
            600.0,
            &[(60.0, 90.0, 0.9), (300.0, 330.0, 0.8), (500.0, 530.0, 0.7)],
            vec![],
        );
        // a 5 s stinger at the join adds 4 s once both crossfades are paid
        let plan = selector().with_interlude(5.0).plan(&a, ThemeId::BestOf, 60.0);
        assert_eq!(plan.segments.len(), 2);
        assert!((plan.planned_secs - 60.0).abs() < 0.01, "planned {}", plan.planned_secs);
        let raw: f64 = plan.segments.iter().map(Segment::duration).sum();
        assert!((raw - 56.0).abs() < 0.01, "raw {}", raw);
    }

    #[test]
    fn rejects_inconsistent_config() {
        let ok = SelectionConfig::default();
        assert!(ok.validate().is_ok());
        let swapped = SelectionConfig {
            min_segment: 40.0,
            max_segment: 20.0,
            ..SelectionConfig::default()
        };
        assert!(matches!(swapped.validate(), Err(MixError::Config(_))));
        let no_buckets = SelectionConfig {
            buckets: 0,
            ..SelectionConfig::default()
        };
        assert!(matches!(no_buckets.validate(), Err(MixError::Config(_))));
        let nan_gap = SelectionConfig {
            min_gap: f64::NAN,
            ..SelectionConfig::default()
        };
        assert!(nan_gap.validate().is_err());
    }

    #[test]
    fn target_beyond_source_is_flagged() {
        let a = analysis(60.0, &[(5.0, 20.0, 0.9), (35.0, 50.0, 0.8)], vec![]);
        let plan = selector().plan(&a, ThemeId::DonationNation, 600.0);
        assert!(plan.shortfall);
        assert!(plan.planned_secs <= 60.0);
        assert!(plan.planned_secs > 40.0);
        assert_disjoint_and_ordered(&plan);
    }

    #[test]
    fn silent_source_spreads_segments_uniformly() {
        let a = analysis(300.0, &[], vec![]);
        let plan = selector().plan(&a, ThemeId::BestOf, 60.0);
        assert!(plan.degenerate);
        assert_eq!(plan.relaxation, Relaxation::UniformFallback);
        assert_eq!(plan.segments.len(), 3);
        assert!((plan.planned_secs - 60.0).abs() < 1e-6);
        for seg in &plan.segments {
            assert!((seg.duration() - 61.0 / 3.0).abs() < 1e-6);
        }
        assert_disjoint_and_ordered(&plan);
    }

    #[test]
    fn sparse_activity_is_topped_up_with_filler() {
        let a = analysis(600.0, &[(100.0, 130.0, 0.9)], vec![]);
        let plan = selector().plan(&a, ThemeId::BestOf, 120.0);
        assert_eq!(plan.relaxation, Relaxation::Filler);
        assert!(!plan.shortfall);
        assert!((plan.planned_secs - 120.0).abs() <= 2.0);
        assert!(plan.segments.iter().any(|s| s.start == 100.0 && s.end == 130.0));
        assert_disjoint_and_ordered(&plan);
    }

    #[test]
    fn excluded_ranges_are_avoided() {
        let a = analysis(600.0, &[(100.0, 130.0, 0.9), (400.0, 430.0, 0.5)], vec![]);
        let excluded = [(100.0, 130.0)];
        let plan = selector().plan_excluding(&a, ThemeId::BestOf, 50.0, &excluded);
        assert!(plan.segments.iter().all(|s| s.end <= 100.0 || s.start >= 130.0));
        assert!((plan.planned_secs - 50.0).abs() <= 2.0);
    }

    #[test]
    fn short_interval_widens_back_to_onset() {
        let a = analysis(600.0, &[(50.0, 52.0, 0.9)], vec![10.0, 45.5, 51.0]);
        let sel = selector();
        let prefix = prefix_sums(&a.envelope);
        let cands = sel.candidates(&a, &prefix, &[]);
        assert_eq!(cands.len(), 1);
        assert_eq!(cands[0].start, 45.5);
        assert!((cands[0].end - 56.0).abs() < 1e-9);
    }

    #[test]
    fn long_interval_trims_to_densest_window() {
        let a = analysis(600.0, &[(100.0, 130.0, 0.5), (130.0, 150.0, 0.9), (150.0, 160.0, 0.5)], vec![]);
        let frame_dur = HOP as f64 / SR as f64;
        let prefix = prefix_sums(&a.envelope);
        let (start, end) = densest_window(&a, &prefix, 100.0, 160.0, 30.0);
        assert!((end - start - 30.0).abs() < 1e-9);
        assert!(start <= 130.0 + frame_dur && end >= 150.0 - frame_dur, "{}..{}", start, end);
    }

    #[test]
    fn planning_is_deterministic() {
        let a = analysis(
            900.0,
            &[(30.0, 80.0, 0.6), (200.0, 215.0, 0.9), (480.0, 530.0, 0.7), (700.0, 704.0, 0.8)],
            vec![28.0, 199.5, 700.0],
        );
        let sel = selector();
        let first = sel.plan(&a, ThemeId::MusicalMayhem, 151.0);
        let second = sel.plan(&a, ThemeId::MusicalMayhem, 151.0);
        assert_eq!(first.segments, second.segments);
        assert_eq!(first.relaxation, second.relaxation);
        assert!((first.planned_secs - 151.0).abs() <= 2.0);
        assert_disjoint_and_ordered(&first);
    }
}
