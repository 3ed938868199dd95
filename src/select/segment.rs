use serde::Serialize;

use crate::themes::catalog::{ThemeId, ThemeProfile};

/// A source time range chosen for the mix.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Segment {
    pub start: f64,
    pub end: f64,
    pub score: f64,
    /// Position in the plan (chronological)
    pub order: usize,
}

impl Segment {
    pub fn duration(&self) -> f64 {
        self.end - self.start
    }
}

/// How far selection had to loosen its constraints. Ordered from strictest.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Relaxation {
    /// Gap and bucket diversity both held
    None,
    /// Bucket diversity dropped
    Diversity,
    /// Minimum gap dropped as well
    Gap,
    /// Accepted segments were stretched or a remaining candidate was force-fitted
    Forced,
    /// Unscored audio from free stretches of the source was added
    Filler,
    /// No activity found; segments spread uniformly over the source
    UniformFallback,
}

/// The selector's output: what to play, in which order, with which theme.
#[derive(Clone, Debug, Serialize)]
pub struct MixPlan {
    pub theme: ThemeId,
    pub segments: Vec<Segment>,
    pub target_secs: f64,
    /// Expected mix length once joins overlap by the crossfade
    pub planned_secs: f64,
    pub shortfall: bool,
    pub degenerate: bool,
    pub relaxation: Relaxation,
}

impl MixPlan {
    pub fn profile(&self) -> &'static ThemeProfile {
        self.theme.profile()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }
}
