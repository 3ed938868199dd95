use std::fmt;
use std::str::FromStr;

use serde::Serialize;

use crate::error::MixError;

/// One processing step with its parameters.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Stage {
    HighPass { cutoff_hz: f32 },
    LowPass { cutoff_hz: f32 },
    Eq { freq_hz: f32, gain_db: f32, q: f32 },
    Compressor { threshold_db: f32, ratio: f32, attack_ms: f32, release_ms: f32 },
    Reverb { room_size: f32, damping: f32, wet_level: f32 },
    Gain { gain_db: f32 },
    Limiter { threshold_db: f32 },
}

impl Stage {
    pub fn name(&self) -> &'static str {
        match self {
            Stage::HighPass { .. } => "high_pass",
            Stage::LowPass { .. } => "low_pass",
            Stage::Eq { .. } => "eq",
            Stage::Compressor { .. } => "compressor",
            Stage::Reverb { .. } => "reverb",
            Stage::Gain { .. } => "gain",
            Stage::Limiter { .. } => "limiter",
        }
    }
}

/// Closed set of mix themes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ThemeId {
    BestOf,
    MediaMeltdown,
    ConspiracyCorner,
    DonationNation,
    MusicalMayhem,
}

impl ThemeId {
    pub const ALL: [ThemeId; 5] = [
        ThemeId::BestOf,
        ThemeId::MediaMeltdown,
        ThemeId::ConspiracyCorner,
        ThemeId::DonationNation,
        ThemeId::MusicalMayhem,
    ];

    pub fn slug(self) -> &'static str {
        match self {
            ThemeId::BestOf => "best-of",
            ThemeId::MediaMeltdown => "media-meltdown",
            ThemeId::ConspiracyCorner => "conspiracy-corner",
            ThemeId::DonationNation => "donation-nation",
            ThemeId::MusicalMayhem => "musical-mayhem",
        }
    }

    pub fn profile(self) -> &'static ThemeProfile {
        match self {
            ThemeId::BestOf => &BEST_OF,
            ThemeId::MediaMeltdown => &MEDIA_MELTDOWN,
            ThemeId::ConspiracyCorner => &CONSPIRACY_CORNER,
            ThemeId::DonationNation => &DONATION_NATION,
            ThemeId::MusicalMayhem => &MUSICAL_MAYHEM,
        }
    }

    /// Lowest closing-limiter threshold across the catalog (dBFS).
    pub fn tightest_limiter_db() -> f32 {
        ThemeId::ALL
            .iter()
            .map(|id| id.profile().limiter_threshold_db())
            .fold(f32::INFINITY, f32::min)
    }
}

impl fmt::Display for ThemeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.slug())
    }
}

impl FromStr for ThemeId {
    type Err = MixError;

    /// Accepts slugs, display names and snake case, ignoring case.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .trim()
            .chars()
            .map(|c| if c == ' ' || c == '_' { '-' } else { c.to_ascii_lowercase() })
            .collect();
        ThemeId::ALL
            .into_iter()
            .find(|id| id.slug() == normalized)
            .ok_or_else(|| MixError::UnknownTheme(s.to_string()))
    }
}

/// Static description of a theme's per-segment processing.
#[derive(Debug, Serialize)]
pub struct ThemeProfile {
    pub id: ThemeId,
    pub display_name: &'static str,
    pub description: &'static str,
    pub stages: &'static [Stage],
}

impl ThemeProfile {
    /// Threshold of the closing limiter, which every profile ends with.
    pub fn limiter_threshold_db(&self) -> f32 {
        match self.stages.last() {
            Some(Stage::Limiter { threshold_db }) => *threshold_db,
            _ => 0.0,
        }
    }
}

static BEST_OF: ThemeProfile = ThemeProfile {
    id: ThemeId::BestOf,
    display_name: "Best Of",
    description: "Warm, present, lightly roomy",
    stages: &[
        Stage::HighPass { cutoff_hz: 80.0 },
        Stage::Eq { freq_hz: 200.0, gain_db: 2.0, q: 0.7 },
        Stage::Eq { freq_hz: 3000.0, gain_db: 1.5, q: 1.2 },
        Stage::Compressor { threshold_db: -18.0, ratio: 3.0, attack_ms: 5.0, release_ms: 100.0 },
        Stage::Reverb { room_size: 0.2, damping: 0.5, wet_level: 0.1 },
        Stage::Limiter { threshold_db: -0.5 },
    ],
};

static MEDIA_MELTDOWN: ThemeProfile = ThemeProfile {
    id: ThemeId::MediaMeltdown,
    display_name: "Media Meltdown",
    description: "Hot, aggressive, high intensity",
    stages: &[
        Stage::HighPass { cutoff_hz: 100.0 },
        Stage::Eq { freq_hz: 800.0, gain_db: -2.0, q: 1.5 },
        Stage::Eq { freq_hz: 4000.0, gain_db: 3.0, q: 1.8 },
        Stage::Compressor { threshold_db: -14.0, ratio: 4.0, attack_ms: 2.0, release_ms: 50.0 },
        Stage::Gain { gain_db: 2.0 },
        Stage::Limiter { threshold_db: -0.1 },
    ],
};

static CONSPIRACY_CORNER: ThemeProfile = ThemeProfile {
    id: ThemeId::ConspiracyCorner,
    display_name: "Conspiracy Corner",
    description: "Dark tone in a larger space",
    stages: &[
        Stage::HighPass { cutoff_hz: 60.0 },
        Stage::LowPass { cutoff_hz: 8000.0 },
        Stage::Eq { freq_hz: 120.0, gain_db: 1.5, q: 0.8 },
        Stage::Eq { freq_hz: 2500.0, gain_db: -1.0, q: 1.0 },
        Stage::Compressor { threshold_db: -20.0, ratio: 2.5, attack_ms: 10.0, release_ms: 200.0 },
        Stage::Reverb { room_size: 0.4, damping: 0.8, wet_level: 0.15 },
        Stage::Limiter { threshold_db: -1.0 },
    ],
};

static DONATION_NATION: ThemeProfile = ThemeProfile {
    id: ThemeId::DonationNation,
    display_name: "Donation Nation",
    description: "Full, clear and airy",
    stages: &[
        Stage::HighPass { cutoff_hz: 85.0 },
        Stage::Eq { freq_hz: 150.0, gain_db: 2.5, q: 0.6 },
        Stage::Eq { freq_hz: 3500.0, gain_db: 2.8, q: 1.1 },
        Stage::Eq { freq_hz: 8000.0, gain_db: 1.2, q: 0.9 },
        Stage::Compressor { threshold_db: -16.0, ratio: 2.8, attack_ms: 3.0, release_ms: 80.0 },
        Stage::Reverb { room_size: 0.25, damping: 0.4, wet_level: 0.12 },
        Stage::Limiter { threshold_db: -0.3 },
    ],
};

static MUSICAL_MAYHEM: ThemeProfile = ThemeProfile {
    id: ThemeId::MusicalMayhem,
    display_name: "Musical Mayhem",
    description: "Punchy low end, sparkle and a creative space",
    stages: &[
        Stage::HighPass { cutoff_hz: 90.0 },
        Stage::Eq { freq_hz: 100.0, gain_db: 1.8, q: 0.9 },
        Stage::Eq { freq_hz: 1200.0, gain_db: -0.5, q: 1.2 },
        Stage::Eq { freq_hz: 5000.0, gain_db: 2.2, q: 1.5 },
        Stage::Compressor { threshold_db: -15.0, ratio: 3.5, attack_ms: 1.0, release_ms: 60.0 },
        Stage::Reverb { room_size: 0.35, damping: 0.3, wet_level: 0.18 },
        Stage::Limiter { threshold_db: -0.2 },
    ],
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_names_in_any_form() {
        assert_eq!("best-of".parse::<ThemeId>().unwrap(), ThemeId::BestOf);
        assert_eq!("Media Meltdown".parse::<ThemeId>().unwrap(), ThemeId::MediaMeltdown);
        assert_eq!("CONSPIRACY_CORNER".parse::<ThemeId>().unwrap(), ThemeId::ConspiracyCorner);
        assert!("smooth-jazz".parse::<ThemeId>().is_err());
    }

    #[test]
    fn every_profile_matches_its_id_and_ends_with_limiter() {
        for id in ThemeId::ALL {
            let profile = id.profile();
            assert_eq!(profile.id, id);
            assert!(matches!(profile.stages.last(), Some(Stage::Limiter { .. })), "{}", id);
            assert!(profile.limiter_threshold_db() <= 0.0);
        }
    }

    #[test]
    fn tightest_limiter_is_conspiracy_corner() {
        assert_eq!(ThemeId::tightest_limiter_db(), -1.0);
    }

    #[test]
    fn slug_round_trips_through_display() {
        for id in ThemeId::ALL {
            assert_eq!(id.to_string().parse::<ThemeId>().unwrap(), id);
        }
    }
}
