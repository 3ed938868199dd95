//! Themed highlight mixes from long-form spoken audio.
//!
//! A source recording is analyzed for energy and onsets, the most active
//! stretches are selected to fill a target duration, each stretch runs
//! through the theme's effects chain on a worker pool, and the results are
//! crossfaded and mastered into one [`mix::pipeline::FinalMix`].

pub mod audio;
pub mod effects;
pub mod error;
pub mod mix;
pub mod select;
pub mod themes;

pub use error::{MixError, Result};
