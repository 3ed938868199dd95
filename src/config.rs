use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

use mixcast::audio::features::AnalysisConfig;
use mixcast::mix::master::MasterConfig;
use mixcast::mix::pipeline::PipelineConfig;
use mixcast::select::selector::SelectionConfig;

#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub mix: MixConfig,
    #[serde(default)]
    pub analysis: AnalysisConfig,
    #[serde(default)]
    pub selection: SelectionConfig,
    #[serde(default)]
    pub master: MasterConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

#[derive(Debug, Deserialize)]
pub struct MixConfig {
    #[serde(default = "default_theme")]
    pub theme: String,
    #[serde(default = "default_duration")]
    pub duration: f64,
}

#[derive(Debug, Deserialize)]
pub struct OutputConfig {
    #[serde(default = "default_bit_depth")]
    pub bit_depth: u16,
    /// Overrides the codec's default bitrate for compressed formats
    #[serde(default)]
    pub bitrate: Option<String>,
    #[serde(default = "default_metadata")]
    pub metadata: bool,
}

impl Default for MixConfig {
    fn default() -> Self {
        Self {
            theme: default_theme(),
            duration: default_duration(),
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            bit_depth: default_bit_depth(),
            bitrate: None,
            metadata: default_metadata(),
        }
    }
}

fn default_theme() -> String { "best-of".into() }
fn default_duration() -> f64 { 300.0 }
fn default_bit_depth() -> u16 { 24 }
fn default_metadata() -> bool { true }

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    toml::from_str(&content).with_context(|| format!("Invalid config in {}", path.display()))
}
