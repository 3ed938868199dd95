mod cli;
mod config;
mod encode;

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;

use cli::Cli;
use mixcast::audio::decode::decode_audio;
use mixcast::mix::pipeline::{MixRequest, Pipeline, PipelineStage};
use mixcast::themes::catalog::ThemeId;

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let mut cli = Cli::parse();

    if cli.list_themes {
        println!("Available themes:");
        for id in ThemeId::ALL {
            let profile = id.profile();
            println!("  {:<20} {}", id.slug(), profile.description);
        }
        return Ok(());
    }

    // Load config: explicit --config path, or auto-detect mixcast.toml / global config
    let config_path = cli.config.clone().or_else(|| {
        let local = PathBuf::from("mixcast.toml");
        if local.exists() {
            return Some(local);
        }
        if let Some(home) = dirs::home_dir() {
            let xdg = home.join(".config").join("mixcast").join("config.toml");
            if xdg.exists() {
                return Some(xdg);
            }
        }
        if let Some(config_dir) = dirs::config_dir() {
            let platform = config_dir.join("mixcast").join("config.toml");
            if platform.exists() {
                return Some(platform);
            }
        }
        None
    });
    let mut cfg = match config_path {
        Some(ref path) => match config::load_config(path) {
            Ok(cfg) => {
                log::info!("Loaded config from {}", path.display());
                cfg
            }
            Err(err) => {
                log::warn!("Failed to load config: {:#}", err);
                config::Config::default()
            }
        },
        None => config::Config::default(),
    };

    // Merge: config values apply only when CLI is at its default
    if cli.theme == "best-of" { cli.theme = cfg.mix.theme.clone(); }
    if cli.duration == 300.0 { cli.duration = cfg.mix.duration; }
    if cli.bit_depth == 24 { cli.bit_depth = cfg.output.bit_depth; }
    if cli.crossfade != 0.5 { cfg.pipeline.crossfade_secs = cli.crossfade; }
    if cli.workers != 0 { cfg.pipeline.workers = cli.workers; }

    let input = cli.input.as_ref().context("Input audio file is required")?;
    if !input.exists() {
        anyhow::bail!("Input file not found: {}", input.display());
    }
    let theme: ThemeId = cli.theme.parse()?;

    log::info!("mixcast - themed highlight mixer");
    log::info!("Input: {}", input.display());
    log::info!("Output: {}", cli.output.display());
    log::info!("Theme: {} ({:.0}s target)", theme.profile().display_name, cli.duration);

    // 1. Decode source and optional stingers
    log::info!("Decoding audio...");
    let source = decode_audio(input)?;
    let intro = cli
        .intro
        .as_deref()
        .map(decode_audio)
        .transpose()
        .context("Failed to decode intro stinger")?;
    let outro = cli
        .outro
        .as_deref()
        .map(decode_audio)
        .transpose()
        .context("Failed to decode outro stinger")?;
    let transition = cli
        .transition
        .as_deref()
        .map(decode_audio)
        .transpose()
        .context("Failed to decode transition stinger")?;

    // 2. Render
    let pipeline = Pipeline::new(cfg.analysis, cfg.selection, cfg.master, cfg.pipeline)?;
    let mut request = MixRequest::new(&source, theme, cli.duration);
    if let Some(ref intro) = intro {
        request = request.with_intro(intro);
    }
    if let Some(ref outro) = outro {
        request = request.with_outro(outro);
    }
    if let Some(ref transition) = transition {
        request = request.with_transition(transition);
    }

    let pb = ProgressBar::new(PipelineStage::COUNT);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}")?
            .progress_chars("=>-"),
    );
    let mix = pipeline.render_observed(&request, |stage| {
        pb.set_position(stage.index());
        pb.set_message(stage.to_string());
    })?;
    pb.finish_with_message("done");

    // 3. Export
    match encode::ffmpeg::codec_for(&cli.output) {
        Some((codec, default_bitrate)) => {
            let bitrate = cfg.output.bitrate.as_deref().or(default_bitrate);
            encode::ffmpeg::encode_audio(&cli.output, &mix.audio, codec, bitrate)?;
        }
        None => encode::wav::write_wav(&cli.output, &mix.audio, cli.bit_depth)?,
    }

    if cfg.output.metadata && !cli.no_metadata {
        let path = cli
            .metadata
            .clone()
            .unwrap_or_else(|| encode::wav::sidecar_path(&cli.output));
        encode::wav::write_metadata(&path, &mix.metadata)?;
    }

    let meta = &mix.metadata;
    if meta.shortfall {
        log::warn!(
            "Mix is {:.1}s, short of the {:.1}s target",
            meta.achieved_secs,
            meta.target_secs
        );
    }
    if meta.dropped_segments > 0 {
        log::warn!("{} segments were dropped during processing", meta.dropped_segments);
    }
    log::info!(
        "Done! {} segments, {:.1}s, peak {:.2} dBFS -> {}",
        meta.segments.len(),
        meta.achieved_secs,
        meta.peak_db,
        cli.output.display()
    );
    Ok(())
}
