use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "mixcast", about = "Themed highlight mixes from long-form podcast audio")]
pub struct Cli {
    /// Source audio file (WAV, MP3, FLAC, OGG, AAC)
    pub input: Option<PathBuf>,

    /// Output file; .wav is written directly, .mp3/.m4a/.ogg/.opus/.flac go through ffmpeg
    #[arg(short, long, default_value = "mix.wav")]
    pub output: PathBuf,

    /// Theme name (see --list-themes)
    #[arg(short, long, default_value = "best-of")]
    pub theme: String,

    /// Target mix length in seconds (10-1800)
    #[arg(short, long, default_value_t = 300.0)]
    pub duration: f64,

    /// Crossfade between segments in seconds
    #[arg(long, default_value_t = 0.5)]
    pub crossfade: f64,

    /// Segment worker threads (0 = all cores)
    #[arg(long, default_value_t = 0)]
    pub workers: usize,

    /// Stinger played before the first segment
    #[arg(long)]
    pub intro: Option<PathBuf>,

    /// Stinger played after the last segment
    #[arg(long)]
    pub outro: Option<PathBuf>,

    /// Stinger played between consecutive segments
    #[arg(long)]
    pub transition: Option<PathBuf>,

    /// Metadata JSON path (defaults to the output path with a .json extension)
    #[arg(long)]
    pub metadata: Option<PathBuf>,

    /// Skip writing the metadata sidecar
    #[arg(long)]
    pub no_metadata: bool,

    /// WAV bit depth (16, 24 or 32 for float)
    #[arg(long, default_value_t = 24)]
    pub bit_depth: u16,

    /// Config file (default: ./mixcast.toml, then the user config dir)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// List available themes and exit
    #[arg(long)]
    pub list_themes: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_short_flags() {
        let cli = Cli::parse_from(["mixcast", "show.mp3", "-t", "media-meltdown", "-d", "90", "-o", "out.mp3"]);
        assert_eq!(cli.input, Some(PathBuf::from("show.mp3")));
        assert_eq!(cli.theme, "media-meltdown");
        assert_eq!(cli.duration, 90.0);
        assert_eq!(cli.output, PathBuf::from("out.mp3"));
        assert_eq!(cli.crossfade, 0.5);
        assert!(cli.transition.is_none());
    }

    #[test]
    fn parses_stinger_paths() {
        let cli = Cli::parse_from(["mixcast", "show.wav", "--intro", "in.wav", "--transition", "swoosh.wav"]);
        assert_eq!(cli.intro, Some(PathBuf::from("in.wav")));
        assert_eq!(cli.transition, Some(PathBuf::from("swoosh.wav")));
        assert!(cli.outro.is_none());
    }
}
