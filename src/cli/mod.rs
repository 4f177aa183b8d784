use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::config::AudioPreset;
use crate::pipeline::StreamKind;

#[derive(Parser)]
#[command(
    name = "clipper",
    about = "Clip Ripper - cut audio clips out of online videos with yt-dlp and ffmpeg",
    version,
    long_about = "Resolves a video's direct media URL with yt-dlp, then lets ffmpeg trim and re-encode just the requested time range into an audio file."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Configuration file (defaults to ./config.yaml or the user config dir)
    #[arg(short, long, global = true, value_name = "FILE", env = "CLIPPER_CONFIG")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Disable progress indicators
    #[arg(short, long, global = true)]
    pub quiet: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Extract an audio clip from a video
    Extract {
        /// Video URL or ID
        #[arg(value_name = "URL_OR_ID")]
        reference: String,

        /// Clip start in seconds
        #[arg(short, long)]
        start: u64,

        /// Clip end in seconds
        #[arg(short, long)]
        end: u64,

        /// Directory for the produced file
        #[arg(short, long, value_name = "DIR", env = "CLIPPER_DOWNLOAD_DIR")]
        output_dir: Option<PathBuf>,

        /// Format preference, best first (repeatable)
        #[arg(short, long = "format", value_name = "FORMAT")]
        formats: Vec<String>,

        /// Give up after this many seconds (0 disables the limit)
        #[arg(short, long, value_name = "SECS", env = "CLIPPER_TIMEOUT")]
        timeout: Option<u64>,

        /// Audio codec for the clip
        #[arg(long, value_name = "CODEC")]
        audio_codec: Option<String>,

        /// Encoder option preset
        #[arg(long, value_enum)]
        preset: Option<AudioPreset>,

        /// Raw encoder option, e.g. --audio-option=-b:a --audio-option=64k (repeatable)
        #[arg(long = "audio-option", value_name = "OPT", allow_hyphen_values = true)]
        audio_options: Vec<String>,

        /// Stream the transcoder reports progress on
        #[arg(long, value_enum, default_value = "stderr")]
        progress_stream: StreamKind,

        /// Echo the transcoder's output
        #[arg(long)]
        show_tool_output: bool,

        /// Output format for the result
        #[arg(long, value_enum, default_value = "text")]
        output: OutputFormat,
    },

    /// Show what the discovery tool reports for a video
    Info {
        /// Video URL or ID
        #[arg(value_name = "URL_OR_ID")]
        reference: String,

        /// Format preference, best first (repeatable)
        #[arg(short, long = "format", value_name = "FORMAT")]
        formats: Vec<String>,

        /// Output format
        #[arg(long, value_enum, default_value = "text")]
        output: OutputFormat,
    },

    /// Show or initialise the configuration file
    Config {
        /// Show current configuration
        #[arg(short, long)]
        show: bool,
    },
}

#[derive(ValueEnum, Clone, Debug)]
pub enum OutputFormat {
    /// Human readable summary
    Text,
    /// JSON metadata record
    Json,
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputFormat::Text => write!(f, "text"),
            OutputFormat::Json => write!(f, "json"),
        }
    }
}
