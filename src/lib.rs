//! Clip Ripper - cut time-bounded audio clips out of remote videos
//!
//! The library resolves a video's direct media URL with a discovery tool
//! (yt-dlp or youtube-dl), hands that URL to ffmpeg to trim and re-encode the
//! requested range, and streams ffmpeg's status output back to the caller as
//! typed progress events.

use std::fmt;
use std::time::Duration;

pub mod cli;
pub mod config;
pub mod metadata;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod session;
pub mod utils;

pub use cli::{Cli, Commands, OutputFormat};
pub use config::{AudioPreset, Config, SessionConfig};
pub use metadata::{DiscoveryTool, FormatSelector, MetadataResolver, VideoMetadata};
pub use pipeline::{ExtractionRequest, ExtractionResult, StreamKind};
pub use progress::{parse_progress_line, ProgressEvent};
pub use session::Session;

/// Result type used throughout the library
pub type Result<T> = std::result::Result<T, ClipperError>;

/// Error types specific to clip extraction
#[derive(thiserror::Error, Debug)]
pub enum ClipperError {
    #[error("`{tool}` executable was not found. Is it installed and on PATH?")]
    MissingDependency { tool: String },

    #[error("{tool} failed ({}): {stderr}", describe_exit(.code))]
    ToolExecution {
        tool: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("Metadata output can't be decoded: {0}")]
    MetadataDecode(String),

    #[error("Metadata is missing the required `{0}` field")]
    MetadataIncomplete(&'static str),

    #[error("Transcoding failed, {failure}: {stderr}")]
    Transcode {
        failure: TranscodeFailure,
        stderr: String,
    },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ClipperError {
    /// True when the transcoder was killed because it ran past the timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            ClipperError::Transcode {
                failure: TranscodeFailure::TimedOut(_),
                ..
            }
        )
    }

    /// Rebuild this error for another caller that shared the failed operation.
    pub(crate) fn replay(&self) -> Self {
        match self {
            ClipperError::MissingDependency { tool } => {
                ClipperError::MissingDependency { tool: tool.clone() }
            }
            ClipperError::ToolExecution { tool, code, stderr } => ClipperError::ToolExecution {
                tool: tool.clone(),
                code: *code,
                stderr: stderr.clone(),
            },
            ClipperError::MetadataDecode(message) => ClipperError::MetadataDecode(message.clone()),
            ClipperError::MetadataIncomplete(field) => ClipperError::MetadataIncomplete(*field),
            ClipperError::Transcode { failure, stderr } => ClipperError::Transcode {
                failure: *failure,
                stderr: stderr.clone(),
            },
            ClipperError::InvalidRequest(message) => ClipperError::InvalidRequest(message.clone()),
            ClipperError::Io(e) => ClipperError::Io(std::io::Error::new(e.kind(), e.to_string())),
        }
    }

    pub(crate) fn invalid_request(message: impl Into<String>) -> Self {
        ClipperError::InvalidRequest(message.into())
    }
}

/// Why a transcode did not produce a file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranscodeFailure {
    /// The process exited unsuccessfully; `None` means it was killed by a signal
    Exited(Option<i32>),
    /// The process ran past the configured timeout and was killed
    TimedOut(Duration),
}

impl fmt::Display for TranscodeFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TranscodeFailure::Exited(code) => write!(f, "{}", describe_exit(code)),
            TranscodeFailure::TimedOut(limit) => {
                write!(f, "timed out after {:.1}s", limit.as_secs_f64())
            }
        }
    }
}

fn describe_exit(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exit status {}", code),
        None => "terminated without an exit status".to_string(),
    }
}
