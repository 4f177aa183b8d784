use serde::Serialize;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::config::SessionConfig;
use crate::metadata::{FormatSelector, MetadataResolver, VideoMetadata};
use crate::progress::parse_progress_line;
use crate::utils::generate_output_filename;
use crate::{ClipperError, Result};

pub mod runner;

pub use runner::{run_streaming, StreamKind};

/// One clip to cut, in whole seconds
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractionRequest {
    pub start: u64,
    pub end: u64,
    pub format: FormatSelector,
    pub audio_codec: String,
    pub audio_options: Vec<String>,
    pub output_extension: String,
    pub output_dir: PathBuf,
    pub timeout: Option<Duration>,
}

impl ExtractionRequest {
    /// Build a request for `start..end` from the session's options.
    pub fn from_config(start: u64, end: u64, config: &SessionConfig) -> Result<Self> {
        Ok(Self {
            start,
            end,
            format: config.format.clone(),
            audio_codec: config.audio_codec.clone(),
            audio_options: config.audio_options.clone(),
            output_extension: config.output_extension.clone(),
            output_dir: config.resolved_download_dir()?,
            timeout: config.timeout,
        })
    }

    /// Reject empty or inverted ranges.
    pub fn check_range(start: u64, end: u64) -> Result<()> {
        if end <= start {
            return Err(ClipperError::invalid_request(format!(
                "end time ({}s) must be after start time ({}s)",
                end, start
            )));
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        Self::check_range(self.start, self.end)?;

        if self.timeout == Some(Duration::ZERO) {
            return Err(ClipperError::invalid_request("timeout must be greater than zero"));
        }
        if self.format.is_empty() {
            return Err(ClipperError::invalid_request("format selector is empty"));
        }
        if self.audio_codec.trim().is_empty() {
            return Err(ClipperError::invalid_request("audio codec is empty"));
        }
        if self.output_extension.trim().trim_start_matches('.').is_empty() {
            return Err(ClipperError::invalid_request("output extension is empty"));
        }

        Ok(())
    }

    /// Transcoder arguments: trim, downmix to stereo, encode, write `output`.
    pub fn transcode_args(&self, input_url: &str, output: &Path) -> Vec<String> {
        let mut args = vec![
            "-i".to_string(),
            input_url.to_string(),
            "-ss".to_string(),
            self.start.to_string(),
            "-to".to_string(),
            self.end.to_string(),
            "-ac".to_string(),
            "2".to_string(),
            "-codec:a".to_string(),
            self.audio_codec.clone(),
        ];
        args.extend(self.audio_options.iter().cloned());
        args.push(output.to_string_lossy().into_owned());
        args
    }
}

/// Resolved metadata plus the file the clip was written to
#[derive(Debug, Clone, Serialize)]
pub struct ExtractionResult {
    #[serde(flatten)]
    pub metadata: VideoMetadata,

    /// Absolute path of the produced audio file; owned by the caller
    pub local_file: PathBuf,
}

/// Lifecycle of a single `extract` call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractionState {
    Idle,
    ResolvingMetadata,
    Launching,
    Streaming,
    Succeeded,
    Failed,
}

impl ExtractionState {
    pub fn can_advance_to(self, next: ExtractionState) -> bool {
        use ExtractionState::*;
        matches!(
            (self, next),
            (Idle, ResolvingMetadata)
                | (ResolvingMetadata, Launching)
                | (Launching, Streaming)
                | (Streaming, Succeeded)
                | (Idle | ResolvingMetadata | Launching | Streaming, Failed)
        )
    }
}

impl fmt::Display for ExtractionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExtractionState::Idle => "idle",
            ExtractionState::ResolvingMetadata => "resolving-metadata",
            ExtractionState::Launching => "launching",
            ExtractionState::Streaming => "streaming",
            ExtractionState::Succeeded => "succeeded",
            ExtractionState::Failed => "failed",
        };
        f.write_str(name)
    }
}

#[derive(Debug)]
struct StateTracker {
    current: ExtractionState,
}

impl StateTracker {
    fn new() -> Self {
        Self {
            current: ExtractionState::Idle,
        }
    }

    fn advance(&mut self, next: ExtractionState) {
        debug_assert!(
            self.current.can_advance_to(next),
            "illegal transition {} -> {}",
            self.current,
            next
        );
        tracing::debug!("Extraction {} -> {}", self.current, next);
        self.current = next;
    }

    fn fail(&mut self, error: ClipperError) -> ClipperError {
        tracing::debug!("Extraction {} -> failed: {}", self.current, error);
        self.current = ExtractionState::Failed;
        error
    }
}

/// Resolves metadata, runs the transcoder and fans its output out to callbacks
pub struct ExtractionPipeline<'a> {
    resolver: &'a MetadataResolver,
    reference: &'a str,
    transcoder: &'a Path,
    hooks: &'a SessionConfig,
}

impl<'a> ExtractionPipeline<'a> {
    pub fn new(
        resolver: &'a MetadataResolver,
        reference: &'a str,
        transcoder: &'a Path,
        hooks: &'a SessionConfig,
    ) -> Self {
        Self {
            resolver,
            reference,
            transcoder,
            hooks,
        }
    }

    pub async fn run(&self, request: &ExtractionRequest) -> Result<ExtractionResult> {
        let mut state = StateTracker::new();
        request.validate().map_err(|e| state.fail(e))?;

        state.advance(ExtractionState::ResolvingMetadata);
        let metadata = self
            .resolver
            .resolve(self.reference, &request.format, request.timeout)
            .await
            .map_err(|e| state.fail(e))?;

        state.advance(ExtractionState::Launching);
        fs_err::create_dir_all(&request.output_dir).map_err(|e| state.fail(e.into()))?;
        let local_file = request
            .output_dir
            .join(generate_output_filename(&request.output_extension));
        let args = request.transcode_args(&metadata.direct_url, &local_file);

        state.advance(ExtractionState::Streaming);
        tracing::info!(
            "Extracting {}s-{}s of {} to {}",
            request.start,
            request.end,
            self.reference,
            local_file.display()
        );
        run_streaming(self.transcoder, &args, request.timeout, |kind, line| {
            self.dispatch(kind, line)
        })
        .await
        .map_err(|e| state.fail(e))?;

        state.advance(ExtractionState::Succeeded);
        Ok(ExtractionResult {
            metadata: (*metadata).clone(),
            local_file,
        })
    }

    fn dispatch(&self, kind: StreamKind, line: &str) {
        tracing::trace!("[{}] {}", kind, line);

        if let Some(on_debug) = self.hooks.debug_callback() {
            best_effort("debug", || on_debug(kind, line));
        }

        if kind != self.hooks.progress_channel {
            return;
        }

        if let Some(on_progress) = self.hooks.progress_callback() {
            if let Some(event) = parse_progress_line(line) {
                best_effort("progress", || on_progress(&event));
            }
        }
    }
}

/// Run a caller hook, logging a panic instead of propagating it.
fn best_effort(name: &str, callback: impl FnOnce()) {
    if catch_unwind(AssertUnwindSafe(callback)).is_err() {
        tracing::warn!("The {} callback panicked; continuing", name);
    }
}
