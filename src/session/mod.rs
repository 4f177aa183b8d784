use std::sync::Arc;

use crate::config::SessionConfig;
use crate::metadata::{DiscoveryTool, MetadataResolver, VideoMetadata, YtDlpTool};
use crate::pipeline::{ExtractionPipeline, ExtractionRequest, ExtractionResult};
use crate::utils::ToolPaths;
use crate::{ClipperError, Result};

/// Clip extraction for one video.
///
/// Metadata is looked up lazily, at most once per reference, by whichever of
/// [`video_data`](Self::video_data), [`video_duration`](Self::video_duration),
/// [`direct_video_link`](Self::direct_video_link) or [`extract`](Self::extract)
/// runs first.
pub struct Session {
    reference: String,
    config: SessionConfig,
    tools: ToolPaths,
    resolver: MetadataResolver,
}

impl Session {
    /// Create a session, failing with `MissingDependency` unless both tools are on PATH.
    pub fn new(reference: impl Into<String>, config: SessionConfig) -> Result<Self> {
        let tools = ToolPaths::locate(&config.tools)?;
        let discovery = Arc::new(YtDlpTool::new(tools.discovery.clone()));
        Ok(Self::with_parts(reference, config, tools, discovery))
    }

    /// Create a session from already located tools and a custom discovery backend.
    pub fn with_parts(
        reference: impl Into<String>,
        config: SessionConfig,
        tools: ToolPaths,
        discovery: Arc<dyn DiscoveryTool>,
    ) -> Self {
        Self {
            reference: reference.into(),
            config,
            tools,
            resolver: MetadataResolver::new(discovery),
        }
    }

    pub fn video_reference(&self) -> &str {
        &self.reference
    }

    /// Point the session at another video; cached metadata is dropped.
    pub fn set_video_reference(&mut self, reference: impl Into<String>) {
        self.reference = reference.into();
        self.resolver.invalidate();
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut SessionConfig {
        &mut self.config
    }

    pub fn tools(&self) -> &ToolPaths {
        &self.tools
    }

    /// Full metadata record, resolving it on first use.
    pub async fn video_data(&self) -> Result<Arc<VideoMetadata>> {
        if self.reference.trim().is_empty() {
            return Err(ClipperError::invalid_request("video reference is empty"));
        }

        self.resolver
            .resolve(&self.reference, &self.config.format, self.config.timeout)
            .await
    }

    /// Duration in seconds, or -1 if the tool did not report one.
    pub async fn video_duration(&self) -> Result<i64> {
        Ok(self.video_data().await?.duration_secs())
    }

    pub async fn direct_video_link(&self) -> Result<String> {
        Ok(self.video_data().await?.direct_url.clone())
    }

    /// Cut `start..end` (seconds) out of the video as an audio file.
    ///
    /// Blocks until the transcoder exits or the timeout fires. A partially
    /// written file left behind by a failed transcode is not removed.
    pub async fn extract(&self, start: u64, end: u64) -> Result<ExtractionResult> {
        ExtractionRequest::check_range(start, end)?;
        if self.reference.trim().is_empty() {
            return Err(ClipperError::invalid_request("video reference is empty"));
        }

        let request = ExtractionRequest::from_config(start, end, &self.config)?;
        ExtractionPipeline::new(
            &self.resolver,
            &self.reference,
            &self.tools.transcoder,
            &self.config,
        )
        .run(&request)
        .await
    }
}
