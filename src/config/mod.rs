use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::metadata::FormatSelector;
use crate::pipeline::StreamKind;
use crate::progress::ProgressEvent;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// External executables
    pub tools: ToolsConfig,

    /// Extraction defaults
    pub extraction: ExtractionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    /// Discovery tool name or path (yt-dlp, youtube-dl)
    pub discovery: String,

    /// Transcoder name or path
    pub transcoder: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    /// Format preferences, best first
    pub format: FormatSelector,

    /// Audio codec passed to `-codec:a`
    pub audio_codec: String,

    /// Extra encoder options, e.g. `["-b:a", "48k", "-ar", "16000"]`
    pub audio_options: Vec<String>,

    /// Extension of produced files
    pub output_extension: String,

    /// Transcode timeout in seconds, 0 for none
    pub timeout_secs: u64,

    /// Where clips are written (user download dir if unset)
    pub download_dir: Option<PathBuf>,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            discovery: "yt-dlp".to_string(),
            transcoder: "ffmpeg".to_string(),
        }
    }
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            format: FormatSelector::default(),
            audio_codec: "libmp3lame".to_string(),
            audio_options: AudioPreset::Speech.options(),
            output_extension: "mp3".to_string(),
            timeout_secs: 0,
            download_dir: None,
        }
    }
}

/// Encoder option sets for common uses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum AudioPreset {
    /// 48 kbit/s at 16 kHz, enough for speech recognition
    Speech,
    /// 192 kbit/s at 44.1 kHz
    Music,
}

impl AudioPreset {
    pub fn options(&self) -> Vec<String> {
        let (bitrate, rate) = match self {
            AudioPreset::Speech => ("48k", "16000"),
            AudioPreset::Music => ("192k", "44100"),
        };
        ["-b:a", bitrate, "-ar", rate]
            .iter()
            .map(|s| s.to_string())
            .collect()
    }
}

impl Config {
    /// Load configuration from the default location, creating it if missing
    pub async fn load() -> Result<Self> {
        let config_path = Self::config_path()?;
        Self::load_from(&config_path).await
    }

    /// Load configuration from `path`, writing defaults there if it does not exist
    pub async fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = fs_err::read_to_string(path).context("Failed to read config file")?;

            let config: Config =
                serde_yaml::from_str(&content).context("Failed to parse config file")?;

            config.validate()?;
            Ok(config)
        } else {
            let config = Self::default();
            config.save_to(path).await?;
            Ok(config)
        }
    }

    /// Save configuration to `path`
    pub async fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs_err::create_dir_all(parent)?;
        }

        let content = serde_yaml::to_string(self).context("Failed to serialize config")?;

        fs_err::write(path, content).context("Failed to write config file")?;

        Ok(())
    }

    /// Get configuration file path
    pub fn config_path() -> Result<PathBuf> {
        // First try current directory for easy testing
        let local_config = PathBuf::from("config.yaml");
        if local_config.exists() {
            return Ok(local_config);
        }

        let config_dir = dirs::config_dir().context("Could not determine config directory")?;

        Ok(config_dir.join("clip-ripper").join("config.yaml"))
    }

    /// Validate configuration
    fn validate(&self) -> Result<()> {
        if self.tools.discovery.trim().is_empty() || self.tools.transcoder.trim().is_empty() {
            anyhow::bail!("Both tools.discovery and tools.transcoder must be set");
        }

        if self.extraction.audio_codec.trim().is_empty() {
            anyhow::bail!("extraction.audio_codec must not be empty");
        }

        if self.extraction.output_extension.trim().is_empty() {
            anyhow::bail!("extraction.output_extension must not be empty");
        }

        Ok(())
    }

    /// Display current configuration
    pub fn display(&self) {
        println!("Current Configuration:");
        println!("  Discovery tool: {}", self.tools.discovery);
        println!("  Transcoder: {}", self.tools.transcoder);
        println!("  Format: {}", self.extraction.format);
        println!(
            "  Audio: {} {}",
            self.extraction.audio_codec,
            self.extraction.audio_options.join(" ")
        );
        println!("  Extension: {}", self.extraction.output_extension);
        match self.extraction.timeout_secs {
            0 => println!("  Timeout: none"),
            secs => println!("  Timeout: {}s", secs),
        }
        if let Some(dir) = &self.extraction.download_dir {
            println!("  Download dir: {}", dir.display());
        }
    }
}

/// Receives every line the transcoder prints, tagged with its stream
pub type DebugCallback = Arc<dyn Fn(StreamKind, &str) + Send + Sync>;

/// Receives each parsed progress update
pub type ProgressCallback = Arc<dyn Fn(&ProgressEvent) + Send + Sync>;

/// Options for one session. Values are only checked when they are used.
#[derive(Clone)]
pub struct SessionConfig {
    pub tools: ToolsConfig,
    pub format: FormatSelector,
    pub audio_codec: String,
    pub audio_options: Vec<String>,
    pub output_extension: String,
    pub timeout: Option<Duration>,
    pub download_dir: Option<PathBuf>,

    /// Stream scanned for progress lines
    pub progress_channel: StreamKind,

    on_debug: Option<DebugCallback>,
    on_progress: Option<ProgressCallback>,
}

impl SessionConfig {
    pub fn from_config(config: &Config) -> Self {
        let extraction = &config.extraction;
        Self {
            tools: config.tools.clone(),
            format: extraction.format.clone(),
            audio_codec: extraction.audio_codec.clone(),
            audio_options: extraction.audio_options.clone(),
            output_extension: extraction.output_extension.clone(),
            timeout: timeout_from_secs(extraction.timeout_secs),
            download_dir: extraction.download_dir.clone(),
            progress_channel: StreamKind::Stdout,
            on_debug: None,
            on_progress: None,
        }
    }

    pub fn set_format(&mut self, format: FormatSelector) -> &mut Self {
        self.format = format;
        self
    }

    pub fn set_audio_codec(&mut self, codec: impl Into<String>) -> &mut Self {
        self.audio_codec = codec.into();
        self
    }

    pub fn set_audio_options<I, S>(&mut self, options: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.audio_options = options.into_iter().map(Into::into).collect();
        self
    }

    pub fn apply_preset(&mut self, preset: AudioPreset) -> &mut Self {
        self.audio_options = preset.options();
        self
    }

    pub fn set_timeout(&mut self, timeout: Option<Duration>) -> &mut Self {
        self.timeout = timeout;
        self
    }

    /// Timeout in whole seconds; 0 disables it, as in the config file.
    pub fn set_timeout_secs(&mut self, secs: u64) -> &mut Self {
        self.timeout = timeout_from_secs(secs);
        self
    }

    pub fn set_download_dir(&mut self, dir: impl Into<PathBuf>) -> &mut Self {
        self.download_dir = Some(dir.into());
        self
    }

    pub fn set_progress_channel(&mut self, channel: StreamKind) -> &mut Self {
        self.progress_channel = channel;
        self
    }

    pub fn on_debug<F>(&mut self, callback: F) -> &mut Self
    where
        F: Fn(StreamKind, &str) + Send + Sync + 'static,
    {
        self.on_debug = Some(Arc::new(callback));
        self
    }

    pub fn on_progress<F>(&mut self, callback: F) -> &mut Self
    where
        F: Fn(&ProgressEvent) + Send + Sync + 'static,
    {
        self.on_progress = Some(Arc::new(callback));
        self
    }

    pub fn debug_callback(&self) -> Option<&DebugCallback> {
        self.on_debug.as_ref()
    }

    pub fn progress_callback(&self) -> Option<&ProgressCallback> {
        self.on_progress.as_ref()
    }

    /// Absolute directory clips are written to.
    ///
    /// Falls back to the user's download directory, then the working directory.
    pub fn resolved_download_dir(&self) -> std::io::Result<PathBuf> {
        let dir = self
            .download_dir
            .clone()
            .or_else(dirs::download_dir)
            .unwrap_or_else(|| PathBuf::from("."));

        if dir.is_absolute() {
            Ok(dir)
        } else {
            Ok(std::env::current_dir()?.join(dir))
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionConfig")
            .field("tools", &self.tools)
            .field("format", &self.format)
            .field("audio_codec", &self.audio_codec)
            .field("audio_options", &self.audio_options)
            .field("output_extension", &self.output_extension)
            .field("timeout", &self.timeout)
            .field("download_dir", &self.download_dir)
            .field("progress_channel", &self.progress_channel)
            .field("on_debug", &self.on_debug.is_some())
            .field("on_progress", &self.on_progress.is_some())
            .finish()
    }
}

fn timeout_from_secs(secs: u64) -> Option<Duration> {
    match secs {
        0 => None,
        secs => Some(Duration::from_secs(secs)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SessionConfig::default();

        assert_eq!(config.format.to_string(), "bestaudio[ext=m4a]/bestaudio/best");
        assert_eq!(config.audio_codec, "libmp3lame");
        assert_eq!(config.audio_options, vec!["-b:a", "48k", "-ar", "16000"]);
        assert_eq!(config.timeout, None);
        assert_eq!(config.progress_channel, StreamKind::Stdout);
        assert!(config.debug_callback().is_none());
    }

    #[test]
    fn test_presets() {
        let mut config = SessionConfig::default();
        config.apply_preset(AudioPreset::Music);
        assert_eq!(config.audio_options, vec!["-b:a", "192k", "-ar", "44100"]);
    }

    #[test]
    fn test_timeout_zero_means_none() {
        let mut config = Config::default();
        config.extraction.timeout_secs = 30;
        assert_eq!(
            SessionConfig::from_config(&config).timeout,
            Some(Duration::from_secs(30))
        );

        let mut session = SessionConfig::from_config(&config);
        session.set_timeout_secs(0);
        assert_eq!(session.timeout, None);
        session.set_timeout_secs(5);
        assert_eq!(session.timeout, Some(Duration::from_secs(5)));
    }

    #[test]
    fn test_relative_download_dir_is_made_absolute() {
        let mut config = SessionConfig::default();
        config.set_download_dir("clips");

        let dir = config.resolved_download_dir().unwrap();
        assert!(dir.is_absolute());
        assert!(dir.ends_with("clips"));
    }

    #[tokio::test]
    async fn test_load_creates_then_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.yaml");

        let created = Config::load_from(&path).await.unwrap();
        assert!(path.exists());
        assert_eq!(created.tools.transcoder, "ffmpeg");

        fs_err::write(
            &path,
            "extraction:\n  format: ['22', '18']\n  timeout_secs: 5\n",
        )
        .unwrap();
        let loaded = Config::load_from(&path).await.unwrap();
        assert_eq!(loaded.extraction.format.to_string(), "22/18");
        assert_eq!(loaded.extraction.timeout_secs, 5);
        assert_eq!(loaded.extraction.audio_codec, "libmp3lame");
    }

    #[tokio::test]
    async fn test_invalid_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        fs_err::write(&path, "tools:\n  transcoder: ''\n").unwrap();

        assert!(Config::load_from(&path).await.is_err());
    }
}
