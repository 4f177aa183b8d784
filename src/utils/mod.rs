use std::path::{Path, PathBuf};
use url::Url;

use crate::config::ToolsConfig;
use crate::{ClipperError, Result};

/// Executables a session drives, located up front
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolPaths {
    /// yt-dlp or youtube-dl
    pub discovery: PathBuf,

    /// ffmpeg
    pub transcoder: PathBuf,
}

impl ToolPaths {
    /// Find both tools on PATH (or at the configured paths).
    pub fn locate(tools: &ToolsConfig) -> Result<Self> {
        Ok(Self {
            discovery: locate_tool(&tools.discovery)?,
            transcoder: locate_tool(&tools.transcoder)?,
        })
    }
}

/// Resolve an executable name or path, failing with `MissingDependency`.
pub fn locate_tool(name: &str) -> Result<PathBuf> {
    let found = which::which(name).map_err(|_| ClipperError::MissingDependency {
        tool: name.to_string(),
    })?;

    tracing::debug!("Found {} at {}", name, found.display());
    Ok(found)
}

/// Short name of an executable for error messages
pub fn tool_label(program: &Path) -> String {
    program
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| program.display().to_string())
}

/// Random alphanumeric file name: 32 hex characters from a v4 UUID plus extension
pub fn generate_output_filename(extension: &str) -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    let extension = extension.trim_start_matches('.');

    if extension.is_empty() {
        id
    } else {
        format!("{}.{}", id, extension)
    }
}

/// Format file size in human-readable format
pub fn format_file_size(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    const THRESHOLD: f64 = 1024.0;

    if bytes == 0 {
        return "0 B".to_string();
    }

    let bytes_f = bytes as f64;
    let unit_index = (bytes_f.log10() / THRESHOLD.log10()).floor() as usize;
    let unit_index = unit_index.min(UNITS.len() - 1);

    let size = bytes_f / THRESHOLD.powi(unit_index as i32);

    if unit_index == 0 {
        format!("{} {}", bytes, UNITS[unit_index])
    } else {
        format!("{:.1} {}", size, UNITS[unit_index])
    }
}

/// Format a duration given in seconds; negative means unknown
pub fn format_duration(seconds: i64) -> String {
    if seconds < 0 {
        return "unknown".to_string();
    }

    let hours = seconds / 3600;
    let minutes = (seconds % 3600) / 60;
    let secs = seconds % 60;

    if hours > 0 {
        format!("{}h {}m {}s", hours, minutes, secs)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, secs)
    } else {
        format!("{}s", secs)
    }
}

/// Extract domain from a reference for display purposes; bare IDs have none
pub fn extract_domain(reference: &str) -> Option<String> {
    Url::parse(reference).ok()?.host_str().map(|host| {
        host.strip_prefix("www.").unwrap_or(host).to_string()
    })
}
