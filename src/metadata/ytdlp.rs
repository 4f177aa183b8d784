use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

use super::{DiscoveryTool, FormatSelector};
use crate::utils::tool_label;
use crate::{ClipperError, Result};

/// Metadata lookup through yt-dlp (or a compatible youtube-dl build)
pub struct YtDlpTool {
    program: PathBuf,
}

impl YtDlpTool {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Arguments for a direct-URL lookup with JSON output.
    ///
    /// The reference goes after `--` so it can never be read as an option.
    pub fn build_args(reference: &str, format: &FormatSelector) -> Vec<String> {
        vec![
            "-f".to_string(),
            format.to_string(),
            "--get-url".to_string(),
            "--dump-json".to_string(),
            "--no-playlist".to_string(),
            "--".to_string(),
            reference.to_string(),
        ]
    }

    fn failure(&self, code: Option<i32>, stderr: impl Into<String>) -> ClipperError {
        ClipperError::ToolExecution {
            tool: tool_label(&self.program),
            code,
            stderr: stderr.into(),
        }
    }
}

#[async_trait]
impl DiscoveryTool for YtDlpTool {
    async fn dump_metadata(
        &self,
        reference: &str,
        format: &FormatSelector,
        timeout: Option<Duration>,
    ) -> Result<String> {
        let args = Self::build_args(reference, format);
        tracing::debug!("Running {} {}", self.program.display(), args.join(" "));

        let mut command = Command::new(&self.program);
        command
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let run = command.output();
        let output = match timeout {
            Some(limit) => tokio::time::timeout(limit, run).await.map_err(|_| {
                self.failure(
                    None,
                    format!("timed out after {:.1}s", limit.as_secs_f64()),
                )
            })?,
            None => run.await,
        }
        .map_err(|e| self.failure(None, format!("failed to start: {}", e)))?;

        let stderr = String::from_utf8_lossy(&output.stderr);
        if !output.status.success() {
            return Err(self.failure(output.status.code(), stderr.trim()));
        }

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        if !stderr.is_empty() {
            combined.push('\n');
            combined.push_str(&stderr);
        }

        Ok(combined)
    }
}
