use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;

use crate::utils::tool_label;
use crate::{ClipperError, Result, TranscodeFailure};

/// Lines of stderr kept for error reports
const STDERR_TAIL_LINES: usize = 64;

/// Which pipe of the child a line came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    Stdout,
    Stderr,
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamKind::Stdout => write!(f, "out"),
            StreamKind::Stderr => write!(f, "err"),
        }
    }
}

/// Split a chunk of child output into complete lines.
///
/// Both `\n` and `\r` end a line; ffmpeg redraws its status line with `\r`.
/// Bytes after the last terminator stay in `pending` for the next chunk.
pub(crate) fn split_lines(pending: &mut Vec<u8>, chunk: &[u8]) -> Vec<String> {
    let mut lines = Vec::new();
    for &byte in chunk {
        if byte == b'\n' || byte == b'\r' {
            if !pending.is_empty() {
                lines.push(String::from_utf8_lossy(pending).into_owned());
                pending.clear();
            }
        } else {
            pending.push(byte);
        }
    }
    lines
}

async fn pump<R>(reader: R, kind: StreamKind, tx: mpsc::UnboundedSender<(StreamKind, String)>) -> std::io::Result<()>
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut pending = Vec::new();

    loop {
        let chunk = reader.fill_buf().await?;
        if chunk.is_empty() {
            break;
        }

        let consumed = chunk.len();
        let lines = split_lines(&mut pending, chunk);
        reader.consume(consumed);

        for line in lines {
            if tx.send((kind, line)).is_err() {
                return Ok(());
            }
        }
    }

    if !pending.is_empty() {
        let _ = tx.send((kind, String::from_utf8_lossy(&pending).into_owned()));
    }

    Ok(())
}

/// Bounded tail of the child's stderr
#[derive(Debug, Default)]
pub(crate) struct StderrTail {
    lines: VecDeque<String>,
}

impl StderrTail {
    pub fn push(&mut self, line: &str) {
        if self.lines.len() == STDERR_TAIL_LINES {
            self.lines.pop_front();
        }
        self.lines.push_back(line.to_string());
    }

    pub fn into_text(self) -> String {
        Vec::from(self.lines).join("\n")
    }
}

/// Run `program` to completion, handing every output line to `on_line` as it arrives.
///
/// Stdout and stderr are read on separate tasks so neither pipe can fill up
/// and stall the child. Lines keep their order within a stream; there is no
/// ordering across streams. On timeout the child is killed and reaped before
/// the error is returned.
pub async fn run_streaming<F>(
    program: &Path,
    args: &[String],
    timeout: Option<Duration>,
    mut on_line: F,
) -> Result<()>
where
    F: FnMut(StreamKind, &str),
{
    tracing::debug!("Running {} {}", program.display(), args.join(" "));

    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| ClipperError::ToolExecution {
            tool: tool_label(program),
            code: None,
            stderr: format!("failed to start: {}", e),
        })?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| std::io::Error::other("child stdout was not captured"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| std::io::Error::other("child stderr was not captured"))?;

    let (tx, mut rx) = mpsc::unbounded_channel();
    let readers = [
        tokio::spawn(pump(stdout, StreamKind::Stdout, tx.clone())),
        tokio::spawn(pump(stderr, StreamKind::Stderr, tx)),
    ];

    let mut tail = StderrTail::default();
    let streamed = async {
        while let Some((kind, line)) = rx.recv().await {
            if kind == StreamKind::Stderr {
                tail.push(&line);
            }
            on_line(kind, &line);
        }
        child.wait().await
    };

    let status = match timeout {
        Some(limit) => match tokio::time::timeout(limit, streamed).await {
            Ok(status) => status?,
            Err(_) => {
                tracing::warn!(
                    "{} timed out after {:.1}s, killing process",
                    tool_label(program),
                    limit.as_secs_f64()
                );
                if let Err(e) = child.kill().await {
                    tracing::warn!("Failed to kill {}: {}", tool_label(program), e);
                }
                for reader in &readers {
                    reader.abort();
                }
                return Err(ClipperError::Transcode {
                    failure: TranscodeFailure::TimedOut(limit),
                    stderr: tail.into_text(),
                });
            }
        },
        None => streamed.await?,
    };

    for reader in readers {
        match reader.await {
            Ok(Err(e)) => tracing::warn!("Error reading child output: {}", e),
            Err(e) => tracing::warn!("Output reader task failed: {}", e),
            Ok(Ok(())) => {}
        }
    }

    if status.success() {
        Ok(())
    } else {
        Err(ClipperError::Transcode {
            failure: TranscodeFailure::Exited(status.code()),
            stderr: tail.into_text(),
        })
    }
}
