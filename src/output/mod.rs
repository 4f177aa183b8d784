use anyhow::Result;
use console::style;
use std::fmt::Write;

use crate::cli::OutputFormat;
use crate::metadata::VideoMetadata;
use crate::pipeline::ExtractionResult;
use crate::utils::{extract_domain, format_duration, format_file_size};

/// Render resolved metadata
pub fn render_metadata(reference: &str, metadata: &VideoMetadata, format: &OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Json => Ok(serde_json::to_string_pretty(metadata)?),
        OutputFormat::Text => Ok(describe_metadata(reference, metadata)),
    }
}

/// Render a finished extraction
pub fn render_extraction(reference: &str, result: &ExtractionResult, format: &OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Json => Ok(serde_json::to_string_pretty(result)?),
        OutputFormat::Text => {
            let mut text = describe_metadata(reference, &result.metadata);
            let size = fs_err::metadata(&result.local_file)
                .map(|m| format_file_size(m.len()))
                .unwrap_or_else(|_| "unknown size".to_string());
            writeln!(
                text,
                "{} {} ({})",
                style("Saved:").green().bold(),
                result.local_file.display(),
                size
            )?;
            Ok(text)
        }
    }
}

fn describe_metadata(reference: &str, metadata: &VideoMetadata) -> String {
    let mut text = String::new();
    let title = metadata.title().unwrap_or("(untitled)");

    // Writing to a String cannot fail
    let _ = writeln!(text, "{} {}", style("Title:").bold(), title);
    if let Some(domain) = extract_domain(reference) {
        let _ = writeln!(text, "{} {}", style("Source:").bold(), domain);
    }
    let _ = writeln!(
        text,
        "{} {}",
        style("Duration:").bold(),
        format_duration(metadata.duration_secs())
    );
    let _ = writeln!(text, "{} {}", style("Direct URL:").bold(), metadata.direct_url);
    text
}

/// Print rendered output to stdout
pub fn print_to_console(content: &str) {
    println!("{}", content.trim_end());
}
