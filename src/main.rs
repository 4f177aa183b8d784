use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use clip_ripper::{
    output, Cli, Commands, Config, ExtractionRequest, FormatSelector, Session, SessionConfig,
};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let default_filter = if cli.verbose {
        "clip_ripper=debug"
    } else {
        "clip_ripper=info"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = match &cli.config {
        Some(path) => Config::load_from(path).await?,
        None => Config::load().await?,
    };

    match cli.command {
        Commands::Extract {
            reference,
            start,
            end,
            output_dir,
            formats,
            timeout,
            audio_codec,
            preset,
            audio_options,
            progress_stream,
            show_tool_output,
            output,
        } => {
            ExtractionRequest::check_range(start, end)?;

            let mut session_config = SessionConfig::from_config(&config);
            if let Some(dir) = output_dir {
                session_config.set_download_dir(dir);
            }
            if !formats.is_empty() {
                session_config.set_format(FormatSelector::new(formats));
            }
            if let Some(secs) = timeout {
                session_config.set_timeout_secs(secs);
            }
            if let Some(codec) = audio_codec {
                session_config.set_audio_codec(codec);
            }
            if let Some(preset) = preset {
                session_config.apply_preset(preset);
            }
            if !audio_options.is_empty() {
                session_config.set_audio_options(audio_options);
            }
            session_config.set_progress_channel(progress_stream);

            let progress = if cli.quiet {
                ProgressBar::hidden()
            } else {
                let bar = ProgressBar::new(progress_length(start, end));
                bar.set_style(
                    ProgressStyle::default_bar()
                        .template("{spinner:.green} [{bar:40.cyan/blue}] {percent}% {msg}")
                        .context("Invalid progress template")?
                        .progress_chars("=> "),
                );
                bar.enable_steady_tick(Duration::from_millis(120));
                bar
            };

            {
                let progress = progress.clone();
                session_config.on_progress(move |event| {
                    if let Some(elapsed) = event.elapsed_seconds() {
                        progress.set_position((elapsed * 100.0) as u64);
                    }
                    progress.set_message(format!(
                        "{} @ {} {}",
                        event.size,
                        event.bitrate,
                        event.speed.as_deref().unwrap_or("")
                    ));
                });
            }
            if show_tool_output {
                let progress = progress.clone();
                session_config.on_debug(move |kind, line| {
                    progress.suspend(|| eprintln!("[{}] {}", kind, line));
                });
            }

            let session = Session::new(reference.as_str(), session_config)?;

            progress.set_message("Resolving video...");
            tracing::info!("Starting extraction for: {}", reference);

            let result = session.extract(start, end).await;
            progress.finish_and_clear();
            let result = result?;

            let rendered = output::render_extraction(&reference, &result, &output)?;
            output::print_to_console(&rendered);
        }
        Commands::Info {
            reference,
            formats,
            output,
        } => {
            let mut session_config = SessionConfig::from_config(&config);
            if !formats.is_empty() {
                session_config.set_format(FormatSelector::new(formats));
            }

            let session = Session::new(reference.as_str(), session_config)?;
            let metadata = session.video_data().await?;

            let rendered = output::render_metadata(&reference, &metadata, &output)?;
            output::print_to_console(&rendered);
        }
        Commands::Config { show } => {
            if show {
                config.display();
            } else {
                let path = match &cli.config {
                    Some(path) => path.clone(),
                    None => Config::config_path()?,
                };
                println!("Configuration file: {}", path.display());
                println!("Edit it to change the defaults, or run `clipper config --show`.");
            }
        }
    }

    Ok(())
}

/// Bar length in hundredths of a second of clip.
fn progress_length(start: u64, end: u64) -> u64 {
    end.saturating_sub(start).saturating_mul(100)
}
