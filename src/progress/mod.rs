use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

/// One status update from the transcoder, e.g.
/// `size=  1024.00KiB time=00:00:05.23 bitrate= 128.0kbits/s speed=1.5x`
///
/// `size` and `bitrate` are kept verbatim, unit suffix included.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressEvent {
    /// Output size so far, e.g. `1024.00KiB`
    pub size: String,

    /// Elapsed media time as `HH:MM:SS.hh`
    pub time: String,

    /// Current bitrate, e.g. `128.0kbits/s`
    pub bitrate: String,

    /// Encoding speed multiplier, e.g. `1.5x`; `None` when ffmpeg left it blank
    pub speed: Option<String>,
}

impl ProgressEvent {
    /// `time` converted to seconds.
    pub fn elapsed_seconds(&self) -> Option<f64> {
        let mut parts = self.time.splitn(3, ':');
        let hours: f64 = parts.next()?.parse().ok()?;
        let minutes: f64 = parts.next()?.parse().ok()?;
        let seconds: f64 = parts.next()?.parse().ok()?;
        Some(hours * 3600.0 + minutes * 60.0 + seconds)
    }
}

fn progress_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(
            r"(?ix)
            size=\s*(?P<size>\d+(?:\.\d+)?[KMG]i?B)
            \s+time=(?P<time>\d{2}:\d{2}:\d{2}\.\d{2})
            \s+bitrate=\s*(?P<bitrate>\d+(?:\.\d+)?[KMG](?:bits?|bytes?)/s)
            (?:\s+speed=\s*(?P<speed>\d+(?:\.\d+)?x?)?)?
            ",
        )
        .expect("progress pattern is valid")
    })
}

/// Parse one line of transcoder output.
///
/// Returns `None` for anything that is not a status line (banners, stream
/// mapping, configuration dumps); that is not an error.
pub fn parse_progress_line(line: &str) -> Option<ProgressEvent> {
    let captures = progress_pattern().captures(line)?;

    Some(ProgressEvent {
        size: captures["size"].to_string(),
        time: captures["time"].to_string(),
        bitrate: captures["bitrate"].to_string(),
        speed: captures.name("speed").map(|m| m.as_str().to_string()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_full_status_line() {
        let event = parse_progress_line(
            "size=  1024.00KiB time=00:00:05.23 bitrate= 128.0kbits/s speed=1.5x",
        )
        .unwrap();

        assert_eq!(event.size, "1024.00KiB");
        assert_eq!(event.time, "00:00:05.23");
        assert_eq!(event.bitrate, "128.0kbits/s");
        assert_eq!(event.speed.as_deref(), Some("1.5x"));
    }

    #[test]
    fn test_blank_speed_is_not_a_failure() {
        let event =
            parse_progress_line("size=  512KiB time=00:00:01.00 bitrate= 64.0kbits/s speed=")
                .unwrap();

        assert_eq!(event.size, "512KiB");
        assert_eq!(event.speed, None);
    }

    #[test]
    fn test_missing_speed_field() {
        let event = parse_progress_line("size=     256kB time=00:01:00.50 bitrate=  34.9kbits/s")
            .unwrap();

        assert_eq!(event.size, "256kB");
        assert_eq!(event.time, "00:01:00.50");
        assert_eq!(event.speed, None);
    }

    #[test]
    fn test_real_ffmpeg_status_line() {
        let line = "size=     120kB time=00:00:07.65 bitrate= 128.5kbits/s speed=15.2x    ";
        let event = parse_progress_line(line).unwrap();

        assert_eq!(event.bitrate, "128.5kbits/s");
        assert_eq!(event.speed.as_deref(), Some("15.2x"));
    }

    #[test]
    fn test_labels_are_case_insensitive() {
        let event =
            parse_progress_line("SIZE= 2MiB TIME=00:00:02.00 BITRATE= 1.2Mbits/s SPEED=2x").unwrap();

        assert_eq!(event.size, "2MiB");
        assert_eq!(event.bitrate, "1.2Mbits/s");
    }

    #[test]
    fn test_unrelated_lines_do_not_match() {
        assert_eq!(parse_progress_line("Stream mapping:"), None);
        assert_eq!(
            parse_progress_line("ffmpeg version 6.1 Copyright (c) 2000-2023 the FFmpeg developers"),
            None
        );
        assert_eq!(parse_progress_line(""), None);
        assert_eq!(
            parse_progress_line("size=N/A time=00:00:01.00 bitrate=N/A speed=1x"),
            None
        );
    }

    #[test]
    fn test_elapsed_seconds() {
        let event = parse_progress_line("size= 1KiB time=01:02:03.50 bitrate= 8.0kbits/s").unwrap();
        assert_eq!(event.elapsed_seconds(), Some(3723.5));
    }
}
