//! FFmpeg diagnostic output parsing.
//!
//! Workers report health and progress only through stderr, one line at a
//! time. Everything here is a pure function over a single line.

use std::sync::OnceLock;

use regex::Regex;

fn frame_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"frame=\s*(\d+)").expect("valid frame regex"))
}

fn bitrate_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"bitrate=\s*(\d+(?:\.\d+)?)\s*kbits/s").expect("valid bitrate regex")
    })
}

fn audio_bitrate_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(\d+) kb/s").expect("valid audio bitrate regex"))
}

/// Substrings that mark a line as reporting a fatal condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FatalMarker {
    Error,
    Failed,
}

impl FatalMarker {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Error => "Error",
            Self::Failed => "Failed",
        }
    }
}

/// Parse the cumulative frame counter (e.g. `frame=  130`).
pub fn parse_frame_count(line: &str) -> Option<u64> {
    frame_regex()
        .captures(line)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// Parse a bitrate announcement (e.g. `bitrate=2097.2kbits/s`) into bits per second.
pub fn parse_bitrate_announcement(line: &str) -> Option<u64> {
    let kbits: f64 = bitrate_regex()
        .captures(line)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())?;
    Some((kbits * 1000.0).round() as u64)
}

/// Parse the bitrate of an audio stream description
/// (e.g. `Stream #0:1: Audio: aac, 44100 Hz, stereo, fltp, 128 kb/s`) into bits per second.
pub fn parse_audio_bitrate(line: &str) -> Option<u64> {
    if !line.contains("Audio:") {
        return None;
    }
    let kbits: u64 = audio_bitrate_regex()
        .captures(line)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())?;
    Some(kbits * 1000)
}

/// Detect a fatal-condition marker in a diagnostic line.
pub fn detect_fatal_marker(line: &str) -> Option<FatalMarker> {
    if line.contains("Error") {
        Some(FatalMarker::Error)
    } else if line.contains("Failed") {
        Some(FatalMarker::Failed)
    } else {
        None
    }
}

/// Whether the line shows the worker has opened its first input, i.e. an
/// inbound connection is live.
pub fn is_input_connected(line: &str) -> bool {
    line.contains("Input #0")
}

#[cfg(test)]
mod tests {
    use super::*;

    const PROGRESS: &str =
        "frame=  130 fps= 30 q=-1.0 size=    1024kB time=00:00:04.33 bitrate=2097.2kbits/s speed=1.00x";

    #[test]
    fn test_parse_frame_count() {
        assert_eq!(parse_frame_count(PROGRESS), Some(130));
        assert_eq!(parse_frame_count("frame=7 fps=0.0"), Some(7));
        assert_eq!(parse_frame_count("size=512kB time=00:00:10.00"), None);
    }

    #[test]
    fn test_parse_bitrate_announcement() {
        assert_eq!(parse_bitrate_announcement(PROGRESS), Some(2_097_200));
        assert_eq!(
            parse_bitrate_announcement("bitrate= 800kbits/s speed=1x"),
            Some(800_000)
        );
        assert_eq!(parse_bitrate_announcement("bitrate=N/A speed=N/A"), None);
        assert_eq!(parse_bitrate_announcement("no bitrate here"), None);
    }

    #[test]
    fn test_parse_audio_bitrate() {
        let line = "  Stream #0:1: Audio: aac (LC), 44100 Hz, stereo, fltp, 128 kb/s";
        assert_eq!(parse_audio_bitrate(line), Some(128_000));

        // Video stream lines carry kb/s as well but must not be read as audio.
        let video = "  Stream #0:0: Video: h264, yuv420p, 1920x1080, 6000 kb/s, 30 fps";
        assert_eq!(parse_audio_bitrate(video), None);

        assert_eq!(parse_audio_bitrate("  Stream #0:1: Audio: opus, 48000 Hz"), None);
    }

    #[test]
    fn test_detect_fatal_marker() {
        assert_eq!(
            detect_fatal_marker("Error opening input: Connection refused"),
            Some(FatalMarker::Error)
        );
        assert_eq!(
            detect_fatal_marker("Failed to update header with correct duration."),
            Some(FatalMarker::Failed)
        );
        assert_eq!(detect_fatal_marker(PROGRESS), None);
        assert_eq!(FatalMarker::Failed.as_str(), "Failed");
    }

    #[test]
    fn test_is_input_connected() {
        assert!(is_input_connected(
            "Input #0, mpegts, from 'srt://0.0.0.0:5000?mode=listener':"
        ));
        assert!(!is_input_connected("Output #0, flv, to 'rtmp://127.0.0.1/live/srt_key':"));
    }
}
