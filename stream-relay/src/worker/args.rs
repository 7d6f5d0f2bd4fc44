//! Worker command-line builders.
//!
//! Each builder returns the full argument list for one worker role. The
//! relay role copies encoded streams verbatim; the fallback role encodes a
//! looped placeholder image with synthesized silence; the ingest role
//! listens for an SRT caller and republishes it unmodified.

use std::path::Path;

use crate::config::ForwardingConfig;

/// Join a destination ingest URL and its stream key.
pub fn destination_locator(target_url: &str, target_key: &str) -> String {
    format!(
        "{}/{}",
        target_url.trim_end_matches('/'),
        target_key.trim_start_matches('/')
    )
}

/// Arguments for relaying `source` to `destination` without re-encoding.
pub fn relay_args(source: &str, destination: &str) -> Vec<String> {
    let mut args = Vec::new();

    // Read the input at its native rate
    args.extend(["-re".to_string(), "-i".to_string(), source.to_string()]);

    // Copy streams without re-encoding
    args.extend(["-c".to_string(), "copy".to_string()]);
    args.extend(["-bufsize".to_string(), "5000k".to_string()]);

    args.extend(["-f".to_string(), "flv".to_string(), destination.to_string()]);
    args
}

/// Arguments for streaming the placeholder signal to `destination`.
pub fn fallback_args(image: &Path, destination: &str, config: &ForwardingConfig) -> Vec<String> {
    let mut args = Vec::new();

    // 1. Looped still image
    args.extend([
        "-re".to_string(),
        "-loop".to_string(),
        "1".to_string(),
        "-i".to_string(),
        image.to_string_lossy().to_string(),
    ]);

    // 2. Synthesized silence
    args.extend([
        "-f".to_string(),
        "lavfi".to_string(),
        "-i".to_string(),
        "anullsrc=r=44100:cl=stereo".to_string(),
    ]);

    // 3. Low-latency video profile
    let gop = config.fallback_frame_rate.saturating_mul(2);
    args.extend([
        "-c:v".to_string(),
        "libx264".to_string(),
        "-preset".to_string(),
        "veryfast".to_string(),
        "-tune".to_string(),
        "zerolatency".to_string(),
        "-pix_fmt".to_string(),
        "yuv420p".to_string(),
        "-r".to_string(),
        config.fallback_frame_rate.to_string(),
        "-g".to_string(),
        gop.to_string(),
        "-b:v".to_string(),
        config.fallback_video_bitrate.clone(),
        "-maxrate".to_string(),
        config.fallback_video_bitrate.clone(),
        "-bufsize".to_string(),
        "5000k".to_string(),
    ]);

    // 4. Audio
    args.extend([
        "-c:a".to_string(),
        "aac".to_string(),
        "-b:a".to_string(),
        config.fallback_audio_bitrate.clone(),
        "-ar".to_string(),
        "44100".to_string(),
        "-shortest".to_string(),
    ]);

    args.extend(["-f".to_string(), "flv".to_string(), destination.to_string()]);
    args
}

/// Arguments for the SRT listener that republishes into `target`.
pub fn ingest_args(port: u16, target: &str) -> Vec<String> {
    let mut args = Vec::new();

    args.extend([
        "-i".to_string(),
        format!("srt://0.0.0.0:{}?mode=listener", port),
    ]);
    args.extend([
        "-c".to_string(),
        "copy".to_string(),
        "-bufsize".to_string(),
        "5000k".to_string(),
    ]);
    args.extend(["-f".to_string(), "flv".to_string(), target.to_string()]);
    args
}
