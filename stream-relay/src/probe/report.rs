//! Inspector output model.
//!
//! Mirrors the subset of ffprobe's JSON output the engine reads. Numeric
//! fields arrive as strings (`"bit_rate": "2500000"`) and may be absent or
//! `"N/A"`, so accessors parse leniently.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Structured description of a source.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProbeReport {
    #[serde(default)]
    pub streams: Vec<ProbeStream>,
    #[serde(default)]
    pub format: Option<ProbeFormat>,
}

/// One elementary stream.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProbeStream {
    #[serde(default)]
    pub codec_type: Option<String>,
    #[serde(default)]
    pub codec_name: Option<String>,
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
    /// Rational frame-rate expression such as `30/1` or `30000/1001`.
    #[serde(default)]
    pub r_frame_rate: Option<String>,
    #[serde(default)]
    pub bit_rate: Option<String>,
    #[serde(default)]
    pub tags: Option<HashMap<String, String>>,
}

/// Container-level information.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProbeFormat {
    #[serde(default)]
    pub bit_rate: Option<String>,
}

/// Elementary stream kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Video,
    Audio,
    Other,
}

impl ProbeReport {
    /// Parse inspector JSON output.
    pub fn from_json(raw: &str) -> crate::Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    /// Whether any stream entry is present.
    pub fn has_streams(&self) -> bool {
        !self.streams.is_empty()
    }

    /// Container bit rate in bps, zero when unknown.
    pub fn container_bit_rate(&self) -> i64 {
        self.format
            .as_ref()
            .map(|f| parse_integer(f.bit_rate.as_deref()))
            .unwrap_or(0)
    }
}

impl ProbeStream {
    pub fn kind(&self) -> StreamKind {
        match self.codec_type.as_deref() {
            Some("video") => StreamKind::Video,
            Some("audio") => StreamKind::Audio,
            _ => StreamKind::Other,
        }
    }

    /// Own reported bit rate, falling back to the `BPS` tag; zero when neither is usable.
    pub fn effective_bit_rate(&self) -> i64 {
        let own = parse_integer(self.bit_rate.as_deref());
        if own != 0 {
            return own;
        }
        let tagged = self
            .tags
            .as_ref()
            .and_then(|tags| tags.get("BPS"))
            .map(String::as_str);
        parse_integer(tagged)
    }

    /// `WIDTHxHEIGHT`, empty when dimensions are unknown.
    pub fn resolution(&self) -> String {
        match (self.width, self.height) {
            (Some(w), Some(h)) => format!("{}x{}", w, h),
            _ => String::new(),
        }
    }

    /// Frame rate from the rational expression, zero when absent or degenerate.
    pub fn frame_rate(&self) -> f64 {
        self.r_frame_rate
            .as_deref()
            .map(parse_frame_rate)
            .unwrap_or(0.0)
    }
}

/// Evaluate a frame-rate expression (`num/den` or a plain number).
///
/// A zero denominator or unparsable input yields 0.
pub fn parse_frame_rate(expr: &str) -> f64 {
    let expr = expr.trim();
    let value = match expr.split_once('/') {
        Some((num, den)) => {
            let num: f64 = match num.trim().parse() {
                Ok(v) => v,
                Err(_) => return 0.0,
            };
            let den: f64 = match den.trim().parse() {
                Ok(v) => v,
                Err(_) => return 0.0,
            };
            if den == 0.0 {
                return 0.0;
            }
            num / den
        }
        None => expr.parse().unwrap_or(0.0),
    };

    if value.is_finite() { value } else { 0.0 }
}

/// Parse the leading integer of a numeric string, zero when unparsable.
fn parse_integer(value: Option<&str>) -> i64 {
    let Some(value) = value else {
        return 0;
    };
    let value = value.trim();
    if let Ok(v) = value.parse::<i64>() {
        return v;
    }
    // Some muxers report fractional values ("128000.000").
    value.parse::<f64>().map(|v| v as i64).unwrap_or(0)
}
