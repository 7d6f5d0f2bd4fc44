//! Metric derivation and the per-stream series.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::probe::{ProbeReport, StreamKind};

/// Externally supplied overrides for a stream whose internals the
/// inspector cannot resolve yet. Zero counts as "not forced".
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForcedMetrics {
    pub video_bitrate: Option<u64>,
    pub audio_bitrate: Option<u64>,
    pub frame_rate: Option<f64>,
}

impl ForcedMetrics {
    pub fn video(&self) -> Option<u64> {
        self.video_bitrate.filter(|v| *v > 0)
    }

    pub fn audio(&self) -> Option<u64> {
        self.audio_bitrate.filter(|v| *v > 0)
    }

    pub fn fps(&self) -> Option<f64> {
        self.frame_rate.filter(|v| *v > 0.0)
    }

    /// True when no field would override anything.
    pub fn is_empty(&self) -> bool {
        self.video().is_none() && self.audio().is_none() && self.fps().is_none()
    }
}

/// Values derived from one inspector report.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DerivedMetrics {
    pub video_bitrate: u64,
    pub audio_bitrate: u64,
    pub frame_rate: f64,
    pub resolution: String,
    pub video_codec: String,
    pub audio_codec: String,
}

/// Derive effective bitrates, frame rate and stream descriptors.
///
/// Forced values win field by field. Otherwise video and audio bitrates come
/// from the stream's own `bit_rate`, then its `BPS` tag. A video bitrate that
/// is still zero is estimated as container bitrate minus the audio bitrate
/// (or `default_audio_bitrate` when audio is unknown). All rates are clamped
/// to be non-negative.
pub fn calculate_bitrates(
    report: &ProbeReport,
    forced: Option<&ForcedMetrics>,
    default_audio_bitrate: u64,
) -> DerivedMetrics {
    let forced_video = forced.and_then(ForcedMetrics::video);
    let forced_audio = forced.and_then(ForcedMetrics::audio);
    let forced_fps = forced.and_then(ForcedMetrics::fps);

    let mut video_bitrate = forced_video.map(|v| v as i64).unwrap_or(0);
    let mut audio_bitrate = forced_audio.map(|v| v as i64).unwrap_or(0);
    let mut frame_rate = forced_fps.unwrap_or(0.0);
    let mut derived = DerivedMetrics::default();

    for stream in &report.streams {
        match stream.kind() {
            StreamKind::Video => {
                if forced_video.is_none() {
                    video_bitrate = stream.effective_bit_rate();
                }
                if forced_fps.is_none() {
                    frame_rate = stream.frame_rate();
                }
                derived.video_codec = stream.codec_name.clone().unwrap_or_default();
                derived.resolution = stream.resolution();
            }
            StreamKind::Audio => {
                if forced_audio.is_none() {
                    audio_bitrate = stream.effective_bit_rate();
                }
                derived.audio_codec = stream.codec_name.clone().unwrap_or_default();
            }
            StreamKind::Other => {}
        }
    }

    if video_bitrate == 0 && forced_video.is_none() {
        let total = report.container_bit_rate();
        if total != 0 {
            let audio_estimate = if audio_bitrate != 0 {
                audio_bitrate
            } else {
                default_audio_bitrate as i64
            };
            video_bitrate = total - audio_estimate;
        }
    }

    derived.video_bitrate = video_bitrate.max(0) as u64;
    derived.audio_bitrate = audio_bitrate.max(0) as u64;
    derived.frame_rate = if frame_rate.is_finite() { frame_rate.max(0.0) } else { 0.0 };
    derived
}

/// One appended observation. Immutable once recorded.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricSample {
    /// Unix epoch milliseconds.
    pub timestamp: i64,
    pub video_bitrate: u64,
    pub audio_bitrate: u64,
    pub frame_rate: f64,
    pub resolution: String,
    pub video_codec: String,
    pub audio_codec: String,
    /// Tick count at the time of this sample.
    pub duration: u64,
}

/// Rolling window plus unbounded history of one stream's metrics.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamMetricsSeries {
    pub video_bitrate: VecDeque<u64>,
    pub audio_bitrate: VecDeque<u64>,
    pub frame_rate: VecDeque<f64>,
    pub timestamp: VecDeque<i64>,
    pub resolution: String,
    pub video_codec: String,
    pub audio_codec: String,
    /// Number of polling ticks that produced a sample.
    pub duration: u64,
    pub is_active: bool,
    pub full_history: Vec<MetricSample>,
    #[serde(skip)]
    window: usize,
}

impl StreamMetricsSeries {
    pub fn new(window: usize) -> Self {
        let window = window.max(1);
        Self {
            video_bitrate: VecDeque::with_capacity(window),
            audio_bitrate: VecDeque::with_capacity(window),
            frame_rate: VecDeque::with_capacity(window),
            timestamp: VecDeque::with_capacity(window),
            resolution: String::new(),
            video_codec: String::new(),
            audio_codec: String::new(),
            duration: 0,
            is_active: true,
            full_history: Vec::new(),
            window,
        }
    }

    pub fn window(&self) -> usize {
        self.window
    }

    /// Append a sample and advance the tick counter.
    pub fn push(&mut self, metrics: DerivedMetrics, timestamp: i64) -> &MetricSample {
        if self.timestamp.len() == self.window {
            self.video_bitrate.pop_front();
            self.audio_bitrate.pop_front();
            self.frame_rate.pop_front();
            self.timestamp.pop_front();
        }
        self.video_bitrate.push_back(metrics.video_bitrate);
        self.audio_bitrate.push_back(metrics.audio_bitrate);
        self.frame_rate.push_back(metrics.frame_rate);
        self.timestamp.push_back(timestamp);
        self.duration += 1;

        self.resolution.clone_from(&metrics.resolution);
        self.video_codec.clone_from(&metrics.video_codec);
        self.audio_codec.clone_from(&metrics.audio_codec);

        self.full_history.push(MetricSample {
            timestamp,
            video_bitrate: metrics.video_bitrate,
            audio_bitrate: metrics.audio_bitrate,
            frame_rate: metrics.frame_rate,
            resolution: metrics.resolution,
            video_codec: metrics.video_codec,
            audio_codec: metrics.audio_codec,
            duration: self.duration,
        });
        &self.full_history[self.full_history.len() - 1]
    }

    pub fn latest(&self) -> Option<&MetricSample> {
        self.full_history.last()
    }

    pub fn len(&self) -> usize {
        self.timestamp.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamp.is_empty()
    }

    /// Summary used for the stream-ended notification.
    pub fn summary(&self, stream_key: &str) -> StreamSummary {
        let video_bitrate = self.video_bitrate.back().copied().unwrap_or(0);
        let audio_bitrate = self.audio_bitrate.back().copied().unwrap_or(0);
        StreamSummary {
            stream_key: stream_key.to_string(),
            duration: self.duration,
            resolution: self.resolution.clone(),
            video_codec: self.video_codec.clone(),
            audio_codec: self.audio_codec.clone(),
            video_bitrate,
            audio_bitrate,
            total_bitrate: video_bitrate + audio_bitrate,
        }
    }
}

/// Final figures of a stream that stopped publishing.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamSummary {
    pub stream_key: String,
    pub duration: u64,
    pub resolution: String,
    pub video_codec: String,
    pub audio_codec: String,
    pub video_bitrate: u64,
    pub audio_bitrate: u64,
    pub total_bitrate: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::{ProbeFormat, ProbeStream};
    use std::collections::HashMap;

    fn video(bit_rate: Option<&str>) -> ProbeStream {
        ProbeStream {
            codec_type: Some("video".to_string()),
            codec_name: Some("h264".to_string()),
            width: Some(1280),
            height: Some(720),
            r_frame_rate: Some("30/1".to_string()),
            bit_rate: bit_rate.map(str::to_string),
            tags: None,
        }
    }

    fn audio(bit_rate: Option<&str>) -> ProbeStream {
        ProbeStream {
            codec_type: Some("audio".to_string()),
            codec_name: Some("aac".to_string()),
            bit_rate: bit_rate.map(str::to_string),
            ..Default::default()
        }
    }

    fn report(streams: Vec<ProbeStream>, container: Option<&str>) -> ProbeReport {
        ProbeReport {
            streams,
            format: container.map(|b| ProbeFormat {
                bit_rate: Some(b.to_string()),
            }),
        }
    }

    #[test]
    fn video_bitrate_estimated_from_container() {
        let r = report(vec![video(Some("0"))], Some("1128000"));
        let m = calculate_bitrates(&r, None, 128_000);
        assert_eq!(m.video_bitrate, 1_000_000);
        assert_eq!(m.audio_bitrate, 0);
        assert_eq!(m.frame_rate, 30.0);
        assert_eq!(m.resolution, "1280x720");
        assert_eq!(m.video_codec, "h264");
    }

    #[test]
    fn container_estimate_uses_known_audio() {
        let r = report(vec![video(None), audio(Some("96000"))], Some("1096000"));
        let m = calculate_bitrates(&r, None, 128_000);
        assert_eq!(m.video_bitrate, 1_000_000);
        assert_eq!(m.audio_bitrate, 96_000);
        assert_eq!(m.audio_codec, "aac");
    }

    #[test]
    fn bps_tag_fallback() {
        let mut v = video(None);
        v.tags = Some(HashMap::from([("BPS".to_string(), "2000000".to_string())]));
        let m = calculate_bitrates(&report(vec![v], Some("9999999")), None, 128_000);
        assert_eq!(m.video_bitrate, 2_000_000);
    }

    #[test]
    fn derived_rates_are_clamped() {
        let r = report(vec![video(None)], Some("64000"));
        let m = calculate_bitrates(&r, None, 128_000);
        assert_eq!(m.video_bitrate, 0);
    }

    #[test]
    fn forced_fields_override_individually() {
        let r = report(vec![video(Some("3000000")), audio(Some("96000"))], None);
        let forced = ForcedMetrics {
            video_bitrate: Some(4_000_000),
            audio_bitrate: None,
            frame_rate: Some(25.0),
        };
        let m = calculate_bitrates(&r, Some(&forced), 128_000);
        assert_eq!(m.video_bitrate, 4_000_000);
        assert_eq!(m.audio_bitrate, 96_000);
        assert_eq!(m.frame_rate, 25.0);
    }

    #[test]
    fn forced_zero_is_not_an_override() {
        let forced = ForcedMetrics {
            video_bitrate: Some(0),
            audio_bitrate: Some(0),
            frame_rate: Some(0.0),
        };
        assert!(forced.is_empty());
        let m = calculate_bitrates(&report(vec![video(Some("3000000"))], None), Some(&forced), 0);
        assert_eq!(m.video_bitrate, 3_000_000);
    }

    #[test]
    fn forced_values_survive_empty_report() {
        let forced = ForcedMetrics {
            video_bitrate: Some(2_500_000),
            audio_bitrate: Some(128_000),
            frame_rate: Some(30.0),
        };
        let m = calculate_bitrates(&ProbeReport::default(), Some(&forced), 128_000);
        assert_eq!(m.video_bitrate, 2_500_000);
        assert_eq!(m.audio_bitrate, 128_000);
        assert_eq!(m.frame_rate, 30.0);
    }

    #[test]
    fn window_is_bounded_but_history_is_not() {
        let mut series = StreamMetricsSeries::new(3);
        for i in 0..5u64 {
            series.push(
                DerivedMetrics {
                    video_bitrate: i,
                    ..Default::default()
                },
                i as i64,
            );
        }
        assert_eq!(series.len(), 3);
        assert_eq!(series.video_bitrate, VecDeque::from([2, 3, 4]));
        assert_eq!(series.full_history.len(), 5);
        assert_eq!(series.duration, 5);
        assert_eq!(series.latest().unwrap().duration, 5);
    }

    #[test]
    fn summary_uses_last_sample() {
        let mut series = StreamMetricsSeries::new(30);
        series.push(
            DerivedMetrics {
                video_bitrate: 2_000_000,
                audio_bitrate: 128_000,
                resolution: "1920x1080".to_string(),
                video_codec: "h264".to_string(),
                audio_codec: "aac".to_string(),
                ..Default::default()
            },
            0,
        );
        let summary = series.summary("cam1");
        assert_eq!(summary.total_bitrate, 2_128_000);
        assert_eq!(summary.duration, 1);
        assert_eq!(summary.resolution, "1920x1080");
    }
}
