//! Source inspection.
//!
//! - `StreamInspector`: out-of-process inspector abstraction (ffprobe in production)
//! - `LivenessProbe`: cheap retried presence check used by forwarding sessions
//! - `ProbeReport`: the structured inspector output consumed by the stream monitor

mod inspector;
mod liveness;
mod report;

pub use inspector::{FfprobeInspector, InspectDepth, StreamInspector};
pub use liveness::LivenessProbe;
pub use report::{ProbeFormat, ProbeReport, ProbeStream, StreamKind, parse_frame_rate};
