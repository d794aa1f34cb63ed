//! Voice capture and endpointing for hands-free ordering flows.
//!
//! The crate listens on a microphone, classifies fixed-size frames as speech
//! or silence, and decides when an utterance is over: bounded leading
//! silence before any speech, bounded trailing silence after it. Committed
//! audio is written to a timestamped mono WAV file.
//!
//! [`CaptureOrchestrator`] owns the whole session; [`StatusMonitor`] streams
//! status snapshots to a callback; [`FrameSource`] is the seam that lets
//! tests and simulators replace the microphone.

pub mod config;
pub mod detector;
pub mod endpoint;
pub mod error;
pub mod meter;
pub mod monitor;
pub mod orchestrator;
pub mod source;
pub mod status;
mod telemetry;
#[cfg(feature = "vad_earshot")]
pub mod vad_earshot;

pub use config::CaptureConfig;
pub use detector::{ModelInfo, SpeechDetector, UnavailableDetector};
pub use endpoint::{RecordingResult, StopReason};
pub use error::{CaptureError, ErrorCategory, ErrorRecord};
pub use monitor::StatusMonitor;
pub use orchestrator::{CaptureOrchestrator, DiagnosticReport, Diagnostics, StopHandle};
pub use source::{FrameRead, FrameSource, HardwareProbe, MicFrameSource};
pub use status::{CaptureStatus, DetectionState, StatusHandle};
pub use telemetry::init_tracing;
