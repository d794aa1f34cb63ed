//! Speech activity detection: the detector abstraction, bounded-retry
//! loading, and the per-session classifier selection.

use crate::config::CaptureConfig;
use crate::meter::mean_abs;
use serde::Serialize;
use tracing::warn;

/// Attempts made before a detector load is considered permanently failed.
pub const MAX_LOAD_ATTEMPTS: usize = 3;

/// The energy fallback fires when the frame's mean absolute level exceeds
/// `vad_threshold` scaled by this factor.
pub const FALLBACK_ENERGY_SCALE: f32 = 10.0;

/// Frame-by-frame speech classifier backed by a pretrained model.
///
/// `classify` must never abort a capture session: implementations fail soft,
/// returning `false` and logging when the model errors on a single frame.
pub trait SpeechDetector: Send {
    /// Whether the underlying model loaded and can classify frames.
    fn is_ready(&self) -> bool;

    /// Classify one mono f32 frame as speech (`true`) or non-speech.
    fn classify(&mut self, frame: &[f32], sample_rate: u32, threshold: f32) -> bool;

    fn name(&self) -> &'static str {
        "unknown_detector"
    }
}

/// Diagnostics view of the configured detector.
#[derive(Debug, Clone, Serialize)]
pub struct ModelInfo {
    pub engine: &'static str,
    pub model_loaded: bool,
    pub vad_threshold: f32,
    pub sample_rate: u32,
}

/// Stand-in used when no model could be loaded. Never ready, so the
/// orchestrator switches to the energy fallback.
#[derive(Debug, Default)]
pub struct UnavailableDetector;

impl SpeechDetector for UnavailableDetector {
    fn is_ready(&self) -> bool {
        false
    }

    fn classify(&mut self, _frame: &[f32], _sample_rate: u32, _threshold: f32) -> bool {
        warn!("speech detector not ready, frame classified as non-speech");
        false
    }

    fn name(&self) -> &'static str {
        "unavailable"
    }
}

/// Load the default detector, retrying transient failures a fixed number of
/// times. A permanent failure yields an [`UnavailableDetector`], which keeps
/// `is_ready()` false forever for that instance.
pub fn load_default_detector(config: &CaptureConfig) -> Box<dyn SpeechDetector> {
    for attempt in 1..=MAX_LOAD_ATTEMPTS {
        match try_build_detector(config) {
            Ok(detector) => return detector,
            Err(err) => {
                warn!(attempt, max = MAX_LOAD_ATTEMPTS, %err, "speech detector load failed");
            }
        }
    }
    Box::new(UnavailableDetector)
}

#[cfg(feature = "vad_earshot")]
fn try_build_detector(config: &CaptureConfig) -> anyhow::Result<Box<dyn SpeechDetector>> {
    Ok(Box::new(crate::vad_earshot::EarshotDetector::from_config(
        config,
    )?))
}

#[cfg(not(feature = "vad_earshot"))]
fn try_build_detector(_config: &CaptureConfig) -> anyhow::Result<Box<dyn SpeechDetector>> {
    anyhow::bail!("built without the 'vad_earshot' feature; no detector model available")
}

/// Classification strategy chosen once per session, based on detector
/// readiness at session start.
pub enum Classifier<'a> {
    /// The loaded detector model.
    Model(&'a mut dyn SpeechDetector),
    /// Volume heuristic holding the configured `vad_threshold`.
    EnergyThreshold(f32),
}

impl Classifier<'_> {
    pub fn classify(&mut self, frame: &[f32], sample_rate: u32, threshold: f32) -> bool {
        match self {
            Classifier::Model(detector) => detector.classify(frame, sample_rate, threshold),
            Classifier::EnergyThreshold(vad_threshold) => {
                mean_abs(frame) > *vad_threshold * FALLBACK_ENERGY_SCALE
            }
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Classifier::Model(detector) => detector.name(),
            Classifier::EnergyThreshold(_) => "energy_threshold",
        }
    }
}
