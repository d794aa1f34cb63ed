//! Capture configuration and range validation.

use crate::error::CaptureError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Tunable parameters for one capture session.
///
/// A running session never observes a partial update: `CaptureOrchestrator`
/// swaps the whole struct atomically during a config hot-swap.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureConfig {
    /// Input sample rate in Hz.
    pub sample_rate: u32,
    /// Duration of one audio frame in seconds.
    pub frame_duration_s: f64,
    /// Silence tolerated before any speech is heard.
    pub max_leading_silence_s: f64,
    /// Silence after speech that ends the utterance.
    pub max_trailing_silence_s: f64,
    /// Minimum committed audio required for a valid recording.
    pub min_recording_s: f64,
    /// Speech probability threshold for the detector (0.0..=1.0).
    pub vad_threshold: f32,
    /// Output file name; a timestamp is prefixed to the file-name component.
    /// May include a directory, which must already exist.
    pub output_filename_template: String,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16_000,
            frame_duration_s: 0.5,
            max_leading_silence_s: 5.0,
            max_trailing_silence_s: 3.0,
            min_recording_s: 1.0,
            vad_threshold: 0.2,
            output_filename_template: "mic_input.wav".to_string(),
        }
    }
}

impl CaptureConfig {
    /// Check every field against its documented range. All violations are
    /// collected into a single `Config` error so callers see the full list.
    pub fn validate(&self) -> Result<(), CaptureError> {
        let mut errors = Vec::new();

        if self.sample_rate == 0 || self.sample_rate > 48_000 {
            errors.push(format!(
                "sample_rate must be within 1..=48000 Hz, got {}",
                self.sample_rate
            ));
        }
        if !(self.frame_duration_s > 0.0 && self.frame_duration_s <= 5.0) {
            errors.push(format!(
                "frame_duration_s must be within (0.0, 5.0], got {}",
                self.frame_duration_s
            ));
        }
        if !(self.max_leading_silence_s > 0.0) {
            errors.push(format!(
                "max_leading_silence_s must be positive, got {}",
                self.max_leading_silence_s
            ));
        }
        if !(self.max_trailing_silence_s > 0.0) {
            errors.push(format!(
                "max_trailing_silence_s must be positive, got {}",
                self.max_trailing_silence_s
            ));
        }
        if !(self.min_recording_s > 0.0) {
            errors.push(format!(
                "min_recording_s must be positive, got {}",
                self.min_recording_s
            ));
        }
        if !(0.0..=1.0).contains(&self.vad_threshold) {
            errors.push(format!(
                "vad_threshold must be within 0.0..=1.0, got {}",
                self.vad_threshold
            ));
        }
        if self
            .output_filename_template
            .rsplit(std::path::MAIN_SEPARATOR)
            .next()
            .map(str::is_empty)
            .unwrap_or(true)
        {
            errors.push("output_filename_template must name a file".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(CaptureError::Config(errors.join("; ")))
        }
    }

    /// Samples per frame at the configured rate.
    pub fn frame_samples(&self) -> usize {
        ((self.sample_rate as f64 * self.frame_duration_s).round() as usize).max(1)
    }

    /// Wall-clock duration of one frame.
    pub fn frame_period(&self) -> Duration {
        Duration::from_secs_f64(self.frame_duration_s)
    }
}
