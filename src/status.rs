//! Capture status shared between the session loop and outside readers.

use chrono::{DateTime, Local};
use serde::Serialize;
use std::sync::{Arc, Mutex};

/// Where the endpointing state machine currently sits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectionState {
    /// No speech committed yet; leading-silence window is filling.
    #[default]
    Waiting,
    /// The current frame was classified as speech.
    Detecting,
    /// Speech has been committed; absorbing trailing silence.
    Recording,
    /// Stop decided; the recording is being finalized.
    Processing,
}

impl DetectionState {
    pub fn label(self) -> &'static str {
        match self {
            DetectionState::Waiting => "waiting",
            DetectionState::Detecting => "detecting",
            DetectionState::Recording => "recording",
            DetectionState::Processing => "processing",
        }
    }
}

/// Point-in-time view of the capture engine.
///
/// Written only by the capture loop; everyone else reads snapshots through
/// [`StatusHandle`].
#[derive(Debug, Clone, Default, Serialize)]
pub struct CaptureStatus {
    pub is_listening: bool,
    pub is_recording: bool,
    /// Mean absolute sample value of the most recent frame (0..1).
    pub current_volume_level: f32,
    pub recording_duration_s: f64,
    pub detection_state: DetectionState,
    pub last_speech_timestamp: Option<DateTime<Local>>,
    pub fallback_mode: bool,
    pub detector_ready: bool,
    pub hardware_available: bool,
}

/// Cheap cloneable handle for concurrent status reads.
#[derive(Debug, Clone, Default)]
pub struct StatusHandle {
    inner: Arc<Mutex<CaptureStatus>>,
}

impl StatusHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consistent snapshot of the current status.
    pub fn snapshot(&self) -> CaptureStatus {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub(crate) fn update(&self, apply: impl FnOnce(&mut CaptureStatus)) {
        let mut status = self
            .inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        apply(&mut status);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reflects_updates() {
        let handle = StatusHandle::new();
        handle.update(|s| {
            s.is_listening = true;
            s.detection_state = DetectionState::Detecting;
            s.current_volume_level = 0.25;
        });

        let snap = handle.snapshot();
        assert!(snap.is_listening);
        assert_eq!(snap.detection_state, DetectionState::Detecting);
        assert_eq!(snap.current_volume_level, 0.25);
    }

    #[test]
    fn clones_share_state() {
        let handle = StatusHandle::new();
        let other = handle.clone();
        handle.update(|s| s.fallback_mode = true);
        assert!(other.snapshot().fallback_mode);
    }

    #[test]
    fn status_serializes_with_lowercase_state() {
        let status = CaptureStatus {
            detection_state: DetectionState::Processing,
            ..CaptureStatus::default()
        };
        let json = serde_json::to_string(&status).expect("status should serialize");
        assert!(json.contains("\"processing\""), "got {json}");
    }
}
