//! Capture orchestration: hardware session ownership, the frame loop, mode
//! switching, config hot-swap, self-test and diagnostics.

use crate::config::CaptureConfig;
use crate::detector::{load_default_detector, Classifier, ModelInfo, SpeechDetector};
use crate::endpoint::{EndpointBuffer, RecordingResult};
use crate::error::{CaptureError, ErrorCategory, ErrorHistory, ErrorRecord};
use crate::meter::{mean_abs, peak_abs};
use crate::source::{probe_hardware, FrameRead, FrameSource, HardwareProbe, MicFrameSource};
use crate::status::{CaptureStatus, DetectionState, StatusHandle};
use chrono::Local;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Read failures absorbed before a session aborts with a `Recording` error.
const MAX_CONSECUTIVE_READ_FAILURES: usize = 8;

/// Length of the self-test recording.
const SELF_TEST_DURATION: Duration = Duration::from_secs(2);

/// Average volume below this counts as "no audio" in the self-test.
const AUDIO_PRESENCE_EPSILON: f32 = 1e-3;

/// Most recent history entries included in the diagnostics summary.
const DIAGNOSTICS_RECENT_ERRORS: usize = 5;

/// Cloneable handle for requesting a cooperative stop from another thread.
#[derive(Debug, Clone)]
pub struct StopHandle {
    flag: Arc<AtomicBool>,
}

impl StopHandle {
    /// The capture loop observes the flag at the top of each iteration, so
    /// the session winds down within one frame period.
    pub fn stop(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }
}

/// Owns one microphone session at a time and everything around it: the
/// detector, the endpoint buffer, shared status and the error history.
///
/// Hardware absence and detector load failure are reported, never fatal:
/// the orchestrator stays constructible and every operation is retryable.
pub struct CaptureOrchestrator {
    config: CaptureConfig,
    detector: Box<dyn SpeechDetector>,
    buffer: EndpointBuffer,
    status: StatusHandle,
    errors: ErrorHistory,
    fallback_mode: bool,
    stop_flag: Arc<AtomicBool>,
}

impl CaptureOrchestrator {
    /// Build an orchestrator with the default detector for the config.
    pub fn new(config: CaptureConfig) -> Result<Self, CaptureError> {
        config.validate()?;
        let detector = load_default_detector(&config);
        Self::with_detector(config, detector)
    }

    /// Build an orchestrator around a caller-supplied detector. Used by
    /// tests and by embedders with their own model.
    pub fn with_detector(
        config: CaptureConfig,
        detector: Box<dyn SpeechDetector>,
    ) -> Result<Self, CaptureError> {
        config.validate()?;
        let buffer = EndpointBuffer::new(&config)?;
        let mut orchestrator = Self {
            config,
            detector,
            buffer,
            status: StatusHandle::new(),
            errors: ErrorHistory::new(),
            fallback_mode: false,
            stop_flag: Arc::new(AtomicBool::new(false)),
        };
        if !orchestrator.detector.is_ready() {
            orchestrator.enter_fallback("speech detector failed to load");
        }
        let ready = orchestrator.detector.is_ready();
        let fallback = orchestrator.fallback_mode;
        orchestrator.status.update(|s| {
            s.detector_ready = ready;
            s.fallback_mode = fallback;
        });
        Ok(orchestrator)
    }

    /// One full capture session against the default microphone: probe the
    /// hardware, open the stream, run the endpointing loop and persist the
    /// committed audio. The stream is released on every exit path.
    pub fn capture_once(&mut self) -> Result<RecordingResult, CaptureError> {
        let probe = match probe_hardware(&self.config) {
            Ok(probe) => probe,
            Err(err) => {
                self.status.update(|s| s.hardware_available = false);
                return Err(self.fail(err));
            }
        };
        if !probe.sample_rate_supported {
            let err = CaptureError::Hardware(format!(
                "default device rate {} Hz is more than 1 kHz away from configured {} Hz",
                probe.default_sample_rate, self.config.sample_rate
            ));
            return Err(self.fail(err));
        }
        self.status.update(|s| s.hardware_available = true);

        let mut source = match MicFrameSource::open(&self.config) {
            Ok(source) => source,
            Err(err) => return Err(self.fail(err)),
        };
        self.capture_from_source(&mut source)
    }

    /// Run the endpointing session against an arbitrary frame source. This
    /// is the whole session minus hardware concerns, so simulators and
    /// tests can drive it with scripted audio.
    pub fn capture_from_source(
        &mut self,
        source: &mut dyn FrameSource,
    ) -> Result<RecordingResult, CaptureError> {
        self.stop_flag.store(false, Ordering::Relaxed);
        self.buffer.reset();
        if !self.fallback_mode && !self.detector.is_ready() {
            self.enter_fallback("speech detector not ready at session start");
        }

        let fallback = self.fallback_mode;
        let detector_ready = self.detector.is_ready();
        self.status.update(|s| {
            s.is_listening = true;
            s.is_recording = true;
            s.detection_state = DetectionState::Waiting;
            s.recording_duration_s = 0.0;
            s.current_volume_level = 0.0;
            s.fallback_mode = fallback;
            s.detector_ready = detector_ready;
        });
        let loop_result = self.run_loop(source);
        let result = match loop_result {
            Ok(()) => self.buffer.finalize(),
            Err(err) => Err(err),
        };

        self.status.update(|s| {
            s.is_listening = false;
            s.is_recording = false;
            s.detection_state = DetectionState::Waiting;
            s.current_volume_level = 0.0;
        });

        result.map_err(|err| self.fail(err))
    }

    /// The read → classify → ingest → stop-decision loop.
    fn run_loop(&mut self, source: &mut dyn FrameSource) -> Result<(), CaptureError> {
        let wait = self.config.frame_period();
        let sample_rate = self.config.sample_rate;
        let threshold = self.config.vad_threshold;
        let started = Instant::now();

        // Classifier selection happens once per session: either the loaded
        // model, or the energy heuristic when the detector never came up.
        let mut classifier = if self.fallback_mode {
            Classifier::EnergyThreshold(threshold)
        } else {
            Classifier::Model(self.detector.as_mut())
        };
        info!(
            mode = classifier.label(),
            sample_rate, "capture session started"
        );
        let mut consecutive_failures = 0usize;

        loop {
            if self.stop_flag.load(Ordering::Relaxed) {
                info!("capture stopped by caller");
                self.status
                    .update(|s| s.detection_state = DetectionState::Processing);
                return Ok(());
            }

            match source.read_frame(wait) {
                FrameRead::Frame(frame) => {
                    consecutive_failures = 0;
                    let volume = mean_abs(&frame);
                    let is_speech = classifier.classify(&frame, sample_rate, threshold);
                    let committed = self.buffer.has_committed();
                    self.status.update(|s| {
                        s.current_volume_level = volume;
                        s.recording_duration_s = started.elapsed().as_secs_f64();
                        if is_speech {
                            s.detection_state = DetectionState::Detecting;
                            s.last_speech_timestamp = Some(Local::now());
                        } else if committed {
                            s.detection_state = DetectionState::Recording;
                        } else {
                            s.detection_state = DetectionState::Waiting;
                        }
                    });
                    self.buffer.ingest(frame, is_speech);
                    if let Some(reason) = self.buffer.should_stop() {
                        info!(reason = reason.label(), "endpoint reached");
                        self.status
                            .update(|s| s.detection_state = DetectionState::Processing);
                        return Ok(());
                    }
                }
                FrameRead::Timeout => {
                    consecutive_failures += 1;
                    debug!(consecutive_failures, "no frame within one frame period");
                    if consecutive_failures >= MAX_CONSECUTIVE_READ_FAILURES {
                        return Err(CaptureError::Recording(format!(
                            "{consecutive_failures} consecutive frame reads failed"
                        )));
                    }
                }
                FrameRead::Failed(message) => {
                    // A single bad read never aborts the session.
                    consecutive_failures += 1;
                    warn!(%message, "frame read failed");
                    self.errors.record(
                        ErrorCategory::Recording,
                        format!("frame read failed: {message}"),
                    );
                    if consecutive_failures >= MAX_CONSECUTIVE_READ_FAILURES {
                        return Err(CaptureError::Recording(format!(
                            "{consecutive_failures} consecutive frame reads failed"
                        )));
                    }
                }
                FrameRead::Disconnected => {
                    return Err(CaptureError::Recording(
                        "audio stream disconnected".to_string(),
                    ));
                }
            }
        }
    }

    /// Signal the active session (if any) to stop cooperatively.
    pub fn stop(&self) {
        self.stop_flag.store(true, Ordering::Relaxed);
    }

    /// Handle for stopping the session from another thread.
    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            flag: self.stop_flag.clone(),
        }
    }

    /// Consistent snapshot of the current status.
    pub fn status(&self) -> CaptureStatus {
        self.status.snapshot()
    }

    /// Cheap handle for concurrent status reads, e.g. by a `StatusMonitor`.
    pub fn status_handle(&self) -> StatusHandle {
        self.status.clone()
    }

    pub fn config(&self) -> &CaptureConfig {
        &self.config
    }

    pub fn fallback_mode(&self) -> bool {
        self.fallback_mode
    }

    pub fn detector_info(&self) -> ModelInfo {
        ModelInfo {
            engine: self.detector.name(),
            model_loaded: self.detector.is_ready(),
            vad_threshold: self.config.vad_threshold,
            sample_rate: self.config.sample_rate,
        }
    }

    /// Validate and atomically swap the configuration. An invalid config is
    /// rejected with no side effects; a reinitialization failure rolls back
    /// to the previous config and leaves the orchestrator usable.
    pub fn update_config(&mut self, new_config: CaptureConfig) -> Result<(), CaptureError> {
        if let Err(err) = new_config.validate() {
            self.errors.record(ErrorCategory::Config, err.to_string());
            return Err(err);
        }

        // Never let an active session keep running against a stale config.
        self.stop();

        let previous = std::mem::replace(&mut self.config, new_config);
        match self.reinitialize() {
            Ok(()) => {
                info!("configuration updated");
                Ok(())
            }
            Err(err) => {
                warn!(%err, "reinitialization failed, restoring previous configuration");
                self.config = previous;
                if let Err(rollback_err) = self.reinitialize() {
                    self.errors.record(
                        ErrorCategory::Unknown,
                        format!("rollback reinitialization failed: {rollback_err}"),
                    );
                }
                let err = CaptureError::Config(format!(
                    "config update failed, previous config restored: {err}"
                ));
                self.errors.record(ErrorCategory::Config, err.to_string());
                Err(err)
            }
        }
    }

    /// Rebuild the endpoint buffer and reload the detector for the current
    /// config.
    fn reinitialize(&mut self) -> Result<(), CaptureError> {
        self.buffer = EndpointBuffer::new(&self.config)?;
        self.detector = load_default_detector(&self.config);
        if !self.detector.is_ready() && !self.fallback_mode {
            self.enter_fallback("speech detector failed to load");
        }
        let ready = self.detector.is_ready();
        let fallback = self.fallback_mode;
        self.status.update(|s| {
            s.detector_ready = ready;
            s.fallback_mode = fallback;
        });
        Ok(())
    }

    /// Exercise the hardware, a short recording and the detector, and
    /// aggregate the results. Never fails: every sub-check failure is
    /// captured in the report.
    pub fn self_test(&mut self) -> DiagnosticReport {
        info!("self test started");

        let hardware = match probe_hardware(&self.config) {
            Ok(probe) => HardwareCheck {
                success: true,
                probe: Some(probe),
                error: None,
            },
            Err(err) => {
                self.errors.record(err.category(), err.to_string());
                HardwareCheck {
                    success: false,
                    probe: None,
                    error: Some(err.to_string()),
                }
            }
        };

        let mut clip = Vec::new();
        let recording = if hardware.success {
            match self.record_test_clip() {
                Ok(samples) => {
                    let average_volume = mean_abs(&samples);
                    let peak_volume = peak_abs(&samples);
                    let check = RecordingCheck {
                        success: true,
                        average_volume,
                        peak_volume,
                        audio_detected: average_volume > AUDIO_PRESENCE_EPSILON,
                        duration_s: SELF_TEST_DURATION.as_secs_f64(),
                        error: None,
                    };
                    clip = samples;
                    check
                }
                Err(err) => {
                    self.errors.record(err.category(), err.to_string());
                    RecordingCheck {
                        error: Some(err.to_string()),
                        ..RecordingCheck::failed()
                    }
                }
            }
        } else {
            RecordingCheck {
                error: Some("skipped: hardware unavailable".to_string()),
                ..RecordingCheck::failed()
            }
        };

        let detector = self.detector_check(&clip);
        let report = build_report(hardware, recording, detector);
        info!(success = report.overall_success, "self test finished");
        report
    }

    /// Record a short clip of raw samples for the self-test.
    fn record_test_clip(&mut self) -> Result<Vec<f32>, CaptureError> {
        let mut source = MicFrameSource::open(&self.config)?;
        let wait = self.config.frame_period();
        let deadline = Instant::now() + SELF_TEST_DURATION;
        let mut clip = Vec::new();
        let mut misses = 0usize;
        while Instant::now() < deadline {
            match source.read_frame(wait) {
                FrameRead::Frame(frame) => {
                    misses = 0;
                    clip.extend_from_slice(&frame);
                }
                FrameRead::Timeout | FrameRead::Failed(_) => {
                    misses += 1;
                    if misses >= MAX_CONSECUTIVE_READ_FAILURES {
                        return Err(CaptureError::Recording(
                            "test recording produced no frames".to_string(),
                        ));
                    }
                }
                FrameRead::Disconnected => {
                    return Err(CaptureError::Recording(
                        "audio stream disconnected during test recording".to_string(),
                    ));
                }
            }
        }
        if clip.is_empty() {
            return Err(CaptureError::Recording(
                "no samples captured during test recording".to_string(),
            ));
        }
        Ok(clip)
    }

    fn detector_check(&mut self, clip: &[f32]) -> DetectorCheck {
        let model = self.detector_info();
        let fallback_mode = self.fallback_mode;
        if !self.detector.is_ready() {
            return DetectorCheck {
                success: false,
                model,
                speech_detected: false,
                fallback_mode,
                error: Some("detector model not ready".to_string()),
            };
        }
        if clip.is_empty() {
            return DetectorCheck {
                success: false,
                model,
                speech_detected: false,
                fallback_mode,
                error: Some("no test audio available".to_string()),
            };
        }
        let speech_detected =
            self.detector
                .classify(clip, self.config.sample_rate, self.config.vad_threshold);
        DetectorCheck {
            success: true,
            model,
            speech_detected,
            fallback_mode,
            error: None,
        }
    }

    /// Recent errors, oldest first, capped at 100 entries.
    pub fn error_history(&self) -> Vec<ErrorRecord> {
        self.errors.snapshot()
    }

    pub fn clear_error_history(&mut self) {
        info!("error history cleared");
        self.errors.clear();
    }

    /// Serializable summary for external diagnostics surfaces.
    pub fn diagnostics(&self) -> Diagnostics {
        let history = self.errors.snapshot();
        let recent_start = history.len().saturating_sub(DIAGNOSTICS_RECENT_ERRORS);
        Diagnostics {
            fallback_mode: self.fallback_mode,
            model: self.detector_info(),
            hardware: probe_hardware(&self.config).ok(),
            status: self.status.snapshot(),
            error_count: history.len(),
            recent_errors: history[recent_start..].to_vec(),
            config: self.config.clone(),
        }
    }

    /// Full reinitialization: stop any session, clear the error history,
    /// leave fallback mode, reload the detector and re-probe the hardware.
    pub fn reset(&mut self) -> Result<(), CaptureError> {
        info!("capture engine reset");
        self.stop();
        self.errors.clear();
        self.fallback_mode = false;
        self.status.update(|s| *s = CaptureStatus::default());
        self.reinitialize()?;
        let hardware_available = probe_hardware(&self.config).is_ok();
        self.status
            .update(|s| s.hardware_available = hardware_available);
        Ok(())
    }

    /// Switch to the energy-threshold fallback and record why. Idempotent;
    /// only `reset()` leaves fallback mode.
    fn enter_fallback(&mut self, reason: &str) {
        if self.fallback_mode {
            return;
        }
        self.fallback_mode = true;
        warn!(reason, "switching to energy-threshold fallback");
        self.errors.record(ErrorCategory::DetectorModel, reason);
        self.status.update(|s| s.fallback_mode = true);
    }

    /// Record an error in the history before handing it to the caller.
    fn fail(&mut self, err: CaptureError) -> CaptureError {
        warn!(%err, "capture attempt failed");
        self.errors.record(err.category(), err.to_string());
        err
    }
}

/// Hardware sub-check of the self-test.
#[derive(Debug, Clone, Serialize)]
pub struct HardwareCheck {
    pub success: bool,
    pub probe: Option<HardwareProbe>,
    pub error: Option<String>,
}

/// Short-recording sub-check of the self-test.
#[derive(Debug, Clone, Serialize)]
pub struct RecordingCheck {
    pub success: bool,
    pub average_volume: f32,
    pub peak_volume: f32,
    pub audio_detected: bool,
    pub duration_s: f64,
    pub error: Option<String>,
}

impl RecordingCheck {
    fn failed() -> Self {
        Self {
            success: false,
            average_volume: 0.0,
            peak_volume: 0.0,
            audio_detected: false,
            duration_s: 0.0,
            error: None,
        }
    }
}

/// Detector sub-check of the self-test.
#[derive(Debug, Clone, Serialize)]
pub struct DetectorCheck {
    pub success: bool,
    pub model: ModelInfo,
    pub speech_detected: bool,
    pub fallback_mode: bool,
    pub error: Option<String>,
}

/// Aggregated self-test outcome with human-readable recommendations.
#[derive(Debug, Clone, Serialize)]
pub struct DiagnosticReport {
    pub hardware: HardwareCheck,
    pub recording: RecordingCheck,
    pub detector: DetectorCheck,
    pub overall_success: bool,
    pub recommendations: Vec<String>,
}

/// Serializable diagnostics summary for UI/automation layers.
#[derive(Debug, Clone, Serialize)]
pub struct Diagnostics {
    pub fallback_mode: bool,
    pub model: ModelInfo,
    pub hardware: Option<HardwareProbe>,
    pub status: CaptureStatus,
    pub error_count: usize,
    pub recent_errors: Vec<ErrorRecord>,
    pub config: CaptureConfig,
}

/// A working microphone and a working recording are required for overall
/// success; a dead detector only costs a recommendation, since sessions
/// still run in fallback mode.
fn build_report(
    hardware: HardwareCheck,
    recording: RecordingCheck,
    detector: DetectorCheck,
) -> DiagnosticReport {
    let mut recommendations = Vec::new();
    if !hardware.success {
        recommendations.push("no usable input device; connect a microphone".to_string());
    }
    if recording.success && !recording.audio_detected {
        recommendations
            .push("microphone level is very low; raise the volume or speak closer".to_string());
    }
    if !detector.success {
        recommendations
            .push("detector model unavailable; sessions will use the energy fallback".to_string());
    }
    let overall_success = hardware.success && recording.success;
    DiagnosticReport {
        hardware,
        recording,
        detector,
        overall_success,
        recommendations,
    }
}
