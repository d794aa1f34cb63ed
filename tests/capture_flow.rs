//! End-to-end capture flow through the public API: scripted frame sources
//! drive a full session and the resulting WAV file is read back.

use std::collections::VecDeque;
use std::time::Duration;

use voicegate::{
    CaptureConfig, CaptureError, CaptureOrchestrator, DetectionState, FrameRead, FrameSource,
    UnavailableDetector,
};

const FRAME_SAMPLES: usize = 8_000; // 0.5 s at 16 kHz

struct ScriptedSource {
    reads: VecDeque<FrameRead>,
}

impl ScriptedSource {
    fn from_labels(labels: &[bool]) -> Self {
        let reads = labels
            .iter()
            .map(|&speech| {
                let level = if speech { 0.5 } else { 0.0 };
                FrameRead::Frame(vec![level; FRAME_SAMPLES])
            })
            .collect();
        Self { reads }
    }
}

impl FrameSource for ScriptedSource {
    fn read_frame(&mut self, _wait: Duration) -> FrameRead {
        self.reads.pop_front().unwrap_or(FrameRead::Disconnected)
    }
}

fn config_in(dir: &std::path::Path) -> CaptureConfig {
    CaptureConfig {
        max_trailing_silence_s: 1.0,
        // The energy fallback fires above 0.2 mean abs.
        vad_threshold: 0.02,
        output_filename_template: dir.join("order.wav").to_string_lossy().into_owned(),
        ..CaptureConfig::default()
    }
}

fn orchestrator_in(dir: &std::path::Path) -> CaptureOrchestrator {
    // An unready detector forces the energy fallback, keeping the session
    // deterministic and model-free.
    CaptureOrchestrator::with_detector(config_in(dir), Box::new(UnavailableDetector))
        .expect("config is valid")
}

fn wav_samples(path: &std::path::Path) -> (hound::WavSpec, usize) {
    let reader = hound::WavReader::open(path).expect("recording should open");
    let spec = reader.spec();
    let len = reader.len() as usize;
    (spec, len)
}

#[test]
fn utterance_with_pause_keeps_the_pause() {
    let dir = tempfile::tempdir().unwrap();
    let mut orchestrator = orchestrator_in(dir.path());

    // Trailing capacity is 2 frames. The single mid-utterance silence is
    // restored when speech resumes, so three frames are committed.
    let mut source = ScriptedSource::from_labels(&[true, false, true, false, false]);
    let result = orchestrator
        .capture_from_source(&mut source)
        .expect("utterance should finalize");

    assert_eq!(result.frame_count, 3);
    assert!((result.duration_s - 1.5).abs() < 1e-9);
    assert_eq!(result.sample_rate, 16_000);

    let (spec, len) = wav_samples(&result.file_path);
    assert_eq!(spec.channels, 1);
    assert_eq!(spec.sample_rate, 16_000);
    assert_eq!(spec.bits_per_sample, 16);
    assert_eq!(len, 3 * FRAME_SAMPLES);

    let file_name = result.file_path.file_name().unwrap().to_string_lossy();
    assert!(
        file_name.ends_with("_order.wav"),
        "expected timestamped name, got {file_name}"
    );
}

#[test]
fn leading_silence_is_discarded() {
    let dir = tempfile::tempdir().unwrap();
    let mut orchestrator = orchestrator_in(dir.path());

    // Four silent frames before speech never reach the file.
    let mut source =
        ScriptedSource::from_labels(&[false, false, false, false, true, true, false, false]);
    let result = orchestrator.capture_from_source(&mut source).unwrap();

    assert_eq!(result.frame_count, 2);
    let (_, len) = wav_samples(&result.file_path);
    assert_eq!(len, 2 * FRAME_SAMPLES);
}

#[test]
fn silence_only_session_writes_no_file() {
    let dir = tempfile::tempdir().unwrap();
    let mut orchestrator = orchestrator_in(dir.path());

    // Leading capacity is 10 frames at the default 5 s window.
    let mut source = ScriptedSource::from_labels(&[false; 10]);
    let err = orchestrator
        .capture_from_source(&mut source)
        .expect_err("no speech must not produce a recording");
    assert!(matches!(err, CaptureError::RecordingTooShort { .. }));

    let leftover = std::fs::read_dir(dir.path()).unwrap().count();
    assert_eq!(leftover, 0, "no WAV may exist after a silent session");
}

#[test]
fn hot_swapped_config_drives_the_next_session() {
    let dir = tempfile::tempdir().unwrap();
    let mut orchestrator = orchestrator_in(dir.path());

    let relaxed = CaptureConfig {
        max_trailing_silence_s: 2.0,
        ..orchestrator.config().clone()
    };
    orchestrator.update_config(relaxed).expect("valid update");

    // With 4 trailing frames allowed, a 2-frame pause no longer ends the
    // utterance; the full 4-frame tail does.
    let mut source =
        ScriptedSource::from_labels(&[true, false, false, true, false, false, false, false]);
    let result = orchestrator.capture_from_source(&mut source).unwrap();
    assert_eq!(result.frame_count, 4, "pause restored, tail dropped");
}

#[test]
fn rejected_update_leaves_sessions_working() {
    let dir = tempfile::tempdir().unwrap();
    let mut orchestrator = orchestrator_in(dir.path());
    let before = orchestrator.config().clone();

    let invalid = CaptureConfig {
        frame_duration_s: 0.0,
        ..before.clone()
    };
    assert!(matches!(
        orchestrator.update_config(invalid),
        Err(CaptureError::Config(_))
    ));
    assert_eq!(orchestrator.config(), &before);

    let mut source = ScriptedSource::from_labels(&[true, true, false, false]);
    let result = orchestrator.capture_from_source(&mut source).unwrap();
    assert_eq!(result.frame_count, 2);
}

#[test]
fn rate_without_a_model_runs_in_fallback_mode() {
    let dir = tempfile::tempdir().unwrap();
    let config = CaptureConfig {
        sample_rate: 44_100,
        max_trailing_silence_s: 1.0,
        vad_threshold: 0.02,
        output_filename_template: dir.path().join("order.wav").to_string_lossy().into_owned(),
        ..CaptureConfig::default()
    };

    // 44.1 kHz passes validation but has no detector model; the default
    // loader must hand back an unready detector and the session must run
    // on the energy classifier instead of aborting.
    let mut orchestrator = CaptureOrchestrator::new(config).expect("config is valid");
    assert!(orchestrator.status().fallback_mode);

    let samples = 22_050; // 0.5 s at 44.1 kHz
    let reads = [true, true, false, false]
        .iter()
        .map(|&speech| FrameRead::Frame(vec![if speech { 0.5 } else { 0.0 }; samples]))
        .collect();
    let mut source = ScriptedSource { reads };

    let result = orchestrator.capture_from_source(&mut source).unwrap();
    assert_eq!(result.frame_count, 2);
    assert_eq!(result.sample_rate, 44_100);

    let (spec, len) = wav_samples(&result.file_path);
    assert_eq!(spec.sample_rate, 44_100);
    assert_eq!(len, 2 * samples);
}

#[test]
fn status_settles_after_the_session() {
    let dir = tempfile::tempdir().unwrap();
    let mut orchestrator = orchestrator_in(dir.path());

    let mut source = ScriptedSource::from_labels(&[true, true, false, false]);
    orchestrator.capture_from_source(&mut source).unwrap();

    let status = orchestrator.status();
    assert!(!status.is_listening);
    assert!(!status.is_recording);
    assert_eq!(status.detection_state, DetectionState::Waiting);
    assert!(status.fallback_mode);
    assert!(status.last_speech_timestamp.is_some());
}
