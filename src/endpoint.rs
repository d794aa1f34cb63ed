//! Endpointing: leading/trailing silence rings, the commit algorithm, and
//! recording finalization.
//!
//! `EndpointBuffer` consumes `(frame, is_speech)` pairs and decides, with no
//! lookahead, when the utterance has ended or when the caller never spoke.
//! Committed audio is written out as a mono 16-bit PCM WAV file.

use crate::config::CaptureConfig;
use crate::error::CaptureError;
use chrono::Local;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// One fixed-duration block of mono f32 samples.
pub type Frame = Vec<f32>;

/// Why the endpointer decided to stop the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Speech was committed and the trailing-silence window filled up.
    EndOfUtterance,
    /// Nothing was ever committed and the leading-silence window filled up.
    NoSpeechTimeout,
}

impl StopReason {
    pub fn label(self) -> &'static str {
        match self {
            StopReason::EndOfUtterance => "end_of_utterance",
            StopReason::NoSpeechTimeout => "no_speech_timeout",
        }
    }
}

/// Description of a successfully persisted recording. Never mutated after
/// creation.
#[derive(Debug, Clone, Serialize)]
pub struct RecordingResult {
    pub file_path: PathBuf,
    pub sample_rate: u32,
    pub frame_count: usize,
    pub duration_s: f64,
}

/// Fixed-capacity ring of frames. Pushing into a full ring evicts the
/// oldest element; overflow is never an error. Capacity zero is legal and
/// means every push is immediately evicted.
#[derive(Debug)]
pub(crate) struct FrameRing {
    slots: Box<[Option<Frame>]>,
    head: usize,
    len: usize,
}

impl FrameRing {
    pub(crate) fn new(capacity: usize) -> Self {
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);
        Self {
            slots: slots.into_boxed_slice(),
            head: 0,
            len: 0,
        }
    }

    /// Append a frame, returning the evicted oldest frame if the ring was
    /// already full.
    pub(crate) fn push(&mut self, frame: Frame) -> Option<Frame> {
        let capacity = self.slots.len();
        if capacity == 0 {
            return Some(frame);
        }
        if self.len == capacity {
            let evicted = self.slots[self.head].replace(frame);
            self.head = (self.head + 1) % capacity;
            evicted
        } else {
            let tail = (self.head + self.len) % capacity;
            self.slots[tail] = Some(frame);
            self.len += 1;
            None
        }
    }

    /// Remove and return all frames in arrival order.
    pub(crate) fn take_all(&mut self) -> Vec<Frame> {
        let capacity = self.slots.len();
        let mut drained = Vec::with_capacity(self.len);
        for i in 0..self.len {
            let idx = (self.head + i) % capacity;
            if let Some(frame) = self.slots[idx].take() {
                drained.push(frame);
            }
        }
        self.head = 0;
        self.len = 0;
        drained
    }

    pub(crate) fn clear(&mut self) {
        for slot in self.slots.iter_mut() {
            *slot = None;
        }
        self.head = 0;
        self.len = 0;
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    pub(crate) fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub(crate) fn is_full(&self) -> bool {
        self.len == self.slots.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// Owns the committed frame sequence plus the two silence rings and applies
/// the commit/stop algorithm.
///
/// Invariant: the leading and trailing rings are never both non-empty, and
/// the trailing ring is non-empty only when frames have been committed. The
/// leading ring is discarded the moment the first speech frame commits.
pub struct EndpointBuffer {
    committed: Vec<Frame>,
    leading: FrameRing,
    trailing: FrameRing,
    sample_rate: u32,
    frame_duration_s: f64,
    min_frames: usize,
    output_template: String,
}

impl EndpointBuffer {
    /// Build a buffer sized from the config. Fails if the output template
    /// points into a directory that does not exist, so a bad hot-swap is
    /// caught before a session ever runs.
    pub fn new(config: &CaptureConfig) -> Result<Self, CaptureError> {
        let template = Path::new(&config.output_filename_template);
        if let Some(parent) = template.parent() {
            if !parent.as_os_str().is_empty() && !parent.is_dir() {
                return Err(CaptureError::Config(format!(
                    "output directory '{}' does not exist",
                    parent.display()
                )));
            }
        }

        let leading_capacity =
            (config.max_leading_silence_s / config.frame_duration_s).floor() as usize;
        let trailing_capacity =
            (config.max_trailing_silence_s / config.frame_duration_s).floor() as usize;
        let min_frames = (config.min_recording_s / config.frame_duration_s).ceil() as usize;

        Ok(Self {
            committed: Vec::new(),
            leading: FrameRing::new(leading_capacity),
            trailing: FrameRing::new(trailing_capacity),
            sample_rate: config.sample_rate,
            frame_duration_s: config.frame_duration_s,
            min_frames,
            output_template: config.output_filename_template.clone(),
        })
    }

    /// Consume one classified frame.
    ///
    /// Speech first restores any buffered trailing silence into the
    /// committed sequence, preserving natural pauses inside an utterance,
    /// then commits the frame. Silence lands in the trailing ring once
    /// speech has been committed, otherwise in the leading ring.
    pub fn ingest(&mut self, frame: Frame, is_speech: bool) {
        if is_speech {
            for pause in self.trailing.take_all() {
                self.committed.push(pause);
            }
            self.leading.clear();
            self.committed.push(frame);
        } else if self.committed.is_empty() {
            self.leading.push(frame);
        } else {
            self.trailing.push(frame);
        }
    }

    /// Per-iteration stop decision.
    pub fn should_stop(&self) -> Option<StopReason> {
        if !self.committed.is_empty() && self.trailing.is_full() {
            Some(StopReason::EndOfUtterance)
        } else if self.committed.is_empty() && self.leading.is_full() {
            Some(StopReason::NoSpeechTimeout)
        } else {
            None
        }
    }

    pub fn has_committed(&self) -> bool {
        !self.committed.is_empty()
    }

    pub fn committed_frames(&self) -> usize {
        self.committed.len()
    }

    pub fn committed_duration_s(&self) -> f64 {
        self.committed.len() as f64 * self.frame_duration_s
    }

    /// Encode the committed frames as mono 16-bit PCM and write the WAV
    /// file. Trailing-ring frames are discarded, not persisted.
    ///
    /// Fails with `RecordingTooShort` (producing no file) when fewer than
    /// `ceil(min_recording_s / frame_duration_s)` frames were committed.
    pub fn finalize(&mut self) -> Result<RecordingResult, CaptureError> {
        if self.committed.len() < self.min_frames {
            return Err(CaptureError::RecordingTooShort {
                got_s: self.committed_duration_s(),
                min_s: self.min_frames as f64 * self.frame_duration_s,
            });
        }

        let file_path = self.timestamped_path();
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: self.sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&file_path, spec)
            .map_err(|err| CaptureError::Recording(format!("failed to create WAV file: {err}")))?;

        let mut total_samples = 0usize;
        for frame in &self.committed {
            for &sample in frame {
                let quantized = (sample.clamp(-1.0, 1.0) * 32_767.0) as i16;
                writer.write_sample(quantized).map_err(|err| {
                    CaptureError::Recording(format!("failed to write samples: {err}"))
                })?;
            }
            total_samples += frame.len();
        }
        writer
            .finalize()
            .map_err(|err| CaptureError::Recording(format!("failed to finalize WAV: {err}")))?;

        let result = RecordingResult {
            file_path,
            sample_rate: self.sample_rate,
            frame_count: self.committed.len(),
            duration_s: total_samples as f64 / self.sample_rate as f64,
        };
        info!(
            path = %result.file_path.display(),
            frames = result.frame_count,
            duration_s = result.duration_s,
            "recording saved"
        );
        Ok(result)
    }

    /// Drop all buffered audio for a fresh session.
    pub fn reset(&mut self) {
        debug!("endpoint buffer reset");
        self.committed.clear();
        self.leading.clear();
        self.trailing.clear();
    }

    /// `<timestamp>_<template file name>`, in the template's directory.
    fn timestamped_path(&self) -> PathBuf {
        let template = Path::new(&self.output_template);
        let stamp = Local::now().format("%Y%m%d_%H%M%S");
        let file_name = template
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "recording.wav".to_string());
        let stamped = format!("{stamp}_{file_name}");
        match template.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.join(stamped),
            _ => PathBuf::from(stamped),
        }
    }

    #[cfg(test)]
    pub(crate) fn ring_lens(&self) -> (usize, usize) {
        (self.leading.len(), self.trailing.len())
    }
}
