//! Audio-input boundary: frame sources, the CPAL-backed microphone source,
//! and the hardware probe.
//!
//! CPAL delivers samples on a callback thread; `MicFrameSource` slices them
//! into fixed-size mono frames and hands them to the synchronous capture
//! loop over a bounded channel. The stream is released when the source is
//! dropped, on every exit path.

use crate::config::CaptureConfig;
use crate::endpoint::Frame;
use crate::error::CaptureError;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, SampleRate, StreamConfig};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, warn};

/// Frames buffered between the CPAL callback and the capture loop.
const FRAME_CHANNEL_CAPACITY: usize = 64;

/// The default device's rate must sit within this distance of the
/// configured rate.
const SAMPLE_RATE_TOLERANCE_HZ: i64 = 1_000;

/// Outcome of one frame read.
#[derive(Debug)]
pub enum FrameRead {
    /// Exactly one frame of `sample_rate * frame_duration_s` mono samples.
    Frame(Frame),
    /// No frame arrived within the wait window.
    Timeout,
    /// The device reported an error; the stream itself is still alive.
    Failed(String),
    /// The stream is gone; no further frames will ever arrive.
    Disconnected,
}

/// Anything that can produce audio frames for the capture loop. The real
/// implementation wraps a microphone; tests script their own sequences.
pub trait FrameSource {
    fn read_frame(&mut self, wait: Duration) -> FrameRead;
}

/// Result of probing the host's audio input hardware.
#[derive(Debug, Clone, Serialize)]
pub struct HardwareProbe {
    pub input_device_count: usize,
    pub default_device: String,
    pub default_sample_rate: u32,
    pub sample_rate_supported: bool,
}

/// Check that at least one input-capable device exists and report whether
/// the default device's rate is close enough to the configured one.
pub fn probe_hardware(config: &CaptureConfig) -> Result<HardwareProbe, CaptureError> {
    let host = cpal::default_host();
    let devices = host
        .input_devices()
        .map_err(|err| CaptureError::Hardware(format!("failed to enumerate devices: {err}")))?;
    let input_device_count = devices.count();
    if input_device_count == 0 {
        return Err(CaptureError::Hardware(
            "no input-capable audio device available".to_string(),
        ));
    }

    let device = host
        .default_input_device()
        .ok_or_else(|| CaptureError::Hardware("no default input device".to_string()))?;
    let default_config = device
        .default_input_config()
        .map_err(|err| CaptureError::Hardware(format!("failed to query default config: {err}")))?;
    let default_sample_rate = default_config.sample_rate().0;
    let sample_rate_supported = (i64::from(default_sample_rate)
        - i64::from(config.sample_rate))
    .abs()
        < SAMPLE_RATE_TOLERANCE_HZ;

    Ok(HardwareProbe {
        input_device_count,
        default_device: device.name().unwrap_or_else(|_| "unknown".to_string()),
        default_sample_rate,
        sample_rate_supported,
    })
}

/// Average interleaved multi-channel input down to mono while converting
/// each sample to f32.
fn downmix_into<T, F>(buf: &mut Vec<f32>, data: &[T], channels: usize, mut convert: F)
where
    T: Copy,
    F: FnMut(T) -> f32,
{
    if channels <= 1 {
        buf.extend(data.iter().copied().map(&mut convert));
        return;
    }
    let mut acc = 0.0_f32;
    let mut count = 0usize;
    for sample in data.iter().copied() {
        acc += convert(sample);
        count += 1;
        if count == channels {
            buf.push(acc / channels as f32);
            acc = 0.0;
            count = 0;
        }
    }
    if count > 0 {
        buf.push(acc / count as f32);
    }
}

/// Accumulates downmixed samples and emits whole frames into the channel.
/// Runs inside the CPAL callback, so it never blocks: a full channel drops
/// the frame and bumps the counter instead.
struct FrameSlicer {
    frame_samples: usize,
    pending: Vec<f32>,
    scratch: Vec<f32>,
    sender: Sender<Frame>,
    dropped: Arc<AtomicUsize>,
}

impl FrameSlicer {
    fn new(frame_samples: usize, sender: Sender<Frame>, dropped: Arc<AtomicUsize>) -> Self {
        Self {
            frame_samples: frame_samples.max(1),
            pending: Vec::with_capacity(frame_samples),
            scratch: Vec::new(),
            sender,
            dropped,
        }
    }

    fn push<T, F>(&mut self, data: &[T], channels: usize, convert: F)
    where
        T: Copy,
        F: FnMut(T) -> f32,
    {
        self.scratch.clear();
        downmix_into(&mut self.scratch, data, channels, convert);
        self.pending.extend_from_slice(&self.scratch);

        while self.pending.len() >= self.frame_samples {
            let frame: Frame = self.pending.drain(..self.frame_samples).collect();
            match self.sender.try_send(frame) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                }
                Err(TrySendError::Disconnected(_)) => break,
            }
        }
    }
}

/// Microphone-backed frame source. Owns the CPAL stream exclusively for the
/// lifetime of one capture session; dropping the source releases it.
pub struct MicFrameSource {
    stream: cpal::Stream,
    receiver: Receiver<Frame>,
    dropped: Arc<AtomicUsize>,
    stream_error: Arc<Mutex<Option<String>>>,
}

impl MicFrameSource {
    /// Open the default input device at the configured rate, mono frames of
    /// `sample_rate * frame_duration_s` samples per read.
    pub fn open(config: &CaptureConfig) -> Result<Self, CaptureError> {
        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or_else(|| CaptureError::Hardware("no default input device".to_string()))?;
        let default_config = device.default_input_config().map_err(|err| {
            CaptureError::Hardware(format!("failed to query default config: {err}"))
        })?;
        let format = default_config.sample_format();
        let channels = usize::from(default_config.channels().max(1));
        let stream_config = StreamConfig {
            channels: default_config.channels().max(1),
            sample_rate: SampleRate(config.sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        debug!(
            ?format,
            channels,
            sample_rate = config.sample_rate,
            frame_samples = config.frame_samples(),
            "opening input stream"
        );

        let (sender, receiver) = bounded::<Frame>(FRAME_CHANNEL_CAPACITY);
        let dropped = Arc::new(AtomicUsize::new(0));
        let slicer = Arc::new(Mutex::new(FrameSlicer::new(
            config.frame_samples(),
            sender,
            dropped.clone(),
        )));
        let stream_error = Arc::new(Mutex::new(None::<String>));
        let err_fn = {
            let stream_error = stream_error.clone();
            move |err: cpal::StreamError| {
                warn!(%err, "audio stream error");
                let mut slot = stream_error
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner());
                *slot = Some(err.to_string());
            }
        };

        let stream = match format {
            SampleFormat::F32 => {
                let slicer = slicer.clone();
                let dropped = dropped.clone();
                device
                    .build_input_stream(
                        &stream_config,
                        move |data: &[f32], _| {
                            if let Ok(mut slicer) = slicer.try_lock() {
                                slicer.push(data, channels, |sample| sample);
                            } else {
                                dropped.fetch_add(1, Ordering::Relaxed);
                            }
                        },
                        err_fn,
                        None,
                    )
                    .map_err(stream_build_error)?
            }
            SampleFormat::I16 => {
                let slicer = slicer.clone();
                let dropped = dropped.clone();
                device
                    .build_input_stream(
                        &stream_config,
                        move |data: &[i16], _| {
                            if let Ok(mut slicer) = slicer.try_lock() {
                                slicer.push(data, channels, |sample| {
                                    sample as f32 / 32_768.0_f32
                                });
                            } else {
                                dropped.fetch_add(1, Ordering::Relaxed);
                            }
                        },
                        err_fn,
                        None,
                    )
                    .map_err(stream_build_error)?
            }
            SampleFormat::U16 => {
                let slicer = slicer.clone();
                let dropped = dropped.clone();
                device
                    .build_input_stream(
                        &stream_config,
                        move |data: &[u16], _| {
                            if let Ok(mut slicer) = slicer.try_lock() {
                                slicer.push(data, channels, |sample| {
                                    (sample as f32 - 32_768.0_f32) / 32_768.0_f32
                                });
                            } else {
                                dropped.fetch_add(1, Ordering::Relaxed);
                            }
                        },
                        err_fn,
                        None,
                    )
                    .map_err(stream_build_error)?
            }
            other => {
                return Err(CaptureError::Hardware(format!(
                    "unsupported sample format: {other:?}"
                )))
            }
        };

        stream
            .play()
            .map_err(|err| CaptureError::Recording(format!("failed to start stream: {err}")))?;

        Ok(Self {
            stream,
            receiver,
            dropped,
            stream_error,
        })
    }

    /// Frames discarded because the capture loop fell behind.
    pub fn dropped_frames(&self) -> usize {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl FrameSource for MicFrameSource {
    fn read_frame(&mut self, wait: Duration) -> FrameRead {
        {
            let mut slot = self
                .stream_error
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if let Some(message) = slot.take() {
                return FrameRead::Failed(message);
            }
        }
        match self.receiver.recv_timeout(wait) {
            Ok(frame) => FrameRead::Frame(frame),
            Err(RecvTimeoutError::Timeout) => FrameRead::Timeout,
            Err(RecvTimeoutError::Disconnected) => FrameRead::Disconnected,
        }
    }
}

impl Drop for MicFrameSource {
    fn drop(&mut self) {
        if let Err(err) = self.stream.pause() {
            debug!(%err, "failed to pause audio stream on release");
        }
    }
}

fn stream_build_error(err: cpal::BuildStreamError) -> CaptureError {
    CaptureError::Hardware(format!("failed to open input stream: {err}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn downmix_passes_mono_through() {
        let mut buf = Vec::new();
        downmix_into(&mut buf, &[0.1_f32, 0.2, 0.3], 1, |s| s);
        assert_eq!(buf, vec![0.1, 0.2, 0.3]);
    }

    #[test]
    fn downmix_averages_stereo_pairs() {
        let mut buf = Vec::new();
        downmix_into(&mut buf, &[0.0_f32, 1.0, 0.5, 0.5], 2, |s| s);
        assert_eq!(buf, vec![0.5, 0.5]);
    }

    #[test]
    fn downmix_handles_trailing_partial_frame() {
        let mut buf = Vec::new();
        downmix_into(&mut buf, &[1.0_f32, 1.0, 1.0], 2, |s| s);
        assert_eq!(buf, vec![1.0, 1.0]);
    }

    #[test]
    fn slicer_emits_fixed_size_frames() {
        let (sender, receiver) = bounded(8);
        let dropped = Arc::new(AtomicUsize::new(0));
        let mut slicer = FrameSlicer::new(4, sender, dropped.clone());

        slicer.push(&[0.1_f32; 6], 1, |s| s);
        let frame = receiver.try_recv().expect("one whole frame");
        assert_eq!(frame.len(), 4);
        assert!(receiver.try_recv().is_err(), "remainder stays pending");

        slicer.push(&[0.1_f32; 2], 1, |s| s);
        assert_eq!(receiver.try_recv().expect("second frame").len(), 4);
        assert_eq!(dropped.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn slicer_counts_dropped_frames_when_channel_full() {
        let (sender, receiver) = bounded(1);
        let dropped = Arc::new(AtomicUsize::new(0));
        let mut slicer = FrameSlicer::new(2, sender, dropped.clone());

        slicer.push(&[0.0_f32; 6], 1, |s| s);
        assert_eq!(dropped.load(Ordering::Relaxed), 2);
        drop(receiver);
    }
}
