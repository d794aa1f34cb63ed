//! Earshot-powered speech detector implementing `SpeechDetector`.

use crate::config::CaptureConfig;
use crate::detector::SpeechDetector;
use anyhow::bail;
use earshot::{VoiceActivityDetector, VoiceActivityProfile};
use tracing::debug;

/// Earshot predicts on 10/20/30 ms blocks; frames are split into 20 ms
/// chunks and the frame counts as speech if any chunk does.
const CHUNK_MS: u32 = 20;

/// Sample rates with a matching earshot predict model. The model asserts on
/// block sizes for any other rate, so construction rejects them up front.
const SUPPORTED_RATES: [u32; 4] = [8_000, 16_000, 32_000, 48_000];

/// Adapts `earshot` to the crate's [`SpeechDetector`] trait.
///
/// The aggressiveness profile is derived from the configured speech
/// threshold at load time; higher thresholds demand a stricter detector.
pub struct EarshotDetector {
    detector: VoiceActivityDetector,
    scratch: Vec<i16>,
}

impl EarshotDetector {
    /// Fails for sample rates without a matching model, so the loader falls
    /// back to the energy classifier instead of handing the model block
    /// sizes it rejects.
    pub fn from_config(config: &CaptureConfig) -> anyhow::Result<Self> {
        if !SUPPORTED_RATES.contains(&config.sample_rate) {
            bail!(
                "no earshot model for {} Hz (supported: 8/16/32/48 kHz)",
                config.sample_rate
            );
        }
        let profile = match config.vad_threshold {
            t if t >= 0.8 => VoiceActivityProfile::VERY_AGGRESSIVE,
            t if t >= 0.6 => VoiceActivityProfile::AGGRESSIVE,
            t if t >= 0.4 => VoiceActivityProfile::LBR,
            _ => VoiceActivityProfile::QUALITY,
        };
        Ok(Self {
            detector: VoiceActivityDetector::new(profile),
            scratch: Vec::new(),
        })
    }
}

impl SpeechDetector for EarshotDetector {
    fn is_ready(&self) -> bool {
        true
    }

    fn classify(&mut self, frame: &[f32], sample_rate: u32, _threshold: f32) -> bool {
        if frame.is_empty() {
            return false;
        }
        // Construction already pinned the rate to a supported one; an
        // unmatched rate here still fails soft rather than reaching the
        // model's block-size assertion.
        if !SUPPORTED_RATES.contains(&sample_rate) {
            debug!(sample_rate, "no earshot model for this rate, frame treated as non-speech");
            return false;
        }
        // 20 ms at any supported rate is a block size its model accepts.
        let chunk_samples = ((sample_rate / 1_000) * CHUNK_MS) as usize;
        for chunk in frame.chunks(chunk_samples) {
            self.scratch.clear();
            self.scratch.reserve(chunk_samples);
            for sample in chunk.iter().copied() {
                self.scratch
                    .push((sample.clamp(-1.0, 1.0) * 32_767.0) as i16);
            }
            if self.scratch.len() < chunk_samples {
                self.scratch.resize(chunk_samples, 0);
            }
            let predicted = match sample_rate {
                8_000 => self.detector.predict_8khz(&self.scratch),
                16_000 => self.detector.predict_16khz(&self.scratch),
                32_000 => self.detector.predict_32khz(&self.scratch),
                48_000 => self.detector.predict_48khz(&self.scratch),
                _ => return false,
            };
            match predicted {
                Ok(true) => return true,
                Ok(false) => {}
                Err(_) => {
                    // A single bad chunk must not abort the capture loop.
                    debug!("earshot prediction failed for one chunk");
                }
            }
        }
        false
    }

    fn name(&self) -> &'static str {
        "earshot"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_at(sample_rate: u32) -> CaptureConfig {
        CaptureConfig {
            sample_rate,
            ..CaptureConfig::default()
        }
    }

    fn detector_at(sample_rate: u32) -> EarshotDetector {
        EarshotDetector::from_config(&config_at(sample_rate)).expect("rate has a model")
    }

    /// Half a second of a 300 Hz square wave, well inside the speech band
    /// at every supported rate.
    fn tone_frame(sample_rate: u32) -> Vec<f32> {
        let half_period = ((sample_rate / 300) / 2).max(1) as usize;
        (0..sample_rate as usize / 2)
            .map(|i| if (i / half_period) % 2 == 0 { 0.5 } else { -0.5 })
            .collect()
    }

    #[test]
    fn reports_ready() {
        assert!(detector_at(16_000).is_ready());
        assert_eq!(detector_at(16_000).name(), "earshot");
    }

    #[test]
    fn every_supported_rate_classifies_a_tone_as_speech() {
        for rate in SUPPORTED_RATES {
            let mut vad = detector_at(rate);
            let frame = tone_frame(rate);
            assert!(vad.classify(&frame, rate, 0.2), "tone missed at {rate} Hz");
        }
    }

    #[test]
    fn every_supported_rate_treats_silence_as_non_speech() {
        for rate in SUPPORTED_RATES {
            let mut vad = detector_at(rate);
            let silence = vec![0.0_f32; rate as usize / 2];
            assert!(!vad.classify(&silence, rate, 0.2), "silence flagged at {rate} Hz");
        }
    }

    #[test]
    fn unmatched_rates_are_rejected_at_build_time() {
        for rate in [11_025, 22_050, 44_100] {
            assert!(
                EarshotDetector::from_config(&config_at(rate)).is_err(),
                "{rate} Hz must not build a detector"
            );
        }
    }

    #[test]
    fn unmatched_rate_frame_is_non_speech_not_a_panic() {
        let mut vad = detector_at(16_000);
        let frame = vec![0.3_f32; 22_050];
        assert!(!vad.classify(&frame, 44_100, 0.2));
    }

    #[test]
    fn empty_frame_is_not_speech() {
        let mut vad = detector_at(16_000);
        assert!(!vad.classify(&[], 16_000, 0.2));
    }

    #[test]
    fn short_frame_is_padded_not_panicking() {
        let mut vad = detector_at(16_000);
        // 5 ms of audio, below one 20 ms chunk.
        let frame = vec![0.1_f32; 80];
        let _ = vad.classify(&frame, 16_000, 0.2);
    }
}
