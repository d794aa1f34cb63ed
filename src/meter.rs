//! Frame-level volume measurements.

const METER_FLOOR_DB: f32 = -60.0;

/// Mean absolute sample value, the volume figure reported in
/// `CaptureStatus` and used by the energy fallback classifier.
pub fn mean_abs(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    samples.iter().map(|s| s.abs()).sum::<f32>() / samples.len() as f32
}

/// Largest absolute sample value in the frame.
pub fn peak_abs(samples: &[f32]) -> f32 {
    samples.iter().fold(0.0_f32, |peak, s| peak.max(s.abs()))
}

/// RMS level in decibels, floored at -60 dB for empty or silent input.
pub fn rms_db(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return METER_FLOOR_DB;
    }
    let energy: f32 = samples.iter().map(|s| s * s).sum::<f32>() / samples.len() as f32;
    let rms = energy.sqrt().max(1e-6);
    (20.0 * rms.log10()).max(METER_FLOOR_DB)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mean_abs_handles_empty() {
        assert_eq!(mean_abs(&[]), 0.0);
    }

    #[test]
    fn mean_abs_ignores_sign() {
        let level = mean_abs(&[0.5, -0.5, 0.5, -0.5]);
        assert!((level - 0.5).abs() < 1e-6);
    }

    #[test]
    fn peak_abs_finds_loudest_sample() {
        assert_eq!(peak_abs(&[0.1, -0.9, 0.3]), 0.9);
        assert_eq!(peak_abs(&[]), 0.0);
    }

    #[test]
    fn rms_db_floors_at_minus_sixty() {
        assert_eq!(rms_db(&[]), -60.0);
        assert_eq!(rms_db(&[0.0, 0.0]), -60.0);
    }
}
