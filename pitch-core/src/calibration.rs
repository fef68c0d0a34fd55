use anyhow::{Result, anyhow, bail};
use linreg::linear_regression;
use serde::{Deserialize, Serialize};

/// Affine correction applied to every raw detected frequency:
/// `calibrated = raw * scale + offset_hz`.
///
/// The defaults are the identity; real parameters are derived offline by
/// measuring known reference tones and fitting `from_tone_pairs`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CalibrationParams {
    pub scale: f32,
    pub offset_hz: f32,
}

/// One reference measurement: a tone of known frequency and the raw value
/// the analyzer reported for it.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TonePair {
    pub known_hz: f32,
    pub measured_hz: f32,
}

impl Default for CalibrationParams {
    fn default() -> Self {
        Self {
            scale: 1.0,
            offset_hz: 0.0,
        }
    }
}

impl CalibrationParams {
    /// Applies the correction. Pure; no side effects.
    pub fn apply(&self, raw_hz: f32) -> f32 {
        raw_hz * self.scale + self.offset_hz
    }

    /// Fits `scale` and `offset_hz` to measured reference tones by least
    /// squares. With exactly two pairs this is the closed-form two-tone
    /// solution: `scale = (f2-f1)/(m2-m1)`, `offset = f1 - scale*m1`.
    ///
    /// Measured values with no spread make the scale undefined; that is a
    /// configuration error, never an infinite or NaN parameter.
    pub fn from_tone_pairs(pairs: &[TonePair]) -> Result<Self> {
        if pairs.len() < 2 {
            bail!("calibration needs at least two reference tones");
        }

        let (measured, known): (Vec<f64>, Vec<f64>) = pairs
            .iter()
            .map(|p| (p.measured_hz as f64, p.known_hz as f64))
            .unzip();

        let spread = measured.iter().cloned().fold(f64::NEG_INFINITY, f64::max)
            - measured.iter().cloned().fold(f64::INFINITY, f64::min);
        if spread.abs() < 1e-9 {
            bail!("degenerate calibration: measured tones are identical");
        }

        let (scale, offset): (f64, f64) = linear_regression(&measured, &known)
            .map_err(|e| anyhow!("calibration fit failed: {:?}", e))?;

        let params = Self {
            scale: scale as f32,
            offset_hz: offset as f32,
        };
        params.validate()?;
        Ok(params)
    }

    /// Rejects non-finite or zero-scale parameters at startup.
    pub fn validate(&self) -> Result<()> {
        if !self.scale.is_finite() || !self.offset_hz.is_finite() {
            bail!("calibration parameters must be finite");
        }
        if self.scale == 0.0 {
            bail!("calibration scale must be non-zero");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_identity() {
        let params = CalibrationParams::default();
        for raw in [27.5, 440.0, 1000.0, 4186.0] {
            assert_eq!(params.apply(raw), raw);
        }
    }

    #[test]
    fn apply_is_affine() {
        let params = CalibrationParams {
            scale: 1.01,
            offset_hz: -0.5,
        };
        assert!((params.apply(1000.0) - 1009.5).abs() < 1e-3);
    }

    #[test]
    fn two_tone_fit_matches_closed_form() {
        // A device reading ~0.9% flat: 440 shows as 436, 880 as 872.
        let pairs = [
            TonePair {
                known_hz: 440.0,
                measured_hz: 436.0,
            },
            TonePair {
                known_hz: 880.0,
                measured_hz: 872.0,
            },
        ];
        let params = CalibrationParams::from_tone_pairs(&pairs).unwrap();
        assert!((params.scale - 440.0 / 436.0).abs() < 1e-5);
        assert!(params.offset_hz.abs() < 1e-3);
        // Fitted parameters map the measurements back onto the references.
        assert!((params.apply(436.0) - 440.0).abs() < 1e-3);
        assert!((params.apply(872.0) - 880.0).abs() < 1e-3);
    }

    #[test]
    fn identical_measurements_are_rejected() {
        let pairs = [
            TonePair {
                known_hz: 440.0,
                measured_hz: 500.0,
            },
            TonePair {
                known_hz: 880.0,
                measured_hz: 500.0,
            },
        ];
        assert!(CalibrationParams::from_tone_pairs(&pairs).is_err());
    }

    #[test]
    fn a_single_tone_is_rejected() {
        let pairs = [TonePair {
            known_hz: 440.0,
            measured_hz: 439.0,
        }];
        assert!(CalibrationParams::from_tone_pairs(&pairs).is_err());
    }

    #[test]
    fn non_finite_params_fail_validation() {
        let params = CalibrationParams {
            scale: f32::INFINITY,
            offset_hz: 0.0,
        };
        assert!(params.validate().is_err());
    }
}
