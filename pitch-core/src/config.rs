//! Engine configuration. All values are fixed at startup; there is no
//! runtime reconfiguration.

use crate::calibration::CalibrationParams;
use anyhow::{Result, bail};

/// What the pipeline publishes when a block contains no detectable peak.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SilencePolicy {
    /// Clear the published reading so readers see "no signal".
    Clear,
    /// Keep the last good reading until a new peak is found.
    HoldLast,
}

/// Immutable configuration for the analysis pipeline.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Sample rate in Hz. Every incoming block must carry this rate.
    pub sample_rate: u32,
    /// Samples per analysis block. Powers of two keep the FFT fast.
    pub block_size: usize,
    /// Seconds of audio retained for waveform display.
    pub display_window_secs: f32,
    /// Minimum linear peak magnitude; anything quieter reports silence.
    pub noise_floor: f32,
    /// Bins below this frequency are excluded from the peak search.
    pub min_frequency_hz: f32,
    /// Affine frequency correction applied to every raw detection.
    pub calibration: CalibrationParams,
    pub silence_policy: SilencePolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44100,
            block_size: 2048,
            display_window_secs: 2.0,
            noise_floor: 1.0,
            min_frequency_hz: 20.0,
            calibration: CalibrationParams::default(),
            silence_policy: SilencePolicy::Clear,
        }
    }
}

impl EngineConfig {
    /// Validates the configuration. Invalid values are fatal at startup,
    /// never silently corrected.
    pub fn validate(&self) -> Result<()> {
        if self.sample_rate == 0 {
            bail!("sample_rate must be positive");
        }
        if self.block_size == 0 {
            bail!("block_size must be positive");
        }
        if !self.display_window_secs.is_finite() || self.display_window_secs <= 0.0 {
            bail!(
                "display_window_secs must be positive, got {}",
                self.display_window_secs
            );
        }
        if !self.noise_floor.is_finite() || self.noise_floor < 0.0 {
            bail!("noise_floor must be non-negative, got {}", self.noise_floor);
        }
        if !self.min_frequency_hz.is_finite()
            || self.min_frequency_hz < 0.0
            || self.min_frequency_hz >= self.sample_rate as f32 / 2.0
        {
            bail!(
                "min_frequency_hz must lie in [0, {}), got {}",
                self.sample_rate as f32 / 2.0,
                self.min_frequency_hz
            );
        }
        self.calibration.validate()?;
        Ok(())
    }

    /// Ring buffer capacity in samples for the configured display window.
    pub fn display_capacity(&self) -> usize {
        ((self.sample_rate as f32 * self.display_window_secs) as usize).max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(EngineConfig::default().validate().is_ok());
    }

    #[test]
    fn zero_sample_rate_is_rejected() {
        let config = EngineConfig {
            sample_rate: 0,
            ..EngineConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_block_size_is_rejected() {
        let config = EngineConfig {
            block_size: 0,
            ..EngineConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn min_frequency_above_nyquist_is_rejected() {
        let config = EngineConfig {
            min_frequency_hz: 30_000.0,
            ..EngineConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn display_capacity_follows_window() {
        let config = EngineConfig::default();
        assert_eq!(config.display_capacity(), 88_200);
    }
}
