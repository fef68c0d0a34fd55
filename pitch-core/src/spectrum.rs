//! # Spectral Analysis Module
//!
//! This module locates the dominant frequency of a single audio block.
//! It handles windowing, the frequency-domain transform, peak search,
//! and sub-bin refinement of the peak location.
//!
//! ## Features
//! - High-performance FFT using RustFFT, planned once per analyzer
//! - Hann windowing for reduced spectral leakage
//! - DC offset removal for accurate analysis
//! - Parabolic interpolation of the log-magnitude spectrum for
//!   sub-bin accuracy
//! - Noise-floor gating so silence is reported as "no peak"

use crate::config::EngineConfig;
use anyhow::{Result, bail};
use rustfft::{Fft, FftPlanner, num_complex::Complex};
use std::sync::Arc;

/// The dominant peak of one magnitude spectrum.
#[derive(Debug, Clone, Copy)]
pub struct SpectrumPeak {
    /// Index of the loudest bin (DC excluded).
    pub bin_index: usize,
    /// Center frequency of that bin in Hz.
    pub bin_frequency_hz: f32,
    /// Sub-bin refined frequency in Hz.
    pub refined_frequency_hz: f32,
    /// Linear magnitude of the loudest bin.
    pub magnitude: f32,
}

/// Reusable spectral analyzer for fixed-size blocks at a fixed sample rate.
///
/// The FFT plan and Hann window are computed once at construction and
/// shared by every `analyze` call.
pub struct SpectrumAnalyzer {
    fft: Arc<dyn Fft<f32>>,
    window: Vec<f32>,
    block_size: usize,
    sample_rate: u32,
    noise_floor: f32,
    min_bin: usize,
}

impl SpectrumAnalyzer {
    /// Builds an analyzer for the configured block size and sample rate.
    ///
    /// # Errors
    /// Returns an error for a zero block size or sample rate; these
    /// invalidate every Hz-domain computation and must be rejected at
    /// startup rather than handled per block.
    pub fn new(config: &EngineConfig) -> Result<Self> {
        if config.block_size == 0 {
            bail!("block_size must be positive");
        }
        if config.sample_rate == 0 {
            bail!("sample_rate must be positive");
        }

        let n = config.block_size;
        let denom = (n.saturating_sub(1)).max(1) as f32;
        let window = (0..n)
            .map(|i| {
                0.5 - 0.5 * (2.0 * std::f32::consts::PI * i as f32 / denom).cos()
            })
            .collect();

        // Lowest bin eligible for the peak search. Bin 0 (DC) is always
        // excluded; the configured minimum frequency may exclude more.
        let bin_spacing = config.sample_rate as f32 / n as f32;
        let min_bin = ((config.min_frequency_hz / bin_spacing).ceil() as usize).max(1);

        let mut planner = FftPlanner::new();
        Ok(Self {
            fft: planner.plan_fft_forward(n),
            window,
            block_size: n,
            sample_rate: config.sample_rate,
            noise_floor: config.noise_floor,
            min_bin,
        })
    }

    /// Analyzes one block and returns its dominant peak, or `None` when no
    /// bin rises above the noise floor (silence).
    ///
    /// # Panics
    /// Panics if `samples` is not exactly the configured block size.
    pub fn analyze(&self, samples: &[f32]) -> Option<SpectrumPeak> {
        assert_eq!(
            samples.len(),
            self.block_size,
            "input block must match the configured block size"
        );

        let mut processed = samples.to_vec();
        remove_dc_offset(&mut processed);
        for (sample, w) in processed.iter_mut().zip(&self.window) {
            *sample *= w;
        }

        let mut buffer: Vec<Complex<f32>> = processed
            .into_iter()
            .map(|sample| Complex { re: sample, im: 0.0 })
            .collect();
        self.fft.process(&mut buffer);

        // Only the first N/2+1 bins are unique for a real input signal.
        let magnitudes: Vec<f32> = buffer
            .iter()
            .take(self.block_size / 2 + 1)
            .map(|c| c.norm())
            .collect();

        let mut peak_bin = 0;
        let mut peak_mag = 0.0f32;
        for (i, &mag) in magnitudes.iter().enumerate().skip(self.min_bin) {
            if mag > peak_mag {
                peak_mag = mag;
                peak_bin = i;
            }
        }

        if peak_bin == 0 || peak_mag < self.noise_floor {
            return None;
        }

        let bin_spacing = self.sample_rate as f32 / self.block_size as f32;
        let delta = parabolic_offset(&magnitudes, peak_bin);
        Some(SpectrumPeak {
            bin_index: peak_bin,
            bin_frequency_hz: peak_bin as f32 * bin_spacing,
            refined_frequency_hz: (peak_bin as f32 + delta) * bin_spacing,
            magnitude: peak_mag,
        })
    }

    /// Width of one spectrum bin in Hz.
    pub fn bin_spacing(&self) -> f32 {
        self.sample_rate as f32 / self.block_size as f32
    }
}

/// Removes the DC offset from a signal by making its average value zero.
///
/// A DC component shows up as a large bin-0 magnitude and leaks into its
/// neighbors, skewing the peak search near the low end of the spectrum.
fn remove_dc_offset(signal: &mut [f32]) {
    let len = signal.len();
    if len == 0 {
        return;
    }
    let avg = signal.iter().sum::<f32>() / len as f32;
    if avg.abs() > 1e-6 {
        for sample in signal.iter_mut() {
            *sample -= avg;
        }
    }
}

/// Sub-bin offset of the true peak around `peak_bin`, in bins.
///
/// Fits a parabola through the log magnitudes of the peak bin and its two
/// neighbors and returns the vertex offset, clamped to [-0.5, 0.5]. Returns
/// 0.0 when a neighbor is missing (bin 0 or the Nyquist bin), when a log
/// magnitude is not finite, or when the curvature is too small to divide
/// by — the raw bin frequency is the best available estimate there.
pub fn parabolic_offset(magnitudes: &[f32], peak_bin: usize) -> f32 {
    if peak_bin == 0 || peak_bin + 1 >= magnitudes.len() {
        return 0.0;
    }

    let y1 = magnitudes[peak_bin - 1].ln();
    let y2 = magnitudes[peak_bin].ln();
    let y3 = magnitudes[peak_bin + 1].ln();
    if !y1.is_finite() || !y2.is_finite() || !y3.is_finite() {
        return 0.0;
    }

    let denominator = y1 - 2.0 * y2 + y3;
    if denominator.abs() < 1e-6 {
        return 0.0;
    }

    (0.5 * (y1 - y3) / denominator).clamp(-0.5, 0.5)
}
