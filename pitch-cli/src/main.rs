//! # Live Pitch Monitor CLI
//!
//! Thin terminal frontend for `pitch-core`: starts the analysis pipeline
//! and microphone capture, then polls the published state on its own
//! cadence and renders a one-line status display.
//!
//! ## Architecture
//! - **Main thread**: polling/render loop
//! - **Audio callback**: pushes blocks into the pipeline queue
//! - **Worker thread**: spectral analysis, owned by `PitchPipeline`

use anyhow::Result;
use pitch_core::audio;
use pitch_core::calibration::CalibrationParams;
use pitch_core::config::{EngineConfig, SilencePolicy};
use pitch_core::pipeline::PitchPipeline;
use std::io::Write;
use std::time::Duration;

const SAMPLE_RATE: u32 = 44100; // Hz
const BLOCK_SIZE: usize = 2048; // Samples per analysis block
const BUFFER_SECONDS: f32 = 2.0; // Seconds of audio kept for display
const LEVEL_WINDOW_SECONDS: f32 = 0.1; // Newest slice used for the level bar
const POLL_INTERVAL: Duration = Duration::from_millis(50);
const LEVEL_BAR_WIDTH: usize = 20;

/// Optional calibration file; when absent the identity calibration is used.
const CALIBRATION_FILE: &str = "calibration.json";

fn main() -> Result<()> {
    eprintln!("[MAIN] Starting live pitch monitor...");

    let calibration = match load_calibration(CALIBRATION_FILE)? {
        Some(params) => {
            eprintln!(
                "[MAIN] Loaded calibration: scale={} offset={} Hz",
                params.scale, params.offset_hz
            );
            params
        }
        None => CalibrationParams::default(),
    };

    let config = EngineConfig {
        sample_rate: SAMPLE_RATE,
        block_size: BLOCK_SIZE,
        display_window_secs: BUFFER_SECONDS,
        calibration,
        silence_policy: SilencePolicy::Clear,
        ..EngineConfig::default()
    };

    let (pipeline, producer) = PitchPipeline::start(config.clone())?;
    // The stream must stay alive for the duration of the run.
    let _stream = audio::start_capture(&config, producer)?;

    eprintln!("[MAIN] Capture running. Press Ctrl-C to stop.");

    let level_samples = (SAMPLE_RATE as f32 * LEVEL_WINDOW_SECONDS) as usize;
    loop {
        std::thread::sleep(POLL_INTERVAL);

        let tail = pipeline.waveform_tail(level_samples);
        let peak_level = tail.iter().fold(0.0f32, |m, s| m.max(s.abs()));

        let status = match pipeline.current_pitch() {
            Some(reading) => reading.label(),
            None => "-- no signal --".to_string(),
        };

        print!(
            "\r{:<34} [{}]  ",
            status,
            level_bar(peak_level, LEVEL_BAR_WIDTH)
        );
        let _ = std::io::stdout().flush();
    }
}

/// Renders a fixed-width amplitude bar for a peak level in [0, 1].
fn level_bar(peak: f32, width: usize) -> String {
    let filled = ((peak.clamp(0.0, 1.0) * width as f32) as usize).min(width);
    let mut bar = String::with_capacity(width);
    for i in 0..width {
        bar.push(if i < filled { '#' } else { ' ' });
    }
    bar
}

/// Loads calibration parameters from a JSON file.
///
/// Returns `Ok(None)` when the file does not exist; any other I/O or
/// parse failure is an error, since silently running uncalibrated with a
/// calibration file present would be misleading.
fn load_calibration(path: &str) -> Result<Option<CalibrationParams>> {
    let data = match std::fs::read_to_string(path) {
        Ok(data) => data,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let params: CalibrationParams = serde_json::from_str(&data)?;
    params.validate()?;
    Ok(Some(params))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_bar_is_fixed_width() {
        assert_eq!(level_bar(0.0, 10), "          ");
        assert_eq!(level_bar(1.0, 10), "##########");
        assert_eq!(level_bar(0.5, 10), "#####     ");
        // Out-of-range peaks stay clamped.
        assert_eq!(level_bar(3.0, 10), "##########");
    }
}
