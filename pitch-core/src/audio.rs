//! # Audio Capture Module
//!
//! This module handles real-time audio capture using CPAL (Cross-Platform
//! Audio Library). It opens the default input device, accumulates the
//! device's callback chunks into fixed-size analysis blocks, and hands
//! them to the pipeline's producer.
//!
//! ## Configuration
//! - Format: 32-bit float
//! - Channels: Mono (1 channel)
//! - Sample rate and block size: taken from `EngineConfig`; a device that
//!   cannot run at the configured rate is a fatal startup error, since a
//!   mismatched rate invalidates every Hz-domain computation downstream.

use crate::config::EngineConfig;
use crate::pipeline::BlockProducer;
use anyhow::{Result, anyhow};
use cpal::SupportedStreamConfigRange;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};

/// Starts audio capture from the default input device.
///
/// The returned stream must be kept alive for as long as capture should
/// run; dropping it closes the capture source and, in turn, stops the
/// pipeline worker.
///
/// # Errors
/// Fails when no input device is available, or when the device offers no
/// mono f32 configuration at the configured sample rate.
pub fn start_capture(config: &EngineConfig, mut producer: BlockProducer) -> Result<cpal::Stream> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or_else(|| anyhow!("No input device available"))?;

    println!("[AUDIO] Using input device: {}", device.name()?);

    let configs = device.supported_input_configs()?.collect::<Vec<_>>();
    let supported_config = find_supported_config(configs, config.sample_rate).ok_or_else(|| {
        anyhow!(
            "device has no mono f32 input format at {} Hz",
            config.sample_rate
        )
    })?;

    let stream_config: cpal::StreamConfig = supported_config
        .with_sample_rate(cpal::SampleRate(config.sample_rate))
        .into();

    println!("[AUDIO] Capturing at {} Hz", config.sample_rate);

    let err_fn = |err| eprintln!("[AUDIO] An error occurred on the audio stream: {}", err);

    // This buffer accumulates audio data from the callback until a full
    // analysis block is available.
    let block_size = config.block_size;
    let mut audio_buffer = Vec::with_capacity(block_size * 2);

    let stream = device.build_input_stream(
        &stream_config,
        move |data: &[f32], _: &cpal::InputCallbackInfo| {
            audio_buffer.extend_from_slice(data);

            // While we have enough data for a full block, hand it off.
            // `push` never blocks, so the callback never stalls.
            while audio_buffer.len() >= block_size {
                producer.push(audio_buffer[..block_size].to_vec());
                audio_buffer.drain(..block_size);
            }
        },
        err_fn,
        None,
    )?;

    stream.play()?;

    Ok(stream)
}

/// Finds a mono f32 input configuration that can run at `target_rate`.
fn find_supported_config(
    configs: Vec<SupportedStreamConfigRange>,
    target_rate: u32,
) -> Option<SupportedStreamConfigRange> {
    configs.into_iter().find(|c| {
        c.channels() == 1
            && c.sample_format() == cpal::SampleFormat::F32
            && c.min_sample_rate().0 <= target_rate
            && target_rate <= c.max_sample_rate().0
    })
}
