//! # Block Pipeline Module
//!
//! Decouples the real-time capture callback from spectral analysis and
//! publishes results for display readers.
//!
//! ## Architecture
//! - **Capture side**: `BlockProducer` enqueues fixed-size blocks and
//!   never blocks; when the queue is full the oldest unconsumed block is
//!   dropped (freshness over completeness) and counted.
//! - **Worker thread**: drains the queue in arrival order, updates the
//!   waveform buffer, and runs analyze -> calibrate -> map per block.
//! - **Published state**: the latest `PitchReading` is swapped atomically
//!   (`ArcSwapOption`), so readers never observe a torn reading; the
//!   waveform buffer sits behind a copy-on-read lock.

use crate::config::{EngineConfig, SilencePolicy};
use crate::pitch;
use crate::ring::WaveformBuffer;
use crate::spectrum::SpectrumAnalyzer;
use crate::PitchReading;
use anyhow::{Result, bail};
use arc_swap::ArcSwapOption;
use crossbeam_channel::{Receiver, Sender, TrySendError, bounded, select};
use parking_lot::RwLock;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, JoinHandle};

/// Depth of the block queue between capture and the worker. Small on
/// purpose: a deep queue only adds latency once the worker falls behind.
const QUEUE_CAPACITY: usize = 8;

/// One block of captured audio. Immutable once produced; ownership moves
/// from the capture callback to the worker.
#[derive(Debug, Clone)]
pub struct AudioBlock {
    pub samples: Vec<f32>,
    /// Sample rate the block was captured at, in Hz.
    pub sample_rate: u32,
    /// Arrival sequence number, starting at 0.
    pub sequence: u64,
}

/// Capture-side handle to the block queue.
///
/// `push` is safe to call from a real-time audio callback: it never
/// blocks and never waits on the worker.
pub struct BlockProducer {
    tx: Sender<AudioBlock>,
    // Clone of the worker's receiver, used only to evict the oldest
    // queued block when the queue is full.
    overflow_rx: Receiver<AudioBlock>,
    dropped: Arc<AtomicU64>,
    sample_rate: u32,
    next_sequence: u64,
}

impl BlockProducer {
    /// Enqueue a block, dropping the oldest unconsumed block if the
    /// worker has fallen behind.
    pub fn push(&mut self, samples: Vec<f32>) {
        let mut block = AudioBlock {
            samples,
            sample_rate: self.sample_rate,
            sequence: self.next_sequence,
        };
        self.next_sequence += 1;

        loop {
            match self.tx.try_send(block) {
                Ok(()) => return,
                Err(TrySendError::Full(returned)) => {
                    block = returned;
                    // Evict the oldest queued block to make room. If the
                    // worker drained the queue in the meantime, the retry
                    // succeeds without dropping anything.
                    if self.overflow_rx.try_recv().is_ok() {
                        self.dropped.fetch_add(1, Ordering::Relaxed);
                    }
                }
                // Worker gone; the capture source is shutting down too.
                Err(TrySendError::Disconnected(_)) => return,
            }
        }
    }

    /// Total blocks dropped to backpressure so far.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

fn block_queue(
    capacity: usize,
    sample_rate: u32,
    dropped: Arc<AtomicU64>,
) -> (BlockProducer, Receiver<AudioBlock>) {
    let (tx, rx) = bounded(capacity);
    let producer = BlockProducer {
        tx,
        overflow_rx: rx.clone(),
        dropped,
        sample_rate,
        next_sequence: 0,
    };
    (producer, rx)
}

/// State shared between the worker thread and display readers.
struct SharedState {
    waveform: RwLock<WaveformBuffer>,
    latest: ArcSwapOption<PitchReading>,
}

/// Per-block processing: ring buffer update, then
/// analyze -> calibrate -> map -> publish.
struct PitchEngine {
    analyzer: SpectrumAnalyzer,
    config: EngineConfig,
    shared: Arc<SharedState>,
    last_sequence: Option<u64>,
}

impl PitchEngine {
    fn new(config: EngineConfig, shared: Arc<SharedState>) -> Result<Self> {
        Ok(Self {
            analyzer: SpectrumAnalyzer::new(&config)?,
            config,
            shared,
            last_sequence: None,
        })
    }

    /// Process one block. An error here is a configuration fault and
    /// fatal to the worker; silence is not an error.
    fn process_block(&mut self, block: &AudioBlock) -> Result<()> {
        if block.sample_rate != self.config.sample_rate {
            bail!(
                "sample rate mismatch: block at {} Hz, pipeline configured for {} Hz",
                block.sample_rate,
                self.config.sample_rate
            );
        }
        if block.samples.len() != self.config.block_size {
            bail!(
                "block size mismatch: got {} samples, expected {}",
                block.samples.len(),
                self.config.block_size
            );
        }

        if let Some(last) = self.last_sequence {
            let gap = block.sequence.saturating_sub(last + 1);
            if gap > 0 {
                eprintln!("[PIPELINE] queue overflow: {} block(s) dropped", gap);
            }
        }
        self.last_sequence = Some(block.sequence);

        self.shared.waveform.write().push(&block.samples);

        match self.analyzer.analyze(&block.samples) {
            Some(peak) => {
                let calibrated = self.config.calibration.apply(peak.refined_frequency_hz);
                match pitch::map_frequency(calibrated) {
                    Some(reading) => self.shared.latest.store(Some(Arc::new(reading))),
                    None => self.publish_silence(),
                }
            }
            None => self.publish_silence(),
        }
        Ok(())
    }

    fn publish_silence(&self) {
        if self.config.silence_policy == SilencePolicy::Clear {
            self.shared.latest.store(None);
        }
    }
}

/// Handle to a running analysis pipeline.
///
/// All accessors are safe to call from any thread at any cadence; the
/// display typically polls them on its redraw tick.
pub struct PitchPipeline {
    shared: Arc<SharedState>,
    dropped: Arc<AtomicU64>,
    shutdown_tx: Sender<()>,
    worker: Option<JoinHandle<()>>,
}

impl PitchPipeline {
    /// Validates the configuration, spawns the worker thread, and returns
    /// the pipeline handle together with the producer for the capture side.
    pub fn start(config: EngineConfig) -> Result<(Self, BlockProducer)> {
        config.validate()?;

        let shared = Arc::new(SharedState {
            waveform: RwLock::new(WaveformBuffer::new(config.display_capacity())),
            latest: ArcSwapOption::empty(),
        });
        let dropped = Arc::new(AtomicU64::new(0));
        let (producer, block_rx) = block_queue(QUEUE_CAPACITY, config.sample_rate, dropped.clone());
        let (shutdown_tx, shutdown_rx) = bounded(1);

        let mut engine = PitchEngine::new(config, shared.clone())?;
        let worker = thread::spawn(move || {
            eprintln!("[PIPELINE] worker started");
            loop {
                select! {
                    recv(block_rx) -> msg => match msg {
                        Ok(block) => {
                            if let Err(e) = engine.process_block(&block) {
                                eprintln!("[PIPELINE] fatal: {}", e);
                                break;
                            }
                        }
                        Err(_) => {
                            eprintln!("[PIPELINE] capture source closed");
                            break;
                        }
                    },
                    recv(shutdown_rx) -> _ => {
                        eprintln!("[PIPELINE] received shutdown signal");
                        break;
                    }
                }
            }
            eprintln!("[PIPELINE] worker finished");
        });

        Ok((
            Self {
                shared,
                dropped,
                shutdown_tx,
                worker: Some(worker),
            },
            producer,
        ))
    }

    /// Chronological copy of the buffered waveform samples.
    pub fn current_waveform(&self) -> Vec<f32> {
        self.shared.waveform.read().snapshot()
    }

    /// The newest `n` buffered samples, for displays that show less than
    /// the full window.
    pub fn waveform_tail(&self, n: usize) -> Vec<f32> {
        self.shared.waveform.read().snapshot_last(n)
    }

    /// The most recently published reading, or `None` while no peak has
    /// been detected (subject to the configured silence policy).
    pub fn current_pitch(&self) -> Option<PitchReading> {
        self.shared.latest.load_full().map(|r| (*r).clone())
    }

    /// Total blocks dropped to backpressure so far.
    pub fn dropped_blocks(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// False once the worker has exited (shutdown or fatal error).
    pub fn is_running(&self) -> bool {
        self.worker.as_ref().is_some_and(|w| !w.is_finished())
    }

    /// Stops the worker and waits for it to finish. In-flight blocks are
    /// discarded. Dropping the handle without calling this also stops the
    /// worker once the capture side hangs up.
    pub fn shutdown(mut self) {
        let _ = self.shutdown_tx.try_send(());
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    const BLOCK_SIZE: usize = 2048;
    const SAMPLE_RATE: u32 = 44100;

    fn tone_block(freq: f32) -> Vec<f32> {
        (0..BLOCK_SIZE)
            .map(|i| {
                let t = i as f32 / SAMPLE_RATE as f32;
                0.5 * (2.0 * std::f32::consts::PI * freq * t).sin()
            })
            .collect()
    }

    fn engine_with_policy(policy: SilencePolicy) -> (PitchEngine, Arc<SharedState>) {
        let config = EngineConfig {
            silence_policy: policy,
            ..EngineConfig::default()
        };
        let shared = Arc::new(SharedState {
            waveform: RwLock::new(WaveformBuffer::new(config.display_capacity())),
            latest: ArcSwapOption::empty(),
        });
        let engine = PitchEngine::new(config, shared.clone()).unwrap();
        (engine, shared)
    }

    fn block(samples: Vec<f32>, sequence: u64) -> AudioBlock {
        AudioBlock {
            samples,
            sample_rate: SAMPLE_RATE,
            sequence,
        }
    }

    #[test]
    fn producer_never_blocks_and_keeps_the_newest_blocks() {
        let dropped = Arc::new(AtomicU64::new(0));
        let (mut producer, rx) = block_queue(4, SAMPLE_RATE, dropped);

        // No consumer is draining; 20 pushes through a 4-deep queue must
        // return promptly and shed the 16 oldest blocks.
        let start = Instant::now();
        for _ in 0..20 {
            producer.push(vec![0.0; 4]);
        }
        assert!(start.elapsed() < Duration::from_secs(1));
        assert_eq!(producer.dropped(), 16);

        let kept: Vec<u64> = rx.try_iter().map(|b| b.sequence).collect();
        assert_eq!(kept, vec![16, 17, 18, 19]);
    }

    #[test]
    fn tone_block_publishes_a_reading() {
        let (mut engine, shared) = engine_with_policy(SilencePolicy::Clear);
        engine.process_block(&block(tone_block(440.0), 0)).unwrap();

        let reading = shared.latest.load_full().expect("expected a reading");
        assert_eq!(reading.note_name, "A");
        assert_eq!(reading.octave, 4);
        assert!((reading.frequency_hz - 440.0).abs() < 2.0);
    }

    #[test]
    fn silent_block_clears_the_reading() {
        let (mut engine, shared) = engine_with_policy(SilencePolicy::Clear);
        engine.process_block(&block(tone_block(440.0), 0)).unwrap();
        assert!(shared.latest.load_full().is_some());

        engine.process_block(&block(vec![0.0; BLOCK_SIZE], 1)).unwrap();
        assert!(shared.latest.load_full().is_none());
    }

    #[test]
    fn hold_last_policy_retains_the_reading_through_silence() {
        let (mut engine, shared) = engine_with_policy(SilencePolicy::HoldLast);
        engine.process_block(&block(tone_block(440.0), 0)).unwrap();
        engine.process_block(&block(vec![0.0; BLOCK_SIZE], 1)).unwrap();

        let held = shared.latest.load_full().expect("reading should be held");
        assert_eq!(held.note_name, "A");
    }

    #[test]
    fn waveform_buffer_tracks_processed_blocks() {
        let (mut engine, shared) = engine_with_policy(SilencePolicy::Clear);
        engine.process_block(&block(tone_block(440.0), 0)).unwrap();
        engine.process_block(&block(tone_block(440.0), 1)).unwrap();
        assert_eq!(shared.waveform.read().len(), 2 * BLOCK_SIZE);
    }

    #[test]
    fn mismatched_sample_rate_is_fatal() {
        let (mut engine, _shared) = engine_with_policy(SilencePolicy::Clear);
        let bad = AudioBlock {
            samples: tone_block(440.0),
            sample_rate: 48000,
            sequence: 0,
        };
        assert!(engine.process_block(&bad).is_err());
    }

    #[test]
    fn mismatched_block_size_is_fatal() {
        let (mut engine, _shared) = engine_with_policy(SilencePolicy::Clear);
        assert!(engine.process_block(&block(vec![0.0; 100], 0)).is_err());
    }

    #[test]
    fn pipeline_detects_a_tone_end_to_end() {
        let (pipeline, mut producer) = PitchPipeline::start(EngineConfig::default()).unwrap();

        let samples = tone_block(440.0);
        let deadline = Instant::now() + Duration::from_secs(5);
        let mut reading = None;
        while reading.is_none() && Instant::now() < deadline {
            producer.push(samples.clone());
            std::thread::sleep(Duration::from_millis(10));
            reading = pipeline.current_pitch();
        }

        let reading = reading.expect("pipeline never published a reading");
        assert_eq!(reading.note_name, "A");
        assert_eq!(reading.octave, 4);
        assert!(!pipeline.current_waveform().is_empty());

        pipeline.shutdown();
    }

    #[test]
    fn worker_stops_when_the_capture_side_hangs_up() {
        let (pipeline, producer) = PitchPipeline::start(EngineConfig::default()).unwrap();
        assert!(pipeline.is_running());

        drop(producer);
        let deadline = Instant::now() + Duration::from_secs(5);
        while pipeline.is_running() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
        assert!(!pipeline.is_running());
    }

    #[test]
    fn invalid_config_fails_at_startup() {
        let config = EngineConfig {
            block_size: 0,
            ..EngineConfig::default()
        };
        assert!(PitchPipeline::start(config).is_err());
    }
}
