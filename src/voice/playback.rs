//! Gapless playback of inbound speech
//!
//! Inbound chunks are scheduled back to back on a single forward-only cursor
//! against the output device's clock. Every scheduled unit stays in a live
//! set until it completes or is stopped by an interruption.

use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, SampleRate, Stream, StreamConfig};
use rubato::{FftFixedIn, Resampler};

use super::capture::RESAMPLE_CHUNK;
use super::pcm::{AudioBuffer, OUTPUT_SAMPLE_RATE};
use crate::{Error, Result};

/// Identifier of a scheduled playback unit
pub type UnitId = u64;

/// An output clock plus the ability to start and stop units on it
pub trait OutputDevice {
    /// Current time on the output clock, in seconds
    fn now(&self) -> f64;

    /// Begin playing `buffer` at clock time `at`
    fn start(&mut self, id: UnitId, buffer: &AudioBuffer, at: f64);

    /// Silence a unit immediately
    fn stop(&mut self, id: UnitId);
}

impl<D: OutputDevice + ?Sized> OutputDevice for Box<D> {
    fn now(&self) -> f64 {
        (**self).now()
    }

    fn start(&mut self, id: UnitId, buffer: &AudioBuffer, at: f64) {
        (**self).start(id, buffer, at);
    }

    fn stop(&mut self, id: UnitId) {
        (**self).stop(id);
    }
}

/// Placement of one buffer on the output clock
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduledUnit {
    pub id: UnitId,
    pub start: f64,
    pub duration: f64,
}

impl ScheduledUnit {
    #[must_use]
    pub fn end(&self) -> f64 {
        self.start + self.duration
    }
}

/// Schedules decoded buffers for gapless output and supports barge-in
pub struct PlaybackScheduler<D> {
    device: D,
    cursor: f64,
    active: BTreeMap<UnitId, ScheduledUnit>,
    next_id: UnitId,
}

impl<D: OutputDevice> PlaybackScheduler<D> {
    pub fn new(device: D) -> Self {
        let cursor = device.now();
        Self {
            device,
            cursor,
            active: BTreeMap::new(),
            next_id: 1,
        }
    }

    /// Schedule a buffer to start exactly where the previous one ends
    ///
    /// If the cursor has fallen behind the clock it snaps forward to now.
    pub fn schedule(&mut self, buffer: &AudioBuffer) -> ScheduledUnit {
        let now = self.device.now();
        if self.cursor < now {
            self.cursor = now;
        }

        let unit = ScheduledUnit {
            id: self.next_id,
            start: self.cursor,
            duration: buffer.duration(),
        };
        self.next_id += 1;

        self.device.start(unit.id, buffer, unit.start);
        self.cursor += unit.duration;
        self.active.insert(unit.id, unit);

        tracing::trace!(id = unit.id, start = unit.start, duration = unit.duration, "scheduled playback unit");
        unit
    }

    /// Stop every active unit, clear the set and reset the cursor to now
    ///
    /// Returns the number of units stopped.
    pub fn interrupt(&mut self) -> usize {
        let stopped = self.active.len();
        for id in std::mem::take(&mut self.active).into_keys() {
            self.device.stop(id);
        }
        self.cursor = self.device.now();
        if stopped > 0 {
            tracing::debug!(stopped, "playback interrupted");
        }
        stopped
    }

    /// Remove units that have finished playing and return them in order
    pub fn reap(&mut self) -> Vec<ScheduledUnit> {
        let now = self.device.now();
        let done: Vec<UnitId> = self
            .active
            .values()
            .filter(|u| u.end() <= now)
            .map(|u| u.id)
            .collect();
        done.into_iter()
            .filter_map(|id| self.active.remove(&id))
            .collect()
    }

    /// True while any unit is scheduled or playing
    #[must_use]
    pub fn is_speaking(&self) -> bool {
        !self.active.is_empty()
    }

    /// Next start time
    #[must_use]
    pub const fn cursor(&self) -> f64 {
        self.cursor
    }

    /// Number of live units
    #[must_use]
    pub fn active_units(&self) -> usize {
        self.active.len()
    }

    #[must_use]
    pub const fn device(&self) -> &D {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }
}

/// Clock-only output used when no speaker is available
#[derive(Debug)]
pub struct SilentOutput {
    origin: Instant,
}

impl SilentOutput {
    #[must_use]
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SilentOutput {
    fn default() -> Self {
        Self::new()
    }
}

impl OutputDevice for SilentOutput {
    fn now(&self) -> f64 {
        self.origin.elapsed().as_secs_f64()
    }

    fn start(&mut self, _id: UnitId, _buffer: &AudioBuffer, _at: f64) {}

    fn stop(&mut self, _id: UnitId) {}
}

struct MixUnit {
    id: UnitId,
    start_frame: u64,
    samples: Arc<[f32]>,
}

impl MixUnit {
    fn end_frame(&self) -> u64 {
        self.start_frame + self.samples.len() as u64
    }
}

/// Plays scheduled units on the default output device
///
/// The clock is the number of frames the device has rendered.
pub struct SpeakerOutput {
    _stream: Stream,
    units: Arc<Mutex<Vec<MixUnit>>>,
    frames_played: Arc<AtomicU64>,
    sample_rate: u32,
    resamplers: HashMap<u32, ChunkResampler>,
}

impl SpeakerOutput {
    /// Open the default output device and start rendering silence
    ///
    /// # Errors
    ///
    /// Returns `Error::Device` if the output device cannot be opened
    pub fn new() -> Result<Self> {
        let host = cpal::default_host();

        let device = host
            .default_output_device()
            .ok_or_else(|| Error::Device("no output device available".to_string()))?;

        let supported_config = device
            .supported_output_configs()
            .map_err(|e| Error::Device(e.to_string()))?
            .find(|c| {
                c.channels() == 1
                    && c.sample_format() == SampleFormat::F32
                    && c.min_sample_rate() <= SampleRate(OUTPUT_SAMPLE_RATE)
                    && c.max_sample_rate() >= SampleRate(OUTPUT_SAMPLE_RATE)
            })
            .or_else(|| {
                // Fallback: try stereo
                device.supported_output_configs().ok()?.find(|c| {
                    c.channels() == 2
                        && c.sample_format() == SampleFormat::F32
                        && c.min_sample_rate() <= SampleRate(OUTPUT_SAMPLE_RATE)
                        && c.max_sample_rate() >= SampleRate(OUTPUT_SAMPLE_RATE)
                })
            })
            .ok_or_else(|| Error::Device("no suitable output config found".to_string()))?;

        let config: StreamConfig = supported_config
            .with_sample_rate(SampleRate(OUTPUT_SAMPLE_RATE))
            .config();
        let channels = usize::from(config.channels);

        let units: Arc<Mutex<Vec<MixUnit>>> = Arc::new(Mutex::new(Vec::new()));
        let frames_played = Arc::new(AtomicU64::new(0));

        let units_clone = Arc::clone(&units);
        let played_clone = Arc::clone(&frames_played);

        let stream = device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    let base = played_clone.load(Ordering::Acquire);
                    let frames = data.len() / channels.max(1);

                    if let Ok(mut units) = units_clone.lock() {
                        for (offset, frame) in data.chunks_mut(channels).enumerate() {
                            let t = base + offset as u64;
                            let sample: f32 = units
                                .iter()
                                .filter(|u| t >= u.start_frame && t < u.end_frame())
                                .map(|u| {
                                    #[allow(clippy::cast_possible_truncation)]
                                    let index = (t - u.start_frame) as usize;
                                    u.samples[index]
                                })
                                .sum();
                            frame.fill(sample.clamp(-1.0, 1.0));
                        }
                        let end = base + frames as u64;
                        units.retain(|u| u.end_frame() > end);
                    } else {
                        data.fill(0.0);
                    }

                    played_clone.fetch_add(frames as u64, Ordering::Release);
                },
                |err| {
                    tracing::error!(error = %err, "audio playback error");
                },
                None,
            )
            .map_err(|e| Error::Device(e.to_string()))?;

        stream.play().map_err(|e| Error::Device(e.to_string()))?;

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            sample_rate = OUTPUT_SAMPLE_RATE,
            channels = config.channels,
            "audio playback initialized"
        );

        Ok(Self {
            _stream: stream,
            units,
            frames_played,
            sample_rate: OUTPUT_SAMPLE_RATE,
            resamplers: HashMap::new(),
        })
    }

    /// Convert an off-rate chunk, reusing one resampler per source rate
    fn resample(&mut self, buffer: &AudioBuffer) -> Result<Vec<f32>> {
        let resampler = match self.resamplers.entry(buffer.sample_rate) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                tracing::debug!(from = buffer.sample_rate, to = self.sample_rate, "playback resampler created");
                entry.insert(ChunkResampler::new(buffer.sample_rate, self.sample_rate)?)
            }
        };
        resampler.process(&buffer.samples)
    }
}

impl OutputDevice for SpeakerOutput {
    #[allow(clippy::cast_precision_loss)]
    fn now(&self) -> f64 {
        self.frames_played.load(Ordering::Acquire) as f64 / f64::from(self.sample_rate)
    }

    fn start(&mut self, id: UnitId, buffer: &AudioBuffer, at: f64) {
        let samples = if buffer.sample_rate == self.sample_rate {
            Arc::clone(&buffer.samples)
        } else {
            match self.resample(buffer) {
                Ok(samples) => samples.into(),
                Err(e) => {
                    tracing::warn!(rate = buffer.sample_rate, error = %e, "dropping chunk that could not be resampled");
                    return;
                }
            }
        };

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let start_frame = (at * f64::from(self.sample_rate)).round().max(0.0) as u64;

        if let Ok(mut units) = self.units.lock() {
            units.push(MixUnit {
                id,
                start_frame,
                samples,
            });
        }
    }

    fn stop(&mut self, id: UnitId) {
        if let Ok(mut units) = self.units.lock() {
            units.retain(|u| u.id != id);
        }
    }
}

/// Resamples whole, independent chunks between two fixed rates
struct ChunkResampler {
    resampler: FftFixedIn<f32>,
    ratio: f64,
}

impl ChunkResampler {
    fn new(from_rate: u32, to_rate: u32) -> Result<Self> {
        let resampler =
            FftFixedIn::<f32>::new(from_rate as usize, to_rate as usize, RESAMPLE_CHUNK, 2, 1)
                .map_err(|e| Error::Audio(format!("resampler init failed: {e}")))?;
        Ok(Self {
            resampler,
            ratio: f64::from(to_rate) / f64::from(from_rate),
        })
    }

    /// Output length follows the rate ratio; the filter delay is trimmed
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    fn process(&mut self, samples: &[f32]) -> Result<Vec<f32>> {
        if samples.is_empty() {
            return Ok(Vec::new());
        }
        self.resampler.reset();

        let expected = (samples.len() as f64 * self.ratio).round() as usize;
        let delay = self.resampler.output_delay();
        let mut out = Vec::with_capacity(expected + delay + RESAMPLE_CHUNK);
        let mut input = samples;

        while out.len() < expected + delay {
            let needed = self.resampler.input_frames_next();
            let block = if input.len() >= needed {
                let (block, rest) = input.split_at(needed);
                input = rest;
                self.resampler.process(&[block], None)
            } else if input.is_empty() {
                // Flush the filter with silence
                self.resampler.process_partial(None::<&[&[f32]]>, None)
            } else {
                let tail: &[&[f32]] = &[std::mem::take(&mut input)];
                self.resampler.process_partial(Some(tail), None)
            }
            .map_err(|e| Error::Audio(format!("resample failed: {e}")))?;
            out.extend_from_slice(&block[0]);
        }

        out.drain(..delay);
        out.truncate(expected);
        Ok(out)
    }
}
