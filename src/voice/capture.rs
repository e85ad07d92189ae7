//! Audio capture from microphone
//!
//! The cpal callback downmixes to mono, resamples to 16kHz when the device
//! cannot capture at that rate, cuts fixed-size frames, updates the volume
//! meter and hands each frame to the session without blocking. Frames that
//! cannot be handed over are dropped.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleFormat, SampleRate, Stream, StreamConfig};
use rubato::{FftFixedIn, Resampler};
use tokio::sync::mpsc;

use super::pcm::{FRAME_SIZE, INPUT_SAMPLE_RATE, VolumeMeter, volume_level};
use crate::{Error, Result};

/// Sample rate for audio capture (16kHz for speech)
pub const SAMPLE_RATE: u32 = INPUT_SAMPLE_RATE;

/// Resampler input chunk size
pub(super) const RESAMPLE_CHUNK: usize = 1024;

/// A source of fixed-size 16kHz mono frames
pub trait Microphone {
    /// Begin delivering frames to `frames`
    ///
    /// # Errors
    ///
    /// Returns `Error::Device` if the input stream cannot be started
    fn start(&mut self, frames: mpsc::Sender<Vec<f32>>) -> Result<()>;

    /// Stop delivering frames
    fn stop(&mut self);

    /// Live volume estimate
    fn meter(&self) -> VolumeMeter;
}

/// Accumulates samples and cuts them into fixed-size frames
#[derive(Debug)]
pub struct FrameAssembler {
    frame_size: usize,
    pending: Vec<f32>,
}

impl FrameAssembler {
    #[must_use]
    pub fn new(frame_size: usize) -> Self {
        let frame_size = frame_size.max(1);
        Self {
            frame_size,
            pending: Vec::with_capacity(frame_size * 2),
        }
    }

    /// Append samples and drain every complete frame
    pub fn push(&mut self, samples: &[f32]) -> Vec<Vec<f32>> {
        self.pending.extend_from_slice(samples);
        let mut frames = Vec::new();
        while self.pending.len() >= self.frame_size {
            let rest = self.pending.split_off(self.frame_size);
            frames.push(std::mem::replace(&mut self.pending, rest));
        }
        frames
    }

    /// Samples waiting for a full frame
    #[must_use]
    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}

/// Converts raw interleaved device samples to 16kHz mono
pub struct InputConverter {
    channels: usize,
    resampler: Option<FftFixedIn<f32>>,
    staging: Vec<f32>,
}

impl InputConverter {
    /// Build a converter for a device running at `device_rate` with `channels`
    ///
    /// # Errors
    ///
    /// Returns `Error::Audio` if the resampler cannot be constructed
    pub fn new(device_rate: u32, channels: u16) -> Result<Self> {
        let resampler = if device_rate == INPUT_SAMPLE_RATE {
            None
        } else {
            Some(
                FftFixedIn::<f32>::new(
                    device_rate as usize,
                    INPUT_SAMPLE_RATE as usize,
                    RESAMPLE_CHUNK,
                    2,
                    1,
                )
                .map_err(|e| Error::Audio(format!("resampler init failed: {e}")))?,
            )
        };

        Ok(Self {
            channels: usize::from(channels.max(1)),
            resampler,
            staging: Vec::new(),
        })
    }

    /// Downmix and resample one callback's worth of samples
    pub fn convert(&mut self, interleaved: &[f32]) -> Vec<f32> {
        let mono = downmix(interleaved, self.channels);

        let Some(resampler) = self.resampler.as_mut() else {
            return mono;
        };

        self.staging.extend_from_slice(&mono);
        let mut out = Vec::new();
        loop {
            let needed = resampler.input_frames_next();
            if self.staging.len() < needed {
                break;
            }
            let rest = self.staging.split_off(needed);
            let chunk = std::mem::replace(&mut self.staging, rest);
            match resampler.process(&[chunk], None) {
                Ok(result) => out.extend_from_slice(&result[0]),
                Err(e) => tracing::warn!(error = %e, "resample failed, dropping chunk"),
            }
        }
        out
    }
}

/// Average interleaved channels into mono
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn downmix(interleaved: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return interleaved.to_vec();
    }
    interleaved
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect()
}

/// Captures audio from the default input device
pub struct AudioCapture {
    device: Device,
    config: StreamConfig,
    meter: VolumeMeter,
    stream: Option<Stream>,
}

impl AudioCapture {
    /// Create a new audio capture instance
    ///
    /// Prefers a native 16kHz mono config; otherwise any f32 config is used
    /// and converted in the callback.
    ///
    /// # Errors
    ///
    /// Returns `Error::Device` if no input device or usable config exists
    pub fn new() -> Result<Self> {
        let host = cpal::default_host();

        let device = host
            .default_input_device()
            .ok_or_else(|| Error::Device("no input device available".to_string()))?;

        let native = device
            .supported_input_configs()
            .map_err(|e| Error::Device(e.to_string()))?
            .find(|c| {
                c.channels() == 1
                    && c.sample_format() == SampleFormat::F32
                    && c.min_sample_rate() <= SampleRate(SAMPLE_RATE)
                    && c.max_sample_rate() >= SampleRate(SAMPLE_RATE)
            })
            .map(|c| c.with_sample_rate(SampleRate(SAMPLE_RATE)));

        let supported_config = match native {
            Some(config) => config,
            None => device
                .supported_input_configs()
                .map_err(|e| Error::Device(e.to_string()))?
                .find(|c| c.sample_format() == SampleFormat::F32)
                .map(cpal::SupportedStreamConfigRange::with_max_sample_rate)
                .ok_or_else(|| Error::Device("no suitable audio config found".to_string()))?,
        };

        let config = supported_config.config();

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            sample_rate = config.sample_rate.0,
            channels = config.channels,
            "audio capture initialized"
        );

        Ok(Self {
            device,
            config,
            meter: VolumeMeter::new(),
            stream: None,
        })
    }

    /// Get the sample rate of delivered frames
    #[must_use]
    pub const fn sample_rate(&self) -> u32 {
        SAMPLE_RATE
    }
}

impl Microphone for AudioCapture {
    fn start(&mut self, frames: mpsc::Sender<Vec<f32>>) -> Result<()> {
        if self.stream.is_some() {
            return Ok(());
        }

        let mut converter = InputConverter::new(self.config.sample_rate.0, self.config.channels)?;
        let mut assembler = FrameAssembler::new(FRAME_SIZE);
        let meter = self.meter.clone();

        let stream = self
            .device
            .build_input_stream(
                &self.config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    let mono = converter.convert(data);
                    if !mono.is_empty() {
                        meter.set(volume_level(&mono));
                    }
                    for frame in assembler.push(&mono) {
                        // Best effort: a full or closed channel drops the frame
                        if frames.try_send(frame).is_err() {
                            tracing::trace!("dropped capture frame");
                        }
                    }
                },
                |err| {
                    tracing::error!(error = %err, "audio capture error");
                },
                None,
            )
            .map_err(|e| Error::Device(e.to_string()))?;

        stream.play().map_err(|e| Error::Device(e.to_string()))?;
        self.stream = Some(stream);

        tracing::debug!("audio capture started");
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(stream) = self.stream.take() {
            drop(stream);
            self.meter.reset();
            tracing::debug!("audio capture stopped");
        }
    }

    fn meter(&self) -> VolumeMeter {
        self.meter.clone()
    }
}

/// Convert f32 samples to WAV bytes
///
/// # Errors
///
/// Returns error if WAV encoding fails
pub fn samples_to_wav(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer =
            hound::WavWriter::new(&mut cursor, spec).map_err(|e| Error::Audio(e.to_string()))?;

        for &sample in samples {
            #[allow(clippy::cast_possible_truncation)]
            let sample_i16 = (sample * 32767.0).clamp(-32768.0, 32767.0) as i16;
            writer
                .write_sample(sample_i16)
                .map_err(|e| Error::Audio(e.to_string()))?;
        }

        writer.finalize().map_err(|e| Error::Audio(e.to_string()))?;
    }

    Ok(cursor.into_inner())
}
