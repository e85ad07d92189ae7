//! PCM wire format helpers and the live volume meter

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use base64::Engine as _;

use crate::{Error, Result};

/// Sample rate of outgoing microphone audio
pub const INPUT_SAMPLE_RATE: u32 = 16_000;

/// Default sample rate of inbound synthesized speech
pub const OUTPUT_SAMPLE_RATE: u32 = 24_000;

/// Samples per outgoing frame (100ms at 16kHz)
pub const FRAME_SIZE: usize = 1600;

/// Scale applied to RMS before clamping to 0-1; speech rarely exceeds 0.2 RMS
const VOLUME_GAIN: f32 = 5.0;

/// MIME type of outgoing audio frames
#[must_use]
pub fn input_mime_type() -> String {
    format!("audio/pcm;rate={INPUT_SAMPLE_RATE}")
}

/// Decoded mono audio with its sample rate
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    pub samples: Arc<[f32]>,
    pub sample_rate: u32,
}

impl AudioBuffer {
    #[must_use]
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples: samples.into(),
            sample_rate,
        }
    }

    /// Playback duration in seconds
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn duration(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / f64::from(self.sample_rate)
    }

    /// Decode a base64 PCM16 payload; `mime_type` may carry `rate=`
    ///
    /// # Errors
    ///
    /// Returns `Error::Audio` if the payload is not valid base64
    pub fn from_base64_pcm16(data: &str, mime_type: &str) -> Result<Self> {
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(data)
            .map_err(|e| Error::Audio(format!("invalid base64 audio: {e}")))?;
        let rate = parse_rate(mime_type).unwrap_or(OUTPUT_SAMPLE_RATE);
        Ok(Self::new(decode_pcm16(&bytes), rate))
    }
}

/// Convert f32 samples in [-1, 1] to little-endian PCM16 bytes
#[must_use]
pub fn encode_pcm16(samples: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        #[allow(clippy::cast_possible_truncation)]
        let value = (sample * 32767.0).clamp(-32768.0, 32767.0) as i16;
        out.extend_from_slice(&value.to_le_bytes());
    }
    out
}

/// Convert little-endian PCM16 bytes to f32 samples; a trailing odd byte is ignored
#[must_use]
pub fn decode_pcm16(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(2)
        .map(|pair| f32::from(i16::from_le_bytes([pair[0], pair[1]])) / 32768.0)
        .collect()
}

/// Encode samples to the base64 PCM16 payload sent over the channel
#[must_use]
pub fn encode_frame_base64(samples: &[f32]) -> String {
    base64::engine::general_purpose::STANDARD.encode(encode_pcm16(samples))
}

/// Extract `rate=NNNN` from a MIME type such as `audio/pcm;rate=24000`
#[must_use]
pub fn parse_rate(mime_type: &str) -> Option<u32> {
    mime_type
        .split(';')
        .filter_map(|part| part.trim().strip_prefix("rate="))
        .find_map(|rate| rate.trim().parse().ok())
}

/// Normalized 0-1 loudness estimate of a block of samples
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn volume_level(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let mean_square = samples.iter().map(|s| s * s).sum::<f32>() / samples.len() as f32;
    (mean_square.sqrt() * VOLUME_GAIN).clamp(0.0, 1.0)
}

/// Lock-free volume estimate written by the capture callback, read by the UI loop
#[derive(Debug, Clone, Default)]
pub struct VolumeMeter {
    bits: Arc<AtomicU32>,
}

impl VolumeMeter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a new level (clamped to 0-1)
    pub fn set(&self, level: f32) {
        self.bits
            .store(level.clamp(0.0, 1.0).to_bits(), Ordering::Relaxed);
    }

    /// Current level
    #[must_use]
    pub fn level(&self) -> f32 {
        f32::from_bits(self.bits.load(Ordering::Relaxed))
    }

    /// Reset to silence
    pub fn reset(&self) {
        self.set(0.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pcm16_is_little_endian() {
        let bytes = encode_pcm16(&[0.0, 1.0, -1.0]);
        assert_eq!(bytes, vec![0x00, 0x00, 0xff, 0x7f, 0x01, 0x80]);
    }

    #[test]
    fn decode_ignores_trailing_byte() {
        let samples = decode_pcm16(&[0x00, 0x40, 0x7f]);
        assert_eq!(samples.len(), 1);
        assert!((samples[0] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn parses_rate_from_mime() {
        assert_eq!(parse_rate("audio/pcm;rate=24000"), Some(24_000));
        assert_eq!(parse_rate("audio/pcm; rate=16000"), Some(16_000));
        assert_eq!(parse_rate("audio/pcm"), None);
    }

    #[test]
    fn buffer_duration() {
        let buffer = AudioBuffer::new(vec![0.0; 12_000], 24_000);
        assert!((buffer.duration() - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn base64_decode_uses_mime_rate() {
        let payload = encode_frame_base64(&[0.25; 160]);
        let buffer = AudioBuffer::from_base64_pcm16(&payload, "audio/pcm;rate=16000").unwrap();
        assert_eq!(buffer.sample_rate, 16_000);
        assert_eq!(buffer.samples.len(), 160);
        assert!(AudioBuffer::from_base64_pcm16("@@@", "audio/pcm").is_err());
    }

    #[test]
    fn volume_is_normalized() {
        assert!(volume_level(&[]).abs() < f32::EPSILON);
        assert!(volume_level(&[0.0; 100]).abs() < f32::EPSILON);
        assert!((volume_level(&[1.0; 100]) - 1.0).abs() < f32::EPSILON);

        let meter = VolumeMeter::new();
        meter.set(3.0);
        assert!((meter.level() - 1.0).abs() < f32::EPSILON);
        meter.reset();
        assert!(meter.level().abs() < f32::EPSILON);
    }
}
