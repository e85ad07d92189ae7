//! Voice processing module
//!
//! Handles microphone capture, PCM wire encoding and gapless playback.

mod capture;
mod pcm;
mod playback;

pub use capture::{
    AudioCapture, FrameAssembler, InputConverter, Microphone, SAMPLE_RATE, downmix, samples_to_wav,
};
pub use pcm::{
    AudioBuffer, FRAME_SIZE, INPUT_SAMPLE_RATE, OUTPUT_SAMPLE_RATE, VolumeMeter, decode_pcm16,
    encode_frame_base64, encode_pcm16, input_mime_type, parse_rate, volume_level,
};
pub use playback::{
    OutputDevice, PlaybackScheduler, ScheduledUnit, SilentOutput, SpeakerOutput, UnitId,
};
