//! Device acquisition

use crate::vision::{SnapshotFileSource, VideoSource};
use crate::voice::{AudioCapture, Microphone};
use crate::{Error, Result};

/// Acquires capture devices for a session
///
/// The session is the only caller; released devices are simply dropped.
pub trait DeviceProvider {
    /// Open the default microphone
    ///
    /// # Errors
    ///
    /// Returns `Error::Device` if no input device is usable
    fn open_microphone(&mut self) -> Result<Box<dyn Microphone>>;

    /// Open a camera by device identifier
    ///
    /// # Errors
    ///
    /// Returns `Error::Device` if the camera is missing or unreadable
    fn open_camera(&mut self, device: Option<&str>, wide_angle: bool)
    -> Result<Box<dyn VideoSource>>;
}

/// Host devices: the default cpal input and a snapshot-file camera
#[derive(Debug, Default)]
pub struct SystemDevices;

impl DeviceProvider for SystemDevices {
    fn open_microphone(&mut self) -> Result<Box<dyn Microphone>> {
        Ok(Box::new(AudioCapture::new()?))
    }

    fn open_camera(
        &mut self,
        device: Option<&str>,
        wide_angle: bool,
    ) -> Result<Box<dyn VideoSource>> {
        let path = device.ok_or_else(|| Error::Device("no camera configured".to_string()))?;
        if wide_angle {
            tracing::debug!("wide-angle preference ignored for snapshot cameras");
        }
        Ok(Box::new(SnapshotFileSource::open(path)?))
    }
}
