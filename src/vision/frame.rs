//! Video frame sources and frame reduction

use std::io::Cursor;
use std::path::PathBuf;
use std::time::SystemTime;

use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::DynamicImage;

use crate::{Error, Result};

/// A live video surface the sampler reads frames from
pub trait VideoSource {
    /// Current surface dimensions; `(0, 0)` when nothing is showing yet
    fn dimensions(&self) -> (u32, u32);

    /// Latest frame, if one is available
    fn current_frame(&mut self) -> Option<DynamicImage>;

    /// Human-readable device label
    fn label(&self) -> String;
}

/// Reads the newest still written by an external capture tool
///
/// The image is re-decoded only when the file's modification time changes.
pub struct SnapshotFileSource {
    path: PathBuf,
    frame: Option<DynamicImage>,
    modified: Option<SystemTime>,
}

impl SnapshotFileSource {
    /// Open a snapshot file source
    ///
    /// # Errors
    ///
    /// Returns `Error::Device` if the file does not exist
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if !path.exists() {
            return Err(Error::Device(format!(
                "camera snapshot not found: {}",
                path.display()
            )));
        }
        let mut source = Self {
            path,
            frame: None,
            modified: None,
        };
        source.refresh();
        Ok(source)
    }

    fn refresh(&mut self) {
        let modified = std::fs::metadata(&self.path).and_then(|m| m.modified()).ok();
        if modified.is_some() && modified == self.modified && self.frame.is_some() {
            return;
        }
        match image::open(&self.path) {
            Ok(frame) => {
                self.frame = Some(frame);
                self.modified = modified;
            }
            // The writer may be mid-write; keep the previous frame
            Err(e) => tracing::trace!(path = %self.path.display(), error = %e, "snapshot not readable"),
        }
    }
}

impl VideoSource for SnapshotFileSource {
    fn dimensions(&self) -> (u32, u32) {
        self.frame
            .as_ref()
            .map_or((0, 0), |f| (f.width(), f.height()))
    }

    fn current_frame(&mut self) -> Option<DynamicImage> {
        self.refresh();
        self.frame.clone()
    }

    fn label(&self) -> String {
        format!("snapshot:{}", self.path.display())
    }
}

/// Downsample so the longest edge is at most `max_dimension`, then JPEG-encode
///
/// # Errors
///
/// Returns `Error::Vision` for an empty frame, or `Error::Image` if encoding fails
pub fn encode_jpeg(frame: &DynamicImage, max_dimension: u32, quality: u8) -> Result<Vec<u8>> {
    let (width, height) = (frame.width(), frame.height());
    if width == 0 || height == 0 {
        return Err(Error::Vision("frame has zero dimensions".to_string()));
    }

    let scaled = if width.max(height) > max_dimension {
        frame.resize(max_dimension, max_dimension, FilterType::Triangle)
    } else {
        frame.clone()
    };
    let rgb = scaled.to_rgb8();

    let mut out = Cursor::new(Vec::new());
    JpegEncoder::new_with_quality(&mut out, quality.clamp(1, 100)).encode_image(&rgb)?;
    Ok(out.into_inner())
}
