//! Frame decoding and freeze-frame capture.
//!
//! `FrameCapture` is the single capture primitive the viewer relies on: given a
//! decoded buffer, draw it onto an offscreen surface and serialize it. The
//! raster implementation below does this with the `image` crate; other targets
//! can plug in their own.

use std::io::Cursor;

use camwatch_types::{
    config::CaptureConfig,
    frame::{DecodedFrame, EncodedImage, ImageEncoding},
    CamwatchError,
};
use image::{codecs::jpeg::JpegEncoder, codecs::png::PngEncoder, ColorType, ImageEncoder};
use tracing::{debug, warn};

mod decode;
mod placeholder;
mod snapshot;

pub use decode::decode_frame;
pub use placeholder::{builtin_placeholder, load_placeholder};
pub use snapshot::SnapshotStore;

pub trait FrameCapture: Send + Sync {
    /// Serializes `frame`, or returns `None` when the buffer cannot be captured.
    fn capture(&self, frame: &DecodedFrame) -> Option<EncodedImage>;
}

/// Captures frames by re-encoding their RGBA pixels.
#[derive(Debug, Clone)]
pub struct RasterCapture {
    encoding: ImageEncoding,
    jpeg_quality: u8,
}

impl RasterCapture {
    pub fn new(config: &CaptureConfig) -> Self {
        Self {
            encoding: config.format,
            jpeg_quality: config.jpeg_quality.clamp(1, 100),
        }
    }

    pub fn jpeg(quality: u8) -> Self {
        Self {
            encoding: ImageEncoding::Jpeg,
            jpeg_quality: quality.clamp(1, 100),
        }
    }

    pub fn png() -> Self {
        Self {
            encoding: ImageEncoding::Png,
            jpeg_quality: 100,
        }
    }

    fn encode(&self, frame: &DecodedFrame) -> Result<Vec<u8>, CamwatchError> {
        let mut out = Cursor::new(Vec::new());
        match self.encoding {
            ImageEncoding::Png => PngEncoder::new(&mut out)
                .write_image(&frame.rgba, frame.width, frame.height, ColorType::Rgba8)
                .map_err(|err| capture_error(format!("png encode failed: {err}")))?,
            ImageEncoding::Jpeg => {
                // JPEG has no alpha channel.
                let rgb: Vec<u8> = frame
                    .rgba
                    .chunks_exact(4)
                    .flat_map(|px| [px[0], px[1], px[2]])
                    .collect();
                JpegEncoder::new_with_quality(&mut out, self.jpeg_quality)
                    .encode(&rgb, frame.width, frame.height, ColorType::Rgb8)
                    .map_err(|err| capture_error(format!("jpeg encode failed: {err}")))?
            }
        }
        Ok(out.into_inner())
    }
}

impl Default for RasterCapture {
    fn default() -> Self {
        Self::new(&CaptureConfig::default())
    }
}

impl FrameCapture for RasterCapture {
    fn capture(&self, frame: &DecodedFrame) -> Option<EncodedImage> {
        if !frame.is_consistent() {
            debug!(
                "Skipping capture of inconsistent frame {}x{} ({} bytes)",
                frame.width,
                frame.height,
                frame.rgba.len()
            );
            return None;
        }
        match self.encode(frame) {
            Ok(data) => Some(EncodedImage::new(
                self.encoding,
                frame.width,
                frame.height,
                data,
            )),
            Err(err) => {
                warn!("Frame capture failed for token {}: {err}", frame.token);
                None
            }
        }
    }
}

pub fn capture_error(message: impl Into<String>) -> CamwatchError {
    CamwatchError::Capture(message.into())
}
