use std::{fmt, sync::Arc};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::playback::RequestToken;

/// A fully decoded frame held by one of the viewer buffers.
#[derive(Clone)]
pub struct DecodedFrame {
    /// Token of the request that produced this frame.
    pub token: RequestToken,
    pub width: u32,
    pub height: u32,
    /// Raw RGBA pixel buffer, `width * height * 4` bytes.
    pub rgba: Arc<[u8]>,
    pub received_at: DateTime<Utc>,
}

impl DecodedFrame {
    pub fn new(token: RequestToken, width: u32, height: u32, rgba: Vec<u8>) -> Self {
        Self {
            token,
            width,
            height,
            rgba: rgba.into(),
            received_at: Utc::now(),
        }
    }

    /// Whether the pixel buffer matches the advertised dimensions.
    pub fn is_consistent(&self) -> bool {
        self.width > 0
            && self.height > 0
            && self.rgba.len() == (self.width as usize) * (self.height as usize) * 4
    }
}

impl fmt::Debug for DecodedFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecodedFrame")
            .field("token", &self.token)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bytes", &self.rgba.len())
            .field("received_at", &self.received_at)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ImageEncoding {
    #[default]
    Jpeg,
    Png,
}

impl ImageEncoding {
    pub fn extension(self) -> &'static str {
        match self {
            ImageEncoding::Jpeg => "jpg",
            ImageEncoding::Png => "png",
        }
    }

    pub fn mime_type(self) -> &'static str {
        match self {
            ImageEncoding::Jpeg => "image/jpeg",
            ImageEncoding::Png => "image/png",
        }
    }
}

/// Serialized still image, e.g. a captured freeze-frame.
#[derive(Clone, PartialEq, Eq)]
pub struct EncodedImage {
    pub encoding: ImageEncoding,
    pub width: u32,
    pub height: u32,
    pub data: Arc<[u8]>,
}

impl EncodedImage {
    pub fn new(encoding: ImageEncoding, width: u32, height: u32, data: Vec<u8>) -> Self {
        Self {
            encoding,
            width,
            height,
            data: data.into(),
        }
    }
}

impl fmt::Debug for EncodedImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncodedImage")
            .field("encoding", &self.encoding)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bytes", &self.data.len())
            .finish()
    }
}

/// Where a freeze-frame came from when the viewer paused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CaptureOrigin {
    LiveBuffer,
    PrefetchBuffer,
    OnDemand,
    Placeholder,
}

impl CaptureOrigin {
    pub fn is_placeholder(self) -> bool {
        matches!(self, CaptureOrigin::Placeholder)
    }
}

#[derive(Debug, Clone)]
pub struct FrozenFrame {
    pub image: EncodedImage,
    pub origin: CaptureOrigin,
    /// Token of the frame the capture was taken from, if any.
    pub source_token: Option<RequestToken>,
    pub captured_at: DateTime<Utc>,
}

impl FrozenFrame {
    pub fn new(image: EncodedImage, origin: CaptureOrigin, source_token: Option<RequestToken>) -> Self {
        Self {
            image,
            origin,
            source_token,
            captured_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_consistency_checks_buffer_length() {
        let ok = DecodedFrame::new(RequestToken(1), 2, 2, vec![0; 16]);
        assert!(ok.is_consistent());

        let short = DecodedFrame::new(RequestToken(1), 2, 2, vec![0; 15]);
        assert!(!short.is_consistent());

        let empty = DecodedFrame::new(RequestToken(1), 0, 0, Vec::new());
        assert!(!empty.is_consistent());
    }
}
