use camwatch_types::{frame::DecodedFrame, playback::RequestToken, Result};

use crate::capture_error;

/// Decodes an encoded still (JPEG/PNG) into an RGBA frame tagged with `token`.
///
/// The format is sniffed from the bytes; servers frequently mislabel
/// `Content-Type` on snapshot endpoints.
pub fn decode_frame(token: RequestToken, bytes: &[u8]) -> Result<DecodedFrame> {
    if bytes.is_empty() {
        return Err(capture_error("empty image body"));
    }
    let img = image::load_from_memory(bytes)
        .map_err(|err| capture_error(format!("frame decode failed: {err}")))?;
    let rgba = img.to_rgba8();
    let (width, height) = rgba.dimensions();
    if width == 0 || height == 0 {
        return Err(capture_error("decoded frame has no pixels"));
    }
    Ok(DecodedFrame::new(token, width, height, rgba.into_raw()))
}
