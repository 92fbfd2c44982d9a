use std::{fs, io::Cursor, path::Path};

use camwatch_types::frame::{EncodedImage, ImageEncoding};
use image::{ImageBuffer, ImageOutputFormat, Rgba};
use once_cell::sync::Lazy;
use tracing::warn;

const PLACEHOLDER_WIDTH: u32 = 320;
const PLACEHOLDER_HEIGHT: u32 = 180;

static BUILTIN_PLACEHOLDER: Lazy<EncodedImage> = Lazy::new(render_builtin);

fn render_builtin() -> EncodedImage {
    let background = Rgba([0x2bu8, 0x2b, 0x2b, 0xff]);
    let stripe = Rgba([0x45u8, 0x45, 0x45, 0xff]);
    let buffer = ImageBuffer::from_fn(PLACEHOLDER_WIDTH, PLACEHOLDER_HEIGHT, |x, y| {
        if (x + y) / 12 % 2 == 0 {
            background
        } else {
            stripe
        }
    });
    let mut out = Cursor::new(Vec::new());
    if let Err(err) = buffer.write_to(&mut out, ImageOutputFormat::Png) {
        warn!("Built-in placeholder encoding failed: {err}");
    }
    EncodedImage::new(
        ImageEncoding::Png,
        PLACEHOLDER_WIDTH,
        PLACEHOLDER_HEIGHT,
        out.into_inner(),
    )
}

/// Static image shown when no frame could be captured while pausing.
pub fn builtin_placeholder() -> EncodedImage {
    BUILTIN_PLACEHOLDER.clone()
}

/// Loads a placeholder from disk, falling back to the built-in image when the
/// file is missing or not a readable image.
pub fn load_placeholder(path: Option<&Path>) -> EncodedImage {
    let Some(path) = path else {
        return builtin_placeholder();
    };

    let loaded = fs::read(path).map_err(|err| err.to_string()).and_then(|bytes| {
        let format = image::guess_format(&bytes).map_err(|err| err.to_string())?;
        let img = image::load_from_memory_with_format(&bytes, format)
            .map_err(|err| err.to_string())?;
        let encoding = match format {
            image::ImageFormat::Jpeg => ImageEncoding::Jpeg,
            image::ImageFormat::Png => ImageEncoding::Png,
            other => return Err(format!("unsupported placeholder format {other:?}")),
        };
        Ok(EncodedImage::new(encoding, img.width(), img.height(), bytes))
    });

    match loaded {
        Ok(image) => image,
        Err(err) => {
            warn!("Placeholder {:?} unusable ({err}); using built-in image", path);
            builtin_placeholder()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_placeholder_is_a_png() {
        let image = builtin_placeholder();
        assert_eq!(image.encoding, ImageEncoding::Png);
        assert_eq!((image.width, image.height), (PLACEHOLDER_WIDTH, PLACEHOLDER_HEIGHT));
        assert!(image.data.starts_with(&[0x89, b'P', b'N', b'G']));
    }

    #[test]
    fn builtin_placeholder_decodes_to_gray_stripes() {
        let frame = crate::decode_frame(
            camwatch_types::playback::RequestToken(0),
            &builtin_placeholder().data,
        )
        .expect("decode placeholder");
        assert_eq!(&frame.rgba[..4], &[0x2b, 0x2b, 0x2b, 0xff]);
        let stripe_offset = (12 * 4) as usize;
        assert_eq!(&frame.rgba[stripe_offset..stripe_offset + 4], &[0x45, 0x45, 0x45, 0xff]);
    }

    #[test]
    fn missing_file_falls_back_to_builtin() {
        let path = std::env::temp_dir().join("camwatch-no-such-placeholder.png");
        let image = load_placeholder(Some(&path));
        assert_eq!(image, builtin_placeholder());
    }

    #[test]
    fn loads_placeholder_from_disk() {
        let path = std::env::temp_dir().join("camwatch-placeholder-test.png");
        let buffer = ImageBuffer::from_pixel(5, 5, Rgba([1u8, 2, 3, 255]));
        buffer.save(&path).expect("write placeholder");

        let image = load_placeholder(Some(&path));
        assert_eq!(image.encoding, ImageEncoding::Png);
        assert_eq!((image.width, image.height), (5, 5));
        std::fs::remove_file(&path).expect("cleanup placeholder");
    }
}
