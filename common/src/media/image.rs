use std::io::Cursor;
use std::path::PathBuf;

use image::{DynamicImage, ImageDecoder, ImageFormat, ImageReader};
use tracing::debug;

// image previews are small enough to produce inline, per request, without
// going through the video cache machinery
//
// decoding is synchronous, so callers are expected to run this under
// spawn_blocking
pub fn create_image_thumbnail(
    original_path: PathBuf,
    width: u32,
    height: u32,
) -> anyhow::Result<Vec<u8>> {
    debug!("started creating image thumbnail");

    let mut decoder = ImageReader::open(original_path)?.into_decoder()?;

    // this both solves the crate version collision and corrects the orientation, too
    let orientation = decoder.orientation()?;

    debug!({orientation = ?orientation}, "orientation for image");

    let image = DynamicImage::from_decoder(decoder)?;

    // create the thumbnail with bounds, not exact sizing
    let mut thumbnail = image.thumbnail(width, height);

    thumbnail.apply_orientation(orientation);

    // jpeg output cannot carry an alpha channel
    let thumbnail = DynamicImage::ImageRgb8(thumbnail.to_rgb8());

    let mut buffer = Cursor::new(Vec::new());

    thumbnail.write_to(&mut buffer, ImageFormat::Jpeg)?;

    debug!("finished creating image thumbnail");

    Ok(buffer.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbaImage;

    #[test]
    fn thumbnail_is_jpeg_within_bounds() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("photo.png");

        RgbaImage::from_fn(640, 480, |x, _| image::Rgba([(x % 256) as u8, 64, 128, 255]))
            .save_with_format(&src, ImageFormat::Png)
            .unwrap();

        let bytes = create_image_thumbnail(src, 200, 150).unwrap();

        // jpeg magic
        assert_eq!(&bytes[0..2], &[0xff, 0xd8]);

        let thumb = image::load_from_memory(&bytes).unwrap();
        assert!(thumb.width() <= 200);
        assert!(thumb.height() <= 150);
    }

    #[test]
    fn missing_source_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("absent.png");

        assert!(create_image_thumbnail(missing, 200, 150).is_err());
    }
}
