//! Default image analyzer backed by the `image` crate.

use super::ImageAnalyzer;
use image::{GrayImage, ImageReader};
use std::io::Cursor;

/// Reads dimensions from the image header and computes sharpness as the
/// variance of the 4-neighbour Laplacian over the grayscale image.
#[derive(Debug, Clone, Copy, Default)]
pub struct StdImageAnalyzer;

impl ImageAnalyzer for StdImageAnalyzer {
    fn dimensions(&self, payload: &[u8]) -> Option<(u32, u32)> {
        ImageReader::new(Cursor::new(payload))
            .with_guessed_format()
            .ok()?
            .into_dimensions()
            .ok()
    }

    fn sharpness(&self, payload: &[u8]) -> Option<f64> {
        let gray = image::load_from_memory(payload).ok()?.to_luma8();
        Some(laplacian_variance(&gray))
    }
}

/// Population variance of the Laplacian response over interior pixels.
///
/// Images smaller than 3x3 have no interior and score 0.
pub fn laplacian_variance(gray: &GrayImage) -> f64 {
    let (width, height) = (gray.width() as usize, gray.height() as usize);
    if width < 3 || height < 3 {
        return 0.0;
    }

    let pixels = gray.as_raw();
    let at = |x: usize, y: usize| f64::from(pixels[y * width + x]);

    let mut sum = 0.0;
    let mut sum_sq = 0.0;
    let mut n = 0.0;
    for y in 1..height - 1 {
        for x in 1..width - 1 {
            let response =
                at(x, y - 1) + at(x, y + 1) + at(x - 1, y) + at(x + 1, y) - 4.0 * at(x, y);
            sum += response;
            sum_sq += response * response;
            n += 1.0;
        }
    }

    let mean = sum / n;
    (sum_sq / n - mean * mean).max(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, ImageFormat, Luma};

    fn encode_png(img: GrayImage) -> Vec<u8> {
        let mut buf = Vec::new();
        DynamicImage::ImageLuma8(img)
            .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
            .unwrap();
        buf
    }

    #[test]
    fn test_dimensions_from_png() {
        let png = encode_png(GrayImage::new(4, 3));
        assert_eq!(StdImageAnalyzer.dimensions(&png), Some((4, 3)));
    }

    #[test]
    fn test_garbage_is_not_an_image() {
        assert_eq!(StdImageAnalyzer.dimensions(b"definitely not an image"), None);
        assert_eq!(StdImageAnalyzer.sharpness(b""), None);
    }

    #[test]
    fn test_flat_image_has_zero_sharpness() {
        let flat = GrayImage::from_pixel(8, 8, Luma([128]));
        assert_eq!(laplacian_variance(&flat), 0.0);

        let png = encode_png(flat);
        assert_eq!(StdImageAnalyzer.sharpness(&png), Some(0.0));
    }

    #[test]
    fn test_checkerboard_is_sharper_than_gradient() {
        let checker = GrayImage::from_fn(8, 8, |x, y| {
            if (x + y) % 2 == 0 {
                Luma([0])
            } else {
                Luma([255])
            }
        });
        let gradient = GrayImage::from_fn(8, 8, |x, _| Luma([(x * 10) as u8]));

        assert!(laplacian_variance(&checker) > 1000.0);
        assert!(laplacian_variance(&checker) > laplacian_variance(&gradient));
    }

    #[test]
    fn test_tiny_image() {
        assert_eq!(laplacian_variance(&GrayImage::new(2, 2)), 0.0);
    }
}
