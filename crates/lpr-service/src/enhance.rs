//! Image variants fed to the OCR passes

use image::DynamicImage;
use imageproc::contrast::equalize_histogram;
use std::borrow::Cow;

const ENHANCE_CONTRAST: f32 = 30.0;
const SHARPEN_SIGMA: f32 = 1.5;
const SHARPEN_THRESHOLD: i32 = 2;
const HIGH_CONTRAST: f32 = 40.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageVariant {
    /// The captured frame as-is
    Original,
    /// Contrast boost followed by an unsharp mask
    Enhanced,
    /// Desaturated, histogram equalized and contrast boosted
    HighContrast,
}

impl ImageVariant {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImageVariant::Original => "original",
            ImageVariant::Enhanced => "enhanced",
            ImageVariant::HighContrast => "high_contrast",
        }
    }

    pub fn apply<'a>(&self, image: &'a DynamicImage) -> Cow<'a, DynamicImage> {
        match self {
            ImageVariant::Original => Cow::Borrowed(image),
            ImageVariant::Enhanced => Cow::Owned(enhance(image)),
            ImageVariant::HighContrast => Cow::Owned(high_contrast(image)),
        }
    }
}

pub fn enhance(image: &DynamicImage) -> DynamicImage {
    image
        .adjust_contrast(ENHANCE_CONTRAST)
        .unsharpen(SHARPEN_SIGMA, SHARPEN_THRESHOLD)
}

pub fn high_contrast(image: &DynamicImage) -> DynamicImage {
    let equalized = equalize_histogram(&image.to_luma8());
    DynamicImage::ImageLuma8(equalized).adjust_contrast(HIGH_CONTRAST)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma, Rgb, RgbImage};

    fn gradient() -> DynamicImage {
        let img = RgbImage::from_fn(32, 16, |x, _| {
            let v = 100 + (x as u8);
            Rgb([v, v / 2, 255 - v])
        });
        DynamicImage::ImageRgb8(img)
    }

    #[test]
    fn test_original_is_borrowed() {
        let img = gradient();
        assert!(matches!(ImageVariant::Original.apply(&img), Cow::Borrowed(_)));
    }

    #[test]
    fn test_variants_keep_dimensions() {
        let img = gradient();
        for variant in [ImageVariant::Enhanced, ImageVariant::HighContrast] {
            let out = variant.apply(&img);
            assert_eq!((out.width(), out.height()), (32, 16));
        }
    }

    #[test]
    fn test_high_contrast_is_grayscale_and_spread() {
        let img = DynamicImage::ImageLuma8(GrayImage::from_fn(16, 1, |x, _| {
            Luma([120 + x as u8])
        }));
        let out = high_contrast(&img).to_luma8();
        let min = out.pixels().map(|p| p[0]).min().unwrap_or(0);
        let max = out.pixels().map(|p| p[0]).max().unwrap_or(0);
        // Sixteen adjacent gray levels get stretched well apart.
        assert!(max - min > 100);
        assert!(matches!(high_contrast(&gradient()), DynamicImage::ImageLuma8(_)));
    }
}
