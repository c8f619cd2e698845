use image::{DynamicImage, GenericImageView, GrayImage, ImageBuffer, Luma};

/// Luma above which a pixel counts as card-face white
pub const WHITE_LUMA: u8 = 200;

#[derive(Debug, Clone, PartialEq)]
pub struct PreprocessingConfig {
    /// Upscale factor applied before OCR
    pub scale_factor: f64,
}

impl Default for PreprocessingConfig {
    fn default() -> Self {
        Self { scale_factor: 2.0 }
    }
}

/// Image preprocessing shared by the glyph matcher and the OCR backend
pub struct PreprocessingService {
    config: PreprocessingConfig,
}

impl Default for PreprocessingService {
    fn default() -> Self {
        Self::new(PreprocessingConfig::default())
    }
}

impl PreprocessingService {
    pub fn new(config: PreprocessingConfig) -> Self {
        Self { config }
    }

    /// OCR pipeline: grayscale → scale → Otsu threshold
    pub fn preprocess(&self, image: &DynamicImage) -> Result<DynamicImage, String> {
        if image.width() == 0 || image.height() == 0 {
            return Err("Cannot preprocess an empty image".to_string());
        }

        let gray = self.to_grayscale(image);
        let scaled = self.scale(&gray, self.config.scale_factor);
        Ok(self.threshold(&scaled))
    }

    pub fn to_grayscale(&self, image: &DynamicImage) -> DynamicImage {
        DynamicImage::ImageLuma8(image.to_luma8())
    }

    pub fn scale(&self, image: &DynamicImage, factor: f64) -> DynamicImage {
        let (width, height) = image.dimensions();
        let new_width = ((width as f64 * factor) as u32).max(1);
        let new_height = ((height as f64 * factor) as u32).max(1);

        image.resize_exact(new_width, new_height, image::imageops::FilterType::Lanczos3)
    }

    /// Binary thresholding (Otsu's method)
    pub fn threshold(&self, image: &DynamicImage) -> DynamicImage {
        use imageproc::contrast::otsu_level;

        let gray_img = image.to_luma8();
        let threshold_value = otsu_level(&gray_img);

        let binary = ImageBuffer::from_fn(gray_img.width(), gray_img.height(), |x, y| {
            if gray_img.get_pixel(x, y)[0] > threshold_value {
                Luma([255u8])
            } else {
                Luma([0u8])
            }
        });

        DynamicImage::ImageLuma8(binary)
    }

    /// Invert image colors (light text on dark plates becomes dark on light)
    pub fn invert(&self, image: &DynamicImage) -> DynamicImage {
        let mut img = image.clone();
        img.invert();
        img
    }

    /// Mask of light, low-saturation pixels: chip counts and names are
    /// drawn as white text on dark plates.
    pub fn extract_light_text(&self, image: &DynamicImage) -> GrayImage {
        let rgb_img = image.to_rgb8();
        let (width, height) = rgb_img.dimensions();

        ImageBuffer::from_fn(width, height, |x, y| {
            let pixel = rgb_img.get_pixel(x, y);
            let (_, s, v) = rgb_to_hsv(pixel[0], pixel[1], pixel[2]);
            if s <= 100 && v >= 150 {
                Luma([255u8])
            } else {
                Luma([0u8])
            }
        })
    }

    /// True when any pixel of the region looks like text
    pub fn has_ink(&self, image: &DynamicImage) -> bool {
        self.extract_light_text(image).pixels().any(|p| p[0] > 0)
    }

    /// Fraction of pixels brighter than [`WHITE_LUMA`]
    pub fn white_ratio(&self, image: &DynamicImage) -> f32 {
        let gray = image.to_luma8();
        let total = gray.width() as usize * gray.height() as usize;
        if total == 0 {
            return 0.0;
        }
        let white = gray.pixels().filter(|p| p[0] > WHITE_LUMA).count();
        white as f32 / total as f32
    }
}

/// RGB to OpenCV-style HSV (H: 0-179, S/V: 0-255)
pub fn rgb_to_hsv(r: u8, g: u8, b: u8) -> (u8, u8, u8) {
    let r = r as f32 / 255.0;
    let g = g as f32 / 255.0;
    let b = b as f32 / 255.0;

    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let delta = max - min;

    let h = if delta == 0.0 {
        0.0
    } else if max == r {
        60.0 * (((g - b) / delta) % 6.0)
    } else if max == g {
        60.0 * (((b - r) / delta) + 2.0)
    } else {
        60.0 * (((r - g) / delta) + 4.0)
    };
    let h = if h < 0.0 { h + 360.0 } else { h };

    let s = if max == 0.0 { 0.0 } else { delta / max };

    ((h / 2.0) as u8, (s * 255.0) as u8, (max * 255.0) as u8)
}
