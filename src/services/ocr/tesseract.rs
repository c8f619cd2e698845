use super::engine::{OcrEngine, OcrText};
use image::DynamicImage;
use tesseract::{PageSegMode, Tesseract};

const NUMERIC_WHITELIST: &str = "0123456789.,$€£kKmMbB";

/// Tesseract OCR engine implementation
pub struct TesseractEngine {
    lang: String,
}

impl TesseractEngine {
    /// Create a new Tesseract engine instance
    pub fn new() -> Result<Self, String> {
        if !Self::is_available() {
            return Err("Tesseract not available on system".to_string());
        }

        Ok(Self {
            lang: "eng".to_string(),
        })
    }

    /// Configure Tesseract for single line recognition (table UI)
    fn configure_single_line(mut tesseract: Tesseract) -> Tesseract {
        tesseract.set_page_seg_mode(PageSegMode::PsmSingleLine);
        tesseract
    }

    /// Set character whitelist for better accuracy
    fn set_whitelist(tesseract: Tesseract, whitelist: &str) -> Result<Tesseract, String> {
        tesseract
            .set_variable("tessedit_char_whitelist", whitelist)
            .map_err(|e| format!("Failed to set whitelist: {}", e))
    }

    /// Instances are created per call: a `Tesseract` handle is not `Sync`
    fn run(&self, image: &DynamicImage, whitelist: Option<&str>) -> Result<OcrText, String> {
        let mut img_bytes: Vec<u8> = Vec::new();
        image
            .write_to(&mut std::io::Cursor::new(&mut img_bytes), image::ImageFormat::Png)
            .map_err(|e| format!("Failed to encode image: {}", e))?;

        let tesseract = Tesseract::new(None, Some(&self.lang))
            .map_err(|e| format!("Failed to create Tesseract instance: {}", e))?;
        let mut tesseract = Self::configure_single_line(tesseract);
        if let Some(whitelist) = whitelist {
            tesseract = Self::set_whitelist(tesseract, whitelist)?;
        }

        let mut tesseract = tesseract
            .set_image_from_mem(&img_bytes)
            .map_err(|e| format!("Failed to set image: {}", e))?;
        let text = tesseract
            .get_text()
            .map_err(|e| format!("Failed to recognize text: {}", e))?;
        let confidence = (tesseract.mean_text_conf() as f32 / 100.0).clamp(0.0, 1.0);

        Ok(OcrText {
            text: text.trim().to_string(),
            confidence,
        })
    }
}

impl OcrEngine for TesseractEngine {
    fn recognize(&self, image: &DynamicImage) -> Result<OcrText, String> {
        self.run(image, None)
    }

    fn recognize_numeric(&self, image: &DynamicImage) -> Result<OcrText, String> {
        self.run(image, Some(NUMERIC_WHITELIST))
    }

    fn name(&self) -> &'static str {
        "tesseract"
    }

    fn is_available() -> bool {
        Tesseract::new(None, Some("eng")).is_ok()
    }
}
