use image::DynamicImage;

/// Text read by an OCR engine with its mean confidence in [0, 1]
#[derive(Debug, Clone, PartialEq)]
pub struct OcrText {
    pub text: String,
    pub confidence: f32,
}

/// OCR Engine trait - abstraction for different OCR implementations
pub trait OcrEngine: Send + Sync {
    /// Recognize a single line of free text (player names)
    fn recognize(&self, image: &DynamicImage) -> Result<OcrText, String>;

    /// Recognize a single line expected to hold a number (pot, stack, bet)
    fn recognize_numeric(&self, image: &DynamicImage) -> Result<OcrText, String> {
        self.recognize(image)
    }

    /// Short backend name for logs and status output
    fn name(&self) -> &'static str;

    /// Check if the OCR engine is available
    fn is_available() -> bool
    where
        Self: Sized;
}
