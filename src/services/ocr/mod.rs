pub mod engine;
pub mod parser;
pub mod preprocessing;
pub mod recognizer;
pub mod template_matcher;
#[cfg(feature = "tesseract")]
pub mod tesseract;

// Re-export main types
pub use engine::{OcrEngine, OcrText};
pub use parser::{parse_amount, parse_name};
pub use recognizer::CardRecognizer;
pub use template_matcher::TemplateMatcher;
#[cfg(feature = "tesseract")]
pub use tesseract::TesseractEngine;
