use serde::{Deserialize, Serialize};

/// How a value was read
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RecognitionMethod {
    TemplateMatch,
    Ocr,
}

/// A recognized value with its confidence in [0, 1].
///
/// `value` is `None` whenever confidence fell below the configured threshold,
/// so a low-confidence guess never reaches a `TableState`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RecognitionResult<T> {
    pub value: Option<T>,
    pub confidence: f32,
    pub method: RecognitionMethod,
}

impl<T> RecognitionResult<T> {
    pub fn known(value: T, confidence: f32, method: RecognitionMethod) -> Self {
        Self {
            value: Some(value),
            confidence: confidence.clamp(0.0, 1.0),
            method,
        }
    }

    pub fn unknown(confidence: f32, method: RecognitionMethod) -> Self {
        Self {
            value: None,
            confidence: confidence.clamp(0.0, 1.0),
            method,
        }
    }

    /// Keep the value only when `confidence >= threshold`
    pub fn thresholded(value: T, confidence: f32, threshold: f32, method: RecognitionMethod) -> Self {
        if confidence >= threshold {
            Self::known(value, confidence, method)
        } else {
            Self::unknown(confidence, method)
        }
    }

    pub fn is_known(&self) -> bool {
        self.value.is_some()
    }
}
