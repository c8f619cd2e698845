use thiserror::Error;

/// Errors surfaced by the scraping pipeline.
///
/// Only conditions a caller can act on live here. Per-field recognition
/// failures are carried as unknown values inside `TableState` instead.
#[derive(Debug, Error)]
pub enum ScraperError {
    #[error("capture failed: {0}")]
    Capture(String),

    #[error("missing dependency: {0}")]
    DependencyMissing(String),

    #[error("unknown site profile: {0}")]
    UnknownSite(String),

    #[error("invalid site profile: {0}")]
    InvalidProfile(String),

    #[error("template atlas: {0}")]
    Templates(String),

    #[error("ocr failed: {0}")]
    Ocr(String),

    #[error("persistence failed: {0}")]
    Persistence(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Image(#[from] image::ImageError),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ScraperError>;
