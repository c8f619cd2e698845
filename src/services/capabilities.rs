use crate::error::{Result, ScraperError};
use crate::services::ocr::{OcrEngine, TemplateMatcher};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// What the host can do, probed once at startup
#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct Capabilities {
    /// Screen or window capture works
    pub capture: bool,
    /// An OCR backend is linked and loads
    pub ocr: bool,
    /// A card template atlas is loaded
    pub templates: bool,
}

impl Capabilities {
    /// Capture and card templates are required. OCR only improves numeric
    /// and name reads.
    pub fn available(&self) -> bool {
        self.capture && self.templates
    }

    /// Missing required pieces, for error messages
    pub fn missing(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if !self.capture {
            missing.push("screen capture");
        }
        if !self.templates {
            missing.push("card templates");
        }
        missing
    }
}

/// Result of the startup probe: flags plus the loaded pieces
#[derive(Clone, Default)]
pub struct Probe {
    pub capabilities: Capabilities,
    pub atlas: Option<Arc<TemplateMatcher>>,
    pub ocr: Option<Arc<dyn OcrEngine>>,
}

impl Probe {
    pub fn run(template_dir: Option<&Path>, ocr_enabled: bool) -> Self {
        let capture = probe_capture();
        let atlas = match template_dir.map(Path::to_path_buf).or_else(default_template_dir) {
            Some(dir) => match load_atlas(&dir) {
                Ok(atlas) => Some(Arc::new(atlas)),
                Err(e) => {
                    warn!(dir = %dir.display(), error = %e, "card templates unavailable");
                    None
                }
            },
            None => None,
        };
        let ocr = if ocr_enabled { default_ocr_engine() } else { None };

        let capabilities = Capabilities {
            capture,
            ocr: ocr.is_some(),
            templates: atlas.is_some(),
        };
        info!(
            capture = capabilities.capture,
            ocr = capabilities.ocr,
            templates = capabilities.templates,
            "capabilities probed"
        );

        Self {
            capabilities,
            atlas,
            ocr,
        }
    }
}

/// `<data dir>/table-scraper/templates`
pub fn default_template_dir() -> Option<PathBuf> {
    dirs::data_dir().map(|dir| dir.join("table-scraper").join("templates"))
}

/// Load the rank/suit/digit atlas, failing when no card templates are found
pub fn load_atlas(dir: &Path) -> Result<TemplateMatcher> {
    let mut atlas = TemplateMatcher::new();
    atlas.load_templates(dir).map_err(ScraperError::Templates)?;
    if !atlas.has_card_templates() {
        return Err(ScraperError::Templates(format!(
            "incomplete rank/suit templates in {}",
            dir.display()
        )));
    }
    debug!(dir = %dir.display(), templates = atlas.template_count(), "template atlas loaded");
    Ok(atlas)
}

/// True when at least one monitor can be enumerated
pub fn probe_capture() -> bool {
    match xcap::Monitor::all() {
        Ok(monitors) => !monitors.is_empty(),
        Err(e) => {
            debug!(error = %e, "screen capture unavailable");
            false
        }
    }
}

#[cfg(feature = "tesseract")]
pub fn default_ocr_engine() -> Option<Arc<dyn OcrEngine>> {
    use crate::services::ocr::TesseractEngine;

    match TesseractEngine::new() {
        Ok(engine) => Some(Arc::new(engine)),
        Err(e) => {
            debug!(error = %e, "tesseract unavailable");
            None
        }
    }
}

#[cfg(not(feature = "tesseract"))]
pub fn default_ocr_engine() -> Option<Arc<dyn OcrEngine>> {
    None
}
