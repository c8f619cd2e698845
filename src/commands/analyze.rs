use crate::error::Result;
use crate::services::scraper_manager::ScraperManager;
use serde::Serialize;
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::info;

/// What `analyze` prints
#[derive(Debug, Clone, Serialize)]
pub struct AnalyzeReport {
    /// A table was found in the frame
    pub detected: bool,
    pub pot: Option<f64>,
    pub stage: Option<String>,
    pub occupied_seats: usize,
    pub active_players: usize,
    pub state: Option<Value>,
    pub debug_image: Option<PathBuf>,
}

/// Grab one frame from the manager's source (screen, or the image file it
/// was built with) and read the table from it. Optionally writes the frame
/// annotated with the regions used.
pub fn analyze(manager: &ScraperManager, debug_image: Option<&Path>) -> Result<AnalyzeReport> {
    let frame = manager.capture_frame()?;
    let state = manager.analyze_frame(&frame);

    if let Some(path) = debug_image {
        manager.save_debug_image(&frame, state.as_ref(), path)?;
    }

    let report = match &state {
        Some(state) => AnalyzeReport {
            detected: true,
            pot: state.pot(),
            stage: state.stage().map(|s| s.to_string()),
            occupied_seats: state.occupied_seats(),
            active_players: state.active_players(),
            state: Some(state.to_plain()),
            debug_image: debug_image.map(Path::to_path_buf),
        },
        None => AnalyzeReport {
            detected: false,
            pot: None,
            stage: None,
            occupied_seats: 0,
            active_players: 0,
            state: None,
            debug_image: debug_image.map(Path::to_path_buf),
        },
    };

    info!(
        detected = report.detected,
        pot = ?report.pot,
        stage = ?report.stage,
        seats = report.occupied_seats,
        "frame analyzed"
    );
    Ok(report)
}
