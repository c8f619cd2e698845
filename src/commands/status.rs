use crate::error::Result;
use crate::services::scraper_manager::ScraperManager;

/// `get_scraper_status()` as pretty JSON
pub fn status(manager: &ScraperManager) -> Result<String> {
    Ok(serde_json::to_string_pretty(&manager.get_scraper_status())?)
}
