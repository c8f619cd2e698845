//! Screen-scraping reader for online poker tables.
//!
//! Frames come from the screen (or a file), are matched against a site
//! profile's layout, and every region is read into an immutable
//! [`TableState`]. [`ScraperManager`] drives one-shot reads and a background
//! capture loop that fans states out to listeners and records hands.

pub mod commands;
pub mod error;
pub mod models;
pub mod services;

#[cfg(test)]
mod testing;

pub use error::{Result, ScraperError};
pub use models::card::{Card, Rank, Suit};
pub use models::config::ScraperConfig;
pub use models::site_profile::{RegionRole, SiteProfile};
pub use models::table_state::{PlayerSeatState, Street, TableState};
pub use services::capabilities::Capabilities;
pub use services::config::ConfigManager;
pub use services::listeners::{ListenerId, StateCallback};
pub use services::persistence::{HandStore, JsonlHandStore};
pub use services::scraper_manager::{ScraperManager, ScraperStatus};
pub use services::screen_capture::{FileFrameSource, FrameSource, ScreenCapture};
