pub mod calibrator;
pub mod capabilities;
pub mod capture_loop;
pub mod config;
pub mod debug_image;
pub mod listeners;
pub mod ocr;
pub mod persistence;
pub mod scraper_manager;
pub mod screen_capture;
pub mod table_builder;
