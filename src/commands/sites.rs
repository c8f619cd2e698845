use crate::error::Result;
use crate::services::config::{available_sites, resolve_site_profile};
use serde::Serialize;
use std::path::Path;

/// One line of `sites` output
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SiteSummary {
    pub name: String,
    pub seats: usize,
    pub reference_width: u32,
    pub reference_height: u32,
    pub hero_seat: Option<u8>,
    pub window_title: Option<String>,
}

/// Every known profile, built-in or from `profiles_dir`, sorted by name
pub fn sites(profiles_dir: Option<&Path>) -> Result<Vec<SiteSummary>> {
    available_sites(profiles_dir)?
        .into_iter()
        .map(|name| {
            let profile = resolve_site_profile(&name, profiles_dir)?;
            Ok(SiteSummary {
                name,
                seats: profile.seats().len(),
                reference_width: profile.reference_width,
                reference_height: profile.reference_height,
                hero_seat: profile.hero_seat,
                window_title: profile.window_title,
            })
        })
        .collect()
}
