use crate::error::{Result, ScraperError};
use crate::models::config::ScraperConfig;
use crate::models::site_profile::SiteProfile;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const APP_DIR: &str = "table-scraper";

/// Configuration manager for scraper settings
pub struct ConfigManager {
    config_dir: PathBuf,
    config_path: PathBuf,
}

impl ConfigManager {
    /// Manager for the platform config file
    /// (`<config dir>/table-scraper/config.json`).
    ///
    /// This will create the config directory if it doesn't exist.
    pub fn new() -> Result<Self> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| ScraperError::Config("Failed to determine config directory".to_string()))?
            .join(APP_DIR);

        fs::create_dir_all(&config_dir)?;

        let config_path = config_dir.join("config.json");

        Ok(Self {
            config_dir,
            config_path,
        })
    }

    /// Manager for an explicit config file
    pub fn at(config_path: impl Into<PathBuf>) -> Self {
        let config_path = config_path.into();
        let config_dir = config_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));

        Self {
            config_dir,
            config_path,
        }
    }

    /// Save configuration to disk
    pub fn save(&self, config: &ScraperConfig) -> Result<()> {
        config.validate().map_err(ScraperError::Config)?;

        fs::create_dir_all(&self.config_dir)?;
        let json = serde_json::to_string_pretty(config)?;
        fs::write(&self.config_path, json)?;

        debug!(path = %self.config_path.display(), "config saved");
        Ok(())
    }

    /// Load configuration from disk
    ///
    /// If config file doesn't exist, returns default configuration
    pub fn load(&self) -> Result<ScraperConfig> {
        if !self.config_exists() {
            return Ok(ScraperConfig::default());
        }

        let content = fs::read_to_string(&self.config_path)?;
        let config: ScraperConfig = serde_json::from_str(&content)
            .map_err(|e| ScraperError::Config(format!("Failed to parse {:?}: {}", self.config_path, e)))?;
        config.validate().map_err(ScraperError::Config)?;

        Ok(config)
    }

    pub fn config_file_path(&self) -> &PathBuf {
        &self.config_path
    }

    pub fn config_exists(&self) -> bool {
        self.config_path.exists()
    }
}

/// Default location of the hand store (`<data dir>/table-scraper/hands.jsonl`)
pub fn default_hand_store_path() -> Result<PathBuf> {
    let dir = dirs::data_dir()
        .ok_or_else(|| ScraperError::Config("Failed to determine data directory".to_string()))?
        .join(APP_DIR);
    Ok(dir.join("hands.jsonl"))
}

/// Profiles from `*.json` files in `dir`. Files that fail to load are
/// skipped with a warning.
pub fn load_profiles_dir(dir: &Path) -> Result<Vec<SiteProfile>> {
    let mut profiles = Vec::new();
    if !dir.exists() {
        return Ok(profiles);
    }

    let mut paths: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.extension().and_then(|s| s.to_str()) == Some("json"))
        .collect();
    paths.sort();

    for path in paths {
        match SiteProfile::load_json(&path) {
            Ok(profile) => profiles.push(profile),
            Err(e) => warn!(path = %path.display(), error = %e, "skipping site profile"),
        }
    }
    Ok(profiles)
}

/// Look up a site profile by name. Profiles in `profiles_dir` override
/// built-ins of the same name.
pub fn resolve_site_profile(name: &str, profiles_dir: Option<&Path>) -> Result<SiteProfile> {
    if let Some(dir) = profiles_dir {
        if let Some(profile) = load_profiles_dir(dir)?.into_iter().find(|p| p.name == name) {
            return Ok(profile);
        }
    }

    SiteProfile::builtin(name).ok_or_else(|| ScraperError::UnknownSite(name.to_string()))
}

/// Names of every known site profile, sorted
pub fn available_sites(profiles_dir: Option<&Path>) -> Result<Vec<String>> {
    let mut names: Vec<String> = SiteProfile::builtin_names().iter().map(|n| n.to_string()).collect();
    if let Some(dir) = profiles_dir {
        names.extend(load_profiles_dir(dir)?.into_iter().map(|p| p.name));
    }
    names.sort();
    names.dedup();
    Ok(names)
}
