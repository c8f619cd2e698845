use crate::models::roi::Roi;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Longest accepted capture interval, in seconds
pub const MAX_INTERVAL_SECS: f64 = 3600.0;

const DEFAULT_INTERVAL: Duration = Duration::from_secs(1);

/// Capture scheduling configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CaptureConfig {
    /// Seconds between capture cycles
    pub interval_secs: f64,
    /// A cycle running longer than `interval * hang_multiplier` is abandoned
    pub hang_multiplier: u32,
    /// Monitor to capture when no window matches the site profile
    pub monitor_index: Option<usize>,
    /// Part of the captured window or monitor showing the table
    pub region: Option<Roi>,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            interval_secs: 1.0,
            hang_multiplier: 3,
            monitor_index: None,
            region: None,
        }
    }
}

impl CaptureConfig {
    /// Configured interval; the default one when the value is out of range
    pub fn interval(&self) -> Duration {
        interval_from_secs(self.interval_secs).unwrap_or(DEFAULT_INTERVAL)
    }

    /// How long a cycle at `interval` may run before it is abandoned
    pub fn hang_budget(&self, interval: Duration) -> Duration {
        interval.saturating_mul(self.hang_multiplier.max(1))
    }
}

/// Capture interval from seconds, within `(0, MAX_INTERVAL_SECS]`
pub fn interval_from_secs(secs: f64) -> Result<Duration, String> {
    if !(secs.is_finite() && secs > 0.0 && secs <= MAX_INTERVAL_SECS) {
        return Err(format!(
            "Capture interval must be within (0, {}] seconds, got {}",
            MAX_INTERVAL_SECS, secs
        ));
    }
    Duration::try_from_secs_f64(secs)
        .ok()
        .filter(|d| !d.is_zero())
        .ok_or_else(|| format!("Capture interval {} seconds is too short", secs))
}

/// Recognition thresholds.
///
/// These values were tuned by hand against a small set of captured tables.
/// Re-check them against real captures before changing defaults.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RecognitionConfig {
    pub ocr_enabled: bool,
    pub card_confidence: f32,
    pub numeric_confidence: f32,
    /// Top-2 template scores closer than this are ambiguous
    pub tie_margin: f32,
    /// Directory holding `ranks/`, `suits/` and `digits/` glyph templates
    pub template_dir: Option<PathBuf>,
}

impl Default for RecognitionConfig {
    fn default() -> Self {
        Self {
            ocr_enabled: true,
            card_confidence: 0.70,
            numeric_confidence: 0.60,
            tie_margin: 0.05,
            template_dir: None,
        }
    }
}

/// Table detection thresholds
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DetectionConfig {
    pub table_confidence: f32,
    pub calibration_confidence: f32,
    /// Felt ratio at which the felt heuristic saturates
    pub felt_ratio_target: f32,
    /// Card-shaped blobs at which the card heuristic saturates
    pub min_card_shapes: usize,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            table_confidence: 0.5,
            calibration_confidence: 0.6,
            felt_ratio_target: 0.35,
            min_card_shapes: 2,
        }
    }
}

/// Hand store configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PersistenceConfig {
    pub enabled: bool,
    pub retries: u32,
    pub backoff_ms: u64,
    pub queue_capacity: usize,
    /// JSON-lines file; defaults to the platform data directory
    pub path: Option<PathBuf>,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            retries: 3,
            backoff_ms: 250,
            queue_capacity: 64,
            path: None,
        }
    }
}

/// Complete scraper configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ScraperConfig {
    /// Key into the known site profiles
    pub site: String,
    pub capture: CaptureConfig,
    pub recognition: RecognitionConfig,
    pub detection: DetectionConfig,
    pub persistence: PersistenceConfig,
    pub debug_image_dir: Option<PathBuf>,
    /// Extra `*.json` site profiles
    pub profiles_dir: Option<PathBuf>,
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            site: "generic".to_string(),
            capture: CaptureConfig::default(),
            recognition: RecognitionConfig::default(),
            detection: DetectionConfig::default(),
            persistence: PersistenceConfig::default(),
            debug_image_dir: None,
            profiles_dir: None,
        }
    }
}

impl ScraperConfig {
    pub fn validate(&self) -> Result<(), String> {
        interval_from_secs(self.capture.interval_secs)?;
        if let Some(region) = &self.capture.region {
            if region.width == 0 || region.height == 0 {
                return Err("Capture region must have a non-zero size".to_string());
            }
        }
        if self.site.trim().is_empty() {
            return Err("Site name is empty".to_string());
        }

        let unit = [
            ("card_confidence", self.recognition.card_confidence),
            ("numeric_confidence", self.recognition.numeric_confidence),
            ("tie_margin", self.recognition.tie_margin),
            ("table_confidence", self.detection.table_confidence),
            ("calibration_confidence", self.detection.calibration_confidence),
            ("felt_ratio_target", self.detection.felt_ratio_target),
        ];
        for (name, value) in unit {
            if !(0.0..=1.0).contains(&value) {
                return Err(format!("{} must be within [0, 1], got {}", name, value));
            }
        }
        if self.detection.felt_ratio_target == 0.0 {
            return Err("felt_ratio_target must be > 0".to_string());
        }
        if self.persistence.queue_capacity == 0 {
            return Err("Persistence queue capacity must be > 0".to_string());
        }

        Ok(())
    }
}
