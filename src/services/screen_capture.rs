use crate::error::{Result, ScraperError};
use crate::models::roi::Roi;
use image::DynamicImage;
use regex::Regex;
use std::path::PathBuf;
use tracing::debug;
use xcap::{Monitor, Window};

/// Anything that can produce a table frame
pub trait FrameSource: Send + Sync {
    /// Grab the current contents of the table window or display.
    /// Failures are reported, never retried here.
    fn capture_table(&self) -> Result<DynamicImage>;

    /// Human readable description for logs and status output
    fn describe(&self) -> String;
}

/// Thread-safe wrapper for xcap::Monitor
///
/// SAFETY: Monitor is a handle to OS display resources and is only used
/// for read-only capture calls.
#[derive(Clone)]
struct SendSyncMonitor(Monitor);

// SAFETY: Monitor handles are thread-safe at the OS level.
unsafe impl Send for SendSyncMonitor {}

// SAFETY: Monitor operations through xcap are internally synchronized.
unsafe impl Sync for SendSyncMonitor {}

/// Screen capture service using xcap
pub struct ScreenCapture {
    monitor: SendSyncMonitor,
    window_title: Option<Regex>,
    region: Option<Roi>,
}

impl ScreenCapture {
    /// Capture the primary monitor
    pub fn new() -> Result<Self> {
        let monitor = Monitor::all()
            .map_err(|e| ScraperError::Capture(format!("Failed to get monitors: {}", e)))?
            .into_iter()
            .find(|m| m.is_primary().unwrap_or(false))
            .ok_or_else(|| ScraperError::Capture("No primary monitor found".to_string()))?;

        Ok(Self::from_monitor(monitor))
    }

    /// Capture a specific monitor by index
    pub fn with_monitor(monitor_index: usize) -> Result<Self> {
        let monitors = Monitor::all()
            .map_err(|e| ScraperError::Capture(format!("Failed to get monitors: {}", e)))?;

        let monitor = monitors
            .get(monitor_index)
            .cloned()
            .ok_or_else(|| ScraperError::Capture(format!("Monitor index {} not found", monitor_index)))?;

        Ok(Self::from_monitor(monitor))
    }

    fn from_monitor(monitor: Monitor) -> Self {
        // xcap returns physical pixels
        debug!(
            scale_factor = monitor.scale_factor().unwrap_or(1.0),
            width = monitor.width().unwrap_or(0),
            height = monitor.height().unwrap_or(0),
            "screen capture initialized"
        );

        Self {
            monitor: SendSyncMonitor(monitor),
            window_title: None,
            region: None,
        }
    }

    /// Prefer a visible window whose title matches `pattern`, falling back
    /// to the monitor when none is open
    pub fn with_window_title(mut self, pattern: &str) -> Result<Self> {
        let re = Regex::new(pattern)
            .map_err(|e| ScraperError::InvalidProfile(format!("bad window title pattern: {}", e)))?;
        self.window_title = Some(re);
        Ok(self)
    }

    /// Keep only `region` of every captured window or monitor frame
    pub fn with_region(mut self, region: Roi) -> Self {
        self.region = Some(region);
        self
    }

    /// Capture entire monitor
    pub fn capture_full(&self) -> Result<DynamicImage> {
        let rgba_image = self
            .monitor
            .0
            .capture_image()
            .map_err(|e| ScraperError::Capture(format!("Failed to capture screen: {}", e)))?;

        non_empty(DynamicImage::ImageRgba8(rgba_image))
    }

    /// Capture the first visible window whose title matches
    fn capture_window(&self, re: &Regex) -> Result<Option<DynamicImage>> {
        let windows = Window::all()
            .map_err(|e| ScraperError::Capture(format!("Failed to list windows: {}", e)))?;

        for window in windows {
            let title = window.title().unwrap_or_default();
            if !re.is_match(&title) || window.is_minimized().unwrap_or(true) {
                continue;
            }

            let rgba_image = window
                .capture_image()
                .map_err(|e| ScraperError::Capture(format!("Failed to capture window '{}': {}", title, e)))?;
            debug!(%title, "captured table window");
            return non_empty(DynamicImage::ImageRgba8(rgba_image)).map(Some);
        }

        Ok(None)
    }
}

impl FrameSource for ScreenCapture {
    fn capture_table(&self) -> Result<DynamicImage> {
        let mut frame = None;
        if let Some(re) = &self.window_title {
            frame = self.capture_window(re)?;
            if frame.is_none() {
                debug!(pattern = re.as_str(), "no matching window, capturing monitor");
            }
        }
        let frame = match frame {
            Some(frame) => frame,
            None => self.capture_full()?,
        };

        match self.region {
            Some(region) => crop_region(&frame, region),
            None => Ok(frame),
        }
    }

    fn describe(&self) -> String {
        let target = match &self.window_title {
            Some(re) => format!("window /{}/ or monitor", re.as_str()),
            None => "monitor".to_string(),
        };
        match self.region {
            Some(r) => format!("{} region {}x{}+{}+{}", target, r.width, r.height, r.x, r.y),
            None => target,
        }
    }
}

/// Frames read from an image file, for offline analysis
pub struct FileFrameSource {
    path: PathBuf,
}

impl FileFrameSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl FrameSource for FileFrameSource {
    fn capture_table(&self) -> Result<DynamicImage> {
        let image = image::open(&self.path)
            .map_err(|e| ScraperError::Capture(format!("Failed to read {:?}: {}", self.path, e)))?;
        non_empty(image)
    }

    fn describe(&self) -> String {
        format!("file {}", self.path.display())
    }
}

/// Cut `region` out of a captured frame, clipped to the frame
fn crop_region(frame: &DynamicImage, region: Roi) -> Result<DynamicImage> {
    let (x, y, width, height) = region.clamp_to(frame.width(), frame.height()).ok_or_else(|| {
        ScraperError::Capture(format!(
            "Capture region {}x{}+{}+{} lies outside the {}x{} frame",
            region.width,
            region.height,
            region.x,
            region.y,
            frame.width(),
            frame.height()
        ))
    })?;
    Ok(frame.crop_imm(x, y, width, height))
}

fn non_empty(image: DynamicImage) -> Result<DynamicImage> {
    if image.width() == 0 || image.height() == 0 {
        return Err(ScraperError::Capture(
            "Captured empty frame - possible permission issue or no display".to_string(),
        ));
    }
    Ok(image)
}
