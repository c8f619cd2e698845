use crate::error::{Result, ScraperError};
use crate::models::config::ScraperConfig;
use crate::models::table_state::TableState;
use crate::services::capabilities::{Capabilities, Probe};
use crate::services::capture_loop::{CaptureLoop, LoopContext, LoopTiming, TablePipeline};
use crate::services::config::{default_hand_store_path, resolve_site_profile};
use crate::services::debug_image::{debug_image_path, save_annotated};
use crate::services::listeners::{ListenerId, ListenerRegistry, StateCallback};
use crate::services::ocr::CardRecognizer;
use crate::services::persistence::{HandStore, JsonlHandStore, PersistenceQueue};
use crate::services::screen_capture::{FrameSource, ScreenCapture};
use image::DynamicImage;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Answer of [`ScraperManager::get_scraper_status`]
#[derive(Debug, Clone, Serialize)]
pub struct ScraperStatus {
    pub initialized: bool,
    pub running: bool,
    pub available: bool,
    pub site: Option<String>,
    /// Where frames come from, once initialized
    pub source: Option<String>,
    pub capabilities: Capabilities,
    /// Plain mapping of the most recent published state
    pub last_state: Option<Value>,
}

struct Session {
    site: String,
    pipeline: Arc<TablePipeline>,
    source: Arc<dyn FrameSource>,
}

/// Façade tying capture, recognition, the loop, listeners and persistence
/// together. Construct one per application; nothing here is global.
pub struct ScraperManager {
    config: ScraperConfig,
    probe: Probe,
    source_override: Option<Arc<dyn FrameSource>>,
    store_override: Option<Arc<dyn HandStore>>,
    session: RwLock<Option<Session>>,
    listeners: Arc<ListenerRegistry>,
    capture_loop: CaptureLoop,
    last_state: Arc<RwLock<Option<TableState>>>,
    persistence: Mutex<Option<Arc<PersistenceQueue>>>,
}

impl ScraperManager {
    /// Probe the host once and build an uninitialized manager
    pub fn new(config: ScraperConfig) -> Self {
        let probe = Probe::run(
            config.recognition.template_dir.as_deref(),
            config.recognition.ocr_enabled,
        );
        Self::with_probe(config, probe)
    }

    /// Use a probe result instead of probing the host
    pub fn with_probe(config: ScraperConfig, probe: Probe) -> Self {
        Self {
            config,
            probe,
            source_override: None,
            store_override: None,
            session: RwLock::new(None),
            listeners: Arc::new(ListenerRegistry::new()),
            capture_loop: CaptureLoop::new(),
            last_state: Arc::new(RwLock::new(None)),
            persistence: Mutex::new(None),
        }
    }

    /// Read frames from `source` instead of the screen
    pub fn with_frame_source(mut self, source: Arc<dyn FrameSource>) -> Self {
        self.source_override = Some(source);
        self
    }

    pub fn with_hand_store(mut self, store: Arc<dyn HandStore>) -> Self {
        self.store_override = Some(store);
        self
    }

    pub fn config(&self) -> &ScraperConfig {
        &self.config
    }

    pub fn capabilities(&self) -> Capabilities {
        self.probe.capabilities
    }

    pub fn is_initialized(&self) -> bool {
        self.session.read().is_some()
    }

    pub fn is_running(&self) -> bool {
        self.capture_loop.is_running()
    }

    /// Pair the recognizer with the named site profile. Returns false on an
    /// unknown site, missing dependencies or while the loop is running.
    pub fn initialize(&self, site: &str) -> bool {
        match self.try_initialize(site) {
            Ok(()) => {
                info!(site, "scraper initialized");
                true
            }
            Err(e) => {
                warn!(site, error = %e, "scraper initialization failed");
                false
            }
        }
    }

    /// [`initialize`](Self::initialize) with the reason for a refusal
    pub fn try_initialize(&self, site: &str) -> Result<()> {
        if self.is_running() {
            return Err(ScraperError::Config("stop the capture loop before re-initializing".to_string()));
        }

        let mut capabilities = self.probe.capabilities;
        // A supplied frame source stands in for screen capture
        capabilities.capture |= self.source_override.is_some();
        let atlas = match (&self.probe.atlas, capabilities.available()) {
            (Some(atlas), true) => atlas.clone(),
            _ => return Err(ScraperError::DependencyMissing(capabilities.missing().join(", "))),
        };

        let profile = Arc::new(resolve_site_profile(site, self.config.profiles_dir.as_deref())?);

        let source = match &self.source_override {
            Some(source) => source.clone(),
            None => self.screen_source(profile.window_title.as_deref())?,
        };

        let mut recognizer = CardRecognizer::new(atlas, self.config.recognition.clone());
        if self.config.recognition.ocr_enabled {
            if let Some(engine) = &self.probe.ocr {
                recognizer = recognizer.with_ocr(engine.clone());
            }
        }

        debug!(site, source = %source.describe(), "frame source ready");
        let pipeline = TablePipeline::new(profile, Arc::new(recognizer), self.config.detection.clone());
        *self.session.write() = Some(Session {
            site: site.to_string(),
            pipeline: Arc::new(pipeline),
            source,
        });
        *self.last_state.write() = None;
        Ok(())
    }

    fn screen_source(&self, window_title: Option<&str>) -> Result<Arc<dyn FrameSource>> {
        let capture = match self.config.capture.monitor_index {
            Some(index) => ScreenCapture::with_monitor(index)?,
            None => ScreenCapture::new()?,
        };
        let capture = match window_title {
            Some(pattern) => capture.with_window_title(pattern)?,
            None => capture,
        };
        let capture = match self.config.capture.region {
            Some(region) => capture.with_region(region),
            None => capture,
        };
        Ok(Arc::new(capture))
    }

    pub fn register_callback(&self, callback: StateCallback) -> ListenerId {
        self.listeners.register(callback)
    }

    pub fn unregister_callback(&self, id: ListenerId) -> bool {
        self.listeners.unregister(id)
    }

    /// Start the continuous loop at `interval` (the configured one when
    /// `None`). No-op returning false when already running or not
    /// initialized. Must be called from within a tokio runtime.
    pub fn start(&self, interval: Option<Duration>) -> bool {
        let (pipeline, source) = match &*self.session.read() {
            Some(session) => (session.pipeline.clone(), session.source.clone()),
            None => {
                warn!("start requested before initialize");
                return false;
            }
        };
        if self.is_running() {
            debug!("capture loop already running");
            return false;
        }

        let interval = interval
            .filter(|i| !i.is_zero())
            .unwrap_or_else(|| self.config.capture.interval());
        let timing = LoopTiming {
            interval,
            hang_budget: self.config.capture.hang_budget(interval),
        };

        // Card hints from before a pause may belong to a finished hand
        pipeline.reset_hand();
        let context = LoopContext {
            source,
            pipeline,
            listeners: self.listeners.clone(),
            persistence: self.persistence_queue(),
            last_state: self.last_state.clone(),
        };
        self.capture_loop.start(context, timing)
    }

    /// Stop the loop; returns false when it was not running
    pub async fn stop(&self) -> bool {
        self.capture_loop.stop().await
    }

    /// Stop the loop and flush queued hands to the store
    pub async fn shutdown(&self) {
        self.stop().await;
        let queue = self.persistence.lock().take();
        if let Some(queue) = queue {
            match Arc::try_unwrap(queue) {
                Ok(queue) => {
                    let stats = queue.shutdown().await;
                    debug!(saved = stats.saved.load(std::sync::atomic::Ordering::SeqCst), "persistence flushed");
                }
                Err(_) => warn!("persistence queue still shared, not flushed"),
            }
        }
    }

    fn persistence_queue(&self) -> Option<Arc<PersistenceQueue>> {
        if !self.config.persistence.enabled {
            return None;
        }

        let mut slot = self.persistence.lock();
        if let Some(queue) = &*slot {
            return Some(queue.clone());
        }

        let store: Arc<dyn HandStore> = match &self.store_override {
            Some(store) => store.clone(),
            None => {
                let path = match &self.config.persistence.path {
                    Some(path) => path.clone(),
                    None => match default_hand_store_path() {
                        Ok(path) => path,
                        Err(e) => {
                            warn!(error = %e, "hand persistence disabled");
                            return None;
                        }
                    },
                };
                Arc::new(JsonlHandStore::new(path))
            }
        };

        let queue = Arc::new(PersistenceQueue::spawn(store, &self.config.persistence));
        *slot = Some(queue.clone());
        Some(queue)
    }

    /// One synchronous capture, independent of the loop. `None` when not
    /// initialized, capture failed or no table is visible.
    pub fn capture_single_state(&self) -> Option<TableState> {
        let (pipeline, source) = {
            let session = self.session.read();
            let session = session.as_ref()?;
            (session.pipeline.clone(), session.source.clone())
        };

        let frame = match source.capture_table() {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, "single capture failed");
                return None;
            }
        };

        let state = pipeline.process(&frame);
        if let Some(dir) = &self.config.debug_image_dir {
            self.write_debug_image(&pipeline, &frame, state.as_ref(), dir);
        }
        state
    }

    /// Grab one raw frame from the session's source
    pub fn capture_frame(&self) -> Result<DynamicImage> {
        let source = self
            .session
            .read()
            .as_ref()
            .map(|s| s.source.clone())
            .ok_or_else(|| ScraperError::Config("scraper not initialized".to_string()))?;
        source.capture_table()
    }

    /// Run an already captured frame through the pipeline
    pub fn analyze_frame(&self, frame: &DynamicImage) -> Option<TableState> {
        let pipeline = self.session.read().as_ref()?.pipeline.clone();
        pipeline.process(frame)
    }

    /// Save `frame` annotated with the regions used for it
    pub fn save_debug_image(&self, frame: &DynamicImage, state: Option<&TableState>, path: &Path) -> Result<()> {
        let pipeline = self
            .session
            .read()
            .as_ref()
            .map(|s| s.pipeline.clone())
            .ok_or_else(|| ScraperError::Config("scraper not initialized".to_string()))?;
        let (table, regions) = pipeline
            .fit_frame(frame)
            .ok_or_else(|| ScraperError::InvalidProfile("frame shape does not fit the site profile".to_string()))?;

        save_annotated(&table, &regions, state, path)?;
        info!(path = %path.display(), "debug image saved");
        Ok(())
    }

    fn write_debug_image(&self, pipeline: &TablePipeline, frame: &DynamicImage, state: Option<&TableState>, dir: &Path) {
        let at = state.map(|s| s.timestamp()).unwrap_or_else(chrono::Utc::now);
        let path = debug_image_path(dir, at);
        let Some((table, regions)) = pipeline.fit_frame(frame) else {
            return;
        };
        if let Err(e) = save_annotated(&table, &regions, state, &path) {
            warn!(path = %path.display(), error = %e, "failed to save debug image");
        }
    }

    /// Re-lock the profile's regions onto a fresh frame. Refused while the
    /// loop is running.
    pub fn calibrate(&self) -> bool {
        if self.is_running() {
            warn!("calibration refused while the capture loop is running");
            return false;
        }
        let Some((pipeline, source)) = self
            .session
            .read()
            .as_ref()
            .map(|s| (s.pipeline.clone(), s.source.clone()))
        else {
            return false;
        };

        match source.capture_table() {
            Ok(frame) => pipeline.calibrate(&frame),
            Err(e) => {
                warn!(error = %e, "calibration capture failed");
                false
            }
        }
    }

    pub fn last_state(&self) -> Option<TableState> {
        self.last_state.read().clone()
    }

    /// Always answers, whatever state the scraper is in
    pub fn get_scraper_status(&self) -> ScraperStatus {
        ScraperStatus {
            initialized: self.is_initialized(),
            running: self.is_running(),
            available: self.probe.capabilities.available(),
            site: self.session.read().as_ref().map(|s| s.site.clone()),
            source: self.session.read().as_ref().map(|s| s.source.describe()),
            capabilities: self.probe.capabilities,
            last_state: self.last_state().map(|s| s.to_plain()),
        }
    }
}
