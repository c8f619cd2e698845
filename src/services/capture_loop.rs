use crate::error::Result;
use crate::models::config::DetectionConfig;
use crate::models::site_profile::{RegionSet, SiteProfile};
use crate::models::table_state::TableState;
use crate::services::calibrator::{RegionCalibrator, TableDetection};
use crate::services::listeners::{DispatchReport, ListenerRegistry};
use crate::services::ocr::CardRecognizer;
use crate::services::persistence::{HandSummary, PersistenceQueue};
use crate::services::screen_capture::FrameSource;
use crate::services::table_builder::{HandMemory, TableStateBuilder};
use image::DynamicImage;
use parking_lot::{Mutex, RwLock};
use std::borrow::Cow;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{timeout, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Frame-to-state pipeline for one site: detection, region lookup and the
/// builder, plus the hand memory carried between frames.
pub struct TablePipeline {
    calibrator: RegionCalibrator,
    builder: TableStateBuilder,
    regions: RwLock<Option<RegionSet>>,
    memory: Mutex<HandMemory>,
}

impl TablePipeline {
    pub fn new(profile: Arc<SiteProfile>, recognizer: Arc<CardRecognizer>, detection: DetectionConfig) -> Self {
        Self {
            calibrator: RegionCalibrator::new(profile.clone(), detection),
            builder: TableStateBuilder::new(recognizer, profile),
            regions: RwLock::new(None),
            memory: Mutex::new(HandMemory::new()),
        }
    }

    pub fn profile(&self) -> &SiteProfile {
        self.calibrator.profile()
    }

    pub fn detect(&self, frame: &DynamicImage) -> TableDetection {
        self.calibrator.detect_poker_table(frame)
    }

    /// Lock the profile's regions onto `frame`. Only call while no loop runs.
    pub fn calibrate(&self, frame: &DynamicImage) -> bool {
        match self.calibrator.calibrate(frame) {
            Some(regions) => {
                *self.regions.write() = Some(regions);
                true
            }
            None => false,
        }
    }

    pub fn regions(&self) -> Option<RegionSet> {
        self.regions.read().clone()
    }

    /// Forget cards seen earlier in the hand
    pub fn reset_hand(&self) {
        *self.memory.lock() = HandMemory::new();
    }

    /// The part of `frame` showing the table and the regions to read in it.
    /// A frame larger than the table, such as a whole monitor, is cropped to
    /// the located felt.
    pub fn fit_frame<'a>(&self, frame: &'a DynamicImage) -> Option<(Cow<'a, DynamicImage>, RegionSet)> {
        if let Some(regions) = self.regions_for(frame.width(), frame.height()) {
            return Some((Cow::Borrowed(frame), regions));
        }

        let area = self.calibrator.locate_table(frame)?;
        let (x, y, width, height) = area.clamp_to(frame.width(), frame.height())?;
        let regions = self.regions_for(width, height)?;
        Some((Cow::Owned(frame.crop_imm(x, y, width, height)), regions))
    }

    fn regions_for(&self, width: u32, height: u32) -> Option<RegionSet> {
        self.regions
            .read()
            .clone()
            .filter(|r| r.matches_frame(width, height))
            .or_else(|| self.profile().project(width, height))
    }

    /// `None` when no table is visible or the frame no longer fits the profile
    pub fn process(&self, frame: &DynamicImage) -> Option<TableState> {
        let detection = self.detect(frame);
        if !detection.detected {
            debug!(confidence = detection.confidence, "no poker table visible");
            return None;
        }

        let Some((table, regions)) = self.fit_frame(frame) else {
            warn!(
                width = frame.width(),
                height = frame.height(),
                site = %self.profile().name,
                "frame shape does not fit profile, set a capture region or recalibrate"
            );
            return None;
        };

        let memory = self.memory.lock().clone();
        let outcome = self.builder.build_state(&table, &regions, &memory);
        if outcome.new_hand {
            info!("new hand");
        }
        *self.memory.lock() = outcome.memory;

        Some(outcome.state)
    }
}

/// Capture one frame and run it through the pipeline
pub fn capture_once(source: &dyn FrameSource, pipeline: &TablePipeline) -> Result<Option<TableState>> {
    let started = Instant::now();
    let frame = source.capture_table()?;
    let state = pipeline.process(&frame);
    debug!(
        elapsed_ms = started.elapsed().as_millis() as u64,
        table = state.is_some(),
        "capture cycle"
    );
    Ok(state)
}

/// Everything a running loop needs, shared with the manager
#[derive(Clone)]
pub struct LoopContext {
    pub source: Arc<dyn FrameSource>,
    pub pipeline: Arc<TablePipeline>,
    pub listeners: Arc<ListenerRegistry>,
    pub persistence: Option<Arc<PersistenceQueue>>,
    pub last_state: Arc<RwLock<Option<TableState>>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopTiming {
    pub interval: Duration,
    /// A cycle running longer than this is abandoned
    pub hang_budget: Duration,
}

struct RunningLoop {
    stop: Arc<AtomicBool>,
    wake: Arc<Notify>,
    handle: JoinHandle<()>,
}

/// Two-state (stopped/running) background capture worker
#[derive(Default)]
pub struct CaptureLoop {
    running: Mutex<Option<RunningLoop>>,
}

impl CaptureLoop {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_running(&self) -> bool {
        self.running
            .lock()
            .as_ref()
            .map(|r| !r.handle.is_finished())
            .unwrap_or(false)
    }

    /// Spawn the worker. Returns false, changing nothing, when one is
    /// already running. Must be called from within a tokio runtime.
    pub fn start(&self, context: LoopContext, timing: LoopTiming) -> bool {
        let mut running = self.running.lock();
        if running.as_ref().map(|r| !r.handle.is_finished()).unwrap_or(false) {
            debug!("capture loop already running");
            return false;
        }

        let stop = Arc::new(AtomicBool::new(false));
        let wake = Arc::new(Notify::new());
        let handle = tokio::spawn(run_loop(context, timing, stop.clone(), wake.clone()));
        *running = Some(RunningLoop { stop, wake, handle });

        info!(interval_ms = timing.interval.as_millis() as u64, "capture loop started");
        true
    }

    /// Stop the worker and wait for it to exit, including a listener that is
    /// running at that moment. No listener is invoked once this returns.
    /// Returns false when nothing was running.
    pub async fn stop(&self) -> bool {
        let running = self.running.lock().take();
        let Some(running) = running else {
            return false;
        };

        running.stop.store(true, Ordering::SeqCst);
        running.wake.notify_one();
        if let Err(e) = running.handle.await {
            error!(error = %e, "capture loop ended abnormally");
        }

        info!("capture loop stopped");
        true
    }
}

async fn run_loop(context: LoopContext, timing: LoopTiming, stop: Arc<AtomicBool>, wake: Arc<Notify>) {
    let mut ticker = tokio::time::interval(timing.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    // A cycle abandoned after its hang budget, possibly still running
    let mut hung: Option<JoinHandle<Result<Option<TableState>>>> = None;
    // At most one listener fan-out at a time
    let mut dispatching: Option<JoinHandle<DispatchReport>> = None;

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = wake.notified() => {}
        }
        if stop.load(Ordering::SeqCst) {
            break;
        }

        if hung.as_ref().map(|h| !h.is_finished()).unwrap_or(false) {
            debug!("abandoned cycle still running, skipping tick");
            continue;
        }
        hung = None;

        let source = context.source.clone();
        let pipeline = context.pipeline.clone();
        let mut cycle = tokio::task::spawn_blocking(move || capture_once(source.as_ref(), &pipeline));

        let outcome = tokio::select! {
            outcome = timeout(timing.hang_budget, &mut cycle) => outcome,
            _ = wake.notified() => break,
        };

        let state = match outcome {
            Err(_) => {
                warn!(
                    budget_ms = timing.hang_budget.as_millis() as u64,
                    "capture cycle hung, abandoning it"
                );
                hung = Some(cycle);
                continue;
            }
            Ok(Err(e)) => {
                error!(error = %e, "capture cycle panicked");
                continue;
            }
            Ok(Ok(Err(e))) => {
                warn!(error = %e, "capture failed");
                continue;
            }
            Ok(Ok(Ok(None))) => continue,
            Ok(Ok(Ok(Some(state)))) => state,
        };

        if stop.load(Ordering::SeqCst) {
            break;
        }
        publish(&context, state, timing.interval, &stop, &mut dispatching).await;
    }

    // The gate is closed, so a fan-out still in flight only finishes the
    // listener it is inside
    if let Some(handle) = dispatching.take() {
        debug!("waiting for listener dispatch to finish");
        if let Err(e) = handle.await {
            error!(error = %e, "listener dispatch task failed");
        }
    }
    debug!("capture loop exiting");
}

async fn publish(
    context: &LoopContext,
    state: TableState,
    budget: Duration,
    stop: &Arc<AtomicBool>,
    dispatching: &mut Option<JoinHandle<DispatchReport>>,
) {
    *context.last_state.write() = Some(state.clone());

    if dispatching.as_ref().map(|h| !h.is_finished()).unwrap_or(false) {
        debug!("listeners still busy with an earlier state, skipping this one");
    } else if !context.listeners.is_empty() {
        let listeners = context.listeners.clone();
        let gate = stop.clone();
        let payload = state.to_plain();
        let mut dispatch = tokio::task::spawn_blocking(move || listeners.dispatch(&payload, Some(&*gate)));
        *dispatching = None;

        match timeout(budget, &mut dispatch).await {
            Ok(Ok(report)) if report.failed > 0 => debug!(failed = report.failed, "some listeners failed"),
            Ok(Ok(_)) => {}
            Ok(Err(e)) => error!(error = %e, "listener dispatch task failed"),
            Err(_) => {
                warn!("listener dispatch exceeded one interval, later states skip listeners until it ends");
                *dispatching = Some(dispatch);
            }
        }
    }

    if let Some(queue) = &context.persistence {
        if let Some(summary) = HandSummary::from_state(&state) {
            queue.enqueue(summary);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::config::{PersistenceConfig, RecognitionConfig};
    use crate::models::table_state::Street;
    use crate::testing::{self, MemoryHandStore, StaticFrameSource, TableScene};
    use serde_json::Value;
    use std::sync::atomic::AtomicUsize;

    fn pipeline() -> Arc<TablePipeline> {
        let profile = Arc::new(SiteProfile::builtin("generic").unwrap());
        let recognizer = CardRecognizer::new(Arc::new(testing::synthetic_atlas()), RecognitionConfig::default());
        Arc::new(TablePipeline::new(profile, Arc::new(recognizer), DetectionConfig::default()))
    }

    fn table_frame() -> DynamicImage {
        let profile = SiteProfile::builtin("generic").unwrap();
        testing::render_table(&profile, &TableScene::six_max_flop(), 1280, 880)
    }

    fn context(source: Arc<dyn FrameSource>) -> LoopContext {
        LoopContext {
            source,
            pipeline: pipeline(),
            listeners: Arc::new(ListenerRegistry::new()),
            persistence: None,
            last_state: Arc::new(RwLock::new(None)),
        }
    }

    // Generous hang budget: unoptimized test builds recognize slowly
    fn timing(interval_ms: u64) -> LoopTiming {
        LoopTiming {
            interval: Duration::from_millis(interval_ms),
            hang_budget: Duration::from_secs(20),
        }
    }

    async fn wait_for(condition: impl Fn() -> bool) -> bool {
        for _ in 0..400 {
            if condition() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        false
    }

    #[test]
    fn test_pipeline_process_table_and_desktop() {
        let pipeline = pipeline();

        let state = pipeline.process(&table_frame()).unwrap();
        assert_eq!(state.stage(), Some(Street::Flop));
        assert_eq!(state.active_players(), 4);

        assert!(pipeline.process(&testing::desktop_frame(1280, 880)).is_none());
    }

    #[test]
    fn test_pipeline_reads_table_shown_on_a_larger_monitor() {
        let pipeline = pipeline();
        let mut screen = testing::desktop_frame(1920, 1080).to_rgb8();
        image::imageops::replace(&mut screen, &table_frame().to_rgb8(), 320, 100);
        let screen = DynamicImage::ImageRgb8(screen);

        let (table, regions) = pipeline.fit_frame(&screen).unwrap();
        assert_eq!((table.width(), table.height()), (1280, 880));
        assert!(regions.matches_frame(1280, 880));

        let state = pipeline.process(&screen).unwrap();
        assert_eq!(state.stage(), Some(Street::Flop));
        assert_eq!(state.pot(), Some(1250.0));
        assert_eq!(state.active_players(), 4);
        assert_eq!(state.dealer_seat(), Some(3));

        // Plain desktop of the same size: nothing to read
        assert!(pipeline.process(&testing::desktop_frame(1920, 1080)).is_none());
    }

    #[test]
    fn test_pipeline_remembers_hand_until_reset() {
        let pipeline = pipeline();
        assert!(pipeline.memory.lock().is_empty());

        pipeline.process(&table_frame()).unwrap();
        assert!(!pipeline.memory.lock().is_empty());

        pipeline.reset_hand();
        assert!(pipeline.memory.lock().is_empty());
    }

    #[test]
    fn test_pipeline_calibrate_locks_regions() {
        let pipeline = pipeline();
        assert!(pipeline.regions().is_none());

        assert!(pipeline.calibrate(&table_frame()));
        let regions = pipeline.regions().unwrap();
        assert!(regions.matches_frame(1280, 880));

        assert!(!pipeline.calibrate(&testing::desktop_frame(1280, 880)));
        // A failed calibration keeps the previous regions
        assert_eq!(pipeline.regions(), Some(regions));
    }

    #[test]
    fn test_capture_once_reports_capture_errors() {
        let source = StaticFrameSource::new(table_frame()).failing_first(1);
        assert!(capture_once(&source, &pipeline()).is_err());
        assert!(capture_once(&source, &pipeline()).unwrap().is_some());
    }

    #[tokio::test]
    async fn test_start_and_stop_are_idempotent() {
        let capture_loop = CaptureLoop::new();
        let ctx = context(Arc::new(StaticFrameSource::new(table_frame())));

        assert!(!capture_loop.is_running());
        assert!(capture_loop.start(ctx.clone(), timing(50)));
        assert!(!capture_loop.start(ctx, timing(50)));
        assert!(capture_loop.is_running());

        assert!(capture_loop.stop().await);
        assert!(!capture_loop.stop().await);
        assert!(!capture_loop.is_running());
    }

    #[tokio::test]
    async fn test_listeners_receive_states_and_none_after_stop() {
        let capture_loop = CaptureLoop::new();
        let ctx = context(Arc::new(StaticFrameSource::new(table_frame())));

        let calls = Arc::new(AtomicUsize::new(0));
        let stages = Arc::new(Mutex::new(Vec::new()));
        let (counter, seen) = (calls.clone(), stages.clone());
        ctx.listeners.register(Arc::new(move |state: &Value| {
            counter.fetch_add(1, Ordering::SeqCst);
            seen.lock().push(state["stage"].clone());
        }));

        capture_loop.start(ctx.clone(), timing(30));
        assert!(wait_for(|| calls.load(Ordering::SeqCst) >= 2).await);
        capture_loop.stop().await;

        let after_stop = calls.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(calls.load(Ordering::SeqCst), after_stop);

        assert!(stages.lock().iter().all(|s| s == "flop"));
        let last = ctx.last_state.read().clone().unwrap();
        assert_eq!(last.board_cards().len(), 3);
    }

    #[tokio::test]
    async fn test_failed_captures_do_not_stop_the_loop() {
        let capture_loop = CaptureLoop::new();
        let source = Arc::new(StaticFrameSource::new(table_frame()).failing_first(3));
        let ctx = context(source.clone());

        capture_loop.start(ctx.clone(), timing(20));
        let published = ctx.last_state.clone();
        assert!(wait_for(|| published.read().is_some()).await);
        capture_loop.stop().await;

        assert!(source.captures() >= 4);
    }

    #[tokio::test]
    async fn test_panicking_listener_does_not_break_loop() {
        let capture_loop = CaptureLoop::new();
        let ctx = context(Arc::new(StaticFrameSource::new(table_frame())));

        let calls = Arc::new(AtomicUsize::new(0));
        ctx.listeners.register(Arc::new(|_: &Value| panic!("bad listener")));
        let counter = calls.clone();
        ctx.listeners.register(Arc::new(move |_: &Value| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        capture_loop.start(ctx, timing(30));
        assert!(wait_for(|| calls.load(Ordering::SeqCst) >= 2).await);
        assert!(capture_loop.is_running());
        capture_loop.stop().await;
    }

    #[tokio::test]
    async fn test_slow_listener_is_not_stacked_and_finishes_before_stop() {
        let capture_loop = CaptureLoop::new();
        let ctx = context(Arc::new(StaticFrameSource::new(table_frame())));

        let calls = Arc::new(AtomicUsize::new(0));
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let (counter, busy, max) = (calls.clone(), in_flight.clone(), peak.clone());
        ctx.listeners.register(Arc::new(move |_: &Value| {
            let now = busy.fetch_add(1, Ordering::SeqCst) + 1;
            max.fetch_max(now, Ordering::SeqCst);
            counter.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(700));
            busy.fetch_sub(1, Ordering::SeqCst);
        }));

        // Listener takes far longer than the interval
        capture_loop.start(ctx, timing(30));
        assert!(wait_for(|| calls.load(Ordering::SeqCst) >= 2).await);
        capture_loop.stop().await;

        assert_eq!(peak.load(Ordering::SeqCst), 1);
        assert_eq!(in_flight.load(Ordering::SeqCst), 0);
        let after_stop = calls.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(900)).await;
        assert_eq!(calls.load(Ordering::SeqCst), after_stop);
    }

    #[tokio::test]
    async fn test_hung_cycle_is_abandoned_and_not_stacked() {
        let capture_loop = CaptureLoop::new();
        let source = Arc::new(StaticFrameSource::new(table_frame()).hanging_first(Duration::from_millis(1500)));
        let ctx = context(source.clone());

        capture_loop.start(
            ctx,
            LoopTiming {
                interval: Duration::from_millis(50),
                hang_budget: Duration::from_millis(200),
            },
        );

        // The first capture is abandoned; later ticks are skipped while it runs
        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(source.captures(), 1);
        assert!(capture_loop.is_running());

        let started = Instant::now();
        capture_loop.stop().await;
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_published_hands_are_persisted_once() {
        let capture_loop = CaptureLoop::new();
        let store = Arc::new(MemoryHandStore::new());
        let queue = Arc::new(PersistenceQueue::spawn(store.clone(), &PersistenceConfig::default()));

        let mut ctx = context(Arc::new(StaticFrameSource::new(table_frame())));
        ctx.persistence = Some(queue.clone());
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        ctx.listeners.register(Arc::new(move |_: &Value| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        capture_loop.start(ctx, timing(30));
        assert!(wait_for(|| calls.load(Ordering::SeqCst) >= 3).await);
        capture_loop.stop().await;

        let queue = match Arc::try_unwrap(queue) {
            Ok(queue) => queue,
            Err(_) => panic!("loop still holds the persistence queue"),
        };
        queue.shutdown().await;

        let records = store.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].hand, "KhQh");
        assert_eq!(records[0].board.as_deref(), Some("As7d2c"));
        assert_eq!(records[0].metadata["source"], "screen_scraper");
    }
}
