use crate::error::{Result, ScraperError};
use crate::services::listeners::StateCallback;
use crate::services::scraper_manager::ScraperManager;
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[derive(Debug, Clone, Copy, Default)]
pub struct WatchOptions {
    /// Stop after this long; runs until Ctrl+C when `None`
    pub duration: Option<Duration>,
    /// Overrides the configured capture interval
    pub interval: Option<Duration>,
}

/// Run the capture loop, handing every published state to `on_state`.
/// Flushes pending hands before returning the number of states published.
pub async fn watch(manager: &ScraperManager, options: WatchOptions, on_state: StateCallback) -> Result<usize> {
    let published = Arc::new(AtomicUsize::new(0));
    let counter = published.clone();
    let id = manager.register_callback(Arc::new(move |state: &Value| {
        counter.fetch_add(1, Ordering::SeqCst);
        on_state(state);
    }));

    if !manager.start(options.interval) {
        manager.unregister_callback(id);
        return Err(ScraperError::Config(
            "capture loop did not start (not initialized or already running)".to_string(),
        ));
    }
    info!(duration = ?options.duration, "watching table, Ctrl+C to stop");

    let waited = match options.duration {
        Some(duration) => {
            tokio::select! {
                _ = tokio::time::sleep(duration) => Ok(()),
                signal = tokio::signal::ctrl_c() => signal,
            }
        }
        None => tokio::signal::ctrl_c().await,
    };

    manager.shutdown().await;
    manager.unregister_callback(id);
    waited?;

    let count = published.load(Ordering::SeqCst);
    info!(published = count, "watch finished");
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::config::{PersistenceConfig, ScraperConfig};
    use crate::models::site_profile::SiteProfile;
    use crate::services::capabilities::{Capabilities, Probe};
    use crate::testing::{self, MemoryHandStore, StaticFrameSource, TableScene};
    use parking_lot::Mutex;

    fn manager(store: Arc<MemoryHandStore>) -> ScraperManager {
        let probe = Probe {
            capabilities: Capabilities {
                capture: true,
                ocr: false,
                templates: true,
            },
            atlas: Some(Arc::new(testing::synthetic_atlas())),
            ocr: None,
        };
        let mut config = ScraperConfig::default();
        config.capture.hang_multiplier = 500;
        config.persistence = PersistenceConfig {
            backoff_ms: 1,
            ..PersistenceConfig::default()
        };

        let profile = SiteProfile::builtin("generic").unwrap();
        let frame = testing::render_table(&profile, &TableScene::six_max_flop(), 1280, 880);
        ScraperManager::with_probe(config, probe)
            .with_frame_source(Arc::new(StaticFrameSource::new(frame)))
            .with_hand_store(store)
    }

    #[tokio::test]
    async fn test_watch_for_a_while() {
        let store = Arc::new(MemoryHandStore::new());
        let manager = manager(store.clone());
        assert!(manager.initialize("generic"));

        let stages = Arc::new(Mutex::new(Vec::new()));
        let seen = stages.clone();
        let options = WatchOptions {
            duration: Some(Duration::from_millis(1500)),
            interval: Some(Duration::from_millis(40)),
        };
        let count = watch(
            &manager,
            options,
            Arc::new(move |state: &Value| seen.lock().push(state["stage"].clone())),
        )
        .await
        .unwrap();

        assert!(count >= 1);
        assert_eq!(stages.lock().len(), count);
        assert!(stages.lock().iter().all(|s| s == "flop"));
        assert!(!manager.is_running());
        // Repeated identical states persist a single hand
        assert_eq!(store.records().len(), 1);
    }

    #[tokio::test]
    async fn test_watch_requires_initialize() {
        let manager = manager(Arc::new(MemoryHandStore::new()));
        let options = WatchOptions {
            duration: Some(Duration::from_millis(10)),
            interval: None,
        };
        let result = watch(&manager, options, Arc::new(|_: &Value| {})).await;
        assert!(matches!(result, Err(ScraperError::Config(_))));
    }
}
