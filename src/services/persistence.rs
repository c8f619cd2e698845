use crate::error::{Result, ScraperError};
use crate::models::config::PersistenceConfig;
use crate::models::table_state::TableState;
use crate::services::table_builder::position_name;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

pub const SOURCE: &str = "screen_scraper";

/// Durable sink for observed hands
pub trait HandStore: Send + Sync {
    /// Store one hand and return its record id
    fn save(&self, hand: &str, board: Option<&str>, result: &str, metadata: &Value) -> Result<String>;
}

/// One line of a [`JsonlHandStore`] file
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HandRecord {
    pub id: String,
    pub hand: String,
    pub board: Option<String>,
    pub result: String,
    pub metadata: Value,
    pub saved_at: DateTime<Utc>,
}

/// Appends one JSON object per hand to a file
pub struct JsonlHandStore {
    path: PathBuf,
    next_seq: AtomicU64,
    write_lock: Mutex<()>,
}

impl JsonlHandStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            next_seq: AtomicU64::new(0),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Every record in the file, oldest first
    #[cfg(test)]
    pub(crate) fn load_all(&self) -> Result<Vec<HandRecord>> {
        use std::io::{BufRead, BufReader};

        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let file = fs::File::open(&self.path)?;
        let mut records = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            records.push(serde_json::from_str(&line)?);
        }
        Ok(records)
    }
}

impl HandStore for JsonlHandStore {
    fn save(&self, hand: &str, board: Option<&str>, result: &str, metadata: &Value) -> Result<String> {
        let saved_at = Utc::now();
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        let record = HandRecord {
            id: format!("{}-{}", saved_at.timestamp_millis(), seq),
            hand: hand.to_string(),
            board: board.map(str::to_string),
            result: result.to_string(),
            metadata: metadata.clone(),
            saved_at,
        };
        let line = serde_json::to_string(&record)?;

        let _guard = self.write_lock.lock();
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| ScraperError::Persistence(format!("Failed to open {:?}: {}", self.path, e)))?;
        writeln!(file, "{}", line)?;

        Ok(record.id)
    }
}

/// What gets stored for one published snapshot
#[derive(Debug, Clone, PartialEq)]
pub struct HandSummary {
    pub hand: String,
    pub board: Option<String>,
    pub result: String,
    pub metadata: Value,
}

impl HandSummary {
    /// `None` unless both hero cards are known
    pub fn from_state(state: &TableState) -> Option<Self> {
        if !state.hero_hand_known() {
            return None;
        }

        let stage = state.stage().map(|s| s.as_str());
        let position = state.hero_seat().and_then(|seat| position_name(state, seat));
        let metadata = json!({
            "source": SOURCE,
            "position": position,
            "hero_seat": state.hero_seat(),
            "seats": state.seats().len(),
            "occupied_seats": state.occupied_seats(),
            "active_players": state.active_players(),
            "stage": stage,
            "pot": state.pot(),
            "observed_at": state.timestamp().to_rfc3339(),
        });

        Some(Self {
            hand: state.hand_text(),
            board: state.board_text(),
            result: stage.unwrap_or("unknown").to_string(),
            metadata,
        })
    }

    fn dedup_key(&self) -> (String, Option<String>, String) {
        (self.hand.clone(), self.board.clone(), self.result.clone())
    }
}

/// Counters shared between the queue handle and its worker
#[derive(Debug, Default)]
pub struct PersistenceStats {
    pub saved: AtomicUsize,
    pub duplicates: AtomicUsize,
    pub failed: AtomicUsize,
    pub dropped: AtomicUsize,
}

/// Bounded hand-off from the capture loop to a background writer.
///
/// Enqueueing never blocks. Failed saves are retried with exponential
/// backoff and then dropped with a warning.
pub struct PersistenceQueue {
    tx: mpsc::Sender<HandSummary>,
    worker: JoinHandle<()>,
    stats: Arc<PersistenceStats>,
}

impl PersistenceQueue {
    /// Must be called from within a tokio runtime
    pub fn spawn(store: Arc<dyn HandStore>, config: &PersistenceConfig) -> Self {
        let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
        let stats = Arc::new(PersistenceStats::default());
        let worker = tokio::spawn(run_worker(
            store,
            rx,
            config.retries,
            Duration::from_millis(config.backoff_ms),
            stats.clone(),
        ));

        Self { tx, worker, stats }
    }

    /// Returns false when the queue is full or closed and the hand was dropped
    pub fn enqueue(&self, summary: HandSummary) -> bool {
        match self.tx.try_send(summary) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(summary)) => {
                self.stats.dropped.fetch_add(1, Ordering::SeqCst);
                warn!(hand = %summary.hand, "persistence queue full, hand dropped");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.stats.dropped.fetch_add(1, Ordering::SeqCst);
                warn!("persistence worker gone, hand dropped");
                false
            }
        }
    }

    pub fn stats(&self) -> &PersistenceStats {
        &self.stats
    }

    /// Close the queue and wait until every queued hand was handled
    pub async fn shutdown(self) -> Arc<PersistenceStats> {
        let Self { tx, worker, stats } = self;
        drop(tx);
        if let Err(e) = worker.await {
            warn!(error = %e, "persistence worker ended abnormally");
        }
        stats
    }
}

async fn run_worker(
    store: Arc<dyn HandStore>,
    mut rx: mpsc::Receiver<HandSummary>,
    retries: u32,
    backoff: Duration,
    stats: Arc<PersistenceStats>,
) {
    let mut last_key = None;

    while let Some(summary) = rx.recv().await {
        let key = summary.dedup_key();
        if last_key.as_ref() == Some(&key) {
            stats.duplicates.fetch_add(1, Ordering::SeqCst);
            continue;
        }

        match save_with_retry(store.clone(), &summary, retries, backoff).await {
            Ok(id) => {
                stats.saved.fetch_add(1, Ordering::SeqCst);
                debug!(record = %id, hand = %summary.hand, "hand saved");
                last_key = Some(key);
            }
            Err(e) => {
                stats.failed.fetch_add(1, Ordering::SeqCst);
                warn!(hand = %summary.hand, error = %e, "giving up on hand");
            }
        }
    }
}

async fn save_with_retry(
    store: Arc<dyn HandStore>,
    summary: &HandSummary,
    retries: u32,
    backoff: Duration,
) -> Result<String> {
    let mut attempt = 0u32;
    loop {
        let store = store.clone();
        let job = summary.clone();
        let outcome = tokio::task::spawn_blocking(move || {
            store.save(&job.hand, job.board.as_deref(), &job.result, &job.metadata)
        })
        .await
        .map_err(|e| ScraperError::Persistence(format!("save task failed: {}", e)))
        .and_then(|r| r);

        match outcome {
            Ok(id) => return Ok(id),
            Err(e) if attempt < retries => {
                let delay = backoff.saturating_mul(2u32.saturating_pow(attempt));
                warn!(attempt = attempt + 1, error = %e, delay_ms = delay.as_millis() as u64, "save failed, retrying");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::card::Card;
    use crate::models::table_state::{PlayerSeatState, Street, TableStateParts};
    use crate::testing::MemoryHandStore;

    fn card(s: &str) -> Option<Card> {
        Some(s.parse().unwrap())
    }

    fn seat(n: u8) -> PlayerSeatState {
        PlayerSeatState {
            active: true,
            stack: Some(100.0),
            current_bet: Some(0.0),
            ..PlayerSeatState::empty(n)
        }
    }

    fn flop_state(hole: Vec<Option<Card>>) -> TableState {
        TableState::from_parts(TableStateParts {
            pot: Some(60.0),
            stage: Some(Street::Flop),
            board_cards: vec![card("2c"), card("7h"), card("9d")],
            hole_cards: hole,
            seats: vec![seat(1), seat(2), seat(4)],
            dealer_seat: Some(4),
            small_blind_seat: Some(1),
            big_blind_seat: Some(2),
            hero_seat: Some(1),
            timestamp: Utc::now(),
        })
        .unwrap()
    }

    fn config(retries: u32) -> PersistenceConfig {
        PersistenceConfig {
            retries,
            backoff_ms: 1,
            queue_capacity: 8,
            ..PersistenceConfig::default()
        }
    }

    fn temp_path(label: &str) -> PathBuf {
        static COUNTER: AtomicUsize = AtomicUsize::new(0);
        let id = COUNTER.fetch_add(1, Ordering::SeqCst);
        std::env::temp_dir()
            .join(format!("table-scraper-store-{}-{}-{}", label, std::process::id(), id))
            .join("hands.jsonl")
    }

    #[test]
    fn test_summary_from_state() {
        let summary = HandSummary::from_state(&flop_state(vec![card("As"), card("Kd")])).unwrap();

        assert_eq!(summary.hand, "AsKd");
        assert_eq!(summary.board.as_deref(), Some("2c7h9d"));
        assert_eq!(summary.result, "flop");
        assert_eq!(summary.metadata["source"], "screen_scraper");
        assert_eq!(summary.metadata["position"], "SB");
        assert_eq!(summary.metadata["occupied_seats"], 3);
        assert_eq!(summary.metadata["pot"], 60.0);
    }

    #[test]
    fn test_unknown_hero_hand_is_not_saved() {
        assert!(HandSummary::from_state(&flop_state(vec![card("As"), None])).is_none());
        assert!(HandSummary::from_state(&flop_state(vec![])).is_none());
    }

    #[test]
    fn test_jsonl_store_appends_records() {
        let store = JsonlHandStore::new(temp_path("jsonl"));

        let first = store.save("AsKd", Some("2c7h9d"), "flop", &json!({"source": SOURCE})).unwrap();
        let second = store.save("QcQd", None, "preflop", &json!({})).unwrap();
        assert_ne!(first, second);

        let records = store.load_all().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].id, first);
        assert_eq!(records[0].board.as_deref(), Some("2c7h9d"));
        assert_eq!(records[1].hand, "QcQd");
        assert_eq!(records[1].board, None);

        if let Some(dir) = store.path().parent() {
            fs::remove_dir_all(dir).ok();
        }
    }

    #[tokio::test]
    async fn test_queue_saves_and_deduplicates() {
        let store = Arc::new(MemoryHandStore::new());
        let queue = PersistenceQueue::spawn(store.clone(), &config(0));

        let summary = HandSummary::from_state(&flop_state(vec![card("As"), card("Kd")])).unwrap();
        assert!(queue.enqueue(summary.clone()));
        assert!(queue.enqueue(summary.clone()));

        let mut turn = summary.clone();
        turn.board = Some("2c7h9dTs".to_string());
        turn.result = "turn".to_string();
        assert!(queue.enqueue(turn));

        let stats = queue.shutdown().await;
        assert_eq!(stats.saved.load(Ordering::SeqCst), 2);
        assert_eq!(stats.duplicates.load(Ordering::SeqCst), 1);
        assert_eq!(store.records().len(), 2);
    }

    #[tokio::test]
    async fn test_queue_retries_then_succeeds() {
        let store = Arc::new(MemoryHandStore::failing(2));
        let queue = PersistenceQueue::spawn(store.clone(), &config(3));

        let summary = HandSummary::from_state(&flop_state(vec![card("As"), card("Kd")])).unwrap();
        queue.enqueue(summary);

        let stats = queue.shutdown().await;
        assert_eq!(stats.saved.load(Ordering::SeqCst), 1);
        assert_eq!(store.attempts(), 3);
        assert_eq!(store.records().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_hand_is_saved_when_seen_again() {
        let store = Arc::new(MemoryHandStore::failing(1));
        let queue = PersistenceQueue::spawn(store.clone(), &config(0));

        let summary = HandSummary::from_state(&flop_state(vec![card("As"), card("Kd")])).unwrap();
        queue.enqueue(summary.clone());
        queue.enqueue(summary);

        let stats = queue.shutdown().await;
        assert_eq!(stats.failed.load(Ordering::SeqCst), 1);
        assert_eq!(stats.saved.load(Ordering::SeqCst), 1);
        assert_eq!(stats.duplicates.load(Ordering::SeqCst), 0);
        assert_eq!(store.records().len(), 1);
    }

    #[tokio::test]
    async fn test_queue_gives_up_after_bounded_retries() {
        let store = Arc::new(MemoryHandStore::failing(usize::MAX));
        let queue = PersistenceQueue::spawn(store.clone(), &config(2));

        let summary = HandSummary::from_state(&flop_state(vec![card("As"), card("Kd")])).unwrap();
        queue.enqueue(summary);

        let stats = queue.shutdown().await;
        assert_eq!(stats.failed.load(Ordering::SeqCst), 1);
        assert_eq!(stats.saved.load(Ordering::SeqCst), 0);
        assert_eq!(store.attempts(), 3);
    }
}
