use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info};

use super::AnalysisRecord;
use crate::clock::{Clock, SystemClock};

/// A repeat of the last save within this window is dropped.
const DUPLICATE_WINDOW_SECS: i64 = 5;

/// Width of the time bucket folded into an analysis hash.
const HASH_WINDOW_MS: i64 = 30_000;

/// How long a saved hash is remembered.
const SAVED_TTL_MINUTES: i64 = 5;

/// How long a pending hash is remembered before the save is assumed lost.
const PENDING_TTL_SECS: i64 = 60;

#[derive(Debug, Clone, PartialEq)]
pub enum SaveOutcome<T> {
    Saved(T),
    /// Another save was running; this one was not attempted.
    InProgress,
    /// Same data as the previous save a moment ago; not sent again.
    AlreadySaved,
}

/// Hash of the fields that identify an analysis: emotion, confidence to two
/// decimals and the 30-second window it was taken in.
pub fn analysis_hash(record: &AnalysisRecord, taken_at: DateTime<Utc>) -> String {
    let confidence = (record.confidence * 100.0).round() / 100.0;
    let window = taken_at.timestamp_millis().div_euclid(HASH_WINDOW_MS);
    format!("{}_{}_{}", record.emotion, confidence, window)
}

#[derive(Default)]
struct GuardState {
    is_saving: bool,
    last_save: Option<(DateTime<Utc>, AnalysisRecord)>,
    /// hash -> forget after
    saved: HashMap<String, DateTime<Utc>>,
    pending: HashMap<String, DateTime<Utc>>,
}

impl GuardState {
    fn prune(&mut self, now: DateTime<Utc>) {
        self.saved.retain(|_, until| *until > now);
        self.pending.retain(|_, until| *until > now);
    }
}

/// Clears the in-progress flag however the save ends, including when the
/// save future is dropped mid-flight.
struct SavingFlag<'a>(&'a Mutex<GuardState>);

impl Drop for SavingFlag<'_> {
    fn drop(&mut self) {
        self.0.lock().unwrap_or_else(|e| e.into_inner()).is_saving = false;
    }
}

pub struct SaveGuard {
    clock: Arc<dyn Clock>,
    state: Mutex<GuardState>,
}

impl SaveGuard {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            state: Mutex::new(GuardState::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, GuardState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Run `save_fn` unless a save is already running or `record` repeats the
    /// previous save from less than 5 seconds ago. Errors from `save_fn` are
    /// returned unchanged.
    pub async fn save<F, Fut, T, E>(&self, record: &AnalysisRecord, save_fn: F) -> Result<SaveOutcome<T>, E>
    where
        F: FnOnce(AnalysisRecord) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let now = self.clock.now();
        {
            let mut state = self.lock();
            if state.is_saving {
                debug!("Save already in progress, ignoring");
                return Ok(SaveOutcome::InProgress);
            }
            if let Some((saved_at, ref last)) = state.last_save {
                if now - saved_at < Duration::seconds(DUPLICATE_WINDOW_SECS)
                    && last.is_duplicate_of(record)
                {
                    debug!(emotion = %record.emotion, "Duplicate analysis, ignoring save");
                    return Ok(SaveOutcome::AlreadySaved);
                }
            }
            state.is_saving = true;
        }

        let _flag = SavingFlag(&self.state);
        let value = save_fn(record.clone()).await?;

        self.lock().last_save = Some((now, record.clone()));
        info!(emotion = %record.emotion, "Analysis saved");
        Ok(SaveOutcome::Saved(value))
    }

    pub fn is_saving(&self) -> bool {
        self.lock().is_saving
    }

    /// Saved or pending within the remembered window.
    pub fn is_already_saved(&self, record: &AnalysisRecord, taken_at: DateTime<Utc>) -> bool {
        let hash = analysis_hash(record, taken_at);
        let now = self.clock.now();
        let mut state = self.lock();
        state.prune(now);
        state.saved.contains_key(&hash) || state.pending.contains_key(&hash)
    }

    pub fn mark_pending(&self, record: &AnalysisRecord, taken_at: DateTime<Utc>) {
        let hash = analysis_hash(record, taken_at);
        let until = self.clock.now() + Duration::seconds(PENDING_TTL_SECS);
        self.lock().pending.insert(hash, until);
    }

    pub fn mark_saved(&self, record: &AnalysisRecord, taken_at: DateTime<Utc>) {
        let hash = analysis_hash(record, taken_at);
        let until = self.clock.now() + Duration::minutes(SAVED_TTL_MINUTES);
        let mut state = self.lock();
        state.pending.remove(&hash);
        state.saved.insert(hash, until);
    }

    /// Forget the in-progress flag and the previous save.
    pub fn reset(&self) {
        let mut state = self.lock();
        state.is_saving = false;
        state.last_save = None;
    }
}

impl Default for SaveGuard {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn record(confidence: f64) -> AnalysisRecord {
        AnalysisRecord {
            emotion: "happy".to_string(),
            confidence,
            emotions_detected: Default::default(),
            recommendations: Vec::new(),
        }
    }

    fn guard() -> (SaveGuard, ManualClock) {
        let clock = ManualClock::new(Utc::now());
        (SaveGuard::with_clock(Arc::new(clock.clone())), clock)
    }

    #[test]
    fn test_analysis_hash() {
        let at = DateTime::from_timestamp_millis(95_000).expect("valid timestamp");
        assert_eq!(analysis_hash(&record(0.876), at), "happy_0.88_3");
        // Same 30s bucket
        let later = DateTime::from_timestamp_millis(119_999).expect("valid timestamp");
        assert_eq!(analysis_hash(&record(0.876), later), "happy_0.88_3");
        let next = DateTime::from_timestamp_millis(120_000).expect("valid timestamp");
        assert_eq!(analysis_hash(&record(0.876), next), "happy_0.88_4");
    }

    #[tokio::test]
    async fn test_save_runs_save_fn() {
        let (guard, _) = guard();
        let outcome: Result<_, ()> = guard.save(&record(0.9), |r| async move { Ok(r.emotion) }).await;
        assert_eq!(outcome, Ok(SaveOutcome::Saved("happy".to_string())));
        assert!(!guard.is_saving());
    }

    #[tokio::test]
    async fn test_duplicate_within_window_is_suppressed() {
        let (guard, clock) = guard();
        let calls = AtomicUsize::new(0);
        let counter = &calls;
        let counted = move |_: AnalysisRecord| async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok::<_, ()>(())
        };

        assert_eq!(guard.save(&record(0.9), counted).await, Ok(SaveOutcome::Saved(())));

        clock.advance(Duration::seconds(2));
        assert_eq!(guard.save(&record(0.905), counted).await, Ok(SaveOutcome::AlreadySaved));

        clock.advance(Duration::seconds(4));
        assert_eq!(guard.save(&record(0.9), counted).await, Ok(SaveOutcome::Saved(())));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_different_data_is_saved() {
        let (guard, _) = guard();
        let _ = guard.save(&record(0.9), |_| async { Ok::<_, ()>(()) }).await;
        let outcome = guard.save(&record(0.5), |_| async { Ok::<_, ()>(()) }).await;
        assert_eq!(outcome, Ok(SaveOutcome::Saved(())));
    }

    #[tokio::test]
    async fn test_concurrent_save_is_refused() {
        let (guard, _) = guard();
        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();

        let first_record = record(0.9);
        let first = guard.save(&first_record, |_| async move {
            let _ = release_rx.await;
            Ok::<_, ()>("first")
        });
        let second = async {
            // Let the first save take the flag
            tokio::task::yield_now().await;
            let outcome = guard.save(&record(0.2), |_| async { Ok::<_, ()>("second") }).await;
            let _ = release_tx.send(());
            outcome
        };

        let (first, second) = tokio::join!(first, second);
        assert_eq!(first, Ok(SaveOutcome::Saved("first")));
        assert_eq!(second, Ok(SaveOutcome::InProgress));
        assert!(!guard.is_saving());
    }

    #[tokio::test]
    async fn test_failed_save_clears_flag_and_is_not_remembered() {
        let (guard, _) = guard();
        let outcome = guard.save(&record(0.9), |_| async { Err::<(), _>("boom") }).await;
        assert_eq!(outcome, Err("boom"));
        assert!(!guard.is_saving());

        let outcome = guard.save(&record(0.9), |_| async { Ok::<_, &str>(()) }).await;
        assert_eq!(outcome, Ok(SaveOutcome::Saved(())));
    }

    #[test]
    fn test_pending_and_saved_hashes_expire() {
        let (guard, clock) = guard();
        let taken_at = clock.now();
        let r = record(0.9);

        guard.mark_pending(&r, taken_at);
        assert!(guard.is_already_saved(&r, taken_at));
        clock.advance(Duration::seconds(61));
        assert!(!guard.is_already_saved(&r, taken_at));

        guard.mark_pending(&r, taken_at);
        guard.mark_saved(&r, taken_at);
        clock.advance(Duration::minutes(4));
        assert!(guard.is_already_saved(&r, taken_at));
        clock.advance(Duration::minutes(2));
        assert!(!guard.is_already_saved(&r, taken_at));
    }

    #[test]
    fn test_reset() {
        let (guard, _) = guard();
        guard.lock().is_saving = true;
        guard.reset();
        assert!(!guard.is_saving());
    }
}
