//! File-backed signal store
//!
//! Layout under the base directory:
//! - `signals/failures.log`, `loopbacks.log`, `ratings.log`,
//!   `completions.log`, `patterns.log` - one JSON object per line
//! - `state/stats.json`, `state/streak.json` - running aggregates
//! - `state/current-execution.json` - the execution record `capture` reads by default
//! - `learning/<BUCKET>/<date>-<id>.json` - one learning each
//! - `learning/SESSIONS/<date>-<id>.txt` - capture summaries
//!
//! Logs are append-only. Stats and streak are rewritten in place, always
//! under the store's write lock and always through a temp file + rename.
//! The lock only covers this process: two processes recording at once can
//! still lose an aggregate update.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashSet;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::learning::{Learning, LearningType};
use crate::pattern::Pattern;
use crate::signal::{
    clamp_rating, AlgorithmStats, AlgorithmStreak, CompletionSignal, FailureSignal,
    LoopbackSignal, RatingSignal,
};
use crate::Result;

const SIGNALS_DIR: &str = "signals";
const STATE_DIR: &str = "state";
const LEARNING_DIR: &str = "learning";
const SESSIONS_BUCKET: &str = "SESSIONS";
const STATS_FILE: &str = "stats.json";
const STREAK_FILE: &str = "streak.json";
const CURRENT_EXECUTION_FILE: &str = "current-execution.json";

/// The append-only logs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignalLog {
    Failures,
    Loopbacks,
    Ratings,
    Completions,
    Patterns,
}

impl SignalLog {
    pub const ALL: [SignalLog; 5] = [
        SignalLog::Failures,
        SignalLog::Loopbacks,
        SignalLog::Ratings,
        SignalLog::Completions,
        SignalLog::Patterns,
    ];

    pub fn file_name(&self) -> &'static str {
        match self {
            Self::Failures => "failures.log",
            Self::Loopbacks => "loopbacks.log",
            Self::Ratings => "ratings.log",
            Self::Completions => "completions.log",
            Self::Patterns => "patterns.log",
        }
    }
}

#[derive(Debug)]
struct StoreInner {
    base_dir: PathBuf,
    write_lock: Mutex<()>,
}

/// Handle to one storage root. Clones share the same write lock.
#[derive(Debug, Clone)]
pub struct SignalStore {
    inner: Arc<StoreInner>,
}

impl SignalStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                base_dir: base_dir.into(),
                write_lock: Mutex::new(()),
            }),
        }
    }

    // ==================== Paths ====================

    pub fn base_dir(&self) -> &Path {
        &self.inner.base_dir
    }

    pub fn signals_dir(&self) -> PathBuf {
        self.inner.base_dir.join(SIGNALS_DIR)
    }

    pub fn state_dir(&self) -> PathBuf {
        self.inner.base_dir.join(STATE_DIR)
    }

    pub fn learning_dir(&self) -> PathBuf {
        self.inner.base_dir.join(LEARNING_DIR)
    }

    pub fn log_path(&self, log: SignalLog) -> PathBuf {
        self.signals_dir().join(log.file_name())
    }

    pub fn stats_path(&self) -> PathBuf {
        self.state_dir().join(STATS_FILE)
    }

    pub fn streak_path(&self) -> PathBuf {
        self.state_dir().join(STREAK_FILE)
    }

    /// Where `capture` looks when no record file is given
    pub fn current_execution_path(&self) -> PathBuf {
        self.state_dir().join(CURRENT_EXECUTION_FILE)
    }

    // ==================== Low-level I/O ====================

    async fn append_line<T: Serialize>(&self, log: SignalLog, record: &T) -> Result<()> {
        let path = self.log_path(log);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let mut line = serde_json::to_string(record)?;
        line.push('\n');

        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;

        tracing::debug!(log = log.file_name(), "appended record");
        Ok(())
    }

    /// Read every parseable record of a log. Missing files read as empty;
    /// lines that fail to parse are skipped.
    pub async fn read_log<T: DeserializeOwned>(&self, log: SignalLog) -> Result<Vec<T>> {
        let path = self.log_path(log);
        let content = match fs::read(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut records = Vec::new();
        for (idx, line) in content.split(|b| *b == b'\n').enumerate() {
            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            // Bytes that are not UTF-8 fail here like any other bad line
            match serde_json::from_slice(line) {
                Ok(record) => records.push(record),
                Err(e) => {
                    tracing::warn!(
                        log = log.file_name(),
                        line = idx + 1,
                        error = %e,
                        "skipping malformed line"
                    );
                }
            }
        }
        Ok(records)
    }

    async fn read_state<T: DeserializeOwned + Default>(&self, path: &Path) -> Result<T> {
        let content = match fs::read(path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(T::default()),
            Err(e) => return Err(e.into()),
        };

        match serde_json::from_slice(&content) {
            Ok(state) => Ok(state),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "unreadable state file, using defaults");
                Ok(T::default())
            }
        }
    }

    async fn write_state<T: Serialize>(&self, path: &Path, state: &T) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_string_pretty(state)?).await?;
        fs::rename(&tmp, path).await?;
        Ok(())
    }

    // ==================== Readers ====================

    pub async fn read_failures(&self) -> Result<Vec<FailureSignal>> {
        self.read_log(SignalLog::Failures).await
    }

    pub async fn read_loopbacks(&self) -> Result<Vec<LoopbackSignal>> {
        self.read_log(SignalLog::Loopbacks).await
    }

    pub async fn read_ratings(&self) -> Result<Vec<RatingSignal>> {
        self.read_log(SignalLog::Ratings).await
    }

    pub async fn read_completions(&self) -> Result<Vec<CompletionSignal>> {
        self.read_log(SignalLog::Completions).await
    }

    pub async fn read_patterns(&self) -> Result<Vec<Pattern>> {
        self.read_log(SignalLog::Patterns).await
    }

    pub async fn read_stats(&self) -> Result<AlgorithmStats> {
        self.read_state(&self.stats_path()).await
    }

    pub async fn read_streak(&self) -> Result<AlgorithmStreak> {
        self.read_state(&self.streak_path()).await
    }

    // ==================== Recording ====================

    /// Append a failure, count it, and break the streak
    #[tracing::instrument(skip(self, signal), level = "debug", fields(work_item = %signal.work_item))]
    pub async fn record_failure(&self, signal: &FailureSignal) -> Result<()> {
        signal.validate()?;
        let _guard = self.inner.write_lock.lock().await;

        self.append_line(SignalLog::Failures, signal).await?;

        let mut stats = self.read_stats().await?;
        let mut streak = self.read_streak().await?;
        stats.apply_failure(signal.timestamp);
        streak.reset(signal.timestamp);
        self.write_state(&self.stats_path(), &stats).await?;
        self.write_state(&self.streak_path(), &streak).await?;
        Ok(())
    }

    #[tracing::instrument(skip(self, signal), level = "debug", fields(work_item = %signal.work_item))]
    pub async fn record_loopback(&self, signal: &LoopbackSignal) -> Result<()> {
        signal.validate()?;
        let _guard = self.inner.write_lock.lock().await;

        self.append_line(SignalLog::Loopbacks, signal).await?;

        let mut stats = self.read_stats().await?;
        stats.apply_loopback(signal.timestamp);
        self.write_state(&self.stats_path(), &stats).await?;
        Ok(())
    }

    /// Append a rating and fold it into the average and streak.
    /// Returns the rating as stored, with its score clamped.
    #[tracing::instrument(skip(self, signal), level = "debug", fields(work_item = %signal.work_item))]
    pub async fn record_rating(&self, signal: &RatingSignal) -> Result<RatingSignal> {
        signal.validate()?;
        let mut signal = signal.clone();
        signal.score = clamp_rating(signal.score as i64);

        let _guard = self.inner.write_lock.lock().await;
        self.append_line(SignalLog::Ratings, &signal).await?;

        let mut stats = self.read_stats().await?;
        let mut streak = self.read_streak().await?;
        stats.apply_rating(signal.score, signal.timestamp);
        streak.apply_rating(signal.score, signal.timestamp);
        self.write_state(&self.stats_path(), &stats).await?;
        self.write_state(&self.streak_path(), &streak).await?;
        Ok(signal)
    }

    /// Append a completion; only a successful one extends the streak
    #[tracing::instrument(skip(self, signal), level = "debug")]
    pub async fn record_completion(&self, signal: &CompletionSignal) -> Result<()> {
        signal.validate()?;
        let _guard = self.inner.write_lock.lock().await;

        self.append_line(SignalLog::Completions, signal).await?;

        let mut stats = self.read_stats().await?;
        stats.apply_completion(signal.iterations, signal.success, signal.timestamp);
        self.write_state(&self.stats_path(), &stats).await?;

        if signal.success {
            let mut streak = self.read_streak().await?;
            streak.extend(signal.timestamp);
            self.write_state(&self.streak_path(), &streak).await?;
        }
        Ok(())
    }

    /// Append the patterns whose id is not yet in the pattern log.
    /// Returns the ones actually written.
    pub async fn append_new_patterns(&self, candidates: Vec<Pattern>) -> Result<Vec<Pattern>> {
        let _guard = self.inner.write_lock.lock().await;

        let mut known: HashSet<String> = self
            .read_patterns()
            .await?
            .into_iter()
            .map(|p| p.id)
            .collect();

        let mut written = Vec::new();
        for pattern in candidates {
            if !known.insert(pattern.id.clone()) {
                tracing::debug!(id = %pattern.id, "pattern already recorded");
                continue;
            }
            self.append_line(SignalLog::Patterns, &pattern).await?;
            written.push(pattern);
        }
        Ok(written)
    }

    // ==================== Learnings ====================

    fn dated_name(timestamp: DateTime<Utc>, id: &str, extension: &str) -> String {
        format!("{}-{}.{}", timestamp.format("%Y-%m-%d"), id, extension)
    }

    /// Persist one learning under its type's bucket
    pub async fn write_learning(&self, learning: &Learning) -> Result<PathBuf> {
        let dir = self.learning_dir().join(learning.learning_type.bucket());
        fs::create_dir_all(&dir).await?;

        let path = dir.join(Self::dated_name(learning.timestamp, &learning.id, "json"));
        fs::write(&path, serde_json::to_string_pretty(learning)?).await?;
        tracing::debug!(path = %path.display(), "wrote learning");
        Ok(path)
    }

    /// Every readable learning across all buckets, oldest first
    pub async fn read_learnings(&self) -> Result<Vec<Learning>> {
        let mut learnings = Vec::new();

        for learning_type in LearningType::ALL {
            let dir = self.learning_dir().join(learning_type.bucket());
            let mut entries = match fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };

            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if path.extension().and_then(|e| e.to_str()) != Some("json") {
                    continue;
                }
                let content = match fs::read(&path).await {
                    Ok(content) => content,
                    Err(e) => {
                        tracing::warn!(path = %path.display(), error = %e, "skipping unreadable learning");
                        continue;
                    }
                };
                match serde_json::from_slice::<Learning>(&content) {
                    Ok(learning) => learnings.push(learning),
                    Err(e) => {
                        tracing::warn!(path = %path.display(), error = %e, "skipping malformed learning");
                    }
                }
            }
        }

        learnings.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.id.cmp(&b.id)));
        Ok(learnings)
    }

    /// Persist a capture's plain-text summary
    pub async fn write_session_summary(
        &self,
        timestamp: DateTime<Utc>,
        id: &str,
        summary: &str,
    ) -> Result<PathBuf> {
        let dir = self.learning_dir().join(SESSIONS_BUCKET);
        fs::create_dir_all(&dir).await?;

        let path = dir.join(Self::dated_name(timestamp, id, "txt"));
        fs::write(&path, summary).await?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pattern::PatternAggregator;
    use tempfile::TempDir;

    fn setup() -> (TempDir, SignalStore) {
        let temp = TempDir::new().unwrap();
        let store = SignalStore::new(temp.path());
        (temp, store)
    }

    #[tokio::test]
    async fn test_empty_store_reads_defaults() {
        let (_temp, store) = setup();

        assert!(store.read_failures().await.unwrap().is_empty());
        assert!(store.read_patterns().await.unwrap().is_empty());
        assert!(store.read_learnings().await.unwrap().is_empty());
        assert_eq!(store.read_stats().await.unwrap(), AlgorithmStats::default());
        assert_eq!(store.read_streak().await.unwrap(), AlgorithmStreak::default());
    }

    #[tokio::test]
    async fn test_failure_round_trip_and_streak_reset() {
        let (_temp, store) = setup();

        for _ in 0..3 {
            store
                .record_completion(&CompletionSignal::new(1, true))
                .await
                .unwrap();
        }
        assert_eq!(store.read_streak().await.unwrap().current, 3);

        let failure = FailureSignal::new("task-1", "verify", "tests pass")
            .with_expected("0 failures")
            .with_observed("2 failures")
            .with_capability("dev.rust");
        store.record_failure(&failure).await.unwrap();

        let streak = store.read_streak().await.unwrap();
        assert_eq!(streak.current, 0);
        assert_eq!(streak.best, 3);

        let stats = store.read_stats().await.unwrap();
        assert_eq!(stats.failed_tasks, 1);

        let stored = store.read_failures().await.unwrap();
        assert_eq!(stored, vec![failure]);
    }

    #[tokio::test]
    async fn test_rating_is_clamped_when_stored() {
        let (_temp, store) = setup();

        let mut high = RatingSignal::new("task-1", 5);
        high.score = 7;
        let stored = store.record_rating(&high).await.unwrap();
        assert_eq!(stored.score, 5);

        store.record_rating(&RatingSignal::new("task-2", 0)).await.unwrap();

        let ratings = store.read_ratings().await.unwrap();
        assert_eq!(ratings.iter().map(|r| r.score).collect::<Vec<_>>(), vec![5, 1]);
    }

    #[tokio::test]
    async fn test_two_good_ratings_build_streak() {
        let (_temp, store) = setup();

        store.record_rating(&RatingSignal::new("a", 4)).await.unwrap();
        store.record_rating(&RatingSignal::new("b", 4)).await.unwrap();

        let streak = store.read_streak().await.unwrap();
        let stats = store.read_stats().await.unwrap();
        assert_eq!(streak.current, 2);
        assert_eq!(stats.rating_count, 2);
        assert!((stats.avg_rating - 4.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_unsuccessful_completion_keeps_streak() {
        let (_temp, store) = setup();

        store.record_completion(&CompletionSignal::new(1, true)).await.unwrap();
        store.record_completion(&CompletionSignal::new(4, false)).await.unwrap();

        let stats = store.read_stats().await.unwrap();
        assert_eq!(stats.total_tasks, 2);
        assert_eq!(stats.completed_tasks, 1);
        assert_eq!(stats.total_iterations, 5);
        assert_eq!(store.read_streak().await.unwrap().current, 1);
    }

    #[tokio::test]
    async fn test_loopback_counts() {
        let (_temp, store) = setup();
        store
            .record_loopback(&LoopbackSignal::new("a", "verify", "build").with_reason("flaky test"))
            .await
            .unwrap();

        assert_eq!(store.read_stats().await.unwrap().total_loopbacks, 1);
        assert_eq!(store.read_loopbacks().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_invalid_signal_writes_nothing() {
        let (_temp, store) = setup();

        let err = store
            .record_failure(&FailureSignal::new("", "verify", "tests pass"))
            .await
            .unwrap_err();
        assert!(matches!(err, crate::Error::InvalidField { .. }));
        assert!(!store.log_path(SignalLog::Failures).exists());
        assert!(!store.stats_path().exists());
    }

    #[tokio::test]
    async fn test_malformed_lines_are_skipped() {
        let (_temp, store) = setup();
        store
            .record_failure(&FailureSignal::new("a", "verify", "tests pass"))
            .await
            .unwrap();

        let path = store.log_path(SignalLog::Failures);
        let mut content = fs::read_to_string(&path).await.unwrap();
        content.push_str("{not json\n\n");
        fs::write(&path, content).await.unwrap();
        store
            .record_failure(&FailureSignal::new("b", "verify", "tests pass"))
            .await
            .unwrap();

        assert_eq!(store.read_failures().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_non_utf8_lines_are_skipped() {
        let (_temp, store) = setup();
        store
            .record_failure(&FailureSignal::new("a", "verify", "tests pass"))
            .await
            .unwrap();

        let path = store.log_path(SignalLog::Failures);
        let mut content = fs::read(&path).await.unwrap();
        content.extend_from_slice(b"\xff\xfe garbage\n");
        fs::write(&path, content).await.unwrap();
        store
            .record_failure(&FailureSignal::new("b", "verify", "tests pass"))
            .await
            .unwrap();

        let failures = store.read_failures().await.unwrap();
        assert_eq!(failures.len(), 2);
        assert_eq!(failures[1].work_item, "b");

        let written = PatternAggregator::new().analyze(&store).await.unwrap();
        assert_eq!(written.len(), 1);
        assert_eq!(written[0].frequency, 2);
    }

    #[tokio::test]
    async fn test_non_utf8_learning_file_is_skipped() {
        let (_temp, store) = setup();
        let dir = store.learning_dir().join(LearningType::General.bucket());
        fs::create_dir_all(&dir).await.unwrap();
        fs::write(dir.join("2026-01-01-bad.json"), b"\xff\xfe{}").await.unwrap();

        assert!(store.read_learnings().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_state_reads_as_default() {
        let (_temp, store) = setup();
        fs::create_dir_all(store.state_dir()).await.unwrap();
        fs::write(store.stats_path(), "garbage").await.unwrap();

        assert_eq!(store.read_stats().await.unwrap(), AlgorithmStats::default());
    }

    #[tokio::test]
    async fn test_append_new_patterns_skips_known_ids() {
        let (_temp, store) = setup();
        let failures = vec![
            FailureSignal::new("a", "verify", "tests pass"),
            FailureSignal::new("b", "verify", "tests pass"),
        ];
        let candidates = PatternAggregator::new().detect(&failures, &[]);

        let first = store.append_new_patterns(candidates.clone()).await.unwrap();
        let second = store.append_new_patterns(candidates).await.unwrap();

        assert_eq!(first.len(), 1);
        assert!(second.is_empty());
        assert_eq!(store.read_patterns().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_ratings_are_not_lost() {
        let (_temp, store) = setup();

        let mut handles = Vec::new();
        for i in 0..10 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .record_rating(&RatingSignal::new(format!("task-{}", i), 5))
                    .await
                    .unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let stats = store.read_stats().await.unwrap();
        assert_eq!(stats.rating_count, 10);
        assert_eq!(store.read_streak().await.unwrap().current, 10);
    }
}
