//! The ledger seam — append-only persistence of emitted events.
//!
//! The ledger is an external collaborator; this module defines its contract,
//! a retry-with-backoff wrapper, and an in-memory implementation used by
//! tests. Losing an event breaks resumability, so writes are retried before
//! a failure is surfaced; exhaustion is then the caller's to tolerate
//! (degraded mode), never an automatic abort.

use std::collections::VecDeque;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use super::types::EventRecord;

/// Error from a ledger write.
#[derive(Debug, Clone, thiserror::Error)]
pub enum LedgerError {
    #[error("ledger write failed: {0}")]
    WriteFailed(String),

    #[error("ledger write retries exhausted after {attempts} attempts: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },
}

/// Append-only event persistence, called once per emitted event
/// (bookkeeping events included).
#[async_trait]
pub trait LedgerWriter: Send + Sync {
    async fn write(&self, record: &EventRecord) -> Result<(), LedgerError>;
}

/// Shared reference to a ledger writer.
pub type SharedLedger = Arc<dyn LedgerWriter>;

/// Retry policy for [`RetryingLedger`].
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_backoff: Duration::from_millis(50),
        }
    }
}

/// Wraps any ledger writer with bounded exponential backoff and a
/// best-effort side cache of recent records.
///
/// The cache records every attempted write, including ones whose retries
/// were exhausted, so the surrounding service can repair the ledger
/// out-of-band after a degraded run.
pub struct RetryingLedger<W> {
    inner: W,
    policy: RetryPolicy,
    cache: Mutex<VecDeque<EventRecord>>,
    cache_capacity: usize,
}

impl<W: LedgerWriter> RetryingLedger<W> {
    pub fn new(inner: W) -> Self {
        Self::with_policy(inner, RetryPolicy::default())
    }

    pub fn with_policy(inner: W, policy: RetryPolicy) -> Self {
        Self {
            inner,
            policy,
            cache: Mutex::new(VecDeque::new()),
            cache_capacity: 256,
        }
    }

    /// Recent records seen by this writer, oldest first.
    pub fn recent(&self) -> Vec<EventRecord> {
        self.cache
            .lock()
            .expect("ledger cache poisoned")
            .iter()
            .cloned()
            .collect()
    }

    pub fn inner(&self) -> &W {
        &self.inner
    }

    fn cache_push(&self, record: &EventRecord) {
        let mut cache = self.cache.lock().expect("ledger cache poisoned");
        if cache.len() == self.cache_capacity {
            cache.pop_front();
        }
        cache.push_back(record.clone());
    }
}

#[async_trait]
impl<W: LedgerWriter> LedgerWriter for RetryingLedger<W> {
    async fn write(&self, record: &EventRecord) -> Result<(), LedgerError> {
        self.cache_push(record);

        let mut last_error = String::new();
        for attempt in 1..=self.policy.max_attempts {
            match self.inner.write(record).await {
                Ok(()) => {
                    if attempt > 1 {
                        debug!(
                            sequence_id = record.sequence_id,
                            attempt, "ledger write succeeded after retry"
                        );
                    }
                    return Ok(());
                }
                Err(e) => {
                    last_error = e.to_string();
                    if attempt < self.policy.max_attempts {
                        let backoff = self.policy.base_backoff * 2u32.pow(attempt - 1);
                        warn!(
                            sequence_id = record.sequence_id,
                            attempt,
                            backoff_ms = backoff.as_millis() as u64,
                            error = %last_error,
                            "ledger write failed; backing off"
                        );
                        tokio::time::sleep(backoff).await;
                    }
                }
            }
        }

        Err(LedgerError::RetriesExhausted {
            attempts: self.policy.max_attempts,
            last_error,
        })
    }
}

/// Append-only JSONL file ledger, one record per line. Suited to local
/// tooling and embedded deployments; a service would back this trait with
/// its relational store instead.
pub struct JsonlLedger {
    path: PathBuf,
    // Serializes appends so interleaved writes cannot tear a line.
    lock: Mutex<()>,
}

impl JsonlLedger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the full history back, in file order. Unreadable lines are
    /// skipped at the normalization boundary, not fatal.
    pub fn read_all(&self) -> Result<Vec<EventRecord>, LedgerError> {
        let file = match std::fs::File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(LedgerError::WriteFailed(e.to_string())),
        };
        let mut records = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line.map_err(|e| LedgerError::WriteFailed(e.to_string()))?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<serde_json::Value>(&line) {
                Ok(value) => {
                    if let Some(record) = EventRecord::from_value(&value) {
                        records.push(record);
                    }
                }
                Err(e) => warn!(error = %e, "skipping unparseable ledger line"),
            }
        }
        Ok(records)
    }
}

#[async_trait]
impl LedgerWriter for JsonlLedger {
    async fn write(&self, record: &EventRecord) -> Result<(), LedgerError> {
        let line =
            serde_json::to_string(record).map_err(|e| LedgerError::WriteFailed(e.to_string()))?;
        let _guard = self.lock.lock().expect("ledger lock poisoned");
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| LedgerError::WriteFailed(e.to_string()))?;
        writeln!(file, "{line}").map_err(|e| LedgerError::WriteFailed(e.to_string()))?;
        Ok(())
    }
}

/// In-memory ledger used by tests and local tooling. Supports injecting a
/// number of leading write failures to exercise retry and degraded paths.
#[derive(Default)]
pub struct MemoryLedger {
    records: Mutex<Vec<EventRecord>>,
    fail_next: AtomicU32,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` writes fail.
    pub fn fail_next(&self, n: u32) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    pub fn records(&self) -> Vec<EventRecord> {
        self.records.lock().expect("ledger poisoned").clone()
    }

    pub fn len(&self) -> usize {
        self.records.lock().expect("ledger poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl LedgerWriter for MemoryLedger {
    async fn write(&self, record: &EventRecord) -> Result<(), LedgerError> {
        let remaining = self.fail_next.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_next.store(remaining - 1, Ordering::SeqCst);
            return Err(LedgerError::WriteFailed("injected failure".to_string()));
        }
        self.records
            .lock()
            .expect("ledger poisoned")
            .push(record.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::debate::phase::DebatePhase;
    use crate::events::types::EventPayload;

    fn record(seq: u64) -> EventRecord {
        EventRecord::new(seq, "s-1", DebatePhase::Research, EventPayload::PhaseStarted)
    }

    #[tokio::test]
    async fn test_memory_ledger_appends() {
        let ledger = MemoryLedger::new();
        ledger.write(&record(1)).await.unwrap();
        ledger.write(&record(2)).await.unwrap();
        assert_eq!(ledger.len(), 2);
        assert_eq!(ledger.records()[1].sequence_id, 2);
    }

    #[tokio::test]
    async fn test_retrying_ledger_recovers_from_transient_failures() {
        let inner = MemoryLedger::new();
        inner.fail_next(2);
        let ledger = RetryingLedger::with_policy(
            inner,
            RetryPolicy {
                max_attempts: 3,
                base_backoff: Duration::from_millis(1),
            },
        );

        ledger.write(&record(1)).await.unwrap();
        assert_eq!(ledger.inner().len(), 1);
        assert_eq!(ledger.recent().len(), 1);
    }

    #[tokio::test]
    async fn test_retrying_ledger_exhausts() {
        let inner = MemoryLedger::new();
        inner.fail_next(10);
        let ledger = RetryingLedger::with_policy(
            inner,
            RetryPolicy {
                max_attempts: 2,
                base_backoff: Duration::from_millis(1),
            },
        );

        let err = ledger.write(&record(1)).await.unwrap_err();
        assert!(matches!(
            err,
            LedgerError::RetriesExhausted { attempts: 2, .. }
        ));
        // Side cache still holds the record for out-of-band repair.
        assert_eq!(ledger.recent().len(), 1);
        assert!(ledger.inner().is_empty());
    }

    #[tokio::test]
    async fn test_jsonl_ledger_roundtrip() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let ledger = JsonlLedger::new(dir.path().join("events.jsonl"));
        ledger.write(&record(1)).await?;
        ledger.write(&record(2)).await?;

        let records = ledger.read_all()?;
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].sequence_id, 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_jsonl_ledger_missing_file_is_empty() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let ledger = JsonlLedger::new(dir.path().join("never-written.jsonl"));
        assert!(ledger.read_all()?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_jsonl_ledger_skips_corrupt_lines() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("events.jsonl");
        let ledger = JsonlLedger::new(&path);
        ledger.write(&record(1)).await?;
        std::fs::OpenOptions::new()
            .append(true)
            .open(&path)?
            .write_all(b"not json\n")?;
        ledger.write(&record(2)).await?;

        let records = ledger.read_all()?;
        assert_eq!(records.len(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_side_cache_bounded() {
        let ledger = RetryingLedger::new(MemoryLedger::new());
        for seq in 1..=300 {
            ledger.write(&record(seq)).await.unwrap();
        }
        let recent = ledger.recent();
        assert_eq!(recent.len(), 256);
        assert_eq!(recent.first().unwrap().sequence_id, 45);
        assert_eq!(recent.last().unwrap().sequence_id, 300);
    }
}
