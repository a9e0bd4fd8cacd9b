//! Append-only borrow/return ledger
//!
//! Records are stored as JSON Lines, one [`HistoryEvent`] per line. Every
//! append is flushed and synced before it returns, and a failed append is
//! truncated away so a later load never sees half a record.

use std::io;
use std::path::{Path, PathBuf};
#[cfg(test)]
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;

use crate::models::HistoryEvent;

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to encode record: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Malformed record at line {line}: {reason}")]
    Malformed { line: usize, reason: String },

    #[error("Inconsistent history: {0}")]
    Corrupt(String),
}

/// Durable, ordered storage of history events
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Read every stored event in append order. An absent store is an empty history.
    async fn load_history(&self) -> Result<Vec<HistoryEvent>, LedgerError>;

    /// Durably append one event. Either the whole record is stored or none of it.
    async fn append(&self, event: &HistoryEvent) -> Result<(), LedgerError>;
}

/// Decode ledger contents. Returns the events and, if the last line was cut
/// short by a crash, the byte length of the complete prefix.
pub fn decode_records(content: &[u8]) -> Result<(Vec<HistoryEvent>, Option<u64>), LedgerError> {
    let (complete, torn_at) = match content.iter().rposition(|b| *b == b'\n') {
        Some(last) if last + 1 == content.len() => (content, None),
        Some(last) => (&content[..=last], Some(last as u64 + 1)),
        None if content.is_empty() => (content, None),
        None => (&content[..0], Some(0)),
    };

    let mut events = Vec::new();
    let Some(body) = complete.strip_suffix(b"\n") else {
        return Ok((events, torn_at));
    };

    for (index, raw) in body.split(|b| *b == b'\n').enumerate() {
        let line = index + 1;
        let event: HistoryEvent =
            serde_json::from_slice(raw).map_err(|e| LedgerError::Malformed {
                line,
                reason: e.to_string(),
            })?;
        event
            .check_shape()
            .map_err(|reason| LedgerError::Malformed { line, reason })?;
        events.push(event);
    }

    Ok((events, torn_at))
}

/// Encode one event as a newline-terminated record
pub fn encode_record(event: &HistoryEvent) -> Result<Vec<u8>, LedgerError> {
    let mut line = serde_json::to_vec(event)?;
    line.push(b'\n');
    Ok(line)
}

/// Ledger stored in a JSON Lines file
pub struct FileLedger {
    path: PathBuf,
    file: tokio::sync::Mutex<File>,
}

impl FileLedger {
    /// Open (or create) the ledger file, creating parent directories as needed
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, LedgerError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;

        tracing::debug!("Opened borrow ledger at {}", path.display());

        Ok(Self {
            path,
            file: tokio::sync::Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// File operations an append is made of
#[async_trait]
trait RecordFile: Send {
    async fn current_len(&mut self) -> io::Result<u64>;

    /// Write the whole record and sync it to disk
    async fn write_synced(&mut self, record: &[u8]) -> io::Result<()>;

    async fn truncate(&mut self, len: u64) -> io::Result<()>;
}

#[async_trait]
impl RecordFile for File {
    async fn current_len(&mut self) -> io::Result<u64> {
        Ok(self.metadata().await?.len())
    }

    async fn write_synced(&mut self, record: &[u8]) -> io::Result<()> {
        self.write_all(record).await?;
        self.flush().await?;
        self.sync_data().await
    }

    async fn truncate(&mut self, len: u64) -> io::Result<()> {
        self.set_len(len).await?;
        self.sync_data().await
    }
}

/// Append one record; on failure cut the file back to its previous length
async fn append_record<F: RecordFile + ?Sized>(
    file: &mut F,
    record: &[u8],
    path: &Path,
) -> io::Result<()> {
    let len_before = file.current_len().await?;

    if let Err(e) = file.write_synced(record).await {
        if let Err(truncate_err) = file.truncate(len_before).await {
            tracing::error!(
                "Failed to roll back partial ledger record in {}: {}",
                path.display(),
                truncate_err
            );
        }
        return Err(e);
    }
    Ok(())
}

#[async_trait]
impl LedgerStore for FileLedger {
    async fn load_history(&self) -> Result<Vec<HistoryEvent>, LedgerError> {
        let file = self.file.lock().await;

        let content = match tokio::fs::read(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::info!(
                    "Borrow history file not found at path: {}. Starting empty.",
                    self.path.display()
                );
                return Ok(Vec::new());
            }
            Err(e) => return Err(e.into()),
        };

        let (events, torn_at) = decode_records(&content)?;

        if let Some(valid_len) = torn_at {
            tracing::warn!(
                "Discarding incomplete trailing record in {} ({} bytes)",
                self.path.display(),
                content.len() as u64 - valid_len
            );
            file.set_len(valid_len).await?;
            file.sync_data().await?;
        }

        tracing::info!("Loaded {} borrow records from history", events.len());
        Ok(events)
    }

    async fn append(&self, event: &HistoryEvent) -> Result<(), LedgerError> {
        let record = encode_record(event)?;
        let mut file = self.file.lock().await;
        append_record(&mut *file, &record, &self.path).await?;

        tracing::debug!(
            user_id = %event.user_id,
            item_id = %event.item_id,
            action = ?event.action,
            "Borrow record appended"
        );
        Ok(())
    }
}

/// In-memory ledger; nothing outlives the process
#[derive(Default)]
pub struct MemoryLedger {
    events: Mutex<Vec<HistoryEvent>>,
    #[cfg(test)]
    failing_appends: AtomicUsize,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_events(events: Vec<HistoryEvent>) -> Self {
        let ledger = Self::default();
        *ledger.events.lock() = events;
        ledger
    }

    /// Make the next `count` appends fail with an I/O error
    #[cfg(test)]
    pub fn fail_next_appends(&self, count: usize) {
        self.failing_appends.store(count, Ordering::SeqCst);
    }

    pub fn events(&self) -> Vec<HistoryEvent> {
        self.events.lock().clone()
    }

    #[cfg(test)]
    fn take_injected_failure(&self) -> bool {
        self.failing_appends
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    #[cfg(not(test))]
    fn take_injected_failure(&self) -> bool {
        false
    }
}

#[async_trait]
impl LedgerStore for MemoryLedger {
    async fn load_history(&self) -> Result<Vec<HistoryEvent>, LedgerError> {
        Ok(self.events())
    }

    async fn append(&self, event: &HistoryEvent) -> Result<(), LedgerError> {
        if self.take_injected_failure() {
            return Err(LedgerError::Io(io::Error::new(
                io::ErrorKind::Other,
                "injected append failure",
            )));
        }

        self.events.lock().push(event.clone());
        Ok(())
    }
}
