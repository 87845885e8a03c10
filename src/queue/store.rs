use chrono::{DateTime, Utc};
use fjall::{Config, Keyspace, PartitionCreateOptions, PartitionHandle};
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions, TryLockError};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Fjall error: {0}")]
    Fjall(#[from] fjall::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Queue directory {0} is in use by another process")]
    Locked(PathBuf),

    #[error("Dead-letter record codec error: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("Message not found: seq={0}")]
    MessageNotFound(u64),

    #[error("Invalid queue name '{0}': use only letters, digits, '_' and '-'")]
    InvalidQueueName(String),

    #[error("Broker is closed")]
    Closed,
}

pub type Result<T> = std::result::Result<T, QueueError>;

/// A message that was retired because it could not be processed
///
/// Dead letters are kept for operator inspection only and are never
/// redelivered by the broker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetter {
    pub seq: u64,
    pub body: String,
    pub failure_code: String,
    pub failure_message: String,
    pub failed_at: DateTime<Utc>,
}

/// FjallQueue persists the messages of one named queue using Fjall
///
/// Architecture:
/// - `<name>_messages` partition: u64 (big-endian) → raw message body
/// - `<name>_inflight` partition: u64 (big-endian) → empty marker, set while delivered
/// - `<name>_dead` partition: u64 (big-endian) → DeadLetter (JSON)
/// - `<name>_meta` partition: "next_seq" → u64 counter
///
/// A message stays in `messages` until it is acknowledged, so anything not
/// acknowledged before a crash is found again on the next open.
///
/// Sequence numbers and the ready list live in this process only, so the
/// directory is held under an exclusive file lock for as long as the queue
/// is open. A second open, from this process or another, fails with
/// [`QueueError::Locked`].
pub struct FjallQueue {
    name: String,
    keyspace: Keyspace,
    messages: PartitionHandle,
    inflight: PartitionHandle,
    dead: PartitionHandle,
    metadata: PartitionHandle,
    seq_counter: AtomicU64,
    // Released when dropped, after the keyspace
    _lock: File,
}

const LOCK_FILE: &str = "crowdcount.lock";

impl FjallQueue {
    /// Open or create the queue `name` inside the keyspace at `path`
    pub fn open<P: AsRef<Path>>(path: P, name: &str) -> Result<Self> {
        if !is_valid_queue_name(name) {
            return Err(QueueError::InvalidQueueName(name.to_string()));
        }

        let path = path.as_ref();
        info!(queue = name, "Opening FjallQueue at: {}", path.display());

        let lock = lock_directory(path)?;
        let keyspace = Config::new(path).open()?;

        let messages =
            keyspace.open_partition(&format!("{name}_messages"), PartitionCreateOptions::default())?;
        let inflight =
            keyspace.open_partition(&format!("{name}_inflight"), PartitionCreateOptions::default())?;
        let dead =
            keyspace.open_partition(&format!("{name}_dead"), PartitionCreateOptions::default())?;
        let metadata =
            keyspace.open_partition(&format!("{name}_meta"), PartitionCreateOptions::default())?;

        let current_seq = metadata
            .get(b"next_seq")?
            .map(|bytes| u64::from_be_bytes(bytes.as_ref().try_into().unwrap_or([0u8; 8])))
            .unwrap_or(0);

        info!(queue = name, current_seq, "FjallQueue opened");

        Ok(Self {
            name: name.to_string(),
            keyspace,
            messages,
            inflight,
            dead,
            metadata,
            seq_counter: AtomicU64::new(current_seq),
            _lock: lock,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Append a message body and return its sequence number
    pub fn append(&self, body: &[u8]) -> Result<u64> {
        let seq = self.seq_counter.fetch_add(1, Ordering::SeqCst);

        self.messages.insert(seq.to_be_bytes(), body)?;
        self.metadata.insert(b"next_seq", (seq + 1).to_be_bytes())?;

        debug!(queue = %self.name, seq, size = body.len(), "Message appended");

        Ok(seq)
    }

    pub fn get(&self, seq: u64) -> Result<Option<Vec<u8>>> {
        Ok(self.messages.get(seq.to_be_bytes())?.map(|bytes| bytes.to_vec()))
    }

    /// Remove an acknowledged message
    pub fn remove(&self, seq: u64) -> Result<()> {
        self.messages.remove(seq.to_be_bytes())?;
        self.inflight.remove(seq.to_be_bytes())?;
        Ok(())
    }

    pub fn mark_inflight(&self, seq: u64) -> Result<()> {
        self.inflight.insert(seq.to_be_bytes(), b"")?;
        Ok(())
    }

    pub fn was_inflight(&self, seq: u64) -> Result<bool> {
        Ok(self.inflight.contains_key(seq.to_be_bytes())?)
    }

    /// Sequence numbers of all stored (unacknowledged) messages, oldest first
    pub fn pending(&self) -> Result<Vec<u64>> {
        let mut seqs = Vec::new();
        for item in self.messages.keys() {
            let key = item?;
            seqs.push(decode_seq(&key));
        }
        Ok(seqs)
    }

    /// Copy a message into the dead-letter partition
    pub fn record_dead_letter(
        &self,
        seq: u64,
        failure_code: &str,
        failure_message: &str,
    ) -> Result<()> {
        let body = self.get(seq)?.ok_or(QueueError::MessageNotFound(seq))?;

        let record = DeadLetter {
            seq,
            body: String::from_utf8_lossy(&body).into_owned(),
            failure_code: failure_code.to_string(),
            failure_message: failure_message.to_string(),
            failed_at: Utc::now(),
        };

        self.dead.insert(seq.to_be_bytes(), serde_json::to_vec(&record)?)?;

        info!(queue = %self.name, seq, failure_code, "Message recorded as dead letter");

        Ok(())
    }

    pub fn get_dead_letter(&self, seq: u64) -> Result<Option<DeadLetter>> {
        match self.dead.get(seq.to_be_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// List dead letters (for debugging/inspection)
    pub fn list_dead_letters(&self, limit: usize) -> Result<Vec<DeadLetter>> {
        let mut results = Vec::new();

        for item in self.dead.iter().take(limit) {
            let (_, value) = item?;
            results.push(serde_json::from_slice(&value)?);
        }

        Ok(results)
    }

    pub fn dead_letter_count(&self) -> Result<usize> {
        Ok(self.dead.len()?)
    }

    pub fn current_seq(&self) -> u64 {
        self.seq_counter.load(Ordering::SeqCst)
    }

    /// Flush all writes to disk
    pub fn flush(&self) -> Result<()> {
        self.keyspace.persist(fjall::PersistMode::SyncAll)?;
        Ok(())
    }
}

/// Take the exclusive lock on `<path>/crowdcount.lock`, creating it if needed
fn lock_directory(path: &Path) -> Result<File> {
    fs::create_dir_all(path)?;

    let file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(path.join(LOCK_FILE))?;

    match file.try_lock() {
        Ok(()) => Ok(file),
        Err(TryLockError::WouldBlock) => Err(QueueError::Locked(path.to_path_buf())),
        Err(TryLockError::Error(e)) => Err(QueueError::Io(e)),
    }
}

fn decode_seq(key: &[u8]) -> u64 {
    u64::from_be_bytes(key.try_into().unwrap_or([0u8; 8]))
}

pub fn is_valid_queue_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}
