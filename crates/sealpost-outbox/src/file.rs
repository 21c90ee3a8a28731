//! File-backed outbox.
//!
//! The whole outbox is one file of CRC-framed records. Every mutation
//! rewrites it:
//!
//! 1. encode all records into `<file>.tmp`
//! 2. `fsync` the temp file
//! 3. rename it over `<file>`
//! 4. `fsync` the directory
//!
//! A crash at any step leaves either the previous or the new outbox on disk.
//! The in-memory copy is only updated once the rename has succeeded.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use bytes::Bytes;
use tracing::{debug, info};

use sealpost_types::{ConversationId, MessageId, MessagePlaintext, OutboxId};

use crate::frame::{decode_file, encode_file};
use crate::{
    FailureKind, OutboxError, OutboxRecord, OutboxResult, OutboxStore, RecordSet, RecordState,
};

/// An [`OutboxStore`] persisted to a single file.
#[derive(Debug)]
pub struct FileOutbox {
    path: PathBuf,
    records: Mutex<RecordSet>,
}

impl FileOutbox {
    /// Opens the outbox at `path`, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// - [`OutboxError::Io`] if the file exists but cannot be read
    /// - [`OutboxError::Corrupted`], [`OutboxError::TornWrite`] or
    ///   [`OutboxError::UnexpectedEof`] if a frame fails validation
    pub fn open(path: impl AsRef<Path>) -> OutboxResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let records = match fs::read(&path) {
            Ok(data) => decode_file(&Bytes::from(data))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };

        info!(path = %path.display(), records = records.len(), "outbox opened");

        Ok(Self {
            path,
            records: Mutex::new(RecordSet::from_records(records)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(".tmp");
        PathBuf::from(name)
    }

    fn persist(&self, set: &RecordSet) -> OutboxResult<()> {
        let encoded = encode_file(set.records())?;
        let temp_path = self.temp_path();

        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&temp_path)?;
        file.write_all(&encoded)?;
        file.sync_all()?;
        drop(file);

        fs::rename(&temp_path, &self.path)?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            // Directory fsync is not supported everywhere; the rename itself
            // has already happened.
            if let Err(e) = File::open(parent).and_then(|dir| dir.sync_all()) {
                debug!(error = %e, "directory sync skipped");
            }
        }

        debug!(
            path = %self.path.display(),
            records = set.len(),
            bytes = encoded.len(),
            "outbox persisted"
        );
        Ok(())
    }

    fn read<R>(&self, f: impl FnOnce(&RecordSet) -> R) -> OutboxResult<R> {
        let records = self
            .records
            .lock()
            .map_err(|_| OutboxError::LockPoisoned)?;
        Ok(f(&records))
    }

    /// Applies `f` to a copy of the records and persists the copy before
    /// swapping it in.
    fn mutate<R>(&self, f: impl FnOnce(&mut RecordSet) -> OutboxResult<R>) -> OutboxResult<R> {
        let mut records = self
            .records
            .lock()
            .map_err(|_| OutboxError::LockPoisoned)?;
        let mut next = records.clone();
        let result = f(&mut next)?;
        self.persist(&next)?;
        *records = next;
        Ok(result)
    }
}

impl OutboxStore for FileOutbox {
    fn push(
        &self,
        conv_id: ConversationId,
        plaintext: MessagePlaintext,
        prev_hint: MessageId,
    ) -> OutboxResult<OutboxRecord> {
        let record = self.mutate(|set| set.push(conv_id, plaintext, prev_hint))?;
        debug!(outbox_id = %record.outbox_id, conv_id = %conv_id, "outbox record stored");
        Ok(record)
    }

    fn pull_all(&self) -> OutboxResult<Vec<OutboxRecord>> {
        self.read(|set| set.records().to_vec())
    }

    fn pull_conversation(&self, conv_id: ConversationId) -> OutboxResult<Vec<OutboxRecord>> {
        self.read(|set| set.pull_conversation(conv_id))
    }

    fn pop_oldest(&self, n: usize) -> OutboxResult<Vec<OutboxRecord>> {
        self.mutate(|set| Ok(set.pop_oldest(n)))
    }

    fn remove(&self, outbox_id: &OutboxId) -> OutboxResult<Option<OutboxRecord>> {
        if self.read(|set| set.get(outbox_id).is_none())? {
            return Ok(None);
        }
        self.mutate(|set| Ok(set.remove(outbox_id)))
    }

    fn set_state(&self, outbox_id: &OutboxId, state: RecordState) -> OutboxResult<OutboxRecord> {
        self.mutate(|set| set.set_state(outbox_id, state))
    }

    fn record_failed_attempt(
        &self,
        outbox_id: &OutboxId,
        max_attempts: u32,
        message: &str,
    ) -> OutboxResult<OutboxRecord> {
        self.mutate(|set| set.record_failed_attempt(outbox_id, max_attempts, message))
    }

    fn mark_conversation_as_error(
        &self,
        conv_id: ConversationId,
        kind: FailureKind,
        message: &str,
    ) -> OutboxResult<Vec<OutboxRecord>> {
        self.mutate(|set| Ok(set.mark_conversation_as_error(conv_id, kind, message)))
    }
}
