//! Local File Retry Storage
//!
//! A directory-backed queue of batches waiting for redelivery. Every batch is
//! one file holding line-delimited JSON envelopes. The file name encodes the
//! record's state:
//!
//! ```text
//! <stamp>-<rand>.tmp                     write in progress
//! <stamp>-<rand>.blob                    eligible for retry
//! <stamp>-<rand>.blob@<deadline>.lock    hidden until <deadline>
//! ```
//!
//! `<stamp>` is the creation time and `<deadline>` a lease expiry, both in a
//! fixed-width UTC format, so a lexical sort of the directory is oldest-first
//! and a lease can be checked by comparing strings.
//!
//! # Concurrency
//!
//! The directory is the only shared state. Writers create a `.tmp` file and
//! rename it into place; readers claim a record by renaming it to a fresh
//! lease. `rename` is atomic, so when two readers (threads or processes) race
//! for the same record exactly one rename succeeds and the loser sees
//! `NotFound` and moves on. A reader that fails to redeliver a record does
//! nothing: its lease lapses and the record becomes eligible again.

use crate::config::StorageOptions;
use crate::envelope::Envelope;
use crate::error::StorageError;
use chrono::{DateTime, NaiveDateTime, TimeDelta, Utc};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

const STAMP_FORMAT: &str = "%Y-%m-%dT%H%M%S%.6f";
const TEMP_SUFFIX: &str = ".tmp";
const BLOB_SUFFIX: &str = ".blob";
const LOCK_SUFFIX: &str = ".lock";

fn stamp(time: DateTime<Utc>) -> String {
    time.format(STAMP_FORMAT).to_string()
}

fn after(time: DateTime<Utc>, delay: Duration) -> DateTime<Utc> {
    TimeDelta::from_std(delay)
        .ok()
        .and_then(|delta| time.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

fn before(time: DateTime<Utc>, delay: Duration) -> DateTime<Utc> {
    TimeDelta::from_std(delay)
        .ok()
        .and_then(|delta| time.checked_sub_signed(delta))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// State of a directory entry, derived from its name.
#[derive(Debug, PartialEq, Eq)]
enum RecordName<'a> {
    Temp,
    Ready { blob: &'a str },
    Leased { blob: &'a str, deadline: &'a str },
    Foreign,
}

impl<'a> RecordName<'a> {
    fn parse(name: &'a str) -> Self {
        if name.ends_with(TEMP_SUFFIX) {
            return Self::Temp;
        }
        if let Some(leased) = name.strip_suffix(LOCK_SUFFIX) {
            return match leased.rsplit_once('@') {
                Some((blob, deadline)) if blob.ends_with(BLOB_SUFFIX) => {
                    Self::Leased { blob, deadline }
                }
                _ => Self::Foreign,
            };
        }
        if name.ends_with(BLOB_SUFFIX) {
            return Self::Ready { blob: name };
        }
        Self::Foreign
    }
}

/// Creation time encoded in a blob name.
fn created_at(blob: &str) -> Option<DateTime<Utc>> {
    let (created, _) = blob.strip_suffix(BLOB_SUFFIX)?.rsplit_once('-')?;
    NaiveDateTime::parse_from_str(created, STAMP_FORMAT)
        .ok()
        .map(|naive| naive.and_utc())
}

/// A batch claimed from storage by [`LocalFileStorage::get`].
///
/// While held, the record is invisible to other readers until its claim
/// lease expires.
#[derive(Debug)]
pub struct PendingBatch {
    path: PathBuf,
    name: String,
    created_at: Option<DateTime<Utc>>,
    envelopes: Vec<Envelope>,
}

impl PendingBatch {
    /// Name of the record, without its lease suffix.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// When the batch was first persisted.
    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }

    pub fn envelopes(&self) -> &[Envelope] {
        &self.envelopes
    }

    pub fn len(&self) -> usize {
        self.envelopes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.envelopes.is_empty()
    }
}

/// Retry storage rooted at one directory.
#[derive(Debug)]
pub struct LocalFileStorage {
    path: PathBuf,
    options: StorageOptions,
}

impl LocalFileStorage {
    /// Opens the storage, creating the directory if needed.
    pub fn new(path: impl Into<PathBuf>, options: StorageOptions) -> Result<Self, StorageError> {
        let path = path.into();
        std::fs::create_dir_all(&path).map_err(|e| StorageError::io(&path, e))?;
        Ok(Self { path, options })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn options(&self) -> &StorageOptions {
        &self.options
    }

    /// Persists a batch and returns the record name.
    ///
    /// The record stays hidden for `minimum_retry_interval` so a batch that
    /// just failed is not retried in a tight loop.
    pub async fn put(&self, envelopes: &[Envelope]) -> Result<String, StorageError> {
        let mut content = String::new();
        for envelope in envelopes {
            content.push_str(&serde_json::to_string(envelope)?);
            content.push('\n');
        }

        let now = Utc::now();
        let base = format!("{}-{:08x}", stamp(now), rand::random::<u32>());
        let temp_path = self.path.join(format!("{base}{TEMP_SUFFIX}"));
        tokio::fs::write(&temp_path, content)
            .await
            .map_err(|e| StorageError::io(&temp_path, e))?;

        let cooldown = self.options.minimum_retry_interval;
        let name = if cooldown.is_zero() {
            format!("{base}{BLOB_SUFFIX}")
        } else {
            format!("{base}{BLOB_SUFFIX}@{}{LOCK_SUFFIX}", stamp(after(now, cooldown)))
        };
        let record_path = self.path.join(&name);
        if let Err(error) = tokio::fs::rename(&temp_path, &record_path).await {
            let _ = tokio::fs::remove_file(&temp_path).await;
            return Err(StorageError::io(&record_path, error));
        }

        debug!(record = %name, envelopes = envelopes.len(), "persisted batch for retry");
        Ok(name)
    }

    /// Claims the oldest eligible record.
    ///
    /// Returns `None` when the directory holds no record whose cooldown or
    /// lease has expired. Abandoned writes, records past the retention period
    /// and undecodable records are removed along the way.
    pub async fn get(&self) -> Result<Option<PendingBatch>, StorageError> {
        let now = Utc::now();
        let now_stamp = stamp(now);
        let write_deadline = stamp(before(now, self.options.write_timeout));
        let retention_deadline = self
            .options
            .retention_period
            .map(|retention| stamp(before(now, retention)));

        for name in self.sorted_names().await? {
            let path = self.path.join(&name);
            let blob = match RecordName::parse(&name) {
                RecordName::Temp => {
                    if name < write_deadline {
                        self.discard(&path, "abandoned write").await;
                    }
                    continue;
                }
                RecordName::Foreign => continue,
                RecordName::Leased { blob, deadline } => {
                    if deadline > now_stamp.as_str() {
                        continue;
                    }
                    blob
                }
                RecordName::Ready { blob } => blob,
            };

            if let Some(deadline) = &retention_deadline {
                if blob < deadline.as_str() {
                    warn!(record = %blob, "dropping batch older than the retention period");
                    self.discard(&path, "retention period elapsed").await;
                    continue;
                }
            }

            let lease = format!(
                "{blob}@{}{LOCK_SUFFIX}",
                stamp(after(now, self.options.claim_lease))
            );
            let claimed = self.path.join(&lease);
            match tokio::fs::rename(&path, &claimed).await {
                Ok(()) => {}
                // another reader claimed it first
                Err(error) if error.kind() == ErrorKind::NotFound => continue,
                Err(error) => return Err(StorageError::io(&path, error)),
            }

            match self.read_envelopes(&claimed).await {
                Ok(envelopes) => {
                    debug!(record = %blob, envelopes = envelopes.len(), "claimed batch for retry");
                    return Ok(Some(PendingBatch {
                        path: claimed,
                        name: blob.to_string(),
                        created_at: created_at(blob),
                        envelopes,
                    }));
                }
                Err(error) if error.is_not_found() => continue,
                Err(StorageError::Serialization(error)) => {
                    warn!(record = %blob, %error, "dropping undecodable batch");
                    self.discard(&claimed, "undecodable").await;
                }
                Err(error) => return Err(error),
            }
        }

        Ok(None)
    }

    /// Removes a claimed record after successful redelivery.
    pub async fn delete(&self, batch: &PendingBatch) -> Result<(), StorageError> {
        tokio::fs::remove_file(&batch.path)
            .await
            .map_err(|e| StorageError::io(&batch.path, e))?;
        debug!(record = %batch.name, "deleted delivered batch");
        Ok(())
    }

    /// Number of records currently held, claimed or not.
    pub async fn len(&self) -> Result<usize, StorageError> {
        let names = self.sorted_names().await?;
        Ok(names
            .iter()
            .filter(|name| {
                matches!(
                    RecordName::parse(name),
                    RecordName::Ready { .. } | RecordName::Leased { .. }
                )
            })
            .count())
    }

    pub async fn is_empty(&self) -> Result<bool, StorageError> {
        Ok(self.len().await? == 0)
    }

    async fn sorted_names(&self) -> Result<Vec<String>, StorageError> {
        let mut entries = tokio::fs::read_dir(&self.path)
            .await
            .map_err(|e| StorageError::io(&self.path, e))?;
        let mut names = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StorageError::io(&self.path, e))?
        {
            // entries removed concurrently are skipped
            let is_file = entry.file_type().await.map(|t| t.is_file()).unwrap_or(false);
            if !is_file {
                continue;
            }
            if let Ok(name) = entry.file_name().into_string() {
                names.push(name);
            }
        }
        names.sort_unstable();
        Ok(names)
    }

    async fn read_envelopes(&self, path: &Path) -> Result<Vec<Envelope>, StorageError> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| StorageError::io(path, e))?;
        let mut envelopes = Vec::new();
        for line in content.lines().filter(|line| !line.trim().is_empty()) {
            envelopes.push(serde_json::from_str(line)?);
        }
        Ok(envelopes)
    }

    async fn discard(&self, path: &Path, reason: &str) {
        match tokio::fs::remove_file(path).await {
            Ok(()) => debug!(path = %path.display(), reason, "removed storage file"),
            Err(error) if error.kind() == ErrorKind::NotFound => {}
            Err(error) => {
                warn!(path = %path.display(), reason, %error, "failed to remove storage file");
            }
        }
    }
}
