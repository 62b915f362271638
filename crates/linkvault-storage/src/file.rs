//! Append-only file repository.
//!
//! Every link is one JSON object per line (`{"owner", "key", "url"}`). The
//! log is never rewritten in place; lookups rewind a dedicated read handle
//! and scan it linearly. A single mutex guards both handles, so reads and
//! writes serialize.

use async_trait::async_trait;
use linkvault_core::generator::PROBE_ATTEMPTS;
use linkvault_core::{
    unique_id, BatchOutcome, BatchRequest, ExistenceProbe, IdGenerator, LinkRecord,
    NanoIdGenerator, Repository, RepositoryError, RepositoryStats, Result, ShortId, StoreOutcome,
    UserLinks,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncSeekExt, AsyncWriteExt, BufReader, Lines};
use tokio::sync::Mutex;
use tracing::{debug, trace};

/// One line of the log.
#[derive(Debug, Serialize, Deserialize)]
struct LogEntry {
    owner: String,
    key: ShortId,
    url: String,
}

impl LogEntry {
    fn decode(line: &str) -> Result<Self> {
        serde_json::from_str(line)
            .map_err(|e| RepositoryError::InvalidData(format!("malformed log line: {e}")))
    }

    fn into_record(self) -> LinkRecord {
        LinkRecord {
            id: self.key,
            owner: self.owner,
            original_url: self.url,
            deleted: false,
        }
    }
}

/// The read and append handles of an open log.
#[derive(Debug)]
struct LogFile {
    reader: File,
    writer: File,
}

impl LogFile {
    async fn open(path: &Path) -> Result<Self> {
        // the writer creates the file, so open it first
        let writer = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        let reader = OpenOptions::new().read(true).open(path).await?;
        Ok(Self { reader, writer })
    }

    /// Rewinds the read handle and returns a line iterator over the whole log.
    async fn rewind(&mut self) -> Result<Lines<BufReader<&mut File>>> {
        self.reader.seek(SeekFrom::Start(0)).await?;
        Ok(BufReader::new(&mut self.reader).lines())
    }

    async fn append(&mut self, entry: &LogEntry) -> Result<()> {
        let mut line = serde_json::to_vec(entry)
            .map_err(|e| RepositoryError::InvalidData(format!("unencodable log entry: {e}")))?;
        line.push(b'\n');
        self.writer.write_all(&line).await?;
        self.writer.flush().await?;
        Ok(())
    }

    async fn find(&mut self, id: &ShortId) -> Result<Option<LinkRecord>> {
        let mut lines = self.rewind().await?;
        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            let entry = LogEntry::decode(&line)?;
            if entry.key == *id {
                return Ok(Some(entry.into_record()));
            }
        }
        Ok(None)
    }
}

#[async_trait]
impl ExistenceProbe for LogFile {
    // A line counts as a match when its text contains the id anywhere, so a
    // url containing the id also marks it as taken.
    async fn is_taken(&mut self, id: &ShortId) -> Result<bool> {
        let mut lines = self.rewind().await?;
        while let Some(line) = lines.next_line().await? {
            if line.contains(id.as_str()) {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

/// Durable repository backed by an append-only JSON lines file.
///
/// Urls are not deduplicated by content and `unstore` is not supported.
#[derive(Debug)]
pub struct FileRepository<G = NanoIdGenerator> {
    path: PathBuf,
    // `None` once closed
    log: Mutex<Option<LogFile>>,
    generator: G,
}

impl FileRepository {
    /// Opens (creating if needed) the log at `path`.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        Self::open_with_generator(path, NanoIdGenerator::new()).await
    }
}

impl<G: IdGenerator> FileRepository<G> {
    pub async fn open_with_generator(path: impl Into<PathBuf>, generator: G) -> Result<Self> {
        let path = path.into();
        let log = LogFile::open(&path).await?;
        debug!(path = %path.display(), "opened file storage");

        Ok(Self {
            path,
            log: Mutex::new(Some(log)),
            generator,
        })
    }

    /// Returns the path of the log file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn store_locked(&self, log: &mut LogFile, owner: &str, url: &str) -> Result<ShortId> {
        let id = unique_id(&self.generator, PROBE_ATTEMPTS, log).await?;
        log.append(&LogEntry {
            owner: owner.to_owned(),
            key: id.clone(),
            url: url.to_owned(),
        })
        .await?;
        Ok(id)
    }
}

fn closed() -> RepositoryError {
    RepositoryError::StorageUnavailable("file storage is closed".to_string())
}

#[async_trait]
impl<G: IdGenerator> Repository for FileRepository<G> {
    async fn store(&self, owner: &str, url: &str) -> Result<StoreOutcome> {
        trace!(owner = %owner, "storing link in file");
        let mut guard = self.log.lock().await;
        let log = guard.as_mut().ok_or_else(closed)?;

        let id = self.store_locked(log, owner, url).await?;
        Ok(StoreOutcome::Created(id))
    }

    async fn restore(&self, id: &ShortId) -> Result<String> {
        trace!(id = %id, "restoring link from file");
        let mut guard = self.log.lock().await;
        let log = guard.as_mut().ok_or_else(closed)?;

        log.find(id)
            .await?
            .map(|record| record.original_url)
            .ok_or_else(|| RepositoryError::NotFound(id.clone()))
    }

    async fn unstore(&self, _owner: &str, _ids: Vec<ShortId>) -> Result<()> {
        Err(RepositoryError::NotSupported {
            backend: "file",
            operation: "unstore",
        })
    }

    async fn user_storage(&self, owner: &str) -> Result<UserLinks> {
        let mut guard = self.log.lock().await;
        let log = guard.as_mut().ok_or_else(closed)?;

        // lines hold the owner JSON-encoded, quotes and escapes included
        let needle = serde_json::to_string(owner)
            .map_err(|e| RepositoryError::InvalidData(format!("unencodable owner: {e}")))?;

        let mut links = UserLinks::new();
        let mut lines = log.rewind().await?;
        while let Some(line) = lines.next_line().await? {
            // cheap substring filter before decoding; the decoded owner decides
            if !line.contains(&needle) {
                continue;
            }
            let entry = LogEntry::decode(&line)?;
            if entry.owner == owner {
                links.insert(entry.key, entry.url);
            }
        }
        Ok(links)
    }

    /// The whole batch runs under one lock acquisition. Not transactional:
    /// lines appended before a failure stay in the log.
    async fn store_batch(&self, owner: &str, batch: BatchRequest) -> Result<BatchOutcome> {
        trace!(owner = %owner, size = batch.len(), "storing batch in file");
        let mut guard = self.log.lock().await;
        let log = guard.as_mut().ok_or_else(closed)?;

        let mut outcome = BatchOutcome::default();
        for (correlation_id, url) in batch {
            let id = self.store_locked(log, owner, &url).await?;
            outcome.record(correlation_id, StoreOutcome::Created(id));
        }
        Ok(outcome)
    }

    async fn stats(&self) -> Result<RepositoryStats> {
        let mut guard = self.log.lock().await;
        let log = guard.as_mut().ok_or_else(closed)?;

        let mut links = 0;
        let mut owners = HashSet::new();
        let mut lines = log.rewind().await?;
        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            let entry = LogEntry::decode(&line)?;
            links += 1;
            owners.insert(entry.owner);
        }

        Ok(RepositoryStats {
            links,
            owners: owners.len() as u64,
        })
    }

    async fn ping(&self) -> Result<()> {
        let guard = self.log.lock().await;
        let log = guard.as_ref().ok_or_else(closed)?;

        for handle in [&log.writer, &log.reader] {
            handle
                .metadata()
                .await
                .map_err(|e| RepositoryError::StorageUnavailable(e.to_string()))?;
        }
        Ok(())
    }

    /// Closes both handles; the first error encountered is returned.
    async fn close(&self) -> Result<()> {
        let Some(mut log) = self.log.lock().await.take() else {
            return Ok(());
        };

        let flushed = log.writer.flush().await;
        let synced = log.writer.sync_all().await;
        drop(log);
        debug!(path = %self.path.display(), "closed file storage");

        flushed?;
        synced?;
        Ok(())
    }
}
