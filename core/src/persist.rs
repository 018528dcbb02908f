//! On-disk snapshots of an [`InvertedIndex`].
//!
//! ```text
//! [Header: 20 bytes, little endian]
//!   - Magic: "ZSIX" (4 bytes)
//!   - Format version: u32
//!   - Payload length: u64
//!   - CRC32 of payload: u32
//! [Payload]
//!   - bincode(MetaFile, InvertedIndex)
//! ```
//!
//! Flushes write a temp file next to the destination, fsync it and rename it
//! over the old file, so the previous snapshot stays readable until the new one
//! is complete.

use crate::error::{IndexError, Result};
use crate::index::InvertedIndex;
use crate::settings::IndexSettings;
use crossbeam_channel::RecvTimeoutError;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use time::format_description::well_known::Rfc3339;

pub const MAGIC: &[u8; 4] = b"ZSIX";
pub const FORMAT_VERSION: u32 = 1;
const HEADER_LEN: usize = 20;
const TEMP_PREFIX: &str = ".zapindex-";
const TEMP_SUFFIX: &str = ".tmp";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetaFile {
    pub num_docs: u32,
    pub flushed_at: String,
    pub version: u32,
}

#[derive(Serialize)]
struct SnapshotRef<'a> {
    meta: MetaFile,
    index: &'a InvertedIndex,
}

#[derive(Deserialize)]
struct Snapshot {
    meta: MetaFile,
    index: InvertedIndex,
}

/// Serialize `index` into the framed snapshot format. `path` only labels errors.
pub fn encode_snapshot(index: &InvertedIndex, path: &Path) -> Result<Vec<u8>> {
    let meta = MetaFile {
        num_docs: index.total_documents(),
        flushed_at: match time::OffsetDateTime::now_utc().format(&Rfc3339) {
            Ok(stamp) => stamp,
            Err(e) => {
                tracing::warn!(error = %e, "could not format flush timestamp, leaving it empty");
                String::new()
            }
        },
        version: FORMAT_VERSION,
    };
    let payload = bincode::serialize(&SnapshotRef { meta, index })
        .map_err(|e| IndexError::io(path, io::Error::new(io::ErrorKind::InvalidData, e)))?;

    let mut out = Vec::with_capacity(HEADER_LEN + payload.len());
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
    out.extend_from_slice(&(payload.len() as u64).to_le_bytes());
    out.extend_from_slice(&crc32fast::hash(&payload).to_le_bytes());
    out.extend_from_slice(&payload);
    Ok(out)
}

/// Parse and validate a framed snapshot. Every failure is reported as `CorruptIndex`.
pub fn decode_snapshot(bytes: &[u8], path: &Path) -> Result<(MetaFile, InvertedIndex)> {
    if bytes.len() < HEADER_LEN {
        return Err(IndexError::corrupt(path, format!("file is {} bytes, shorter than the header", bytes.len())));
    }
    let (header, payload) = bytes.split_at(HEADER_LEN);
    if &header[0..4] != MAGIC {
        return Err(IndexError::corrupt(path, "bad magic bytes"));
    }
    let version = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);
    if version != FORMAT_VERSION {
        return Err(IndexError::corrupt(path, format!("unsupported format version {version}")));
    }
    let mut len_bytes = [0u8; 8];
    len_bytes.copy_from_slice(&header[8..16]);
    let expected_len = u64::from_le_bytes(len_bytes);
    if payload.len() as u64 != expected_len {
        return Err(IndexError::corrupt(
            path,
            format!("payload is {} bytes, header says {expected_len}", payload.len()),
        ));
    }
    let crc = u32::from_le_bytes([header[16], header[17], header[18], header[19]]);
    if crc32fast::hash(payload) != crc {
        return Err(IndexError::corrupt(path, "checksum mismatch"));
    }

    let snapshot: Snapshot = bincode::deserialize(payload)
        .map_err(|e| IndexError::corrupt(path, format!("undecodable payload: {e}")))?;
    snapshot.index.validate().map_err(|reason| IndexError::corrupt(path, reason))?;
    if snapshot.meta.num_docs != snapshot.index.total_documents() {
        return Err(IndexError::corrupt(path, "document count in metadata does not match index"));
    }
    Ok((snapshot.meta, snapshot.index))
}

/// Owns one index path. Assumes no other process flushes to the same path.
#[derive(Debug)]
pub struct IndexStore {
    path: PathBuf,
    timeout: Option<Duration>,
    next_generation: AtomicU64,
    /// Generation of the newest snapshot on disk; also serializes writers.
    persisted: Arc<Mutex<u64>>,
    #[cfg(test)]
    io_delay: Option<Duration>,
}

impl IndexStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            timeout: None,
            next_generation: AtomicU64::new(0),
            persisted: Arc::new(Mutex::new(0)),
            #[cfg(test)]
            io_delay: None,
        }
    }

    /// Bound every disk operation by `timeout`. On expiry the call returns
    /// `Timeout`; in-memory state is unaffected.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn path(&self) -> &Path { &self.path }

    pub fn exists(&self) -> bool { self.path.exists() }

    /// Load the index at this path, or an empty default index if the path does not exist.
    pub fn open(&self) -> Result<InvertedIndex> {
        self.open_or_create(IndexSettings::default())
    }

    /// Load the index at this path. A missing path yields an empty index built
    /// with `settings`; an existing index keeps the settings it was built with.
    pub fn open_or_create(&self, settings: IndexSettings) -> Result<InvertedIndex> {
        self.warn_stale_temp_files();
        let path = self.path.clone();
        let bytes = self.bounded("open", move || match fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(IndexError::io(&path, e)),
        })?;

        let Some(bytes) = bytes else {
            tracing::info!(path = %self.path.display(), "no index on disk, starting empty");
            return Ok(InvertedIndex::with_settings(settings));
        };
        let (meta, index) = decode_snapshot(&bytes, &self.path)?;
        if index.settings() != &settings {
            tracing::warn!(path = %self.path.display(), "ignoring requested settings, index was built with different ones");
        }
        tracing::info!(path = %self.path.display(), num_docs = meta.num_docs, flushed_at = %meta.flushed_at, "loaded index");
        Ok(index)
    }

    /// Atomically replace the on-disk index with `index`.
    pub fn flush(&self, index: &InvertedIndex) -> Result<()> {
        let generation = self.reserve_generation();
        let bytes = encode_snapshot(index, &self.path)?;
        self.write_snapshot(generation, bytes)
    }

    /// Claim the generation for a snapshot about to be encoded. Call it while
    /// the index is locked against writers so generation order matches the
    /// order of the states being encoded.
    pub fn reserve_generation(&self) -> u64 {
        self.next_generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Write a snapshot encoded under `generation`. A write that finishes after
    /// a newer generation has landed is dropped rather than rolling the file back.
    pub fn write_snapshot(&self, generation: u64, bytes: Vec<u8>) -> Result<()> {
        let path = self.path.clone();
        let persisted = Arc::clone(&self.persisted);
        let len = bytes.len();
        self.bounded("flush", move || {
            let mut last = persisted.lock();
            if *last > generation {
                tracing::debug!(generation, newest = *last, "dropping superseded flush");
                return Ok(());
            }
            write_atomic(&path, &bytes)?;
            *last = generation;
            Ok(())
        })?;
        tracing::info!(path = %self.path.display(), bytes = len, generation, "flushed index");
        Ok(())
    }

    fn bounded<T, F>(&self, operation: &'static str, job: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce() -> Result<T> + Send + 'static,
    {
        let Some(timeout) = self.timeout else { return job(); };
        #[cfg(test)]
        let delay = self.io_delay;
        let (tx, rx) = crossbeam_channel::bounded(1);
        thread::Builder::new()
            .name(format!("zapindex-{operation}"))
            .spawn(move || {
                #[cfg(test)]
                let _ = delay.map(thread::sleep);
                let _ = tx.send(job());
            })
            .map_err(|e| IndexError::io(&self.path, e))?;

        match rx.recv_timeout(timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => {
                tracing::warn!(operation, path = %self.path.display(), ?timeout, "persistence operation timed out");
                Err(IndexError::Timeout { operation, path: self.path.clone(), timeout })
            }
            Err(RecvTimeoutError::Disconnected) => Err(IndexError::io(
                &self.path,
                io::Error::new(io::ErrorKind::Other, "persistence worker exited without a result"),
            )),
        }
    }

    fn warn_stale_temp_files(&self) {
        let Ok(entries) = fs::read_dir(parent_dir(&self.path)) else { return };
        for entry in entries.filter_map(|e| e.ok()) {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name.starts_with(TEMP_PREFIX) && name.ends_with(TEMP_SUFFIX) {
                tracing::warn!(file = %entry.path().display(), "found leftover temp file from an interrupted flush");
            }
        }
    }
}

fn parent_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = parent_dir(path);
    fs::create_dir_all(&dir).map_err(|e| IndexError::io(&dir, e))?;
    let mut tmp = tempfile::Builder::new()
        .prefix(TEMP_PREFIX)
        .suffix(TEMP_SUFFIX)
        .tempfile_in(&dir)
        .map_err(|e| IndexError::io(path, e))?;
    tmp.write_all(bytes).map_err(|e| IndexError::io(tmp.path(), e))?;
    tmp.as_file().sync_all().map_err(|e| IndexError::io(tmp.path(), e))?;
    tmp.persist(path).map_err(|e| IndexError::io(path, e.error))?;
    sync_dir(&dir);
    Ok(())
}

#[cfg(unix)]
fn sync_dir(dir: &Path) {
    if let Err(e) = fs::File::open(dir).and_then(|d| d.sync_all()) {
        tracing::debug!(dir = %dir.display(), error = %e, "directory fsync failed");
    }
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) {}

/// Load the index at `path`, or an empty one if nothing exists there.
pub fn open<P: AsRef<Path>>(path: P) -> Result<InvertedIndex> {
    IndexStore::new(path).open()
}

/// Atomically persist `index` to `path`.
pub fn flush<P: AsRef<Path>>(index: &InvertedIndex, path: P) -> Result<()> {
    IndexStore::new(path).flush(index)
}
