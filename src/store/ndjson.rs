//! NDJSON record log
//!
//! One self-contained JSON record per line. Appends go through a single writer
//! lock; durability points are batched according to [`DurabilityPolicy`].

use crate::store::repair::scan_fragments;
use crate::store::{
    DurabilityPolicy, LoadReport, Record, RecordSet, RepairReport, SeenSet, StoreError,
    StoreResult,
};
use chrono::{DateTime, Utc};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Instant;

/// Append-only NDJSON store
pub struct NdjsonStore {
    path: PathBuf,
    policy: DurabilityPolicy,
    writer: Mutex<WriterState>,
}

/// Mutable writer state, guarded by the store's lock
struct WriterState {
    file: Option<BufWriter<File>>,
    pending: usize,
    last_sync: Instant,
    last_durable: Option<DateTime<Utc>>,
}

impl WriterState {
    /// Returns the open append handle, opening the log on first use
    fn writer(&mut self, path: &Path) -> StoreResult<&mut BufWriter<File>> {
        if self.file.is_none() {
            self.file = Some(open_for_append(path)?);
        }
        match self.file.as_mut() {
            Some(file) => Ok(file),
            None => Err(StoreError::Io(std::io::Error::other(
                "append handle unavailable",
            ))),
        }
    }

    fn is_due(&self, policy: &DurabilityPolicy) -> bool {
        policy.batch_size <= 1
            || self.pending >= policy.batch_size
            || self.last_sync.elapsed() >= policy.max_delay
    }

    /// Flushes buffered lines and syncs them to disk
    fn sync(&mut self) -> StoreResult<()> {
        if let Some(file) = self.file.as_mut() {
            file.flush()?;
            file.get_ref().sync_data()?;
        }
        if self.pending > 0 {
            self.last_durable = Some(Utc::now());
        }
        self.pending = 0;
        self.last_sync = Instant::now();
        Ok(())
    }
}

impl NdjsonStore {
    /// Opens a store at the given path
    ///
    /// The parent directory is created if needed; the log file itself is only
    /// created by the first append or rewrite.
    pub fn open(path: impl Into<PathBuf>, policy: DurabilityPolicy) -> StoreResult<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        Ok(Self {
            path,
            policy,
            writer: Mutex::new(WriterState {
                file: None,
                pending: 0,
                last_sync: Instant::now(),
                last_durable: None,
            }),
        })
    }

    /// Path of the log file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Wall-clock time of the most recent durability point
    pub fn last_durable_at(&self) -> Option<DateTime<Utc>> {
        self.writer.lock().ok().and_then(|state| state.last_durable)
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, WriterState>> {
        self.writer.lock().map_err(|_| StoreError::Poisoned)
    }

    /// Replays the log
    ///
    /// Pending appends are flushed first. Malformed lines, including a trailing
    /// partial line left by a crash, are skipped and counted. A missing file is
    /// an empty store.
    pub fn load(&self) -> StoreResult<LoadReport> {
        self.flush()?;

        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(LoadReport::default());
            }
            Err(e) => return Err(e.into()),
        };

        let mut reader = BufReader::new(file);
        let mut line = Vec::new();
        let mut merged = RecordSet::default();
        let mut malformed = 0;

        loop {
            line.clear();
            if reader.read_until(b'\n', &mut line)? == 0 {
                break;
            }

            let trimmed = trim_line(&line);
            if trimmed.is_empty() {
                continue;
            }

            match Record::from_json(trimmed) {
                Some(record) => merged.upsert(record),
                None => malformed += 1,
            }
        }

        if malformed > 0 {
            tracing::warn!(
                "Skipped {} malformed line(s) in {}",
                malformed,
                self.path.display()
            );
        }

        let records = merged.into_records();
        let seen: SeenSet = records.iter().map(|r| r.identity.clone()).collect();

        tracing::debug!("Loaded {} records from {}", records.len(), self.path.display());

        Ok(LoadReport {
            records,
            seen,
            malformed,
        })
    }

    /// Appends one record
    ///
    /// Once this returns `Ok`, the record survives a later `load` unless the
    /// process dies before the next durability point.
    pub fn append(&self, record: &Record) -> StoreResult<()> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');

        let mut state = self.lock()?;
        let result = state
            .writer(&self.path)
            .and_then(|writer| writer.write_all(&line).map_err(StoreError::from));

        if let Err(e) = result {
            // Reopen on the next append; the partial line is healed by repair
            state.file = None;
            return Err(e);
        }

        state.pending += 1;
        if state.is_due(&self.policy) {
            state.sync()?;
        }
        Ok(())
    }

    /// Forces a durability point for any pending appends
    pub fn flush(&self) -> StoreResult<()> {
        let mut state = self.lock()?;
        state.sync()
    }

    /// Reaches a durability point only if pending appends are older than the
    /// policy's maximum delay
    ///
    /// Called periodically so a quiet crawl does not leave records buffered.
    pub fn sync_if_due(&self) -> StoreResult<bool> {
        let mut state = self.lock()?;
        if state.pending == 0 || state.last_sync.elapsed() < self.policy.max_delay {
            return Ok(false);
        }
        state.sync()?;
        Ok(true)
    }

    /// Rebuilds the log from its well-formed record fragments
    ///
    /// An unreadable file is treated as empty. Records are deduplicated by
    /// identity, last write wins, and written back atomically.
    pub fn repair(&self) -> StoreResult<RepairReport> {
        let mut state = self.lock()?;
        state.sync()?;

        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) => {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!(
                        "Could not read {} for repair, treating as empty: {}",
                        self.path.display(),
                        e
                    );
                }
                Vec::new()
            }
        };

        if bytes.is_empty() {
            return Ok(RepairReport::default());
        }

        let scan = scan_fragments(&bytes);
        let report = RepairReport {
            kept: scan.records.len(),
            duplicates: scan.duplicates,
            discarded_bytes: scan.discarded_bytes,
        };

        self.replace_locked(&mut state, &scan.records)?;

        tracing::info!(
            "Repaired {}: kept {}, dropped {} duplicate(s), discarded {} byte(s)",
            self.path.display(),
            report.kept,
            report.duplicates,
            report.discarded_bytes
        );

        Ok(report)
    }

    /// Replaces the whole log with a snapshot
    ///
    /// The snapshot is written to a temporary file and renamed over the log, so
    /// readers never observe a half-written file.
    pub fn atomic_replace(&self, records: &[Record]) -> StoreResult<()> {
        let mut state = self.lock()?;
        self.replace_locked(&mut state, records)
    }

    fn replace_locked(&self, state: &mut WriterState, records: &[Record]) -> StoreResult<()> {
        state.sync()?;
        // The old handle would keep writing to the unlinked inode
        state.file = None;

        let tmp = temp_path(&self.path);
        {
            let mut out = BufWriter::new(File::create(&tmp)?);
            for record in records {
                serde_json::to_writer(&mut out, record)?;
                out.write_all(b"\n")?;
            }
            out.flush()?;
            out.get_ref().sync_all()?;
        }

        fs::rename(&tmp, &self.path)?;
        sync_parent_dir(&self.path);

        state.last_durable = Some(Utc::now());
        Ok(())
    }
}

impl Drop for NdjsonStore {
    fn drop(&mut self) {
        if let Ok(mut state) = self.writer.lock() {
            if let Err(e) = state.sync() {
                tracing::error!("Failed to flush {} on close: {}", self.path.display(), e);
            }
        }
    }
}

/// Opens the log for appending
///
/// If a previous run died mid-line, a newline is written first so the next
/// record starts on its own line.
fn open_for_append(path: &Path) -> StoreResult<BufWriter<File>> {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .read(true)
        .open(path)?;

    let len = file.metadata()?.len();
    if len > 0 {
        let mut last = [0u8; 1];
        file.seek(SeekFrom::Start(len - 1))?;
        file.read_exact(&mut last)?;
        if last[0] != b'\n' {
            tracing::warn!("{} ends with a partial line", path.display());
            file.write_all(b"\n")?;
        }
    }

    Ok(BufWriter::new(file))
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

#[cfg(unix)]
fn sync_parent_dir(path: &Path) {
    if let Some(parent) = path.parent() {
        let dir = if parent.as_os_str().is_empty() {
            Path::new(".")
        } else {
            parent
        };
        if let Err(e) = File::open(dir).and_then(|d| d.sync_all()) {
            tracing::debug!("Could not sync directory {}: {}", dir.display(), e);
        }
    }
}

#[cfg(not(unix))]
fn sync_parent_dir(_path: &Path) {}

fn trim_line(line: &[u8]) -> &[u8] {
    let start = line
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(line.len());
    let end = line
        .iter()
        .rposition(|b| !b.is_ascii_whitespace())
        .map_or(start, |i| i + 1);
    &line[start..end]
}
