//! Byte-level journal backends.

use crate::error::{StoreError, StoreResult};
use fs2::FileExt;
use parking_lot::Mutex;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

const JOURNAL_FILE: &str = "records.journal";
const JOURNAL_TEMP: &str = "records.journal.tmp";
const LOCK_FILE: &str = "LOCK";

/// An opaque append-only byte log.
///
/// Backends do not interpret frames; the journaled store owns the format.
///
/// # Invariants
///
/// - `append` writes after all previously appended bytes; a failed append
///   leaves `size` unchanged and no partial frame in front of later appends
/// - after `sync` returns, appended bytes survive process termination
/// - `replace` swaps the whole content atomically: readers observe either
///   the old or the new image, never a mix
pub trait JournalBackend: Send {
    /// Reads the whole journal.
    fn read_all(&mut self) -> StoreResult<Vec<u8>>;

    /// Appends bytes at the end.
    fn append(&mut self, data: &[u8]) -> StoreResult<()>;

    /// Makes appended bytes durable.
    fn sync(&mut self) -> StoreResult<()>;

    /// Cuts the journal down to `len` bytes.
    fn truncate(&mut self, len: u64) -> StoreResult<()>;

    /// Atomically replaces the whole journal.
    fn replace(&mut self, contents: &[u8]) -> StoreResult<()>;

    /// Current size in bytes.
    fn size(&self) -> u64;
}

/// A journal held in memory.
///
/// Clones share the same buffer, so a test can drop a store and reopen it
/// from the same bytes.
#[derive(Debug, Clone, Default)]
pub struct MemoryJournal {
    bytes: Arc<Mutex<Vec<u8>>>,
}

impl MemoryJournal {
    /// Creates an empty journal.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a journal holding `bytes`.
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self {
            bytes: Arc::new(Mutex::new(bytes)),
        }
    }

    /// Returns a copy of the current content.
    pub fn bytes(&self) -> Vec<u8> {
        self.bytes.lock().clone()
    }
}

impl JournalBackend for MemoryJournal {
    fn read_all(&mut self) -> StoreResult<Vec<u8>> {
        Ok(self.bytes())
    }

    fn append(&mut self, data: &[u8]) -> StoreResult<()> {
        self.bytes.lock().extend_from_slice(data);
        Ok(())
    }

    fn sync(&mut self) -> StoreResult<()> {
        Ok(())
    }

    fn truncate(&mut self, len: u64) -> StoreResult<()> {
        let mut bytes = self.bytes.lock();
        let len = usize::try_from(len).unwrap_or(usize::MAX);
        if len > bytes.len() {
            return Err(StoreError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("cannot truncate to {len} bytes, journal has {}", bytes.len()),
            )));
        }
        bytes.truncate(len);
        Ok(())
    }

    fn replace(&mut self, contents: &[u8]) -> StoreResult<()> {
        *self.bytes.lock() = contents.to_vec();
        Ok(())
    }

    fn size(&self) -> u64 {
        self.bytes.lock().len() as u64
    }
}

/// A journal stored in a directory on disk.
///
/// ```text
/// <dir>/
/// ├─ LOCK              # advisory lock, single writer
/// └─ records.journal   # append-only frames
/// ```
///
/// Compaction writes `records.journal.tmp` and renames it over the journal.
#[derive(Debug)]
pub struct FileJournal {
    dir: PathBuf,
    file: File,
    size: u64,
    /// Bytes past `size` left by a failed append that could not be cut off.
    tail_dirty: bool,
    _lock_file: File,
}

impl FileJournal {
    /// Opens or creates a journal directory and takes its lock.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Locked`] if another handle holds the directory.
    pub fn open(dir: &Path) -> StoreResult<Self> {
        fs::create_dir_all(dir)?;

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(dir.join(LOCK_FILE))?;
        if lock_file.try_lock_exclusive().is_err() {
            return Err(StoreError::Locked(dir.to_path_buf()));
        }

        let file = Self::open_journal(dir)?;
        let size = file.metadata()?.len();

        Ok(Self {
            dir: dir.to_path_buf(),
            file,
            size,
            tail_dirty: false,
            _lock_file: lock_file,
        })
    }

    /// Returns the directory holding the journal.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Returns the journal file path.
    #[must_use]
    pub fn journal_path(&self) -> PathBuf {
        self.dir.join(JOURNAL_FILE)
    }

    /// Cuts the file back to the acknowledged size after a failed write.
    fn discard_unacknowledged_tail(&mut self) {
        match self.file.set_len(self.size) {
            Ok(()) => self.tail_dirty = false,
            Err(e) => {
                tracing::warn!(size = self.size, error = %e, "cannot cut partial journal write");
                self.tail_dirty = true;
            }
        }
    }

    fn open_journal(dir: &Path) -> StoreResult<File> {
        Ok(OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(dir.join(JOURNAL_FILE))?)
    }
}

impl JournalBackend for FileJournal {
    fn read_all(&mut self) -> StoreResult<Vec<u8>> {
        let mut buf = Vec::with_capacity(usize::try_from(self.size).unwrap_or(0));
        self.file.seek(SeekFrom::Start(0))?;
        self.file.read_to_end(&mut buf)?;
        Ok(buf)
    }

    fn append(&mut self, data: &[u8]) -> StoreResult<()> {
        if data.is_empty() {
            return Ok(());
        }
        if self.tail_dirty {
            self.file.set_len(self.size)?;
            self.tail_dirty = false;
        }
        self.file.seek(SeekFrom::Start(self.size))?;
        if let Err(e) = self.file.write_all(data) {
            self.discard_unacknowledged_tail();
            return Err(e.into());
        }
        self.size += data.len() as u64;
        Ok(())
    }

    fn sync(&mut self) -> StoreResult<()> {
        self.file.flush()?;
        self.file.sync_data()?;
        Ok(())
    }

    fn truncate(&mut self, len: u64) -> StoreResult<()> {
        if len > self.size {
            return Err(StoreError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("cannot truncate to {len} bytes, journal has {}", self.size),
            )));
        }
        self.file.set_len(len)?;
        self.size = len;
        self.tail_dirty = false;
        self.file.sync_all()?;
        Ok(())
    }

    fn replace(&mut self, contents: &[u8]) -> StoreResult<()> {
        let temp = self.dir.join(JOURNAL_TEMP);
        {
            let mut out = File::create(&temp)?;
            out.write_all(contents)?;
            out.sync_all()?;
        }
        fs::rename(&temp, self.journal_path())?;
        self.file = Self::open_journal(&self.dir)?;
        self.size = contents.len() as u64;
        self.tail_dirty = false;
        Ok(())
    }

    fn size(&self) -> u64 {
        self.size
    }
}
