//! Persistent record store.
//!
//! A database file is a superblock followed by an append-only log of record
//! frames. Every flush appends a new image of the record; the newest frame
//! for a record wins.
//!
//! # Frame layout
//!
//! ```text
//! [8B record id LE][4B length LE][4B crc32 LE][payload]
//! ```
//!
//! The checksum covers the id, the length and the payload. A length of
//! `u32::MAX` marks a destroyed record and carries no payload.
//!
//! # Recovery
//!
//! `open` rebuilds the record location table by scanning frames from the end
//! of the superblock up to the log end recorded by the last `sync`. Frames
//! past that point belong to an unfinished commit. The first frame that is
//! short or fails its checksum also ends the log. The file is truncated
//! wherever the log ends.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::storage::io::{RecordStore, StorageError};
use crate::storage::lock::ViewTable;
use crate::storage::record::{LockMode, RecordId, RecordInfo, View};
use crate::storage::superblock::{SUPERBLOCK_SIZE, Superblock, SuperblockError};

/// Size of a frame header in bytes.
pub const FRAME_HEADER_SIZE: usize = 16;

const TOMBSTONE: u32 = u32::MAX;

/// Where the newest image of a record lives.
#[derive(Debug, Clone, Copy)]
struct Location {
    /// Offset of the payload.
    offset: u64,
    len: u32,
}

/// A database file handle implementing `RecordStore`.
pub struct DatabaseFile {
    file: File,
    path: PathBuf,
    superblock: Superblock,
    locations: HashMap<RecordId, Location>,
    views: ViewTable,
    /// Append position.
    log_end: u64,
}

impl DatabaseFile {
    /// Create a new database file at the given path.
    ///
    /// Returns an error if the file already exists.
    pub fn create(path: &Path) -> Result<Self, FileError> {
        if path.exists() {
            return Err(FileError::AlreadyExists(path.to_path_buf()));
        }

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)
            .map_err(FileError::Io)?;

        let superblock = Superblock::new();
        file.write_all(&superblock.to_bytes()).map_err(FileError::Io)?;
        file.sync_all().map_err(FileError::Io)?;

        Ok(Self {
            file,
            path: path.to_path_buf(),
            log_end: superblock.log_end,
            superblock,
            locations: HashMap::new(),
            views: ViewTable::new(),
        })
    }

    /// Open an existing database file, recovering the record log.
    pub fn open(path: &Path) -> Result<Self, FileError> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(FileError::Io)?;

        let mut header = [0u8; SUPERBLOCK_SIZE];
        file.read_exact(&mut header).map_err(FileError::Io)?;
        let mut superblock = Superblock::from_bytes(&header).map_err(FileError::Superblock)?;

        let mut log = Vec::new();
        file.read_to_end(&mut log).map_err(FileError::Io)?;

        // Frames past the last synced end belong to a commit that never
        // finished and are dropped with it.
        let synced_len = usize::try_from(superblock.log_end - SUPERBLOCK_SIZE as u64)
            .map_or(log.len(), |len| len.min(log.len()));
        let scan = scan_frames(&log[..synced_len]);

        let log_end = SUPERBLOCK_SIZE as u64 + scan.valid_len as u64;
        if scan.valid_len < log.len() {
            warn!(
                path = %path.display(),
                offset = log_end,
                discarded = log.len() - scan.valid_len,
                "truncating record log after last commit"
            );
            file.set_len(log_end).map_err(FileError::Io)?;
        }
        if scan.next_record_id > superblock.next_record_id {
            superblock.next_record_id = scan.next_record_id;
        }
        debug!(records = scan.locations.len(), log_end, "recovered record log");

        Ok(Self {
            file,
            path: path.to_path_buf(),
            superblock,
            locations: scan.locations,
            views: ViewTable::new(),
            log_end,
        })
    }

    #[must_use]
    pub const fn superblock(&self) -> &Superblock {
        &self.superblock
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of live records.
    #[must_use]
    pub fn record_count(&self) -> usize {
        self.locations.len()
    }

    /// Current length of the file in bytes.
    #[must_use]
    pub const fn file_len(&self) -> u64 {
        self.log_end
    }

    /// Write the superblock at offset 0.
    pub fn write_superblock(&mut self) -> Result<(), FileError> {
        self.superblock.log_end = self.log_end;
        self.superblock.record_count = self.locations.len() as u64;
        self.file.seek(SeekFrom::Start(0)).map_err(FileError::Io)?;
        self.file
            .write_all(&self.superblock.to_bytes())
            .map_err(FileError::Io)
    }

    fn append_frame(&mut self, rec: RecordId, payload: Option<&[u8]>) -> Result<Location, FileError> {
        let len = match payload {
            Some(bytes) => u32::try_from(bytes.len())
                .ok()
                .filter(|&len| len != TOMBSTONE)
                .ok_or(FileError::RecordTooLarge(bytes.len()))?,
            None => TOMBSTONE,
        };
        let body = payload.unwrap_or_default();

        let mut frame = Vec::with_capacity(FRAME_HEADER_SIZE + body.len());
        frame.extend_from_slice(&rec.get().to_le_bytes());
        frame.extend_from_slice(&len.to_le_bytes());
        frame.extend_from_slice(&frame_checksum(rec.get(), len, body).to_le_bytes());
        frame.extend_from_slice(body);

        self.file
            .seek(SeekFrom::Start(self.log_end))
            .map_err(FileError::Io)?;
        self.file.write_all(&frame).map_err(FileError::Io)?;

        let location = Location {
            offset: self.log_end + FRAME_HEADER_SIZE as u64,
            len,
        };
        self.log_end += frame.len() as u64;
        Ok(location)
    }

    fn read_location(&mut self, location: Location) -> Result<Vec<u8>, FileError> {
        let mut buf = vec![0u8; location.len as usize];
        self.file
            .seek(SeekFrom::Start(location.offset))
            .map_err(FileError::Io)?;
        self.file.read_exact(&mut buf).map_err(FileError::Io)?;
        Ok(buf)
    }

    fn location(&self, rec: RecordId) -> Result<Location, StorageError> {
        self.locations
            .get(&rec)
            .copied()
            .ok_or(StorageError::RecordNotFound(rec))
    }
}

impl RecordStore for DatabaseFile {
    fn allocate_record_id(&mut self) -> Result<RecordId, StorageError> {
        let rec = self.superblock.next_record_id;
        let location = self.append_frame(rec, Some(&[]))?;
        self.superblock.next_record_id = rec.next();
        self.locations.insert(rec, location);
        Ok(rec)
    }

    fn destroy(&mut self, rec: RecordId, view: View) -> Result<(), StorageError> {
        if self.views.writable(view)?.rec != rec {
            return Err(StorageError::NotWritable(view));
        }
        self.location(rec)?;
        self.append_frame(rec, None)?;
        self.locations.remove(&rec);
        self.views.close(view)?;
        Ok(())
    }

    fn lock(&mut self, rec: RecordId, mode: LockMode) -> Result<View, StorageError> {
        self.location(rec)?;
        self.views.open(rec, mode)
    }

    fn unlock(&mut self, view: View) -> Result<(), StorageError> {
        self.flush(view)?;
        self.views.close(view).map(|_| ())
    }

    fn upgrade(&mut self, view: View, mode: LockMode) -> Result<(), StorageError> {
        self.views.upgrade(view, mode)
    }

    fn abandon(&mut self, view: View) -> Result<(), StorageError> {
        self.views.close(view).map(|_| ())
    }

    fn read_raw(&mut self, view: View) -> Result<Vec<u8>, StorageError> {
        let state = self.views.get(view)?;
        if let Some(staged) = &state.staged {
            return Ok(staged.clone());
        }
        let location = self.location(state.rec)?;
        Ok(self.read_location(location)?)
    }

    fn write_raw(&mut self, view: View, bytes: &[u8]) -> Result<(), StorageError> {
        self.views.writable(view)?.staged = Some(bytes.to_vec());
        Ok(())
    }

    fn flush(&mut self, view: View) -> Result<(), StorageError> {
        let state = self.views.get_mut(view)?;
        let Some(bytes) = state.staged.take() else {
            return Ok(());
        };
        let rec = state.rec;
        let location = self.append_frame(rec, Some(&bytes))?;
        self.locations.insert(rec, location);
        Ok(())
    }

    fn info(&self, view: View) -> Result<RecordInfo, StorageError> {
        let state = self.views.get(view)?;
        let length = match &state.staged {
            Some(bytes) => bytes.len(),
            None => self.location(state.rec)?.len as usize,
        };
        Ok(RecordInfo {
            rec: state.rec,
            mode: state.mode,
            length,
        })
    }

    fn sync(&mut self) -> Result<(), StorageError> {
        // Frames must be durable before the superblock points past them.
        self.file.sync_data()?;
        self.write_superblock()?;
        self.file.sync_all()?;
        Ok(())
    }
}

fn frame_checksum(rec: u64, len: u32, payload: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&rec.to_le_bytes());
    hasher.update(&len.to_le_bytes());
    hasher.update(payload);
    hasher.finalize()
}

struct FrameScan {
    locations: HashMap<RecordId, Location>,
    next_record_id: RecordId,
    /// Bytes of `log` holding complete, valid frames.
    valid_len: usize,
}

/// Replay frames from the start of the log.
fn scan_frames(log: &[u8]) -> FrameScan {
    let mut locations = HashMap::new();
    let mut next_record_id = RecordId::FIRST;
    let mut pos = 0;

    while log.len() - pos >= FRAME_HEADER_SIZE {
        let header = &log[pos..pos + FRAME_HEADER_SIZE];
        let mut rec_bytes = [0u8; 8];
        rec_bytes.copy_from_slice(&header[..8]);
        let mut len_bytes = [0u8; 4];
        len_bytes.copy_from_slice(&header[8..12]);
        let mut crc_bytes = [0u8; 4];
        crc_bytes.copy_from_slice(&header[12..16]);

        let raw_rec = u64::from_le_bytes(rec_bytes);
        let len = u32::from_le_bytes(len_bytes);
        let payload_len = if len == TOMBSTONE { 0 } else { len as usize };
        let payload_start = pos + FRAME_HEADER_SIZE;
        if log.len() - payload_start < payload_len {
            break;
        }
        let payload = &log[payload_start..payload_start + payload_len];
        if frame_checksum(raw_rec, len, payload) != u32::from_le_bytes(crc_bytes) {
            break;
        }
        let Some(rec) = RecordId::from_raw(raw_rec) else {
            break;
        };

        if len == TOMBSTONE {
            locations.remove(&rec);
        } else {
            locations.insert(
                rec,
                Location {
                    offset: (SUPERBLOCK_SIZE + payload_start) as u64,
                    len,
                },
            );
        }
        if rec >= next_record_id {
            next_record_id = rec.next();
        }
        pos = payload_start + payload_len;
    }

    FrameScan {
        locations,
        next_record_id,
        valid_len: pos,
    }
}

/// Errors that can occur during file operations.
#[derive(Debug)]
pub enum FileError {
    /// I/O error.
    Io(std::io::Error),
    /// File already exists.
    AlreadyExists(PathBuf),
    /// Superblock error.
    Superblock(SuperblockError),
    /// A record image does not fit a frame.
    RecordTooLarge(usize),
}

impl std::fmt::Display for FileError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::AlreadyExists(p) => write!(f, "file already exists: {}", p.display()),
            Self::Superblock(e) => write!(f, "superblock error: {e}"),
            Self::RecordTooLarge(len) => write!(f, "record of {len} bytes is too large"),
        }
    }
}

impl std::error::Error for FileError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Superblock(e) => Some(e),
            Self::AlreadyExists(_) | Self::RecordTooLarge(_) => None,
        }
    }
}

impl From<FileError> for StorageError {
    fn from(e: FileError) -> Self {
        match e {
            FileError::Io(io_err) => Self::Io(io_err),
            FileError::AlreadyExists(path) => Self::Io(std::io::Error::new(
                std::io::ErrorKind::AlreadyExists,
                format!("file already exists: {}", path.display()),
            )),
            FileError::Superblock(e) => Self::Corruption(e.to_string()),
            FileError::RecordTooLarge(len) => {
                Self::Corruption(format!("record of {len} bytes is too large"))
            }
        }
    }
}
