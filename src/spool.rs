//! Bounded, append-only record spool.
//!
//! Records that cannot be published right away are appended to a single
//! newline-delimited log. The log is the unit of both durability and space
//! accounting:
//!
//! - **Overflow**: if an append leaves the log larger than the cap, the
//!   whole log is discarded (not trimmed). The device prefers starting empty
//!   to partial compaction.
//! - **Drain**: lines are replayed oldest first. Replay stops at the first
//!   publish that fails; the log is then left untouched for the next drain.
//!   Only a fully replayed log is removed. There is no partial truncation.
//!
//! Storage is abstracted by [`SpoolStore`]; [`FileStore`] (feature `std`)
//! backs it with a file.

use core::fmt;

use crate::record::{EncodedRecord, MAX_RECORD_LEN};

/// Bytes read from the store per chunk during drain.
const READ_CHUNK_LEN: usize = 256;

/// Backing storage for the spool log.
///
/// A store that does not exist yet behaves as empty: `size` is 0 and
/// `read_at` returns 0. `append` creates it.
pub trait SpoolStore {
    type Error: fmt::Debug + fmt::Display;

    /// Append `bytes`, returning the resulting total size.
    fn append(&mut self, bytes: &[u8]) -> Result<u64, Self::Error>;
    /// Current total size in bytes.
    fn size(&mut self) -> Result<u64, Self::Error>;
    /// Read up to `buf.len()` bytes starting at `offset`. 0 means end of log.
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<usize, Self::Error>;
    /// Delete the log entirely. Removing a missing log is not an error.
    fn remove(&mut self) -> Result<(), Self::Error>;
}

// ── Line reader ──────────────────────────────────────────────────────

/// Accumulates bytes until a newline, then yields the line (without it).
/// A line longer than the buffer is dropped whole, up to its newline.
struct LineReader {
    buf: [u8; MAX_RECORD_LEN],
    pos: usize,
    overflowed: bool,
}

impl LineReader {
    const fn new() -> Self {
        Self {
            buf: [0; MAX_RECORD_LEN],
            pos: 0,
            overflowed: false,
        }
    }

    fn feed(&mut self, byte: u8) -> Option<&[u8]> {
        if byte == b'\n' {
            let len = core::mem::replace(&mut self.pos, 0);
            if core::mem::replace(&mut self.overflowed, false) {
                log::warn!("dropping oversized spool line");
                return None;
            }
            return Some(&self.buf[..len]);
        }
        if self.overflowed {
            return None;
        }
        if self.pos < self.buf.len() {
            self.buf[self.pos] = byte;
            self.pos += 1;
        } else {
            self.overflowed = true;
        }
        None
    }
}

// ── Errors ───────────────────────────────────────────────────────────

/// Spool operation failure, tagged with the step that failed.
#[derive(Debug, PartialEq, Eq)]
pub enum SpoolError<E> {
    Write(E),
    Read(E),
    Remove(E),
}

impl<E: fmt::Display> fmt::Display for SpoolError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SpoolError::Write(e) => write!(f, "spool write failed: {e}"),
            SpoolError::Read(e) => write!(f, "spool read failed: {e}"),
            SpoolError::Remove(e) => write!(f, "spool remove failed: {e}"),
        }
    }
}

// ── Outcomes ─────────────────────────────────────────────────────────

/// Result of a successful append.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Appended {
    /// Record stored; log is now `size` bytes.
    Stored { size: u64 },
    /// Log grew to `size` bytes, past the cap, and was discarded whole.
    Discarded { size: u64 },
}

/// Result of a drain attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Drain {
    /// Nothing spooled.
    Empty,
    /// Every line was published and the log removed.
    Complete { replayed: u32 },
    /// A publish failed after `replayed` lines; the log is unchanged.
    Interrupted { replayed: u32 },
}

// ── Spool ────────────────────────────────────────────────────────────

/// The spool log, exclusively owned by the delivery engine.
pub struct Spool<S> {
    store: S,
    cap: u64,
    /// A failed append may have left an unterminated fragment; the next
    /// line must start on a fresh line.
    needs_separator: bool,
}

impl<S: SpoolStore> Spool<S> {
    pub fn new(store: S, cap: u64) -> Self {
        Self {
            store,
            cap,
            needs_separator: false,
        }
    }

    pub fn cap(&self) -> u64 {
        self.cap
    }

    pub fn size(&mut self) -> Result<u64, SpoolError<S::Error>> {
        self.store.size().map_err(SpoolError::Read)
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    /// Append one record as a newline-terminated line.
    pub fn append(&mut self, record: &EncodedRecord) -> Result<Appended, SpoolError<S::Error>> {
        let mut line = heapless::Vec::<u8, { MAX_RECORD_LEN + 1 }>::new();
        // Records never exceed MAX_RECORD_LEN, so both pushes fit.
        let _ = line.extend_from_slice(record.as_bytes());
        let _ = line.push(b'\n');
        self.append_line(&line)
    }

    /// Append raw, already newline-terminated bytes and enforce the cap.
    pub(crate) fn append_line(&mut self, line: &[u8]) -> Result<Appended, SpoolError<S::Error>> {
        if self.needs_separator {
            self.store.append(b"\n").map_err(SpoolError::Write)?;
            self.needs_separator = false;
        }
        let size = match self.store.append(line) {
            Ok(size) => size,
            Err(e) => {
                self.needs_separator = true;
                return Err(SpoolError::Write(e));
            }
        };
        if size <= self.cap {
            return Ok(Appended::Stored { size });
        }

        log::warn!(
            "spool over cap ({} > {} bytes), discarding all spooled records",
            size,
            self.cap
        );
        self.store.remove().map_err(SpoolError::Remove)?;
        self.needs_separator = false;
        Ok(Appended::Discarded { size })
    }

    /// Replay spooled lines oldest first through `publish`.
    ///
    /// `publish` returns `false` when the transport is no longer ready;
    /// replay stops there and the log is kept as is. Empty (all-whitespace)
    /// lines are skipped. The log is removed only after every line was
    /// published.
    pub fn drain_and_replay<F>(&mut self, mut publish: F) -> Result<Drain, SpoolError<S::Error>>
    where
        F: FnMut(&str) -> bool,
    {
        if self.size()? == 0 {
            return Ok(Drain::Empty);
        }

        let mut reader = LineReader::new();
        let mut chunk = [0u8; READ_CHUNK_LEN];
        let mut offset = 0u64;
        let mut replayed = 0u32;

        loop {
            let n = self
                .store
                .read_at(offset, &mut chunk)
                .map_err(SpoolError::Read)?;
            // A final line without a newline still counts.
            let bytes: &[u8] = if n == 0 { b"\n" } else { &chunk[..n] };

            for &byte in bytes {
                let Some(line) = reader.feed(byte) else {
                    continue;
                };
                let Ok(text) = core::str::from_utf8(line) else {
                    log::warn!("skipping non-UTF-8 spool line");
                    continue;
                };
                let text = text.trim();
                if text.is_empty() {
                    continue;
                }
                if !publish(text) {
                    log::info!("spool drain interrupted after {} records", replayed);
                    return Ok(Drain::Interrupted { replayed });
                }
                replayed = replayed.saturating_add(1);
            }

            if n == 0 {
                break;
            }
            offset += n as u64;
        }

        self.store.remove().map_err(SpoolError::Remove)?;
        self.needs_separator = false;
        log::info!("spool drained, {} records replayed", replayed);
        Ok(Drain::Complete { replayed })
    }
}

// ── File backend ─────────────────────────────────────────────────────

#[cfg(feature = "std")]
pub use file::FileStore;

#[cfg(feature = "std")]
mod file {
    use std::fs::{self, File, OpenOptions};
    use std::io::{self, ErrorKind, Read, Seek, SeekFrom, Write};
    use std::path::{Path, PathBuf};

    use super::SpoolStore;
    use crate::config::DEFAULT_SPOOL_PATH;

    /// Spool log in a single file. Created on first append.
    pub struct FileStore {
        path: PathBuf,
        /// Open read handle and its position, kept across a drain.
        reader: Option<(File, u64)>,
    }

    impl FileStore {
        pub fn new(path: impl Into<PathBuf>) -> Self {
            Self {
                path: path.into(),
                reader: None,
            }
        }

        pub fn path(&self) -> &Path {
            &self.path
        }

        pub fn exists(&self) -> bool {
            self.path.exists()
        }
    }

    /// Store at [`DEFAULT_SPOOL_PATH`].
    impl Default for FileStore {
        fn default() -> Self {
            Self::new(DEFAULT_SPOOL_PATH)
        }
    }

    impl SpoolStore for FileStore {
        type Error = io::Error;

        fn append(&mut self, bytes: &[u8]) -> io::Result<u64> {
            self.reader = None;
            let mut f = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)?;
            f.write_all(bytes)?;
            f.flush()?;
            Ok(f.metadata()?.len())
        }

        fn size(&mut self) -> io::Result<u64> {
            match fs::metadata(&self.path) {
                Ok(m) => Ok(m.len()),
                Err(e) if e.kind() == ErrorKind::NotFound => Ok(0),
                Err(e) => Err(e),
            }
        }

        fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
            let (file, pos) = match self.reader.take() {
                Some((file, pos)) if pos == offset => (file, pos),
                _ => {
                    let mut file = match File::open(&self.path) {
                        Ok(f) => f,
                        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
                        Err(e) => return Err(e),
                    };
                    file.seek(SeekFrom::Start(offset))?;
                    (file, offset)
                }
            };
            let mut file = file;
            let n = file.read(buf)?;
            self.reader = Some((file, pos + n as u64));
            Ok(n)
        }

        fn remove(&mut self) -> io::Result<()> {
            self.reader = None;
            match fs::remove_file(&self.path) {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
                Err(e) => Err(e),
            }
        }
    }
}
