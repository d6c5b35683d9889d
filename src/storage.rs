use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use rkyv::Deserialize;
use tracing::warn;

use crate::error::{QaError, Result};
use crate::model::LogEntry;

/// Append-only record log.
///
/// Frame format: `[Length (4b LE)][rkyv archive of LogEntry (N bytes)]`.
/// Records are never rewritten in place; the whole file is replaced by
/// [`Segment::rewrite`] when a snapshot is imported.
#[derive(Debug)]
pub struct Segment {
    pub file_path: PathBuf,
    file: File,
    strict: bool,
    current_offset: u64,
}

impl Segment {
    pub fn new(path: &Path, strict: bool) -> io::Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)?;

        let current_offset = file.metadata()?.len();

        Ok(Self {
            file_path: path.to_path_buf(),
            file,
            strict,
            current_offset,
        })
    }

    pub fn len(&self) -> u64 {
        self.current_offset
    }

    pub fn is_empty(&self) -> bool {
        self.current_offset == 0
    }

    pub fn append(&mut self, entry: &LogEntry) -> Result<u64> {
        let bytes = rkyv::to_bytes::<_, 4096>(entry)
            .map_err(|e| QaError::Corrupt(e.to_string()))?;

        let start = self.current_offset;
        self.file.seek(SeekFrom::Start(start))?;

        let len = bytes.len() as u32;
        self.file.write_all(&len.to_le_bytes())?;
        self.file.write_all(&bytes)?;
        if self.strict {
            self.file.sync_data()?;
        }

        self.current_offset += 4 + bytes.len() as u64;
        Ok(start)
    }

    /// Decodes every frame in order. A torn trailing frame (crash mid-append)
    /// is dropped with a warning and the log is truncated back to the last
    /// complete frame; anything undecodable before that is an error.
    pub fn read_all(&mut self) -> Result<Vec<LogEntry>> {
        // Clone file handle so the writer's cursor is left alone
        let mut reader = BufReader::new(self.file.try_clone()?);
        reader.seek(SeekFrom::Start(0))?;

        let mut entries = Vec::new();
        let mut offset = 0u64;

        while offset < self.current_offset {
            let remaining = self.current_offset - offset;
            if remaining < 4 {
                self.truncate_tail(offset, remaining)?;
                break;
            }

            let mut len_buf = [0u8; 4];
            reader.read_exact(&mut len_buf)?;
            let len = u32::from_le_bytes(len_buf) as u64;
            if len > remaining - 4 {
                self.truncate_tail(offset, remaining)?;
                break;
            }

            let mut bytes = rkyv::AlignedVec::with_capacity(len as usize);
            bytes.resize(len as usize, 0);
            reader.read_exact(&mut bytes)?;

            entries.push(decode(&bytes, offset)?);
            offset += 4 + len;
        }

        Ok(entries)
    }

    /// Atomically replaces the log contents with `entries`.
    pub fn rewrite(&mut self, entries: &[LogEntry]) -> Result<()> {
        let tmp_path = self.file_path.with_extension("compacted");
        // Leftovers from an interrupted rewrite must not prefix the new log.
        match std::fs::remove_file(&tmp_path) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => return Err(e.into()),
            _ => {}
        }
        {
            let mut fresh = Segment::new(&tmp_path, false)?;
            for entry in entries {
                fresh.append(entry)?;
            }
            fresh.file.sync_all()?;
        }
        std::fs::rename(&tmp_path, &self.file_path)?;
        *self = Segment::new(&self.file_path, self.strict)?;
        Ok(())
    }

    fn truncate_tail(&mut self, offset: u64, dropped: u64) -> Result<()> {
        warn!(offset, dropped, path = %self.file_path.display(), "dropping torn record at end of log");
        self.file.set_len(offset)?;
        self.current_offset = offset;
        Ok(())
    }
}

fn decode(bytes: &[u8], offset: u64) -> Result<LogEntry> {
    let archived = rkyv::check_archived_root::<LogEntry>(bytes)
        .map_err(|e| QaError::Corrupt(format!("frame at offset {}: {}", offset, e)))?;
    let entry: LogEntry = archived
        .deserialize(&mut rkyv::Infallible)
        .map_err(|e| QaError::Corrupt(format!("frame at offset {}: {:?}", offset, e)))?;
    Ok(entry)
}
