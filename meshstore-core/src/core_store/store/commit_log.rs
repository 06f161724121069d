/*
    commit_log.rs - Append-only record log

    Provides durable, sequential storage of every record mutation.
    Replayed on open to rebuild state written since the last snapshot.

    Features:
    - Append-only writes (no in-place updates)
    - Sequential read for replay
    - Truncation after a snapshot
    - CRC32 checksums for corruption detection
    - A torn final entry (crash mid-append) is dropped, not fatal
*/

use crate::core_store::store::errors::{StoreError, StoreResult};
use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::warn;

/// Bytes of framing around each entry: seq + timestamp + len + checksum
const ENTRY_OVERHEAD: usize = 8 + 8 + 4 + 4;

/// Entry in the commit log
#[derive(Debug, Clone)]
pub struct LogEntry {
    /// Sequence number
    pub seq: u64,

    /// Timestamp
    pub timestamp: u64,

    /// Entry data (serialized mutation)
    pub data: Vec<u8>,

    /// CRC32 checksum
    pub checksum: u32,
}

impl LogEntry {
    pub fn new(seq: u64, timestamp: u64, data: Vec<u8>) -> Self {
        let checksum = crc32fast::hash(&data);
        LogEntry { seq, timestamp, data, checksum }
    }

    pub fn verify_checksum(&self) -> bool {
        crc32fast::hash(&self.data) == self.checksum
    }
}

/// Append-only commit log
pub struct CommitLog {
    path: PathBuf,
    file: BufWriter<File>,
    seq: u64,
    size: usize,
}

impl CommitLog {
    /// Create or open a commit log
    pub fn new(path: PathBuf) -> StoreResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new().create(true).append(true).read(true).open(&path)?;
        let (entries, valid_len) = Self::scan(&path)?;

        // Appends must land right after the last complete entry
        let file_len = file.metadata()?.len();
        if valid_len < file_len {
            warn!(
                path = %path.display(),
                dropped_bytes = file_len - valid_len,
                "Cutting torn tail off commit log"
            );
            file.set_len(valid_len)?;
            file.sync_data()?;
        }

        let seq = entries.last().map(|e| e.seq + 1).unwrap_or(0);
        Ok(CommitLog { path, file: BufWriter::new(file), seq, size: valid_len as usize })
    }

    /// Append an entry to the log
    pub fn append(&mut self, data: &[u8]) -> StoreResult<u64> {
        let entry = LogEntry::new(self.seq, crate::core_store::model::now_millis(), data.to_vec());

        // Write entry: [seq:8][timestamp:8][len:4][data:len][checksum:4]
        self.file.write_all(&entry.seq.to_le_bytes())?;
        self.file.write_all(&entry.timestamp.to_le_bytes())?;
        self.file.write_all(&(entry.data.len() as u32).to_le_bytes())?;
        self.file.write_all(&entry.data)?;
        self.file.write_all(&entry.checksum.to_le_bytes())?;

        self.file.flush()?;

        self.size += ENTRY_OVERHEAD + entry.data.len();
        self.seq += 1;

        Ok(entry.seq)
    }

    /// Read all entries from the log
    pub fn read_all(&self) -> StoreResult<Vec<LogEntry>> {
        Ok(Self::scan(&self.path)?.0)
    }

    /// Complete entries plus the byte length they span
    fn scan(path: &Path) -> StoreResult<(Vec<LogEntry>, u64)> {
        let file = File::open(path)?;
        let mut reader = BufReader::new(file);
        let mut entries = Vec::new();
        let mut valid_len = 0u64;

        loop {
            match Self::read_entry(&mut reader) {
                Ok(Some(entry)) => {
                    if !entry.verify_checksum() {
                        return Err(StoreError::CorruptedData(format!(
                            "Invalid checksum at seq {}",
                            entry.seq
                        )));
                    }
                    valid_len += (ENTRY_OVERHEAD + entry.data.len()) as u64;
                    entries.push(entry);
                }
                Ok(None) => break,
                Err(e) if e.kind() == ErrorKind::UnexpectedEof => {
                    warn!(
                        path = %path.display(),
                        recovered = entries.len(),
                        "Commit log ends with a torn entry, ignoring it"
                    );
                    break;
                }
                Err(e) => return Err(e.into()),
            }
        }

        Ok((entries, valid_len))
    }

    /// Read one entry; `Ok(None)` at a clean end of file
    fn read_entry(reader: &mut impl Read) -> std::io::Result<Option<LogEntry>> {
        let mut seq_buf = [0u8; 8];
        match reader.read(&mut seq_buf[..1])? {
            0 => return Ok(None),
            _ => reader.read_exact(&mut seq_buf[1..])?,
        }
        let seq = u64::from_le_bytes(seq_buf);

        let mut ts_buf = [0u8; 8];
        reader.read_exact(&mut ts_buf)?;
        let timestamp = u64::from_le_bytes(ts_buf);

        let mut len_buf = [0u8; 4];
        reader.read_exact(&mut len_buf)?;
        let len = u32::from_le_bytes(len_buf) as usize;

        // A torn length field can claim far more than the file holds
        let mut data = Vec::new();
        reader.by_ref().take(len as u64).read_to_end(&mut data)?;
        if data.len() < len {
            return Err(ErrorKind::UnexpectedEof.into());
        }

        let mut checksum_buf = [0u8; 4];
        reader.read_exact(&mut checksum_buf)?;
        let checksum = u32::from_le_bytes(checksum_buf);

        Ok(Some(LogEntry { seq, timestamp, data, checksum }))
    }

    /// Truncate the log (remove all entries)
    pub fn truncate(&mut self) -> StoreResult<()> {
        self.file.flush()?;
        self.file.get_mut().set_len(0)?;
        self.file.get_mut().seek(SeekFrom::Start(0))?;
        self.seq = 0;
        self.size = 0;
        Ok(())
    }

    /// Flush buffered writes and sync them to disk
    pub fn sync(&mut self) -> StoreResult<()> {
        self.file.flush()?;
        self.file.get_ref().sync_data()?;
        Ok(())
    }

    /// Get the current size of the log in bytes
    pub fn size(&self) -> usize {
        self.size
    }

    /// Get the next sequence number
    pub fn current_seq(&self) -> u64 {
        self.seq
    }
}
