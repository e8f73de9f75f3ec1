//! Append-only per-stream log of every encoded message ever transmitted. The file is the
//!  concatenation of message blocks (2-byte big-endian length + payload) in sequence order
//!  starting at sequence 1, so the sequence numbering is implicit in the record order and
//!  survives restarts without a separately persisted counter.

use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Write};
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use tracing::{debug, warn};

use crate::error::LogError;
use crate::seq::SequenceNumber;
use crate::wire::MESSAGE_PREFIX_LEN;

const WRITE_BUF_CAPACITY: usize = 64 * 1024;

pub struct RecoveryLog {
    path: PathBuf,
    writer: BufWriter<File>,
    reader: File,
    /// file offset of the record for sequence `i + 1`
    index: Vec<u64>,
    /// end of the last indexed record == the file length (counting unflushed appends)
    position: u64,
}

impl RecoveryLog {
    /// Opens (or creates) the log file, scanning it to rebuild the sequence index. A torn
    ///  trailing record left behind by a crash is truncated away.
    pub fn open(path: impl AsRef<Path>) -> Result<RecoveryLog, LogError> {
        let path = path.as_ref().to_path_buf();
        let write_file = OpenOptions::new().create(true).append(true).open(&path)?;
        let reader = OpenOptions::new().read(true).open(&path)?;

        let file_len = reader.metadata()?.len();
        let mut index = Vec::new();
        let mut position = 0u64;
        {
            let mut scan = BufReader::new(&reader);
            while position < file_len {
                if file_len - position < MESSAGE_PREFIX_LEN as u64 {
                    break;
                }
                let mut prefix = [0u8; MESSAGE_PREFIX_LEN];
                scan.read_exact(&mut prefix)?;
                let record_len = u16::from_be_bytes(prefix) as u64;
                if position + MESSAGE_PREFIX_LEN as u64 + record_len > file_len {
                    break;
                }
                scan.seek_relative(record_len as i64)?;
                index.push(position);
                position += MESSAGE_PREFIX_LEN as u64 + record_len;
            }
        }
        if position < file_len {
            warn!("recovery log {:?}: truncating torn record at offset {} ({} trailing bytes)",
                  path, position, file_len - position);
            write_file.set_len(position)?;
        }

        debug!("opened recovery log {:?} with {} messages", path, index.len());

        Ok(RecoveryLog {
            path,
            writer: BufWriter::with_capacity(WRITE_BUF_CAPACITY, write_file),
            reader,
            index,
            position,
        })
    }

    /// The highest sequence number with a record in the log, `ZERO` for an empty log.
    pub fn last_written(&self) -> SequenceNumber {
        SequenceNumber::from_raw(self.index.len() as u64)
    }

    /// Appends an encoded message (length prefix included) and returns the sequence number
    ///  it occupies. The write is buffered; call [`flush`](Self::flush) before the packet
    ///  carrying this message is sent.
    pub fn append(&mut self, encoded: &[u8]) -> Result<SequenceNumber, LogError> {
        self.writer.write_all(encoded)?;
        self.index.push(self.position);
        self.position += encoded.len() as u64;
        Ok(self.last_written())
    }

    /// Pushes buffered appends to the OS. Durability ordering: this completes before the
    ///  multicast send of the corresponding batch is issued.
    pub fn flush(&mut self) -> Result<(), LogError> {
        self.writer.flush()?;
        Ok(())
    }

    /// Drops every record above `last`, including any still sitting in the write buffer.
    ///  Used to roll back a partially appended batch after a write error.
    pub fn truncate_to(&mut self, last: SequenceNumber) -> Result<(), LogError> {
        let keep = last.to_raw() as usize;
        if keep >= self.index.len() {
            return Ok(());
        }
        let new_position = self.index[keep];

        let fresh = OpenOptions::new().append(true).open(&self.path)?;
        let old = std::mem::replace(&mut self.writer, BufWriter::with_capacity(WRITE_BUF_CAPACITY, fresh));
        let (old_file, _discarded) = old.into_parts();
        old_file.set_len(new_position)?;

        self.index.truncate(keep);
        self.position = new_position;
        Ok(())
    }

    /// Re-opens the log in place, discarding unflushed state and rebuilding the index from
    ///  the file. This is the restart path: the publisher derives its next sequence number
    ///  from `last_written` afterwards.
    pub fn reopen(&mut self) -> Result<(), LogError> {
        // make sure no bytes from a failed batch can reach the file when the old writer drops
        let placeholder = OpenOptions::new().append(true).open(&self.path)?;
        let old = std::mem::replace(&mut self.writer, BufWriter::with_capacity(WRITE_BUF_CAPACITY, placeholder));
        let _ = old.into_parts();

        *self = RecoveryLog::open(&self.path)?;
        Ok(())
    }

    /// Random-access read of the encoded message with the given sequence number.
    pub fn read(&self, seq: SequenceNumber) -> Result<Bytes, LogError> {
        let idx = match seq.checked_minus(SequenceNumber::FIRST) {
            Some(idx) if (idx as usize) < self.index.len() => idx as usize,
            _ => return Err(LogError::NotFound { seq }),
        };

        let offset = self.index[idx];
        let end = self.index.get(idx + 1).copied().unwrap_or(self.position);

        let mut buf = vec![0u8; (end - offset) as usize];
        self.reader.read_exact_at(&mut buf, offset)?;
        Ok(Bytes::from(buf))
    }

    /// Reads up to `count` consecutive encoded messages starting at `start`, truncated at
    ///  `last_written`.
    pub fn read_range(&self, start: SequenceNumber, count: usize) -> Result<Vec<Bytes>, LogError> {
        let available = match self.last_written().checked_minus(start) {
            Some(d) => (d + 1) as usize,
            None => return Ok(Vec::new()),
        };
        if start == SequenceNumber::ZERO {
            return Err(LogError::NotFound { seq: start });
        }

        let n = count.min(available);
        let mut result = Vec::with_capacity(n);
        for seq in start.to(start.plus(n as u64)) {
            result.push(self.read(seq)?);
        }
        Ok(result)
    }
}
