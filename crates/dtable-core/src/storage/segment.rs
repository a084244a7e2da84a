//! Segment files: one sorted, checksummed run of records per partition.
//!
//! Body layout is a sequence of
//! `key_len: u32 LE | value_len: u32 LE | key | value`, sorted by key with
//! no duplicates. A missing segment file is an empty partition.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::Path;

use crate::error::StorageError;
use crate::types::RawRecord;

use super::header::{HEADER_SIZE, SegmentHeader};

/// Read only the header of a segment. `Ok(None)` if the file does not exist.
pub fn read_header(path: &Path) -> Result<Option<SegmentHeader>, StorageError> {
    let mut file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let origin = path.display().to_string();
    let mut buf = [0u8; HEADER_SIZE];
    file.read_exact(&mut buf).map_err(|e| truncated(&origin, e))?;
    let header = SegmentHeader::from_bytes(&buf, &origin)?;

    let file_len = file.metadata()?.len();
    if file_len != HEADER_SIZE as u64 + header.body_len {
        return Err(StorageError::Corrupted {
            path: origin,
            reason: format!(
                "file is {file_len} bytes, header promises {}",
                HEADER_SIZE as u64 + header.body_len
            ),
        });
    }
    Ok(Some(header))
}

/// Read every record of a segment, verifying its checksum.
pub fn read_segment(path: &Path) -> Result<Vec<RawRecord>, StorageError> {
    let bytes = match fs::read(path) {
        Ok(b) => b,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    let origin = path.display().to_string();
    if bytes.len() < HEADER_SIZE {
        return Err(StorageError::Corrupted {
            path: origin,
            reason: "shorter than segment header".to_string(),
        });
    }
    let (head, body) = bytes.split_at(HEADER_SIZE);
    let mut head_buf = [0u8; HEADER_SIZE];
    head_buf.copy_from_slice(head);
    let header = SegmentHeader::from_bytes(&head_buf, &origin)?;
    header.verify_body(body, &origin)?;
    decode_body(body, header.record_count, &origin)
}

/// Read a segment into a key-ordered map.
pub fn read_map(path: &Path) -> Result<BTreeMap<Vec<u8>, Vec<u8>>, StorageError> {
    Ok(read_segment(path)?.into_iter().collect())
}

/// Atomically replace the segment at `path` with `records`.
///
/// Writes a sibling temp file, fsyncs it, then renames it into place.
pub fn write_segment(
    path: &Path,
    records: &BTreeMap<Vec<u8>, Vec<u8>>,
) -> Result<SegmentHeader, StorageError> {
    let body_len: usize = records.iter().map(|(k, v)| 8 + k.len() + v.len()).sum();
    let mut body = Vec::with_capacity(body_len);
    for (key, value) in records {
        body.extend_from_slice(&(key.len() as u32).to_le_bytes());
        body.extend_from_slice(&(value.len() as u32).to_le_bytes());
        body.extend_from_slice(key);
        body.extend_from_slice(value);
    }
    let header = SegmentHeader::for_body(records.len() as u64, &body);

    let tmp_path = path.with_extension("seg.tmp");
    {
        let mut file = File::create(&tmp_path)?;
        file.write_all(&header.to_bytes())?;
        file.write_all(&body)?;
        file.sync_all()?;
    }
    fs::rename(&tmp_path, path)?;
    Ok(header)
}

fn decode_body(body: &[u8], record_count: u64, origin: &str) -> Result<Vec<RawRecord>, StorageError> {
    let corrupted = |reason: &str| StorageError::Corrupted {
        path: origin.to_string(),
        reason: reason.to_string(),
    };

    let mut records = Vec::with_capacity(record_count as usize);
    let mut pos = 0usize;
    while pos < body.len() {
        if body.len() - pos < 8 {
            return Err(corrupted("truncated record header"));
        }
        let key_len = u32::from_le_bytes([body[pos], body[pos + 1], body[pos + 2], body[pos + 3]])
            as usize;
        let value_len =
            u32::from_le_bytes([body[pos + 4], body[pos + 5], body[pos + 6], body[pos + 7]])
                as usize;
        pos += 8;
        if body.len() - pos < key_len + value_len {
            return Err(corrupted("truncated record payload"));
        }
        let key = body[pos..pos + key_len].to_vec();
        pos += key_len;
        let value = body[pos..pos + value_len].to_vec();
        pos += value_len;
        records.push((key, value));
    }
    if records.len() as u64 != record_count {
        return Err(corrupted("record count does not match header"));
    }
    Ok(records)
}

fn truncated(origin: &str, e: io::Error) -> StorageError {
    if e.kind() == io::ErrorKind::UnexpectedEof {
        StorageError::Corrupted {
            path: origin.to_string(),
            reason: "shorter than segment header".to_string(),
        }
    } else {
        e.into()
    }
}
