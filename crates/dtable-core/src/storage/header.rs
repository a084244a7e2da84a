use xxhash_rust::xxh64::Xxh64;

use crate::error::StorageError;

/// Magic bytes identifying a dtable segment file.
pub const MAGIC: &[u8; 4] = b"DTSG";

/// Current segment format version.
pub const VERSION: u32 = 1;

/// Size of the fixed segment header in bytes.
pub const HEADER_SIZE: usize = 32;

/// The checksum covers header bytes `[0..24]` followed by the body.
const CHECKSUM_OFFSET: usize = 24;

/// Fixed-size header at the start of every segment file.
///
/// Layout:
/// ```text
/// [0..4]   magic: "DTSG"
/// [4..8]   version: u32 little-endian
/// [8..16]  record_count: u64 little-endian
/// [16..24] body_len: u64 little-endian
/// [24..32] xxhash64 of bytes 0..24 + body, little-endian
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentHeader {
    pub record_count: u64,
    pub body_len: u64,
    pub checksum: u64,
}

impl SegmentHeader {
    /// Build the header describing `body`.
    pub fn for_body(record_count: u64, body: &[u8]) -> Self {
        let body_len = body.len() as u64;
        Self {
            record_count,
            body_len,
            checksum: compute_checksum(record_count, body_len, body),
        }
    }

    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[..CHECKSUM_OFFSET].copy_from_slice(&prefix_bytes(self.record_count, self.body_len));
        buf[24..32].copy_from_slice(&self.checksum.to_le_bytes());
        buf
    }

    /// Parse a header, validating magic and version. `origin` names the file
    /// in errors.
    pub fn from_bytes(buf: &[u8; HEADER_SIZE], origin: &str) -> Result<Self, StorageError> {
        if &buf[0..4] != MAGIC {
            return Err(StorageError::InvalidMagic(origin.to_string()));
        }
        let version = u32::from_le_bytes(read_array(buf, 4));
        if version != VERSION {
            return Err(StorageError::UnsupportedVersion(version));
        }
        Ok(Self {
            record_count: u64::from_le_bytes(read_array(buf, 8)),
            body_len: u64::from_le_bytes(read_array(buf, 16)),
            checksum: u64::from_le_bytes(read_array(buf, 24)),
        })
    }

    /// Check that `body` is the one this header was written for.
    pub fn verify_body(&self, body: &[u8], origin: &str) -> Result<(), StorageError> {
        if body.len() as u64 != self.body_len
            || compute_checksum(self.record_count, self.body_len, body) != self.checksum
        {
            return Err(StorageError::ChecksumMismatch(origin.to_string()));
        }
        Ok(())
    }
}

fn prefix_bytes(record_count: u64, body_len: u64) -> [u8; CHECKSUM_OFFSET] {
    let mut buf = [0u8; CHECKSUM_OFFSET];
    buf[0..4].copy_from_slice(MAGIC);
    buf[4..8].copy_from_slice(&VERSION.to_le_bytes());
    buf[8..16].copy_from_slice(&record_count.to_le_bytes());
    buf[16..24].copy_from_slice(&body_len.to_le_bytes());
    buf
}

fn compute_checksum(record_count: u64, body_len: u64, body: &[u8]) -> u64 {
    let mut hasher = Xxh64::new(0);
    hasher.update(&prefix_bytes(record_count, body_len));
    hasher.update(body);
    hasher.digest()
}

fn read_array<const N: usize>(buf: &[u8], offset: usize) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&buf[offset..offset + N]);
    out
}
