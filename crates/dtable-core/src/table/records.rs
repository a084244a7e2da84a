//! Shared record plumbing for backends: encoding and size checks on the way
//! in, byte-bounded batching and decoding on the way out.

use serde_json::Value;

use crate::codec::Codec;
use crate::error::{EncodingError, Error, RecordField, TableError};
use crate::types::{
    DEFAULT_CHUNK_BYTES_PER_PARTITION, DEFAULT_PUT_CHUNK_SIZE, KEY_SIZE_LIMIT, RawRecord, Record,
    VALUE_SIZE_LIMIT,
};

/// Converts records between their caller and stored forms.
#[derive(Clone, Copy)]
pub struct RecordEncoder<'a> {
    codec: &'a dyn Codec,
    use_codec: bool,
}

impl<'a> RecordEncoder<'a> {
    pub fn new(codec: &'a dyn Codec, use_codec: bool) -> Self {
        Self { codec, use_codec }
    }

    /// Encode a record and enforce the key and value size limits.
    pub fn encode(&self, record: &Record) -> Result<RawRecord, Error> {
        let (key, value) = record;
        let key = self.encode_field(key, RecordField::Key)?;
        check_size(RecordField::Key, key.len(), KEY_SIZE_LIMIT)?;
        let value = self.encode_field(value, RecordField::Value)?;
        check_size(RecordField::Value, value.len(), VALUE_SIZE_LIMIT)?;
        Ok((key, value))
    }

    pub fn decode(&self, raw: RawRecord) -> Result<Record, Error> {
        let (key, value) = raw;
        Ok((self.decode_field(key)?, self.decode_field(value)?))
    }

    fn encode_field(&self, value: &Value, field: RecordField) -> Result<Vec<u8>, Error> {
        if self.use_codec {
            return Ok(self.codec.encode(value)?);
        }
        match value {
            Value::String(s) => Ok(s.as_bytes().to_vec()),
            _ => Err(EncodingError::RawNotString(field).into()),
        }
    }

    fn decode_field(&self, bytes: Vec<u8>) -> Result<Value, Error> {
        if self.use_codec {
            return Ok(self.codec.decode(&bytes)?);
        }
        Ok(Value::String(match String::from_utf8(bytes) {
            Ok(s) => s,
            Err(e) => String::from_utf8_lossy(e.as_bytes()).into_owned(),
        }))
    }
}

fn check_size(field: RecordField, actual: usize, limit: usize) -> Result<(), TableError> {
    if actual >= limit {
        return Err(TableError::RecordTooLarge {
            field,
            limit,
            actual,
        });
    }
    Ok(())
}

/// Encode `records` and hand them to `flush` in chunks of at most
/// `chunk_size` records. Returns the number of records written.
///
/// Chunks flushed before a failing record stay written.
pub fn write_chunked(
    records: &mut dyn Iterator<Item = Record>,
    encoder: RecordEncoder<'_>,
    chunk_size: usize,
    mut flush: impl FnMut(Vec<RawRecord>) -> Result<(), Error>,
) -> Result<u64, Error> {
    let chunk_size = if chunk_size == 0 {
        DEFAULT_PUT_CHUNK_SIZE
    } else {
        chunk_size
    };
    let mut written = 0u64;
    let mut chunk = Vec::with_capacity(chunk_size.min(4096));
    for record in records {
        chunk.push(encoder.encode(&record)?);
        if chunk.len() >= chunk_size {
            written += chunk.len() as u64;
            flush(std::mem::take(&mut chunk))?;
        }
    }
    if !chunk.is_empty() {
        written += chunk.len() as u64;
        flush(chunk)?;
    }
    Ok(written)
}

/// How `collect` groups records into batches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkPolicy {
    /// Yield a batch once it holds at least this many key+value bytes.
    MinBytes(usize),
    /// Yield everything as one batch.
    Unbounded,
}

impl ChunkPolicy {
    /// Interpret a caller's `min_chunk_size`: `0` is the default of
    /// `partitions × 1.75 MiB`, negative means unbounded.
    pub fn resolve(min_chunk_size: i64, partitions: usize) -> Self {
        match min_chunk_size {
            0 => ChunkPolicy::MinBytes(partitions.max(1) * DEFAULT_CHUNK_BYTES_PER_PARTITION),
            n if n < 0 => ChunkPolicy::Unbounded,
            n => ChunkPolicy::MinBytes(n as usize),
        }
    }
}

/// Lazy batches of records produced by `Table::collect`.
///
/// Each batch holds at least the policy's byte budget except the last one.
/// The first error ends the sequence.
pub struct RecordBatches<'a> {
    source: Box<dyn Iterator<Item = Result<RawRecord, Error>> + 'a>,
    encoder: RecordEncoder<'a>,
    policy: ChunkPolicy,
    done: bool,
}

impl<'a> RecordBatches<'a> {
    pub fn new(
        source: Box<dyn Iterator<Item = Result<RawRecord, Error>> + 'a>,
        encoder: RecordEncoder<'a>,
        policy: ChunkPolicy,
    ) -> Self {
        Self {
            source,
            encoder,
            policy,
            done: false,
        }
    }

    /// Drain every batch into one vector.
    pub fn into_vec(self) -> Result<Vec<Record>, Error> {
        let mut out = Vec::new();
        for batch in self {
            out.extend(batch?);
        }
        Ok(out)
    }

    /// Flatten the batches into individual records.
    pub fn records(self) -> impl Iterator<Item = Result<Record, Error>> + 'a {
        self.flat_map(|batch| match batch {
            Ok(records) => records.into_iter().map(Ok).collect::<Vec<_>>(),
            Err(e) => vec![Err(e)],
        })
    }
}

impl Iterator for RecordBatches<'_> {
    type Item = Result<Vec<Record>, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let mut batch = Vec::new();
        let mut bytes = 0usize;
        for raw in self.source.by_ref() {
            let raw = match raw {
                Ok(raw) => raw,
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            };
            bytes += raw.0.len() + raw.1.len();
            match self.encoder.decode(raw) {
                Ok(record) => batch.push(record),
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            }
            if let ChunkPolicy::MinBytes(min) = self.policy {
                if bytes >= min {
                    return Some(Ok(batch));
                }
            }
        }
        self.done = true;
        if batch.is_empty() { None } else { Some(Ok(batch)) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::JsonCodec;
    use serde_json::json;

    fn raw_source(n: usize) -> Box<dyn Iterator<Item = Result<RawRecord, Error>>> {
        Box::new((0..n).map(|i| {
            let key = JsonCodec.encode(&json!(format!("k{i:03}"))).unwrap();
            let value = JsonCodec.encode(&json!(i)).unwrap();
            Ok((key, value))
        }))
    }

    #[test]
    fn test_encode_rejects_oversized_key() {
        let encoder = RecordEncoder::new(&JsonCodec, false);
        let record = (json!("k".repeat(KEY_SIZE_LIMIT)), json!("v"));
        match encoder.encode(&record) {
            Err(Error::Table(TableError::RecordTooLarge {
                field: RecordField::Key,
                limit: KEY_SIZE_LIMIT,
                actual,
            })) => assert_eq!(actual, KEY_SIZE_LIMIT),
            other => panic!("expected RecordTooLarge, got {other:?}"),
        }

        let just_fits = (json!("k".repeat(KEY_SIZE_LIMIT - 1)), json!("v"));
        assert!(encoder.encode(&just_fits).is_ok());
    }

    #[test]
    fn test_encode_rejects_oversized_value() {
        let encoder = RecordEncoder::new(&JsonCodec, false);
        let record = (json!("k"), json!("v".repeat(VALUE_SIZE_LIMIT)));
        assert!(matches!(
            encoder.encode(&record),
            Err(Error::Table(TableError::RecordTooLarge {
                field: RecordField::Value,
                ..
            }))
        ));
    }

    #[test]
    fn test_raw_mode_requires_strings() {
        let encoder = RecordEncoder::new(&JsonCodec, false);
        match encoder.encode(&(json!("k"), json!(42))) {
            Err(Error::Encoding(EncodingError::RawNotString(RecordField::Value))) => {}
            other => panic!("expected RawNotString, got {other:?}"),
        }
        let (k, v) = encoder.encode(&(json!("k"), json!("v"))).unwrap();
        assert_eq!((k.as_slice(), v.as_slice()), (&b"k"[..], &b"v"[..]));
    }

    #[test]
    fn test_write_chunked_splits_by_count() {
        let encoder = RecordEncoder::new(&JsonCodec, true);
        let mut records = (0..10).map(|i| (json!(i), json!(i * 2)));
        let mut chunks = Vec::new();
        let written = write_chunked(&mut records, encoder, 4, |chunk| {
            chunks.push(chunk.len());
            Ok(())
        })
        .unwrap();
        assert_eq!(written, 10);
        assert_eq!(chunks, vec![4, 4, 2]);
    }

    #[test]
    fn test_write_chunked_keeps_earlier_chunks_on_error() {
        let encoder = RecordEncoder::new(&JsonCodec, false);
        let mut records = vec![
            (json!("a"), json!("1")),
            (json!("b"), json!("2")),
            (json!("c"), json!(3)),
        ]
        .into_iter();
        let mut flushed = 0;
        let result = write_chunked(&mut records, encoder, 2, |chunk| {
            flushed += chunk.len();
            Ok(())
        });
        assert!(result.is_err());
        assert_eq!(flushed, 2);
    }

    #[test]
    fn test_policy_resolution() {
        assert_eq!(
            ChunkPolicy::resolve(0, 4),
            ChunkPolicy::MinBytes(4 * DEFAULT_CHUNK_BYTES_PER_PARTITION)
        );
        assert_eq!(ChunkPolicy::resolve(-1, 4), ChunkPolicy::Unbounded);
        assert_eq!(ChunkPolicy::resolve(64, 4), ChunkPolicy::MinBytes(64));
    }

    #[test]
    fn test_batches_flatten_identically() {
        let encoder = RecordEncoder::new(&JsonCodec, true);
        let expected = RecordBatches::new(raw_source(50), encoder, ChunkPolicy::Unbounded)
            .into_vec()
            .unwrap();
        assert_eq!(expected.len(), 50);

        for policy in [ChunkPolicy::MinBytes(1), ChunkPolicy::MinBytes(40), ChunkPolicy::MinBytes(1 << 20)] {
            let got = RecordBatches::new(raw_source(50), encoder, policy)
                .into_vec()
                .unwrap();
            assert_eq!(got, expected, "policy {policy:?}");
        }
    }

    #[test]
    fn test_batches_respect_min_bytes() {
        let encoder = RecordEncoder::new(&JsonCodec, true);
        // Each record is `"kNNN"` (6 bytes) + a 1-2 digit value.
        let batches: Vec<_> = RecordBatches::new(raw_source(30), encoder, ChunkPolicy::MinBytes(20))
            .map(Result::unwrap)
            .collect();
        assert!(batches.len() > 1);
        for batch in &batches[..batches.len() - 1] {
            let bytes: usize = batch
                .iter()
                .map(|(k, v)| k.to_string().len() + v.to_string().len())
                .sum();
            assert!(bytes >= 20);
        }
    }

    #[test]
    fn test_unbounded_is_single_batch() {
        let encoder = RecordEncoder::new(&JsonCodec, true);
        let batches: Vec<_> =
            RecordBatches::new(raw_source(30), encoder, ChunkPolicy::Unbounded).collect();
        assert_eq!(batches.len(), 1);
    }

    #[test]
    fn test_empty_source_yields_nothing() {
        let encoder = RecordEncoder::new(&JsonCodec, true);
        let mut batches = RecordBatches::new(raw_source(0), encoder, ChunkPolicy::MinBytes(1));
        assert!(batches.next().is_none());
    }

    #[test]
    fn test_error_ends_sequence() {
        let encoder = RecordEncoder::new(&JsonCodec, true);
        let source: Box<dyn Iterator<Item = Result<RawRecord, Error>>> = Box::new(
            vec![
                Ok((b"\"a\"".to_vec(), b"1".to_vec())),
                Err(TableError::BackendUnavailable("gone".to_string()).into()),
                Ok((b"\"b\"".to_vec(), b"2".to_vec())),
            ]
            .into_iter(),
        );
        let mut batches = RecordBatches::new(source, encoder, ChunkPolicy::Unbounded);
        assert!(batches.next().unwrap().is_err());
        assert!(batches.next().is_none());
    }

    #[test]
    fn test_raw_decode_is_lossy_utf8() {
        let encoder = RecordEncoder::new(&JsonCodec, false);
        let (k, v) = encoder.decode((b"key".to_vec(), vec![0xFF, b'x'])).unwrap();
        assert_eq!(k, json!("key"));
        assert_eq!(v, json!("\u{FFFD}x"));
    }
}
