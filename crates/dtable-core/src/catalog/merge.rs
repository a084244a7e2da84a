//! Reconciles a metadata write against an existing catalog row.
//!
//! Payload decoding here is lenient: an empty or undecodable blob reads as an
//! empty mapping or list, so a damaged entry can still take new metadata.

use serde_json::{Map, Value};
use tracing::warn;

use crate::codec::Codec;
use crate::error::{CatalogError, EncodingError, Error};
use crate::types::SAMPLE_CAPACITY;

/// Metadata to merge into a catalog entry.
///
/// All parts are optional: an empty update only refreshes the entry's
/// timestamp.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SchemaUpdate {
    /// Keys overlaid onto the stored schema mapping.
    pub schema: Map<String, Value>,
    /// Records appended to the stored sample until it holds
    /// [`SAMPLE_CAPACITY`] entries.
    pub sample_of_data: Vec<Value>,
    /// Added to the stored count.
    pub count: u64,
}

impl SchemaUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overlay every key of `schema`.
    pub fn schema(mut self, schema: Map<String, Value>) -> Self {
        self.schema.extend(schema);
        self
    }

    /// Overlay a single schema key.
    pub fn field(mut self, key: impl Into<String>, value: Value) -> Self {
        self.schema.insert(key.into(), value);
        self
    }

    pub fn sample(mut self, records: Vec<Value>) -> Self {
        self.sample_of_data = records;
        self
    }

    pub fn count(mut self, count: u64) -> Self {
        self.count = count;
        self
    }
}

/// Overlay `update` onto the encoded mapping `existing`.
///
/// Returns `existing` unchanged when there is nothing to overlay.
pub(crate) fn merge_schema(
    codec: &dyn Codec,
    existing: &[u8],
    update: &Map<String, Value>,
) -> Result<Vec<u8>, EncodingError> {
    if update.is_empty() {
        return Ok(existing.to_vec());
    }
    let mut schema = decode_object(codec, existing);
    for (key, value) in update {
        schema.insert(key.clone(), value.clone());
    }
    codec.encode(&Value::Object(schema))
}

/// Append the head of `incoming` to the encoded list `existing`, never
/// growing it past [`SAMPLE_CAPACITY`].
pub(crate) fn merge_sample(
    codec: &dyn Codec,
    existing: &[u8],
    incoming: &[Value],
) -> Result<Vec<u8>, EncodingError> {
    if incoming.is_empty() {
        return Ok(existing.to_vec());
    }
    let mut sample = decode_list(codec, existing);
    if sample.len() >= SAMPLE_CAPACITY {
        return Ok(existing.to_vec());
    }
    let room = SAMPLE_CAPACITY - sample.len();
    sample.extend(incoming.iter().take(room).cloned());
    codec.encode(&Value::Array(sample))
}

/// Decode a mapping payload, reading empty or damaged blobs as `{}`.
pub(crate) fn decode_object(codec: &dyn Codec, bytes: &[u8]) -> Map<String, Value> {
    if bytes.is_empty() {
        return Map::new();
    }
    match codec.decode(bytes) {
        Ok(Value::Object(map)) => map,
        Ok(other) => {
            warn!(found = %type_name(&other), "schema payload is not a mapping; ignoring it");
            Map::new()
        }
        Err(e) => {
            warn!(error = %e, "undecodable schema payload; ignoring it");
            Map::new()
        }
    }
}

/// Decode a list payload, reading empty or damaged blobs as `[]`.
pub(crate) fn decode_list(codec: &dyn Codec, bytes: &[u8]) -> Vec<Value> {
    if bytes.is_empty() {
        return Vec::new();
    }
    match codec.decode(bytes) {
        Ok(Value::Array(list)) => list,
        Ok(other) => {
            warn!(found = %type_name(&other), "sample payload is not a list; ignoring it");
            Vec::new()
        }
        Err(e) => {
            warn!(error = %e, "undecodable sample payload; ignoring it");
            Vec::new()
        }
    }
}

/// Decode a payload and check its shape, surfacing any problem as an error.
pub(crate) fn decode_strict(
    codec: &dyn Codec,
    bytes: &[u8],
    shape: fn(&Value) -> bool,
) -> Result<Value, Error> {
    let value = codec.decode(bytes)?;
    if !shape(&value) {
        return Err(CatalogError::Corrupted(format!(
            "unexpected payload type: {}",
            type_name(&value)
        ))
        .into());
    }
    Ok(value)
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "mapping",
    }
}
