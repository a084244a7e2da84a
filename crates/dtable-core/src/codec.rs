//! Byte codec used for catalog payloads and, optionally, record values.

use serde_json::Value;

use crate::error::EncodingError;

/// Converts domain values to and from an opaque byte encoding.
pub trait Codec: Send + Sync {
    fn encode(&self, value: &Value) -> Result<Vec<u8>, EncodingError>;

    fn decode(&self, bytes: &[u8]) -> Result<Value, EncodingError>;
}

/// Compact JSON text encoding.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn encode(&self, value: &Value) -> Result<Vec<u8>, EncodingError> {
        serde_json::to_vec(value).map_err(|e| EncodingError::Codec(e.to_string()))
    }

    fn decode(&self, bytes: &[u8]) -> Result<Value, EncodingError> {
        serde_json::from_slice(bytes).map_err(|e| EncodingError::Codec(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_json_codec_is_compact() {
        let bytes = JsonCodec.encode(&json!({"a": [1, 2]})).unwrap();
        assert_eq!(bytes, br#"{"a":[1,2]}"#);
    }

    #[test]
    fn test_json_codec_rejects_garbage() {
        match JsonCodec.decode(b"\xff\x00not json") {
            Err(EncodingError::Codec(_)) => {}
            other => panic!("expected Codec error, got {other:?}"),
        }
    }
}
