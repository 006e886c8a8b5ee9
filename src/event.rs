//! Outbound event schema and payload encoding.

use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::error::PublishError;

/// Normalized tag-change event published to downstream consumers.
///
/// One event is emitted per delivered value per non-heartbeat monitored
/// item. Delivery is at-most-once from the bridge's perspective; there is
/// no outbound retry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagChangeEvent {
    /// Namespace-qualified server node id (e.g. "ns=2;i=100").
    pub node_id: String,

    /// Registry display name of the tag.
    pub display_name: String,

    /// String-encoded value; `None` when the last read was invalid.
    pub value: Option<String>,
}

/// Serialization format for outbound payloads.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Format {
    /// JSON format (human-readable, good for debugging).
    #[default]
    Json,

    /// CBOR format (compact binary, better for high-volume tag traffic).
    Cbor,
}

/// Encode a value to bytes using the specified format.
pub fn encode<T: Serialize>(value: &T, format: Format) -> Result<Vec<u8>, PublishError> {
    match format {
        Format::Json => serde_json::to_vec(value).map_err(|e| PublishError::Encode(e.to_string())),
        Format::Cbor => {
            let mut buf = Vec::new();
            ciborium::into_writer(value, &mut buf)
                .map_err(|e| PublishError::Encode(e.to_string()))?;
            Ok(buf)
        }
    }
}

/// Decode bytes using the specified format.
pub fn decode<T: DeserializeOwned>(data: &[u8], format: Format) -> Result<T, PublishError> {
    match format {
        Format::Json => {
            serde_json::from_slice(data).map_err(|e| PublishError::Encode(e.to_string()))
        }
        Format::Cbor => ciborium::from_reader(data).map_err(|e| PublishError::Encode(e.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_roundtrip() {
        let event = TagChangeEvent {
            node_id: "ns=2;i=100".to_string(),
            display_name: "Temp1".to_string(),
            value: Some("72.5".to_string()),
        };

        let encoded = encode(&event, Format::Json).unwrap();
        let decoded: TagChangeEvent = decode(&encoded, Format::Json).unwrap();
        assert_eq!(event, decoded);
    }

    #[test]
    fn test_json_field_names() {
        let event = TagChangeEvent {
            node_id: "ns=2;i=100".to_string(),
            display_name: "Temp1".to_string(),
            value: None,
        };

        let json = String::from_utf8(encode(&event, Format::Json).unwrap()).unwrap();
        assert!(json.contains("\"node_id\":\"ns=2;i=100\""));
        assert!(json.contains("\"display_name\":\"Temp1\""));
        assert!(json.contains("\"value\":null"));
    }

    #[test]
    fn test_cbor_roundtrip() {
        let event = TagChangeEvent {
            node_id: "ns=2;i=7".to_string(),
            display_name: "Pressure".to_string(),
            value: Some("1.013".to_string()),
        };

        let encoded = encode(&event, Format::Cbor).unwrap();
        let decoded: TagChangeEvent = decode(&encoded, Format::Cbor).unwrap();
        assert_eq!(event, decoded);
    }
}
