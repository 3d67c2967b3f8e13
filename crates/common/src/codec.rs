//! Pluggable value codec
//!
//! Both user values and serialized `prev` snapshots go through a [`Codec`],
//! so every participant of a deployment must agree on one.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while encoding or decoding
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("Encode failed: {0}")]
    Encode(String),

    #[error("Decode failed: {0}")]
    Decode(String),
}

/// Serialization format for values and record snapshots
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Codec {
    /// Human readable JSON via serde_json
    #[default]
    Json,
    /// Compact binary via bincode
    Bincode,
}

impl Codec {
    pub fn encode<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>, CodecError> {
        match self {
            Codec::Json => serde_json::to_vec(value).map_err(|e| CodecError::Encode(e.to_string())),
            Codec::Bincode => {
                bincode::serialize(value).map_err(|e| CodecError::Encode(e.to_string()))
            }
        }
    }

    pub fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, CodecError> {
        match self {
            Codec::Json => {
                serde_json::from_slice(bytes).map_err(|e| CodecError::Decode(e.to_string()))
            }
            Codec::Bincode => {
                bincode::deserialize(bytes).map_err(|e| CodecError::Decode(e.to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Person {
        name: String,
        age: u32,
    }

    #[test]
    fn test_json_is_readable() {
        let bytes = Codec::Json
            .encode(&Person {
                name: "John".into(),
                age: 30,
            })
            .unwrap();
        assert_eq!(
            String::from_utf8(bytes).unwrap(),
            r#"{"name":"John","age":30}"#
        );
    }

    #[test]
    fn test_bincode_decodes_what_it_encodes() {
        let person = Person {
            name: "John".into(),
            age: 31,
        };
        let bytes = Codec::Bincode.encode(&person).unwrap();
        let decoded: Person = Codec::Bincode.decode(&bytes).unwrap();
        assert_eq!(decoded, person);
    }

    #[test]
    fn test_decode_garbage_fails() {
        let result: Result<Person, _> = Codec::Json.decode(b"{not json");
        assert!(matches!(result, Err(CodecError::Decode(_))));
    }
}
