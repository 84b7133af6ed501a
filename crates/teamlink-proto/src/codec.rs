//! CBOR codec.

use serde::{Serialize, de::DeserializeOwned};

use crate::errors::{ProtocolError, Result};

/// Serialize `value` to CBOR.
pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::ser::into_writer(value, &mut buf).map_err(|e| ProtocolError::Encode(e.to_string()))?;
    Ok(buf)
}

/// Deserialize a CBOR value.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    ciborium::de::from_reader(bytes).map_err(|e| ProtocolError::Decode(e.to_string()))
}
