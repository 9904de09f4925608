//! CBOR encoding helpers.

use crate::error::CodecError;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Encodes a value to CBOR bytes.
pub fn encode<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, CodecError> {
    let mut bytes = Vec::new();
    ciborium::ser::into_writer(value, &mut bytes)
        .map_err(|e| CodecError::Encode(e.to_string()))?;
    Ok(bytes)
}

/// Decodes a value from CBOR bytes.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, CodecError> {
    ciborium::de::from_reader(bytes).map_err(|e| CodecError::Decode(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncated_input_is_a_decode_error() {
        let bytes = encode(&("cursor", 42u64)).unwrap();
        let err = decode::<(String, u64)>(&bytes[..bytes.len() - 1]).unwrap_err();
        assert!(matches!(err, CodecError::Decode(_)));
    }
}
