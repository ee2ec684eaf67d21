//! Record encoding: CBOR, then zstd.

use std::io::{Read, Write};

use serde::Serialize;
use serde::de::DeserializeOwned;
use sha2::{Digest, Sha256};

use crate::store::CacheError;

const ZSTD_LEVEL: i32 = 3;

pub fn encode<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, CacheError> {
    let mut cbor = Vec::new();
    ciborium::into_writer(value, &mut cbor).map_err(|e| CacheError::CborEncode(e.to_string()))?;
    let mut encoder = zstd::Encoder::new(Vec::new(), ZSTD_LEVEL)?;
    encoder.write_all(&cbor)?;
    Ok(encoder.finish()?)
}

pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, CacheError> {
    let mut decoder = zstd::Decoder::new(bytes)?;
    let mut cbor = Vec::new();
    decoder.read_to_end(&mut cbor)?;
    ciborium::from_reader(cbor.as_slice()).map_err(|e| CacheError::CborDecode(e.to_string()))
}

pub(crate) fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn garbage_fails_to_decode() {
        let err = decode::<Vec<f32>>(b"definitely not zstd").unwrap_err();
        assert!(matches!(err, CacheError::Io(_)));
    }

    #[test]
    fn float_buffers_survive_bit_exact() {
        let values = vec![0.1_f32, -0.0, f32::MAX, 1e-30, 3.5];
        let back: Vec<f32> = decode(&encode(&values).unwrap()).unwrap();
        let bits = |v: &[f32]| v.iter().map(|f| f.to_bits()).collect::<Vec<_>>();
        assert_eq!(bits(&back), bits(&values));
    }

    #[test]
    fn sha256_is_hex_of_fixed_length() {
        let h = sha256_hex(b"abc");
        assert_eq!(h.len(), 64);
        assert!(h.starts_with("ba7816bf"));
    }
}
