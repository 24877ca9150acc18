use crate::error::{Result, WarpError};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Encodes `value` with the canonical binary codec (CBOR, definite-length
/// maps). Callers must back every map-typed field with a sorted
/// collection (`BTreeMap`/`BTreeSet`) so that logically identical values
/// always produce byte-identical output, which content-addressing
/// depends on.
pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::ser::into_writer(value, &mut buf).map_err(|e| WarpError::Codec(e.to_string()))?;
    Ok(buf)
}

pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    ciborium::de::from_reader(bytes).map_err(|e| WarpError::Codec(e.to_string()))
}

/// blake3 content hash of a canonically-encoded value, as lowercase hex.
pub fn hash_of<T: Serialize>(value: &T) -> Result<String> {
    let bytes = encode(value)?;
    Ok(blake3::hash(&bytes).to_hex().to_string())
}

pub fn hash_bytes(bytes: &[u8]) -> String {
    blake3::hash(bytes).to_hex().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};
    use std::collections::BTreeMap;

    #[derive(Serialize, Deserialize, PartialEq, Debug)]
    struct Sample {
        map: BTreeMap<String, u64>,
        name: String,
    }

    #[test]
    fn round_trips() {
        let mut map = BTreeMap::new();
        map.insert("b".to_string(), 2);
        map.insert("a".to_string(), 1);
        let s = Sample {
            map,
            name: "x".into(),
        };
        let bytes = encode(&s).unwrap();
        let back: Sample = decode(&bytes).unwrap();
        assert_eq!(s, back);
    }

    #[test]
    fn same_logical_value_hashes_identically() {
        let mut m1 = BTreeMap::new();
        m1.insert("a".to_string(), 1u64);
        m1.insert("b".to_string(), 2u64);
        let mut m2 = BTreeMap::new();
        m2.insert("b".to_string(), 2u64);
        m2.insert("a".to_string(), 1u64);
        let s1 = Sample {
            map: m1,
            name: "x".into(),
        };
        let s2 = Sample {
            map: m2,
            name: "x".into(),
        };
        assert_eq!(hash_of(&s1).unwrap(), hash_of(&s2).unwrap());
    }
}
