//! FNV-1a hashing for fingerprints that must be stable across process runs.

use serde::Serialize;

use crate::error::{Error, Result};

const FNV1A_OFFSET: u64 = 0xcbf29ce484222325;
const FNV1A_PRIME: u64 = 0x100000001b3;

pub fn fnv1a_init() -> u64 {
    FNV1A_OFFSET
}

pub fn fnv1a_bytes(mut hash: u64, bytes: &[u8]) -> u64 {
    for byte in bytes {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(FNV1A_PRIME);
    }
    hash
}

pub fn fnv1a_hash(bytes: &[u8]) -> u64 {
    fnv1a_bytes(fnv1a_init(), bytes)
}

/// Hashes the bincode encoding of `value`; deterministic for ordered containers.
pub fn hash_serializable<T: Serialize>(value: &T) -> Result<u64> {
    let bytes = bincode::serialize(value)
        .map_err(|err| Error::execution(format!("fingerprint encoding failed: {err}")))?;
    Ok(fnv1a_hash(&bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fnv1a_matches_reference_vectors() {
        assert_eq!(fnv1a_hash(b""), 0xcbf29ce484222325);
        assert_eq!(fnv1a_hash(b"a"), 0xaf63dc4c8601ec8c);
    }
}
