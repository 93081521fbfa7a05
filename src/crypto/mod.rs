//! Content addressing for fight records.

use serde::Serialize;
use sha2::{Digest, Sha256};

/// Hash data with SHA-256 and return hex string
pub fn hash_sha256(data: &[u8]) -> String {
    let hash = Sha256::digest(data);
    hex::encode(hash)
}

/// Content id of a serializable value: SHA-256 over its JSON encoding.
/// Field order follows the struct definition, so equal values share an id.
pub fn content_id<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    let bytes = serde_json::to_vec(value)?;
    Ok(hash_sha256(&bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FightRecord;
    use chrono::{TimeZone, Utc};

    fn record(co2_grams: f64) -> FightRecord {
        FightRecord {
            account: "0x00000000000000000000000000000000000000aa".into(),
            boss_id: "3".into(),
            occurred_at: Utc.with_ymd_and_hms(2023, 9, 1, 12, 0, 0).unwrap(),
            distance_km: 1.5,
            co2_grams,
        }
    }

    #[test]
    fn test_hash_is_hex_sha256() {
        assert_eq!(
            hash_sha256(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_content_id_is_stable_and_distinct() {
        let a = content_id(&record(288.0)).unwrap();
        assert_eq!(a, content_id(&record(288.0)).unwrap());
        assert_eq!(a.len(), 64);
        assert_ne!(a, content_id(&record(289.0)).unwrap());
    }
}
