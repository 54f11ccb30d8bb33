//! Stored form of an allocation's commitment list.
//!
//! The list is kept as a JSON array in event order. Amounts are written as
//! decimal strings so any uint256 survives the round trip exactly.

use crate::error::ProjectionResult;
use crate::events::Commitment;

pub fn encode_commitments(commitments: &[Commitment]) -> ProjectionResult<String> {
    Ok(serde_json::to_string(commitments)?)
}

pub fn decode_commitments(encoded: &str) -> ProjectionResult<Vec<Commitment>> {
    Ok(serde_json::from_str(encoded)?)
}

/// Serde adapter writing a `U256` as a decimal string.
///
/// Reading accepts a decimal or `0x`-prefixed hex string, or a JSON number
/// that fits in a `u64`.
pub(crate) mod decimal {
    use alloy_primitives::U256;
    use serde::{de, Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Number(u64),
    }

    pub fn serialize<S: Serializer>(value: &U256, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(value)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<U256, D::Error> {
        match Raw::deserialize(deserializer)? {
            Raw::Text(raw) => raw.parse::<U256>().map_err(de::Error::custom),
            Raw::Number(n) => Ok(U256::from(n)),
        }
    }
}
