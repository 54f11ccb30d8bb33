//! Column value encoding shared by all entities.
//!
//! Addresses are stored as 20-byte blobs, hashes and uint256 values as 32-byte
//! big-endian blobs, and unsigned integers as SQLite INTEGER.

use alloy_primitives::{Address, B256, U256};
use rusqlite::types::{Type, Value};
use rusqlite::Row;

pub fn int(value: u64) -> Value {
    Value::Integer(value as i64)
}

pub fn opt_int(value: Option<u64>) -> Value {
    value.map_or(Value::Null, int)
}

pub fn boolean(value: bool) -> Value {
    Value::Integer(value as i64)
}

pub fn text(value: impl Into<String>) -> Value {
    Value::Text(value.into())
}

pub fn address(value: Address) -> Value {
    Value::Blob(value.to_vec())
}

pub fn b256(value: B256) -> Value {
    Value::Blob(value.to_vec())
}

pub fn u256(value: U256) -> Value {
    Value::Blob(value.to_be_bytes::<32>().to_vec())
}

pub fn u64_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<u64> {
    let value: i64 = row.get(idx)?;
    Ok(value as u64)
}

pub fn opt_u64_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<u64>> {
    let value: Option<i64> = row.get(idx)?;
    Ok(value.map(|v| v as u64))
}

pub fn u32_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<u32> {
    let value: i64 = row.get(idx)?;
    u32::try_from(value).map_err(|e| conversion_failure(idx, Type::Integer, e.to_string()))
}

pub fn address_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Address> {
    let bytes: Vec<u8> = row.get(idx)?;
    if bytes.len() != 20 {
        return Err(conversion_failure(
            idx,
            Type::Blob,
            format!("expected 20 bytes for Address, got {}", bytes.len()),
        ));
    }
    Ok(Address::from_slice(&bytes))
}

pub fn b256_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<B256> {
    let bytes: Vec<u8> = row.get(idx)?;
    if bytes.len() != 32 {
        return Err(conversion_failure(
            idx,
            Type::Blob,
            format!("expected 32 bytes for B256, got {}", bytes.len()),
        ));
    }
    Ok(B256::from_slice(&bytes))
}

pub fn u256_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<U256> {
    let bytes: Vec<u8> = row.get(idx)?;
    if bytes.len() != 32 {
        return Err(conversion_failure(
            idx,
            Type::Blob,
            format!("expected 32 bytes for U256, got {}", bytes.len()),
        ));
    }
    Ok(U256::from_be_slice(&bytes))
}

pub(crate) fn conversion_failure(idx: usize, ty: Type, reason: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, ty, reason.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn u256_is_stored_big_endian() {
        let Value::Blob(bytes) = u256(U256::from(0x0102u64)) else {
            panic!("expected blob");
        };
        assert_eq!(bytes.len(), 32);
        assert_eq!(&bytes[30..], &[0x01, 0x02]);
        assert!(bytes[..30].iter().all(|b| *b == 0));
    }

    #[test]
    fn u64_above_i64_max_keeps_its_bits() {
        let Value::Integer(stored) = int(u64::MAX) else {
            panic!("expected integer");
        };
        assert_eq!(stored as u64, u64::MAX);
    }
}
