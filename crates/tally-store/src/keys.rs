//! Key encoding utilities for `RocksDB`.
//!
//! This module provides functions for encoding and decoding keys used in
//! column families.

use chrono::{DateTime, Datelike, Utc};
use tally_core::{AccountId, GrantId, TransactionId};

/// Create an account key from an account ID.
#[must_use]
pub fn account_key(account_id: &AccountId) -> Vec<u8> {
    account_id.as_bytes().to_vec()
}

/// Create a transaction key from a transaction ID.
#[must_use]
pub fn transaction_key(transaction_id: &TransactionId) -> Vec<u8> {
    transaction_id.to_bytes().to_vec()
}

/// Create an account-transaction index key.
///
/// Format: `account_id (16 bytes) || transaction_id (16 bytes)`
///
/// Since ULIDs are time-ordered, transactions for an account sort by time.
#[must_use]
pub fn account_transaction_key(
    account_id: &AccountId,
    transaction_id: &TransactionId,
) -> Vec<u8> {
    let mut key = Vec::with_capacity(32);
    key.extend_from_slice(account_id.as_bytes());
    key.extend_from_slice(&transaction_id.to_bytes());
    key
}

/// Create a prefix for iterating all transactions for an account.
#[must_use]
pub fn account_transactions_prefix(account_id: &AccountId) -> Vec<u8> {
    account_id.as_bytes().to_vec()
}

/// Extract the transaction ID from an account-transaction index key.
///
/// # Panics
///
/// Panics if the key is not at least 32 bytes.
#[must_use]
pub fn extract_transaction_id(key: &[u8]) -> TransactionId {
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&key[16..32]);
    TransactionId::from_bytes(bytes)
}

/// Create a usage-period key.
///
/// Format: `account_id (16 bytes) || yyyymm (6 ASCII bytes)`
#[must_use]
pub fn usage_period_key(account_id: &AccountId, period_start: DateTime<Utc>) -> Vec<u8> {
    let mut key = Vec::with_capacity(22);
    key.extend_from_slice(account_id.as_bytes());
    key.extend_from_slice(
        format!("{:04}{:02}", period_start.year(), period_start.month()).as_bytes(),
    );
    key
}

/// Create a grant key from a grant ID.
#[must_use]
pub fn grant_key(grant_id: &GrantId) -> Vec<u8> {
    grant_id.as_bytes().to_vec()
}

/// Create a meter-job key from the job's storage key string.
#[must_use]
pub fn meter_job_key(storage_key: &str) -> Vec<u8> {
    storage_key.as_bytes().to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn account_key_length() {
        let account_id = AccountId::generate();
        assert_eq!(account_key(&account_id).len(), 16);
    }

    #[test]
    fn account_transaction_key_format() {
        let account_id = AccountId::generate();
        let tx_id = TransactionId::generate();
        let key = account_transaction_key(&account_id, &tx_id);

        assert_eq!(key.len(), 32);
        assert_eq!(&key[..16], account_id.as_bytes());
        assert_eq!(&key[16..], tx_id.to_bytes());
    }

    #[test]
    fn extract_transaction_id_roundtrip() {
        let account_id = AccountId::generate();
        let tx_id = TransactionId::generate();
        let key = account_transaction_key(&account_id, &tx_id);

        assert_eq!(extract_transaction_id(&key), tx_id);
    }

    #[test]
    fn usage_period_key_encodes_month() {
        let account_id = AccountId::generate();
        let start = Utc.with_ymd_and_hms(2024, 7, 1, 0, 0, 0).unwrap();
        let key = usage_period_key(&account_id, start);

        assert_eq!(key.len(), 22);
        assert_eq!(&key[16..], b"202407");
    }
}
