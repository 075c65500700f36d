//! `RocksDB` storage implementation.
//!
//! This module provides the `RocksStore` implementation of the `Store`
//! trait.

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rocksdb::{
    BoundColumnFamily, ColumnFamilyDescriptor, DBWithThreadMode, IteratorMode, MultiThreaded,
    Options, WriteBatch,
};

use tally_core::{
    Account, AccountId, CreditGrant, CreditTransaction, GrantId, JobStatus, MeterEventJob,
    QueueDepths, TransactionId, UsagePeriod,
};

use crate::error::{Result, StoreError};
use crate::keys;
use crate::schema::{all_column_families, cf};
use crate::Store;

/// RocksDB-backed storage implementation.
pub struct RocksStore {
    db: Arc<DBWithThreadMode<MultiThreaded>>,
}

impl RocksStore {
    /// Open or create a `RocksDB` database at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or created.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cf_descriptors: Vec<_> = all_column_families()
            .into_iter()
            .map(|name| ColumnFamilyDescriptor::new(name, Options::default()))
            .collect();

        let db = DBWithThreadMode::open_cf_descriptors(&opts, path, cf_descriptors)
            .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(Self { db: Arc::new(db) })
    }

    /// Get a column family handle.
    fn cf(&self, name: &str) -> Result<Arc<BoundColumnFamily<'_>>> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::Database(format!("column family not found: {name}")))
    }

    /// Serialize a value using CBOR.
    fn serialize<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        ciborium::into_writer(value, &mut buf)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        Ok(buf)
    }

    /// Deserialize a value from CBOR.
    fn deserialize<T: serde::de::DeserializeOwned>(data: &[u8]) -> Result<T> {
        ciborium::from_reader(data).map_err(|e| StoreError::Serialization(e.to_string()))
    }

    fn get_cf_value<T: serde::de::DeserializeOwned>(
        &self,
        cf_name: &str,
        key: &[u8],
    ) -> Result<Option<T>> {
        let cf = self.cf(cf_name)?;
        self.db
            .get_cf(&cf, key)
            .map_err(|e| StoreError::Database(e.to_string()))?
            .map(|data| Self::deserialize(&data))
            .transpose()
    }

    fn put_cf_value<T: serde::Serialize>(&self, cf_name: &str, key: &[u8], value: &T) -> Result<()> {
        let cf = self.cf(cf_name)?;
        let data = Self::serialize(value)?;
        self.db
            .put_cf(&cf, key, data)
            .map_err(|e| StoreError::Database(e.to_string()))
    }
}

impl Store for RocksStore {
    // =========================================================================
    // Account Operations
    // =========================================================================

    fn put_account(&self, account: &Account) -> Result<()> {
        self.put_cf_value(cf::ACCOUNTS, &keys::account_key(&account.id), account)
    }

    fn get_account(&self, account_id: &AccountId) -> Result<Option<Account>> {
        self.get_cf_value(cf::ACCOUNTS, &keys::account_key(account_id))
    }

    fn list_accounts(&self) -> Result<Vec<Account>> {
        let cf = self.cf(cf::ACCOUNTS)?;
        let mut accounts = Vec::new();

        for item in self.db.iterator_cf(&cf, IteratorMode::Start) {
            let (_, value) = item.map_err(|e| StoreError::Database(e.to_string()))?;
            accounts.push(Self::deserialize(&value)?);
        }

        Ok(accounts)
    }

    fn commit_account_mutation(
        &self,
        account: &Account,
        transactions: &[CreditTransaction],
    ) -> Result<()> {
        let cf_accounts = self.cf(cf::ACCOUNTS)?;
        let cf_tx = self.cf(cf::TRANSACTIONS)?;
        let cf_tx_by_account = self.cf(cf::TRANSACTIONS_BY_ACCOUNT)?;

        let mut batch = WriteBatch::default();
        batch.put_cf(
            &cf_accounts,
            keys::account_key(&account.id),
            Self::serialize(account)?,
        );

        for tx in transactions {
            batch.put_cf(
                &cf_tx,
                keys::transaction_key(&tx.id),
                Self::serialize(tx)?,
            );
            // Index entry (empty value).
            batch.put_cf(
                &cf_tx_by_account,
                keys::account_transaction_key(&tx.account_id, &tx.id),
                [],
            );
        }

        self.db
            .write(batch)
            .map_err(|e| StoreError::Database(e.to_string()))
    }

    // =========================================================================
    // Transaction Operations
    // =========================================================================

    fn get_transaction(&self, transaction_id: &TransactionId) -> Result<Option<CreditTransaction>> {
        self.get_cf_value(cf::TRANSACTIONS, &keys::transaction_key(transaction_id))
    }

    fn list_transactions_by_account(
        &self,
        account_id: &AccountId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<CreditTransaction>> {
        let cf_by_account = self.cf(cf::TRANSACTIONS_BY_ACCOUNT)?;
        let prefix = keys::account_transactions_prefix(account_id);

        let iter = self.db.iterator_cf(
            &cf_by_account,
            IteratorMode::From(&prefix, rocksdb::Direction::Forward),
        );

        // ULIDs sort chronologically, so collecting forward then reversing
        // yields newest-first.
        let mut all_keys: Vec<Vec<u8>> = Vec::new();
        for item in iter {
            let (key, _) = item.map_err(|e| StoreError::Database(e.to_string()))?;
            if !key.starts_with(&prefix) {
                break;
            }
            all_keys.push(key.to_vec());
        }
        all_keys.reverse();

        let mut transactions = Vec::new();
        for key in all_keys.into_iter().skip(offset) {
            if transactions.len() >= limit {
                break;
            }
            let tx_id = keys::extract_transaction_id(&key);
            if let Some(tx) = self.get_transaction(&tx_id)? {
                transactions.push(tx);
            }
        }

        Ok(transactions)
    }

    // =========================================================================
    // Usage Period Operations
    // =========================================================================

    fn put_period(&self, period: &UsagePeriod) -> Result<()> {
        self.put_cf_value(
            cf::USAGE_PERIODS,
            &keys::usage_period_key(&period.account_id, period.period_start),
            period,
        )
    }

    fn get_period(
        &self,
        account_id: &AccountId,
        period_start: DateTime<Utc>,
    ) -> Result<Option<UsagePeriod>> {
        self.get_cf_value(
            cf::USAGE_PERIODS,
            &keys::usage_period_key(account_id, period_start),
        )
    }

    // =========================================================================
    // Grant Operations
    // =========================================================================

    fn put_grant(&self, grant: &CreditGrant) -> Result<()> {
        self.put_cf_value(cf::GRANTS, &keys::grant_key(&grant.id), grant)
    }

    fn get_grant(&self, grant_id: &GrantId) -> Result<Option<CreditGrant>> {
        self.get_cf_value(cf::GRANTS, &keys::grant_key(grant_id))
    }

    fn commit_grant_application(
        &self,
        account: &Account,
        transactions: &[CreditTransaction],
        grant: &CreditGrant,
    ) -> Result<()> {
        let cf_accounts = self.cf(cf::ACCOUNTS)?;
        let cf_tx = self.cf(cf::TRANSACTIONS)?;
        let cf_tx_by_account = self.cf(cf::TRANSACTIONS_BY_ACCOUNT)?;
        let cf_grants = self.cf(cf::GRANTS)?;

        let mut batch = WriteBatch::default();
        batch.put_cf(
            &cf_accounts,
            keys::account_key(&account.id),
            Self::serialize(account)?,
        );

        for tx in transactions {
            batch.put_cf(
                &cf_tx,
                keys::transaction_key(&tx.id),
                Self::serialize(tx)?,
            );
            batch.put_cf(
                &cf_tx_by_account,
                keys::account_transaction_key(&tx.account_id, &tx.id),
                [],
            );
        }

        batch.put_cf(
            &cf_grants,
            keys::grant_key(&grant.id),
            Self::serialize(grant)?,
        );

        self.db
            .write(batch)
            .map_err(|e| StoreError::Database(e.to_string()))
    }

    // =========================================================================
    // Meter Job Operations
    // =========================================================================

    fn put_job(&self, job: &MeterEventJob) -> Result<()> {
        self.put_cf_value(cf::METER_JOBS, &keys::meter_job_key(&job.storage_key()), job)
    }

    fn get_job(&self, storage_key: &str) -> Result<Option<MeterEventJob>> {
        self.get_cf_value(cf::METER_JOBS, &keys::meter_job_key(storage_key))
    }

    fn fetch_due_jobs(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<MeterEventJob>> {
        let cf = self.cf(cf::METER_JOBS)?;
        let mut due = Vec::new();

        for item in self.db.iterator_cf(&cf, IteratorMode::Start) {
            if due.len() >= limit {
                break;
            }
            let (_, value) = item.map_err(|e| StoreError::Database(e.to_string()))?;
            let job: MeterEventJob = Self::deserialize(&value)?;
            if job.due(now) {
                due.push(job);
            }
        }

        Ok(due)
    }

    fn requeue_active_jobs(&self, now: DateTime<Utc>) -> Result<u64> {
        let cf = self.cf(cf::METER_JOBS)?;
        let mut stale = Vec::new();

        for item in self.db.iterator_cf(&cf, IteratorMode::Start) {
            let (key, value) = item.map_err(|e| StoreError::Database(e.to_string()))?;
            let job: MeterEventJob = Self::deserialize(&value)?;
            if job.status == JobStatus::Active {
                stale.push((key.to_vec(), job));
            }
        }

        let count = stale.len() as u64;
        let mut batch = WriteBatch::default();
        for (key, mut job) in stale {
            job.status = JobStatus::Waiting;
            job.next_attempt_at = now;
            job.updated_at = now;
            batch.put_cf(&cf, key, Self::serialize(&job)?);
        }
        self.db
            .write(batch)
            .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(count)
    }

    fn prune_delivered_jobs(&self, before: DateTime<Utc>) -> Result<u64> {
        let cf = self.cf(cf::METER_JOBS)?;
        let mut stale_keys = Vec::new();

        for item in self.db.iterator_cf(&cf, IteratorMode::Start) {
            let (key, value) = item.map_err(|e| StoreError::Database(e.to_string()))?;
            let job: MeterEventJob = Self::deserialize(&value)?;
            if job.status == JobStatus::Completed && job.updated_at < before {
                stale_keys.push(key.to_vec());
            }
        }

        let count = stale_keys.len() as u64;
        let mut batch = WriteBatch::default();
        for key in stale_keys {
            batch.delete_cf(&cf, key);
        }
        self.db
            .write(batch)
            .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(count)
    }

    fn queue_depths(&self, now: DateTime<Utc>) -> Result<QueueDepths> {
        let cf = self.cf(cf::METER_JOBS)?;
        let mut depths = QueueDepths::default();

        for item in self.db.iterator_cf(&cf, IteratorMode::Start) {
            let (_, value) = item.map_err(|e| StoreError::Database(e.to_string()))?;
            let job: MeterEventJob = Self::deserialize(&value)?;
            match job.status {
                JobStatus::Waiting if job.next_attempt_at > now => depths.delayed += 1,
                JobStatus::Waiting => depths.waiting += 1,
                JobStatus::Active => depths.active += 1,
                JobStatus::Completed => depths.completed += 1,
                JobStatus::Failed => depths.failed += 1,
            }
        }

        Ok(depths)
    }
}
