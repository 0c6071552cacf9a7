//! Destination store for canonical transactions.
mod postgres;

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use error_stack::Result;
use rawtx_observability::{RecordRequest, RequestKind, RequestMetrics};
use tracing::debug;

use crate::normalize::{CanonicalTransactionRecord, ChainVariant};

pub use self::postgres::{PostgresStore, PostgresStoreOptions, TlsConfiguration};

#[derive(Debug)]
pub enum StoreError {
    /// Could not connect to the store.
    Connection,
    /// A statement failed.
    Query,
    /// Rows could not be encoded.
    Serialization,
    /// Invalid table name or options.
    Configuration,
}

/// A table of transactions keyed by `tx_hash`.
#[async_trait]
pub trait TransactionStore: Send + Sync {
    /// Insert `records`, replacing the listed columns of rows with the same `tx_hash`.
    ///
    /// Applied atomically. Returns the number of rows affected.
    async fn upsert(
        &self,
        table: &str,
        columns: &[&'static str],
        records: &[CanonicalTransactionRecord],
    ) -> Result<u64, StoreError>;

    /// Highest block number in the table, `None` if the table is empty.
    async fn max_block_number(&self, table: &str) -> Result<Option<u64>, StoreError>;
}

/// Writes normalized batches to one table.
#[derive(Clone)]
pub struct StoreUpserter {
    store: Arc<dyn TransactionStore>,
    table: String,
    columns: Vec<&'static str>,
    metrics: RequestMetrics,
}

impl StoreUpserter {
    pub fn new(store: Arc<dyn TransactionStore>, table: impl Into<String>, variant: ChainVariant) -> Self {
        Self {
            store,
            table: table.into(),
            columns: variant.columns(),
            metrics: RequestMetrics::new("rawtx_extractor", RequestKind::StoreUpsert),
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Deduplicate the batch and upsert it. Returns the number of rows affected.
    pub async fn upsert(&self, records: Vec<CanonicalTransactionRecord>) -> Result<u64, StoreError> {
        let records = dedup_by_tx_hash(records);
        if records.is_empty() {
            return Ok(0);
        }

        let rows = self
            .store
            .upsert(&self.table, &self.columns, &records)
            .record_request(self.metrics.clone())
            .await?;

        debug!(table = %self.table, rows, "upserted batch");

        Ok(rows)
    }
}

/// Keep one record per `tx_hash`.
///
/// The last occurrence wins and takes the position of the first one.
pub fn dedup_by_tx_hash(records: Vec<CanonicalTransactionRecord>) -> Vec<CanonicalTransactionRecord> {
    let mut positions = HashMap::<String, usize>::with_capacity(records.len());
    let mut deduped = Vec::with_capacity(records.len());

    for record in records {
        match positions.get(&record.tx_hash) {
            Some(&index) => deduped[index] = record,
            None => {
                positions.insert(record.tx_hash.clone(), deduped.len());
                deduped.push(record);
            }
        }
    }

    deduped
}

/// Table names are interpolated into SQL, so only plain (optionally
/// schema-qualified) identifiers are accepted.
pub fn is_valid_table_name(name: &str) -> bool {
    let mut parts = 0;
    for part in name.split('.') {
        parts += 1;
        let mut chars = part.chars();
        let valid_start = chars
            .next()
            .map(|c| c.is_ascii_alphabetic() || c == '_')
            .unwrap_or(false);
        if !valid_start || !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return false;
        }
    }

    parts <= 2
}

impl error_stack::Context for StoreError {}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Connection => write!(f, "store: connection error"),
            StoreError::Query => write!(f, "store: query failed"),
            StoreError::Serialization => write!(f, "store: serialization error"),
            StoreError::Configuration => write!(f, "store: configuration error"),
        }
    }
}
