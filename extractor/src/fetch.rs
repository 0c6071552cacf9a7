use std::sync::Arc;

use error_stack::ResultExt;
use futures_util::{StreamExt, TryStreamExt};
use serde_json::{Map, Value};
use tracing::{debug, instrument};

use crate::error::{ExtractError, Result};
use crate::normalize::numeric::parse_u64;
use crate::provider::NodeClient;
use crate::range::BlockRange;

/// Maximum number of receipt requests in flight for one block.
const RECEIPT_CONCURRENCY: usize = 32;

/// A transaction merged with its receipt, as returned by the node.
///
/// Also carries `block_timestamp` (epoch seconds) from the block header.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RawTransactionRecord(Map<String, Value>);

impl RawTransactionRecord {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn hash(&self) -> Option<&str> {
        self.0.get("hash").and_then(Value::as_str)
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }
}

impl From<Map<String, Value>> for RawTransactionRecord {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

/// Fetches the transactions of a block range together with their receipts.
#[derive(Clone)]
pub struct RpcBlockFetcher {
    client: Arc<dyn NodeClient>,
}

impl RpcBlockFetcher {
    pub fn new(client: Arc<dyn NodeClient>) -> Self {
        Self { client }
    }

    /// Returns `None` if the range has no transactions.
    ///
    /// Any failure discards the records fetched so far.
    #[instrument(skip(self, range), fields(range = %range), err(Debug))]
    pub async fn fetch_range(
        &self,
        range: BlockRange,
    ) -> Result<Option<Vec<RawTransactionRecord>>> {
        let mut records = Vec::new();

        for block_number in range.blocks() {
            let block = self
                .client
                .block_with_transactions(block_number)
                .await
                .change_context(ExtractError::Fetch)
                .attach_printable("failed to fetch block")
                .attach_printable_lazy(|| format!("block number: {block_number}"))?;

            let mut block_records = self.block_records(block_number, block).await?;
            debug!(block_number, transactions = block_records.len(), "fetched block");
            records.append(&mut block_records);
        }

        if records.is_empty() {
            return Ok(None);
        }

        Ok(Some(records))
    }

    async fn block_records(
        &self,
        block_number: u64,
        mut block: Value,
    ) -> Result<Vec<RawTransactionRecord>> {
        let timestamp = block
            .get("timestamp")
            .and_then(parse_u64)
            .ok_or(ExtractError::Fetch)
            .attach_printable("block is missing its timestamp")
            .attach_printable_lazy(|| format!("block number: {block_number}"))?;

        let Some(Value::Array(transactions)) = block.get_mut("transactions").map(Value::take)
        else {
            return Err(ExtractError::Fetch)
                .attach_printable("block is missing its transactions")
                .attach_printable_lazy(|| format!("block number: {block_number}"));
        };

        let transactions = transactions
            .into_iter()
            .map(|tx| {
                let Value::Object(tx) = tx else {
                    return Err(ExtractError::Fetch)
                        .attach_printable("expected full transactions, got transaction hashes");
                };
                let hash = tx
                    .get("hash")
                    .and_then(Value::as_str)
                    .ok_or(ExtractError::Fetch)
                    .attach_printable("transaction is missing its hash")?
                    .to_lowercase();
                Ok((hash, tx))
            })
            .collect::<Result<Vec<_>>>()
            .attach_printable_lazy(|| format!("block number: {block_number}"))?;

        let hashes = transactions
            .iter()
            .map(|(hash, _)| hash.clone())
            .collect::<Vec<_>>();
        let receipts = fetch_receipts(self.client.clone(), hashes).await?;

        transactions
            .into_iter()
            .zip(receipts)
            .map(|((hash, mut record), receipt)| {
                let Value::Object(receipt) = receipt else {
                    return Err(ExtractError::Fetch)
                        .attach_printable("transaction receipt is not an object")
                        .attach_printable_lazy(|| format!("hash: {hash}"));
                };

                record.extend(receipt);
                record.insert("block_timestamp".to_string(), Value::from(timestamp));
                record.insert("hash".to_string(), Value::String(hash));

                Ok(RawTransactionRecord(record))
            })
            .collect()
    }
}

/// Receipts of `hashes`, in the same order. At most `RECEIPT_CONCURRENCY`
/// requests are in flight.
async fn fetch_receipts(
    client: Arc<dyn NodeClient>,
    hashes: Vec<String>,
) -> Result<Vec<Value>> {
    futures_util::stream::iter(hashes)
        .map(move |hash| {
            let client = client.clone();
            async move {
                client
                    .transaction_receipt(&hash)
                    .await
                    .change_context(ExtractError::Fetch)
                    .attach_printable("failed to fetch transaction receipt")
                    .attach_printable_lazy(|| format!("hash: {hash}"))
            }
        })
        .buffered(RECEIPT_CONCURRENCY)
        .try_collect()
        .await
}
