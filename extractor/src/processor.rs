use std::sync::Arc;

use async_trait::async_trait;
use error_stack::ResultExt;
use rawtx_observability::{Counter, KeyValue};
use tracing::{info, instrument, warn};

use crate::archive::{ArchiveStore, ArchiveWriter};
use crate::error::{ExtractError, Result};
use crate::fetch::RpcBlockFetcher;
use crate::normalize::{ChainVariant, RawRecordNormalizer};
use crate::provider::NodeClient;
use crate::range::BlockRange;
use crate::retry::{RetryDecision, RetryOptions, RetryPolicy};
use crate::store::{StoreUpserter, TransactionStore};

/// Processes one block range to completion.
#[async_trait]
pub trait RangeHandler: Send + Sync + 'static {
    /// Fails only once the range is given up.
    async fn process(&self, range: BlockRange) -> Result<RangeSummary>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangeSummary {
    pub range: BlockRange,
    /// Raw records fetched by the successful attempt.
    pub fetched: u64,
    /// Rows affected by the upsert.
    pub upserted: u64,
    pub attempts: u32,
}

#[derive(Debug, Clone)]
pub struct RangeProcessorOptions {
    pub chain: String,
    pub variant: ChainVariant,
    pub table_name: String,
    pub retry: RetryOptions,
}

/// Runs fetch, archive, normalize and upsert for a range, starting over
/// from fetch after any failure until the retry policy gives up.
#[derive(Clone)]
pub struct RangeProcessor {
    chain: String,
    fetcher: RpcBlockFetcher,
    archive: ArchiveWriter,
    normalizer: RawRecordNormalizer,
    upserter: StoreUpserter,
    retry: RetryOptions,
    metrics: ProcessorMetrics,
}

#[derive(Debug, Clone)]
struct ProcessorMetrics {
    rows_fetched: Counter<u64>,
    rows_upserted: Counter<u64>,
    ranges: Counter<u64>,
}

impl RangeProcessor {
    pub fn new(
        client: Arc<dyn NodeClient>,
        archive: Arc<dyn ArchiveStore>,
        store: Arc<dyn TransactionStore>,
        options: RangeProcessorOptions,
    ) -> Self {
        Self {
            fetcher: RpcBlockFetcher::new(client),
            archive: ArchiveWriter::new(archive),
            normalizer: RawRecordNormalizer::new(options.variant),
            upserter: StoreUpserter::new(store, options.table_name, options.variant),
            chain: options.chain,
            retry: options.retry,
            metrics: ProcessorMetrics::default(),
        }
    }

    #[instrument(skip(self, range), fields(range = %range, chain = %self.chain))]
    pub async fn process(&self, range: BlockRange) -> Result<RangeSummary> {
        info!("processing range");

        let mut policy = RetryPolicy::new(self.retry);
        let mut attempts = 0;

        loop {
            attempts += 1;

            let err = match self.attempt(range).await {
                Ok((fetched, upserted)) => {
                    info!(fetched, upserted, attempts, "range completed");
                    self.metrics
                        .ranges
                        .add(1, &[KeyValue::new("status", "completed")]);
                    return Ok(RangeSummary {
                        range,
                        fetched,
                        upserted,
                        attempts,
                    });
                }
                Err(err) => err,
            };

            let decision = policy.on_failure(&mut rand::thread_rng());
            match decision {
                RetryDecision::Retry(wait) => {
                    warn!(attempts, wait = ?wait, error = ?err, "range failed, retrying");
                    tokio::time::sleep(wait).await;
                }
                RetryDecision::Exhausted => {
                    self.metrics
                        .ranges
                        .add(1, &[KeyValue::new("status", "failed")]);
                    return Err(err)
                        .change_context(ExtractError::RetriesExhausted)
                        .attach_printable_lazy(|| format!("range: {range}"))
                        .attach_printable_lazy(|| format!("attempts: {attempts}"));
                }
            }
        }
    }

    /// Returns the number of fetched and upserted rows.
    async fn attempt(&self, range: BlockRange) -> Result<(u64, u64)> {
        let Some(records) = self.fetcher.fetch_range(range).await? else {
            info!("range has no transactions");
            return Ok((0, 0));
        };

        let fetched = records.len() as u64;
        self.metrics.rows_fetched.add(fetched, &[]);

        // The raw copy must exist before anything is written to the store.
        self.archive
            .write(&self.chain, &range, &records)
            .await
            .change_context(ExtractError::Archive)?;

        let canonical = self.normalizer.normalize(&records);

        let upserted = self
            .upserter
            .upsert(canonical)
            .await
            .change_context(ExtractError::Store)
            .attach_printable_lazy(|| format!("table: {}", self.upserter.table()))?;
        self.metrics.rows_upserted.add(upserted, &[]);

        Ok((fetched, upserted))
    }
}

#[async_trait]
impl RangeHandler for RangeProcessor {
    async fn process(&self, range: BlockRange) -> Result<RangeSummary> {
        RangeProcessor::process(self, range).await
    }
}

impl Default for ProcessorMetrics {
    fn default() -> Self {
        let meter = rawtx_observability::meter("rawtx_extractor");

        Self {
            rows_fetched: meter
                .u64_counter("rows.fetched")
                .with_description("raw transaction records fetched")
                .build(),
            rows_upserted: meter
                .u64_counter("rows.upserted")
                .with_description("rows affected by upserts")
                .build(),
            ranges: meter
                .u64_counter("ranges")
                .with_description("block ranges processed, by status")
                .build(),
        }
    }
}
