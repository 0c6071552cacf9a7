use std::{sync::Arc, time::Duration};

use clap::Args;
use error_stack::ResultExt;
use tracing::info;

use crate::driver::{BlockStart, DriverOptions, ExtractionDriver, ThreadBudget};
use crate::error::{ExtractError, Result};
use crate::normalize::ChainVariant;
use crate::processor::{RangeProcessor, RangeProcessorOptions};
use crate::provider::NodeClient;
use crate::retry::RetryOptions;

use super::{archive::ArchiveArgs, rpc::RpcArgs, store::StoreArgs};

/// Extract transactions from the resume point up to the chain head.
#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Chain name, used in archive keys and the default table name.
    #[arg(long, env = "CHAIN")]
    pub chain: String,

    /// Fee formula. Derived from the chain name if not set.
    #[arg(long, env = "CHAIN_VARIANT", value_enum)]
    pub variant: Option<ChainVariant>,

    /// First block to extract, or `auto` to resume after the highest loaded block.
    #[arg(long, env = "BLOCK_START", default_value = "auto")]
    pub block_start: BlockStart,

    /// Blocks per range.
    #[arg(
        long,
        env = "BATCH_SIZE",
        default_value = "250",
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub batch_size: u64,

    /// Ranges processed concurrently.
    #[arg(long, env = "THREADS", default_value = "15")]
    pub threads: ThreadBudget,

    #[clap(flatten)]
    pub rpc: RpcArgs,

    #[clap(flatten)]
    pub archive: ArchiveArgs,

    #[clap(flatten)]
    pub store: StoreArgs,

    #[clap(flatten)]
    pub retry: RetryArgs,
}

#[derive(Args, Debug, Clone)]
pub struct RetryArgs {
    /// Initial wait between attempts of a range.
    #[arg(long = "retry.base-wait-sec", env = "RETRY_BASE_WAIT_SEC", default_value = "5")]
    pub retry_base_wait_sec: u64,

    /// A range is given up once its wait would reach this value.
    #[arg(long = "retry.max-wait-sec", env = "RETRY_MAX_WAIT_SEC", default_value = "300")]
    pub retry_max_wait_sec: u64,

    /// Pause before dispatching again with one worker fewer.
    #[arg(long = "driver.cooldown-sec", env = "DRIVER_COOLDOWN_SEC", default_value = "300")]
    pub driver_cooldown_sec: u64,
}

impl RetryArgs {
    pub fn to_retry_options(&self) -> RetryOptions {
        RetryOptions {
            base_wait: Duration::from_secs(self.retry_base_wait_sec),
            max_wait: Duration::from_secs(self.retry_max_wait_sec),
        }
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.driver_cooldown_sec)
    }
}

pub async fn run_extraction(args: RunArgs) -> Result<()> {
    let variant = args
        .variant
        .unwrap_or_else(|| ChainVariant::for_chain(&args.chain));
    let table_name = args.store.table_name(&args.chain)?;

    info!(
        chain = args.chain,
        %variant,
        table_name,
        block_start = %args.block_start,
        batch_size = args.batch_size,
        threads = %args.threads,
        "starting rawtx extractor"
    );

    let provider = Arc::new(args.rpc.to_json_rpc_provider()?);
    let head = provider
        .latest_block_number()
        .await
        .change_context(ExtractError::Connection)
        .attach_printable("node is not reachable")?;
    info!(head, "connected to node");

    let store = Arc::new(args.store.to_postgres_store().await?);
    let archive = args.archive.to_archive_store().await?;

    let processor = RangeProcessor::new(
        provider.clone(),
        archive,
        store.clone(),
        RangeProcessorOptions {
            chain: args.chain.clone(),
            variant,
            table_name: table_name.clone(),
            retry: args.retry.to_retry_options(),
        },
    );

    let mut driver = ExtractionDriver::new(
        provider,
        store,
        Arc::new(processor),
        DriverOptions {
            block_start: args.block_start,
            batch_size: args.batch_size,
            threads: args.threads,
            cooldown: args.retry.cooldown(),
            table_name,
        },
    );

    let summary = driver.run().await?;

    info!(
        chain = args.chain,
        resume_point = summary.resume_point,
        latest_block = summary.latest_block,
        ranges = summary.ranges,
        rows = summary.rows,
        "run finished"
    );

    Ok(())
}
