use std::{num::NonZeroU32, sync::Arc, time::Duration};

use alloy_rpc_client::{ClientBuilder, RpcClient};
use async_trait::async_trait;
use backon::{ExponentialBuilder, Retryable};
use error_stack::{Result, ResultExt};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use rawtx_observability::{RecordRequest, RequestKind, RequestMetrics};
use serde_json::Value;
use tracing::instrument;
use url::Url;

use crate::normalize::numeric::parse_u64;

use super::NodeClient;

#[derive(Debug)]
pub enum JsonRpcProviderError {
    Request,
    Timeout,
    NotFound,
    Configuration,
}

#[derive(Debug, Clone)]
pub struct JsonRpcProviderOptions {
    /// Request timeout, retries included.
    pub timeout: Duration,
    /// Backoff for transport errors within a single call.
    pub exponential_backoff: ExponentialBuilder,
    /// Maximum requests per second sent to the node.
    pub rate_limit: Option<NonZeroU32>,
}

/// JSON-RPC client that keeps blocks and receipts as raw JSON.
///
/// Nothing is decoded into typed models, so chain-specific fields (L1 fee
/// data, proof-of-authority seals in `extraData`) pass through untouched.
#[derive(Clone)]
pub struct JsonRpcProvider {
    client: RpcClient,
    options: JsonRpcProviderOptions,
    limiter: Option<Arc<DefaultDirectRateLimiter>>,
    metrics: RequestMetrics,
}

impl Default for JsonRpcProviderOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(20),
            exponential_backoff: ExponentialBuilder::default()
                .with_max_delay(Duration::from_secs(10))
                .with_max_times(3),
            rate_limit: None,
        }
    }
}

impl JsonRpcProvider {
    pub fn new(url: Url, options: JsonRpcProviderOptions) -> Result<Self, JsonRpcProviderError> {
        if !matches!(url.scheme(), "http" | "https") {
            return Err(JsonRpcProviderError::Configuration)
                .attach_printable("only http(s) node urls are supported")
                .attach_printable_lazy(|| format!("url: {url}"));
        }

        let client = ClientBuilder::default().http(url);
        let limiter = options.rate_limit.map(|rate_limit| {
            let quota = Quota::per_second(rate_limit).allow_burst(rate_limit);
            Arc::new(RateLimiter::direct(quota))
        });

        Ok(Self {
            client,
            options,
            limiter,
            metrics: RequestMetrics::new("rawtx_extractor", RequestKind::Rpc),
        })
    }

    async fn throttle(&self) {
        if let Some(limiter) = &self.limiter {
            limiter.until_ready().await;
        }
    }
}

#[async_trait]
impl NodeClient for JsonRpcProvider {
    #[instrument(skip(self), err(Debug))]
    async fn latest_block_number(&self) -> Result<u64, JsonRpcProviderError> {
        self.throttle().await;

        let request = (|| async {
            self.client
                .request_noparams::<String>("eth_blockNumber")
                .await
        })
        .retry(self.options.exponential_backoff)
        .record_method(self.metrics.clone(), "eth_blockNumber");

        let Ok(response) = tokio::time::timeout(self.options.timeout, request).await else {
            return Err(JsonRpcProviderError::Timeout)
                .attach_printable("failed to get latest block number");
        };

        let number = response
            .change_context(JsonRpcProviderError::Request)
            .attach_printable("failed to get latest block number")?;

        parse_u64(&Value::String(number.clone()))
            .ok_or(JsonRpcProviderError::Request)
            .attach_printable("node returned an invalid block number")
            .attach_printable_lazy(|| format!("block number: {number}"))
    }

    #[instrument(skip(self), err(Debug))]
    async fn block_with_transactions(
        &self,
        block_number: u64,
    ) -> Result<Value, JsonRpcProviderError> {
        self.throttle().await;

        let request = (|| async {
            self.client
                .request::<_, Option<Value>>(
                    "eth_getBlockByNumber",
                    (format!("{block_number:#x}"), true),
                )
                .await
        })
        .retry(self.options.exponential_backoff)
        .record_method(self.metrics.clone(), "eth_getBlockByNumber");

        let Ok(response) = tokio::time::timeout(self.options.timeout, request).await else {
            return Err(JsonRpcProviderError::Timeout)
                .attach_printable("failed to get block with transactions")
                .attach_printable_lazy(|| format!("block number: {block_number}"));
        };

        response
            .change_context(JsonRpcProviderError::Request)
            .attach_printable_lazy(|| format!("block number: {block_number}"))?
            .filter(|block| !block.is_null())
            .ok_or(JsonRpcProviderError::NotFound)
            .attach_printable_lazy(|| format!("block not found: {block_number}"))
    }

    #[instrument(skip(self), err(Debug))]
    async fn transaction_receipt(&self, hash: &str) -> Result<Value, JsonRpcProviderError> {
        self.throttle().await;

        let request = (|| async {
            self.client
                .request::<_, Option<Value>>("eth_getTransactionReceipt", (hash.to_string(),))
                .await
        })
        .retry(self.options.exponential_backoff)
        .record_method(self.metrics.clone(), "eth_getTransactionReceipt");

        let Ok(response) = tokio::time::timeout(self.options.timeout, request).await else {
            return Err(JsonRpcProviderError::Timeout)
                .attach_printable("failed to get transaction receipt")
                .attach_printable_lazy(|| format!("hash: {hash}"));
        };

        response
            .change_context(JsonRpcProviderError::Request)
            .attach_printable_lazy(|| format!("hash: {hash}"))?
            .filter(|receipt| !receipt.is_null())
            .ok_or(JsonRpcProviderError::NotFound)
            .attach_printable_lazy(|| format!("transaction receipt not found: {hash}"))
    }
}

impl error_stack::Context for JsonRpcProviderError {}

impl std::fmt::Display for JsonRpcProviderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JsonRpcProviderError::Request => write!(f, "failed to send request"),
            JsonRpcProviderError::Timeout => write!(f, "request timed out"),
            JsonRpcProviderError::NotFound => write!(f, "not found"),
            JsonRpcProviderError::Configuration => write!(f, "configuration error"),
        }
    }
}
