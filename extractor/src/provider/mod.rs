mod http;

use async_trait::async_trait;
use error_stack::Result;
use serde_json::Value;

pub use self::http::{JsonRpcProvider, JsonRpcProviderError, JsonRpcProviderOptions};

/// Read access to an EVM node.
///
/// Blocks and receipts are returned as raw JSON objects. A block or receipt
/// the node does not know about is a `JsonRpcProviderError::NotFound` error.
#[async_trait]
pub trait NodeClient: Send + Sync {
    async fn latest_block_number(&self) -> Result<u64, JsonRpcProviderError>;

    /// The block with its transactions inlined.
    async fn block_with_transactions(&self, block_number: u64)
        -> Result<Value, JsonRpcProviderError>;

    async fn transaction_receipt(&self, hash: &str) -> Result<Value, JsonRpcProviderError>;
}
