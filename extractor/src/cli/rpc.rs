use std::{num::NonZeroU32, time::Duration};

use backon::ExponentialBuilder;
use clap::Args;
use error_stack::ResultExt;
use url::Url;

use crate::error::{ExtractError, Result};
use crate::provider::{JsonRpcProvider, JsonRpcProviderOptions};

#[derive(Args, Debug, Clone)]
pub struct RpcArgs {
    /// EVM node JSON-RPC URL.
    #[arg(long = "rpc.url", env = "NODE_URL")]
    pub rpc_url: String,

    /// Request timeout.
    #[arg(long = "rpc.timeout-sec", env = "RPC_TIMEOUT_SEC", default_value = "20")]
    pub rpc_timeout_sec: u64,

    /// Maximum requests per second sent to the node.
    #[arg(long = "rpc.rate-limit", env = "RPC_RATE_LIMIT")]
    pub rpc_rate_limit: Option<NonZeroU32>,
}

impl RpcArgs {
    pub fn to_json_rpc_provider(&self) -> Result<JsonRpcProvider> {
        let url = self
            .rpc_url
            .parse::<Url>()
            .change_context(ExtractError::Configuration)
            .attach_printable("failed to parse RPC URL")?;

        let timeout = Duration::from_secs(self.rpc_timeout_sec);
        let max_delay = Duration::from_secs((self.rpc_timeout_sec / 2).max(1));
        let options = JsonRpcProviderOptions {
            timeout,
            exponential_backoff: ExponentialBuilder::default()
                .with_max_delay(max_delay)
                .with_max_times(3),
            rate_limit: self.rpc_rate_limit,
        };

        JsonRpcProvider::new(url, options).change_context(ExtractError::Configuration)
    }
}
