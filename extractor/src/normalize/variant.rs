use std::fmt;

use clap::ValueEnum;

const BASE_COLUMNS: &[&str] = &[
    "block_number",
    "tx_hash",
    "from_address",
    "to_address",
    "gas_price",
    "gas_limit",
    "gas_used",
    "value",
    "status",
    "empty_input",
    "tx_fee",
    "block_timestamp",
];

const L1_GAS_COLUMNS: &[&str] = &["l1_gas_used", "l1_gas_price", "l1_fee_scalar"];

const L1_FEE_COLUMNS: &[&str] = &["l1_fee"];

const OP_STACK_CHAINS: &[&str] = &[
    "optimism",
    "base",
    "zora",
    "mode",
    "gitcoin_pgn",
    "redstone",
    "orderly",
];

/// How a chain computes transaction fees.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, ValueEnum)]
pub enum ChainVariant {
    /// Execution fee plus an optional L1 data fee from `l1GasUsed`,
    /// `l1GasPrice` and `l1FeeScalar`.
    Default,
    /// Same formula as `Default`, but the L1 fields are expected on every receipt.
    #[value(name = "op-stack-l1-fee")]
    OpStackL1Fee,
    /// Execution fee plus the receipt's `l1Fee`.
    #[value(name = "scroll-l1-fee")]
    ScrollL1Fee,
    /// Execution fee only.
    Linea,
}

impl ChainVariant {
    pub fn for_chain(chain: &str) -> Self {
        match chain {
            "linea" => ChainVariant::Linea,
            "scroll" => ChainVariant::ScrollL1Fee,
            chain if OP_STACK_CHAINS.contains(&chain) => ChainVariant::OpStackL1Fee,
            _ => ChainVariant::Default,
        }
    }

    /// Destination columns, in insertion order.
    pub fn columns(&self) -> Vec<&'static str> {
        let extra = match self {
            ChainVariant::Default | ChainVariant::OpStackL1Fee => L1_GAS_COLUMNS,
            ChainVariant::ScrollL1Fee => L1_FEE_COLUMNS,
            ChainVariant::Linea => &[],
        };

        BASE_COLUMNS.iter().chain(extra).copied().collect()
    }

    /// Raw L1 fields this variant expects on every record.
    ///
    /// `Default` reads the L1 fields when present but does not expect them.
    pub fn expected_l1_fields(&self) -> &'static [&'static str] {
        match self {
            ChainVariant::OpStackL1Fee => &["l1GasUsed", "l1GasPrice", "l1FeeScalar"],
            ChainVariant::ScrollL1Fee => &["l1Fee"],
            ChainVariant::Default | ChainVariant::Linea => &[],
        }
    }
}

impl fmt::Display for ChainVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChainVariant::Default => write!(f, "default"),
            ChainVariant::OpStackL1Fee => write!(f, "op-stack-l1-fee"),
            ChainVariant::ScrollL1Fee => write!(f, "scroll-l1-fee"),
            ChainVariant::Linea => write!(f, "linea"),
        }
    }
}
