//! Projection of raw node records onto the canonical transaction schema.
pub mod numeric;
mod variant;

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;
use time::OffsetDateTime;
use tracing::warn;

use crate::fetch::RawTransactionRecord;

use self::numeric::{parse_i64, parse_quantity, parse_u64, WEI_PER_TOKEN};

pub use self::variant::ChainVariant;

/// Raw fields every variant projects.
const PROJECTED_FIELDS: &[&str] = &[
    "blockNumber",
    "hash",
    "from",
    "to",
    "gasPrice",
    "gas",
    "gasUsed",
    "value",
    "status",
    "input",
    "block_timestamp",
];

/// One row of the destination table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CanonicalTransactionRecord {
    pub block_number: i64,
    /// `\x`-prefixed hex, the text form of a postgres `bytea`.
    pub tx_hash: String,
    pub from_address: Option<String>,
    pub to_address: Option<String>,
    pub gas_price: Option<f64>,
    pub gas_limit: Option<i64>,
    pub gas_used: Option<i64>,
    pub value: Option<f64>,
    pub status: i16,
    pub empty_input: bool,
    pub tx_fee: f64,
    #[serde(with = "time::serde::rfc3339::option")]
    pub block_timestamp: Option<OffsetDateTime>,
    #[serde(flatten)]
    pub l1: Option<L1Columns>,
}

/// Variant-specific L1 fee columns.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum L1Columns {
    Gas {
        l1_gas_used: Option<i64>,
        /// Native-token units.
        l1_gas_price: f64,
        l1_fee_scalar: f64,
    },
    Fee {
        /// Native-token units.
        l1_fee: f64,
    },
}

/// Converts raw records to canonical records for one chain variant.
///
/// Never fails: missing fields and values that cannot be coerced are logged
/// once per batch and become null (or zero inside the fee).
#[derive(Debug, Clone, Copy)]
pub struct RawRecordNormalizer {
    variant: ChainVariant,
}

#[derive(Default)]
struct Diagnostics {
    missing: BTreeMap<&'static str, usize>,
    invalid: BTreeMap<&'static str, usize>,
}

struct RecordReader<'a> {
    record: &'a RawTransactionRecord,
    diagnostics: &'a mut Diagnostics,
}

impl RawRecordNormalizer {
    pub fn new(variant: ChainVariant) -> Self {
        Self { variant }
    }

    pub fn normalize(&self, records: &[RawTransactionRecord]) -> Vec<CanonicalTransactionRecord> {
        let mut diagnostics = Diagnostics::default();

        let canonical = records
            .iter()
            .map(|record| {
                let mut reader = RecordReader {
                    record,
                    diagnostics: &mut diagnostics,
                };
                self.normalize_record(&mut reader)
            })
            .collect();

        diagnostics.report(self.variant);

        canonical
    }

    fn normalize_record(&self, reader: &mut RecordReader<'_>) -> CanonicalTransactionRecord {
        for field in PROJECTED_FIELDS
            .iter()
            .chain(self.variant.expected_l1_fields())
        {
            reader.check_present(field);
        }

        let block_number = reader.i64("blockNumber").unwrap_or_default();
        let tx_hash = reader.bytes("hash").unwrap_or_default();
        let from_address = reader.bytes("from");
        let to_address = reader.bytes("to");
        let gas_price_wei = reader.quantity("gasPrice");
        let gas_limit = reader.i64("gas");
        let gas_used = reader.i64("gasUsed");
        let value_wei = reader.quantity("value");
        let status = match reader.record.get("status").and_then(parse_u64) {
            Some(1) => 1,
            Some(0) => 0,
            _ => -1,
        };
        let empty_input = matches!(
            reader.record.get("input").and_then(Value::as_str),
            Some("0x" | "")
        );
        let block_timestamp = reader.timestamp("block_timestamp");

        let execution_fee_wei =
            gas_price_wei.unwrap_or_default() * gas_used.unwrap_or_default() as f64;

        let (tx_fee, l1) = match self.variant {
            ChainVariant::Default | ChainVariant::OpStackL1Fee => {
                let l1_gas_used = reader.i64("l1GasUsed");
                let l1_gas_price_wei = reader.quantity("l1GasPrice").unwrap_or_default();
                let l1_fee_scalar = reader.quantity("l1FeeScalar").unwrap_or_default();

                let l1_fee_wei =
                    l1_gas_used.unwrap_or_default() as f64 * l1_gas_price_wei * l1_fee_scalar;
                let tx_fee = (execution_fee_wei + l1_fee_wei) / WEI_PER_TOKEN;

                let l1 = L1Columns::Gas {
                    l1_gas_used,
                    l1_gas_price: l1_gas_price_wei / WEI_PER_TOKEN,
                    l1_fee_scalar,
                };
                (tx_fee, Some(l1))
            }
            ChainVariant::ScrollL1Fee => {
                let l1_fee = reader.quantity("l1Fee").unwrap_or_default() / WEI_PER_TOKEN;
                let tx_fee = execution_fee_wei / WEI_PER_TOKEN + l1_fee;
                (tx_fee, Some(L1Columns::Fee { l1_fee }))
            }
            ChainVariant::Linea => (execution_fee_wei / WEI_PER_TOKEN, None),
        };

        CanonicalTransactionRecord {
            block_number,
            tx_hash,
            from_address,
            to_address,
            gas_price: gas_price_wei.map(|wei| wei / WEI_PER_TOKEN),
            gas_limit,
            gas_used,
            value: value_wei.map(|wei| wei / WEI_PER_TOKEN),
            status,
            empty_input,
            tx_fee,
            block_timestamp,
            l1,
        }
    }
}

impl RecordReader<'_> {
    fn check_present(&mut self, field: &'static str) {
        if !self.record.contains_key(field) {
            *self.diagnostics.missing.entry(field).or_default() += 1;
        }
    }

    /// Null and absent values are `None` without a diagnostic.
    fn present(&self, field: &str) -> Option<&Value> {
        self.record.get(field).filter(|value| !value.is_null())
    }

    fn coerce<T>(&mut self, field: &'static str, parse: impl Fn(&Value) -> Option<T>) -> Option<T> {
        let value = self.present(field)?;
        let parsed = parse(value);
        if parsed.is_none() {
            *self.diagnostics.invalid.entry(field).or_default() += 1;
        }
        parsed
    }

    fn i64(&mut self, field: &'static str) -> Option<i64> {
        self.coerce(field, parse_i64)
    }

    fn quantity(&mut self, field: &'static str) -> Option<f64> {
        self.coerce(field, parse_quantity)
    }

    fn bytes(&mut self, field: &'static str) -> Option<String> {
        self.coerce(field, |value| value.as_str().map(to_bytea_hex))
    }

    fn timestamp(&mut self, field: &'static str) -> Option<OffsetDateTime> {
        self.coerce(field, |value| {
            let seconds = parse_i64(value)?;
            OffsetDateTime::from_unix_timestamp(seconds).ok()
        })
    }
}

impl Diagnostics {
    fn report(&self, variant: ChainVariant) {
        for (field, rows) in &self.missing {
            warn!(field, rows, %variant, "raw records are missing a field");
        }

        for (field, rows) in &self.invalid {
            warn!(field, rows, %variant, "raw records have values that are not numeric");
        }
    }
}

/// Rewrite `0x…` hex to the `\x…` form postgres reads as `bytea`.
fn to_bytea_hex(hex: &str) -> String {
    let digits = hex
        .strip_prefix("0x")
        .or_else(|| hex.strip_prefix("0X"))
        .unwrap_or(hex);
    format!("\\x{}", digits.to_lowercase())
}
