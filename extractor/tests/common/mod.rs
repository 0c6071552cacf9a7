#![allow(dead_code)]
use std::{
    collections::{BTreeMap, HashMap},
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use bytes::Bytes;
use error_stack::{Report, Result};
use rawtx_extractor::{
    archive::{ArchiveStore, ObjectStoreError},
    normalize::CanonicalTransactionRecord,
    provider::{JsonRpcProviderError, NodeClient},
    store::{StoreError, TransactionStore},
};
use serde::Deserialize;
use serde_json::{json, Value};
use wiremock::{http::Method, Match, Request, Respond, ResponseTemplate};

#[derive(Debug, Deserialize)]
struct RpcRequest {
    id: u64,
    method: String,
    #[serde(default)]
    params: Value,
}

pub struct RpcRequestMatcher {
    method: String,
    params: Option<Value>,
}

pub struct RpcResponse {
    result: Value,
}

pub struct RpcErrorResponse {
    message: String,
}

pub fn rpc_request<P>(method: impl Into<String>, params: P) -> RpcRequestMatcher
where
    P: serde::Serialize,
{
    RpcRequestMatcher {
        method: method.into(),
        params: Some(serde_json::to_value(params).expect("failed to serialize JSON params")),
    }
}

/// Match on the method only.
pub fn rpc_method(method: impl Into<String>) -> RpcRequestMatcher {
    RpcRequestMatcher {
        method: method.into(),
        params: None,
    }
}

impl RpcResponse {
    pub fn new(result: Value) -> Self {
        Self { result }
    }
}

impl RpcErrorResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl Match for RpcRequestMatcher {
    fn matches(&self, req: &Request) -> bool {
        if req.method != Method::POST {
            return false;
        }

        let Ok(rpc_req) = serde_json::from_slice::<RpcRequest>(&req.body) else {
            return false;
        };

        rpc_req.method == self.method
            && self
                .params
                .as_ref()
                .map(|params| rpc_req.params == *params)
                .unwrap_or(true)
    }
}

impl Respond for RpcResponse {
    fn respond(&self, req: &Request) -> ResponseTemplate {
        if let Ok(rpc_req) = serde_json::from_slice::<RpcRequest>(&req.body) {
            ResponseTemplate::new(200).set_body_json(json!({
                "jsonrpc": "2.0",
                "id": rpc_req.id,
                "result": self.result,
            }))
        } else {
            ResponseTemplate::new(400)
        }
    }
}

impl Respond for RpcErrorResponse {
    fn respond(&self, req: &Request) -> ResponseTemplate {
        if let Ok(rpc_req) = serde_json::from_slice::<RpcRequest>(&req.body) {
            ResponseTemplate::new(200).set_body_json(json!({
                "jsonrpc": "2.0",
                "id": rpc_req.id,
                "error": {
                    "code": -32000,
                    "message": self.message,
                }
            }))
        } else {
            ResponseTemplate::new(400)
        }
    }
}

pub fn tx_hash(block_number: u64, index: u64) -> String {
    format!("0x{block_number:032x}{index:032x}")
}

/// A transaction as returned inside `eth_getBlockByNumber(n, true)`.
pub fn transaction(block_number: u64, index: u64) -> Value {
    json!({
        "blockNumber": format!("{block_number:#x}"),
        "hash": tx_hash(block_number, index),
        "from": "0x1111111111111111111111111111111111111111",
        "to": "0x2222222222222222222222222222222222222222",
        "gas": "0x7530",
        "gasPrice": "0x77359400",
        "value": "0xde0b6b3a7640000",
        "input": "0x",
        "transactionIndex": format!("{index:#x}"),
        "type": "0x0",
    })
}

pub fn receipt(block_number: u64, index: u64) -> Value {
    json!({
        "blockNumber": format!("{block_number:#x}"),
        "transactionHash": tx_hash(block_number, index),
        "gasUsed": "0x5208",
        "status": "0x1",
        "type": "0x2",
        "l1GasUsed": "0x640",
        "l1GasPrice": "0x3b9aca00",
        "l1FeeScalar": "1.5",
        "logs": [],
    })
}

pub fn block(block_number: u64, transactions: Vec<Value>) -> Value {
    json!({
        "number": format!("{block_number:#x}"),
        "hash": format!("0x{block_number:064x}"),
        "timestamp": format!("{:#x}", 1_700_000_000 + block_number),
        // Proof-of-authority seal: 32 bytes vanity + 65 bytes signature.
        "extraData": format!("0x{}", "ab".repeat(97)),
        "transactions": transactions,
    })
}

#[derive(Default)]
struct MemoryNodeState {
    latest: u64,
    blocks: HashMap<u64, Value>,
    receipts: HashMap<String, Value>,
    /// Remaining failures of `eth_getBlockByNumber`, per block.
    block_failures: HashMap<u64, usize>,
    block_requests: HashMap<u64, usize>,
}

/// In-memory node. Blocks not explicitly added have no transactions.
#[derive(Clone, Default)]
pub struct MemoryNode {
    state: Arc<Mutex<MemoryNodeState>>,
}

impl MemoryNode {
    pub fn new(latest: u64) -> Self {
        let node = Self::default();
        node.state.lock().unwrap().latest = latest;
        node
    }

    /// Add a block with `count` transactions and their receipts.
    pub fn with_transactions(self, block_number: u64, count: u64) -> Self {
        {
            let mut state = self.state.lock().unwrap();
            let transactions = (0..count)
                .map(|index| transaction(block_number, index))
                .collect();
            for index in 0..count {
                state
                    .receipts
                    .insert(tx_hash(block_number, index), receipt(block_number, index));
            }
            state
                .blocks
                .insert(block_number, block(block_number, transactions));
        }
        self
    }

    pub fn fail_block(&self, block_number: u64, times: usize) {
        self.state
            .lock()
            .unwrap()
            .block_failures
            .insert(block_number, times);
    }

    pub fn block_requests(&self, block_number: u64) -> usize {
        self.state
            .lock()
            .unwrap()
            .block_requests
            .get(&block_number)
            .copied()
            .unwrap_or_default()
    }
}

#[async_trait]
impl NodeClient for MemoryNode {
    async fn latest_block_number(&self) -> Result<u64, JsonRpcProviderError> {
        Ok(self.state.lock().unwrap().latest)
    }

    async fn block_with_transactions(
        &self,
        block_number: u64,
    ) -> Result<Value, JsonRpcProviderError> {
        let mut state = self.state.lock().unwrap();
        *state.block_requests.entry(block_number).or_default() += 1;

        if let Some(remaining) = state.block_failures.get_mut(&block_number) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(
                    Report::new(JsonRpcProviderError::Request).attach_printable("injected failure")
                );
            }
        }

        Ok(state
            .blocks
            .get(&block_number)
            .cloned()
            .unwrap_or_else(|| block(block_number, Vec::new())))
    }

    async fn transaction_receipt(&self, hash: &str) -> Result<Value, JsonRpcProviderError> {
        self.state
            .lock()
            .unwrap()
            .receipts
            .get(hash)
            .cloned()
            .ok_or_else(|| Report::new(JsonRpcProviderError::NotFound))
    }
}

/// Shared, ordered log of side effects.
#[derive(Clone, Default)]
pub struct EventLog(Arc<Mutex<Vec<String>>>);

impl EventLog {
    pub fn push(&self, event: impl Into<String>) {
        self.0.lock().unwrap().push(event.into());
    }

    pub fn events(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }
}

#[derive(Clone, Default)]
pub struct MemoryArchive {
    objects: Arc<Mutex<BTreeMap<String, Bytes>>>,
    puts: Arc<Mutex<usize>>,
    log: EventLog,
}

impl MemoryArchive {
    pub fn new(log: EventLog) -> Self {
        Self {
            log,
            ..Default::default()
        }
    }

    pub fn keys(&self) -> Vec<String> {
        self.objects.lock().unwrap().keys().cloned().collect()
    }

    pub fn puts(&self) -> usize {
        *self.puts.lock().unwrap()
    }
}

#[async_trait]
impl ArchiveStore for MemoryArchive {
    async fn put(&self, key: &str, body: Bytes) -> Result<(), ObjectStoreError> {
        self.log.push(format!("archive {key}"));
        *self.puts.lock().unwrap() += 1;
        self.objects.lock().unwrap().insert(key.to_string(), body);
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool, ObjectStoreError> {
        Ok(self.objects.lock().unwrap().contains_key(key))
    }
}

#[derive(Default)]
struct MemoryStoreState {
    rows: BTreeMap<String, CanonicalTransactionRecord>,
    max_block: Option<u64>,
    upsert_failures: usize,
    upserts: usize,
}

/// In-memory table keyed by `tx_hash`.
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryStoreState>>,
    log: EventLog,
}

impl MemoryStore {
    pub fn new(log: EventLog) -> Self {
        Self {
            log,
            ..Default::default()
        }
    }

    pub fn with_max_block(self, max_block: u64) -> Self {
        self.state.lock().unwrap().max_block = Some(max_block);
        self
    }

    pub fn fail_upserts(&self, times: usize) {
        self.state.lock().unwrap().upsert_failures = times;
    }

    pub fn rows(&self) -> Vec<CanonicalTransactionRecord> {
        self.state.lock().unwrap().rows.values().cloned().collect()
    }

    pub fn upserts(&self) -> usize {
        self.state.lock().unwrap().upserts
    }
}

#[async_trait]
impl TransactionStore for MemoryStore {
    async fn upsert(
        &self,
        table: &str,
        _columns: &[&'static str],
        records: &[CanonicalTransactionRecord],
    ) -> Result<u64, StoreError> {
        let mut state = self.state.lock().unwrap();
        state.upserts += 1;

        if state.upsert_failures > 0 {
            state.upsert_failures -= 1;
            return Err(Report::new(StoreError::Query));
        }

        self.log.push(format!("upsert {table} {}", records.len()));
        for record in records {
            state.rows.insert(record.tx_hash.clone(), record.clone());
            let block = record.block_number as u64;
            state.max_block = Some(state.max_block.map_or(block, |max| max.max(block)));
        }

        Ok(records.len() as u64)
    }

    async fn max_block_number(&self, _table: &str) -> Result<Option<u64>, StoreError> {
        Ok(self.state.lock().unwrap().max_block)
    }
}
