use std::{sync::Arc, time::Duration};

use assert_matches::assert_matches;
use backon::ExponentialBuilder;
use rawtx_extractor::{
    error::ExtractError,
    fetch::RpcBlockFetcher,
    provider::{JsonRpcProvider, JsonRpcProviderOptions, NodeClient},
    range::BlockRange,
};
use serde_json::{json, Value};
use wiremock::{Mock, MockServer};

mod common;
use crate::common::*;

fn provider(server: &MockServer) -> JsonRpcProvider {
    let options = JsonRpcProviderOptions {
        timeout: Duration::from_secs(5),
        exponential_backoff: ExponentialBuilder::default()
            .with_min_delay(Duration::from_millis(1))
            .with_max_times(1),
        rate_limit: None,
    };

    JsonRpcProvider::new(server.uri().parse().unwrap(), options).unwrap()
}

async fn mount_block(server: &MockServer, block_number: u64, transactions: Vec<Value>) {
    Mock::given(rpc_request(
        "eth_getBlockByNumber",
        (format!("{block_number:#x}"), true),
    ))
    .respond_with(RpcResponse::new(block(block_number, transactions)))
    .mount(server)
    .await;
}

async fn mount_receipt(server: &MockServer, block_number: u64, index: u64) {
    Mock::given(rpc_request(
        "eth_getTransactionReceipt",
        (tx_hash(block_number, index),),
    ))
    .respond_with(RpcResponse::new(receipt(block_number, index)))
    .mount(server)
    .await;
}

#[tokio::test]
async fn test_latest_block_number() {
    let server = MockServer::start().await;
    Mock::given(rpc_method("eth_blockNumber"))
        .respond_with(RpcResponse::new(json!("0x1b4")))
        .mount(&server)
        .await;

    let latest = provider(&server).latest_block_number().await.unwrap();
    assert_eq!(latest, 436);
}

#[tokio::test]
async fn test_fetch_range_merges_receipts() {
    let server = MockServer::start().await;

    let mut upper_case = transaction(100, 1);
    upper_case["hash"] = json!(tx_hash(100, 1).to_uppercase().replacen("0X", "0x", 1));

    mount_block(&server, 100, vec![transaction(100, 0), upper_case]).await;
    mount_block(&server, 101, Vec::new()).await;
    mount_block(&server, 102, vec![transaction(102, 0)]).await;
    mount_receipt(&server, 100, 0).await;
    mount_receipt(&server, 100, 1).await;
    mount_receipt(&server, 102, 0).await;

    let fetcher = RpcBlockFetcher::new(Arc::new(provider(&server)));
    let range = BlockRange::new(100, 102).unwrap();

    let records = fetcher.fetch_range(range).await.unwrap().unwrap();
    assert_eq!(records.len(), 3);

    let hashes = records
        .iter()
        .map(|r| r.hash().unwrap().to_string())
        .collect::<Vec<_>>();
    assert_eq!(
        hashes,
        vec![tx_hash(100, 0), tx_hash(100, 1), tx_hash(102, 0)]
    );

    let first = &records[0];
    // Receipt fields win on collision.
    assert_eq!(first.get("type"), Some(&json!("0x2")));
    assert_eq!(first.get("gasUsed"), Some(&json!("0x5208")));
    assert_eq!(first.get("gasPrice"), Some(&json!("0x77359400")));
    assert_eq!(first.get("block_timestamp"), Some(&json!(1_700_000_100u64)));
    assert_eq!(records[2].get("block_timestamp"), Some(&json!(1_700_000_102u64)));
}

#[tokio::test]
async fn test_fetch_range_without_transactions_is_empty() {
    let server = MockServer::start().await;
    mount_block(&server, 7, Vec::new()).await;
    mount_block(&server, 8, Vec::new()).await;

    let fetcher = RpcBlockFetcher::new(Arc::new(provider(&server)));
    let records = fetcher
        .fetch_range(BlockRange::new(7, 8).unwrap())
        .await
        .unwrap();

    assert!(records.is_none());
}

#[tokio::test]
async fn test_fetch_range_fails_on_missing_block() {
    let server = MockServer::start().await;
    mount_block(&server, 10, vec![transaction(10, 0)]).await;
    mount_receipt(&server, 10, 0).await;
    Mock::given(rpc_request("eth_getBlockByNumber", ("0xb", true)))
        .respond_with(RpcResponse::new(Value::Null))
        .mount(&server)
        .await;

    let fetcher = RpcBlockFetcher::new(Arc::new(provider(&server)));
    let err = fetcher
        .fetch_range(BlockRange::new(10, 11).unwrap())
        .await
        .unwrap_err();

    assert_matches!(err.current_context(), ExtractError::Fetch);
}

#[tokio::test]
async fn test_fetch_range_fails_on_missing_receipt() {
    let server = MockServer::start().await;
    mount_block(&server, 10, vec![transaction(10, 0), transaction(10, 1)]).await;
    mount_receipt(&server, 10, 0).await;
    Mock::given(rpc_request("eth_getTransactionReceipt", (tx_hash(10, 1),)))
        .respond_with(RpcResponse::new(Value::Null))
        .mount(&server)
        .await;

    let fetcher = RpcBlockFetcher::new(Arc::new(provider(&server)));
    let err = fetcher
        .fetch_range(BlockRange::new(10, 10).unwrap())
        .await
        .unwrap_err();

    assert_matches!(err.current_context(), ExtractError::Fetch);
}

#[tokio::test]
async fn test_fetch_range_fails_on_rpc_error() {
    let server = MockServer::start().await;
    Mock::given(rpc_method("eth_getBlockByNumber"))
        .respond_with(RpcErrorResponse::new("header not found"))
        .mount(&server)
        .await;

    let fetcher = RpcBlockFetcher::new(Arc::new(provider(&server)));
    let err = fetcher
        .fetch_range(BlockRange::new(1, 1).unwrap())
        .await
        .unwrap_err();

    assert_matches!(err.current_context(), ExtractError::Fetch);
}

#[tokio::test]
async fn test_fetch_range_rejects_transaction_hashes() {
    let server = MockServer::start().await;
    Mock::given(rpc_request("eth_getBlockByNumber", ("0x5", true)))
        .respond_with(RpcResponse::new(json!({
            "number": "0x5",
            "timestamp": "0x10",
            "transactions": [tx_hash(5, 0)],
        })))
        .mount(&server)
        .await;

    let fetcher = RpcBlockFetcher::new(Arc::new(provider(&server)));
    let err = fetcher
        .fetch_range(BlockRange::new(5, 5).unwrap())
        .await
        .unwrap_err();

    assert_matches!(err.current_context(), ExtractError::Fetch);
}

#[tokio::test]
async fn test_fetch_range_accepts_proof_of_authority_blocks() {
    let server = MockServer::start().await;

    let mut poa_block = block(300, vec![transaction(300, 0), transaction(300, 1)]);
    // 32 bytes of vanity followed by a 65 bytes seal.
    poa_block["extraData"] = json!(format!("0x{}{}", "00".repeat(32), "5c".repeat(65)));
    poa_block["signature"] = json!(format!("0x{}", "ef".repeat(65)));
    poa_block["proofs"] = json!([{
        "validator": "0x3333",
        "seal": format!("0x{}", "12".repeat(96)),
    }]);
    poa_block["difficulty"] = json!("0x2");

    Mock::given(rpc_request("eth_getBlockByNumber", ("0x12c", true)))
        .respond_with(RpcResponse::new(poa_block))
        .mount(&server)
        .await;
    mount_receipt(&server, 300, 0).await;
    mount_receipt(&server, 300, 1).await;

    let fetcher = RpcBlockFetcher::new(Arc::new(provider(&server)));
    let task = tokio::spawn(async move {
        fetcher
            .fetch_range(BlockRange::new(300, 300).unwrap())
            .await
    });
    let records = task.await.unwrap().unwrap().unwrap();

    assert_eq!(records.len(), 2);
    assert_eq!(records[0].hash(), Some(tx_hash(300, 0).as_str()));
    assert_eq!(records[1].hash(), Some(tx_hash(300, 1).as_str()));
    assert_eq!(
        records[1].get("block_timestamp"),
        Some(&json!(1_700_000_300u64))
    );
    assert!(!records[0].contains_key("extraData"));
}
