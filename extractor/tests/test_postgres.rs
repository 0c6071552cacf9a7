use std::{sync::Arc, time::Duration};

use rawtx_extractor::{
    fetch::RawTransactionRecord,
    normalize::{ChainVariant, RawRecordNormalizer},
    store::{PostgresStore, PostgresStoreOptions, StoreUpserter, TlsConfiguration, TransactionStore},
};
use serde_json::Value;
use testcontainers::{
    core::{IntoContainerPort, WaitFor},
    runners::AsyncRunner,
    ContainerAsync, GenericImage, ImageExt,
};
use tokio_postgres::{Client, NoTls};

mod common;
use crate::common::*;

const CREATE_TABLE: &str = "CREATE TABLE pgn_tx (
    block_number bigint NOT NULL,
    tx_hash bytea PRIMARY KEY,
    from_address bytea,
    to_address bytea,
    gas_price double precision,
    gas_limit bigint,
    gas_used bigint,
    value double precision,
    status smallint,
    empty_input boolean,
    tx_fee double precision,
    block_timestamp timestamptz,
    l1_gas_used bigint,
    l1_gas_price double precision,
    l1_fee_scalar double precision
)";

async fn start_postgres() -> ContainerAsync<GenericImage> {
    GenericImage::new("postgres", "15-alpine")
        .with_exposed_port(5432.tcp())
        .with_wait_for(WaitFor::message_on_stderr(
            "database system is ready to accept connections",
        ))
        .with_env_var("POSTGRES_DB", "postgres")
        .with_env_var("POSTGRES_HOST_AUTH_METHOD", "trust")
        .start()
        .await
        .unwrap()
}

fn connection_string(port: u16) -> String {
    format!("postgresql://postgres@localhost:{port}")
}

/// The server restarts once after init, so the first attempts may be refused.
async fn connect_client(port: u16) -> Client {
    for _ in 0..20 {
        if let Ok((client, connection)) =
            tokio_postgres::connect(&connection_string(port), NoTls).await
        {
            tokio::spawn(connection);
            return client;
        }
        tokio::time::sleep(Duration::from_millis(250)).await;
    }
    panic!("postgres did not accept connections");
}

async fn setup(port: u16) -> (Client, PostgresStore) {
    let client = connect_client(port).await;
    client.batch_execute(CREATE_TABLE).await.unwrap();

    let store = PostgresStore::connect(PostgresStoreOptions {
        connection_string: connection_string(port),
        tls: TlsConfiguration::NoTls,
    })
    .await
    .unwrap();
    store.check_connection().await.unwrap();

    (client, store)
}

fn raw_records(block_number: u64, count: u64) -> Vec<RawTransactionRecord> {
    (0..count)
        .map(|index| {
            let Value::Object(mut map) = transaction(block_number, index) else {
                unreachable!();
            };
            let Value::Object(receipt) = receipt(block_number, index) else {
                unreachable!();
            };
            map.extend(receipt);
            map.insert(
                "block_timestamp".to_string(),
                Value::from(1_700_000_000 + block_number),
            );
            RawTransactionRecord::from(map)
        })
        .collect()
}

#[tokio::test]
#[ignore]
async fn test_upsert_is_idempotent() {
    let container = start_postgres().await;
    let port = container.get_host_port_ipv4(5432).await.unwrap();
    let (client, store) = setup(port).await;

    let store: Arc<dyn TransactionStore> = Arc::new(store);
    assert_eq!(store.max_block_number("pgn_tx").await.unwrap(), None);

    let normalizer = RawRecordNormalizer::new(ChainVariant::Default);
    let upserter = StoreUpserter::new(store.clone(), "pgn_tx", ChainVariant::Default);

    let mut records = normalizer.normalize(&raw_records(100, 3));
    // Duplicate hash in the same batch.
    records.push(records[0].clone());

    assert_eq!(upserter.upsert(records.clone()).await.unwrap(), 3);
    assert_eq!(upserter.upsert(records).await.unwrap(), 3);

    let count: i64 = client
        .query_one("SELECT COUNT(*) FROM pgn_tx", &[])
        .await
        .unwrap()
        .get(0);
    assert_eq!(count, 3);
    assert_eq!(store.max_block_number("pgn_tx").await.unwrap(), Some(100));

    let row = client
        .query_one(
            "SELECT gas_used, status, empty_input, encode(tx_hash, 'hex') FROM pgn_tx \
             ORDER BY tx_hash LIMIT 1",
            &[],
        )
        .await
        .unwrap();
    assert_eq!(row.get::<_, i64>(0), 21_000);
    assert_eq!(row.get::<_, i16>(1), 1);
    assert!(row.get::<_, bool>(2));
    assert_eq!(
        format!("0x{}", row.get::<_, String>(3)),
        tx_hash(100, 0)
    );
}

#[tokio::test]
#[ignore]
async fn test_upsert_overwrites_existing_rows() {
    let container = start_postgres().await;
    let port = container.get_host_port_ipv4(5432).await.unwrap();
    let (client, store) = setup(port).await;

    let upserter = StoreUpserter::new(Arc::new(store), "pgn_tx", ChainVariant::Default);
    let normalizer = RawRecordNormalizer::new(ChainVariant::Default);

    let mut records = normalizer.normalize(&raw_records(7, 1));
    upserter.upsert(records.clone()).await.unwrap();

    records[0].status = 0;
    records[0].gas_used = Some(42);
    upserter.upsert(records).await.unwrap();

    let row = client
        .query_one("SELECT status, gas_used FROM pgn_tx", &[])
        .await
        .unwrap();
    assert_eq!(row.get::<_, i16>(0), 0);
    assert_eq!(row.get::<_, i64>(1), 42);
}

#[tokio::test]
#[ignore]
async fn test_upsert_into_missing_table_fails() {
    let container = start_postgres().await;
    let port = container.get_host_port_ipv4(5432).await.unwrap();
    let (_client, store) = setup(port).await;

    let upserter = StoreUpserter::new(Arc::new(store), "missing_tx", ChainVariant::Default);
    let records = RawRecordNormalizer::new(ChainVariant::Default).normalize(&raw_records(1, 1));

    assert!(upserter.upsert(records).await.is_err());
}
