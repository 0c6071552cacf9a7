use std::{path::PathBuf, str::FromStr};

use async_trait::async_trait;
use error_stack::{Result, ResultExt};
use native_tls::{Certificate, TlsConnector};
use postgres_native_tls::MakeTlsConnector;
use tokio_postgres::types::Json;
use tokio_postgres::{Client, Config, NoTls};
use tracing::{error, info};

use crate::normalize::CanonicalTransactionRecord;

use super::{is_valid_table_name, StoreError, TransactionStore};

#[derive(Debug, Clone)]
pub enum TlsConfiguration {
    NoTls,
    Tls {
        certificate: Option<PathBuf>,
        accept_invalid_certificates: Option<bool>,
        accept_invalid_hostnames: Option<bool>,
    },
}

#[derive(Debug, Clone)]
pub struct PostgresStoreOptions {
    pub connection_string: String,
    pub tls: TlsConfiguration,
}

/// Transaction store backed by a single PostgreSQL connection.
///
/// The connection pipelines concurrent statements, so one client serves the
/// whole worker pool.
pub struct PostgresStore {
    client: Client,
}

impl PostgresStore {
    pub async fn connect(options: PostgresStoreOptions) -> Result<Self, StoreError> {
        info!("connecting to database");
        let config = Config::from_str(&options.connection_string)
            .change_context(StoreError::Configuration)
            .attach_printable("failed to build postgres config from connection string")?;

        // The connector and connection types differ per branch, so each
        // branch connects and spawns its own connection.
        let client = match options.tls {
            TlsConfiguration::NoTls => {
                info!("using insecure connection");
                let (client, connection) = config
                    .connect(NoTls)
                    .await
                    .change_context(StoreError::Connection)
                    .attach_printable("failed to connect to postgres (no tls)")?;
                tokio::spawn(async move {
                    if let Err(err) = connection.await {
                        error!(error = ?err, "postgres connection closed with error");
                    }
                });
                client
            }
            TlsConfiguration::Tls {
                certificate,
                accept_invalid_certificates,
                accept_invalid_hostnames,
            } => {
                let mut builder = TlsConnector::builder();

                if let Some(ref certificate) = certificate {
                    let certificate = tokio::fs::read(certificate)
                        .await
                        .change_context(StoreError::Configuration)
                        .attach_printable_lazy(|| {
                            format!("failed to read tls certificate at {certificate:?}")
                        })?;
                    let certificate = Certificate::from_pem(&certificate)
                        .change_context(StoreError::Configuration)
                        .attach_printable("failed to build certificate from PEM file")?;
                    builder.add_root_certificate(certificate);
                }

                if let Some(accept_invalid_certificates) = accept_invalid_certificates {
                    builder.danger_accept_invalid_certs(accept_invalid_certificates);
                }

                if let Some(accept_invalid_hostnames) = accept_invalid_hostnames {
                    builder.danger_accept_invalid_hostnames(accept_invalid_hostnames);
                }

                let connector = builder
                    .build()
                    .change_context(StoreError::Configuration)
                    .attach_printable("failed to build tls connector")?;
                let connector = MakeTlsConnector::new(connector);
                let (client, connection) = config
                    .connect(connector)
                    .await
                    .change_context(StoreError::Connection)
                    .attach_printable("failed to connect to postgres (tls)")?;
                tokio::spawn(async move {
                    if let Err(err) = connection.await {
                        error!(error = ?err, "postgres connection closed with error");
                    }
                });
                client
            }
        };

        info!("client connected successfully");

        Ok(Self { client })
    }

    /// Run a trivial query to check the connection.
    pub async fn check_connection(&self) -> Result<(), StoreError> {
        self.client
            .simple_query("SELECT 1")
            .await
            .change_context(StoreError::Connection)
            .attach_printable("failed to query postgres")?;
        Ok(())
    }
}

#[async_trait]
impl TransactionStore for PostgresStore {
    async fn upsert(
        &self,
        table: &str,
        columns: &[&'static str],
        records: &[CanonicalTransactionRecord],
    ) -> Result<u64, StoreError> {
        check_table_name(table)?;

        let rows = records
            .iter()
            .map(serde_json::to_value)
            .collect::<std::result::Result<Vec<_>, _>>()
            .change_context(StoreError::Serialization)
            .attach_printable("failed to serialize rows")?;

        let query = upsert_query(table, columns);

        self.client
            .execute(&query, &[&Json(rows)])
            .await
            .change_context(StoreError::Query)
            .attach_printable("failed to run upsert query")
            .attach_printable_lazy(|| format!("table: {table}"))
    }

    async fn max_block_number(&self, table: &str) -> Result<Option<u64>, StoreError> {
        check_table_name(table)?;

        let query = format!("SELECT MAX(block_number)::bigint FROM {table}");
        let row = self
            .client
            .query_one(&query, &[])
            .await
            .change_context(StoreError::Query)
            .attach_printable("failed to read the highest loaded block")
            .attach_printable_lazy(|| format!("table: {table}"))?;

        let max = row
            .try_get::<_, Option<i64>>(0)
            .change_context(StoreError::Query)?;

        max.map(u64::try_from)
            .transpose()
            .change_context(StoreError::Query)
            .attach_printable("highest loaded block is negative")
    }
}

fn check_table_name(table: &str) -> Result<(), StoreError> {
    if is_valid_table_name(table) {
        return Ok(());
    }

    Err(StoreError::Configuration)
        .attach_printable("table name must be a plain identifier")
        .attach_printable_lazy(|| format!("table: {table}"))
}

/// Insert rows from a JSON array, overwriting existing rows on `tx_hash` conflicts.
fn upsert_query(table: &str, columns: &[&str]) -> String {
    let column_list = columns.join(", ");
    let updates = columns
        .iter()
        .filter(|column| **column != "tx_hash")
        .map(|column| format!("{column} = EXCLUDED.{column}"))
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        "INSERT INTO {table} ({column_list}) \
         SELECT {column_list} FROM json_populate_recordset(NULL::{table}, $1::json) \
         ON CONFLICT (tx_hash) DO UPDATE SET {updates}"
    )
}
