use std::path::PathBuf;

use clap::Args;
use error_stack::{Report, ResultExt};

use crate::error::{ExtractError, Result};
use crate::store::{is_valid_table_name, PostgresStore, PostgresStoreOptions, StoreError, TlsConfiguration};

#[derive(Args, Debug, Clone)]
pub struct StoreArgs {
    /// Connection string to the PostgreSQL server.
    #[arg(long = "store.connection-string", env = "POSTGRES_CONNECTION_STRING")]
    pub connection_string: String,

    /// Target table. Defaults to `<chain>_tx`.
    ///
    /// The table must exist, with `tx_hash` as its primary key.
    #[arg(long = "store.table-name", env = "POSTGRES_TABLE_NAME")]
    pub table_name: Option<String>,

    /// Disable TLS when connecting to the PostgreSQL server.
    #[arg(long = "store.no-tls", env = "POSTGRES_NO_TLS")]
    pub no_tls: bool,

    /// Path to the PEM-formatted X509 TLS certificate file.
    #[arg(long = "store.tls-certificate", env = "POSTGRES_TLS_CERTIFICATE")]
    pub tls_certificate: Option<PathBuf>,

    /// Disable certificate validation.
    #[arg(
        long = "store.tls-accept-invalid-certificates",
        env = "POSTGRES_TLS_ACCEPT_INVALID_CERTIFICATES"
    )]
    pub tls_accept_invalid_certificates: Option<bool>,

    /// Disable hostname validation.
    #[arg(
        long = "store.tls-accept-invalid-hostnames",
        env = "POSTGRES_TLS_ACCEPT_INVALID_HOSTNAMES"
    )]
    pub tls_accept_invalid_hostnames: Option<bool>,
}

impl StoreArgs {
    pub fn table_name(&self, chain: &str) -> Result<String> {
        let table_name = self
            .table_name
            .clone()
            .unwrap_or_else(|| format!("{chain}_tx"));

        if !is_valid_table_name(&table_name) {
            return Err(ExtractError::Configuration)
                .attach_printable("table name must be a plain identifier")
                .attach_printable_lazy(|| format!("table: {table_name}"));
        }

        Ok(table_name)
    }

    pub fn to_postgres_options(&self) -> PostgresStoreOptions {
        let tls = if self.no_tls {
            TlsConfiguration::NoTls
        } else {
            TlsConfiguration::Tls {
                certificate: self.tls_certificate.clone(),
                accept_invalid_certificates: self.tls_accept_invalid_certificates,
                accept_invalid_hostnames: self.tls_accept_invalid_hostnames,
            }
        };

        PostgresStoreOptions {
            connection_string: self.connection_string.clone(),
            tls,
        }
    }

    /// Connect to the store and check the connection.
    pub async fn to_postgres_store(&self) -> Result<PostgresStore> {
        let store = PostgresStore::connect(self.to_postgres_options())
            .await
            .map_err(store_startup_error)?;

        store
            .check_connection()
            .await
            .map_err(store_startup_error)?;

        Ok(store)
    }
}

fn store_startup_error(err: Report<StoreError>) -> Report<ExtractError> {
    let context = match err.current_context() {
        StoreError::Configuration => ExtractError::Configuration,
        _ => ExtractError::Connection,
    };
    err.change_context(context)
}
