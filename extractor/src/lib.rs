//! Extract EVM transactions into an object-storage archive and PostgreSQL.
pub mod archive;
pub mod cli;
pub mod driver;
pub mod error;
pub mod fetch;
pub mod normalize;
pub mod processor;
pub mod provider;
pub mod range;
pub mod retry;
pub mod store;
