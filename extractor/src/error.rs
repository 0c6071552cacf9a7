use std::{fmt, process::ExitCode};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractError {
    /// Invalid configuration. Should not retry.
    Configuration,
    /// Startup connection to the node, store or bucket failed. Should not retry.
    Connection,
    /// Fetching a block range from the node failed. Can retry.
    Fetch,
    /// Archiving or verifying the raw extract failed. Can retry.
    Archive,
    /// Writing to the destination store failed. Can retry.
    Store,
    /// A range failed past the backoff ceiling.
    RetriesExhausted,
    /// Anything else. Should not retry.
    Fatal,
}

pub type Result<T> = error_stack::Result<T, ExtractError>;

impl error_stack::Context for ExtractError {}

impl fmt::Display for ExtractError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExtractError::Configuration => f.write_str("extractor error: configuration"),
            ExtractError::Connection => f.write_str("extractor error: connection"),
            ExtractError::Fetch => f.write_str("extractor error: fetch"),
            ExtractError::Archive => f.write_str("extractor error: archive"),
            ExtractError::Store => f.write_str("extractor error: store"),
            ExtractError::RetriesExhausted => f.write_str("extractor error: retries exhausted"),
            ExtractError::Fatal => f.write_str("extractor error: fatal"),
        }
    }
}

pub trait ReportExt {
    fn to_exit_code(&self) -> ExitCode;
}

impl<T> ReportExt for Result<T> {
    fn to_exit_code(&self) -> ExitCode {
        match self {
            Ok(_) => ExitCode::SUCCESS,
            Err(err) => {
                eprintln!("{:?}", err);
                // Exit codes based on sysexits.h
                match err.downcast_ref::<ExtractError>() {
                    Some(ExtractError::Configuration) => ExitCode::from(78),
                    Some(ExtractError::Connection) => ExitCode::from(69),
                    Some(ExtractError::RetriesExhausted) => ExitCode::from(75),
                    _ => ExitCode::FAILURE,
                }
            }
        }
    }
}
