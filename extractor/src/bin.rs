use std::process::ExitCode;

use clap::Parser;
use error_stack::ResultExt;
use rawtx_extractor::{
    cli::Cli,
    error::{ExtractError, ReportExt, Result},
};
use rawtx_observability::init_opentelemetry;

#[cfg(not(windows))]
#[global_allocator]
static ALLOC: jemallocator::Jemalloc = jemallocator::Jemalloc;

#[tokio::main]
async fn main() -> ExitCode {
    let args = Cli::parse();
    run_with_args(args).await.to_exit_code()
}

async fn run_with_args(args: Cli) -> Result<()> {
    init_opentelemetry(env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"))
        .change_context(ExtractError::Fatal)
        .attach_printable("failed to initialize opentelemetry")?;

    args.run().await
}
