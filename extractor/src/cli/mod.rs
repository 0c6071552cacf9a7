mod archive;
mod rpc;
mod run;
mod store;

use clap::{Parser, Subcommand};

use crate::error::Result;

pub use self::archive::ArchiveArgs;
pub use self::rpc::RpcArgs;
pub use self::run::{run_extraction, RetryArgs, RunArgs};
pub use self::store::StoreArgs;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    subcommand: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    Run(RunArgs),
}

impl Cli {
    pub async fn run(self) -> Result<()> {
        match self.subcommand {
            Command::Run(args) => run_extraction(args).await,
        }
    }
}
