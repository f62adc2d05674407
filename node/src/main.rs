mod chain;
mod cli;
mod index;
mod ipfs;
mod logging;
mod reconcile;
mod registry;
mod run;
mod sources;
mod storage;
mod sync;

use cli::NodeConfig;
use eyre::Result;

#[tokio::main]
async fn main() -> Result<()> {
    let config = NodeConfig::from_args();
    logging::init_tracing(&config);
    run::run_node(config).await
}
