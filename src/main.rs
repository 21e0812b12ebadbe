use std::sync::Arc;

use beacon::config::{Cli, ServerConfig};
use beacon::logging;
use beacon::server::{self, WorkerCommand, WorkerPool};
use clap::Parser;

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init(cli.log.as_deref())?;

    let cfg = Arc::new(ServerConfig::load(&cli)?);

    // Worker processes run the event loop directly, with no async runtime.
    if let Some(id) = cli.worker_id {
        return server::run_worker(id, cfg);
    }

    tracing::info!(
        workers = cfg.workers,
        host = %cfg.host,
        port = cfg.port,
        root = %cfg.document_root.display(),
        "starting worker pool"
    );

    let pool = WorkerPool::new(WorkerCommand::current_process()?, cfg.workers);
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?
        .block_on(pool.run())
}
