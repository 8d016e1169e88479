use std::sync::Arc;

use anyhow::{Context, Result};
use netblock_rs::{
    cfg::{cli::resolve_config_path, config::Config, logger::init_logger},
    replica::{handler::DiskHandler, store::FileStore},
    rpc::server::RpcServer,
};
use tokio::{main, net::TcpListener};
use tracing::{error, info};

/// Replica daemon: find-or-create the backing file, then serve one RPC
/// pipeline per accepted frontend connection.
#[main]
async fn main() -> Result<()> {
    let _init_logger = init_logger("tests/config_logger.yaml")?;

    let config_arg = std::env::args().nth(1);
    let config = resolve_config_path(config_arg.as_deref())
        .and_then(Config::load_from_file)
        .context("failed to resolve or load config")?;

    let store = FileStore::open(&config.replica.disk_path, config.replica.disk_size)
        .context("failed to find or create disk")?;
    let handler = Arc::new(DiskHandler::new(store));

    let listener = TcpListener::bind(&config.replica.listen_address)
        .await
        .with_context(|| format!("failed to listen on {}", config.replica.listen_address))?;
    info!(addr = %config.replica.listen_address, "replica listening");

    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                info!(%peer, "accepted frontend connection");
                let server =
                    RpcServer::start(stream, config.replica.workers, Arc::clone(&handler));
                tokio::spawn(async move {
                    server.join().await;
                    info!(%peer, "frontend connection finished");
                });
            },
            Err(err) => {
                error!(%err, "failed to accept connection");
            },
        }
    }
}
