pub mod config;
pub mod server;

use std::sync::Arc;

use anyhow::Result;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::config::Config;

/// Bind the configured listen address and serve until ctrl-c. Split from
/// `main` so integration tests can drive the server against a listener
/// they bound themselves.
pub async fn server_main(config: Arc<Config>) -> Result<()> {
    let listener = TcpListener::bind(config.transporter_address).await?;
    log::info!("transporter listening: addr={}", listener.local_addr()?);

    let token = CancellationToken::new();
    let shutdown = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::info!("shutdown requested");
            shutdown.cancel();
        }
    });

    server::serve(listener, token).await
}
