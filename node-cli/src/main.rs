use anyhow::Context;
use chainlite_node::{Node, cli::Cli, logging::init_logging};
use clap::Parser;
use tokio::net::TcpListener;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Cli::parse().into_config()?;
    init_logging(config.log_format, &config.log_level).context("installing log subscriber")?;

    let addr = config.listen_addr();
    let node = Node::new(config)?;
    node.bootstrap().await;
    node.spawn_periodic_resolve();

    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!(%addr, height = node.ledger.len().await, "node listening");

    node.serve(listener, async {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown requested");
        }
    })
    .await?;
    Ok(())
}
