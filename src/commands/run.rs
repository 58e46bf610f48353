use std::time::Duration;

use anyhow::Result;
use tracing::info;

use mexc_client::{GatewayConfig, MexcGateway};

/// Run the gateway until interrupted, logging a periodic status line.
pub async fn execute(symbols: String) -> Result<()> {
    let config = GatewayConfig::from_env()?;
    let symbols: Vec<String> = symbols
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_uppercase)
        .collect();

    let gateway = MexcGateway::connect(config, &symbols).await?;

    let mut status = tokio::time::interval(Duration::from_secs(30));
    status.tick().await; // the first tick fires immediately
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = status.tick() => {
                info!(
                    "stream {:?}, {} open orders, {} assets",
                    gateway.stream_state(),
                    gateway.open_orders().await.len(),
                    gateway.balances().await.len()
                );
            }
        }
    }

    info!("shutdown requested");
    let orders = gateway.current_orders().await;
    gateway.shutdown().await?;
    info!("final view: {} tracked orders", orders.len());
    Ok(())
}
