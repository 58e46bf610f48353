use anyhow::Result;

use mexc_client::{GatewayConfig, MexcRestClient};

/// List open orders for one symbol.
pub async fn execute(symbol: String) -> Result<()> {
    let config = GatewayConfig::from_env()?;
    let client = MexcRestClient::new(&config)?;
    client.sync_clock().await?;

    let symbol = symbol.trim().to_uppercase();
    let orders = client.get_open_orders(&symbol).await?;

    if orders.is_empty() {
        println!("No open orders for {symbol}.");
        return Ok(());
    }

    println!(
        "{:<5} {:<20} {:>14} {:>12} {:>12} {:<17} CLIENT ID",
        "SIDE", "TYPE", "PRICE", "QTY", "FILLED", "STATUS"
    );
    for order in orders {
        let price = order
            .price
            .map(|p| p.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<5} {:<20} {:>14} {:>12} {:>12} {:<17} {}",
            order.side.as_str(),
            order.order_type.as_str(),
            price,
            order.quantity,
            order.executed_quantity,
            order.status.as_str(),
            order.client_order_id
        );
    }
    Ok(())
}
