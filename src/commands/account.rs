use anyhow::Result;

use mexc_client::{GatewayConfig, MexcRestClient};

/// Print non-zero account balances.
pub async fn execute() -> Result<()> {
    let config = GatewayConfig::from_env()?;
    let client = MexcRestClient::new(&config)?;
    client.sync_clock().await?;

    let mut balances = client.get_balances().await?;
    balances.retain(|b| !b.free.is_zero() || !b.locked.is_zero());
    balances.sort_by(|a, b| a.asset.cmp(&b.asset));

    if balances.is_empty() {
        println!("No non-zero balances.");
        return Ok(());
    }

    println!("{:<10} {:>20} {:>20}", "ASSET", "FREE", "LOCKED");
    for balance in balances {
        println!(
            "{:<10} {:>20} {:>20}",
            balance.asset, balance.free, balance.locked
        );
    }
    Ok(())
}
