use anyhow::Result;
use tracing::info;

use mexc_client::{GatewayConfig, MexcRestClient};

/// Convert small balances into MX, skipping the ignore list.
pub async fn execute(ignore: String, dry_run: bool) -> Result<()> {
    let config = GatewayConfig::from_env()?;
    let client = MexcRestClient::new(&config)?;
    client.sync_clock().await?;

    let ignored: Vec<String> = ignore
        .split(',')
        .map(|s| s.trim().to_uppercase())
        .filter(|s| !s.is_empty())
        .collect();

    let convertible = client.convertible_assets().await?;
    info!("{} assets eligible for conversion", convertible.len());

    let assets: Vec<String> = convertible
        .into_iter()
        .map(|entry| entry.asset)
        .filter(|asset| !ignored.contains(&asset.to_uppercase()))
        .collect();

    if assets.is_empty() {
        info!("no small balances to convert");
        println!("Nothing to convert.");
        return Ok(());
    }

    if dry_run {
        println!("Would convert: {}", assets.join(", "));
        return Ok(());
    }

    info!("converting: {}", assets.join(", "));
    let result = client.convert_dust(&assets).await?;
    info!("conversion result: {result}");
    println!("Converted: {}", assets.join(", "));
    Ok(())
}
