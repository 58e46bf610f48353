use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "mexc-gateway")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the gateway: stream user/market data and keep a live view of
    /// orders and balances
    Run {
        /// Comma-separated list of symbols to track (e.g. BTCUSDT,MXUSDT)
        #[arg(short, long, default_value = "")]
        symbols: String,
    },

    /// Print current account balances
    Balances,

    /// List open orders for a symbol
    OpenOrders {
        /// Symbol to query (e.g. BTCUSDT)
        #[arg(short, long)]
        symbol: String,
    },

    /// Convert small balances ("dust") into MX
    ConvertDust {
        /// Comma-separated assets to leave untouched
        #[arg(long, default_value = "USDC")]
        ignore: String,

        /// Show what would be converted without converting
        #[arg(long)]
        dry_run: bool,
    },
}
