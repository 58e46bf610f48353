//! `mexc-gateway` — connectivity gateway for the MEXC spot API.
//!
//! Credentials come from `MEXC_API_KEY`/`MEXC_SECRET_KEY`; endpoints can be
//! redirected with `MEXC_BASE_URL`/`MEXC_WS_URL` for sandbox use.
//!
//! Exit codes are stable:
//! - `0` clean shutdown
//! - `1` unexpected error
//! - `2` configuration error (missing credentials, bad URLs)
//! - `3` unrecoverable connectivity failure (retry budget exhausted)

mod cli;
mod commands;

use clap::Parser;
use mexc_core::MexcError;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cli::{Cli, Commands};

const EXIT_CONFIG: i32 = 2;
const EXIT_CONNECTIVITY: i32 = 3;

#[tokio::main]
async fn main() {
    // Load .env before anything reads the environment.
    if let Err(e) = dotenvy::dotenv() {
        if !e.to_string().contains("not found") {
            eprintln!("Warning: failed to load .env file: {e}");
        }
    }

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mexc_gateway=info,mexc_client=info,mexc_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Run { symbols } => commands::run::execute(symbols).await,
        Commands::Balances => commands::account::execute().await,
        Commands::OpenOrders { symbol } => commands::orders::execute(symbol).await,
        Commands::ConvertDust { ignore, dry_run } => {
            commands::convert::execute(ignore, dry_run).await
        }
    };

    if let Err(e) = result {
        tracing::error!("{e:#}");
        std::process::exit(exit_code(&e));
    }
}

fn exit_code(error: &anyhow::Error) -> i32 {
    match error.downcast_ref::<MexcError>() {
        Some(MexcError::Config(_)) => EXIT_CONFIG,
        Some(MexcError::RetriesExhausted { .. }) | Some(MexcError::Recoverable { .. }) => {
            EXIT_CONNECTIVITY
        }
        _ => 1,
    }
}
