use std::error::Error as _;

use tokenwatch_core::config::{self, TokenwatchConfig};
use tokenwatch_core::{BindingError, LedgerError, RpcConnection, TokenBinding};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("Configuration error: {0}")]
    Config(#[from] ::config::ConfigError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Binding(#[from] BindingError),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Err(e) = run().await {
        tracing::error!("{e}");
        let mut source = e.source();
        while let Some(cause) = source {
            tracing::error!("  caused by: {cause}");
            source = cause.source();
        }
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    let cfg: TokenwatchConfig = config::load()?;
    let settings = cfg.rpc_settings()?;
    tracing::info!(
        network = %cfg.network,
        rpc_url = %settings.rpc_url,
        contract = %cfg.contract_id,
        "Starting tokenwatch"
    );

    let connection = RpcConnection::new(settings, cfg.signer()?);
    let owner = cfg.owner.clone().or_else(|| connection.signer_address());
    let latest = connection.latest_ledger().await?;
    tracing::info!(latest_ledger = latest, "RPC node reachable");

    let binding = TokenBinding::with_options(cfg.binding_options());
    binding.init(cfg.contract_id.clone(), connection)?;

    let metadata = binding.metadata().await?;
    println!("{}", serde_json::to_string_pretty(&metadata)?);

    match owner {
        Some(owner) => {
            let balance = binding.balance_of(owner.clone()).get().await?;
            println!("balance of {owner}: {balance}");
        }
        None => tracing::info!("No owner or signer configured; skipping balance"),
    }

    let mut transfers = binding.transfer_events()?;
    tracing::info!("Watching transfer events, Ctrl-C to stop");
    loop {
        tokio::select! {
            event = transfers.next() => match event {
                Some(event) => tracing::info!(
                    from = %event.from,
                    to = %event.to,
                    value = %event.value,
                    "Transfer"
                ),
                None => break,
            },
            signal = tokio::signal::ctrl_c() => {
                signal?;
                tracing::info!("Shutting down");
                break;
            }
        }
    }
    Ok(())
}
