use std::sync::Arc;

use clap::{Parser, Subcommand};

use trend_trade_core::{BrokerAdapter, ConfigLoader, TradeMode};
use trend_trade_data::{TradeDatabase, TradeRepository};
use trend_trade_dhan::{DhanBroker, DhanClient, PaperBroker};
use trend_trade_engine::{EngineRegistry, StopMode};

#[derive(Parser)]
#[command(name = "trend-trade")]
#[command(about = "Intraday index-options SuperTrend trading engine", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the trading engine until interrupted
    Run {
        /// Config file path
        #[arg(short, long, default_value = "config/trend-trade.toml")]
        config: String,
    },
    /// Show recent journal entries
    Trades {
        /// Config file path
        #[arg(short, long, default_value = "config/trend-trade.toml")]
        config: String,
        /// Number of trades to show
        #[arg(short, long, default_value_t = 20)]
        limit: i64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run { config } => run_engine(&config).await?,
        Commands::Trades { config, limit } => show_trades(&config, limit).await?,
    }

    Ok(())
}

async fn run_engine(config_path: &str) -> anyhow::Result<()> {
    let app_config = ConfigLoader::load(config_path)?;
    let database = TradeDatabase::new(&app_config.database.url).await?;

    let broker: Arc<dyn BrokerAdapter> = match app_config.engine.mode {
        TradeMode::Paper => {
            tracing::info!("paper mode: all quotes and fills are simulated");
            Arc::new(PaperBroker::new())
        }
        TradeMode::Live => {
            anyhow::ensure!(
                !app_config.dhan.access_token.is_empty() && !app_config.dhan.client_id.is_empty(),
                "live mode requires Dhan credentials (dhan.access_token, dhan.client_id)"
            );
            let client = DhanClient::new(
                app_config.dhan.api_url.clone(),
                app_config.dhan.access_token.clone(),
                app_config.dhan.client_id.clone(),
            );
            Arc::new(DhanBroker::new(client))
        }
    };

    let instance_id = format!(
        "supertrend-{}-{}s",
        app_config.engine.root, app_config.engine.interval_secs
    );

    let registry = EngineRegistry::new(database);
    let handle = registry
        .spawn(&instance_id, app_config.engine.clone(), broker)
        .await?;
    handle.start().await?;
    tracing::info!(instance = %instance_id, "engine running; ctrl-c to stop");

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down");

    // Prefer a clean stop; flatten first if a position is still on.
    if handle.stop(StopMode::Graceful).await.is_err() {
        tracing::warn!("position still open; forcing square-off");
        handle.stop(StopMode::ForceFlat).await?;
    }
    registry.shutdown_all().await?;

    Ok(())
}

async fn show_trades(config_path: &str, limit: i64) -> anyhow::Result<()> {
    let app_config = ConfigLoader::load(config_path)?;
    let database = TradeDatabase::new(&app_config.database.url).await?;
    let repo = TradeRepository::new(database.pool().clone());

    for trade in repo.recent(limit).await? {
        let close = trade
            .close_at
            .map_or_else(|| "open".to_string(), |at| at.to_rfc3339());
        println!(
            "{} {} {} {}  entry {}  exit {}  pnl {}  [{}] {}",
            trade.open_at.to_rfc3339(),
            trade.root,
            trade.strike,
            trade.side,
            trade.entry_price,
            trade.exit_price.map_or_else(|| "-".to_string(), |p| p.to_string()),
            trade.realized_pnl.map_or_else(|| "-".to_string(), |p| p.to_string()),
            trade.mode,
            if trade.is_closed() {
                format!("{} @ {}", trade.exit_reason.as_deref().unwrap_or("?"), close)
            } else {
                "open".to_string()
            },
        );
    }

    Ok(())
}
