use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use stockmesh::client::TradingClient;
use stockmesh::config::ClientConfig;
use stockmesh::engine::TradeSide;
use stockmesh::telemetry;

#[derive(Debug, Parser)]
#[command(name = "stockmesh-trader", about = "Trade against a set of brokers with failover")]
struct Args {
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Broker endpoint, repeatable; replaces the configured list.
    #[arg(short, long = "endpoint", value_name = "HOST:PORT")]
    endpoints: Vec<String>,
    #[arg(long, default_value = "trader")]
    client_id: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Current price of one symbol
    Price { symbol: String },
    Buy { symbol: String, quantity: u64 },
    Sell { symbol: String, quantity: u64 },
    /// Every symbol and its price
    List,
    Status,
    /// Repeat one trade several times
    Bulk {
        side: TradeSide,
        symbol: String,
        quantity: u64,
        #[arg(default_value_t = 5)]
        times: usize,
        #[arg(long, default_value_t = 500)]
        pause_ms: u64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    let mut cfg = ClientConfig::load(args.config.as_deref())?;
    if !args.endpoints.is_empty() {
        cfg.endpoints = args.endpoints;
        cfg.validate()?;
    }
    telemetry::init_tracing(&cfg.log_filter);

    // Connects lazily on the first call.
    let mut client = TradingClient::from_config(&cfg)?;

    match args.command {
        Command::Price { symbol } => {
            let symbol = symbol.to_uppercase();
            println!("{symbol}: ${:.2}", client.get_price(&symbol).await?);
        }
        Command::Buy { symbol, quantity } => {
            trade(&mut client, TradeSide::Buy, &symbol, quantity, &args.client_id).await?
        }
        Command::Sell { symbol, quantity } => {
            trade(&mut client, TradeSide::Sell, &symbol, quantity, &args.client_id).await?
        }
        Command::List => {
            println!("{:<10} {:>12}", "SYMBOL", "PRICE");
            for (symbol, price) in client.get_all_prices().await? {
                println!("{symbol:<10} {price:>12.2}");
            }
        }
        Command::Status => println!("{}", client.connection_status().await),
        Command::Bulk { side, symbol, quantity, times, pause_ms } => {
            let symbol = symbol.to_uppercase();
            let summary = client
                .execute_batch(side, &symbol, quantity, times, Duration::from_millis(pause_ms))
                .await;
            println!(
                "{side} {symbol} x{quantity}: {}/{} succeeded ({:.1}%), {} rejected, {} errors",
                summary.succeeded,
                summary.requested,
                summary.success_rate(),
                summary.rejected,
                summary.errors
            );
            if let Some(price) = summary.final_price {
                println!("final {symbol} price: ${price:.2}");
            }
        }
    }
    Ok(())
}

async fn trade(
    client: &mut TradingClient,
    side: TradeSide,
    symbol: &str,
    quantity: u64,
    client_id: &str,
) -> anyhow::Result<()> {
    let symbol = symbol.to_uppercase();
    if client.execute_trade(side, &symbol, quantity, client_id).await? {
        println!("{side} {quantity} {symbol} ok, new price ${:.2}", client.get_price(&symbol).await?);
    } else {
        println!("{side} {quantity} {symbol} rejected");
    }
    Ok(())
}
