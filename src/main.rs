use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use stockmesh::broker::BrokerNode;
use stockmesh::config::BrokerConfig;
use stockmesh::rpc::remote::HttpConnector;
use stockmesh::rpc::{server, Endpoint};
use stockmesh::telemetry;
use tokio::net::TcpListener;
use tracing::{info, warn};

#[derive(Debug, Parser)]
#[command(name = "stockmesh-broker", about = "Run one replicated stock broker")]
struct Args {
    /// TOML config file; environment variables override it.
    #[arg(short, long)]
    config: Option<PathBuf>,
    #[arg(long)]
    id: Option<String>,
    #[arg(long)]
    host: Option<String>,
    #[arg(short, long)]
    port: Option<u16>,
    /// Broker to ask for replication at startup, repeatable.
    #[arg(long = "connect", value_name = "HOST:PORT")]
    connect: Vec<Endpoint>,
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    info!("Shutting down");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    let mut cfg = BrokerConfig::load(args.config.as_deref())?;
    if let Some(id) = args.id {
        cfg.broker_id = id;
    }
    if let Some(host) = args.host {
        cfg.host = host;
    }
    if let Some(port) = args.port {
        cfg.port = port;
    }
    cfg.peers.extend(args.connect.iter().map(Endpoint::to_string));
    cfg.validate()?;

    telemetry::init_tracing(&cfg.log_filter);
    if let Some(addr) = cfg.metrics_addr {
        telemetry::init_metrics(addr)?;
    }

    let connector = Arc::new(HttpConnector::new(cfg.request_timeout())?);
    let node = Arc::new(
        BrokerNode::new(cfg.broker_id.clone(), cfg.seed_records(), connector)
            .with_endpoint(cfg.advertised_endpoint()),
    );

    let listener = TcpListener::bind(cfg.bind_addr()).await?;
    info!(broker = %cfg.broker_id, addr = %cfg.bind_addr(), "Broker listening");
    let server = tokio::spawn(server::serve_with_shutdown(listener, node.clone(), shutdown_signal()));

    for peer in cfg.peer_endpoints()? {
        if let Err(e) = node.connect_to_peer(&peer).await {
            warn!(%peer, error = %e, "Failed to connect to broker");
        }
    }
    node.log_status();

    server.await??;
    node.flush_replication().await;
    node.log_status();
    Ok(())
}
