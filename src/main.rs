use std::net::TcpStream;
use std::path::PathBuf;
use std::sync::Arc;

use agent_port::config::{self, watcher::ConfigWatcher, AgentConfig};
use agent_port::observability::{logging, metrics};
use agent_port::reply::{self, Reply, StaticReply};
use agent_port::ExternalPort;
use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "agent-port", version)]
#[command(about = "Serves monitoring data to peers connecting on the agent port", long_about = None)]
struct Args {
    /// TOML configuration file; watched for changes.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listen on this port instead of the configured one.
    #[arg(short, long)]
    port: Option<u16>,

    /// File whose contents are sent to every admitted peer.
    #[arg(long, conflicts_with = "echo")]
    payload: Option<PathBuf>,

    /// Read the request and answer with a fixed acknowledgement.
    #[arg(long)]
    echo: bool,
}

fn build_reply(args: &Args) -> std::io::Result<Arc<dyn Reply>> {
    if args.echo {
        return Ok(Arc::new(reply::echo::<TcpStream>));
    }
    let payload = match &args.payload {
        Some(path) => std::fs::read(path)?,
        None => format!("<<<agent_port>>>\nversion: {}\n", env!("CARGO_PKG_VERSION")).into_bytes(),
    };
    let reply = StaticReply::new(payload);
    if reply.is_empty() {
        tracing::warn!("Payload is empty, peers will receive nothing");
    }
    tracing::info!(bytes = reply.len(), "Serving static payload");
    Ok(Arc::new(reply))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let initial = match &args.config {
        Some(path) => config::load_config(path)?,
        None => AgentConfig::default(),
    };
    logging::init_logging(&initial.observability);
    tracing::info!("agent-port v{} starting", env!("CARGO_PKG_VERSION"));

    if initial.observability.metrics_enabled {
        if let Ok(addr) = initial.observability.metrics_address.parse() {
            metrics::init_metrics(addr);
        } else {
            tracing::error!(
                metrics_address = %initial.observability.metrics_address,
                "Failed to parse metrics address"
            );
        }
    }

    tracing::info!(
        port = args.port.unwrap_or(initial.port.port),
        ipv6 = initial.port.ipv6,
        only_from = ?initial.port.only_from,
        "Configuration loaded"
    );

    let shared = config::shared(initial);
    let reply = build_reply(&args)?;
    let port = Arc::new(ExternalPort::new(Arc::clone(&shared)).with_port(args.port.unwrap_or(0)));
    if !port.start(Arc::clone(&reply)) {
        return Err("port failed to start".into());
    }

    let (_watch_guard, mut updates) = match &args.config {
        Some(path) => {
            let (watcher, rx) = ConfigWatcher::new(path);
            (Some(watcher.run()?), Some(rx))
        }
        None => (None, None),
    };

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupt received");
                break;
            }
            Some(next) = async {
                match updates.as_mut() {
                    Some(rx) => rx.recv().await,
                    None => std::future::pending().await,
                }
            } => {
                let restart = shared.load().port.requires_restart(&next.port);
                shared.store(Arc::new(next));
                if restart {
                    tracing::info!("Port settings changed, restarting IO");
                    let port = Arc::clone(&port);
                    let reply = Arc::clone(&reply);
                    let started = tokio::task::spawn_blocking(move || {
                        port.shutdown();
                        port.start(reply)
                    })
                    .await?;
                    if !started {
                        tracing::error!("IO restart failed");
                    }
                }
            }
        }
    }

    let stopping = Arc::clone(&port);
    tokio::task::spawn_blocking(move || stopping.shutdown()).await?;
    tracing::info!("Shutdown complete");
    Ok(())
}
