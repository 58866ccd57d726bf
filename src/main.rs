//! Block-announcement observer.
//!
//! Connects to configured peers, answers their pings, and prints every
//! key block, micro block, and transaction batch the network announces.

use aewatch::ids::{self, IdTag};
use aewatch::net::{Listener, NetConfig, NetEvent, NetworkId, Peer, DEFAULT_PORT};
use aewatch::Keypair;
use clap::Parser;
use std::path::PathBuf;
use tracing::{error, info, warn};

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser)]
#[command(name = "aewatch", version, about = "Chain block-announcement observer")]
struct Args {
    /// Listen port
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Network: mainnet or testnet
    #[arg(short, long, default_value = "mainnet")]
    network: NetworkId,

    /// File holding the 32-byte hex node secret (see the keygen tool).
    /// An ephemeral identity is generated when omitted.
    #[arg(short, long)]
    key_file: Option<PathBuf>,

    /// Peers to dial, comma-separated `pp_…@host:port` entries
    #[arg(long)]
    peers: Option<String>,
}

fn load_keypair(path: &PathBuf) -> Result<Keypair, String> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| format!("cannot read {}: {}", path.display(), e))?;
    let secret = hex::decode(raw.trim())
        .map_err(|e| format!("{} is not hex: {}", path.display(), e))?;
    Keypair::from_secret_slice(&secret)
        .map_err(|e| format!("{}: {}", path.display(), e))
}

fn parse_peers(raw: &str) -> Result<Vec<Peer>, String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<Peer>().map_err(|e| format!("peer `{}`: {}", s, e)))
        .collect()
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("aewatch=info".parse().unwrap()),
        )
        .init();

    let args = Args::parse();

    let keypair = match &args.key_file {
        Some(path) => match load_keypair(path) {
            Ok(kp) => kp,
            Err(e) => {
                error!("{}", e);
                return;
            }
        },
        None => {
            let kp = Keypair::generate();
            warn!("no key file given, using an ephemeral identity");
            kp
        }
    };

    let peers = match args.peers.as_deref().map(parse_peers).transpose() {
        Ok(peers) => peers.unwrap_or_default(),
        Err(e) => {
            error!("{}", e);
            return;
        }
    };

    info!("aewatch v{} on {}", VERSION, args.network);
    info!("node identity: {}", ids::encode(IdTag::PeerPubkey, &keypair.public));

    let config = NetConfig {
        port: args.port,
        network: args.network,
        keypair,
        peers,
        ..Default::default()
    };

    let (listener, mut events) = match Listener::bind(config).await {
        Ok(started) => started,
        Err(e) => {
            error!("failed to bind listener: {}", e);
            return;
        }
    };
    let listener = std::sync::Arc::new(listener);

    // Event printer
    let event_task = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                NetEvent::PeerConnected(addr) => info!("peer connected: {}", addr),
                NetEvent::PeerDisconnected(addr) => info!("peer disconnected: {}", addr),
                NetEvent::KeyBlock(kb) => {
                    info!("key block #{} {} (miner {})", kb.height, kb.hash, kb.miner);
                }
                NetEvent::MicroBlock(mb) => {
                    info!("micro block #{} {} ({} tx)", mb.height, mb.hash, mb.tx_hashes.len());
                }
                NetEvent::BlockTxs(txs) => {
                    for tx in &txs {
                        info!("  tx {} (type {})", tx.hash, tx.tx_type_tag);
                    }
                }
            }
        }
    });

    // Status printer
    let status_listener = listener.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(30));
        loop {
            interval.tick().await;
            info!("status: {} known peer(s)", status_listener.peer_count().await);
        }
    });

    tokio::signal::ctrl_c().await.ok();
    info!("shutting down");
    listener.shutdown();
    event_task.abort();
}
