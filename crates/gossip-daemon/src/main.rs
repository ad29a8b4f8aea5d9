//! gossip-daemon: Runs one gossip membership node over UDP.
//!
//! Start the first node without `--rendezvous`; it founds the group at its
//! own bind address. Every other node points `--rendezvous` at that address.

use anyhow::Result;
use clap::Parser;
use std::net::SocketAddr;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use gossip_core::{DEFAULT_TIMEOUT_TICKS, JoinRetryConfig, MembershipConfig, PeerId};
use gossip_daemon::{Daemon, UdpTransport};

#[derive(Parser, Debug)]
#[command(name = "gossip-daemon")]
#[command(about = "Gossip-based group membership node")]
struct Args {
    /// Local UDP address; this becomes the node's PeerId
    #[arg(short, long, default_value = "127.0.0.1:7946")]
    bind: SocketAddr,

    /// Address of the node to join through (omit to start a new group)
    #[arg(short, long)]
    rendezvous: Option<PeerId>,

    /// Gossip and sweep period in milliseconds
    #[arg(long, default_value_t = 1000)]
    tick_ms: u64,

    /// Silence in milliseconds before a peer is considered failed
    /// (default: 20 ticks)
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Chance that a tick sends no gossip
    #[arg(long, default_value_t = 1.0 / 6.0)]
    skip_probability: f64,

    /// Peers to gossip to per tick
    #[arg(long, default_value_t = 1)]
    fanout: usize,

    /// Seed for peer selection (random if not provided)
    #[arg(long)]
    seed: Option<u64>,

    /// Join requests to send before giving up (0 = keep trying)
    #[arg(long, default_value_t = 5)]
    join_attempts: u32,

    /// Enable verbose logging
    #[arg(long)]
    verbose: bool,
}

impl Args {
    fn config(&self, local: PeerId) -> MembershipConfig {
        let failure_timeout = Duration::from_millis(
            self.timeout_ms
                .unwrap_or(self.tick_ms * u64::from(DEFAULT_TIMEOUT_TICKS)),
        );
        MembershipConfig {
            rendezvous: self.rendezvous.unwrap_or(local),
            failure_timeout,
            tick_interval: Duration::from_millis(self.tick_ms),
            skip_probability: self.skip_probability,
            fanout: self.fanout,
            tombstone_ttl: failure_timeout * 2,
            join_retry: Some(JoinRetryConfig {
                max_attempts: (self.join_attempts > 0).then_some(self.join_attempts),
                ..JoinRetryConfig::default()
            }),
            rng_seed: self.seed,
            ..MembershipConfig::default()
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for Ctrl+C: {}", e);
        std::future::pending::<()>().await;
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Set up logging - respects RUST_LOG env var, defaults to info (or debug with --verbose)
    let default_filter = if args.verbose {
        "debug,gossip_core=debug,gossip_daemon=debug"
    } else {
        "info,gossip_core=info,gossip_daemon=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("Starting gossip-daemon");

    let transport = UdpTransport::bind(args.bind).await?;
    let local = gossip_core::Transport::local_peer_id(&transport);
    if local.host() == 0 {
        warn!("Bound to an unspecified address; peers cannot reach {}", local);
    }

    let config = args.config(local);
    config.validate()?;
    match args.rendezvous {
        Some(rendezvous) => info!("Joining group via {}", rendezvous),
        None => info!("Starting a new group at {}", local),
    }

    let daemon = Daemon::new(transport, config)?;

    // Log every membership change as a JSON line
    let _subscription = daemon.events().subscribe(|event| match serde_json::to_string(event) {
        Ok(json) => info!("Membership event: {}", json),
        Err(e) => warn!("Failed to serialize event {:?}: {}", event, e),
    });

    info!("Daemon running. Press Ctrl+C to stop.");
    daemon.run(shutdown_signal()).await?;

    info!("Shutting down");
    Ok(())
}
